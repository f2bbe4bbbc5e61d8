//! Browser side of the pipeline: log into Clint, pass the e-mail
//! verification step and export each origin's deals into bronze CSV.

pub mod collect;
pub mod downloads;
pub mod fallback;
pub mod login;
pub mod output;
pub mod pacing;
pub mod types;
pub mod verification;
pub mod webdriver;

pub use collect::{collect_all, collect_url, CollectPlan, OriginTarget, Upload};
pub use login::{login, ClintCredentials, LoginOptions};
pub use types::{CollectMethod, CollectionReport, UrlOutcome};
pub use verification::{verify, CodeSource, VerifyOptions, WebmailAccount};
pub use webdriver::{Capabilities, Locator, WebDriver, WebDriverError};
