//! Chrome session setup and wait helpers on top of `fantoccini`.
//!
//! [`WebDriver`] derefs to [`fantoccini::Client`], so navigation, element
//! lookup, windows and frames use the client API directly. This module only
//! adds what the Clint automation needs on top: Chrome capabilities with a
//! download folder, `navigator.webdriver` masking and polling waits.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fantoccini::error::{CmdError, NewSessionError};
use fantoccini::wd::Capabilities as CapabilityMap;
use fantoccini::{Client, ClientBuilder};
use serde_json::{json, Value};
use thiserror::Error;

pub use fantoccini::elements::Element;
pub use fantoccini::Locator;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

const MASK_WEBDRIVER: &str = "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("could not start a browser session: {0}")]
    Session(#[from] NewSessionError),

    #[error(transparent)]
    Command(#[from] CmdError),

    #[error("could not pass an element to a script: {0}")]
    Script(#[from] serde_json::Error),

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },
}

impl WebDriverError {
    /// True when the driver answered "no such element".
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Command(e) if e.is_no_such_element())
    }
}

/// Chrome session capabilities.
#[derive(Debug, Clone)]
pub struct Capabilities {
    headless: bool,
    download_dir: Option<PathBuf>,
    args: Vec<String>,
}

impl Capabilities {
    pub fn chrome() -> Self {
        Self {
            headless: false,
            download_dir: None,
            args: vec![
                "--start-maximized".into(),
                "--disable-blink-features=AutomationControlled".into(),
            ],
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Directory Chrome saves downloads to. Must be absolute.
    pub fn download_dir(mut self, dir: &Path) -> Self {
        self.download_dir = Some(dir.to_path_buf());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The `alwaysMatch` capability map sent on session creation.
    pub fn to_map(&self) -> CapabilityMap {
        let mut args = self.args.clone();
        if self.headless {
            args.push("--headless=new".into());
        }

        let mut options = json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
        });
        if let Some(dir) = &self.download_dir {
            options["prefs"] = json!({
                "download.default_directory": dir.display().to_string(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
                "safebrowsing.enabled": true,
            });
        }

        let mut caps = CapabilityMap::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("goog:chromeOptions".into(), options);
        caps
    }
}

/// An open browser session.
#[derive(Debug)]
pub struct WebDriver {
    client: Client,
}

impl Deref for WebDriver {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl WebDriver {
    /// Start a new session on the driver at `url` and hide the
    /// `navigator.webdriver` flag.
    pub async fn connect(url: &str, caps: &Capabilities) -> Result<Self, WebDriverError> {
        let client = ClientBuilder::native().capabilities(caps.to_map()).connect(url).await?;
        tracing::info!(driver = %url, "Started browser session");

        if let Err(e) = client.execute(MASK_WEBDRIVER, vec![]).await {
            tracing::warn!("Could not mask navigator.webdriver: {e}");
        }
        Ok(Self { client })
    }

    /// Click through JavaScript, for elements hidden behind custom widgets.
    pub async fn js_click(&self, element: &Element) -> Result<(), WebDriverError> {
        let arg: Value = serde_json::to_value(element)?;
        self.client.execute("arguments[0].click();", vec![arg]).await?;
        Ok(())
    }

    /// End the session and close the browser.
    pub async fn quit(self) -> Result<(), WebDriverError> {
        self.client.close().await?;
        tracing::info!("Closed browser session");
        Ok(())
    }

    /// Poll until `locator` is present. The first lookup always runs, even
    /// with a zero timeout.
    pub async fn wait_for(&self, locator: Locator<'_>, timeout: Duration) -> Result<Element, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.client.find(locator).await {
                Ok(element) => return Ok(element),
                Err(e) if !e.is_no_such_element() => return Err(e.into()),
                Err(_) if Instant::now() >= deadline => return Err(timeout_error(locator, timeout)),
                Err(_) => {}
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until `locator` is present, displayed and enabled.
    pub async fn wait_clickable(&self, locator: Locator<'_>, timeout: Duration) -> Result<Element, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.clickable(locator).await {
                Ok(Some(element)) => return Ok(element),
                Ok(None) => {}
                Err(e) if e.is_no_such_element() => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(timeout_error(locator, timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn clickable(&self, locator: Locator<'_>) -> Result<Option<Element>, CmdError> {
        let element = self.client.find(locator).await?;
        if element.is_displayed().await? && element.is_enabled().await? {
            Ok(Some(element))
        } else {
            Ok(None)
        }
    }
}

fn timeout_error(locator: Locator<'_>, timeout: Duration) -> WebDriverError {
    WebDriverError::Timeout {
        what: format!("{locator:?}"),
        secs: timeout.as_secs(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock driver helpers shared by the acquire tests.

    use super::*;
    use mockito::{Matcher, Mock, Server};

    pub const SESSION: &str = "s1";

    /// Key under which W3C drivers serialize element references.
    pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

    /// Mock session creation plus the webdriver-flag script, then connect.
    pub async fn session(server: &mut Server) -> WebDriver {
        server
            .mock("POST", "/session")
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(json!({ "value": { "sessionId": SESSION, "capabilities": {} } }).to_string())
            .create_async()
            .await;
        mock_script(server).await;
        WebDriver::connect(&server.url(), &Capabilities::chrome()).await.unwrap()
    }

    pub fn path(suffix: &str) -> String {
        format!("/session/{SESSION}{suffix}")
    }

    pub async fn mock_script(server: &mut Server) -> Mock {
        server
            .mock("POST", path("/execute/sync").as_str())
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .create_async()
            .await
    }

    /// Navigation resolves against the current URL first, so `goto` needs
    /// both endpoints.
    pub async fn mock_goto(server: &mut Server, current: &str) -> Mock {
        mock_get(server, "/url", json!(current)).await;
        mock_post(server, "/url").await
    }

    /// Mock a find-element request for `value` answering with element `id`.
    pub async fn mock_find(server: &mut Server, value: &str, id: &str) -> Mock {
        server
            .mock("POST", path("/element").as_str())
            .match_body(Matcher::PartialJson(json!({ "value": value })))
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(json!({ "value": { ELEMENT_KEY: id } }).to_string())
            .create_async()
            .await
    }

    /// Mock a find-elements request for `value` answering with `ids`.
    pub async fn mock_find_all(server: &mut Server, value: &str, ids: &[&str]) -> Mock {
        let elements: Vec<Value> = ids.iter().map(|id| json!({ ELEMENT_KEY: id })).collect();
        server
            .mock("POST", path("/elements").as_str())
            .match_body(Matcher::PartialJson(json!({ "value": value })))
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(json!({ "value": elements }).to_string())
            .create_async()
            .await
    }

    /// Mock a find-element request for `value` answering "no such element".
    pub async fn mock_missing(server: &mut Server, value: &str) -> Mock {
        server
            .mock("POST", path("/element").as_str())
            .match_body(Matcher::PartialJson(json!({ "value": value })))
            .with_header("content-type", "application/json")
            .with_status(404)
            .with_body(
                json!({ "value": { "error": "no such element", "message": "Unable to locate element", "stacktrace": "" } })
                    .to_string(),
            )
            .create_async()
            .await
    }

    /// Mock an element command (`click`, `clear`, `value`) on element `id`.
    pub async fn mock_element_cmd(server: &mut Server, id: &str, cmd: &str) -> Mock {
        server
            .mock("POST", path(&format!("/element/{id}/{cmd}")).as_str())
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .create_async()
            .await
    }

    /// Mock an element query (`displayed`, `enabled`, `selected`, `text`).
    pub async fn mock_element_get(server: &mut Server, id: &str, query: &str, value: Value) -> Mock {
        server
            .mock("GET", path(&format!("/element/{id}/{query}")).as_str())
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(json!({ "value": value }).to_string())
            .create_async()
            .await
    }

    pub async fn mock_get(server: &mut Server, suffix: &str, value: Value) -> Mock {
        server
            .mock("GET", path(suffix).as_str())
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(json!({ "value": value }).to_string())
            .create_async()
            .await
    }

    pub async fn mock_post(server: &mut Server, suffix: &str) -> Mock {
        server
            .mock("POST", path(suffix).as_str())
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .create_async()
            .await
    }

    /// Make a mocked element clickable.
    pub async fn clickable(server: &mut Server, id: &str) {
        mock_element_get(server, id, "displayed", json!(true)).await;
        mock_element_get(server, id, "enabled", json!(true)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_capabilities_map() {
        let caps = Capabilities::chrome()
            .headless(true)
            .download_dir(Path::new("/data/bronze/downloads"))
            .to_map();
        let opts = &caps["goog:chromeOptions"];

        assert_eq!(caps["browserName"], "chrome");
        let args: Vec<&str> = opts["args"].as_array().unwrap().iter().map(|a| a.as_str().unwrap()).collect();
        assert!(args.contains(&"--disable-blink-features=AutomationControlled"));
        assert!(args.contains(&"--headless=new"));
        assert_eq!(opts["excludeSwitches"][0], "enable-automation");
        assert_eq!(opts["prefs"]["download.default_directory"], "/data/bronze/downloads");
        assert_eq!(opts["prefs"]["download.prompt_for_download"], false);
    }

    #[test]
    fn test_capabilities_without_downloads_or_headless() {
        let caps = Capabilities::chrome().to_map();
        let opts = &caps["goog:chromeOptions"];
        assert!(opts.get("prefs").is_none());
        assert!(!opts["args"].as_array().unwrap().iter().any(|a| a == "--headless=new"));
    }

    #[tokio::test]
    async fn test_connect_masks_webdriver_flag() {
        let mut server = mockito::Server::new_async().await;
        let mask = server
            .mock("POST", path("/execute/sync").as_str())
            .match_body(Matcher::Regex("navigator".into()))
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/session")
            .match_body(Matcher::Regex("goog:chromeOptions".into()))
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(json!({ "value": { "sessionId": SESSION, "capabilities": {} } }).to_string())
            .create_async()
            .await;

        WebDriver::connect(&server.url(), &Capabilities::chrome()).await.unwrap();
        mask.assert_async().await;
    }

    #[tokio::test]
    async fn test_session_not_created() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/session")
            .with_header("content-type", "application/json")
            .with_status(500)
            .with_body(
                json!({ "value": { "error": "session not created", "message": "Chrome failed to start", "stacktrace": "" } })
                    .to_string(),
            )
            .create_async()
            .await;

        let err = WebDriver::connect(&server.url(), &Capabilities::chrome()).await.unwrap_err();
        assert!(matches!(err, WebDriverError::Session(_)), "{err}");
    }

    #[tokio::test]
    async fn test_missing_element_is_recognized() {
        let mut server = mockito::Server::new_async().await;
        let driver = session(&mut server).await;
        mock_missing(&mut server, "#nope").await;

        let err: WebDriverError = driver.find(Locator::Css("#nope")).await.unwrap_err().into();
        assert!(err.is_no_such_element());
    }

    #[tokio::test]
    async fn test_js_click_passes_the_element() {
        let mut server = mockito::Server::new_async().await;
        let driver = session(&mut server).await;
        mock_find(&mut server, "label", "lbl").await;
        let click = server
            .mock("POST", path("/execute/sync").as_str())
            .match_body(Matcher::PartialJson(json!({ "args": [{ ELEMENT_KEY: "lbl" }] })))
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .expect(1)
            .create_async()
            .await;

        let label = driver.find(Locator::Css("label")).await.unwrap();
        driver.js_click(&label).await.unwrap();
        click.assert_async().await;
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let mut server = mockito::Server::new_async().await;
        let driver = session(&mut server).await;
        mock_missing(&mut server, "body").await;

        let err = driver
            .wait_for(Locator::Css("body"), Duration::from_millis(600))
            .await
            .unwrap_err();
        assert!(matches!(err, WebDriverError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_wait_clickable_requires_displayed() {
        let mut server = mockito::Server::new_async().await;
        let driver = session(&mut server).await;
        mock_find(&mut server, "//button[@type='submit']", "btn").await;
        mock_element_get(&mut server, "btn", "displayed", json!(false)).await;
        mock_element_get(&mut server, "btn", "enabled", json!(true)).await;

        let err = driver
            .wait_clickable(Locator::XPath("//button[@type='submit']"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, WebDriverError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_quit_deletes_session() {
        let mut server = mockito::Server::new_async().await;
        let driver = session(&mut server).await;
        let delete = server
            .mock("DELETE", path("").as_str())
            .with_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .create_async()
            .await;

        driver.quit().await.unwrap();
        delete.assert_async().await;
    }
}
