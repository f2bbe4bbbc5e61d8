use std::time::Duration;

use anyhow::{Context, Result};

use crate::pacing;
use crate::webdriver::{Element, Locator, WebDriver};

const EMAIL_FIELD: &str = "input[placeholder='Email']";
const PASSWORD_FIELD: &str = "input[placeholder='Senha']";
const CONTINUE_BUTTON: &str = "//button[contains(text(), 'Continuar')]";

const EMAIL_FIELD_FALLBACK: &str = "[name=\"email\"]";
const PASSWORD_FIELD_FALLBACK: &str = "[name=\"password\"]";
const SUBMIT_BUTTON_FALLBACK: &str = "//button[@type='submit']";

/// Clint login secrets, read from `CLINT_URL`, `CLINT_USER` and
/// `CLINT_PASSWORD`.
#[derive(Clone)]
pub struct ClintCredentials {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ClintCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClintCredentials")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl ClintCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Every missing or blank key is reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let (url, user, password) = (get("CLINT_URL"), get("CLINT_USER"), get("CLINT_PASSWORD"));

        match (url, user, password) {
            (Some(url), Some(user), Some(password)) => Ok(Self { url, user, password }),
            (url, user, password) => {
                let missing: Vec<&str> = [
                    ("CLINT_URL", url.is_none()),
                    ("CLINT_USER", user.is_none()),
                    ("CLINT_PASSWORD", password.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect();
                anyhow::bail!("Missing Clint credentials: {}", missing.join(", "))
            }
        }
    }
}

/// Waits used during login.
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// How long to wait for each primary selector.
    pub element_timeout: Duration,
    /// How long to wait for each fallback selector.
    pub fallback_timeout: Duration,
    pub page_load_secs: u64,
    pub step_pause_secs: u64,
    /// Countdown after submitting, while Clint sends the verification code.
    pub settle_secs: u64,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(10),
            page_load_secs: 3,
            step_pause_secs: 1,
            settle_secs: 60,
        }
    }
}

/// Open the Clint login page, submit the credentials and wait for the
/// verification step.
pub async fn login(driver: &WebDriver, creds: &ClintCredentials, opts: &LoginOptions) -> Result<()> {
    tracing::info!(url = %creds.url, "Opening Clint");
    driver.goto(&creds.url).await.context("Failed to open the Clint login page")?;
    pacing::pause(opts.page_load_secs).await;

    if let Ok(title) = driver.title().await {
        tracing::info!(%title, "Clint page loaded");
    }

    let email = find_field(driver, Locator::Css(EMAIL_FIELD), Locator::Css(EMAIL_FIELD_FALLBACK), opts)
        .await
        .context("Email field not found")?;
    fill(&email, &creds.user).await?;
    tracing::info!(user = %creds.user, "Filled email");
    pacing::pause(opts.step_pause_secs).await;

    let password = find_field(driver, Locator::Css(PASSWORD_FIELD), Locator::Css(PASSWORD_FIELD_FALLBACK), opts)
        .await
        .context("Password field not found")?;
    fill(&password, &creds.password).await?;
    tracing::info!("Filled password");
    pacing::pause(opts.step_pause_secs).await;

    let button = match driver
        .wait_clickable(Locator::XPath(CONTINUE_BUTTON), opts.element_timeout)
        .await
    {
        Ok(button) => button,
        Err(e) => {
            tracing::warn!("Continue button not found ({e}), trying submit button");
            driver
                .wait_clickable(Locator::XPath(SUBMIT_BUTTON_FALLBACK), opts.fallback_timeout)
                .await
                .context("No login button found")?
        }
    };
    button.click().await.context("Failed to click the login button")?;
    tracing::info!("Submitted login form");

    pacing::countdown(opts.settle_secs, "Login settle").await;
    Ok(())
}

async fn find_field(
    driver: &WebDriver,
    primary: Locator<'_>,
    fallback: Locator<'_>,
    opts: &LoginOptions,
) -> Result<Element> {
    match driver.wait_for(primary, opts.element_timeout).await {
        Ok(element) => Ok(element),
        Err(e) => {
            tracing::warn!("{primary:?} not found ({e}), trying {fallback:?}");
            Ok(driver.wait_for(fallback, opts.fallback_timeout).await?)
        }
    }
}

async fn fill(element: &Element, value: &str) -> Result<()> {
    element.clear().await?;
    element.send_keys(value).await?;
    Ok(())
}
