//! Second login step: fetch the six-digit code Clint sends after the
//! password step and type it into the code inputs.

use std::sync::LazyLock;
use std::time::Duration;

use accelera_cloud::BigQuery;
use anyhow::{Context, Result};
use regex::Regex;

use crate::pacing;
use crate::webdriver::{Element, Locator, WebDriver};

const CODE_INPUTS: &str = "input[type='tel']";
const CODE_LENGTH: usize = 6;
const CONFIRM_BUTTON: &str = "button.btn.btn-success.btn-block";

const WEBMAIL_USER: &str = "#rcmloginuser";
const WEBMAIL_PASSWORD: &str = "#rcmloginpwd";
const WEBMAIL_SUBMIT: &str = "#rcmloginsubmit";
const WEBMAIL_SENDER: &str = ".fromto .rcmContactAddress";
const WEBMAIL_CODE: &str = ".v1fa-email-content p b";

/// Roundcube account that receives Clint's verification e-mails.
#[derive(Clone)]
pub struct WebmailAccount {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Sender address of the verification e-mail.
    pub sender: String,
}

impl std::fmt::Debug for WebmailAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebmailAccount")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Where the verification code comes from.
#[derive(Debug, Clone)]
pub enum CodeSource {
    /// Latest row of a BigQuery table fed by a mail-forwarding job.
    BigQuery {
        client: BigQuery,
        project: String,
        table: String,
    },
    /// Read straight from the webmail inbox in a second tab.
    Webmail(WebmailAccount),
}

/// Waits used during verification.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// How long to wait for the six code inputs.
    pub inputs_timeout: Duration,
    pub confirm_timeout: Duration,
    /// Wait after the first confirm click before checking the URL.
    pub redirect_secs: u64,
    /// Wait after the retry click.
    pub retry_secs: u64,
    pub webmail_pause_secs: u64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            inputs_timeout: Duration::from_secs(90),
            confirm_timeout: Duration::from_secs(10),
            redirect_secs: 10,
            retry_secs: 15,
            webmail_pause_secs: 2,
        }
    }
}

/// Result of clicking the confirm button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Clint left the login page.
    Verified,
    /// Still on the login page after the retry.
    StillOnLogin,
    /// The confirm button never became clickable.
    ButtonMissing,
}

/// The first six digits of a token, ignoring separators such as `123-456`.
pub fn code_digits(token: &str) -> Option<[char; CODE_LENGTH]> {
    let digits: Vec<char> = token.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < CODE_LENGTH {
        return None;
    }
    let mut code = ['0'; CODE_LENGTH];
    code.copy_from_slice(&digits[..CODE_LENGTH]);
    Some(code)
}

/// Find a `123-456` style code in free text.
pub fn extract_code(text: &str) -> Option<String> {
    static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{3}\b").expect("valid regex"));
    CODE.find(text).map(|m| m.as_str().to_string())
}

/// Fetch the current verification code from `source`.
pub async fn fetch_code(driver: &WebDriver, source: &CodeSource, opts: &VerifyOptions) -> Result<String> {
    match source {
        CodeSource::BigQuery { client, project, table } => client
            .latest_token(project, table)
            .await
            .context("Token query failed")?
            .context("Token table is empty"),
        CodeSource::Webmail(account) => read_webmail_code(driver, account, opts).await,
    }
}

/// Log into Roundcube in a new tab, open the newest e-mail from the sender
/// and read the code. The tab is closed and focus returns to Clint on every
/// path.
pub async fn read_webmail_code(driver: &WebDriver, account: &WebmailAccount, opts: &VerifyOptions) -> Result<String> {
    let clint_tab = driver.window().await.context("No browser window open")?;

    let webmail_tab = driver.new_window(true).await.context("Failed to open webmail tab")?;
    driver.switch_to_window(webmail_tab.handle).await?;

    let code = webmail_code_in_current_tab(driver, account, opts).await;

    if let Err(e) = driver.close_window().await {
        tracing::warn!("Failed to close webmail tab: {e}");
    }
    driver
        .switch_to_window(clint_tab)
        .await
        .context("Failed to return to the Clint tab")?;
    tracing::info!("Returned to the Clint tab");
    code
}

async fn webmail_code_in_current_tab(
    driver: &WebDriver,
    account: &WebmailAccount,
    opts: &VerifyOptions,
) -> Result<String> {
    driver.goto(&account.url).await.context("Failed to open webmail")?;
    pacing::pause(opts.webmail_pause_secs).await;

    let user = driver.wait_for(Locator::Css(WEBMAIL_USER), opts.confirm_timeout).await?;
    user.send_keys(&account.user).await?;
    driver.find(Locator::Css(WEBMAIL_PASSWORD)).await?.send_keys(&account.password).await?;
    driver.find(Locator::Css(WEBMAIL_SUBMIT)).await?.click().await?;
    tracing::info!(url = %account.url, "Logged into webmail");
    pacing::pause(opts.webmail_pause_secs).await;

    let rows = driver.find_all(Locator::Css("tr")).await?;
    for row in &rows {
        let Ok(sender) = row.find(Locator::Css(WEBMAIL_SENDER)).await else {
            continue;
        };
        let title = sender.attr("title").await?.unwrap_or_default();
        let text = sender.text().await.unwrap_or_default();
        if !title.contains(&account.sender) && !text.contains(&account.sender) {
            continue;
        }

        row.click().await?;
        pacing::pause(opts.webmail_pause_secs).await;
        return read_open_message(driver).await;
    }

    anyhow::bail!("No e-mail from {} in the inbox", account.sender)
}

/// Read the code from the opened message, inside its iframe when present.
/// Focus is back on the top-level document afterwards, whatever the outcome.
async fn read_open_message(driver: &WebDriver) -> Result<String> {
    let frames = driver.find_all(Locator::Css("iframe")).await?;
    let Some(frame) = frames.first() else {
        return read_message_code(driver).await;
    };

    frame.enter_frame().await?;
    let code = read_message_code(driver).await;
    driver
        .enter_frame(None)
        .await
        .context("Failed to leave the message frame")?;
    code
}

/// The highlighted code element, or a `123-456` match in the body text when
/// that element is missing or empty.
async fn read_message_code(driver: &WebDriver) -> Result<String> {
    if let Ok(element) = driver.find(Locator::Css(WEBMAIL_CODE)).await {
        let code = element.text().await?.trim().to_string();
        if !code.is_empty() {
            return Ok(code);
        }
        tracing::debug!("Code element is empty, searching the message body");
    }

    let body = driver.find(Locator::Css("body")).await?;
    extract_code(&body.text().await?).context("Verification e-mail has no code")
}

/// Poll once per second until exactly six code inputs are on the page.
pub async fn wait_code_inputs(driver: &WebDriver, timeout: Duration) -> Result<Vec<Element>> {
    let attempts = timeout.as_secs().max(1);
    for attempt in 1..=attempts {
        let inputs = driver.find_all(Locator::Css(CODE_INPUTS)).await?;
        if inputs.len() == CODE_LENGTH {
            tracing::info!("Verification code inputs found");
            return Ok(inputs);
        }
        if attempt < attempts {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    anyhow::bail!("Verification code inputs did not appear within {}s", timeout.as_secs())
}

/// Type one digit into each input.
pub async fn fill_code(inputs: &[Element], digits: &[char; CODE_LENGTH]) -> Result<()> {
    for (input, digit) in inputs.iter().zip(digits) {
        input.clear().await?;
        input.send_keys(&digit.to_string()).await?;
    }
    tracing::info!("Filled verification code");
    Ok(())
}

/// Click the confirm button, retrying once if Clint stays on the login page.
pub async fn submit_code(driver: &WebDriver, opts: &VerifyOptions) -> Result<SubmitOutcome> {
    let confirm = Locator::Css(CONFIRM_BUTTON);

    let Ok(button) = driver.wait_clickable(confirm, opts.confirm_timeout).await else {
        return Ok(SubmitOutcome::ButtonMissing);
    };
    button.click().await?;
    pacing::pause(opts.redirect_secs).await;

    let url = driver.current_url().await?;
    tracing::info!(%url, "After verification");
    if !url.as_str().contains("login") {
        return Ok(SubmitOutcome::Verified);
    }

    tracing::warn!("Still on the login page, clicking confirm again");
    let Ok(button) = driver.wait_clickable(confirm, opts.confirm_timeout).await else {
        return Ok(SubmitOutcome::StillOnLogin);
    };
    button.click().await?;
    pacing::pause(opts.retry_secs).await;

    let url = driver.current_url().await?;
    if url.as_str().contains("login") {
        Ok(SubmitOutcome::StillOnLogin)
    } else {
        Ok(SubmitOutcome::Verified)
    }
}

/// Full verification step: fetch the code, fill it and confirm.
pub async fn verify(driver: &WebDriver, source: &CodeSource, opts: &VerifyOptions) -> Result<()> {
    let token = fetch_code(driver, source, opts).await?;
    let digits = code_digits(&token)
        .with_context(|| format!("Verification code has fewer than {CODE_LENGTH} digits"))?;

    let inputs = wait_code_inputs(driver, opts.inputs_timeout).await?;
    fill_code(&inputs, &digits).await?;

    match submit_code(driver, opts).await? {
        SubmitOutcome::Verified => tracing::info!("Verification complete"),
        SubmitOutcome::ButtonMissing => {
            tracing::warn!("Confirm button not found; the code may have been accepted on input")
        }
        SubmitOutcome::StillOnLogin => anyhow::bail!("Clint rejected the verification code"),
    }
    Ok(())
}
