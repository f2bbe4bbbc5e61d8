//! One function per pipeline stage. `run` chains them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use accelera_acquire::{
    collect_all, login, output, verify, Capabilities, ClintCredentials, CodeSource, CollectPlan,
    CollectionReport, LoginOptions, Upload, VerifyOptions, WebDriver,
};
use accelera_cloud::{BigQuery, Gcs, GoogleAuth, PowerBi};
use accelera_model::{build_star, read_parquet, write_star, StarStats};
use accelera_refine::{refine, Profile, RefineReport};
use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;

use crate::config::{CodeSourceKind, Config, Env};

pub const STATS_FILE: &str = "star_stats.json";

/// How far the browser stage goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CollectStage {
    /// Log in and keep the window open until Enter is pressed.
    Login,
    /// Log in and pass the verification step.
    Token,
    /// Log in, verify and collect every origin.
    All,
}

/// Shared state for the stages.
pub struct App<'a> {
    pub config: Config,
    pub data_dir: PathBuf,
    pub http: reqwest::Client,
    pub env: Env<'a>,
}

impl App<'_> {
    fn gcs(&self) -> Result<Gcs> {
        Ok(Gcs::new(self.http.clone(), self.google_auth()?))
    }

    fn google_auth(&self) -> Result<Arc<GoogleAuth>> {
        let credentials = self.config.google_credentials(self.env)?;
        Ok(Arc::new(GoogleAuth::new(self.http.clone(), credentials)))
    }

    fn code_source(&self, clint: &ClintCredentials) -> Result<CodeSource> {
        match self.config.clint.code_source {
            CodeSourceKind::Webmail => Ok(CodeSource::Webmail(self.config.webmail_account(clint, self.env)?)),
            CodeSourceKind::Bigquery => {
                let auth = self.google_auth()?;
                let project = self
                    .config
                    .gcp
                    .project_id
                    .clone()
                    .or_else(|| auth.project_id().map(str::to_string))
                    .context("BigQuery code source needs gcp.project_id")?;
                Ok(CodeSource::BigQuery {
                    client: BigQuery::new(self.http.clone(), auth),
                    project,
                    table: self.config.gcp.token_table.clone(),
                })
            }
        }
    }

    fn bronze_dir(&self) -> PathBuf {
        self.data_dir.join("bronze")
    }

    fn gold_dir(&self) -> PathBuf {
        self.data_dir.join("gold")
    }
}

/// Browser stages. The session is always closed at the end.
pub async fn collect(app: &App<'_>, stage: CollectStage, upload: bool) -> Result<Option<CollectionReport>> {
    let creds = app.config.clint_credentials(app.env)?;
    let clint = &app.config.clint;

    let mut plan = CollectPlan::new(app.config.origin_targets(), &app.data_dir);
    fs::create_dir_all(&plan.download_dir)
        .with_context(|| format!("Failed to create {}", plan.download_dir.display()))?;
    // Chrome ignores relative download folders.
    plan.download_dir = fs::canonicalize(&plan.download_dir)
        .with_context(|| format!("Failed to resolve {}", plan.download_dir.display()))?;
    plan.page_settle_secs = clint.page_settle_secs;
    plan.between_urls_secs = clint.between_urls_secs;
    plan.download_timeout = Duration::from_secs(clint.download_timeout_secs);
    if upload {
        plan.upload = Some(Upload {
            gcs: app.gcs()?,
            bucket: app.config.gcp.bucket.clone(),
        });
    }
    let source = match stage {
        CollectStage::Login => None,
        CollectStage::Token | CollectStage::All => Some(app.code_source(&creds)?),
    };

    let caps = Capabilities::chrome().headless(clint.headless).download_dir(&plan.download_dir);
    let driver = WebDriver::connect(&clint.webdriver_url, &caps)
        .await
        .with_context(|| format!("Failed to start a browser session at {}", clint.webdriver_url))?;

    let login_opts = LoginOptions {
        settle_secs: clint.login_settle_secs,
        ..LoginOptions::default()
    };
    let result = drive(&driver, stage, &creds, &login_opts, source.as_ref(), &plan).await;

    if let Err(e) = driver.quit().await {
        tracing::warn!("Failed to close the browser: {e}");
    }

    let report = result?;
    if let Some(report) = &report {
        output::write_report(report, &app.bronze_dir())?;
    }
    Ok(report)
}

async fn drive(
    driver: &WebDriver,
    stage: CollectStage,
    creds: &ClintCredentials,
    login_opts: &LoginOptions,
    source: Option<&CodeSource>,
    plan: &CollectPlan,
) -> Result<Option<CollectionReport>> {
    login(driver, creds, login_opts).await?;

    let Some(source) = source else {
        tracing::info!("Logged in. Press Enter to close the browser");
        let mut line = String::new();
        tokio::io::BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        return Ok(None);
    };

    verify(driver, source, &VerifyOptions::default()).await?;
    if stage == CollectStage::Token {
        return Ok(None);
    }

    Ok(Some(collect_all(driver, plan).await))
}

/// Bronze CSV → silver Parquet, optionally uploaded as `silver/<file>`.
pub async fn silver(
    app: &App<'_>,
    profile: Profile,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    upload: bool,
) -> Result<RefineReport> {
    let input = input.unwrap_or_else(|| profile.bronze_path(&app.data_dir));
    let output = output.unwrap_or_else(|| profile.silver_path(&app.data_dir));

    let report = refine(&input, &output, profile)?;
    if upload {
        let object = format!("silver/{}", file_name(&output)?);
        app.gcs()?
            .upload_file(&app.config.gcp.bucket, &object, &output)
            .await
            .with_context(|| format!("Failed to upload {}", output.display()))?;
    }
    Ok(report)
}

/// Silver Parquet → gold star schema, optionally uploaded as `gold/<file>`.
pub async fn gold(
    app: &App<'_>,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    upload: bool,
) -> Result<StarStats> {
    let started = Instant::now();
    let input = input.unwrap_or_else(|| Profile::Leads.silver_path(&app.data_dir));
    let gold_dir = output_dir.unwrap_or_else(|| app.gold_dir());

    let silver = read_parquet(&input).with_context(|| format!("Failed to read silver file {}", input.display()))?;
    tracing::info!(path = %input.display(), rows = silver.height(), columns = silver.width(), "Read silver");

    let star = build_star(&silver).context("Failed to build the star schema")?;
    for w in &star.warnings {
        tracing::warn!("{w}");
    }
    for (name, n) in &star.stats.unmatched {
        if *n > 0 {
            tracing::warn!(dimension = *name, rows = *n, "Fact rows without a key");
        }
    }

    let written = write_star(&star, &gold_dir)
        .with_context(|| format!("Failed to write gold files to {}", gold_dir.display()))?;

    let stats_path = gold_dir.join(STATS_FILE);
    fs::write(&stats_path, serde_json::to_string_pretty(&star.stats)?)
        .with_context(|| format!("Failed to write {}", stats_path.display()))?;
    tracing::info!(
        path = %stats_path.display(),
        fact_rows = star.stats.fact_rows,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Wrote star schema"
    );

    if upload {
        let gcs = app.gcs()?;
        for path in &written {
            let object = format!("gold/{}", file_name(path)?);
            gcs.upload_file(&app.config.gcp.bucket, &object, path)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
        }
    }
    Ok(star.stats)
}

/// Local checks. Returns the number of findings that are errors.
pub fn validate(app: &App<'_>, gold_dir: Option<PathBuf>, silver: Option<PathBuf>, profile: Profile) -> Result<usize> {
    let gold_dir = gold_dir.unwrap_or_else(|| app.gold_dir());
    let mut findings = accelera_validate::validate_gold(&gold_dir)?;
    if let Some(silver) = silver {
        findings.extend(accelera_validate::validate_silver(&silver, profile)?);
    }

    let errors = findings.iter().filter(|f| !f.is_warning()).count();
    tracing::info!(
        errors,
        warnings = findings.len() - errors,
        "Validation finished"
    );
    Ok(errors)
}

/// Remote outputs. Returns the missing object names.
pub async fn verify_remote(app: &App<'_>) -> Result<Vec<String>> {
    let results = accelera_validate::verify_remote(&app.gcs()?, &app.config.gcp.bucket).await?;
    Ok(results
        .into_iter()
        .filter(|(_, found)| !found)
        .map(|(object, _)| object)
        .collect())
}

/// Queue a Power BI dataset refresh.
pub async fn refresh(app: &App<'_>) -> Result<()> {
    let started = Instant::now();
    let config = app.config.powerbi_config(app.env)?;
    tracing::info!(group = %config.group_id, dataset = %config.dataset_id, "Requesting dataset refresh");

    let result = PowerBi::new(app.http.clone()).refresh(&config).await;
    tracing::info!(elapsed = %format_elapsed(started.elapsed()), "Refresh request finished");
    result.context("Power BI refresh failed")
}

/// collect → silver → gold → (upload) → (refresh), stopping at the first
/// fatal stage.
pub async fn run(app: &App<'_>, skip_collect: bool, upload: bool, refresh_model: bool) -> Result<()> {
    let started = Instant::now();

    if skip_collect {
        tracing::info!("Skipping browser collection");
    } else if let Some(report) = collect(app, CollectStage::All, upload).await? {
        if report.succeeded() == 0 {
            anyhow::bail!("No origin was collected");
        }
        if report.failed() > 0 {
            tracing::warn!(failed = report.failed(), "Some origins were not collected");
        }
    }

    silver(app, Profile::Leads, None, None, upload).await?;
    gold(app, None, None, upload).await?;
    if refresh_model {
        refresh(app).await?;
    }

    tracing::info!(elapsed = %format_elapsed(started.elapsed()), "Pipeline finished");
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

/// `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelera_model::Table;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn app(data_dir: &Path) -> App<'static> {
        App {
            config: Config::default(),
            data_dir: data_dir.to_path_buf(),
            http: reqwest::Client::new(),
            env: &no_env,
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(5)), "00:00:05");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 61)), "03:01:01");
    }

    #[tokio::test]
    async fn test_silver_gold_validate_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let bronze = Profile::Leads.bronze_path(dir.path());
        fs::create_dir_all(bronze.parent().unwrap()).unwrap();
        let mut t = Table::new(["name", "email", "stage", "value", "created_at"]);
        t.push_row(vec![
            Some("Ana".into()),
            Some("ana@x.com".into()),
            Some("Novo".into()),
            Some("10".into()),
            Some("02/01/2024".into()),
        ])
        .unwrap();
        t.write_csv(&bronze).unwrap();

        let report = silver(&app, Profile::Leads, None, None, false).await.unwrap();
        assert_eq!(report.rows, 1);

        let stats = gold(&app, None, None, false).await.unwrap();
        assert_eq!(stats.fact_rows, 1);
        assert!(dir.path().join("gold").join(STATS_FILE).exists());

        assert_eq!(validate(&app, None, Some(Profile::Leads.silver_path(dir.path())), Profile::Leads).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_bronze_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = silver(&app(dir.path()), Profile::Closer, None, None, false).await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read bronze file"));
    }

    #[tokio::test]
    async fn test_refresh_needs_settings() {
        let dir = tempfile::tempdir().unwrap();
        let err = refresh(&app(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("Missing Power BI settings"));
    }
}
