//! Per-origin collection: filter the deal table, export it as CSV and land
//! the file in bronze.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use accelera_cloud::Gcs;
use anyhow::{Context, Result};

use crate::types::{CollectMethod, CollectionReport, UrlOutcome};
use crate::webdriver::{Locator, WebDriver, WebDriverError};
use crate::{downloads, fallback, output, pacing};

pub const DEFAULT_STEM: &str = "leads-forms-accelera";

const STATUS_FILTER: &str = "[data-cy=\"tbl-status-deal-filter\"]";
const STATUSES: [&str; 2] = ["Ganho", "Perdido"];
const EXPORT_BUTTON: &str = "[data-cy=\"bt-export-deals-via-pipe\"]";
const CONFIRM_EXPORT: &str = "//button[normalize-space(text())='Sim']";

/// One Clint origin page and the bronze file stem its deals land under.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginTarget {
    pub url: String,
    pub stem: String,
}

impl OriginTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stem: DEFAULT_STEM.to_string(),
        }
    }

    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = stem.into();
        self
    }

    /// `<bronze>/<stem>/<stem>.csv`
    pub fn bronze_path(&self, bronze_dir: &Path) -> PathBuf {
        bronze_dir.join(&self.stem).join(format!("{}.csv", self.stem))
    }

    /// Object name of the bronze upload.
    pub fn object_name(&self) -> String {
        format!("bronze/{0}/{0}.csv", self.stem)
    }
}

/// Destination bucket for bronze uploads.
#[derive(Debug, Clone)]
pub struct Upload {
    pub gcs: Gcs,
    pub bucket: String,
}

/// What to collect and how long to wait for Clint at each step.
#[derive(Debug, Clone)]
pub struct CollectPlan {
    pub targets: Vec<OriginTarget>,
    pub bronze_dir: PathBuf,
    /// Chrome's download folder. Must be absolute.
    pub download_dir: PathBuf,
    pub page_settle_secs: u64,
    pub between_urls_secs: u64,
    pub step_pause_secs: u64,
    pub element_timeout: Duration,
    pub download_timeout: Duration,
    pub upload: Option<Upload>,
}

impl CollectPlan {
    pub fn new(targets: Vec<OriginTarget>, data_dir: &Path) -> Self {
        let bronze_dir = data_dir.join("bronze");
        Self {
            targets,
            download_dir: bronze_dir.join("downloads"),
            bronze_dir,
            page_settle_secs: 90,
            between_urls_secs: 20,
            step_pause_secs: 2,
            element_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            upload: None,
        }
    }
}

/// Tick the "Ganho" and "Perdido" boxes of the status filter.
///
/// Returns false (after closing the menu) when any status could not be
/// selected; collection continues with whatever the table shows.
pub async fn apply_status_filters(driver: &WebDriver, plan: &CollectPlan) -> bool {
    let filter = match driver.wait_clickable(Locator::Css(STATUS_FILTER), plan.element_timeout).await {
        Ok(filter) => filter,
        Err(e) => {
            tracing::warn!("Status filter not found: {e}");
            return false;
        }
    };
    if let Err(e) = filter.click().await {
        tracing::warn!("Failed to open the status filter: {e}");
        return false;
    }
    pacing::pause(plan.step_pause_secs).await;

    let mut all_selected = true;
    for status in STATUSES {
        match select_status(driver, status).await {
            Ok(()) => tracing::info!(status, "Status selected"),
            Err(e) => {
                tracing::warn!(status, "Failed to select status: {e}");
                all_selected = false;
            }
        }
    }

    if !all_selected {
        if let Err(e) = filter.click().await {
            tracing::warn!("Failed to close the status filter: {e}");
        }
    }
    all_selected
}

async fn select_status(driver: &WebDriver, status: &str) -> Result<(), WebDriverError> {
    let checkbox = format!("//input[@type='checkbox' and following-sibling::*[contains(text(), '{status}')]]");
    match driver.find(Locator::XPath(&checkbox)).await {
        Ok(checkbox) => {
            if !checkbox.is_selected().await? {
                driver.js_click(&checkbox).await?;
            }
        }
        Err(e) if e.is_no_such_element() => {
            let label = format!("//*[contains(text(), '{status}')]");
            let label = driver.find(Locator::XPath(&label)).await?;
            driver.js_click(&label).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Run Clint's native export and return the finished download.
pub async fn export_csv(driver: &WebDriver, plan: &CollectPlan) -> Result<PathBuf> {
    downloads::clear_csvs(&plan.download_dir)?;
    pacing::countdown(plan.page_settle_secs, "Export page settle").await;

    let since = SystemTime::now()
        .checked_sub(Duration::from_secs(1))
        .unwrap_or_else(SystemTime::now);
    let button = driver
        .wait_clickable(Locator::Css(EXPORT_BUTTON), plan.element_timeout)
        .await
        .context("Export button not found")?;
    button.click().await.context("Failed to click the export button")?;
    tracing::info!("Requested CSV export");
    pacing::pause(plan.step_pause_secs).await;

    match driver
        .wait_clickable(Locator::XPath(CONFIRM_EXPORT), plan.element_timeout)
        .await
    {
        Ok(confirm) => match confirm.click().await {
            Ok(()) => tracing::info!("Confirmed export"),
            Err(e) => tracing::warn!("Failed to confirm the export: {e}"),
        },
        Err(e) => tracing::warn!("Export confirmation not found: {e}"),
    }

    downloads::wait_for_download(&plan.download_dir, since, plan.download_timeout).await
}

/// Collect one origin into `bronze/<stem>/<stem>.csv`.
pub async fn collect_url(driver: &WebDriver, target: &OriginTarget, plan: &CollectPlan) -> Result<UrlOutcome> {
    tracing::info!(url = %target.url, stem = %target.stem, "Collecting origin");
    driver
        .goto(&target.url)
        .await
        .with_context(|| format!("Failed to open {}", target.url))?;
    driver
        .wait_for(Locator::Css("body"), plan.element_timeout)
        .await
        .context("Page body did not load")?;

    match driver.current_url().await {
        Ok(current) if current.as_str() != target.url => {
            tracing::warn!(expected = %target.url, %current, "Browser is on a different page")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not read the current URL: {e}"),
    }

    let filters_applied = apply_status_filters(driver, plan).await;
    let dest = target.bronze_path(&plan.bronze_dir);

    let method = match export_csv(driver, plan).await {
        Ok(download) => {
            downloads::promote(&download, &dest)?;
            CollectMethod::Export
        }
        Err(e) => {
            tracing::warn!(url = %target.url, "Export failed ({e:#}), scraping the page instead");
            let html = driver.source().await.context("Failed to read the page source")?;
            match fallback::scrape_leads(&html, &target.url) {
                Some(csv) => {
                    output::write_csv_text(&dest, &csv)?;
                    CollectMethod::Fallback
                }
                None => {
                    let cached = output::cache_page_source(&plan.bronze_dir.join(&target.stem), &target.stem, &html)?;
                    anyhow::bail!(
                        "Export failed and the page has no deal cards (page cached at {})",
                        cached.display()
                    );
                }
            }
        }
    };

    let rows = output::count_csv_rows(&dest)?;
    let uploaded = match &plan.upload {
        Some(upload) => upload_bronze(upload, target, &dest).await,
        None => false,
    };

    Ok(UrlOutcome {
        url: target.url.clone(),
        stem: target.stem.clone(),
        method: Some(method),
        path: Some(dest),
        rows,
        filters_applied,
        uploaded,
        error: None,
    })
}

async fn upload_bronze(upload: &Upload, target: &OriginTarget, path: &Path) -> bool {
    let object = target.object_name();
    match upload.gcs.upload_file(&upload.bucket, &object, path).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(bucket = %upload.bucket, %object, "Bronze upload failed: {e}");
            false
        }
    }
}

/// Collect every origin in order. A failed origin is logged and skipped.
pub async fn collect_all(driver: &WebDriver, plan: &CollectPlan) -> CollectionReport {
    let started_at = chrono::Utc::now().to_rfc3339();
    let mut urls = Vec::with_capacity(plan.targets.len());

    for (i, target) in plan.targets.iter().enumerate() {
        tracing::info!(n = i + 1, of = plan.targets.len(), url = %target.url, "Origin");
        let outcome = match collect_url(driver, target, plan).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(url = %target.url, "Collection failed: {e:#}");
                UrlOutcome::failed(&target.url, &target.stem, &e)
            }
        };
        urls.push(outcome);

        if i + 1 < plan.targets.len() {
            pacing::countdown(plan.between_urls_secs, "Next origin").await;
        }
    }

    let report = CollectionReport {
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
        urls,
    };
    tracing::info!(ok = report.succeeded(), failed = report.failed(), "Collection finished");
    report
}
