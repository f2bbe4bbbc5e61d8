use std::path::PathBuf;

use serde::Serialize;

/// How a bronze CSV was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectMethod {
    /// Clint's own "export deals" CSV.
    Export,
    /// Rows scraped from the page after the export failed.
    Fallback,
}

/// Result of collecting one origin URL.
#[derive(Debug, Clone, Serialize)]
pub struct UrlOutcome {
    pub url: String,
    pub stem: String,
    /// `None` when nothing was written.
    pub method: Option<CollectMethod>,
    pub path: Option<PathBuf>,
    pub rows: usize,
    pub filters_applied: bool,
    pub uploaded: bool,
    pub error: Option<String>,
}

impl UrlOutcome {
    pub fn failed(url: &str, stem: &str, error: &anyhow::Error) -> Self {
        Self {
            url: url.to_string(),
            stem: stem.to_string(),
            method: None,
            path: None,
            rows: 0,
            filters_applied: false,
            uploaded: false,
            error: Some(format!("{error:#}")),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.method.is_some()
    }
}

/// Everything one collection run did, in URL order.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub started_at: String,
    pub finished_at: String,
    pub urls: Vec<UrlOutcome>,
}

impl CollectionReport {
    pub fn succeeded(&self) -> usize {
        self.urls.iter().filter(|u| u.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.urls.len() - self.succeeded()
    }

    /// Human-readable summary, written next to the JSON report.
    pub fn summary_md(&self) -> String {
        let mut md = format!(
            "# Collection\n\n\
             - **Started:** {}\n\
             - **Finished:** {}\n\
             - **Origins:** {} ok, {} failed\n\n",
            self.started_at,
            self.finished_at,
            self.succeeded(),
            self.failed(),
        );
        for u in &self.urls {
            let how = match (u.method, &u.error) {
                (Some(CollectMethod::Export), _) => format!("export, {} rows", u.rows),
                (Some(CollectMethod::Fallback), _) => format!("page scrape, {} rows", u.rows),
                (None, Some(e)) => format!("failed: {e}"),
                (None, None) => "skipped".to_string(),
            };
            md.push_str(&format!("- `{}` ({}): {how}\n", u.stem, u.url));
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(stem: &str, method: CollectMethod) -> UrlOutcome {
        UrlOutcome {
            url: format!("https://app.clint.digital/{stem}"),
            stem: stem.into(),
            method: Some(method),
            path: Some(PathBuf::from(format!("data/bronze/{stem}/{stem}.csv"))),
            rows: 12,
            filters_applied: true,
            uploaded: false,
            error: None,
        }
    }

    #[test]
    fn test_report_counts_and_summary() {
        let report = CollectionReport {
            started_at: "2026-10-18T08:00:00Z".into(),
            finished_at: "2026-10-18T08:05:00Z".into(),
            urls: vec![
                ok("leads-forms-accelera", CollectMethod::Export),
                ok("closer", CollectMethod::Fallback),
                UrlOutcome::failed("https://x", "other", &anyhow::anyhow!("boom")),
            ],
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);

        let md = report.summary_md();
        assert!(md.contains("2 ok, 1 failed"));
        assert!(md.contains("`leads-forms-accelera` (https://app.clint.digital/leads-forms-accelera): export, 12 rows"));
        assert!(md.contains("page scrape, 12 rows"));
        assert!(md.contains("failed: boom"));
    }

    #[test]
    fn test_outcome_serializes_method_in_snake_case() {
        let json = serde_json::to_value(ok("closer", CollectMethod::Fallback)).unwrap();
        assert_eq!(json["method"], "fallback");
        assert_eq!(json["error"], serde_json::Value::Null);
    }
}
