use crate::types::CollectionReport;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Write the collection report to the given directory.
///
/// Creates the directory if it doesn't exist, then writes:
/// - `collection.json`: one entry per origin URL
/// - `collection.md`: short human summary
pub fn write_report(report: &CollectionReport, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let json_path = output_dir.join("collection.json");
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&json_path, &json).with_context(|| format!("Failed to write {}", json_path.display()))?;
    tracing::info!(path = %json_path.display(), urls = report.urls.len(), "Wrote collection report");

    let md_path = output_dir.join("collection.md");
    fs::write(&md_path, report.summary_md()).with_context(|| format!("Failed to write {}", md_path.display()))?;

    Ok(json_path)
}

/// Write CSV text to its bronze path, creating parent directories.
pub fn write_csv_text(path: &Path, csv: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, csv).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), lines = csv.lines().count(), "Wrote CSV");
    Ok(())
}

/// Cache a page source for debugging a failed collection.
pub fn cache_page_source(output_dir: &Path, stem: &str, html: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let path = output_dir.join(format!("{stem}.html"));
    fs::write(&path, html).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = html.len(), "Cached page source");
    Ok(path)
}

/// Number of data rows in a CSV file (header excluded).
pub fn count_csv_rows(path: &Path) -> Result<usize> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = 0;
    for record in rdr.records() {
        record.with_context(|| format!("Malformed CSV in {}", path.display()))?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectMethod, UrlOutcome};

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = CollectionReport {
            started_at: "a".into(),
            finished_at: "b".into(),
            urls: vec![UrlOutcome {
                url: "https://app.clint.digital/o".into(),
                stem: "leads-forms-accelera".into(),
                method: Some(CollectMethod::Export),
                path: None,
                rows: 3,
                filters_applied: true,
                uploaded: true,
                error: None,
            }],
        };
        let path = write_report(&report, &dir.path().join("reports")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["urls"][0]["rows"], 3);
        assert!(dir.path().join("reports").join("collection.md").exists());
    }

    #[test]
    fn test_csv_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bronze").join("x").join("x.csv");
        write_csv_text(&path, "id,name\n1,\"A, B\"\n2,C\n").unwrap();
        assert_eq!(count_csv_rows(&path).unwrap(), 2);

        let cached = cache_page_source(dir.path(), "x", "<html></html>").unwrap();
        assert_eq!(cached.file_name().unwrap(), "x.html");
    }
}
