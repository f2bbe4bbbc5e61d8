use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};

/// Extension Chrome gives a download that is still in progress.
const PARTIAL_EXTENSION: &str = "crdownload";

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    match fs::read_dir(dir) {
        Ok(read) => Ok(read.filter_map(|e| e.ok().map(|e| e.path())).collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Delete every `*.csv` in `dir`. A missing folder is fine.
pub fn clear_csvs(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in entries(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        if path.is_file() && has_extension(&path, "csv") {
            fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Cleared old CSV downloads");
    }
    Ok(removed)
}

/// The most recently modified `*.csv` in `dir`, with its modification time.
pub fn newest_csv(dir: &Path) -> Result<Option<(PathBuf, SystemTime)>> {
    let mut newest: Option<(PathBuf, SystemTime)> = None;
    for path in entries(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        if !path.is_file() || !has_extension(&path, "csv") {
            continue;
        }
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if newest.as_ref().map_or(true, |(_, t)| modified > *t) {
            newest = Some((path, modified));
        }
    }
    Ok(newest)
}

fn has_partial(dir: &Path) -> Result<bool> {
    Ok(entries(dir)?.iter().any(|p| has_extension(p, PARTIAL_EXTENSION)))
}

/// Poll until a CSV modified at or after `since` is in `dir` and no partial
/// download remains.
pub async fn wait_for_download(dir: &Path, since: SystemTime, timeout: Duration) -> Result<PathBuf> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some((path, modified)) = newest_csv(dir)? {
            if modified >= since && !has_partial(dir)? {
                tracing::info!(path = %path.display(), "Download finished");
                return Ok(path);
            }
        }
        if Instant::now() >= deadline {
            anyhow::bail!(
                "No finished CSV download in {} after {}s",
                dir.display(),
                timeout.as_secs()
            );
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Move a downloaded file to its canonical bronze path, replacing any
/// previous file. Falls back to copy + delete across file systems.
pub fn promote(download: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if dest.exists() {
        fs::remove_file(dest).with_context(|| format!("Failed to replace {}", dest.display()))?;
    }

    if fs::rename(download, dest).is_err() {
        fs::copy(download, dest)
            .with_context(|| format!("Failed to copy {} to {}", download.display(), dest.display()))?;
        fs::remove_file(download).with_context(|| format!("Failed to delete {}", download.display()))?;
    }
    tracing::info!(from = %download.display(), to = %dest.display(), "Moved download into bronze");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_csvs_only_touches_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "x").unwrap();
        fs::write(dir.path().join("B.CSV"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(clear_csvs(dir.path()).unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(clear_csvs(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_newest_csv_ignores_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        assert!(newest_csv(dir.path()).unwrap().is_none());

        let old = dir.path().join("old.csv");
        fs::write(&old, "x").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options().write(true).open(&old).unwrap().set_modified(past).unwrap();
        fs::write(dir.path().join("new.csv"), "y").unwrap();
        fs::write(dir.path().join("newer.csv.crdownload"), "z").unwrap();

        let (path, _) = newest_csv(dir.path()).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "new.csv");
    }

    #[tokio::test]
    async fn test_wait_for_download_blocks_on_partial() {
        let dir = tempfile::tempdir().unwrap();
        let since = SystemTime::now() - Duration::from_secs(5);
        fs::write(dir.path().join("deals.csv"), "id\n1\n").unwrap();
        fs::write(dir.path().join("deals2.csv.crdownload"), "").unwrap();

        let err = wait_for_download(dir.path(), since, Duration::ZERO).await.unwrap_err();
        assert!(err.to_string().contains("No finished CSV download"));

        fs::remove_file(dir.path().join("deals2.csv.crdownload")).unwrap();
        let path = wait_for_download(dir.path(), since, Duration::ZERO).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "deals.csv");
    }

    #[tokio::test]
    async fn test_wait_for_download_rejects_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.csv"), "x").unwrap();
        let since = SystemTime::now() + Duration::from_secs(3600);

        assert!(wait_for_download(dir.path(), since, Duration::ZERO).await.is_err());
    }

    #[test]
    fn test_promote_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let download = dir.path().join("downloads").join("export (1).csv");
        fs::create_dir_all(download.parent().unwrap()).unwrap();
        fs::write(&download, "new").unwrap();
        let dest = dir.path().join("bronze").join("leads-forms-accelera").join("leads-forms-accelera.csv");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, "old").unwrap();

        promote(&download, &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
        assert!(!download.exists());
    }
}
