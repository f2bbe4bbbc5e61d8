use std::time::Duration;

/// Sleep for `secs` seconds, logging the remaining time every ten seconds
/// and each of the last five.
pub async fn countdown(secs: u64, label: &str) {
    if secs == 0 {
        return;
    }
    tracing::info!(secs, "{label}: waiting");
    for remaining in (1..=secs).rev() {
        if remaining != secs && (remaining % 10 == 0 || remaining <= 5) {
            tracing::info!(remaining, "{label}: {}", format_remaining(remaining));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    tracing::info!("{label}: done waiting");
}

/// `m:ss` above one minute, plain seconds below.
pub fn format_remaining(secs: u64) -> String {
    if secs > 60 {
        format!("{}:{:02} min left", secs / 60, secs % 60)
    } else {
        format!("{secs}s left")
    }
}

/// Fixed pause between browser steps.
pub async fn pause(secs: u64) {
    if secs > 0 {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
