use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use pawsquare_db::Database;

/// Background task that prunes old AI usage rows.
///
/// The rate limiter only ever looks one hour back, so rows beyond the
/// retention horizon are dead weight. Runs on an interval, drops everything
/// older than `retention_hours`.
pub async fn run_usage_retention_loop(db: Arc<Database>, retention_hours: u64, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let cutoff = (Utc::now() - chrono::Duration::hours(retention_hours as i64))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.prune_ai_usage(&cutoff)).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Usage retention: pruned {} rows", count);
                }
            }
            Ok(Err(e)) => warn!("Usage retention error: {}", e),
            Err(e) => warn!("Usage retention join error: {}", e),
        }
    }
}
