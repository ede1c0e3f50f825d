use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites a fleet's WAL once enough appends have
/// accumulated since the last compaction. The log only ever collapses
/// bus churn; reservation history is carried over in full.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let pending = engine.wal_appends_since_compact().await;
        if pending < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {pending} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
