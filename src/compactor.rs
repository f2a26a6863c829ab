use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{BookingStore, Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the WAL once `threshold` appends have piled up since the last
/// compaction. Returns whether a compaction ran.
pub async fn compact_if_needed<S: BookingStore>(
    engine: &Engine<S>,
    threshold: u64,
) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor<S: BookingStore + 'static>(engine: Arc<Engine<S>>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}
