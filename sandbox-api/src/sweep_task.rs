use sandbox_lifecycle::IdleSweeper;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodic idle-server reclamation loop.
pub async fn start_sweep_task(sweeper: Arc<IdleSweeper>, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(
        "Sweep task running (passes every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        match sweeper.run().await {
            Ok(outcome) => {
                if outcome.notified > 0 || outcome.deleted > 0 || outcome.failed > 0 {
                    info!(
                        notified = outcome.notified,
                        deleted = outcome.deleted,
                        failed = outcome.failed,
                        "sweep pass completed"
                    );
                }
            }
            Err(e) => error!("Sweep pass failed: {}", e),
        }
    }
}
