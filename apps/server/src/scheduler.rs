//! Background refresh loop: a full refresh at startup, then one per interval.

use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use rolesync_core::sync::{next_refresh_delay_ms, ReconcileHandle, REFRESH_INTERVAL_JITTER_SECS};

fn jitter_ms() -> u64 {
    let bound = REFRESH_INTERVAL_JITTER_SECS.saturating_mul(1000);
    if bound == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=bound)
}

/// Runs until the engine stops. Failed refreshes back off but never stop the loop.
pub fn spawn_refresh_loop(engine: ReconcileHandle, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut consecutive_failures: u32 = 0;
        loop {
            match engine.refresh().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    info!(
                        fetched = report.fetched,
                        created = report.created,
                        updated = report.updated,
                        deleted = report.deleted,
                        pruned = report.pruned,
                        failures = report.failures.len(),
                        duration_ms = report.duration_ms,
                        "scheduled refresh complete"
                    );
                }
                Err(rolesync_core::Error::EngineStopped) => {
                    warn!("reconciliation engine stopped; ending refresh loop");
                    break;
                }
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(
                        error = %err,
                        retry_class = ?err.retry_class(),
                        consecutive_failures,
                        "scheduled refresh failed"
                    );
                }
            }

            let delay_ms = next_refresh_delay_ms(interval_secs, consecutive_failures, jitter_ms());
            debug!(delay_ms, "next refresh scheduled");
            sleep(Duration::from_millis(delay_ms)).await;
        }
    })
}
