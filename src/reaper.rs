use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

/// Background task that releases pending locks past their hold window.
/// Only spawned under `LockExpiryPolicy::Enforced`.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_expired_locks(&engine, now_ms()).await;
    }
}

/// One sweep. Returns how many locks were released.
pub async fn reap_expired_locks(engine: &Engine, now: Ms) -> usize {
    let mut reaped = 0;
    for (resource_id, lock_id) in engine.collect_expired_locks(now).await {
        match engine.release_expired_lock(resource_id, lock_id, now).await {
            Ok(change) => {
                info!("reaped expired lock {lock_id} on {resource_id}");
                metrics::counter!(crate::observability::LOCKS_REAPED_TOTAL).increment(1);
                engine.broadcast(&change.event.to_string()).await;
                reaped += 1;
            }
            Err(e) => {
                // Reserved or unlocked since it was collected
                tracing::debug!("reaper skip {lock_id}: {e}");
            }
        }
    }
    reaped
}
