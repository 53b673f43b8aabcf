//! Background sweeper for idle containers

use crate::pool::Shared;
use std::sync::Weak;
use tokio::task::JoinHandle;

/// Sweep every `gc_frequency` while GC is enabled.
///
/// Holds only a weak reference between passes, so the loop ends on its own
/// once the pool is gone.
pub(crate) fn spawn_sweeper(shared: Weak<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(pool) = shared.upgrade() else {
                break;
            };
            let frequency = pool.state.lock().gc_frequency;
            drop(pool);
            tokio::time::sleep(frequency).await;

            let Some(pool) = shared.upgrade() else {
                break;
            };
            if !pool.state.lock().gc_enabled {
                continue;
            }

            let removed = pool.sweep().await;
            if removed > 0 {
                tracing::debug!(removed, "gc sweep finished");
            }
        }
        tracing::debug!("gc sweeper stopped");
    })
}
