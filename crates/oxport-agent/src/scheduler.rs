//! Periodic task runner.
//!
//! Every collector runs as its own tokio task on a fixed interval. A cycle is
//! awaited before the next tick, so cycles of one task never overlap, and a
//! failing or panicking cycle is logged without affecting other tasks or the
//! next cycle of the same task.

use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

const MIN_STARTUP_DELAY_SECS: u64 = 1;
const MAX_STARTUP_DELAY_SECS: u64 = 60;

#[async_trait::async_trait]
pub trait PollTask: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// One-time delay before the first cycle.
    fn startup_delay(&self) -> Option<Duration> {
        None
    }

    async fn run_cycle(&self) -> Result<()>;
}

/// Uniform random delay in `[1s, 60s]` used to spread cloud API load.
pub fn random_startup_delay() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(MIN_STARTUP_DELAY_SECS..=MAX_STARTUP_DELAY_SECS))
}

/// Run `task` forever on its interval.
pub fn spawn(task: Arc<dyn PollTask>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(delay) = task.startup_delay() {
            tracing::info!(task = task.name(), delay_secs = delay.as_secs(), "Delaying first cycle");
            sleep(delay).await;
        }

        tracing::info!(
            task = task.name(),
            interval_secs = task.interval().as_secs(),
            "Starting collection loop"
        );
        let mut tick = interval(task.interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            run_once(&task).await;
        }
    })
}

/// Run a single cycle in its own tokio task so a panic is contained.
/// Returns whether the cycle succeeded.
pub async fn run_once(task: &Arc<dyn PollTask>) -> bool {
    let cycle = Arc::clone(task);
    match tokio::spawn(async move { cycle.run_cycle().await }).await {
        Ok(Ok(())) => {
            tracing::debug!(task = task.name(), "Collection cycle finished");
            true
        }
        Ok(Err(e)) => {
            tracing::error!(task = task.name(), error = %e, "Collection cycle failed");
            false
        }
        Err(e) => {
            tracing::error!(task = task.name(), error = %e, "Collection cycle panicked");
            false
        }
    }
}
