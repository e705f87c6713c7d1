use crate::pipeline::PipelineStats;
use crate::pipeline::pool::Shared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

/// Logs a stats line every `period` until `stop` flips and returns how many
/// lines it wrote. Observes only.
pub(crate) async fn run(
    name: String,
    shared: Arc<Shared>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut logged = 0;
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                log_stats(&name, &PipelineStats::from_shared(&shared));
                logged += 1;
            }
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
    }
    debug!(pipeline = %name, logged, "pipeline monitor stopped");
    logged
}

pub(crate) fn log_stats(name: &str, stats: &PipelineStats) {
    info!(
        pipeline = %name,
        pool_size = stats.pool_size,
        core_size = stats.core_size,
        max_size = stats.max_size,
        active = stats.active,
        completed = stats.completed,
        task_count = stats.task_count,
        queued = stats.queued,
        is_shutdown = stats.is_shutdown,
        rejected = stats.rejected,
        retries = stats.retries,
        successful_retries = stats.successful_retries,
        failed_retries = stats.failed_retries,
        relay_failures = stats.relay_failures,
        "pipeline monitor"
    );
}
