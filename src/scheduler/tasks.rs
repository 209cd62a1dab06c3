use std::sync::Arc;

use tracing::info;

use crate::pipeline::{PipelineStats, StatsSnapshot};
use crate::scheduler::Scheduler;

pub fn heartbeat_line(stats: &StatsSnapshot) -> String {
    format!(
        "Heartbeat: {} received, {} filtered out, {} emptied by cleanup, {} dispatched",
        stats.received, stats.filtered_out, stats.emptied, stats.dispatched
    )
}

/// Periodically log pipeline counters while listening.
pub async fn register_heartbeat(
    scheduler: &Scheduler,
    cron: &str,
    stats: Arc<PipelineStats>,
) -> anyhow::Result<()> {
    scheduler
        .add_cron_job(cron, "heartbeat", move || {
            let stats = Arc::clone(&stats);
            Box::pin(async move {
                info!("{}", heartbeat_line(&stats.snapshot()));
            })
        })
        .await
}
