use cdcflow::changefeed::descriptor::ChangefeedDescriptor;
use cdcflow::jobs::task::{ChangefeedTask, TaskContext, TaskError, TaskFactory};
use cdcflow::BoxFuture;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stand-in for the delivery pipeline: wakes every `interval`, re-reads its
/// configuration and records a high-water mark.
pub struct PollingTask {
    interval: Duration,
}

impl PollingTask {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

pub fn polling_factory(interval: Duration) -> Arc<dyn TaskFactory> {
    Arc::new(move |_: &ChangefeedDescriptor| {
        Arc::new(PollingTask::new(interval)) as Arc<dyn ChangefeedTask>
    })
}

impl ChangefeedTask for PollingTask {
    fn resume<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            let job_id = ctx.job_id();
            info!(job_id = %job_id, resumed_from = ?ctx.high_water(), "changefeed task running");

            let mut ticks: u64 = 0;
            loop {
                // the descriptor only changes while paused, i.e. inside checkpoint
                let descriptor = ctx.descriptor()?;
                debug!(
                    job_id = %job_id,
                    sink = %descriptor.sink(),
                    targets = descriptor.targets().len(),
                    format = descriptor.format().as_str(),
                    tick = ticks,
                    "poll"
                );

                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = ctx.signaled() => {}
                }
                ticks += 1;
                ctx.checkpoint(Some(Utc::now())).await?;
            }
        })
    }

    fn on_fail_or_cancel<'a>(
        &'a self,
        ctx: &'a TaskContext,
        error: &'a TaskError,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match error {
                TaskError::Canceled => info!(job_id = %ctx.job_id(), "changefeed task stopped"),
                TaskError::Failed(_) => warn!(job_id = %ctx.job_id(), "changefeed task failed, releasing"),
            }
            Ok(())
        })
    }
}
