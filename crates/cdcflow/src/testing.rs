//! Task doubles for exercising the registry without a delivery pipeline.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::changefeed::descriptor::ChangefeedDescriptor;
use crate::jobs::task::{ChangefeedTask, TaskContext, TaskError, TaskFactory};
use crate::BoxFuture;

/// A factory handing out clones of one task value, so a test keeps a handle
/// to whatever the registry runs.
pub fn factory_of<T>(task: T) -> Arc<dyn TaskFactory>
where
    T: ChangefeedTask + Clone + 'static,
{
    Arc::new(move |_: &ChangefeedDescriptor| Arc::new(task.clone()) as Arc<dyn ChangefeedTask>)
}

#[derive(Clone, Default)]
pub struct Counters {
    starts: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl Counters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    fn cleanup(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Sits at a checkpoint until [`BlockingTask::finish`] is called, honouring
/// pause and cancel in between.
#[derive(Clone)]
pub struct BlockingTask {
    done: Arc<watch::Sender<bool>>,
    pub counters: Counters,
}

impl Default for BlockingTask {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingTask {
    pub fn new() -> Self {
        Self {
            done: Arc::new(watch::channel(false).0),
            counters: Counters::default(),
        }
    }

    pub fn finish(&self) {
        self.done.send_replace(true);
    }
}

impl ChangefeedTask for BlockingTask {
    fn resume<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            let mut done = self.done.subscribe();
            loop {
                ctx.checkpoint(None).await?;
                if *done.borrow_and_update() {
                    return Ok(());
                }
                tokio::select! {
                    _ = done.changed() => {}
                    _ = ctx.signaled() => {}
                }
            }
        })
    }

    fn on_fail_or_cancel<'a>(
        &'a self,
        _ctx: &'a TaskContext,
        _error: &'a TaskError,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.counters.cleanup()
    }
}

/// Records a new high-water mark every `interval`.
#[derive(Clone)]
pub struct CheckpointingTask {
    interval: Duration,
    pub counters: Counters,
}

impl CheckpointingTask {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            counters: Counters::default(),
        }
    }
}

impl ChangefeedTask for CheckpointingTask {
    fn resume<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            loop {
                ctx.checkpoint(Some(Utc::now())).await?;
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = ctx.signaled() => {}
                }
            }
        })
    }

    fn on_fail_or_cancel<'a>(
        &'a self,
        _ctx: &'a TaskContext,
        _error: &'a TaskError,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.counters.cleanup()
    }
}

/// Fails on its first checkpoint with the given message.
#[derive(Clone)]
pub struct FailingTask {
    message: String,
    pub counters: Counters,
}

impl FailingTask {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            counters: Counters::default(),
        }
    }
}

impl ChangefeedTask for FailingTask {
    fn resume<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            ctx.checkpoint(None).await?;
            Err(TaskError::failed(self.message.clone()))
        })
    }

    fn on_fail_or_cancel<'a>(
        &'a self,
        _ctx: &'a TaskContext,
        _error: &'a TaskError,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.counters.cleanup()
    }
}

/// Never reaches a checkpoint.
#[derive(Clone, Default)]
pub struct WedgedTask {
    pub counters: Counters,
}

impl ChangefeedTask for WedgedTask {
    fn resume<'a>(&'a self, _ctx: &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Result<(), TaskError>>().await
        })
    }

    fn on_fail_or_cancel<'a>(
        &'a self,
        _ctx: &'a TaskContext,
        _error: &'a TaskError,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.counters.cleanup()
    }
}
