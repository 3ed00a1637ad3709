//! Unified Background Scheduler
//!
//! One periodic driver for both background jobs. Each tick runs a
//! reconcile pass and then a notification retry pass on the same task, so
//! a notification created during reconcile is already queued when the
//! retry pass runs. Stopping cancels the shared run context; in-flight
//! HTTP requests finish under their own timeouts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::context::RunContext;
use crate::notify::NotificationPipeline;
use crate::reconcile::Reconciler;
use crate::storage::Store;

/// Single periodic driver for reconcile and retry passes
pub struct Scheduler<S: Store + 'static> {
    reconciler: Arc<Reconciler<S>>,
    pipeline: Arc<NotificationPipeline<S>>,
    tick_interval: Duration,
}

impl<S: Store + 'static> Scheduler<S> {
    /// Create a new scheduler
    pub fn new(
        reconciler: Arc<Reconciler<S>>,
        pipeline: Arc<NotificationPipeline<S>>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            reconciler,
            pipeline,
            tick_interval: Duration::from_secs(config.interval_seconds),
        }
    }

    /// Run one tick: reconcile pass, then retry pass
    pub async fn tick_once(&self, ctx: &RunContext) {
        self.reconciler.poll_once(ctx).await;
        self.pipeline.retry_pass(ctx).await;
    }

    /// Spawn the driver loop and return its handle
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let ctx = RunContext::new();

        let reconciler = self.reconciler.clone();
        let pipeline = self.pipeline.clone();
        let tick_interval = self.tick_interval;
        let loop_ctx = ctx.clone();

        tokio::spawn(async move {
            let mut timer = interval(tick_interval);
            // The first tick fires immediately; consume it so work starts
            // one interval after startup.
            timer.tick().await;

            info!(
                interval_secs = tick_interval.as_secs(),
                "outbound scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("outbound scheduler received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        if loop_ctx.is_cancelled() {
                            break;
                        }
                        reconciler.poll_once(&loop_ctx).await;
                        pipeline.retry_pass(&loop_ctx).await;
                    }
                }
            }

            info!("outbound scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, ctx }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    ctx: RunContext,
}

impl SchedulerHandle {
    /// Stop the scheduler: cancel the shared context, then signal the loop
    pub async fn stop(self) {
        self.ctx.cancel();
        let _ = self.shutdown_tx.send(()).await;
    }

    /// The run context shared with both passes
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}
