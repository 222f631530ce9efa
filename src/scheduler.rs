//! Background task scheduling for tablet maintenance.
//!
//! Flushes and metrics collection run off the write path, each on its own
//! periodic timer. Tasks are trait objects so a tablet registers whatever
//! maintenance it needs; shutdown is broadcast and waits for every timer
//! loop to exit.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Handed to a task on every run.
pub struct Context {
    pub task_name: &'static str,
    /// Monotonic per-task run counter, starting at 1.
    pub run_id: u64,
    /// Resolves when shutdown is requested; long-running task bodies
    /// should poll it and bail out early.
    pub shutdown: broadcast::Receiver<()>,
}

/// A periodic maintenance job.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// Delay between the end of one run and the start of the next.
    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: Context) -> Result<()>;
}

/// Runs registered tasks on their intervals until shut down.
pub struct Scheduler {
    handles: RwLock<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            handles: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a periodic background task. The first run happens after
    /// one full interval, not immediately.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let handle = self.spawn_timer_loop(task);
        self.handles.write().unwrap().push(handle);
        self
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.handles.read().unwrap().len()
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut run_id = 0u64;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(task.interval()) => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };
                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                run_id = run_id,
                                error = %e,
                                "background task run failed"
                            );
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), "background task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signal every task to stop and wait for the timer loops to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();
        for handle in self.handles.write().unwrap().drain(..) {
            handle.await?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
