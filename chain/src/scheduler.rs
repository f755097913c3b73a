//! Named background tasks: periodic jobs and long-running loops, all
//! stopped through the shared shutdown signal.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;

struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, then every `period`, until shutdown. A run
    /// that overruns its period delays the next one rather than bursting.
    pub fn schedule<F, Fut>(
        &mut self,
        name: &'static str,
        delay: Duration,
        period: Duration,
        mut shutdown: ShutdownSignal,
        mut task: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        debug!(task = name, "scheduled task shutting down");
                        break;
                    }
                    _ = interval.tick() => task().await,
                }
            }
        });
        info!(task = name, ?period, "task scheduled");
        self.tasks.push(ScheduledTask { name, handle });
    }

    /// Run a long-lived loop that watches the shutdown signal itself.
    pub fn spawn<Fut>(&mut self, name: &'static str, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(ScheduledTask {
            name,
            handle: tokio::spawn(future),
        });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to finish. Tasks still running after `timeout`
    /// are aborted and `false` is returned.
    pub async fn join(self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = true;
        for ScheduledTask { name, mut handle } in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "task did not stop in time, aborting");
                    handle.abort();
                    clean = false;
                }
            }
        }
        clean
    }
}
