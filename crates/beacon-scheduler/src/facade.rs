use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{Result, SchedulerError},
    recurrence::Recurrence,
};

/// What a task wants after being told its next fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop,
}

/// A recurring callback driven by a [`JobScheduler`].
///
/// Ticks of one task never overlap: the scheduler awaits `tick` and then
/// `after_tick` before it waits for the following fire time.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// One firing of the timer; `now` is the moment the tick started.
    async fn tick(&self, now: DateTime<Utc>);

    /// Called after every tick with the next planned fire time, and once up
    /// front with `None` if the recurrence never fires at all.
    async fn after_tick(&self, next: Option<DateTime<Utc>>) -> Continuation;
}

/// Cancels one scheduled task.
pub trait JobHandle: Send + Sync {
    /// Stop the timer. A tick already running completes first.
    fn cancel(&self);

    fn is_finished(&self) -> bool;
}

/// Turns a recurrence into a recurring callback.
pub trait JobScheduler: Send + Sync {
    fn schedule(
        &self,
        name: &str,
        recurrence: Recurrence,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<Box<dyn JobHandle>>;
}

/// In-process scheduler: one Tokio task per scheduled job.
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Use the runtime the caller is running on.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        Ok(Self { runtime })
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(
        &self,
        name: &str,
        recurrence: Recurrence,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<Box<dyn JobHandle>> {
        let cancel = CancellationToken::new();
        let join = self.runtime.spawn(drive(
            name.to_string(),
            recurrence,
            task,
            cancel.clone(),
        ));
        info!(job = %name, %recurrence, "job scheduled");
        Ok(Box::new(TokioJobHandle { cancel, join }))
    }
}

struct TokioJobHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl JobHandle for TokioJobHandle {
    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

async fn drive(
    name: String,
    recurrence: Recurrence,
    task: Arc<dyn ScheduledTask>,
    cancel: CancellationToken,
) {
    let mut next = recurrence.next_after(Utc::now());
    if next.is_none() {
        task.after_tick(None).await;
    }

    while let Some(at) = next {
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job = %name, "job cancelled while waiting");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Utc::now().max(at);
        task.tick(now).await;

        // Fire times missed while the tick ran are skipped, not replayed.
        next = recurrence.next_after(now);
        if task.after_tick(next).await == Continuation::Stop || cancel.is_cancelled() {
            break;
        }
    }
    debug!(job = %name, "job finished");
}
