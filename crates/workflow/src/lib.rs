//! Background task scheduling for sessions.
//!
//! Each session owns a [`TaskScheduler`]. A scheduled task sleeps on its own
//! tokio task and, when due, is delivered on the scheduler's channel so the
//! session can push an out-of-band `scheduled-task` notice to its client.
//! Tasks are one-shot: once fired or cancelled they leave the schedule.

use chrono::Utc;
use deepdive_core::session::ScheduledTask;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Longest delay a task may be scheduled with.
pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Entry {
    task: ScheduledTask,
    cancel: CancellationToken,
}

/// One-shot task scheduler owned by a session.
pub struct TaskScheduler {
    tasks: Arc<RwLock<HashMap<String, Entry>>>,
    fired: mpsc::Sender<ScheduledTask>,
    shutdown: CancellationToken,
}

impl TaskScheduler {
    /// Create a scheduler and the receiver its fired tasks arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ScheduledTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        let scheduler = Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            fired: tx,
            shutdown: CancellationToken::new(),
        };
        (scheduler, rx)
    }

    /// Schedule `description` to fire after `delay`.
    pub async fn schedule_in(
        &self,
        description: impl Into<String>,
        delay: Duration,
    ) -> Result<ScheduledTask, String> {
        if delay > MAX_DELAY {
            return Err(format!(
                "Delay of {}s exceeds the maximum of {}s",
                delay.as_secs(),
                MAX_DELAY.as_secs()
            ));
        }
        let description = description.into();
        if description.trim().is_empty() {
            return Err("Task description cannot be empty".into());
        }

        let offset = chrono::Duration::from_std(delay).map_err(|e| e.to_string())?;
        let task = ScheduledTask::new(description, Utc::now() + offset);
        let cancel = self.shutdown.child_token();

        info!(task_id = %task.id, description = %task.description, delay_secs = delay.as_secs(), "Scheduling task");
        self.tasks.write().await.insert(
            task.id.clone(),
            Entry {
                task: task.clone(),
                cancel: cancel.clone(),
            },
        );

        let tasks = self.tasks.clone();
        let fired = self.fired.clone();
        let id = task.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id = %id, "Scheduled task cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let Some(entry) = tasks.write().await.remove(&id) else {
                        return;
                    };
                    info!(task_id = %id, "Scheduled task fired");
                    if fired.send(entry.task).await.is_err() {
                        debug!(task_id = %id, "Fired task receiver dropped");
                    }
                }
            }
        });

        Ok(task)
    }

    /// Cancel a pending task. Returns false if it already fired or never existed.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.tasks.write().await.remove(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Pending tasks, soonest first.
    pub async fn list(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks
            .read()
            .await
            .values()
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.fire_at);
        tasks
    }

    /// Cancel every pending task.
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.write().await;
        for (_, entry) in tasks.drain() {
            entry.cancel.cancel();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
