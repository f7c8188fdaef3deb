use std::collections::HashMap;
use std::future::Future;

use tokio::task::{AbortHandle, Id, JoinSet};
use tokio::time::Instant;

use crate::config::SchedulerConfig;

/// How an admitted task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// Evicted past its deadline (or lost to a panic).
    Reaped,
}

struct Admitted {
    target: String,
    deadline: Instant,
    abort: AbortHandle,
}

/// Bounded-concurrency fan-out with per-task wall-clock reaping.
///
/// At most `max_concurrent` tasks are admitted at once; `spawn` blocks,
/// ticking the reaper, while the set is full. A task past its deadline
/// (admit time + `task_timeout`) is evicted from scheduling accounting
/// within one tick and its future aborted. Abort takes effect at the
/// task's next await point — an external process the task spawned dies
/// with it only if it was configured to (see `CommandProvider`'s
/// `kill_on_drop`); the eviction itself is a liveness safety valve, not a
/// guaranteed kill.
///
/// Each task's result stays task-local and is handed back from `wait`,
/// paired with the target the task was admitted under.
pub struct PollScheduler<T> {
    config: SchedulerConfig,
    tasks: JoinSet<T>,
    admitted: HashMap<Id, Admitted>,
    finished: Vec<(String, TaskOutcome<T>)>,
}

impl<T: Send + 'static> PollScheduler<T> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: JoinSet::new(),
            admitted: HashMap::new(),
            finished: Vec::new(),
        }
    }

    /// Number of currently admitted tasks.
    pub fn admitted_len(&self) -> usize {
        self.admitted.len()
    }

    /// Admit one task for `target`, waiting for a free slot if the
    /// admitted set is full.
    pub async fn spawn<F>(&mut self, target: impl Into<String>, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        while self.admitted.len() >= self.config.max_concurrent {
            self.step().await;
        }
        let abort = self.tasks.spawn(task);
        self.admitted.insert(
            abort.id(),
            Admitted {
                target: target.into(),
                deadline: Instant::now() + self.config.task_timeout,
                abort,
            },
        );
    }

    /// Block until the admitted set drains, then return every task's
    /// outcome.
    pub async fn wait(mut self) -> Vec<(String, TaskOutcome<T>)> {
        self.reap_expired();
        while !self.admitted.is_empty() {
            self.step().await;
        }
        // drain join results of tasks aborted during reaping
        while self.tasks.join_next().await.is_some() {}
        self.finished
    }

    /// One scheduling step: wait up to a tick for a completion, then scan
    /// for expired deadlines.
    async fn step(&mut self) {
        match tokio::time::timeout(self.config.tick, self.tasks.join_next_with_id()).await {
            Ok(Some(Ok((id, value)))) => {
                if let Some(adm) = self.admitted.remove(&id) {
                    self.finished.push((adm.target, TaskOutcome::Completed(value)));
                }
            }
            Ok(Some(Err(join_err))) => {
                // an aborted task was accounted for at reap time; anything
                // still admitted here died of a panic
                if let Some(adm) = self.admitted.remove(&join_err.id()) {
                    tracing::error!(target_host = %adm.target, error = %join_err, "Poll task failed");
                    self.finished.push((adm.target, TaskOutcome::Reaped));
                }
            }
            Ok(None) => {}
            Err(_tick_elapsed) => {}
        }
        self.reap_expired();
    }

    fn reap_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<Id> = self
            .admitted
            .iter()
            .filter(|(_, adm)| now >= adm.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(adm) = self.admitted.remove(&id) {
                tracing::warn!(
                    target_host = %adm.target,
                    timeout_secs = self.config.task_timeout.as_secs(),
                    "Poll task exceeded its deadline, evicting"
                );
                adm.abort.abort();
                self.finished.push((adm.target, TaskOutcome::Reaped));
            }
        }
    }
}
