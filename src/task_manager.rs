use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{EnrichmentStats, Lead};
use crate::orchestrator::{EnrichmentOrchestrator, ProgressUpdate, RunOutcome, RunRequest};

/// Cooperative cancellation token. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Point-in-time view of a task, safe to hand to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub campaign_id: String,
    pub state: TaskState,
    pub progress: Option<ProgressUpdate>,
    pub stats: EnrichmentStats,
    pub errors: Vec<String>,
    pub error: Option<String>,
    pub lead_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct TaskEntry {
    snapshot: TaskSnapshot,
    cancel: CancelFlag,
    progress: watch::Receiver<Option<ProgressUpdate>>,
    leads: Vec<Lead>,
}

/// Registry of enrichment runs executing in background tokio tasks.
///
/// Every run gets its own cancel flag and progress channel; nothing mutable is
/// shared between runs.
#[derive(Clone)]
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
    orchestrator: Arc<EnrichmentOrchestrator>,
    retention: Duration,
}

impl TaskManager {
    /// `retention` is how long finished tasks stay queryable.
    pub fn new(orchestrator: Arc<EnrichmentOrchestrator>, retention: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            orchestrator,
            retention,
        }
    }

    pub async fn start(&self, request: RunRequest) -> Uuid {
        let id = Uuid::new_v4();
        let cancel = CancelFlag::new();
        let (tx, rx) = watch::channel(None);

        let entry = TaskEntry {
            snapshot: TaskSnapshot {
                id,
                campaign_id: request.campaign_id.clone(),
                state: TaskState::Running,
                progress: None,
                stats: EnrichmentStats::default(),
                errors: Vec::new(),
                error: None,
                lead_count: 0,
                started_at: Utc::now(),
                finished_at: None,
            },
            cancel: cancel.clone(),
            progress: rx,
            leads: Vec::new(),
        };
        self.tasks.write().await.insert(id, entry);
        tracing::info!("Task {} started for campaign {}", id, request.campaign_id);

        let manager = self.clone();
        let orchestrator = self.orchestrator.clone();
        let run = tokio::spawn(async move {
            let on_progress = move |update: ProgressUpdate| {
                tx.send_replace(Some(update));
            };
            orchestrator.run(&request, &cancel, &on_progress).await
        });

        // Watches the run so a panic still leaves the task in a terminal state.
        tokio::spawn(async move {
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Task {} aborted abnormally: {}", id, e);
                    RunOutcome {
                        error: Some(format!("Run aborted: {}", e)),
                        ..Default::default()
                    }
                }
            };
            manager.finish(id, outcome).await;
        });

        id
    }

    async fn finish(&self, id: Uuid, outcome: RunOutcome) {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&id) else {
            tracing::warn!("Task {} finished after being evicted", id);
            return;
        };

        let state = if outcome.cancelled {
            TaskState::Cancelled
        } else if outcome.success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        tracing::info!("Task {} finished with state {:?}", id, state);

        entry.snapshot.state = state;
        entry.snapshot.stats = outcome.stats;
        entry.snapshot.errors = outcome.errors;
        entry.snapshot.error = outcome.error;
        entry.snapshot.lead_count = outcome.leads.len();
        entry.snapshot.finished_at = Some(Utc::now());
        entry.leads = outcome.leads;
    }

    pub async fn get(&self, id: Uuid) -> Option<TaskSnapshot> {
        let tasks = self.tasks.read().await;
        let entry = tasks.get(&id)?;
        let mut snapshot = entry.snapshot.clone();
        snapshot.progress = entry.progress.borrow().clone();
        Some(snapshot)
    }

    /// Sets the task's cancel flag. Returns false when the task is unknown or
    /// already finished.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(&id) {
            Some(entry) if entry.snapshot.state == TaskState::Running => {
                entry.cancel.cancel();
                tracing::info!("Cancellation requested for task {}", id);
                true
            }
            _ => false,
        }
    }

    /// Leads of a finished task.
    pub async fn leads(&self, id: Uuid) -> Option<Vec<Lead>> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&id)
            .filter(|entry| entry.snapshot.state != TaskState::Running)
            .map(|entry| entry.leads.clone())
    }

    /// Polls until the task leaves `Running` or `timeout` elapses.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> Option<TaskSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.get(id).await?;
            if snapshot.state != TaskState::Running || tokio::time::Instant::now() >= deadline {
                return Some(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Drops finished tasks older than the retention window.
    pub async fn cleanup_finished(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, entry| match entry.snapshot.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!("Evicted {} finished tasks", removed);
        }
        removed
    }

    pub fn spawn_cleanup_loop(&self, every: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                manager.cleanup_finished().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_independent_flags() {
        let a = CancelFlag::new();
        let b = CancelFlag::new();
        a.cancel();
        assert!(!b.is_cancelled());
    }
}
