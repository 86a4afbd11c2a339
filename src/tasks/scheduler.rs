use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// In-process delayed-task runner. Work is identified by an opaque id that
/// callers persist on the owning row so a pending job can later be revoked
/// (e.g. on campaign cancellation). Jobs are fire-and-forget; a job that
/// needs retries brings its own policy.
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl TaskScheduler {
    fn instance() -> &'static TaskScheduler {
        static INSTANCE: OnceLock<TaskScheduler> = OnceLock::new();
        INSTANCE.get_or_init(|| TaskScheduler {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Run `fut` once the wall clock reaches `eta` (immediately if already
    /// past). Returns the task id.
    pub fn schedule_at<F>(eta: DateTime<Utc>, fut: F) -> Uuid
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let tasks = Self::instance().tasks.clone();

        let delay = (eta - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));

        let handle = tokio::spawn({
            let tasks = tasks.clone();
            async move {
                tokio::time::sleep(delay).await;
                fut.await;
                tasks.lock().expect("scheduler lock").remove(&task_id);
            }
        });

        let mut pending = tasks.lock().expect("scheduler lock");
        if !handle.is_finished() {
            pending.insert(task_id, handle);
        }
        drop(pending);
        debug!(%task_id, %eta, "scheduled task");
        task_id
    }

    /// Ask the scheduler to drop a queued task by id. Returns whether a
    /// pending task was found.
    pub fn revoke(task_id: Uuid) -> bool {
        let handle = Self::instance()
            .tasks
            .lock()
            .expect("scheduler lock")
            .remove(&task_id);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(%task_id, "revoked task");
                true
            }
            None => false,
        }
    }

    pub fn revoke_all(task_ids: &[Uuid]) {
        for task_id in task_ids {
            Self::revoke(*task_id);
        }
    }

    /// Number of tasks still pending.
    pub fn pending() -> usize {
        Self::instance().tasks.lock().expect("scheduler lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);

    #[tokio::test]
    async fn runs_at_eta_and_clears_itself() {
        let eta = Utc::now() + chrono::Duration::milliseconds(20);
        TaskScheduler::schedule_at(eta, async {
            FIRED.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(FIRED.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn revoked_tasks_never_fire() {
        static REVOKED_FIRED: AtomicUsize = AtomicUsize::new(0);
        let eta = Utc::now() + chrono::Duration::seconds(30);
        let task_id = TaskScheduler::schedule_at(eta, async {
            REVOKED_FIRED.fetch_add(1, Ordering::SeqCst);
        });
        assert!(TaskScheduler::revoke(task_id));
        assert!(!TaskScheduler::revoke(task_id));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(REVOKED_FIRED.load(Ordering::SeqCst), 0);
    }
}
