//! tokio-backed scheduler for deferred effects and slot timers

use almadar_core::scheduler::next_task_id;
use almadar_core::{Scheduler, Task, TaskId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Runs each task on the tokio runtime after a `tokio::time::sleep`
///
/// Pending tasks are tracked by id so `cancel` can abort them.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
    pending: Arc<Mutex<HashMap<TaskId, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Scheduler on the runtime the caller is running in
    pub fn current() -> Result<Self, tokio::runtime::TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        let id = next_task_id();
        let pending = self.pending.clone();
        // Held until the abort handle is stored so the task cannot finish first.
        let mut tasks = match self.pending.lock() {
            Ok(tasks) => tasks,
            Err(_) => {
                tracing::error!("scheduler task table poisoned; task dropped");
                return id;
            }
        };
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = pending.lock().map(|mut p| p.remove(&id).is_some()).unwrap_or(false);
            if still_pending {
                task();
            }
        });
        tasks.insert(id, join.abort_handle());
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        let handle = self.pending.lock().ok().and_then(|mut p| p.remove(&id));
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Task) {
        let count = Arc::new(AtomicUsize::new(0));
        let source = count.clone();
        (count, move || {
            let count = source.clone();
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let (count, task) = counter();
        scheduler.schedule(Duration::from_millis(50), task());
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = TokioScheduler::current().unwrap();
        let (count, task) = counter();
        let id = scheduler.schedule(Duration::from_millis(50), task());
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
