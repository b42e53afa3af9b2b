//! Host scheduler capability for deferred work
//!
//! `async/*` operators and slot auto-dismiss timers never block; they hand a
//! task to the scheduler and keep its id for cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Identifier for a scheduled task
pub type TaskId = u64;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run after `delay`
    fn schedule(&self, delay: Duration, task: Task) -> TaskId;

    /// Cancel a pending task; returns false if it already ran or never existed
    fn cancel(&self, id: TaskId) -> bool;
}

/// Process-wide task id source shared by scheduler implementations
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh task id
pub fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    /// Pending tasks ordered by (due time, id)
    pending: BTreeMap<(Duration, TaskId), Task>,
}

/// Deterministic scheduler driven by an explicit virtual clock
///
/// Nothing runs until [`ManualScheduler::advance`] moves the clock. Tasks
/// due at the same instant run in scheduling order.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().map(|s| s.now).unwrap_or_default()
    }

    /// Number of tasks still waiting
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Move the clock forward, running every task that comes due
    ///
    /// Tasks scheduled by running tasks are picked up if they fall inside the
    /// window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;
        loop {
            let next = {
                let Ok(mut state) = self.state.lock() else {
                    break;
                };
                let due = state
                    .pending
                    .keys()
                    .next()
                    .copied()
                    .filter(|(at, _)| *at <= target);
                match due {
                    Some(key) => {
                        state.now = key.0;
                        state.pending.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Run everything due right now without moving the clock
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        let id = next_task_id();
        if let Ok(mut state) = self.state.lock() {
            let due = state.now + delay;
            state.pending.insert((due, id), task);
        }
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let key = state.pending.keys().find(|(_, task)| *task == id).copied();
        match key {
            Some(key) => state.pending.remove(&key).is_some(),
            None => false,
        }
    }
}
