//! Shared scheduler for scanned-mode channels.
//!
//! One background thread drives all periodic scan jobs; channels obtain a
//! [`ScanTask`] handle per job and cancel independently by dropping it.
//! Tests drive a scheduler without a thread via [`ScanScheduler::manual`]
//! and [`ScanScheduler::run_due`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

static GLOBAL: Lazy<Arc<ScanScheduler>> = Lazy::new(ScanScheduler::new);

type Job = Arc<dyn Fn() + Send + Sync>;

struct TaskEntry {
    id: u64,
    deadline: Instant,
    period: Duration,
    job: Job,
}

#[derive(Default)]
struct State {
    tasks: Vec<TaskEntry>,
    next_id: u64,
}

struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

pub struct ScanScheduler {
    inner: Arc<Inner>,
}

impl ScanScheduler {
    /// Scheduler backed by a background thread.
    pub fn new() -> Arc<Self> {
        let scheduler = Self::manual();
        let inner = Arc::clone(&scheduler.inner);
        if let Err(err) = std::thread::Builder::new()
            .name("scan-scheduler".into())
            .spawn(move || scheduler_loop(inner))
        {
            log::error!("failed to spawn scan scheduler thread: {err}");
        }
        scheduler
    }

    /// Scheduler without a thread; the caller drives it via [`run_due`].
    ///
    /// [`run_due`]: ScanScheduler::run_due
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed: Condvar::new(),
            }),
        })
    }

    /// Process-wide scheduler shared by all models.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Register `job` to run every `period`, first run one period from now.
    /// The job stops when the returned handle is dropped.
    pub fn schedule(&self, period: Duration, job: impl Fn() + Send + Sync + 'static) -> ScanTask {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.push(TaskEntry {
            id,
            deadline: Instant::now() + period,
            period,
            job: Arc::new(job),
        });
        drop(state);
        self.inner.changed.notify_one();
        ScanTask {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run every task whose deadline is at or before `now`, advancing its
    /// deadline by its period. Jobs run outside the scheduler lock.
    pub fn run_due(&self, now: Instant) {
        let due = {
            let mut state = self.inner.state.lock();
            let mut due = Vec::new();
            for task in &mut state.tasks {
                while task.deadline <= now {
                    due.push(Arc::clone(&task.job));
                    task.deadline += task.period;
                }
            }
            due
        };
        for job in due {
            job();
        }
    }

    #[cfg(test)]
    fn task_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }
}

fn scheduler_loop(inner: Arc<Inner>) {
    loop {
        let due = {
            let mut state = inner.state.lock();
            let now = Instant::now();
            let mut due = Vec::new();
            for task in &mut state.tasks {
                while task.deadline <= now {
                    due.push(Arc::clone(&task.job));
                    task.deadline += task.period;
                }
            }
            if due.is_empty() {
                match state.tasks.iter().map(|t| t.deadline).min() {
                    Some(deadline) => {
                        let _ = inner.changed.wait_until(&mut state, deadline);
                    }
                    None => {
                        inner.changed.wait(&mut state);
                    }
                }
            }
            due
        };
        for job in due {
            job();
        }
    }
}

/// Handle for one scheduled scan job; dropping it cancels the job.
pub struct ScanTask {
    id: u64,
    inner: Arc<Inner>,
}

impl Drop for ScanTask {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.tasks.retain(|t| t.id != self.id);
        drop(state);
        self.inner.changed.notify_one();
    }
}
