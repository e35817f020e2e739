//! Deferred execution for promise callbacks.
//!
//! A promise never runs its callbacks directly. It hands each one to a
//! [`Scheduler`], which decides when it runs: [`Immediate`] runs it on the
//! spot, [`TaskQueue`] holds it until somebody drains the queue, which keeps
//! callbacks off the stack that settled the promise.
//!
//! Every promise carries the scheduler it was created with. Promises built
//! without one use the process-wide default, see [`set_default`].

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

pub trait Scheduler: Send + Sync {
    /// Runs `task` now or later.
    fn defer(&self, task: Task);

    /// Drives pending work until `done` returns true or nothing is left to run.
    ///
    /// Called by `Promise::wait`. The default does nothing, which is right for
    /// schedulers that never hold work back.
    fn run_until(&self, _done: &dyn Fn() -> bool) {}
}

/// Runs every task inline, inside the call that deferred it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn defer(&self, task: Task) {
        task()
    }
}

/// A FIFO queue of tasks, drained explicitly.
///
/// Tasks queued while draining run in the same drain.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs queued tasks until the queue is empty. Returns how many ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Runs the oldest queued task, if any.
    pub fn run_one(&self) -> bool {
        // The lock must be released before the task runs, it may defer more work.
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Scheduler for TaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    fn run_until(&self, done: &dyn Fn() -> bool) {
        while !done() && self.run_one() {}
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

static DEFAULT: RwLock<Option<Arc<dyn Scheduler>>> = RwLock::new(None);

/// The scheduler used by promises created without an explicit one.
///
/// [`Immediate`] unless replaced with [`set_default`].
pub fn default() -> Arc<dyn Scheduler> {
    match &*DEFAULT.read() {
        Some(scheduler) => Arc::clone(scheduler),
        None => Arc::new(Immediate),
    }
}

/// Replaces the process-wide default scheduler. Existing promises keep theirs.
pub fn set_default(scheduler: Arc<dyn Scheduler>) {
    tracing::debug!("replacing default promise scheduler");
    *DEFAULT.write() = Some(scheduler);
}

/// Restores [`Immediate`] as the process-wide default.
pub fn reset_default() {
    *DEFAULT.write() = None;
}

#[cfg(test)]
mod tests {
    use super::{Immediate, Scheduler, TaskQueue};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_immediate_runs_inline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = log.clone();
        Immediate.defer(Box::new(move || inner.lock().push(1)));
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn test_queue_is_fifo_and_drains_nested_tasks() {
        let queue = TaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            let nested = queue.clone();
            queue.defer(Box::new(move || {
                log.lock().push(i);
                let log = log.clone();
                nested.defer(Box::new(move || log.lock().push(i + 10)));
            }));
        }
        assert_eq!(queue.len(), 3);
        assert!(log.lock().is_empty());

        assert_eq!(queue.run(), 6);
        assert_eq!(*log.lock(), vec![0, 1, 2, 10, 11, 12]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_run_until_stops_when_done() {
        let queue = TaskQueue::new();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..5 {
            let count = count.clone();
            queue.defer(Box::new(move || *count.lock() += 1));
        }
        queue.run_until(&|| *count.lock() >= 2);
        assert_eq!(*count.lock(), 2);
        assert_eq!(queue.len(), 3);
    }
}
