//! Deferred task and microtask queues.
//!
//! All user-visible asynchrony in the engine flows through one
//! [`TaskQueue`]: request events, scheduler starts, and version-change
//! broadcasts are tasks; the transaction active-flag discipline uses
//! microtask checkpoints. The queue is drained explicitly, which makes
//! every interleaving deterministic and testable.

use parking_lot::Mutex;
use std::collections::VecDeque;

pub(crate) type Task = Box<dyn FnOnce() + Send>;

/// FIFO macrotask queue plus microtask queue.
///
/// Microtasks always drain before the next macrotask, matching host
/// event-loop checkpoint semantics.
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    microtasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a deferred task.
    pub fn schedule_task(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    /// Enqueues a microtask for the next checkpoint.
    pub fn schedule_microtask(&self, task: Task) {
        self.microtasks.lock().push_back(task);
    }

    /// Drains the microtask queue, including microtasks scheduled while
    /// draining.
    pub fn run_microtasks(&self) {
        loop {
            let Some(task) = self.microtasks.lock().pop_front() else {
                return;
            };
            task();
        }
    }

    /// Runs one macrotask (with its surrounding microtask checkpoints).
    /// Returns `false` when nothing was pending.
    pub fn run_one(&self) -> bool {
        self.run_microtasks();
        let Some(task) = self.tasks.lock().pop_front() else {
            return false;
        };
        task();
        self.run_microtasks();
        true
    }

    /// Runs tasks until both queues are empty.
    pub fn run_until_idle(&self) {
        while self.run_one() {}
    }

    /// Whether any task or microtask is pending.
    pub fn is_idle(&self) -> bool {
        self.tasks.lock().is_empty() && self.microtasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_in_order() {
        let queue = TaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            queue.schedule_task(Box::new(move || log.lock().push(i)));
        }
        queue.run_until_idle();

        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn microtasks_run_before_next_task() {
        let queue = TaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let log = Arc::clone(&log);
            queue.schedule_task(Box::new(move || log.lock().push("task1")));
        }
        {
            let log = Arc::clone(&log);
            queue.schedule_microtask(Box::new(move || log.lock().push("micro")));
        }
        {
            let log = Arc::clone(&log);
            queue.schedule_task(Box::new(move || log.lock().push("task2")));
        }
        queue.run_until_idle();

        assert_eq!(*log.lock(), vec!["micro", "task1", "task2"]);
    }

    #[test]
    fn nested_microtasks_drain_in_one_checkpoint() {
        let queue = Arc::new(TaskQueue::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_queue = Arc::clone(&queue);
        let inner_count = Arc::clone(&count);
        queue.schedule_microtask(Box::new(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            let innermost = Arc::clone(&inner_count);
            inner_queue.schedule_microtask(Box::new(move || {
                innermost.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        queue.run_microtasks();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn run_one_reports_idle() {
        let queue = TaskQueue::new();
        assert!(!queue.run_one());
        assert!(queue.is_idle());

        queue.schedule_task(Box::new(|| {}));
        assert!(!queue.is_idle());
        assert!(queue.run_one());
        assert!(!queue.run_one());
    }
}
