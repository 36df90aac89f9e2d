//! Cooperative run loop for deferred continuations
//!
//! Designed for interleaving long-running work with UI work in WASM:
//! - Tick-based execution (integrates with requestAnimationFrame)
//! - Priority levels (critical work runs before background work)
//! - Continuations deferred during a tick run on a later tick, never the same one
//! - FIFO among continuations of equal priority
//!
//! A continuation is the rest of a task's work after it yields. Yielding is an
//! explicit requeue: the task hands the executor a closure and returns.

use super::task::TaskId;
use super::trace::SchedulerStats;
use crate::platform;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Task priority levels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Latency-sensitive work (input handling, rendering)
    Critical = 0,
    /// Normal application tasks
    #[default]
    Normal = 1,
    /// Background tasks (can be starved)
    Background = 2,
}

/// The rest of a task's work, run on a later turn
pub type Continuation = Box<dyn FnOnce() + 'static>;

/// The deferred-execution primitive
///
/// Schedules a continuation to run on a later turn of the host's run loop.
/// Implementations must preserve call order among continuations deferred by
/// the same task.
pub trait Defer {
    fn defer(&self, task: TaskId, priority: Priority, continuation: Continuation);
}

/// A queued continuation with metadata
struct Deferred {
    task: TaskId,
    priority: Priority,
    /// Enqueue order, breaks ties within a priority
    seq: u64,
    run: Continuation,
}

#[derive(Default)]
struct RunQueue {
    queue: VecDeque<Deferred>,
    next_seq: u64,
}

impl RunQueue {
    fn push(&mut self, task: TaskId, priority: Priority, run: Continuation) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(Deferred {
            task,
            priority,
            seq,
            run,
        });
    }
}

/// Cloneable handle for deferring onto an executor
///
/// Continuations capture one of these so they can defer again from inside a tick.
#[derive(Clone)]
pub struct Spawner {
    queue: Rc<RefCell<RunQueue>>,
}

impl Defer for Spawner {
    fn defer(&self, task: TaskId, priority: Priority, continuation: Continuation) {
        self.queue.borrow_mut().push(task, priority, continuation);
    }
}

/// The executor - runs deferred continuations cooperatively, one tick at a time
pub struct Executor {
    queue: Rc<RefCell<RunQueue>>,
    stats: RefCell<SchedulerStats>,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(RunQueue::default())),
            stats: RefCell::new(SchedulerStats::new()),
        }
    }

    /// Handle that defers onto this executor
    pub fn spawner(&self) -> Spawner {
        Spawner {
            queue: self.queue.clone(),
        }
    }

    /// Run one tick of execution
    ///
    /// Runs every continuation queued before the tick began, in priority
    /// order. Returns the number of continuations run.
    ///
    /// Call this from requestAnimationFrame for UI work.
    pub fn tick(&self) -> usize {
        // Take the batch first: anything deferred while it runs waits a tick
        let mut batch: Vec<Deferred> = self.queue.borrow_mut().queue.drain(..).collect();

        // Critical first, then Normal, then Background; FIFO within each
        batch.sort_by_key(|d| (d.priority, d.seq));

        let mut tick = TickGuard {
            executor: self,
            batch: batch.into(),
            ran: 0,
            start: platform::now_ms(),
        };
        while let Some(deferred) = tick.batch.pop_front() {
            tick.ran += 1;
            (deferred.run)();
        }
        tick.ran
    }

    /// Run until no continuations remain (for non-UI contexts)
    pub fn run(&self) {
        while self.has_pending() {
            self.tick();
        }
    }

    /// Check if any continuation is waiting
    pub fn has_pending(&self) -> bool {
        !self.queue.borrow().queue.is_empty()
    }

    /// Number of queued continuations
    pub fn pending_count(&self) -> usize {
        self.queue.borrow().queue.len()
    }

    /// Number of queued continuations belonging to one task
    pub fn pending_for(&self, task: TaskId) -> usize {
        self.queue
            .borrow()
            .queue
            .iter()
            .filter(|d| d.task == task)
            .count()
    }

    /// Drop every queued continuation of a task
    ///
    /// The task's own state is left alone; use its handle to cancel it.
    /// Returns the number of continuations dropped.
    pub fn cancel_task(&self, task: TaskId) -> usize {
        let mut inner = self.queue.borrow_mut();
        let before = inner.queue.len();
        inner.queue.retain(|d| d.task != task);
        before - inner.queue.len()
    }

    /// Tick statistics since creation
    pub fn stats(&self) -> SchedulerStats {
        self.stats.borrow().clone()
    }
}

/// Closes out a tick, including one cut short by a panicking continuation
///
/// Continuations of the batch that never ran go back to the front of the
/// queue, so a failure in one task does not strand the others.
struct TickGuard<'a> {
    executor: &'a Executor,
    batch: VecDeque<Deferred>,
    ran: usize,
    start: f64,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        if !self.batch.is_empty() {
            let mut inner = self.executor.queue.borrow_mut();
            while let Some(deferred) = self.batch.pop_back() {
                inner.queue.push_front(deferred);
            }
        }

        self.executor
            .stats
            .borrow_mut()
            .record_tick(self.ran, platform::now_ms() - self.start);
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Defer for Executor {
    fn defer(&self, task: TaskId, priority: Priority, continuation: Continuation) {
        self.queue.borrow_mut().push(task, priority, continuation);
    }
}
