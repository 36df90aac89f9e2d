//! The kernel - task lifecycle, the cooperative run loop, and iteration
//!
//! - Tasks run on one thread and yield voluntarily
//! - Synchronous mental model, sliced implementation
//! - Small, auditable core

pub mod error;
pub mod executor;
pub mod iterate;
pub mod task;
pub mod trace;

#[cfg(test)]
mod invariants_test;

pub use error::{IterError, IterResult};
pub use executor::{Continuation, Defer, Executor, Priority, Spawner};
pub use task::{Owner, StateCell, Task, TaskGroup, TaskHandle, TaskId, TaskState};
pub use trace::{TraceCategory, TraceEvent, Tracer, TracerConfig};

use crate::platform;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

thread_local! {
    /// The global kernel instance
    static KERNEL: Kernel = Kernel::new();
}

/// The kernel owns the default run loop, the tracer and the task-id counter
///
/// Fields are individually guarded so continuations running inside a tick can
/// defer and trace without contending for one big borrow.
pub struct Kernel {
    executor: Rc<Executor>,
    tracer: RefCell<Tracer>,
    next_task_id: Cell<u64>,
}

impl Kernel {
    pub fn new() -> Self {
        let mut tracer = Tracer::new();
        tracer.set_start_time(platform::now_ms());
        Self {
            executor: Rc::new(Executor::new()),
            tracer: RefCell::new(tracer),
            next_task_id: Cell::new(0),
        }
    }

    /// Generate a unique task ID
    pub fn next_task_id(&self) -> TaskId {
        let id = TaskId(self.next_task_id.get());
        self.next_task_id.set(id.0 + 1);
        id
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for deferring onto the global run loop
pub fn spawner() -> Spawner {
    KERNEL.with(|k| k.executor.spawner())
}

/// Run one tick of the global run loop, returns the number of continuations run
pub fn tick() -> usize {
    // Clone out so continuations can reach the kernel while the tick runs
    let executor = KERNEL.with(|k| k.executor.clone());
    let start = platform::now_ms();
    let ran = executor.tick();
    let duration = platform::now_ms() - start;

    with_tracer(|t| {
        t.scheduler = executor.stats();
        t.trace(
            TraceEvent::instant(start, TraceCategory::Scheduler, "tick")
                .with_detail(format!("{} continuations", ran))
                .with_duration(duration),
        );
    });
    ran
}

/// Tick the global run loop until no continuations remain
pub fn run() {
    while has_pending() {
        tick();
    }
}

/// Check if the global run loop has queued continuations
pub fn has_pending() -> bool {
    KERNEL.with(|k| k.executor.has_pending())
}

/// Get the next available task ID
pub fn allocate_task_id() -> TaskId {
    KERNEL.with(|k| k.next_task_id())
}

/// Run a closure against the global tracer
pub fn with_tracer<T>(f: impl FnOnce(&mut Tracer) -> T) -> T {
    KERNEL.with(|k| f(&mut k.tracer.borrow_mut()))
}

/// Replace the tracer settings, keeping accumulated statistics
pub fn configure_tracer(config: TracerConfig) {
    with_tracer(|t| {
        let mut fresh = Tracer::with_config(config);
        fresh.iteration = t.iteration.clone();
        fresh.scheduler = t.scheduler.clone();
        fresh.set_start_time(platform::now_ms());
        *t = fresh;
    });
}
