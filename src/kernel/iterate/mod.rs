//! Cooperative, interruptible iteration
//!
//! An `IterationTask` walks a collection, applying an element function to each
//! element, and yields back to the run loop every `step` elements so other
//! work can interleave. Run to completion, it behaves like one synchronous pass.
//!
//! ```text
//!   execute ──► prepare ──► slice ──► [cursor == len] ──► finalize
//!                             ▲  │
//!                             │  └──► [cursor % step == 0] ──► defer
//!                             │                                  │
//!                             └──── resume ◄── [state runnable] ◄┘
//!                                      │
//!                                      └──► [otherwise] halt (silent)
//! ```
//!
//! Properties:
//!
//! - Elements are processed strictly in collection order, whatever the step
//! - The elements between two yields run atomically with respect to outside
//!   state changes; cancellation is noticed only when a deferred slice resumes
//! - Finalization (state, owner, callback, `next`) happens exactly once, and
//!   only when the collection is exhausted
//! - `execute` on a task that already started is a no-op returning the
//!   current result
//!
//! # Usage
//!
//! ```ignore
//! let group = Rc::new(TaskGroup::with_origin(()));
//! let task = IterationTask::map(Collection::from(vec![1, 2, 3]), |_, x: &i32, _, _| x * 2)
//!     .step(2)
//!     .build()?;
//!
//! task.execute(group, |result| console_log!("{:?}", result), false)?;
//! kernel::run();
//! ```

mod collection;
mod strategy;

pub use collection::{Aggregate, Collection, Key, Shape};
pub use strategy::{EachFn, IterationKind, MapFn, Operation, ReduceFn};

use super::error::{IterError, IterResult};
use super::executor::{Defer, Priority};
use super::task::{Owner, StateCell, Task, TaskHandle, TaskId, TaskState};
use super::trace::{TraceCategory, TraceEvent};
use crate::{console_log, kernel, platform};
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use strategy::{Effect, Source};

/// Configuration for an iteration task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    /// Elements per synchronous slice before yielding
    pub step: usize,
    /// Priority of the task's deferred slices
    pub priority: Priority,
    /// Human-readable name for traces and logs
    pub name: String,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            step: 1,
            priority: Priority::Normal,
            name: "iterate".to_string(),
        }
    }
}

impl IterationConfig {
    pub fn step(mut self, n: usize) -> Self {
        self.step = n;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> IterResult<()> {
        if self.step == 0 {
            return Err(IterError::InvalidStep(self.step));
        }
        Ok(())
    }
}

/// Called once with the final result, bound to the task's call context
pub type Callback<R, C> = Box<dyn FnOnce(&C, &Aggregate<R>)>;

type Next<R> = Box<dyn FnOnce(Aggregate<R>)>;

/// What `execute` did
#[derive(Debug, Clone, PartialEq)]
pub enum Execution<R> {
    /// The run began (and may already have finished, for short collections)
    Started,
    /// The task had already started. Carries the current, possibly partial,
    /// result.
    ///
    /// `None` when `execute` is called from inside one of the task's own
    /// element functions: the slice holds the result mutably until its last
    /// element returns, so there is no consistent value to copy yet.
    AlreadyRun(Option<Aggregate<R>>),
}

/// Builder for an `IterationTask`
pub struct IterationBuilder<V, R, C> {
    list: Rc<Collection<V>>,
    operation: Operation<V, R, C>,
    seed: Aggregate<R>,
    config: IterationConfig,
    context: Option<Rc<C>>,
    callback: Option<Callback<R, C>>,
    scheduler: Option<Rc<dyn Defer>>,
}

impl<V: 'static, R: 'static, C: 'static> IterationBuilder<V, R, C> {
    fn new(list: Rc<Collection<V>>, operation: Operation<V, R, C>, seed: Aggregate<R>) -> Self {
        Self {
            list,
            operation,
            seed,
            config: IterationConfig::default(),
            context: None,
            callback: None,
            scheduler: None,
        }
    }

    /// Elements per slice (default 1: yield after every element)
    pub fn step(mut self, step: usize) -> Self {
        self.config.step = step;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Replace step, priority and name at once
    pub fn config(mut self, config: IterationConfig) -> Self {
        self.config = config;
        self
    }

    /// Call context for the element function and callback (overrides the owner's origin)
    pub fn context(self, context: C) -> Self {
        self.shared_context(Rc::new(context))
    }

    pub fn shared_context(mut self, context: Rc<C>) -> Self {
        self.context = Some(context);
        self
    }

    /// Result callback, run after the owner is notified and before `next`
    pub fn callback(mut self, f: impl FnOnce(&C, &Aggregate<R>) + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }

    /// Run loop to yield to (default: the kernel's global executor)
    pub fn scheduler(mut self, scheduler: impl Defer + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    pub fn build(self) -> IterResult<IterationTask<V, R, C>> {
        self.config.validate()?;

        let kind = self.operation.kind();
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Rc::new(kernel::spawner()));

        Ok(IterationTask {
            inner: Rc::new(Inner {
                id: kernel::allocate_task_id(),
                kind,
                config: self.config,
                list: self.list,
                context: self.context,
                scheduler,
                state: StateCell::new(),
                current_iteration: Cell::new(None),
                run: RefCell::new(RunState {
                    operation: Some(self.operation),
                    callback: self.callback,
                    iterator: None,
                    keys: None,
                    result: self.seed,
                }),
            }),
        })
    }
}

/// A scheduled iteration job
///
/// Cloning yields another reference to the same task.
pub struct IterationTask<V, R = (), C = ()> {
    inner: Rc<Inner<V, R, C>>,
}

struct Inner<V, R, C> {
    id: TaskId,
    kind: IterationKind,
    config: IterationConfig,
    list: Rc<Collection<V>>,
    context: Option<Rc<C>>,
    scheduler: Rc<dyn Defer>,
    state: StateCell,
    /// Elements fully processed; None until the first one is
    current_iteration: Cell<Option<usize>>,
    run: RefCell<RunState<V, R, C>>,
}

/// Per-run state, borrowed while a slice applies effects
struct RunState<V, R, C> {
    /// Consumed when the strategy is selected
    operation: Option<Operation<V, R, C>>,
    callback: Option<Callback<R, C>>,
    /// Selected at most once
    iterator: Option<Effect<R>>,
    keys: Option<Rc<[String]>>,
    result: Aggregate<R>,
}

impl<V, R, C> Clone for IterationTask<V, R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: 'static, C: 'static> IterationTask<V, (), C> {
    /// Call `f` on every element for its side effect
    pub fn each(
        list: impl Into<Rc<Collection<V>>>,
        f: impl FnMut(&C, &V, Key<'_>, &Collection<V>) + 'static,
    ) -> IterationBuilder<V, (), C> {
        IterationBuilder::new(list.into(), Operation::Each(Box::new(f)), Aggregate::Nothing)
    }
}

impl<V: 'static, R: 'static, C: 'static> IterationTask<V, R, C> {
    /// Collect `f(element)` at every index or key
    pub fn map(
        list: impl Into<Rc<Collection<V>>>,
        f: impl FnMut(&C, &V, Key<'_>, &Collection<V>) -> R + 'static,
    ) -> IterationBuilder<V, R, C> {
        // Seeded with the input's shape when the run starts
        IterationBuilder::new(list.into(), Operation::Map(Box::new(f)), Aggregate::Nothing)
    }

    /// Fold the collection into `seed`
    pub fn reduce(
        list: impl Into<Rc<Collection<V>>>,
        seed: R,
        f: impl FnMut(&C, R, &V, Key<'_>, &Collection<V>) -> R + 'static,
    ) -> IterationBuilder<V, R, C> {
        IterationBuilder::new(
            list.into(),
            Operation::Reduce(Box::new(f)),
            Aggregate::Value(seed),
        )
    }

    /// Fold the collection into `R::default()`
    pub fn reduce_default(
        list: impl Into<Rc<Collection<V>>>,
        f: impl FnMut(&C, R, &V, Key<'_>, &Collection<V>) -> R + 'static,
    ) -> IterationBuilder<V, R, C>
    where
        R: Default,
    {
        Self::reduce(list, R::default(), f)
    }
}

impl<V, R, C> IterationTask<V, R, C> {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn state(&self) -> TaskState {
        self.inner.state.get()
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.inner.id, self.inner.state.clone())
    }

    pub fn kind(&self) -> IterationKind {
        self.inner.kind
    }

    pub fn shape(&self) -> Shape {
        self.inner.list.shape()
    }

    pub fn step(&self) -> usize {
        self.inner.config.step
    }

    pub fn priority(&self) -> Priority {
        self.inner.config.priority
    }

    pub fn config(&self) -> &IterationConfig {
        &self.inner.config
    }

    /// The source collection (shared, never copied)
    pub fn collection(&self) -> Rc<Collection<V>> {
        self.inner.list.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.list.is_empty()
    }

    /// Elements fully processed, or None before the first one
    pub fn current_iteration(&self) -> Option<usize> {
        self.inner.current_iteration.get()
    }

    /// Fraction of the collection processed, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            return if self.state() == TaskState::Complete {
                1.0
            } else {
                0.0
            };
        }
        self.current_iteration().unwrap_or(0) as f64 / len as f64
    }

    /// Key order materialized for this run (None before the run, or mid-slice)
    pub fn keys(&self) -> Option<Vec<String>> {
        let run = self.inner.run.try_borrow().ok()?;
        run.keys.as_ref().map(|keys| keys.to_vec())
    }

    /// Snapshot of the current result (None mid-slice)
    pub fn result(&self) -> Option<Aggregate<R>>
    where
        R: Clone,
    {
        self.inner
            .run
            .try_borrow()
            .ok()
            .map(|run| run.result.clone())
    }

    fn event(&self, category: TraceCategory, name: &str) -> TraceEvent {
        TraceEvent::instant(platform::now_ms(), category, name).with_task(self.inner.id.0)
    }
}

impl<V: 'static, R: Clone + 'static, C: 'static> IterationTask<V, R, C> {
    /// Start the run
    ///
    /// Applies the first slice synchronously, then yields to the run loop
    /// every `step` elements. On exhaustion: the state becomes Complete, then
    /// `owner.completed(id, manual_override)` runs, then the callback, then
    /// `next(result)`. None of these run if an outside actor moves the task
    /// out of Active between slices.
    pub fn execute<O>(
        &self,
        owner: Rc<O>,
        next: impl FnOnce(Aggregate<R>) + 'static,
        manual_override: bool,
    ) -> IterResult<Execution<R>>
    where
        O: Owner<Origin = C> + 'static,
    {
        let state = self.state();
        if state != TaskState::Pending {
            kernel::with_tracer(|t| {
                t.iteration.reentries += 1;
                t.trace(
                    self.event(TraceCategory::Lifecycle, "reentry")
                        .with_detail(state.to_string()),
                );
            });
            return Ok(Execution::AlreadyRun(self.result()));
        }

        let context = match &self.inner.context {
            Some(context) => context.clone(),
            None => owner.origin().ok_or(IterError::MissingContext)?,
        };

        self.prepare(context.clone());
        self.inner.state.set(TaskState::Active);

        kernel::with_tracer(|t| {
            t.iteration.runs_started += 1;
            t.trace(
                self.event(TraceCategory::Lifecycle, "start").with_detail(format!(
                    "{} '{}' over {} elements, step {}",
                    self.kind(),
                    self.inner.config.name,
                    self.len(),
                    self.step()
                )),
            );
        });

        Driver {
            task: self.clone(),
            owner,
            context,
            next: Box::new(next),
            manual_override,
        }
        .slice();

        Ok(Execution::Started)
    }

    /// Fix the shape, seed the result, select the strategy
    fn prepare(&self, context: Rc<C>) {
        let inner = &self.inner;
        let shape = inner.list.shape();
        let mut run = inner.run.borrow_mut();
        let RunState {
            operation,
            iterator,
            keys,
            result,
            ..
        } = &mut *run;

        let keys = keys
            .get_or_insert_with(|| inner.list.keys().into())
            .clone();

        if inner.kind == IterationKind::Map {
            *result = Aggregate::seed(shape, inner.list.len());
        }

        if iterator.is_none()
            && let Some(operation) = operation.take()
        {
            let source = Source {
                list: inner.list.clone(),
                keys,
                context,
            };
            *iterator = Some(strategy::select(operation, shape, source));
        }
    }
}

impl<V, R, C> Task for IterationTask<V, R, C> {
    fn id(&self) -> TaskId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn state(&self) -> TaskState {
        self.inner.state.get()
    }

    fn handle(&self) -> TaskHandle {
        IterationTask::handle(self)
    }
}

impl<V, R, C> std::fmt::Debug for IterationTask<V, R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationTask")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .field("step", &self.inner.config.step)
            .field("len", &self.inner.list.len())
            .field("current_iteration", &self.current_iteration())
            .finish()
    }
}

/// How a slice ended
enum SliceEnd {
    Exhausted,
    /// Cursor reached a multiple of step
    Yield(usize),
}

/// Everything a run carries between turns
struct Driver<V, R, C, O> {
    task: IterationTask<V, R, C>,
    owner: Rc<O>,
    context: Rc<C>,
    next: Next<R>,
    manual_override: bool,
}

impl<V, R, C, O> Driver<V, R, C, O>
where
    V: 'static,
    R: Clone + 'static,
    C: 'static,
    O: Owner<Origin = C> + 'static,
{
    /// Apply effects until the collection is exhausted or the cursor hits a step boundary
    fn slice(self) {
        let inner = &self.task.inner;
        let len = inner.list.len();
        let step = inner.config.step;
        let start = platform::now_ms();
        let mut applied: u64 = 0;

        let end = {
            let mut run = inner.run.borrow_mut();
            let RunState {
                iterator, result, ..
            } = &mut *run;

            loop {
                let cursor = inner.current_iteration.get().unwrap_or(0);
                if cursor >= len {
                    break SliceEnd::Exhausted;
                }

                if let Some(effect) = iterator.as_mut() {
                    effect(cursor, result);
                }
                let cursor = cursor + 1;
                inner.current_iteration.set(Some(cursor));
                applied += 1;

                if cursor >= len {
                    break SliceEnd::Exhausted;
                }
                if cursor % step == 0 {
                    break SliceEnd::Yield(cursor);
                }
            }
        };

        let duration = platform::now_ms() - start;
        kernel::with_tracer(|t| {
            if applied == 0 {
                return;
            }
            t.iteration.elements += applied;
            t.iteration.slices.record(duration);
            if t.is_enabled() {
                t.trace(
                    self.task
                        .event(TraceCategory::Slice, "slice")
                        .with_detail(format!("{} elements", applied))
                        .with_duration(duration),
                );
            }
        });

        match end {
            SliceEnd::Exhausted => self.finalize(),
            SliceEnd::Yield(cursor) => self.yield_at(cursor),
        }
    }

    /// Hand the rest of the run to the scheduler
    fn yield_at(self, cursor: usize) {
        kernel::with_tracer(|t| {
            t.iteration.yields += 1;
            if t.is_enabled() {
                t.trace(
                    self.task
                        .event(TraceCategory::Slice, "yield")
                        .with_detail(format!("{}/{}", cursor, self.task.len())),
                );
            }
        });

        let scheduler = self.task.inner.scheduler.clone();
        let id = self.task.id();
        let priority = self.task.priority();
        scheduler.defer(id, priority, Box::new(move || self.resume()));
    }

    /// Continue after a yield, unless an outside actor stopped the task
    fn resume(self) {
        let state = self.task.state();
        if !state.is_runnable() {
            self.halt(state);
            return;
        }

        kernel::with_tracer(|t| t.trace(self.task.event(TraceCategory::Slice, "resume")));
        self.slice();
    }

    /// Stop silently: no finalization, `next` is dropped uncalled
    fn halt(self, state: TaskState) {
        let processed = self.task.current_iteration().unwrap_or(0);
        let len = self.task.len();

        kernel::with_tracer(|t| {
            t.iteration.runs_halted += 1;
            t.trace(
                self.task
                    .event(TraceCategory::Lifecycle, "halt")
                    .with_detail(format!("{} at {}/{}", state, processed, len)),
            );
        });
        console_log!(
            "[iterate] {} '{}' halted at {}/{} ({})",
            self.task.id(),
            self.task.inner.config.name,
            processed,
            len,
            state
        );
    }

    /// Complete, notify owner, run callback, hand the result to `next`
    fn finalize(self) {
        let Driver {
            task,
            owner,
            context,
            next,
            manual_override,
        } = self;

        task.inner.state.set(TaskState::Complete);
        owner.completed(task.id(), manual_override);

        let (callback, result) = {
            let mut run = task.inner.run.borrow_mut();
            (run.callback.take(), run.result.clone())
        };
        if let Some(callback) = callback {
            callback(&context, &result);
        }

        kernel::with_tracer(|t| {
            t.iteration.runs_completed += 1;
            t.trace(task.event(TraceCategory::Lifecycle, "complete"));
        });

        next(result);
    }
}

/// A `next` continuation paired with a receiver for async hosts
///
/// The receiver resolves with the final result, or is cancelled if the run
/// halts before finishing.
pub fn completion<R: 'static>() -> (
    impl FnOnce(Aggregate<R>) + 'static,
    oneshot::Receiver<Aggregate<R>>,
) {
    let (tx, rx) = oneshot::channel();
    let next = move |result: Aggregate<R>| {
        // Receiver may have been dropped; nothing to report to
        let _ = tx.send(result);
    };
    (next, rx)
}
