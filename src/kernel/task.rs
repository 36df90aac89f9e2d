//! Task abstraction
//!
//! A task is the unit of scheduled work. This module holds the minimal
//! capability set every task shares: an identity, a lifecycle state that
//! outside actors can observe and change, and the owner contract through which
//! a finished task reports back.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Constructed, not yet executed
    #[default]
    Pending,
    /// Executing, including while suspended between deferred turns
    Active,
    /// Finished (naturally, or forced by an outside actor)
    Complete,
    /// Stopped by an outside actor before finishing
    Cancelled,
}

impl TaskState {
    /// Whether a suspended run may continue in this state
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Active)
    }

    /// Complete or Cancelled
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Active => write!(f, "active"),
            TaskState::Complete => write!(f, "complete"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Shared, observable lifecycle state of one task
///
/// The task and every handle to it see the same cell.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Rc<Cell<TaskState>>);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> TaskState {
        self.0.get()
    }

    pub fn set(&self, state: TaskState) {
        self.0.set(state);
    }
}

/// External control surface of a task
///
/// Cheap to clone. Outside actors (a scheduler, a task group, a user) use it
/// to observe the task and to stop it between slices.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    state: StateCell,
}

impl TaskHandle {
    pub fn new(id: TaskId, state: StateCell) -> Self {
        Self { id, state }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Cancel the task. Takes effect at the next resumed slice.
    ///
    /// Returns false if the task already reached a terminal state.
    pub fn cancel(&self) -> bool {
        if self.state.get().is_runnable() {
            self.state.set(TaskState::Cancelled);
            true
        } else {
            false
        }
    }

    /// Mark the task Complete from outside, without running its finalization.
    ///
    /// The caller takes over whatever completion semantics it needs.
    pub fn supersede(&self) -> bool {
        if self.state.get().is_runnable() {
            self.state.set(TaskState::Complete);
            true
        } else {
            false
        }
    }
}

/// The Task trait - what every schedulable task exposes
pub trait Task {
    fn id(&self) -> TaskId;

    /// Human-readable name for this task
    fn name(&self) -> &str;

    fn state(&self) -> TaskState;

    /// A handle outside actors can keep after the task moves into the scheduler
    fn handle(&self) -> TaskHandle;
}

/// The enclosing scheduler or container, notified when a task finishes
pub trait Owner {
    /// Default call context handed to element functions
    type Origin;

    /// Called exactly once when a task finishes naturally.
    ///
    /// `manual_override` is forwarded verbatim from `execute`.
    fn completed(&self, task: TaskId, manual_override: bool);

    /// Context used when a task has none of its own
    fn origin(&self) -> Option<Rc<Self::Origin>> {
        None
    }
}

/// A group of related tasks sharing one owner
///
/// Task groups enable collective management:
/// - Provide a default call context (origin) to every member
/// - Cancel all running members at once
/// - Record completions in the order they arrive
#[derive(Debug)]
pub struct TaskGroup<C> {
    origin: Option<Rc<C>>,
    /// Members by ID
    tasks: RefCell<BTreeMap<TaskId, TaskHandle>>,
    /// (task, manual_override) in completion order
    completions: RefCell<Vec<(TaskId, bool)>>,
}

impl<C> TaskGroup<C> {
    /// Create a group without an origin
    pub fn new() -> Self {
        Self {
            origin: None,
            tasks: RefCell::new(BTreeMap::new()),
            completions: RefCell::new(Vec::new()),
        }
    }

    /// Create a group whose origin is the default context for its members
    pub fn with_origin(origin: C) -> Self {
        Self {
            origin: Some(Rc::new(origin)),
            ..Self::new()
        }
    }

    /// Add a task to this group
    pub fn register(&self, task: &dyn Task) {
        self.tasks.borrow_mut().insert(task.id(), task.handle());
    }

    /// Check if a task belongs to this group
    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.borrow().contains_key(&task)
    }

    /// Number of member tasks
    pub fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Members that are pending or mid-run
    pub fn running(&self) -> Vec<TaskId> {
        self.tasks
            .borrow()
            .values()
            .filter(|h| h.state().is_runnable())
            .map(TaskHandle::id)
            .collect()
    }

    /// Cancel every member that has not finished, returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        self.tasks
            .borrow()
            .values()
            .filter(|h| h.cancel())
            .count()
    }

    /// Whether the owner has been told this task completed
    pub fn is_complete(&self, task: TaskId) -> bool {
        self.completions.borrow().iter().any(|(id, _)| *id == task)
    }

    /// Completion notifications received so far
    pub fn completions(&self) -> Vec<(TaskId, bool)> {
        self.completions.borrow().clone()
    }
}

impl<C> Default for TaskGroup<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Owner for TaskGroup<C> {
    type Origin = C;

    fn completed(&self, task: TaskId, manual_override: bool) {
        self.completions.borrow_mut().push((task, manual_override));
    }

    fn origin(&self) -> Option<Rc<C>> {
        self.origin.clone()
    }
}
