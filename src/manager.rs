//! The task manager: an ordered collection of running tasks resumed once
//! per tick.
//!
//! # Running tasks
//!
//! [`TaskManager::run`] moves a task in and returns a strong
//! [`TaskHandle`]; the caller owns the task's lifetime, and dropping every
//! strong handle kills it. [`TaskManager::run_managed`] instead pins the
//! task inside the manager ("fire-and-forget") and returns a weak observer.
//!
//! # Order of execution
//!
//! Resume order within [`TaskManager::update`] is stable: the first task
//! run on a manager stays the first to resume, regardless of how many
//! tasks are added or finish in the meantime. Tasks run during an update
//! join at the tail and are first resumed on the *next* update.
//!
//! # Integration
//!
//! The typical host owns one manager per tick source:
//!
//! ```
//! use cotask::{Task, TaskManager};
//!
//! let manager = TaskManager::new();
//! let forever: Task<()> = Task::new(|cx| async move {
//!     loop {
//!         cx.suspend().await;
//!     }
//! });
//! let counter = manager.run_managed(forever);
//! manager.update(); // once per host tick
//! assert!(!counter.is_done());
//! manager.kill_all();
//! assert!(counter.is_done());
//! ```

use crate::task::{Task, TaskHandle, TaskStatus, WeakTask, WeakTaskHandle};
use crate::tracing_compat::trace;
use std::cell::RefCell;

/// Ordered collection of running tasks with stable resume order.
///
/// All methods take `&self`; tasks resumed by an update may run and stop
/// tasks on the same manager.
#[derive(Default)]
pub struct TaskManager {
    roster: RefCell<Vec<WeakTask>>,
    retain: RefCell<Vec<TaskHandle<()>>>,
}

impl TaskManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs an unmanaged task.
    ///
    /// The returned handle is the task's lifeline: when the last strong
    /// handle to the task is dropped, the task is killed and swept from the
    /// manager.
    #[must_use = "dropping the handle kills the task; use run_managed for fire-and-forget tasks"]
    pub fn run<T: 'static>(&self, task: Task<T>) -> TaskHandle<T> {
        let handle = task.handle();
        self.roster.borrow_mut().push(task.into_weak());
        handle
    }

    /// Runs a managed ("fire-and-forget") task: the manager keeps it alive
    /// until it finishes or something kills it explicitly.
    ///
    /// The returned weak handle observes the task and can request a stop or
    /// kill it, but does not affect its lifetime.
    pub fn run_managed<T: 'static>(&self, task: Task<T>) -> WeakTaskHandle {
        let weak = task.weak_handle();
        let pinned = self.run(task).into_void();
        self.retain.borrow_mut().push(pinned);
        weak
    }

    /// Returns the number of tasks currently in the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roster.borrow().len()
    }

    /// Returns whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roster.borrow().is_empty()
    }

    /// Kills every task, managed and unmanaged.
    pub fn kill_all(&self) {
        trace!("killing all managed tasks");
        // Drain first: the kill cascades run user drop code that may touch
        // this manager again.
        let tasks: Vec<WeakTask> = self.roster.borrow_mut().drain(..).collect();
        drop(tasks);
        let handles: Vec<TaskHandle<()>> = self.retain.borrow_mut().drain(..).collect();
        drop(handles);
    }

    /// Issues a stop request to every task and returns a fence task that
    /// completes once all of them have terminated.
    ///
    /// The fence holds only weak handles; it does not keep anything alive.
    #[must_use = "the returned fence task reports when all tasks have stopped"]
    pub fn stop_all(&self) -> Task<()> {
        let mut stopped = Vec::new();
        for task in self.roster.borrow().iter() {
            task.request_stop();
            stopped.push(task.weak_handle());
        }
        trace!(count = stopped.len(), "stop requested for all tasks");
        Task::new(move |cx| async move {
            crate::task_name!(cx, "StopAllFence");
            for handle in stopped {
                cx.done(handle).await;
            }
        })
    }

    /// Resumes every live task exactly once, in insertion order, then sweeps
    /// finished tasks out of the roster and the managed retain set.
    pub fn update(&self) {
        // Tasks run during this update land beyond `initial` and are not
        // resumed until the next one.
        let initial = self.roster.borrow().len();
        for idx in 0..initial {
            let mut task = {
                let mut roster = self.roster.borrow_mut();
                std::mem::replace(&mut roster[idx], WeakTask::invalid())
            };
            // The roster borrow is released while the task runs so the task
            // may run/stop tasks on this manager.
            if task.resume() != TaskStatus::Done {
                let mut roster = self.roster.borrow_mut();
                // kill_all during the update leaves nothing to restore into.
                if idx < roster.len() {
                    roster[idx] = task;
                }
            }
        }
        // Swept entries are already dead; dropping them runs no user code.
        self.roster.borrow_mut().retain(|task| !task.is_done());
        self.retain.borrow_mut().retain(|handle| !handle.is_done());
    }

    /// Returns a newline-separated debug stack of every live task.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let stacks: Vec<String> = self
            .roster
            .borrow()
            .iter()
            .filter(|task| !task.is_done())
            .map(WeakTask::debug_stack)
            .collect();
        stacks.join("\n")
    }
}
