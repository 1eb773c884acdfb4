//! The task handle family.
//!
//! A live task is referenced through exactly one *resumable* handle and any
//! number of non-resumable ones. Handles differ along two independent axes,
//! reference strength and resumability:
//!
//! | Handle             | Ref strength | Resumable? | Return value |
//! |--------------------|--------------|------------|--------------|
//! | [`Task<T>`]        | strong       | yes        | yes          |
//! | [`WeakTask`]       | weak         | yes        | no           |
//! | [`TaskHandle<T>`]  | strong       | no         | yes          |
//! | [`WeakTaskHandle`] | weak         | no         | no           |
//!
//! Conversions only ever *drop* capabilities (resumability, strength, typed
//! return access), never restore them.
//!
//! # Single-resumer rule
//!
//! [`Task<T>`] and [`WeakTask`] are move-only: they do not implement
//! `Clone`, so at most one resumable handle to a given task can exist. When
//! that handle is dropped while the task is still live, the task is killed
//! immediately: a suspended task with no way to ever be resumed again
//! would deadlock everything awaiting it.
//!
//! # Lifetime
//!
//! The frame (the suspended body with all its locals) lives while at least
//! one strong handle exists *and* the resumable handle is alive. Weak
//! handles observe without extending the lifetime; once the task dies, all
//! their queries degrade to "done".

use crate::task::cell::{Frame, RetSlot, TaskCell};
use crate::task::cx::TaskCx;
use crate::task::TaskStatus;
use crate::time::TaskTime;
use core::fmt;
use std::future::Future;
use std::rc::Rc;

pub(crate) mod sealed {
    use crate::task::cell::TaskCell;
    use std::rc::Rc;

    pub trait CellRef {
        fn cell(&self) -> Option<&Rc<TaskCell>>;
    }
}

/// Implemented by all four task handle shapes; used by operations that only
/// need to reference a task, such as stop-propagation registration.
///
/// This trait is sealed and cannot be implemented outside the crate.
pub trait TaskRef: sealed::CellRef {}

// ----------------------------------------------------------------------
// Task<T>
// ----------------------------------------------------------------------

/// The resumable, strong handle to a task, and the return type of every
/// task constructor.
///
/// Move-only. Dropping it kills the task (see the module docs).
pub struct Task<T = ()> {
    cell: Option<Rc<TaskCell>>,
    slot: Option<Rc<RetSlot<T>>>,
}

impl<T: 'static> Task<T> {
    /// Creates a task from a body closure.
    ///
    /// The body receives a [`TaskCx`] through which it reaches every
    /// suspension primitive. The frame does not run until the first
    /// [`resume`](Task::resume).
    ///
    /// ```
    /// use cotask::{Task, TaskStatus};
    ///
    /// let mut task = Task::new(|cx| async move {
    ///     cx.suspend().await;
    ///     21 * 2
    /// });
    /// assert_eq!(task.resume(), TaskStatus::Suspended);
    /// assert_eq!(task.resume(), TaskStatus::Done);
    /// assert_eq!(task.take_return_value(), Some(42));
    /// ```
    #[must_use]
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(TaskCx) -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        let cell = Rc::new(TaskCell::new());
        let cx = TaskCx::new(Rc::downgrade(&cell));
        let fut = body(cx);
        Self::from_parts(cell, Box::pin(fut))
    }

    /// Wraps a plain future as a task.
    ///
    /// The future is polled once per resume. Without a [`TaskCx`] it cannot
    /// register readiness predicates or sub-tasks, so it is re-polled every
    /// tick until it completes.
    #[must_use]
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = T> + 'static,
    {
        Self::from_parts(Rc::new(TaskCell::new()), Box::pin(fut))
    }

    fn from_parts(cell: Rc<TaskCell>, fut: std::pin::Pin<Box<dyn Future<Output = T>>>) -> Self {
        let slot = Rc::new(RetSlot::new());
        cell.install_frame(Box::pin(Frame::new(fut, slot.clone())));
        cell.add_strong_ref();
        Self {
            cell: Some(cell),
            slot: Some(slot),
        }
    }

    /// Creates an invalid handle referencing no task.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            cell: None,
            slot: None,
        }
    }

    /// Returns whether this handle references a task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cell.is_some()
    }

    /// Returns whether the task has terminated. Invalid handles report
    /// `true`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_done())
    }

    /// Returns whether a stop request has been issued for the task.
    /// Invalid handles report `true`.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_stop_requested())
    }

    /// Asks the task to terminate gracefully as soon as possible.
    ///
    /// Advisory and sticky; the request propagates to sub-tasks and
    /// registered stop targets.
    pub fn request_stop(&self) {
        if let Some(cell) = &self.cell {
            cell.request_stop();
        }
    }

    /// Immediately destroys the task's frame and all of its locals.
    pub fn kill(&self) {
        if let Some(cell) = &self.cell {
            cell.kill();
        }
    }

    /// Resumes the task, driving it to its next suspension point.
    pub fn resume(&mut self) -> TaskStatus {
        match &self.cell {
            Some(cell) => cell.resume(),
            None => TaskStatus::Done,
        }
    }

    /// Attempts to take the task's return value.
    ///
    /// Returns `None` while the task has not completed. The value can be
    /// taken exactly once.
    ///
    /// # Panics
    ///
    /// Panics on an invalid handle, if the value was already taken, or if
    /// the task died without producing one.
    pub fn take_return_value(&self) -> Option<T> {
        assert!(
            self.cell.is_some(),
            "tried to take a return value from an invalid handle"
        );
        match &self.slot {
            Some(slot) => slot.take(),
            None => panic!("void-erased handles do not carry a return value"),
        }
    }

    /// Returns whether the task ended with a captured panic.
    #[must_use]
    pub fn has_panic(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.has_panic())
    }

    /// Resumes unwinding of a captured panic, if one is stored.
    pub fn rethrow_panic(&self) {
        #[cfg(feature = "capture-panics")]
        if let Some(cell) = &self.cell {
            if let Some(payload) = cell.take_panic() {
                std::panic::resume_unwind(payload);
            }
        }
    }

    // ------------------------------------------------------------------
    // Conversions (capability-dropping only)
    // ------------------------------------------------------------------

    /// Returns a strong, non-resumable handle to the same task.
    #[must_use]
    pub fn handle(&self) -> TaskHandle<T> {
        if let Some(cell) = &self.cell {
            cell.add_strong_ref();
        }
        TaskHandle {
            cell: self.cell.clone(),
            slot: self.slot.clone(),
        }
    }

    /// Returns a weak, non-resumable handle to the same task.
    #[must_use]
    pub fn weak_handle(&self) -> WeakTaskHandle {
        WeakTaskHandle {
            cell: self.cell.clone(),
        }
    }

    /// Converts this handle into the weak resumable form, giving up the
    /// strong reference.
    ///
    /// If no other strong handle exists, the task is killed on the spot;
    /// callers are expected to have pinned a [`TaskHandle`] first.
    #[must_use]
    pub fn into_weak(mut self) -> WeakTask {
        let cell = self.cell.take();
        self.slot.take();
        if let Some(cell) = &cell {
            cell.remove_strong_ref();
        }
        WeakTask { cell }
    }

    /// Erases the return type, yielding a task that completes when this one
    /// does and discards its value.
    #[must_use]
    pub fn into_void(self) -> Task<()> {
        if !self.is_valid() {
            return Task::invalid();
        }
        Task::new(move |cx| async move {
            crate::task_name!(cx, "Erased");
            let _ = cx.join(self).await;
        })
    }

    // ------------------------------------------------------------------
    // Cancellation wrappers
    // ------------------------------------------------------------------

    /// Wraps this task so it is killed as soon as `cancel_fn` returns true.
    ///
    /// The wrapper yields `None` if the task was canceled, `Some(value)`
    /// otherwise.
    #[must_use]
    pub fn cancel_if(self, cancel_fn: impl FnMut() -> bool + 'static) -> Task<Option<T>> {
        crate::awaiters::cancel_if(self, cancel_fn)
    }

    /// Wraps this task so it is killed as soon as a stop request reaches
    /// the wrapper.
    #[must_use]
    pub fn cancel_if_stop_requested(self) -> Task<Option<T>> {
        crate::awaiters::cancel_if_stop_requested(self)
    }

    /// Wraps this task so a stop request is issued to it when `cancel_fn`
    /// first returns true; the task then keeps running until it finishes on
    /// its own.
    #[must_use]
    pub fn stop_if(self, cancel_fn: impl FnMut() -> bool + 'static) -> Task<Option<T>> {
        crate::awaiters::stop_if(self, cancel_fn)
    }

    /// Like [`stop_if`](Task::stop_if), but once the stop is issued the
    /// task is killed if it has not finished within `timeout_after` in the
    /// given time stream.
    #[must_use]
    pub fn stop_if_with_timeout(
        self,
        cancel_fn: impl FnMut() -> bool + 'static,
        timeout_after: TaskTime,
        time_fn: impl Fn() -> TaskTime + 'static,
    ) -> Task<Option<T>> {
        crate::awaiters::stop_if_with_timeout(self, cancel_fn, timeout_after, time_fn)
    }

    // ------------------------------------------------------------------
    // Debug
    // ------------------------------------------------------------------

    /// Returns this task's debug name (set with [`task_name!`](crate::task_name)).
    #[must_use]
    pub fn debug_name(&self) -> String {
        debug_name_impl(&self.cell, "[empty task]")
    }

    /// Returns this task's debug stack: the chain of names down the
    /// sub-task chain.
    #[must_use]
    pub fn debug_stack(&self) -> String {
        debug_stack_impl(&self.cell, "[empty task]")
    }

    pub(crate) fn cell(&self) -> Option<&Rc<TaskCell>> {
        self.cell.as_ref()
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.remove_strong_ref();
            // A task that can never be resumed again is killed on the spot.
            cell.kill();
        }
    }
}

impl<T: 'static> Default for Task<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("valid", &self.cell.is_some())
            .field(
                "done",
                &self.cell.as_ref().map_or(true, |c| c.is_done()),
            )
            .finish()
    }
}

// ----------------------------------------------------------------------
// TaskHandle<T>
// ----------------------------------------------------------------------

/// Strong, non-resumable handle: keeps the task alive, can kill it, observe
/// it, and take its return value, but cannot resume it.
pub struct TaskHandle<T = ()> {
    cell: Option<Rc<TaskCell>>,
    slot: Option<Rc<RetSlot<T>>>,
}

impl<T: 'static> TaskHandle<T> {
    /// Creates an invalid handle referencing no task.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            cell: None,
            slot: None,
        }
    }

    /// Returns whether this handle references a task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cell.is_some()
    }

    /// Returns whether the task has terminated. Invalid handles report
    /// `true`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_done())
    }

    /// Returns whether a stop request has been issued for the task.
    /// Invalid handles report `true`.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_stop_requested())
    }

    /// Asks the task to terminate gracefully as soon as possible.
    pub fn request_stop(&self) {
        if let Some(cell) = &self.cell {
            cell.request_stop();
        }
    }

    /// Immediately destroys the task's frame and all of its locals.
    pub fn kill(&self) {
        if let Some(cell) = &self.cell {
            cell.kill();
        }
    }

    /// Attempts to take the task's return value.
    ///
    /// Same contract as [`Task::take_return_value`].
    pub fn take_return_value(&self) -> Option<T> {
        assert!(
            self.cell.is_some(),
            "tried to take a return value from an invalid handle"
        );
        match &self.slot {
            Some(slot) => slot.take(),
            None => panic!("void-erased handles do not carry a return value"),
        }
    }

    /// Returns whether the task ended with a captured panic.
    #[must_use]
    pub fn has_panic(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.has_panic())
    }

    /// Resumes unwinding of a captured panic, if one is stored.
    pub fn rethrow_panic(&self) {
        #[cfg(feature = "capture-panics")]
        if let Some(cell) = &self.cell {
            if let Some(payload) = cell.take_panic() {
                std::panic::resume_unwind(payload);
            }
        }
    }

    /// Returns a weak, non-resumable handle to the same task.
    #[must_use]
    pub fn weak_handle(&self) -> WeakTaskHandle {
        WeakTaskHandle {
            cell: self.cell.clone(),
        }
    }

    /// Erases the return type. The erased handle keeps the task alive but
    /// no longer exposes its return value.
    #[must_use]
    pub fn into_void(mut self) -> TaskHandle<()> {
        TaskHandle {
            // The strong reference carries over unchanged.
            cell: self.cell.take(),
            slot: None,
        }
    }

    /// Returns this task's debug name.
    #[must_use]
    pub fn debug_name(&self) -> String {
        debug_name_impl(&self.cell, "[empty task handle]")
    }

    /// Returns this task's debug stack.
    #[must_use]
    pub fn debug_stack(&self) -> String {
        debug_stack_impl(&self.cell, "[empty task handle]")
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        if let Some(cell) = &self.cell {
            cell.add_strong_ref();
        }
        Self {
            cell: self.cell.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.remove_strong_ref();
        }
    }
}

impl<T: 'static> Default for TaskHandle<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("valid", &self.cell.is_some())
            .field(
                "done",
                &self.cell.as_ref().map_or(true, |c| c.is_done()),
            )
            .finish()
    }
}

// ----------------------------------------------------------------------
// WeakTask
// ----------------------------------------------------------------------

/// Weak, resumable handle: drives the task without keeping it alive.
///
/// Move-only, like [`Task`]. Dropping it kills the task.
pub struct WeakTask {
    cell: Option<Rc<TaskCell>>,
}

impl WeakTask {
    /// Creates an invalid handle referencing no task.
    #[must_use]
    pub fn invalid() -> Self {
        Self { cell: None }
    }

    /// Returns whether this handle references a task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cell.is_some()
    }

    /// Returns whether the task has terminated. Invalid handles report
    /// `true`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_done())
    }

    /// Returns whether a stop request has been issued for the task.
    /// Invalid handles report `true`.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_stop_requested())
    }

    /// Asks the task to terminate gracefully as soon as possible.
    pub fn request_stop(&self) {
        if let Some(cell) = &self.cell {
            cell.request_stop();
        }
    }

    /// Immediately destroys the task's frame and all of its locals.
    pub fn kill(&self) {
        if let Some(cell) = &self.cell {
            cell.kill();
        }
    }

    /// Resumes the task, driving it to its next suspension point.
    pub fn resume(&mut self) -> TaskStatus {
        match &self.cell {
            Some(cell) => cell.resume(),
            None => TaskStatus::Done,
        }
    }

    /// Returns a weak, non-resumable handle to the same task.
    #[must_use]
    pub fn weak_handle(&self) -> WeakTaskHandle {
        WeakTaskHandle {
            cell: self.cell.clone(),
        }
    }

    /// Returns this task's debug name.
    #[must_use]
    pub fn debug_name(&self) -> String {
        debug_name_impl(&self.cell, "[empty task]")
    }

    /// Returns this task's debug stack.
    #[must_use]
    pub fn debug_stack(&self) -> String {
        debug_stack_impl(&self.cell, "[empty task]")
    }
}

impl Drop for WeakTask {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.kill();
        }
    }
}

impl Default for WeakTask {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for WeakTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTask")
            .field("valid", &self.cell.is_some())
            .field(
                "done",
                &self.cell.as_ref().map_or(true, |c| c.is_done()),
            )
            .finish()
    }
}

// ----------------------------------------------------------------------
// WeakTaskHandle
// ----------------------------------------------------------------------

/// Weak, non-resumable handle: pure observer. Any handle shape converts to
/// this one.
#[derive(Clone)]
pub struct WeakTaskHandle {
    cell: Option<Rc<TaskCell>>,
}

impl WeakTaskHandle {
    /// Creates an invalid handle referencing no task.
    #[must_use]
    pub fn invalid() -> Self {
        Self { cell: None }
    }

    /// Returns whether this handle references a task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cell.is_some()
    }

    /// Returns whether the task has terminated. Invalid handles report
    /// `true`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_done())
    }

    /// Returns whether a stop request has been issued for the task.
    /// Invalid handles report `true`.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.cell.as_ref().map_or(true, |c| c.is_stop_requested())
    }

    /// Asks the task to terminate gracefully as soon as possible.
    pub fn request_stop(&self) {
        if let Some(cell) = &self.cell {
            cell.request_stop();
        }
    }

    /// Immediately destroys the task's frame and all of its locals.
    pub fn kill(&self) {
        if let Some(cell) = &self.cell {
            cell.kill();
        }
    }

    /// Returns this task's debug name.
    #[must_use]
    pub fn debug_name(&self) -> String {
        debug_name_impl(&self.cell, "[empty task handle]")
    }

    /// Returns this task's debug stack.
    #[must_use]
    pub fn debug_stack(&self) -> String {
        debug_stack_impl(&self.cell, "[empty task handle]")
    }
}

impl Default for WeakTaskHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for WeakTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTaskHandle")
            .field("valid", &self.cell.is_some())
            .field(
                "done",
                &self.cell.as_ref().map_or(true, |c| c.is_done()),
            )
            .finish()
    }
}

// ----------------------------------------------------------------------
// Shared plumbing
// ----------------------------------------------------------------------

#[cfg(feature = "task-debug")]
fn debug_name_impl(cell: &Option<Rc<TaskCell>>, empty: &str) -> String {
    match cell {
        Some(cell) => cell.debug_name(),
        None => empty.to_string(),
    }
}

#[cfg(not(feature = "task-debug"))]
fn debug_name_impl(_cell: &Option<Rc<TaskCell>>, _empty: &str) -> String {
    String::new()
}

#[cfg(feature = "task-debug")]
fn debug_stack_impl(cell: &Option<Rc<TaskCell>>, empty: &str) -> String {
    match cell {
        Some(cell) => cell.debug_stack(),
        None => empty.to_string(),
    }
}

#[cfg(not(feature = "task-debug"))]
fn debug_stack_impl(_cell: &Option<Rc<TaskCell>>, _empty: &str) -> String {
    String::new()
}

impl<T: 'static> sealed::CellRef for Task<T> {
    fn cell(&self) -> Option<&Rc<TaskCell>> {
        self.cell.as_ref()
    }
}
impl<T: 'static> TaskRef for Task<T> {}

impl<T: 'static> sealed::CellRef for TaskHandle<T> {
    fn cell(&self) -> Option<&Rc<TaskCell>> {
        self.cell.as_ref()
    }
}
impl<T: 'static> TaskRef for TaskHandle<T> {}

impl sealed::CellRef for WeakTask {
    fn cell(&self) -> Option<&Rc<TaskCell>> {
        self.cell.as_ref()
    }
}
impl TaskRef for WeakTask {}

impl sealed::CellRef for WeakTaskHandle {
    fn cell(&self) -> Option<&Rc<TaskCell>> {
        self.cell.as_ref()
    }
}
impl TaskRef for WeakTaskHandle {}
