//! The task cell: the runtime record behind every task handle.
//!
//! A cell owns the suspended frame (a pinned, boxed future), the readiness
//! predicate or sub-task it is currently suspended on, the sticky
//! stop-request flag with its propagation list, and the logical strong
//! reference count that decides when the frame is destroyed.
//!
//! Handles share the cell through `Rc`; "weak" handles hold the same `Rc`
//! but do not participate in the logical count, so they observe the cell
//! without extending the frame's lifetime.

use crate::task::TaskStatus;
use crate::tracing_compat::trace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

#[cfg(feature = "capture-panics")]
use std::any::Any;

/// Readiness predicate re-checked by `resume` before stepping the frame.
pub(crate) type ReadyFn = Box<dyn FnMut() -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    Idle,
    Resuming,
    Destroyed,
}

pub(crate) struct TaskCell {
    state: Cell<CellState>,
    done: Cell<bool>,
    stop_requested: Cell<bool>,
    strong_refs: Cell<u32>,
    frame: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
    ready_fn: RefCell<Option<ReadyFn>>,
    sub_task: RefCell<Option<Rc<TaskCell>>>,
    stop_targets: RefCell<Vec<Weak<TaskCell>>>,
    #[cfg(feature = "capture-panics")]
    panic_slot: RefCell<Option<Box<dyn Any + Send>>>,
    #[cfg(feature = "task-debug")]
    debug: crate::task::debug::DebugInfo,
}

impl TaskCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Cell::new(CellState::Idle),
            done: Cell::new(false),
            stop_requested: Cell::new(false),
            strong_refs: Cell::new(0),
            frame: RefCell::new(None),
            ready_fn: RefCell::new(None),
            sub_task: RefCell::new(None),
            stop_targets: RefCell::new(Vec::new()),
            #[cfg(feature = "capture-panics")]
            panic_slot: RefCell::new(None),
            #[cfg(feature = "task-debug")]
            debug: crate::task::debug::DebugInfo::new(),
        }
    }

    pub(crate) fn install_frame(&self, frame: Pin<Box<dyn Future<Output = ()>>>) {
        *self.frame.borrow_mut() = Some(frame);
    }

    // ------------------------------------------------------------------
    // Status queries
    // ------------------------------------------------------------------

    pub(crate) fn is_done(&self) -> bool {
        self.done.get()
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.get()
    }

    // ------------------------------------------------------------------
    // Resume
    // ------------------------------------------------------------------

    /// Drives the cell one step.
    ///
    /// Order: any attached sub-task is resumed first (inheriting this cell's
    /// stop flag); then the readiness predicate gates the frame; finally the
    /// frame itself is stepped.
    ///
    /// # Panics
    ///
    /// Panics if called while the cell is already mid-resume.
    pub(crate) fn resume(self: &Rc<Self>) -> TaskStatus {
        assert!(
            self.state.get() != CellState::Resuming,
            "task resumed while it was already resuming"
        );
        if self.state.get() == CellState::Destroyed {
            return TaskStatus::Done;
        }
        self.state.set(CellState::Resuming);

        // A suspended sub-task is driven before (or instead of) this frame.
        let sub = self.sub_task.borrow().clone();
        if let Some(sub) = sub {
            if self.stop_requested.get() {
                sub.stop_requested.set(true);
            }
            if sub.resume() != TaskStatus::Done {
                self.state.set(CellState::Idle);
                return TaskStatus::Suspended;
            }
            self.sub_task.borrow_mut().take();
        }

        // Readiness gate: re-check without stepping the frame.
        let ready = self.ready_fn.borrow_mut().take();
        if let Some(mut pred) = ready {
            if !pred() {
                *self.ready_fn.borrow_mut() = Some(pred);
                self.state.set(CellState::Idle);
                return TaskStatus::Suspended;
            }
        }

        let status = if self.done.get() {
            TaskStatus::Done
        } else {
            self.step_frame()
        };
        if status == TaskStatus::Done {
            self.done.set(true);
        }
        self.state.set(CellState::Idle);
        status
    }

    /// Polls the frame once with a no-op waker.
    fn step_frame(&self) -> TaskStatus {
        let mut frame = match self.frame.borrow_mut().take() {
            Some(frame) => frame,
            None => return TaskStatus::Done,
        };
        let mut poll_cx = Context::from_waker(Waker::noop());

        #[cfg(feature = "capture-panics")]
        let polled = {
            use std::panic::{catch_unwind, AssertUnwindSafe};
            match catch_unwind(AssertUnwindSafe(|| frame.as_mut().poll(&mut poll_cx))) {
                Ok(polled) => polled,
                Err(payload) => {
                    crate::tracing_compat::error!("panic escaped a task body; captured");
                    *self.panic_slot.borrow_mut() = Some(payload);
                    // Dropping the frame destroys its locals and orphans the
                    // return slot.
                    drop(frame);
                    return TaskStatus::Done;
                }
            }
        };
        #[cfg(not(feature = "capture-panics"))]
        let polled = frame.as_mut().poll(&mut poll_cx);

        match polled {
            Poll::Ready(()) => TaskStatus::Done,
            Poll::Pending => {
                *self.frame.borrow_mut() = Some(frame);
                TaskStatus::Suspended
            }
        }
    }

    // ------------------------------------------------------------------
    // Kill
    // ------------------------------------------------------------------

    /// Destroys the frame and everything suspended under it.
    ///
    /// The sub-task is torn down first, then the frame is dropped, running
    /// the destructors of all frame locals. Safe to call repeatedly.
    ///
    /// # Panics
    ///
    /// Panics if called while the cell is mid-resume.
    pub(crate) fn kill(&self) {
        assert!(
            self.state.get() != CellState::Resuming,
            "task killed while it was resuming"
        );
        if self.state.get() != CellState::Idle {
            return;
        }
        trace!("killing task cell");
        self.done.set(true);
        let sub = self.sub_task.borrow_mut().take();
        if let Some(sub) = sub {
            sub.kill();
        }
        self.frame.borrow_mut().take();
        self.ready_fn.borrow_mut().take();
        self.state.set(CellState::Destroyed);
    }

    // ------------------------------------------------------------------
    // Stop requests
    // ------------------------------------------------------------------

    /// Sets the sticky stop flag and propagates the request to every live
    /// cell in the stop-propagation list, which is then cleared.
    pub(crate) fn request_stop(&self) {
        self.stop_requested.set(true);
        let targets = std::mem::take(&mut *self.stop_targets.borrow_mut());
        for target in targets {
            if let Some(cell) = target.upgrade() {
                cell.request_stop();
            }
        }
    }

    pub(crate) fn add_stop_target(&self, target: &Rc<TaskCell>) {
        if self.stop_requested.get() {
            target.request_stop();
        } else {
            self.stop_targets.borrow_mut().push(Rc::downgrade(target));
        }
    }

    pub(crate) fn remove_stop_target(&self, target: &Rc<TaskCell>) {
        let mut targets = self.stop_targets.borrow_mut();
        if let Some(pos) = targets
            .iter()
            .position(|held| held.as_ptr() == Rc::as_ptr(target))
        {
            targets.swap_remove(pos);
        }
    }

    // ------------------------------------------------------------------
    // Suspension plumbing (called from awaiter futures)
    // ------------------------------------------------------------------

    pub(crate) fn set_ready_fn(&self, pred: ReadyFn) {
        *self.ready_fn.borrow_mut() = Some(pred);
    }

    pub(crate) fn set_sub_task(&self, sub: Rc<TaskCell>) {
        *self.sub_task.borrow_mut() = Some(sub);
    }

    pub(crate) fn clear_sub_task(&self) {
        self.sub_task.borrow_mut().take();
    }

    // ------------------------------------------------------------------
    // Logical strong references
    // ------------------------------------------------------------------

    pub(crate) fn add_strong_ref(&self) {
        self.strong_refs.set(self.strong_refs.get() + 1);
    }

    /// Drops one logical reference; the frame is destroyed when the count
    /// reaches zero.
    pub(crate) fn remove_strong_ref(&self) {
        debug_assert!(self.strong_refs.get() > 0, "strong ref count underflow");
        let remaining = self.strong_refs.get().saturating_sub(1);
        self.strong_refs.set(remaining);
        if remaining == 0 {
            self.kill();
        }
    }

    // ------------------------------------------------------------------
    // Captured panics
    // ------------------------------------------------------------------

    #[cfg(feature = "capture-panics")]
    pub(crate) fn has_panic(&self) -> bool {
        self.panic_slot.borrow().is_some()
    }

    #[cfg(not(feature = "capture-panics"))]
    pub(crate) fn has_panic(&self) -> bool {
        false
    }

    /// Takes the captured panic payload, if any. Each payload can be
    /// rethrown once.
    #[cfg(feature = "capture-panics")]
    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic_slot.borrow_mut().take()
    }

    // ------------------------------------------------------------------
    // Debug names
    // ------------------------------------------------------------------

    #[cfg(feature = "task-debug")]
    pub(crate) fn set_debug_name(&self, name: &'static str) {
        self.debug.name.set(name);
    }

    #[cfg(feature = "task-debug")]
    pub(crate) fn set_debug_data_fn(&self, data_fn: Box<dyn Fn() -> String>) {
        *self.debug.data_fn.borrow_mut() = Some(data_fn);
    }

    /// `name`, or `name [data]` while the task is live and has a data
    /// producer.
    #[cfg(feature = "task-debug")]
    pub(crate) fn debug_name(&self) -> String {
        let name = self.debug.name.get();
        let data_fn = self.debug.data_fn.borrow();
        match &*data_fn {
            Some(data) if !self.done.get() => format!("{name} [{}]", data()),
            _ => name.to_string(),
        }
    }

    /// The chain `cell -> sub-task -> sub-sub-task -> ...`.
    #[cfg(feature = "task-debug")]
    pub(crate) fn debug_stack(&self) -> String {
        let sub = self.sub_task.borrow().clone();
        match sub {
            Some(sub) => format!("{} -> {}", self.debug_name(), sub.debug_stack()),
            None => self.debug_name(),
        }
    }
}

// ----------------------------------------------------------------------
// Return slot
// ----------------------------------------------------------------------

#[derive(Debug)]
enum RetState<T> {
    Unset,
    Set(T),
    Taken,
    Orphaned,
}

/// Typed return-value slot shared between the strong handles and the frame.
///
/// State machine: `Unset -> Set -> Taken` on the happy path, or
/// `Unset -> Orphaned` when the frame is destroyed before completing.
#[derive(Debug)]
pub(crate) struct RetSlot<T> {
    state: RefCell<RetState<T>>,
}

impl<T> RetSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(RetState::Unset),
        }
    }

    fn set(&self, value: T) {
        let mut state = self.state.borrow_mut();
        match &*state {
            RetState::Unset => *state = RetState::Set(value),
            RetState::Set(_) => panic!("task return value set twice"),
            RetState::Taken => panic!("task return value set after it was taken"),
            RetState::Orphaned => panic!("task return value set after it was orphaned"),
        }
    }

    /// Takes the value if it is set. Returns `None` while the task has not
    /// completed.
    ///
    /// # Panics
    ///
    /// Panics if the value was already taken, or if it was orphaned (the
    /// task ended without producing one).
    pub(crate) fn take(&self) -> Option<T> {
        let mut state = self.state.borrow_mut();
        match std::mem::replace(&mut *state, RetState::Taken) {
            RetState::Set(value) => Some(value),
            RetState::Unset => {
                *state = RetState::Unset;
                None
            }
            RetState::Taken => panic!("task return value taken twice"),
            RetState::Orphaned => {
                panic!("task return value will never be set (task ended prematurely)")
            }
        }
    }

    fn orphan_if_unset(&self) {
        let mut state = self.state.borrow_mut();
        if matches!(&*state, RetState::Unset) {
            *state = RetState::Orphaned;
        }
    }
}

// ----------------------------------------------------------------------
// Frame wrapper
// ----------------------------------------------------------------------

/// Adapts the user's typed future to the cell's untyped frame.
///
/// On completion the output is moved into the return slot; on destruction
/// before completion the slot is marked orphaned.
pub(crate) struct Frame<T> {
    fut: Pin<Box<dyn Future<Output = T>>>,
    slot: Rc<RetSlot<T>>,
}

impl<T> Frame<T> {
    pub(crate) fn new(fut: Pin<Box<dyn Future<Output = T>>>, slot: Rc<RetSlot<T>>) -> Self {
        Self { fut, slot }
    }
}

impl<T> Future for Frame<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let frame = self.get_mut();
        match frame.fut.as_mut().poll(cx) {
            Poll::Ready(value) => {
                frame.slot.set(value);
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Frame<T> {
    fn drop(&mut self) {
        self.slot.orphan_if_unset();
    }
}
