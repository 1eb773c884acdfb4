//! The task context: how a task body reaches its suspension primitives.
//!
//! Every task body receives a [`TaskCx`], a cheap, cloneable capability
//! tied to the task's cell. All suspension happens through it:
//!
//! ```
//! use cotask::{Task, TaskStatus};
//!
//! let mut task = Task::new(|cx| async move {
//!     cx.suspend().await;                      // yield for one tick
//!     cx.until(|| true).await;                 // wait for a predicate
//!     let sub = Task::new(|_| async { 7 });
//!     cx.join(sub).await                       // await a sub-task
//! });
//! while task.resume() != TaskStatus::Done {}
//! assert_eq!(task.take_return_value(), Some(7));
//! ```
//!
//! The non-suspending operations (stop-flag queries, stop-target
//! registration, debug naming) are plain methods.

use crate::error::RecvError;
use crate::task::cell::TaskCell;
use crate::task::handle::{Task, TaskRef, WeakTaskHandle};
use crate::task::TaskStatus;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::task::{Context, Poll};

/// Capability handed to a task body for suspending and for interacting with
/// the task's own cell.
///
/// Cloning is cheap; clones refer to the same task.
#[derive(Clone)]
pub struct TaskCx {
    cell: Weak<TaskCell>,
}

impl TaskCx {
    pub(crate) fn new(cell: Weak<TaskCell>) -> Self {
        Self { cell }
    }

    // ------------------------------------------------------------------
    // Suspending operations
    // ------------------------------------------------------------------

    /// Suspends unconditionally until the next resume.
    #[must_use = "futures do nothing unless awaited"]
    pub fn suspend(&self) -> Suspend {
        Suspend { yielded: false }
    }

    /// Suspends until `pred` returns true.
    ///
    /// The predicate is re-checked on every resume *without* stepping the
    /// frame; if it is already true at the await point, the task does not
    /// suspend at all.
    #[must_use = "futures do nothing unless awaited"]
    pub fn until(&self, pred: impl FnMut() -> bool + 'static) -> Until {
        Until {
            cell: self.cell.clone(),
            pred: Some(Box::new(pred)),
        }
    }

    /// Suspends until `pred` returns false.
    #[must_use = "futures do nothing unless awaited"]
    pub fn until_not(&self, mut pred: impl FnMut() -> bool + 'static) -> Until {
        self.until(move || !pred())
    }

    /// Takes ownership of `task` and awaits it as this task's sub-task.
    ///
    /// The sub-task is resumed transitively whenever this task is resumed,
    /// inherits this task's stop flag, and its return value (or captured
    /// panic) is produced when the await completes. If this task is killed
    /// while waiting, the sub-task is killed with it.
    ///
    /// # Panics
    ///
    /// Panics if `task` is an invalid handle, or (on completion of the
    /// await) if the sub-task died without producing a value.
    #[must_use = "futures do nothing unless awaited"]
    pub fn join<T: 'static>(&self, task: Task<T>) -> Join<T> {
        Join {
            cell: self.cell.clone(),
            task: Some(task),
            registered: false,
        }
    }

    /// Suspends until the task behind `handle` is done.
    ///
    /// Unlike [`join`](TaskCx::join) this does not drive the other task; it
    /// only observes it. Someone else must be resuming it.
    #[must_use = "futures do nothing unless awaited"]
    pub fn done(&self, handle: WeakTaskHandle) -> Until {
        self.until(move || handle.is_done())
    }

    /// Suspends until `poll` yields a value.
    ///
    /// This is the external-completion primitive: `poll` must be
    /// non-blocking, and may consume a signal produced on another thread.
    #[must_use = "futures do nothing unless awaited"]
    pub fn poll_fn<T: 'static>(
        &self,
        poll: impl FnMut() -> Option<T> + 'static,
    ) -> PollSignal<T> {
        PollSignal {
            cell: self.cell.clone(),
            shared: Rc::new(RefCell::new(SignalState {
                poll: Box::new(poll),
                value: None,
            })),
            registered: false,
        }
    }

    /// Suspends until a value arrives on `receiver`.
    ///
    /// Polls with [`Receiver::try_recv`], never blocking. Yields
    /// `Err(RecvError)` if every sender is dropped first.
    #[must_use = "futures do nothing unless awaited"]
    pub fn recv<T: 'static>(&self, receiver: Receiver<T>) -> PollSignal<Result<T, RecvError>> {
        self.poll_fn(move || match receiver.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RecvError)),
        })
    }

    // ------------------------------------------------------------------
    // Non-suspending operations
    // ------------------------------------------------------------------

    /// Returns whether a stop has been requested for this task.
    ///
    /// Reports `true` once the task is dead.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.cell.upgrade().is_none_or(|c| c.is_stop_requested())
    }

    /// Returns a cheap view of this task's live stop flag, for handing to
    /// predicates and wrappers.
    #[must_use]
    pub fn stop_context(&self) -> StopContext {
        StopContext {
            cell: self.cell.clone(),
        }
    }

    /// Registers `target` to receive stop requests propagated from this
    /// task.
    ///
    /// If this task is already stop-requested, the request is forwarded to
    /// `target` immediately. The registration is weak: it neither keeps the
    /// target alive nor needs explicit cleanup.
    pub fn add_stop_target(&self, target: &impl TaskRef) {
        let (Some(cell), Some(target)) = (self.cell.upgrade(), target.cell()) else {
            return;
        };
        cell.add_stop_target(target);
    }

    /// Removes a previously registered stop target.
    pub fn remove_stop_target(&self, target: &impl TaskRef) {
        let (Some(cell), Some(target)) = (self.cell.upgrade(), target.cell()) else {
            return;
        };
        cell.remove_stop_target(target);
    }

    /// Sets this task's debug name. Prefer the
    /// [`task_name!`](crate::task_name) macro.
    pub fn set_debug_name(&self, name: &'static str) {
        #[cfg(feature = "task-debug")]
        if let Some(cell) = self.cell.upgrade() {
            cell.set_debug_name(name);
        }
        #[cfg(not(feature = "task-debug"))]
        let _ = name;
    }

    /// Sets this task's debug name together with a lazy data producer that
    /// is rendered as `name [data()]` while the task is live.
    pub fn set_debug_name_with(&self, name: &'static str, data: impl Fn() -> String + 'static) {
        #[cfg(feature = "task-debug")]
        if let Some(cell) = self.cell.upgrade() {
            cell.set_debug_name(name);
            cell.set_debug_data_fn(Box::new(data));
        }
        #[cfg(not(feature = "task-debug"))]
        {
            let _ = name;
            let _ = data;
        }
    }
}

/// Live view of a task's stop flag.
///
/// Remains safe to query after the task dies, at which point it reports
/// "stop requested".
#[derive(Clone)]
pub struct StopContext {
    cell: Weak<TaskCell>,
}

impl StopContext {
    /// Returns whether a stop has been requested for the task this context
    /// was taken from.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.cell.upgrade().is_none_or(|c| c.is_stop_requested())
    }
}

// ----------------------------------------------------------------------
// Awaiter futures
// ----------------------------------------------------------------------

/// Future for [`TaskCx::suspend`]: pending exactly once.
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend {
    yielded: bool,
}

impl Future for Suspend {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let me = self.get_mut();
        if me.yielded {
            Poll::Ready(())
        } else {
            me.yielded = true;
            Poll::Pending
        }
    }
}

/// Future for [`TaskCx::until`]: registers its predicate as the cell's
/// readiness gate on first poll.
#[must_use = "futures do nothing unless awaited"]
pub struct Until {
    cell: Weak<TaskCell>,
    pred: Option<crate::task::cell::ReadyFn>,
}

impl Future for Until {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let me = self.get_mut();
        match me.pred.take() {
            Some(mut pred) => {
                if pred() {
                    return Poll::Ready(());
                }
                if let Some(cell) = me.cell.upgrade() {
                    cell.set_ready_fn(pred);
                }
                Poll::Pending
            }
            // The cell only re-polls the frame after the predicate passed.
            None => Poll::Ready(()),
        }
    }
}

/// Future for [`TaskCx::join`]: attaches the awaited task as the cell's
/// sub-task.
#[must_use = "futures do nothing unless awaited"]
pub struct Join<T> {
    cell: Weak<TaskCell>,
    task: Option<Task<T>>,
    registered: bool,
}

impl<T: 'static> Future for Join<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let me = self.get_mut();
        if me.registered {
            // The parent only re-polls the frame once the sub-task is done.
            let task = me.task.as_ref().expect("join polled after completion");
            return Poll::Ready(take_output(task));
        }
        me.registered = true;

        let mut task = me.task.take().expect("join polled after completion");
        assert!(task.is_valid(), "awaited an invalid task");
        if task.is_done() {
            me.task = Some(task);
            let held = me.task.as_ref().expect("just stored");
            return Poll::Ready(take_output(held));
        }

        let parent = self_cell(&me.cell);
        if parent.is_stop_requested() {
            task.request_stop();
        }
        if let Some(sub) = task.cell() {
            parent.set_sub_task(sub.clone());
        }
        if task.resume() == TaskStatus::Done {
            parent.clear_sub_task();
            me.task = Some(task);
            let held = me.task.as_ref().expect("just stored");
            return Poll::Ready(take_output(held));
        }
        // Ownership stays here so the sub-task dies with this frame.
        me.task = Some(task);
        Poll::Pending
    }
}

fn self_cell(cell: &Weak<TaskCell>) -> Rc<TaskCell> {
    cell.upgrade()
        .expect("task context used after its task was destroyed")
}

/// Rethrows the task's captured panic or takes its return value.
fn take_output<T: 'static>(task: &Task<T>) -> T {
    task.rethrow_panic();
    task.take_return_value()
        .expect("awaited task finished without a return value")
}

/// State shared between a [`PollSignal`] future and the readiness predicate
/// it registers: the predicate consumes the signal and stashes the value
/// for the future to pick up.
struct SignalState<T> {
    poll: Box<dyn FnMut() -> Option<T>>,
    value: Option<T>,
}

impl<T> SignalState<T> {
    fn check(&mut self) -> bool {
        if self.value.is_some() {
            return true;
        }
        match (self.poll)() {
            Some(value) => {
                self.value = Some(value);
                true
            }
            None => false,
        }
    }
}

/// Future for [`TaskCx::poll_fn`] and [`TaskCx::recv`].
#[must_use = "futures do nothing unless awaited"]
pub struct PollSignal<T> {
    cell: Weak<TaskCell>,
    shared: Rc<RefCell<SignalState<T>>>,
    registered: bool,
}

impl<T: 'static> Future for PollSignal<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let me = self.get_mut();
        {
            let mut state = me.shared.borrow_mut();
            if state.check() {
                if let Some(value) = state.value.take() {
                    return Poll::Ready(value);
                }
            }
        }
        if !me.registered {
            me.registered = true;
            if let Some(cell) = me.cell.upgrade() {
                let shared = me.shared.clone();
                cell.set_ready_fn(Box::new(move || shared.borrow_mut().check()));
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use std::cell::Cell;
    use std::sync::mpsc;

    #[test]
    fn suspend_yields_once() {
        let mut task = Task::new(|cx| async move {
            cx.suspend().await;
        });
        assert_eq!(task.resume(), TaskStatus::Suspended);
        assert_eq!(task.resume(), TaskStatus::Done);
    }

    #[test]
    fn until_ready_immediately_does_not_suspend() {
        let mut task = Task::new(|cx| async move {
            cx.until(|| true).await;
            5
        });
        assert_eq!(task.resume(), TaskStatus::Done);
        assert_eq!(task.take_return_value(), Some(5));
    }

    #[test]
    fn until_rechecks_each_resume() {
        let flag = Rc::new(Cell::new(false));
        let seen = flag.clone();
        let mut task = Task::new(move |cx| async move {
            cx.until(move || seen.get()).await;
        });
        assert_eq!(task.resume(), TaskStatus::Suspended);
        assert_eq!(task.resume(), TaskStatus::Suspended);
        flag.set(true);
        assert_eq!(task.resume(), TaskStatus::Done);
    }

    #[test]
    fn join_drives_sub_task_transitively() {
        let mut task = Task::new(|cx| async move {
            let sub = Task::new(|cx| async move {
                cx.suspend().await;
                3
            });
            cx.join(sub).await * 2
        });
        assert_eq!(task.resume(), TaskStatus::Suspended);
        assert_eq!(task.resume(), TaskStatus::Done);
        assert_eq!(task.take_return_value(), Some(6));
    }

    #[test]
    fn join_of_finished_task_completes_inline() {
        let mut sub = Task::new(|_| async { 9 });
        assert_eq!(sub.resume(), TaskStatus::Done);
        let mut task = Task::new(move |cx| async move { cx.join(sub).await });
        assert_eq!(task.resume(), TaskStatus::Done);
        assert_eq!(task.take_return_value(), Some(9));
    }

    #[test]
    fn join_propagates_stop_into_sub_task() {
        let observed = Rc::new(Cell::new(false));
        let sink = observed.clone();
        let mut task = Task::new(move |cx| async move {
            let sub = Task::new(move |cx| async move {
                let stop = cx.stop_context();
                cx.until(move || stop.is_stop_requested()).await;
                sink.set(true);
            });
            cx.join(sub).await;
        });
        task.request_stop();
        assert_eq!(task.resume(), TaskStatus::Done);
        assert!(observed.get());
    }

    #[test]
    fn done_observes_without_driving() {
        let mut other = Task::new(|cx| async move {
            cx.suspend().await;
        });
        let observed = other.weak_handle();
        let mut task = Task::new(move |cx| async move {
            cx.done(observed).await;
        });
        assert_eq!(task.resume(), TaskStatus::Suspended);
        assert_eq!(task.resume(), TaskStatus::Suspended);
        other.resume();
        other.resume();
        assert!(other.is_done());
        assert_eq!(task.resume(), TaskStatus::Done);
    }

    #[test]
    fn recv_completes_when_signaled() {
        let (tx, rx) = mpsc::channel();
        let mut task = Task::new(move |cx| async move { cx.recv(rx).await });
        assert_eq!(task.resume(), TaskStatus::Suspended);
        tx.send(11).expect("receiver alive");
        assert_eq!(task.resume(), TaskStatus::Done);
        assert_eq!(task.take_return_value(), Some(Ok(11)));
    }

    #[test]
    fn recv_reports_disconnect() {
        let (tx, rx) = mpsc::channel::<u32>();
        let mut task = Task::new(move |cx| async move { cx.recv(rx).await });
        assert_eq!(task.resume(), TaskStatus::Suspended);
        drop(tx);
        assert_eq!(task.resume(), TaskStatus::Done);
        assert_eq!(task.take_return_value(), Some(Err(RecvError)));
    }

    #[test]
    fn recv_ready_before_first_resume() {
        let (tx, rx) = mpsc::channel();
        tx.send(1).expect("receiver alive");
        let mut task = Task::new(move |cx| async move { cx.recv(rx).await });
        assert_eq!(task.resume(), TaskStatus::Done);
        assert_eq!(task.take_return_value(), Some(Ok(1)));
    }

    #[test]
    fn stop_context_outlives_task() {
        let captured = {
            let mut probe = Task::new(|cx| async move { cx.stop_context() });
            probe.resume();
            probe.take_return_value()
        };
        let stop = captured.expect("probe completed");
        // The probe task is gone, so the view degrades to "stopped".
        assert!(stop.is_stop_requested());
    }
}
