//! The task runtime: suspendable procedures, handles, and the awaiter
//! protocol.
//!
//! A *task* is a suspendable procedure driven by explicit [`resume`]
//! calls, typically once per host tick through a
//! [`TaskManager`](crate::manager::TaskManager). The body is an `async`
//! block; it suspends only at the explicit awaiter operations exposed by
//! [`TaskCx`], and it never runs except inside a `resume` call on its
//! handle chain.
//!
//! See [`handle`] for the ownership model and [`cx`] for the suspension
//! primitives.
//!
//! [`resume`]: Task::resume

pub(crate) mod cell;
pub(crate) mod debug;
mod cx;
mod handle;

pub use cx::{Join, PollSignal, StopContext, Suspend, TaskCx, Until};
pub use debug::DebugStackFormatter;
pub use handle::{Task, TaskHandle, TaskRef, WeakTask, WeakTaskHandle};

/// Status reported by resuming a task: still suspended, or finished (frame
/// destroyed or about to be).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task is suspended at an awaiter.
    Suspended,
    /// The task has terminated.
    Done,
}
