//! The standard awaiter library: timed waits, cancellation wrappers, and
//! racing/joining combinators.
//!
//! Every function here returns an ordinary [`Task`], so combinators nest
//! freely and run anywhere a task runs. Wrappers own the task they wrap,
//! resume it as part of their own resume, and propagate stop requests into
//! it.
//!
//! Time-sensitive awaiters take a *time stream*: any `Fn() -> TaskTime`
//! closure (see [`crate::time`]).
//!
//! # Canceled results
//!
//! The cancellation wrappers ([`cancel_if`], [`stop_if`], [`timeout`])
//! yield `Option<T>`: `Some(value)` if the wrapped task finished, `None` if
//! it was canceled. For `Task<()>` children that is `Option<()>`, i.e. a
//! "was it canceled" flag.

use crate::task::{Task, TaskStatus};
use crate::time::TaskTime;
use crate::tracing_compat::trace;
use std::rc::Rc;

/// Returns a task that waits until `ready_fn` returns true.
#[must_use]
pub fn wait_until(ready_fn: impl FnMut() -> bool + 'static) -> Task<()> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "WaitUntil");
        cx.until(ready_fn).await;
    })
}

/// Returns a task that waits until `ready_fn` returns false.
#[must_use]
pub fn wait_while(ready_fn: impl FnMut() -> bool + 'static) -> Task<()> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "WaitWhile");
        cx.until_not(ready_fn).await;
    })
}

/// Returns a task that never finishes on its own; it exists to be killed or
/// raced against.
#[must_use]
pub fn wait_forever() -> Task<()> {
    Task::new(|cx| async move {
        crate::task_name!(cx, "WaitForever");
        cx.until(|| false).await;
    })
}

/// Returns a task that waits `seconds` in the given time stream, then
/// yields the overshoot (how far past the requested duration the completing
/// tick landed).
#[must_use]
pub fn wait_seconds(
    seconds: TaskTime,
    time_fn: impl Fn() -> TaskTime + 'static,
) -> Task<TaskTime> {
    Task::new(move |cx| async move {
        let time_fn = Rc::new(time_fn);
        let start = (*time_fn)();
        crate::task_name!(cx, "WaitSeconds", {
            let time_fn = time_fn.clone();
            move || format!("{}/{}", (*time_fn)() - start, seconds)
        });
        let timer = time_fn.clone();
        cx.until(move || (*timer)() - start >= seconds).await;
        (*time_fn)() - start - seconds
    })
}

/// Returns a task that calls `call` once `delay` has elapsed in the given
/// time stream.
#[must_use]
pub fn delay_call(
    delay: TaskTime,
    call: impl FnOnce() + 'static,
    time_fn: impl Fn() -> TaskTime + 'static,
) -> Task<()> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "DelayCall");
        let _ = cx.join(wait_seconds(delay, time_fn)).await;
        call();
    })
}

/// Wraps `task`, killing it if it is still running after `seconds` in the
/// given time stream. Yields `None` on timeout.
///
/// The timer starts when the wrapper is constructed.
#[must_use]
pub fn timeout<T: 'static>(
    task: Task<T>,
    seconds: TaskTime,
    time_fn: impl Fn() -> TaskTime + 'static,
) -> Task<Option<T>> {
    let start = time_fn();
    cancel_if(task, move || time_fn() - start >= seconds)
}

/// Wraps `task`, killing it as soon as `cancel_fn` returns true.
///
/// The condition is checked before each resume of the wrapped task. Yields
/// `Some(value)` if the task finished first, `None` if it was canceled.
#[must_use]
pub fn cancel_if<T: 'static>(
    task: Task<T>,
    mut cancel_fn: impl FnMut() -> bool + 'static,
) -> Task<Option<T>> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "CancelIf", {
            let handle = task.handle();
            move || handle.debug_stack()
        });
        cx.add_stop_target(&task);
        let mut task = task;
        loop {
            if cancel_fn() {
                trace!("cancel_if condition hit; killing wrapped task");
                return None;
            }
            if task.resume() == TaskStatus::Done {
                return Some(finished_value(&task));
            }
            cx.suspend().await;
        }
    })
}

/// Wraps `task`, killing it as soon as a stop request reaches the wrapper.
#[must_use]
pub fn cancel_if_stop_requested<T: 'static>(task: Task<T>) -> Task<Option<T>> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "CancelIfStopRequested", {
            let handle = task.handle();
            move || handle.debug_stack()
        });
        cx.add_stop_target(&task);
        let mut task = task;
        loop {
            if cx.stop_requested() {
                trace!("stop requested; killing wrapped task");
                return None;
            }
            if task.resume() == TaskStatus::Done {
                return Some(finished_value(&task));
            }
            cx.suspend().await;
        }
    })
}

/// Wraps `task`, issuing a stop request to it when `cancel_fn` first
/// returns true, then waiting for it to finish on its own.
#[must_use]
pub fn stop_if<T: 'static>(
    task: Task<T>,
    cancel_fn: impl FnMut() -> bool + 'static,
) -> Task<Option<T>> {
    stop_if_impl(task, Box::new(cancel_fn), None)
}

/// Like [`stop_if`], but once the stop has been issued the task is killed
/// if it has not finished within `timeout_after` in the given time stream.
#[must_use]
pub fn stop_if_with_timeout<T: 'static>(
    task: Task<T>,
    cancel_fn: impl FnMut() -> bool + 'static,
    timeout_after: TaskTime,
    time_fn: impl Fn() -> TaskTime + 'static,
) -> Task<Option<T>> {
    let time_fn: Rc<dyn Fn() -> TaskTime> = Rc::new(time_fn);
    stop_if_impl(task, Box::new(cancel_fn), Some((timeout_after, time_fn)))
}

fn stop_if_impl<T: 'static>(
    task: Task<T>,
    mut cancel_fn: Box<dyn FnMut() -> bool>,
    timeout_cfg: Option<(TaskTime, Rc<dyn Fn() -> TaskTime>)>,
) -> Task<Option<T>> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "StopIf", {
            let handle = task.handle();
            let timeout_after = timeout_cfg.as_ref().map(|(secs, _)| *secs);
            move || {
                let timeout_str = match timeout_after {
                    Some(secs) => secs.to_string(),
                    None => "none".to_string(),
                };
                format!("timeout = {timeout_str}, task = {}", handle.debug_stack())
            }
        });
        cx.add_stop_target(&task);
        let mut task = task;
        loop {
            if !task.is_stop_requested() && cancel_fn() {
                trace!("stop_if condition hit; requesting stop");
                task.request_stop();
                if let Some((timeout_after, time_fn)) = &timeout_cfg {
                    let time_fn = time_fn.clone();
                    return cx
                        .join(timeout(task, *timeout_after, move || (*time_fn)()))
                        .await;
                }
            }
            if task.resume() == TaskStatus::Done {
                return Some(finished_value(&task));
            }
            cx.suspend().await;
        }
    })
}

/// Returns a task that resumes every entry in order, each tick, and
/// finishes as soon as any entry is done. Unfinished entries are killed.
///
/// Ties within one tick are won by the earliest entry.
#[must_use]
pub fn wait_for_any(entries: Vec<Task<()>>) -> Task<()> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "WaitForAny", entry_stacks(&entries, false));
        for entry in &entries {
            cx.add_stop_target(entry);
        }
        let mut entries = entries;
        loop {
            for entry in entries.iter_mut() {
                if entry.resume() == TaskStatus::Done {
                    return;
                }
            }
            cx.suspend().await;
        }
    })
}

/// Returns a task that resumes every entry in order, each tick, and
/// finishes once all of them are done.
#[must_use]
pub fn wait_for_all(entries: Vec<Task<()>>) -> Task<()> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "WaitForAll", entry_stacks(&entries, true));
        for entry in &entries {
            cx.add_stop_target(entry);
        }
        let mut entries = entries;
        loop {
            let mut all_done = true;
            for entry in entries.iter_mut() {
                if entry.resume() != TaskStatus::Done {
                    all_done = false;
                }
            }
            if all_done {
                return;
            }
            cx.suspend().await;
        }
    })
}

/// Like [`wait_for_any`], but yields the tag of whichever entry finished
/// first.
#[must_use]
pub fn select<V: Clone + 'static>(entries: Vec<(V, Task<()>)>) -> Task<V> {
    Task::new(move |cx| async move {
        crate::task_name!(cx, "Select", {
            let handles: Vec<_> = entries.iter().map(|(_, task)| task.handle()).collect();
            move || {
                let mut out = String::new();
                for handle in &handles {
                    out.push_str(if out.is_empty() { "\n`" } else { "\n" });
                    out.push_str(&handle.debug_stack());
                }
                out.push_str("`\n");
                out
            }
        });
        for (_, entry) in &entries {
            cx.add_stop_target(entry);
        }
        let mut entries = entries;
        loop {
            for (value, entry) in entries.iter_mut() {
                if entry.resume() == TaskStatus::Done {
                    return value.clone();
                }
            }
            cx.suspend().await;
        }
    })
}

/// Rethrows a finished task's captured panic or takes its value.
fn finished_value<T: 'static>(task: &Task<T>) -> T {
    task.rethrow_panic();
    task.take_return_value()
        .expect("wrapped task finished without a return value")
}

/// Debug data producer listing each entry's stack between indent markers.
fn entry_stacks(entries: &[Task<()>], with_status: bool) -> impl Fn() -> String + 'static {
    let handles: Vec<_> = entries.iter().map(Task::handle).collect();
    move || {
        let mut out = String::new();
        for handle in &handles {
            out.push_str(if out.is_empty() { "\n`" } else { "\n" });
            out.push_str(&handle.debug_stack());
            if with_status {
                out.push_str(if handle.is_done() { " [DONE]" } else { " [RUNNING]" });
            }
        }
        out.push_str("`\n");
        out
    }
}

// ----------------------------------------------------------------------
// Global-time conveniences
// ----------------------------------------------------------------------

/// [`wait_seconds`] in the global time stream.
#[cfg(feature = "global-time")]
#[must_use]
pub fn wait_seconds_global(seconds: TaskTime) -> Task<TaskTime> {
    wait_seconds(seconds, crate::time::global_time())
}

/// [`timeout`] in the global time stream.
#[cfg(feature = "global-time")]
#[must_use]
pub fn timeout_global<T: 'static>(task: Task<T>, seconds: TaskTime) -> Task<Option<T>> {
    timeout(task, seconds, crate::time::global_time())
}

/// [`delay_call`] in the global time stream.
#[cfg(feature = "global-time")]
#[must_use]
pub fn delay_call_global(delay: TaskTime, call: impl FnOnce() + 'static) -> Task<()> {
    delay_call(delay, call, crate::time::global_time())
}
