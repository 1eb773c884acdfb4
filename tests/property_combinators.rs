//! Property-based tests for the awaiter combinators and the scope guard.
//!
//! Covers:
//!
//! # Racing
//! - `wait_for_any` completes exactly when its earliest-finishing entry
//!   does, and ties go to construction order
//!
//! # Timeouts
//! - A clock advancing by exactly the timeout duration cancels the child
//!
//! # Scope guards
//! - The guard function runs exactly once on every exit path

mod common;

use common::ManualClock;
use cotask::awaiters::{select, timeout, wait_for_any, wait_seconds};
use cotask::{FnGuard, Task, TaskStatus};
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

proptest! {
    /// `wait_for_any` finishes on the tick its earliest entry finishes on,
    /// and `select` names that entry; ties break toward the lower index.
    #[test]
    fn any_completes_with_earliest_entry(
        durations in proptest::collection::vec(1u32..6, 1..5)
    ) {
        let clock = ManualClock::new();
        let entries: Vec<_> = durations
            .iter()
            .map(|&d| wait_seconds(d as cotask::TaskTime, clock.time_fn()).into_void())
            .collect();
        let mut race = wait_for_any(entries);

        // The timers start on the first resume, at clock zero.
        let earliest = durations.iter().copied().min().expect("non-empty");
        for tick in 0..=earliest {
            clock.set(tick as cotask::TaskTime);
            let status = race.resume();
            if tick < earliest {
                prop_assert_eq!(status, TaskStatus::Suspended, "tick {}", tick);
            } else {
                prop_assert_eq!(status, TaskStatus::Done, "tick {}", tick);
            }
        }

        // Re-run as a select to check the tie-break winner.
        let clock = ManualClock::new();
        let tagged: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(index, &d)| {
                (index, wait_seconds(d as cotask::TaskTime, clock.time_fn()).into_void())
            })
            .collect();
        let mut choose = select(tagged);
        for tick in 0..=earliest {
            clock.set(tick as cotask::TaskTime);
            if choose.resume() == TaskStatus::Done {
                break;
            }
        }
        let expected_winner = durations
            .iter()
            .position(|&d| d == earliest)
            .expect("non-empty");
        prop_assert_eq!(choose.take_return_value(), Some(expected_winner));
    }

    /// `timeout(child, d)` with the clock advancing exactly `d` between two
    /// ticks reports canceled and kills the child.
    #[test]
    fn timeout_fires_on_exact_boundary(duration in 1u32..10) {
        let clock = ManualClock::new();
        let child: Task<()> = Task::new(|cx| async move {
            loop {
                cx.suspend().await;
            }
        });
        let watch = child.weak_handle();
        let mut wrapped = timeout(child, duration as cotask::TaskTime, clock.time_fn());

        prop_assert_eq!(wrapped.resume(), TaskStatus::Suspended);
        clock.advance(duration as cotask::TaskTime);
        prop_assert_eq!(wrapped.resume(), TaskStatus::Done);
        prop_assert_eq!(wrapped.take_return_value(), Some(None));
        prop_assert!(watch.is_done(), "child must be killed on timeout");
    }

    /// The guard runs exactly once whether the task completes, is killed
    /// mid-suspension, or is stopped and then killed.
    #[test]
    fn scope_guard_runs_once_on_every_path(path in 0u8..3, warmup in 1usize..4) {
        let fired = Rc::new(Cell::new(0u32));
        let seen = fired.clone();
        let mut task: Task<()> = Task::new(move |cx| async move {
            let mut guard = FnGuard::new(move || seen.set(seen.get() + 1));
            let stop = cx.stop_context();
            cx.until(move || stop.is_stop_requested()).await;
            guard.fire();
        });

        for _ in 0..warmup {
            prop_assert_eq!(task.resume(), TaskStatus::Suspended);
        }
        match path {
            0 => {
                // Natural completion after a stop request.
                task.request_stop();
                prop_assert_eq!(task.resume(), TaskStatus::Done);
            }
            1 => {
                // Killed mid-suspension.
                task.kill();
            }
            _ => {
                // Stopped, then killed before it could be resumed.
                task.request_stop();
                task.kill();
            }
        }
        prop_assert_eq!(fired.get(), 1);
        drop(task);
        prop_assert_eq!(fired.get(), 1);
    }
}

/// Both entries finishing on their first resume: the earlier entry wins.
#[test]
fn simultaneous_finishers_tie_break_to_first() {
    let a: Task<()> = Task::new(|_| async {});
    let b: Task<()> = Task::new(|_| async {});
    let mut choose = select(vec![("a", a), ("b", b)]);
    assert_eq!(choose.resume(), TaskStatus::Done);
    assert_eq!(choose.take_return_value(), Some("a"));
}
