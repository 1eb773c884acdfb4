//! End-to-end state machine scenario: a four-state machine cycling through
//! idle/periodic/lambda states, stopped mid-cycle, unwinding to its exit
//! state.

mod common;

use common::ManualClock;
use cotask::awaiters::{cancel_if, wait_forever, wait_seconds};
use cotask::fsm::{TaskFsm, TransitionDebugData};
use cotask::{Task, TaskStatus};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds the machine:
///
/// - entry -> Idle
/// - Idle: on-complete -> End, otherwise -> Periodic (payload 1.0)
/// - Periodic -> Lambda (payload 2.0)
/// - Lambda: on-complete -> Idle
///
/// Idle gives up when stopped, so a stopped machine falls through to End
/// the next time it passes Idle. Lambda observes the stop through its own
/// stop context and exits its timed wait early.
fn build(clock: &ManualClock) -> (TaskFsm, cotask::fsm::StateId) {
    let fsm = TaskFsm::new();

    let idle = fsm.state("Idle", || wait_forever().cancel_if_stop_requested());

    let periodic = {
        let time_fn = clock.time_fn();
        fsm.state_with("Periodic", move |duration: f32| {
            wait_seconds(duration as cotask::TaskTime, time_fn.clone())
        })
    };

    let lambda = {
        let time_fn = clock.time_fn();
        fsm.state_with("Lambda", move |duration: f32| {
            let time_fn = time_fn.clone();
            Task::new(move |cx| async move {
                let stop = cx.stop_context();
                let timed = wait_seconds(duration as cotask::TaskTime, time_fn.clone());
                let _ = cx
                    .join(cancel_if(timed, move || stop.is_stop_requested()))
                    .await;
            })
        })
    };

    let end = fsm.exit_state("End");

    fsm.entry_links(vec![idle.link()]);
    fsm.state_links(
        &idle,
        vec![end.on_complete_link(), periodic.link_with(1.0f32)],
    );
    fsm.state_links(&periodic, vec![lambda.link_with(2.0f32)]);
    fsm.state_links(&lambda, vec![idle.on_complete_link()]);

    (fsm, end.id())
}

fn debug_logger(log: &Rc<RefCell<Vec<String>>>) -> cotask::fsm::DebugTransitionFn {
    let log = log.clone();
    Rc::new(move |data: TransitionDebugData| {
        log.borrow_mut()
            .push(format!("{} -> {}", data.old_name, data.new_name));
    })
}

#[test]
fn full_cycle_then_stop_reaches_end() {
    let clock = ManualClock::new();
    let transitions = Rc::new(RefCell::new(Vec::new()));
    let (fsm, end_id) = build(&clock);

    let mut machine = fsm.run_with(None, Some(debug_logger(&transitions)));

    // Tick 1: entry -> Idle.
    assert_eq!(machine.resume(), TaskStatus::Suspended);
    // Tick 2: Idle -> Periodic (payload 1.0).
    assert_eq!(machine.resume(), TaskStatus::Suspended);
    // Tick 3: Periodic -> Lambda (payload 2.0); Lambda starts its wait.
    assert_eq!(machine.resume(), TaskStatus::Suspended);

    // Stop the machine while Lambda is mid-wait.
    machine.request_stop();

    // Tick 4: Lambda observes the stop through its stop context and
    // finishes early.
    assert_eq!(machine.resume(), TaskStatus::Suspended);
    // Tick 5: Lambda's on-complete link re-enters Idle, which gives up
    // immediately because the stop flag reaches it on construction.
    assert_eq!(machine.resume(), TaskStatus::Suspended);
    // Tick 6: Idle is done, so its on-complete link exits to End.
    assert_eq!(machine.resume(), TaskStatus::Done);

    assert_eq!(machine.take_return_value(), Some(end_id));
    assert_eq!(
        *transitions.borrow(),
        vec![
            "<entry> -> Idle",
            "Idle -> Periodic",
            "Periodic -> Lambda",
            "Lambda -> Idle",
            "Idle -> End",
        ]
    );
}

#[test]
fn unstopped_machine_keeps_cycling() {
    let clock = ManualClock::new();
    let transitions = Rc::new(RefCell::new(Vec::new()));
    let (fsm, _end_id) = build(&clock);

    let mut machine = fsm.run_with(None, Some(debug_logger(&transitions)));

    assert_eq!(machine.resume(), TaskStatus::Suspended); // entry -> Idle
    assert_eq!(machine.resume(), TaskStatus::Suspended); // Idle -> Periodic
    assert_eq!(machine.resume(), TaskStatus::Suspended); // Periodic -> Lambda
    clock.advance(2.0);
    assert_eq!(machine.resume(), TaskStatus::Suspended); // Lambda's timer fires
    assert_eq!(machine.resume(), TaskStatus::Suspended); // Lambda -> Idle
    assert_eq!(machine.resume(), TaskStatus::Suspended); // Idle -> Periodic again

    assert_eq!(
        *transitions.borrow(),
        vec![
            "<entry> -> Idle",
            "Idle -> Periodic",
            "Periodic -> Lambda",
            "Lambda -> Idle",
            "Idle -> Periodic",
        ]
    );
}

#[test]
fn on_complete_exit_only_fires_once_state_is_done() {
    // With no stop issued, Idle never completes, so the machine keeps
    // cycling rather than exiting through the on-complete link.
    let clock = ManualClock::new();
    let (fsm, _end_id) = build(&clock);

    let mut machine = fsm.run();
    for _ in 0..6 {
        assert_eq!(machine.resume(), TaskStatus::Suspended);
    }
}
