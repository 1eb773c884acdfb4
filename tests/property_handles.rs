//! Property-based tests for the handle family.
//!
//! Covers:
//!
//! # Conversion lattice
//! - Any conversion sequence only ever drops capabilities
//!
//! # Lifetime
//! - Dropping the unique resumable handle orphans the return value in one
//!   step
//! - The strong count reaching zero implies the task is done
//!
//! # Stop requests
//! - `request_stop` is idempotent and immediately observable

mod common;

use cotask::{Task, TaskStatus};
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

/// The capability set of a handle shape, ordered by inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Capabilities {
    strong: bool,
    resumable: bool,
    typed_return: bool,
}

impl Capabilities {
    const TASK: Self = Self {
        strong: true,
        resumable: true,
        typed_return: true,
    };

    fn superset_of(self, other: Self) -> bool {
        (self.strong || !other.strong)
            && (self.resumable || !other.resumable)
            && (self.typed_return || !other.typed_return)
    }
}

/// One capability-dropping conversion step.
#[derive(Debug, Clone, Copy)]
enum Conversion {
    ToHandle,
    ToWeakHandle,
    IntoWeak,
    IntoVoid,
}

impl Conversion {
    fn applies_to(self, caps: Capabilities) -> bool {
        match self {
            Conversion::ToHandle | Conversion::IntoVoid => caps.strong,
            Conversion::ToWeakHandle => true,
            Conversion::IntoWeak => caps.resumable && caps.strong,
        }
    }

    fn apply(self, caps: Capabilities) -> Capabilities {
        match self {
            Conversion::ToHandle => Capabilities {
                resumable: false,
                ..caps
            },
            Conversion::ToWeakHandle => Capabilities {
                strong: false,
                resumable: false,
                typed_return: false,
            },
            Conversion::IntoWeak => Capabilities {
                strong: false,
                typed_return: false,
                ..caps
            },
            Conversion::IntoVoid => Capabilities {
                typed_return: false,
                ..caps
            },
        }
    }
}

fn arb_conversion() -> impl Strategy<Value = Conversion> {
    prop_oneof![
        Just(Conversion::ToHandle),
        Just(Conversion::ToWeakHandle),
        Just(Conversion::IntoWeak),
        Just(Conversion::IntoVoid),
    ]
}

proptest! {
    /// Capability sets are monotonically non-increasing along any
    /// conversion chain.
    #[test]
    fn conversions_never_add_capability(steps in proptest::collection::vec(arb_conversion(), 0..8)) {
        let mut caps = Capabilities::TASK;
        for step in steps {
            if step.applies_to(caps) {
                let next = step.apply(caps);
                prop_assert!(caps.superset_of(next), "{caps:?} -> {next:?} via {step:?}");
                caps = next;
            }
        }
    }

    /// However many strong observers exist, dropping the unique resumable
    /// handle kills a live task in one step, and the return value is then
    /// orphaned.
    #[test]
    fn dropping_resumable_handle_orphans_return(observers in 0usize..5, resumed in 0usize..3) {
        let mut task: Task<()> = Task::new(|cx| async move {
            loop {
                cx.suspend().await;
            }
        });
        for _ in 0..resumed {
            prop_assert_eq!(task.resume(), TaskStatus::Suspended);
        }
        let handles: Vec<_> = (0..observers).map(|_| task.handle()).collect();
        let weaks: Vec<_> = (0..observers).map(|_| task.weak_handle()).collect();
        prop_assert!(!task.is_done());

        drop(task);
        for handle in &handles {
            prop_assert!(handle.is_done());
        }
        for weak in &weaks {
            prop_assert!(weak.is_done());
        }
    }

    /// A task stays alive while any strong handle remains and dies when the
    /// count reaches zero.
    #[test]
    fn zero_strong_refs_implies_done(extra_handles in 1usize..6) {
        let task = Task::new(|cx| async move {
            cx.until(|| false).await;
        });
        let mut handles: Vec<_> = (0..extra_handles).map(|_| task.handle()).collect();
        let watch = task.weak_handle();
        let weak = task.into_weak();
        prop_assert!(!watch.is_done(), "strong handles keep the task alive");
        while let Some(handle) = handles.pop() {
            drop(handle);
        }
        prop_assert!(watch.is_done(), "no strong handles left");
        drop(weak);
    }

    /// Stop requests are idempotent, sticky, and observable by the task's
    /// stop context on the very next resume.
    #[test]
    fn request_stop_is_idempotent(repeats in 1usize..5, warmup in 0usize..3) {
        let observed = Rc::new(Cell::new(0u32));
        let seen = observed.clone();
        let mut task = Task::new(move |cx| async move {
            let stop = cx.stop_context();
            cx.until(move || stop.is_stop_requested()).await;
            seen.set(seen.get() + 1);
        });
        for _ in 0..warmup {
            prop_assert_eq!(task.resume(), TaskStatus::Suspended);
        }
        for _ in 0..repeats {
            task.request_stop();
        }
        prop_assert!(task.is_stop_requested());
        prop_assert_eq!(task.resume(), TaskStatus::Done);
        prop_assert_eq!(observed.get(), 1);
        prop_assert!(task.is_stop_requested());
    }
}

/// Exactly one logical strong reference per live strong handle: the task
/// dies the moment the last of them goes, wherever it lives.
#[test]
fn strong_count_tracks_handles_exactly() {
    let task = Task::new(|cx| async move {
        cx.until(|| false).await;
    });
    let a = task.handle();
    let b = a.clone();
    let c = b.clone().into_void();
    let watch = task.weak_handle();
    let weak = task.into_weak();

    drop(a);
    assert!(!watch.is_done());
    drop(b);
    assert!(!watch.is_done());
    drop(c);
    assert!(watch.is_done());
    drop(weak);
}
