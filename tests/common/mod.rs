#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use cotask::{Task, TaskStatus, TaskTime};
use std::cell::Cell;
use std::rc::Rc;

/// A hand-advanced clock for driving time-sensitive awaiters.
///
/// `time_fn()` hands out closures suitable as time streams; all of them
/// read the same shared instant.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<TaskTime>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: TaskTime) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: TaskTime) {
        self.now.set(self.now.get() + delta);
    }

    pub fn get(&self) -> TaskTime {
        self.now.get()
    }

    pub fn time_fn(&self) -> impl Fn() -> TaskTime + Clone + 'static {
        let now = self.now.clone();
        move || now.get()
    }
}

/// Resumes `task` until done, panicking after `limit` resumes.
pub fn drive_to_completion<T: 'static>(task: &mut Task<T>, limit: usize) {
    for _ in 0..limit {
        if task.resume() == TaskStatus::Done {
            return;
        }
    }
    panic!("task did not finish within {limit} resumes");
}
