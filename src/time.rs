//! The time contract for time-sensitive awaiters.
//!
//! Most applications have more than one notion of time ("game time", "real
//! time", "paused time", ...), so every time-sensitive awaiter in this crate
//! takes a *time-stream function*: a zero-arg closure returning the current
//! time in the chosen stream as a [`TaskTime`]. The only requirement on a
//! time stream is that it is monotonically non-decreasing.
//!
//! It is recommended to sample the clock once at the start of each host tick
//! and return that saved value from the time-stream function, so every task
//! resumed within one tick observes the same instant.
//!
//! # Global time
//!
//! Projects with a single time stream can enable the `global-time` feature,
//! install one process-wide time function with [`set_global_time_fn`], and
//! use the `*_global` awaiter conveniences (or pass [`global_time`]
//! explicitly).

/// Time value used by time-sensitive awaiters, in seconds.
///
/// Single precision by default; the `double-precision-time` feature widens
/// it to `f64`.
#[cfg(feature = "double-precision-time")]
pub type TaskTime = f64;

/// Time value used by time-sensitive awaiters, in seconds.
///
/// Single precision by default; the `double-precision-time` feature widens
/// it to `f64`.
#[cfg(not(feature = "double-precision-time"))]
pub type TaskTime = f32;

/// Returns the time elapsed since `start` in the given time stream.
pub fn time_since(start: TaskTime, time_fn: &impl Fn() -> TaskTime) -> TaskTime {
    time_fn() - start
}

#[cfg(feature = "global-time")]
mod global {
    use super::TaskTime;
    use std::sync::OnceLock;

    static GLOBAL_TIME_FN: OnceLock<fn() -> TaskTime> = OnceLock::new();

    /// Installs the process-wide time function.
    ///
    /// # Panics
    ///
    /// Panics if a global time function was already installed.
    pub fn set_global_time_fn(time_fn: fn() -> TaskTime) {
        assert!(
            GLOBAL_TIME_FN.set(time_fn).is_ok(),
            "global time function installed twice"
        );
    }

    /// Returns the installed global time function.
    ///
    /// The returned function pointer can be passed anywhere a time stream is
    /// expected.
    ///
    /// # Panics
    ///
    /// Panics if [`set_global_time_fn`] was never called.
    #[must_use]
    pub fn global_time() -> fn() -> TaskTime {
        *GLOBAL_TIME_FN
            .get()
            .expect("global time function was never installed (call set_global_time_fn)")
    }
}

#[cfg(feature = "global-time")]
pub use global::{global_time, set_global_time_fn};
