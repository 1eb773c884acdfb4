//! Debug names and debug-stack rendering.
//!
//! Every task cell can carry a short static name plus an optional lazy data
//! producer, set from inside the task body with [`task_name!`]. The debug
//! *stack* of a task is the chain of names down its sub-task chain, joined
//! with `" -> "`.
//!
//! Composite awaiters embed raw marker characters in their debug data: a
//! backtick directly after a newline opens an indent level and a backtick
//! directly before a newline closes one. [`DebugStackFormatter`] turns such
//! strings into indented multi-line output.
//!
//! Everything here compiles down to nothing without the `task-debug`
//! feature.

#[cfg(feature = "task-debug")]
use std::cell::{Cell, RefCell};

/// Per-cell debug state.
#[cfg(feature = "task-debug")]
pub(crate) struct DebugInfo {
    pub(crate) name: Cell<&'static str>,
    pub(crate) data_fn: RefCell<Option<Box<dyn Fn() -> String>>>,
}

#[cfg(feature = "task-debug")]
impl DebugInfo {
    pub(crate) fn new() -> Self {
        Self {
            name: Cell::new("[unnamed task]"),
            data_fn: RefCell::new(None),
        }
    }
}

/// Sets the current task's debug name (and optional data producer).
///
/// Usually the first statement of a task body:
///
/// ```ignore
/// Task::new(|cx| async move {
///     task_name!(cx, "ManageDoor");
///     // or, with live data:
///     task_name!(cx, "ManageDoor", move || format!("open={open}"));
///     ...
/// })
/// ```
///
/// Without the `task-debug` feature the macro evaluates its arguments and
/// discards them.
#[cfg(feature = "task-debug")]
#[macro_export]
macro_rules! task_name {
    ($cx:expr, $name:expr) => {
        $cx.set_debug_name($name)
    };
    ($cx:expr, $name:expr, $data:expr) => {
        $cx.set_debug_name_with($name, $data)
    };
}

/// Sets the current task's debug name (no-op without `task-debug`).
#[cfg(not(feature = "task-debug"))]
#[macro_export]
macro_rules! task_name {
    ($cx:expr, $name:expr) => {{
        let _ = &$cx;
        let _ = $name;
    }};
    ($cx:expr, $name:expr, $data:expr) => {{
        let _ = &$cx;
        let _ = $name;
        let _ = $data;
    }};
}

/// Renders debug-stack strings with marker-driven indentation.
///
/// The contract: a backtick directly after a line break indents one level,
/// a backtick directly before a line break dedents one level, and every
/// line break re-emits the current indentation. Marker backticks are not
/// part of the output.
#[derive(Debug, Clone)]
pub struct DebugStackFormatter {
    indent_width: usize,
}

impl DebugStackFormatter {
    /// Creates a formatter with the default two-space indent.
    #[must_use]
    pub fn new() -> Self {
        Self { indent_width: 2 }
    }

    /// Creates a formatter with a custom indent width.
    #[must_use]
    pub fn with_indent_width(indent_width: usize) -> Self {
        Self { indent_width }
    }

    /// Applies the indent contract to `input`.
    #[must_use]
    pub fn format(&self, input: &str) -> String {
        let bytes = input.as_bytes();
        let mut result = String::new();
        let mut indent: usize = 0;
        let mut start = 0;
        let mut cursor = 0;
        while let Some(offset) = bytes[cursor..].iter().position(|&b| b == b'\n') {
            let newline = cursor + offset;
            let mut line_end = newline;
            let mut next = newline + 1;
            if bytes.get(newline + 1) == Some(&b'`') {
                indent += 1;
                next = newline + 2;
            } else if newline > start && bytes[newline - 1] == b'`' {
                indent = indent.saturating_sub(1);
                line_end = newline - 1;
            }
            result.push_str(&input[start..line_end]);
            result.push('\n');
            result.push_str(&" ".repeat(indent * self.indent_width));
            start = next;
            cursor = next;
        }
        result.push_str(&input[start..]);
        result
    }
}

impl Default for DebugStackFormatter {
    fn default() -> Self {
        Self::new()
    }
}
