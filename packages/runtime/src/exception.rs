//! Exceptions raised by runtime code.

use thiserror::Error;

/// An exception raised inside the embedded runtime.
///
/// `traceback` holds one line per frame, outermost first. Exceptions created
/// with [`Exception::new`] carry a single summary line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {value}")]
pub struct Exception {
    /// Exception type name, e.g. `KeyError`.
    pub name: String,
    /// Human-readable message.
    pub value: String,
    /// Formatted traceback lines.
    pub traceback: Vec<String>,
}

impl Exception {
    /// Create an exception with a one-line traceback.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let traceback = vec![format!("{}: {}", name, value)];
        Self {
            name,
            value,
            traceback,
        }
    }

    pub fn type_error(value: impl Into<String>) -> Self {
        Self::new("TypeError", value)
    }

    pub fn value_error(value: impl Into<String>) -> Self {
        Self::new("ValueError", value)
    }

    pub fn key_error(value: impl Into<String>) -> Self {
        Self::new("KeyError", value)
    }

    pub fn runtime_error(value: impl Into<String>) -> Self {
        Self::new("RuntimeError", value)
    }

    /// Prepend a frame line to the traceback.
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.traceback.insert(0, frame.into());
        self
    }
}
