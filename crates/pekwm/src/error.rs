//! Error and diagnostic types shared across the configuration spine.
//!
//! Nothing in this crate unwinds across the reactor's main loop: recoverable
//! problems (a malformed entry, a missing include, an unknown variable) are
//! turned into a [`Diagnostic`] and logged via the `log` crate at the call
//! site that detected them. Only truly unrecoverable conditions (inability
//! to open the display, for example) propagate as an `Err` out to `main`.

use std::fmt;

/// A single parse- or source-level diagnostic, carrying enough location
/// context (`source:line`) to be useful in a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub source: String,
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(source: impl Into<String>, line: u32, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            source: source.into(),
            line,
            message: message.into(),
        }
    }

    /// A diagnostic with no useful source location (e.g. a failure before any
    /// source was opened).
    pub fn generic(message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            source: String::new(),
            line: 0,
            message: message.into(),
        }
    }

    pub fn log_warn(&self) {
        if self.source.is_empty() {
            log::warn!("{}", self.message);
        } else {
            log::warn!("{}:{}: {}", self.source, self.line, self.message);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}:{}: {}", self.source, self.line, self.message)
        }
    }
}

impl std::error::Error for Diagnostic {}
