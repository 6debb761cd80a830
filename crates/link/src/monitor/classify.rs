//! Best-effort error classification.
//!
//! Transports surface failures as arbitrary error values, often wrapping an
//! `io::Error` several layers deep. Classification looks at the message of
//! every error in the source chain, permanent signatures first, then
//! transient ones, and finally falls back to the error type: I/O and timeout
//! errors are transient.
//!
//! The result only steers retry decisions and operator-facing explanations.
//! Nothing depends on it being exact.

use std::error::Error;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// Signatures of configuration or environment faults.
pub const PERMANENT_PATTERNS: &[&str] = &[
    "signal only works in main thread",
    "reinitialise",
    "already running",
    "permission denied",
    "no such device",
    "module not found",
    "import error",
];

/// Signatures of conditions expected to clear on their own.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "connection reset",
    "connection refused",
    "broken pipe",
    "timeout",
    "timed out",
    "temporarily unavailable",
    "network unreachable",
    "no route to host",
    "address already in use",
    "serial port busy",
    "device disconnected",
    "usb disconnect",
    "resource temporarily unavailable",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Only transient errors are flagged retriable on recorded events. The
    /// reconnect machinery still retries everything.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a message by substring alone.
pub fn classify_message(message: &str) -> Option<ErrorCategory> {
    let message = message.to_lowercase();
    if PERMANENT_PATTERNS.iter().any(|p| message.contains(p)) {
        return Some(ErrorCategory::Permanent);
    }
    if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
        return Some(ErrorCategory::Transient);
    }
    None
}

/// Classifies an error and its source chain.
pub fn classify_error(error: &(dyn Error + 'static)) -> ErrorCategory {
    let chain = || std::iter::successors(Some(error), |&e| e.source());

    let messages: Vec<Option<ErrorCategory>> =
        chain().map(|e| classify_message(&e.to_string())).collect();
    if messages.contains(&Some(ErrorCategory::Permanent)) {
        return ErrorCategory::Permanent;
    }
    if messages.contains(&Some(ErrorCategory::Transient)) {
        return ErrorCategory::Transient;
    }

    chain().find_map(classify_type).unwrap_or(ErrorCategory::Unknown)
}

fn classify_type(error: &(dyn Error + 'static)) -> Option<ErrorCategory> {
    if let Some(io_err) = error.downcast_ref::<io::Error>() {
        return Some(match io_err.kind() {
            io::ErrorKind::PermissionDenied => ErrorCategory::Permanent,
            _ => ErrorCategory::Transient,
        });
    }
    if error.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorCategory::Transient);
    }
    None
}
