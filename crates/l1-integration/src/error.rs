//! Error taxonomy shared by every rollup service

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a failure must be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input (script layout, signature encoding). Rejected locally.
    Malformed,
    /// Expected operational rejection. The item may be retried later.
    Policy,
    /// Protocol or implementation bug. The mutation is aborted.
    Consistency,
}

impl ErrorKind {
    /// Consistency violations abort the affected operation
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Consistency)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Malformed => f.write_str("malformed"),
            ErrorKind::Policy => f.write_str("policy"),
            ErrorKind::Consistency => f.write_str("consistency"),
        }
    }
}

/// Implemented by every domain error so callers can branch on the kind
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}
