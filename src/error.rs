// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors returned by MXL core operations.
//!
//! Errors are enumerated, never thrown. Each variant maps onto one of the
//! status codes in the external interface; grouping follows the taxonomy the
//! core is required to preserve:
//!
//! - **Contract** errors are caller bugs and are not retriable.
//! - **Transient** errors mean the caller should retry, possibly with a new
//!   deadline.
//! - **Environment** errors are surfaced up with no local recovery.
//! - **Lifecycle** errors mean the caller must reconstruct state.
//!
//! This core never logs; it only reports through these values. Policy
//! (retry, backoff, logging) belongs to the caller.

use std::fmt;

/// Errors returned by MXL operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Contract errors — caller bug, non-retriable
    // ========================================================================
    /// Argument failed a basic validity check (zero edit rate, zero capacity, ...).
    BadArg(&'static str),
    /// No flow with this identifier exists under the domain.
    NoSuchFlow,
    /// Flow exists but its stored schema hash does not match the one supplied.
    SchemaMismatch,

    // ========================================================================
    // Transient errors — caller may retry
    // ========================================================================
    /// Requested index/sample range has not been committed yet.
    NotReady { available_count: u64 },
    /// A wait exceeded its deadline.
    Timeout,
    /// A slot stayed under an odd (write-in-progress) generation past the
    /// bounded spin budget.
    UnderWrite,

    // ========================================================================
    // Environment errors — surfaced up, no local recovery
    // ========================================================================
    /// Underlying I/O failure (open/mmap/ftruncate/flock/...).
    Io(std::io::Error),
    /// Header magic/version did not match what this build expects.
    Incompatible,
    /// Another writer already holds the flow's exclusive lock.
    FlowBusy,

    // ========================================================================
    // Lifecycle errors — caller must reconstruct state
    // ========================================================================
    /// Requested index lies behind the ring's current wrap window.
    Stale,
    /// A weakly-held reader could no longer be upgraded.
    ReaderGone,
}

impl Error {
    /// Stable numeric status code for this error, for FFI/logging callers
    /// that want an integer rather than matching on the enum.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::BadArg(_) => 11,
            Self::NoSuchFlow => 10,
            Self::SchemaMismatch => 8,
            Self::NotReady { .. } => 3,
            Self::Timeout => 2,
            Self::UnderWrite => 5,
            Self::Io(_) => 12,
            Self::Incompatible => 6,
            Self::FlowBusy => 7,
            Self::Stale => 4,
            Self::ReaderGone => 9,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadArg(reason) => write!(f, "invalid argument: {reason}"),
            Self::NoSuchFlow => write!(f, "no such flow in this domain"),
            Self::SchemaMismatch => write!(f, "existing flow's schema hash does not match"),
            Self::NotReady { available_count } => {
                write!(f, "not ready: only {available_count} samples available")
            }
            Self::Timeout => write!(f, "wait deadline exceeded"),
            Self::UnderWrite => write!(f, "slot under write past spin budget"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Incompatible => write!(f, "incompatible header (magic/version mismatch)"),
            Self::FlowBusy => write!(f, "flow already has an active writer"),
            Self::Stale => write!(f, "requested index has been overwritten by the ring"),
            Self::ReaderGone => write!(f, "reader no longer exists"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result type for MXL operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let variants = [
            Error::BadArg("x"),
            Error::NoSuchFlow,
            Error::SchemaMismatch,
            Error::NotReady { available_count: 0 },
            Error::Timeout,
            Error::UnderWrite,
            Error::Incompatible,
            Error::FlowBusy,
            Error::Stale,
            Error::ReaderGone,
        ];
        let mut codes: Vec<i32> = variants.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), variants.len());
    }

    #[test]
    fn io_error_wraps_and_has_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Error = io.into();
        assert!(err.source().is_some());
        assert!(err.to_string().contains("boom"));
    }
}
