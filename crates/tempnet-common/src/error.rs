//! Unified error type for the tempnet workspace.
//!
//! Errors fall into a small number of classes: pre-flight validation,
//! collisions (which only ever drive retry loops and are never surfaced on
//! their own), exhausted retries, consistency failures after a kernel object
//! has been created, and namespace switches that cannot be trusted anymore.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TempnetError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A namespace reference or annotation is malformed or of the wrong kind.
    #[error("invalid namespace reference: {message}")]
    InvalidNamespace {
        /// Description of what is wrong with the reference.
        message: String,
    },

    /// Switching the current thread into or out of a namespace failed.
    ///
    /// The thread is no longer in a trustworthy namespace state.
    #[error("namespace switch failed: {message}")]
    NamespaceSwitch {
        /// Description of the failed switch.
        message: String,
    },

    /// The calling thread cannot be used for namespace-sensitive work.
    #[error("thread claim error: {message}")]
    Thread {
        /// Description of the conflict.
        message: String,
    },

    /// A netlink request failed.
    #[error("netlink {operation} failed: {message}")]
    Netlink {
        /// Operation that was requested, such as "create link".
        operation: String,
        /// Error message reported by the netlink layer.
        message: String,
        /// OS error number, if the kernel returned one.
        errno: Option<i32>,
    },

    /// A transient object could not be created for a reason other than a
    /// name or ID collision.
    #[error("cannot create a transient {kind} {id}, reason: {reason}")]
    Create {
        /// Kind of object requested.
        kind: String,
        /// Name or numeric ID that was attempted.
        id: String,
        /// Underlying reason.
        reason: String,
    },

    /// The bounded retry loop ran out of attempts.
    #[error("too many failed attempts ({attempts}) to create a transient {kind}")]
    Exhausted {
        /// Kind of object requested.
        kind: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A bounded wait elapsed without the awaited condition becoming true.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        /// Description of the awaited condition.
        what: String,
        /// Duration waited.
        after: Duration,
    },

    /// A registered teardown action failed.
    #[error("teardown of {label} failed: {message}")]
    Teardown {
        /// Label of the teardown action.
        label: String,
        /// Description of the failure.
        message: String,
    },
}

impl TempnetError {
    /// Returns the OS error number carried by this error, if any.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            Self::Netlink { errno, .. } => *errno,
            _ => None,
        }
    }

    /// Reports whether this error signals that a name or ID is already taken.
    ///
    /// Collisions are the only recoverable class; they drive retry loops.
    #[must_use]
    pub fn is_collision(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TempnetError>;
