//! Keywarden error types.

use thiserror::Error;

/// Errors returned by access-control operations.
///
/// Every variant except [`KeywardenError::ConfigError`] is an expected,
/// recoverable outcome that the transport layer renders into a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeywardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Key or user access entry does not exist.
    #[error("Not found")]
    NotFound,

    /// Caller lacks the role required for the operation.
    #[error("Forbidden")]
    Forbidden,

    /// The role change targets a user whose role cannot change.
    #[error("Invalid role change target")]
    InvalidTarget,

    /// Malformed input to an issuance or grant.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot could not be read or written.
    #[error("Snapshot I/O error: {0}")]
    SnapshotIO(String),

    /// Snapshot failed its integrity check or has an unsupported version.
    ///
    /// The digest is unkeyed: it catches truncation and accidental edits,
    /// not a deliberate rewrite.
    #[error("Snapshot corrupt: {0}")]
    SnapshotCorrupt(String),
}
