//! Error types for Beckon.
//!
//! [`Error`] covers every failing operation in the library. [`FailureReason`]
//! is narrower: it is the terminal reason attached to a transfer request that
//! did not complete, and is what the UI displays verbatim.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialized `Result` type for Beckon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Beckon.
#[derive(Error, Debug)]
pub enum Error {
    /// A request for this file name is already in flight (E001)
    #[error("a request for '{0}' is already in flight")]
    DuplicateRequest(String),

    /// File name is not a plain name inside the shared folder (E002)
    #[error("invalid file name '{0}': must be a plain file name")]
    InvalidFileName(String),

    /// Signaling peer could not be reached (E003)
    #[error("cannot signal peer {peer}: {reason}")]
    SignalingFailed {
        /// Peer address
        peer: String,
        /// What went wrong
        reason: String,
    },

    /// Fetching bytes from the holder failed (E004)
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Directory not found
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// File system watcher error
    #[error("file watcher error: {0}")]
    WatcherError(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Invalid user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// The coordinator task is no longer running
    #[error("transfer coordinator has stopped")]
    CoordinatorStopped,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateRequest(_) => Some("E001"),
            Self::InvalidFileName(_) => Some("E002"),
            Self::SignalingFailed { .. } => Some("E003"),
            Self::FetchFailed(_) => Some("E004"),
            _ => None,
        }
    }

    /// Returns whether the user may sensibly try the same thing again.
    ///
    /// The coordinator itself never retries; this only guides the UI.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SignalingFailed { .. } | Self::FetchFailed(_))
    }
}

/// Why a transfer request ended without delivering the file.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The destination chooser was cancelled
    #[error("no destination chosen")]
    NoDestination,

    /// The signaling channel could not be opened or the send failed
    #[error("signaling peer unreachable: {0}")]
    SignalingUnreachable(String),

    /// The source file disappeared between detection and copy
    #[error("source file vanished before it could be copied")]
    SourceVanished,

    /// I/O failure while copying
    #[error("copy failed: {0}")]
    CopyError(String),

    /// The configured request timeout elapsed
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// The chosen destination would write into the watched shared folder
    #[error("destination is inside the shared folder: {0}")]
    DestinationInSharedFolder(String),

    /// The holder answered that it does not have the file
    #[error("holder does not have the file")]
    NotOnHolder,

    /// Direct fetch from the holder failed
    #[error("fetch from holder failed: {0}")]
    FetchFailed(String),

    /// The coordinator shut down while the request was pending
    #[error("coordinator shut down")]
    Shutdown,
}

impl FailureReason {
    /// Short machine-readable name of the reason.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoDestination => "no_destination",
            Self::SignalingUnreachable(_) => "signaling_unreachable",
            Self::SourceVanished => "source_vanished",
            Self::CopyError(_) => "copy_error",
            Self::Timeout(_) => "timeout",
            Self::DestinationInSharedFolder(_) => "destination_in_shared_folder",
            Self::NotOnHolder => "not_on_holder",
            Self::FetchFailed(_) => "fetch_failed",
            Self::Shutdown => "shutdown",
        }
    }

    /// Timeout after `after`, in whole seconds rounded up.
    #[must_use]
    pub fn timed_out(after: Duration) -> Self {
        let secs = after
            .as_secs()
            .saturating_add(u64::from(after.subsec_nanos() > 0));
        Self::Timeout(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DuplicateRequest("a".into()).code(), Some("E001"));
        assert_eq!(Error::InvalidFileName("../a".into()).code(), Some("E002"));
        assert_eq!(Error::CoordinatorStopped.code(), None);
    }

    #[test]
    fn test_recoverable() {
        let err = Error::SignalingFailed {
            peer: "127.0.0.1:8765".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_recoverable());
        assert!(!Error::DuplicateRequest("a".into()).is_recoverable());
    }

    #[test]
    fn test_failure_reason_display_is_verbatim() {
        let reason = FailureReason::SignalingUnreachable("connection refused".into());
        assert_eq!(
            reason.to_string(),
            "signaling peer unreachable: connection refused"
        );
        assert_eq!(reason.kind(), "signaling_unreachable");
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(
            FailureReason::timed_out(Duration::from_millis(100)),
            FailureReason::Timeout(1)
        );
        assert_eq!(
            FailureReason::timed_out(Duration::from_millis(1500)),
            FailureReason::Timeout(2)
        );
        assert_eq!(
            FailureReason::timed_out(Duration::from_secs(30)),
            FailureReason::Timeout(30)
        );
        assert_eq!(
            FailureReason::timed_out(Duration::from_millis(100)).to_string(),
            "request timed out after 1 seconds"
        );
    }

    #[test]
    fn test_failure_reason_serialization() {
        let json = serde_json::to_string(&FailureReason::NoDestination).unwrap();
        assert_eq!(json, r#"{"kind":"no_destination"}"#);

        let json = serde_json::to_string(&FailureReason::CopyError("disk full".into())).unwrap();
        assert_eq!(json, r#"{"kind":"copy_error","detail":"disk full"}"#);
    }
}
