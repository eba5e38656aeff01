//! A single transfer request and its state machine.
//!
//! Transitions are pure: they update the request and report what the
//! coordinator has to do next as a [`Step`]. Spawning copies, emitting events
//! and removing finished requests is left to the coordinator.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FailureReason;

/// Identifier of a request, unique for the lifetime of a coordinator.
///
/// Replies from background tasks carry the id of the request they were
/// started for, so they are never applied to a later request for the same
/// file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// The file is available, the destination is not known yet
    AwaitingDestination,
    /// The destination is known, the file is not available yet
    AwaitingFile,
    /// Neither the destination nor the file is known
    AwaitingBoth,
    /// The single copy of the request is running
    Fulfilling,
    /// The file was copied to its destination
    Completed,
    /// The request ended without delivering the file
    Failed(FailureReason),
}

impl TransferState {
    /// Whether the request has ended.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Short label for display.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AwaitingDestination => "awaiting destination",
            Self::AwaitingFile => "awaiting file",
            Self::AwaitingBoth => "awaiting destination and file",
            Self::Fulfilling => "copying",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Where the file was expected to come from when the request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Already in the shared folder
    LocalAlreadyPresent,
    /// Expected to land in the shared folder, no peer to ask
    LocalPendingArrival,
    /// Asked for from a remote holder
    RemotePending,
}

/// What the coordinator has to do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The event did not apply to this request
    Ignored,
    /// The request moved on but needs nothing else yet
    Advanced,
    /// The request entered `Fulfilling`; run exactly this copy
    Copy {
        /// File to copy from
        source: PathBuf,
        /// Destination chosen for the request
        destination: PathBuf,
    },
    /// The copy finished and the request is complete
    Completed {
        /// Bytes written to the destination
        bytes: u64,
    },
    /// The request failed
    Failed(FailureReason),
}

/// A request for one file, keyed by its name in the coordinator's table.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Request id
    pub id: RequestId,
    /// Requested file name
    pub file_name: String,
    /// Save destination, immutable once set
    pub destination: Option<PathBuf>,
    /// Where the file's bytes are, once known
    pub source: Option<PathBuf>,
    /// Current state
    pub state: TransferState,
    /// Where the file was expected to come from
    pub origin: Origin,
    /// Whether the holder was signaled for this request
    pub signaled: bool,
    /// Whether `source` is a fetched copy in the staging directory, removed
    /// once the request ends
    pub staged: bool,
}

impl TransferRequest {
    /// Create a request in the state implied by what is already known.
    ///
    /// Call [`settle`](Self::settle) afterwards; a request that knows both its
    /// source and destination starts out ready to copy.
    pub fn new(
        id: RequestId,
        file_name: impl Into<String>,
        destination: Option<PathBuf>,
        source: Option<PathBuf>,
        origin: Origin,
    ) -> Self {
        let state = waiting_state(destination.is_some(), source.is_some());
        Self {
            id,
            file_name: file_name.into(),
            destination,
            source,
            state,
            origin,
            signaled: false,
            staged: false,
        }
    }

    /// Whether the copy is running or the request has ended.
    fn is_settled(&self) -> bool {
        self.state == TransferState::Fulfilling || self.state.is_terminal()
    }

    /// Enter `Fulfilling` if both the source and destination are known,
    /// otherwise recompute the waiting state.
    pub fn settle(&mut self) -> Step {
        if self.is_settled() {
            return Step::Ignored;
        }

        match (&self.source, &self.destination) {
            (Some(source), Some(destination)) => {
                self.state = TransferState::Fulfilling;
                Step::Copy {
                    source: source.clone(),
                    destination: destination.clone(),
                }
            }
            (source, destination) => {
                self.state = waiting_state(destination.is_some(), source.is_some());
                Step::Advanced
            }
        }
    }

    /// The destination chooser answered with a path.
    pub fn destination_chosen(&mut self, destination: PathBuf) -> Step {
        if self.is_settled() || self.destination.is_some() {
            return Step::Ignored;
        }
        self.destination = Some(destination);
        self.settle()
    }

    /// The destination chooser was cancelled.
    pub fn destination_cancelled(&mut self) -> Step {
        if self.is_settled() || self.destination.is_some() {
            return Step::Ignored;
        }
        self.fail(FailureReason::NoDestination)
    }

    /// The file became available at `source`.
    ///
    /// Only the first arrival counts; later ones are no-ops.
    pub fn file_arrived(&mut self, source: PathBuf) -> Step {
        if self.is_settled() || self.source.is_some() {
            return Step::Ignored;
        }
        self.source = Some(source);
        self.settle()
    }

    /// A fetched copy of the file was staged at `source`.
    pub fn file_fetched(&mut self, source: PathBuf) -> Step {
        let step = self.file_arrived(source);
        if step != Step::Ignored {
            self.staged = true;
        }
        step
    }

    /// Signaling the holder or fetching from it failed.
    ///
    /// Irrelevant once the file is already here.
    pub fn remote_failed(&mut self, reason: FailureReason) -> Step {
        if self.source.is_some() {
            return Step::Ignored;
        }
        self.fail(reason)
    }

    /// Fail the request unless its copy is already running.
    pub fn fail(&mut self, reason: FailureReason) -> Step {
        if self.is_settled() {
            return Step::Ignored;
        }
        self.state = TransferState::Failed(reason.clone());
        Step::Failed(reason)
    }

    /// The copy started by entering `Fulfilling` finished.
    pub fn copy_finished(&mut self, result: Result<u64, FailureReason>) -> Step {
        if self.state != TransferState::Fulfilling {
            return Step::Ignored;
        }
        match result {
            Ok(bytes) => {
                self.state = TransferState::Completed;
                Step::Completed { bytes }
            }
            Err(reason) => {
                self.state = TransferState::Failed(reason.clone());
                Step::Failed(reason)
            }
        }
    }
}

const fn waiting_state(has_destination: bool, has_source: bool) -> TransferState {
    match (has_destination, has_source) {
        (true, _) => TransferState::AwaitingFile,
        (false, true) => TransferState::AwaitingDestination,
        (false, false) => TransferState::AwaitingBoth,
    }
}
