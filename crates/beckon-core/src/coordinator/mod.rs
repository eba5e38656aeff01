//! Transfer request coordination.
//!
//! The [`TransferCoordinator`] owns the table of live requests, one per file
//! name. Everything that changes the table goes through a single task:
//! requests from the UI, arrivals from the [`ShareWatcher`], and the answers of
//! the destination chooser, the signaler, the fetcher and the copy, which all
//! run in their own tasks and post their result back as a command. Because
//! only that task writes to the table, a request enters `Fulfilling` at most
//! once however its events interleave.
//!
//! Status updates are delivered on an event channel returned by
//! [`TransferCoordinator::spawn`]. Every accepted request ends with exactly
//! one [`TransferEvent::Completed`] or [`TransferEvent::Failed`].

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{Config, DeliveryMode, DuplicatePolicy, ShareConfig};
use crate::connection::parse_host_address;
use crate::error::{Error, FailureReason, Result};
use crate::fetch::{self, FileFetcher, TcpFileFetcher};
use crate::resolver::{Destination, PathResolver};
use crate::signal::{HolderAnswer, Signaler, WebSocketSignaler};
use crate::watcher::{FileArrived, ShareWatcher, WatchConfig};

mod copy;
mod request;

pub use request::{Origin, RequestId, Step, TransferRequest, TransferState};

/// Settings for a [`TransferCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Shared folder checked for present files and watched for arrivals
    pub shared_dir: PathBuf,
    /// Signaling address of the holder
    pub peer: Option<String>,
    /// File server address of the holder, overriding the peer's host and port
    pub fetch_peer: Option<String>,
    /// File server port on the peer's host when the holder offers none
    pub file_port: u16,
    /// How the holder delivers files
    pub mode: DeliveryMode,
    /// What to do with a second request for a live file name
    pub duplicate_policy: DuplicatePolicy,
    /// Fail requests still waiting after this long
    pub request_timeout: Option<Duration>,
    /// Compare checksums after copying
    pub verify_checksum: bool,
    /// Where fetched files are staged
    pub staging_dir: PathBuf,
    /// Watch the shared folder for arrivals
    pub watch: bool,
    /// File name patterns the watcher ignores
    pub exclude_patterns: Vec<String>,
    /// Debounce window for arrivals (ms)
    pub debounce_ms: u64,
}

impl CoordinatorConfig {
    /// Defaults for the given shared folder: no peer, push mode, rejecting
    /// duplicates, no timeout.
    pub fn new(shared_dir: impl Into<PathBuf>) -> Self {
        let share = ShareConfig::default();
        Self {
            shared_dir: shared_dir.into(),
            peer: None,
            fetch_peer: None,
            file_port: crate::DEFAULT_FILE_PORT,
            mode: DeliveryMode::Push,
            duplicate_policy: DuplicatePolicy::Reject,
            request_timeout: None,
            verify_checksum: true,
            staging_dir: std::env::temp_dir().join("beckon-staging"),
            watch: true,
            exclude_patterns: share.exclude_patterns,
            debounce_ms: share.debounce_ms,
        }
    }

    /// Settings for `shared_dir` taken from the loaded configuration.
    pub fn from_config(shared_dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            peer: config.signal.peer.clone(),
            fetch_peer: None,
            file_port: config.server.port,
            mode: config.transfer.mode,
            duplicate_policy: config.transfer.duplicate_policy,
            request_timeout: config.transfer.request_timeout,
            verify_checksum: config.transfer.verify_checksum,
            staging_dir: config.staging_dir(),
            watch: true,
            exclude_patterns: config.share.exclude_patterns.clone(),
            debounce_ms: config.share.debounce_ms,
        }
    }

    /// Signal `peer` for files that are not present.
    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// File server to fetch from, given the port the holder offered.
    fn fetch_address(&self, offered: Option<u16>) -> Option<String> {
        self.fetch_peer.clone().or_else(|| {
            self.peer
                .as_deref()
                .and_then(|peer| holder_file_address(peer, offered.unwrap_or(self.file_port)))
        })
    }
}

/// File server address on the host of a signaling peer address.
fn holder_file_address(peer: &str, file_port: u16) -> Option<String> {
    let addr = parse_host_address(peer, crate::DEFAULT_SIGNAL_PORT).ok()?;
    Some(SocketAddr::new(addr.ip(), file_port).to_string())
}

/// The collaborators a coordinator talks to.
#[derive(Clone)]
pub struct Capabilities {
    /// Asks where files should be saved
    pub resolver: PathResolver,
    /// Tells holders which file is wanted
    pub signaler: Option<Arc<dyn Signaler>>,
    /// Pulls files from holders in fetch mode, or when a holder offers them
    pub fetcher: Option<Arc<dyn FileFetcher>>,
}

impl Capabilities {
    /// Only local arrivals, no holder is ever contacted.
    pub fn local(resolver: PathResolver) -> Self {
        Self {
            resolver,
            signaler: None,
            fetcher: None,
        }
    }

    /// WebSocket signaling and TCP fetching.
    pub fn networked(resolver: PathResolver, connect_timeout: Duration) -> Self {
        Self {
            resolver,
            signaler: Some(Arc::new(WebSocketSignaler::new(connect_timeout))),
            fetcher: Some(Arc::new(TcpFileFetcher::new(connect_timeout))),
        }
    }

    /// Use `signaler` to contact holders.
    #[must_use]
    pub fn with_signaler(mut self, signaler: Arc<dyn Signaler>) -> Self {
        self.signaler = Some(signaler);
        self
    }

    /// Use `fetcher` to pull files from holders.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn FileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

/// Status update for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    /// A request was registered
    Accepted {
        /// Request id
        id: RequestId,
        /// Requested file
        file_name: String,
        /// Where the file is expected to come from
        origin: Origin,
    },
    /// The save destination is known
    DestinationChosen {
        /// Requested file
        file_name: String,
        /// Chosen destination
        destination: PathBuf,
    },
    /// The holder was told about the request
    RequestSent {
        /// Requested file
        file_name: String,
        /// Holder address
        peer: String,
    },
    /// The file is available locally
    FileReady {
        /// Requested file
        file_name: String,
        /// Where the file is
        source: PathBuf,
    },
    /// The copy started
    Fulfilling {
        /// Requested file
        file_name: String,
        /// File being written
        destination: PathBuf,
    },
    /// The file was saved
    Completed {
        /// Requested file
        file_name: String,
        /// Saved file
        destination: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// The request failed
    Failed {
        /// Requested file
        file_name: String,
        /// Why
        reason: FailureReason,
    },
}

impl TransferEvent {
    /// File the event is about.
    pub fn file_name(&self) -> &str {
        match self {
            Self::Accepted { file_name, .. }
            | Self::DestinationChosen { file_name, .. }
            | Self::RequestSent { file_name, .. }
            | Self::FileReady { file_name, .. }
            | Self::Fulfilling { file_name, .. }
            | Self::Completed { file_name, .. }
            | Self::Failed { file_name, .. } => file_name,
        }
    }

    /// Whether this is the last event of its request.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { file_name, .. } => write!(f, "Requested '{file_name}'"),
            Self::DestinationChosen {
                file_name,
                destination,
            } => write!(f, "'{file_name}' will be saved to {}", destination.display()),
            Self::RequestSent { file_name, peer } => write!(f, "Asked {peer} for '{file_name}'"),
            Self::FileReady { file_name, .. } => write!(f, "'{file_name}' is available"),
            Self::Fulfilling {
                file_name,
                destination,
            } => write!(f, "Copying '{file_name}' to {}", destination.display()),
            Self::Completed {
                file_name,
                destination,
                bytes,
            } => write!(
                f,
                "Saved '{file_name}' to {} ({})",
                destination.display(),
                crate::file::format_size(*bytes)
            ),
            Self::Failed { file_name, reason } => write!(f, "'{file_name}' failed: {reason}"),
        }
    }
}

/// Snapshot of a live request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestStatus {
    /// Request id
    pub id: RequestId,
    /// Requested file
    pub file_name: String,
    /// Current state
    pub state: TransferState,
    /// Where the file was expected to come from
    pub origin: Origin,
    /// Save destination, if chosen
    pub destination: Option<PathBuf>,
    /// Whether the holder was signaled
    pub signaled: bool,
    /// Whether this is an existing request a duplicate call attached to
    pub attached: bool,
}

impl RequestStatus {
    fn of(request: &TransferRequest, attached: bool) -> Self {
        Self {
            id: request.id,
            file_name: request.file_name.clone(),
            state: request.state.clone(),
            origin: request.origin,
            destination: request.destination.clone(),
            signaled: request.signaled,
            attached,
        }
    }
}

/// Identifies the request a background task works for.
#[derive(Debug, Clone)]
struct Ticket {
    id: RequestId,
    file_name: String,
}

enum Command {
    Request {
        file_name: String,
        destination: Option<PathBuf>,
        reply: oneshot::Sender<Result<RequestStatus>>,
    },
    Arrived(FileArrived),
    Chosen(Ticket, Result<Destination>),
    Signaled(Ticket, String, Result<HolderAnswer>),
    Fetched(Ticket, Result<PathBuf>),
    Copied(Ticket, std::result::Result<u64, FailureReason>),
    TimedOut(Ticket, Duration),
    Snapshot(oneshot::Sender<Vec<RequestStatus>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running coordinator.
///
/// Dropping every handle stops the coordinator as [`shutdown`](Self::shutdown)
/// would: pending requests fail and running copies are still reported.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Request `file_name`, asking the destination chooser where to save it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileName`] for names that are not a plain file
    /// name, [`Error::DuplicateRequest`] if the name is in flight and
    /// duplicates are rejected, or [`Error::CoordinatorStopped`].
    pub async fn request_file(&self, file_name: &str) -> Result<RequestStatus> {
        self.submit(file_name, None).await
    }

    /// Request `file_name` with an already known destination.
    ///
    /// The chooser is not asked. A destination that is an existing directory
    /// receives the file under its own name.
    ///
    /// # Errors
    ///
    /// Same as [`request_file`](Self::request_file), plus
    /// [`Error::InvalidInput`] if the file would be written into the shared
    /// folder.
    pub async fn request_file_to(
        &self,
        file_name: &str,
        destination: impl Into<PathBuf>,
    ) -> Result<RequestStatus> {
        self.submit(file_name, Some(destination.into())).await
    }

    async fn submit(&self, file_name: &str, destination: Option<PathBuf>) -> Result<RequestStatus> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Request {
            file_name: file_name.to_string(),
            destination,
            reply,
        })?;
        response.await.map_err(|_| Error::CoordinatorStopped)?
    }

    /// Report a file that became available, as the watcher would.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CoordinatorStopped`] if the coordinator is gone.
    pub fn file_arrived(&self, arrival: FileArrived) -> Result<()> {
        self.send(Command::Arrived(arrival))
    }

    /// Live requests, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CoordinatorStopped`] if the coordinator is gone.
    pub async fn snapshot(&self) -> Result<Vec<RequestStatus>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| Error::CoordinatorStopped)
    }

    /// Fail every request that is not copying and wait for running copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CoordinatorStopped`] if the coordinator is gone.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        response.await.map_err(|_| Error::CoordinatorStopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::CoordinatorStopped)
    }
}

/// Owner of the request table.
pub struct TransferCoordinator {
    config: CoordinatorConfig,
    caps: Capabilities,
    requests: HashMap<String, TransferRequest>,
    next_id: u64,
    events: mpsc::UnboundedSender<TransferEvent>,
    /// Where background tasks post their answers; never closes while the
    /// coordinator runs
    commands: mpsc::UnboundedSender<Command>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    stopping: bool,
}

impl TransferCoordinator {
    /// Start a coordinator on the current tokio runtime.
    ///
    /// Returns the handle to submit requests with and the status event
    /// stream. The coordinator runs until [`CoordinatorHandle::shutdown`] is
    /// called or every handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared folder doesn't exist or cannot be
    /// watched, or if the staging directory and the shared folder overlap.
    pub fn spawn(
        mut config: CoordinatorConfig,
        caps: Capabilities,
    ) -> Result<(CoordinatorHandle, mpsc::UnboundedReceiver<TransferEvent>)> {
        if !config.shared_dir.is_dir() {
            return Err(Error::DirectoryNotFound(
                config.shared_dir.display().to_string(),
            ));
        }
        config.shared_dir = config.shared_dir.canonicalize()?;

        if crate::file::is_within(&config.staging_dir, &config.shared_dir)
            || crate::file::is_within(&config.shared_dir, &config.staging_dir)
        {
            return Err(Error::InvalidInput(format!(
                "staging directory {} overlaps the shared folder {}",
                config.staging_dir.display(),
                config.shared_dir.display()
            )));
        }

        let watcher = if config.watch {
            let mut watcher = ShareWatcher::new(WatchConfig {
                directory: config.shared_dir.clone(),
                exclude_patterns: config.exclude_patterns.clone(),
                debounce_ms: config.debounce_ms,
            })?;
            watcher.start()?;
            Some(watcher)
        } else {
            None
        };

        let (handle_tx, handle_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pump = watcher.map(|watcher| tokio::spawn(pump_arrivals(watcher, internal_tx.clone())));

        tracing::info!(
            "Coordinator started for {} (peer: {}, mode: {:?})",
            config.shared_dir.display(),
            config.peer.as_deref().unwrap_or("none"),
            config.mode
        );

        let coordinator = Self {
            config,
            caps,
            requests: HashMap::new(),
            next_id: 0,
            events: event_tx,
            commands: internal_tx,
            shutdown_waiters: Vec::new(),
            stopping: false,
        };
        tokio::spawn(coordinator.run(handle_rx, internal_rx, pump));

        Ok((
            CoordinatorHandle {
                commands: handle_tx,
            },
            event_rx,
        ))
    }

    /// Handle commands until the coordinator is stopping and no request is
    /// left.
    ///
    /// Handles and background tasks post on separate channels, so a copy
    /// that is running when the last handle goes away still reports back.
    async fn run(
        mut self,
        mut handles: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Command>,
        pump: Option<JoinHandle<()>>,
    ) {
        let mut handles_open = true;

        loop {
            let command = tokio::select! {
                command = handles.recv(), if handles_open => {
                    let Some(command) = command else {
                        handles_open = false;
                        self.handles_dropped();
                        if self.requests.is_empty() {
                            break;
                        }
                        continue;
                    };
                    command
                }
                Some(command) = internal.recv() => command,
                else => break,
            };

            self.handle(command);
            if self.stopping && self.requests.is_empty() {
                break;
            }
        }

        if let Some(pump) = pump {
            pump.abort();
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        tracing::debug!("Coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Request {
                file_name,
                destination,
                reply,
            } => {
                let _ = reply.send(self.request(file_name, destination));
            }
            Command::Arrived(arrival) => self.file_ready(&arrival.name, None, arrival.path),
            Command::Chosen(ticket, answer) => self.destination_answered(&ticket, answer),
            Command::Signaled(ticket, peer, result) => self.signal_answered(&ticket, peer, result),
            Command::Fetched(ticket, Ok(path)) => {
                self.file_ready(&ticket.file_name, Some(ticket.id), path);
            }
            Command::Fetched(ticket, Err(e)) => {
                let reason = FailureReason::FetchFailed(match e {
                    Error::FetchFailed(message) => message,
                    other => other.to_string(),
                });
                self.advance(&ticket, |request| request.remote_failed(reason));
            }
            Command::Copied(ticket, result) => {
                self.advance(&ticket, |request| request.copy_finished(result));
            }
            Command::TimedOut(ticket, after) => {
                self.advance(&ticket, |request| {
                    request.fail(FailureReason::timed_out(after))
                });
            }
            Command::Snapshot(reply) => {
                let mut statuses: Vec<_> = self
                    .requests
                    .values()
                    .map(|request| RequestStatus::of(request, false))
                    .collect();
                statuses.sort_by_key(|status| status.id);
                let _ = reply.send(statuses);
            }
            Command::Shutdown(reply) => {
                self.shutdown_waiters.push(reply);
                self.stop();
            }
        }
    }

    fn handles_dropped(&mut self) {
        tracing::debug!("Every coordinator handle was dropped");
        self.stop();
    }

    /// Fail pending requests; running copies are left to finish.
    fn stop(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        self.fail_pending();
        if !self.requests.is_empty() {
            tracing::info!("Waiting for {} copies to finish", self.requests.len());
        }
    }

    fn request(&mut self, file_name: String, destination: Option<PathBuf>) -> Result<RequestStatus> {
        if self.stopping {
            return Err(Error::CoordinatorStopped);
        }
        crate::file::validate_file_name(&file_name)?;

        if let Some(target) = destination
            .as_deref()
            .map(|destination| copy::target_path(destination, &file_name))
            .filter(|target| crate::file::is_within(target, &self.config.shared_dir))
        {
            return Err(Error::InvalidInput(format!(
                "destination {} is inside the shared folder",
                target.display()
            )));
        }

        if let Some(live) = self.requests.get(&file_name) {
            return match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    tracing::debug!("Rejecting duplicate request for '{}'", file_name);
                    Err(Error::DuplicateRequest(file_name))
                }
                DuplicatePolicy::Attach => {
                    tracing::debug!("Attaching to request {} for '{}'", live.id, file_name);
                    Ok(RequestStatus::of(live, true))
                }
            };
        }

        self.next_id += 1;
        let ticket = Ticket {
            id: RequestId(self.next_id),
            file_name,
        };

        let local = self.config.shared_dir.join(&ticket.file_name);
        let source = local.is_file().then_some(local);
        let signal = self.signal_target();
        let fetching = self.config.mode == DeliveryMode::Fetch && self.caps.fetcher.is_some();

        let origin = if source.is_some() {
            Origin::LocalAlreadyPresent
        } else if signal.is_some() || fetching {
            Origin::RemotePending
        } else {
            Origin::LocalPendingArrival
        };

        let mut request = TransferRequest::new(
            ticket.id,
            ticket.file_name.clone(),
            destination.clone(),
            source.clone(),
            origin,
        );
        tracing::info!(
            "Request {} for '{}' accepted ({:?})",
            ticket.id,
            ticket.file_name,
            origin
        );

        self.emit(TransferEvent::Accepted {
            id: ticket.id,
            file_name: ticket.file_name.clone(),
            origin,
        });
        if let Some(destination) = destination {
            self.emit(TransferEvent::DestinationChosen {
                file_name: ticket.file_name.clone(),
                destination,
            });
        } else {
            self.start_chooser(ticket.clone());
        }
        if let Some(source) = source {
            self.emit(TransferEvent::FileReady {
                file_name: ticket.file_name.clone(),
                source,
            });
        } else if let Some((signaler, peer)) = signal {
            request.signaled = true;
            self.start_signal(ticket.clone(), signaler, peer);
        } else if fetching {
            self.start_fetch(ticket.clone(), None);
        } else {
            tracing::debug!(
                "Waiting for '{}' to arrive in {}",
                ticket.file_name,
                self.config.shared_dir.display()
            );
        }
        self.start_timeout(ticket.clone());

        let step = request.settle();
        let status = RequestStatus::of(&request, false);
        self.requests.insert(ticket.file_name.clone(), request);
        self.follow(&ticket, step);

        Ok(status)
    }

    /// Apply `transition` to the request `ticket` was issued for, if it is
    /// still live.
    fn advance(&mut self, ticket: &Ticket, transition: impl FnOnce(&mut TransferRequest) -> Step) {
        let Some(request) = self.live(ticket) else {
            tracing::debug!(
                "Dropping late answer for request {} ('{}')",
                ticket.id,
                ticket.file_name
            );
            return;
        };
        let step = transition(request);
        if step == Step::Ignored {
            tracing::debug!(
                "Request {} for '{}' ignored an event while {}",
                request.id,
                request.file_name,
                request.state
            );
        }
        self.follow(ticket, step);
    }

    fn live(&mut self, ticket: &Ticket) -> Option<&mut TransferRequest> {
        self.requests
            .get_mut(&ticket.file_name)
            .filter(|request| request.id == ticket.id)
    }

    fn follow(&mut self, ticket: &Ticket, step: Step) {
        match step {
            Step::Ignored | Step::Advanced => {}
            Step::Copy {
                source,
                destination,
            } => self.start_copy(ticket.clone(), source, &destination),
            Step::Completed { .. } | Step::Failed(_) => self.finish(ticket, step),
        }
    }

    fn finish(&mut self, ticket: &Ticket, outcome: Step) {
        let Some(request) = self.requests.remove(&ticket.file_name) else {
            return;
        };

        if let Some(staged) = request.source.as_deref().filter(|_| request.staged) {
            let _ = std::fs::remove_file(staged);
        }

        let event = match outcome {
            Step::Completed { bytes } => {
                let destination = request
                    .destination
                    .as_deref()
                    .map(|destination| copy::target_path(destination, &request.file_name))
                    .unwrap_or_default();
                tracing::info!(
                    "Request {} completed: '{}' saved to {}",
                    request.id,
                    request.file_name,
                    destination.display()
                );
                TransferEvent::Completed {
                    file_name: request.file_name,
                    destination,
                    bytes,
                }
            }
            Step::Failed(reason) => {
                tracing::warn!(
                    "Request {} for '{}' failed: {}",
                    request.id,
                    request.file_name,
                    reason
                );
                TransferEvent::Failed {
                    file_name: request.file_name,
                    reason,
                }
            }
            Step::Ignored | Step::Advanced | Step::Copy { .. } => return,
        };
        self.emit(event);
    }

    fn file_ready(&mut self, file_name: &str, id: Option<RequestId>, source: PathBuf) {
        let Some(request) = self
            .requests
            .get_mut(file_name)
            .filter(|request| id.is_none_or(|id| request.id == id))
        else {
            tracing::debug!("No live request for '{}', ignoring arrival", file_name);
            discard_staged(id, &source);
            return;
        };

        let ticket = Ticket {
            id: request.id,
            file_name: request.file_name.clone(),
        };
        let step = if id.is_some() {
            request.file_fetched(source.clone())
        } else {
            request.file_arrived(source.clone())
        };
        if step == Step::Ignored {
            tracing::debug!(
                "Duplicate arrival of '{}' while {}",
                file_name,
                request.state
            );
            discard_staged(id, &source);
            return;
        }

        self.emit(TransferEvent::FileReady {
            file_name: ticket.file_name.clone(),
            source,
        });
        self.follow(&ticket, step);
    }

    fn destination_answered(&mut self, ticket: &Ticket, answer: Result<Destination>) {
        match answer {
            Ok(Destination::Chosen(destination)) => {
                let target = copy::target_path(&destination, &ticket.file_name);
                if crate::file::is_within(&target, &self.config.shared_dir) {
                    let reason =
                        FailureReason::DestinationInSharedFolder(target.display().to_string());
                    self.advance(ticket, |request| request.fail(reason));
                    return;
                }

                let Some(request) = self.live(ticket) else {
                    return;
                };
                let step = request.destination_chosen(destination.clone());
                if step != Step::Ignored {
                    self.emit(TransferEvent::DestinationChosen {
                        file_name: ticket.file_name.clone(),
                        destination,
                    });
                }
                self.follow(ticket, step);
            }
            Ok(Destination::Cancelled) => {
                self.advance(ticket, TransferRequest::destination_cancelled);
            }
            Err(e) => {
                tracing::warn!("Destination chooser failed for '{}': {}", ticket.file_name, e);
                self.advance(ticket, TransferRequest::destination_cancelled);
            }
        }
    }

    fn signal_answered(&mut self, ticket: &Ticket, peer: String, result: Result<HolderAnswer>) {
        match result {
            Ok(answer) => {
                let Some(request) = self.live(ticket) else {
                    return;
                };
                let waiting = request.source.is_none();
                self.emit(TransferEvent::RequestSent {
                    file_name: ticket.file_name.clone(),
                    peer,
                });
                if !waiting {
                    return;
                }

                match answer {
                    HolderAnswer::NotFound => {
                        self.advance(ticket, |request| {
                            request.remote_failed(FailureReason::NotOnHolder)
                        });
                    }
                    HolderAnswer::Available { file_port } => {
                        tracing::debug!(
                            "Holder offers '{}' on port {}",
                            ticket.file_name,
                            file_port
                        );
                        self.start_fetch(ticket.clone(), Some(file_port));
                    }
                    HolderAnswer::Received if self.config.mode == DeliveryMode::Fetch => {
                        self.start_fetch(ticket.clone(), None);
                    }
                    HolderAnswer::Received => {}
                }
            }
            Err(e) => {
                let reason = match e {
                    Error::SignalingFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.advance(ticket, |request| {
                    request.remote_failed(FailureReason::SignalingUnreachable(reason))
                });
            }
        }
    }

    fn fail_pending(&mut self) {
        let pending: Vec<Ticket> = self
            .requests
            .values()
            .filter(|request| request.state != TransferState::Fulfilling)
            .map(|request| Ticket {
                id: request.id,
                file_name: request.file_name.clone(),
            })
            .collect();

        for ticket in pending {
            self.advance(&ticket, |request| request.fail(FailureReason::Shutdown));
        }
    }

    fn signal_target(&self) -> Option<(Arc<dyn Signaler>, String)> {
        Some((self.caps.signaler.clone()?, self.config.peer.clone()?))
    }

    fn start_chooser(&self, ticket: Ticket) {
        let resolver = self.caps.resolver.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let answer = resolver.choose_destination(&ticket.file_name).await;
            post(&commands, Command::Chosen(ticket, answer));
        });
    }

    fn start_signal(&self, ticket: Ticket, signaler: Arc<dyn Signaler>, peer: String) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = signaler.notify(&peer, &ticket.file_name).await;
            post(&commands, Command::Signaled(ticket, peer, result));
        });
    }

    fn start_fetch(&self, ticket: Ticket, offered_port: Option<u16>) {
        let (Some(fetcher), Some(peer)) = (
            self.caps.fetcher.clone(),
            self.config.fetch_address(offered_port),
        )
        else {
            tracing::debug!("No file server to fetch '{}' from", ticket.file_name);
            return;
        };

        let staging_dir = self.config.staging_dir.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tracing::debug!("Fetching '{}' from {}", ticket.file_name, peer);
            let result =
                fetch::download_to(fetcher.as_ref(), &peer, &ticket.file_name, &staging_dir).await;
            post(&commands, Command::Fetched(ticket, result));
        });
    }

    fn start_copy(&self, ticket: Ticket, source: PathBuf, destination: &Path) {
        let target = copy::target_path(destination, &ticket.file_name);
        tracing::info!(
            "Copying '{}' from {} to {}",
            ticket.file_name,
            source.display(),
            target.display()
        );
        self.emit(TransferEvent::Fulfilling {
            file_name: ticket.file_name.clone(),
            destination: target.clone(),
        });

        let verify = self.config.verify_checksum;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = copy::verified_copy(source, target, verify).await;
            post(&commands, Command::Copied(ticket, result));
        });
    }

    fn start_timeout(&self, ticket: Ticket) {
        let Some(after) = self.config.request_timeout else {
            return;
        };
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            post(&commands, Command::TimedOut(ticket, after));
        });
    }

    fn emit(&self, event: TransferEvent) {
        tracing::trace!("Event: {:?}", event);
        let _ = self.events.send(event);
    }
}

/// Forward watcher arrivals to the coordinator until it goes away.
async fn pump_arrivals(mut watcher: ShareWatcher, commands: mpsc::UnboundedSender<Command>) {
    while let Some(arrival) = watcher.next_arrival().await {
        if commands.send(Command::Arrived(arrival)).is_err() {
            break;
        }
    }
    let _ = watcher.stop();
}

fn post(commands: &mpsc::UnboundedSender<Command>, command: Command) {
    // The coordinator is gone only after its last request ended.
    let _ = commands.send(command);
}

/// Remove a fetched file nobody is going to copy.
fn discard_staged(id: Option<RequestId>, staged: &Path) {
    if id.is_some() {
        let _ = std::fs::remove_file(staged);
    }
}
