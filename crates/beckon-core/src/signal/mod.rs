//! Signaling between requester and holder.
//!
//! A requester tells a holder that it wants a file by opening a WebSocket
//! connection, sending a single text frame `receive_file:<name>`, and closing
//! the connection. The holder's JSON reply is read if it arrives within
//! [`ANSWER_TIMEOUT`]: a holder serving its shared folder says whether it has
//! the file and which port its file server listens on. A holder that stays
//! silent is taken to have received the request.
//!
//! Two more commands take no payload: `get_local_files_info` lists the
//! holder's shared folder and `discover_peers` lists the peers it knows.
//!
//! The holder side is [`SignalListener`], which parses those frames and hands
//! the file requests to the application.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use crate::connection::parse_host_address;
use crate::error::{Error, Result};

mod listener;

pub use listener::{SignalListener, SignalRequest};

/// Command word of the file request message.
pub const RECEIVE_FILE_COMMAND: &str = "receive_file";

/// Command word asking for the holder's shared files.
pub const LIST_FILES_COMMAND: &str = "get_local_files_info";

/// Command word asking for the peers the holder knows.
pub const DISCOVER_PEERS_COMMAND: &str = "discover_peers";

/// Status of a file request the holder can serve or only acknowledge.
pub const REQUEST_RECEIVED_STATUS: &str = "request_received";

/// Status of a file request for a file the holder does not have.
pub const FILE_NOT_FOUND_STATUS: &str = "file_not_found_locally";

/// How long a requester waits for the holder's reply.
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(2);

/// A message on the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Ask the peer to deliver the named file
    ReceiveFile(String),
    /// Ask for the files in the peer's shared folder
    GetLocalFilesInfo,
    /// Ask for the peers the peer has discovered
    DiscoverPeers,
}

impl SignalMessage {
    /// Encode as the single-line wire text.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::ReceiveFile(name) => format!("{RECEIVE_FILE_COMMAND}:{name}"),
            Self::GetLocalFilesInfo => LIST_FILES_COMMAND.to_string(),
            Self::DiscoverPeers => DISCOVER_PEERS_COMMAND.to_string(),
        }
    }

    /// Parse `command:payload` or bare `command` wire text.
    ///
    /// The command and payload are trimmed; the payload is split at the first
    /// `:` only, so file names may contain colons.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] for an unknown command, a file request
    /// whose payload is not a plain file name, or a payload on a command that
    /// takes none.
    pub fn parse(text: &str) -> Result<Self> {
        let (command, payload) = text.split_once(':').unwrap_or((text, ""));
        let payload = payload.trim();

        let bare = |message: Self| {
            if payload.is_empty() {
                Ok(message)
            } else {
                Err(Error::ProtocolError(format!(
                    "'{}' takes no payload",
                    command.trim()
                )))
            }
        };

        match command.trim() {
            RECEIVE_FILE_COMMAND => {
                let name = crate::file::validate_file_name(payload)
                    .map_err(|e| Error::ProtocolError(e.to_string()))?;
                Ok(Self::ReceiveFile(name.to_string()))
            }
            LIST_FILES_COMMAND => bare(Self::GetLocalFilesInfo),
            DISCOVER_PEERS_COMMAND => bare(Self::DiscoverPeers),
            other => Err(Error::ProtocolError(format!("unknown command: {other}"))),
        }
    }
}

/// JSON reply to a file request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequestReply {
    /// [`REQUEST_RECEIVED_STATUS`] or [`FILE_NOT_FOUND_STATUS`]
    pub status: String,
    /// Requested file name
    pub filename: String,
    /// Port of the holder's file server, when it serves the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_port: Option<u16>,
}

impl FileRequestReply {
    /// The request was taken note of.
    pub fn received(filename: impl Into<String>) -> Self {
        Self {
            status: REQUEST_RECEIVED_STATUS.to_string(),
            filename: filename.into(),
            file_port: None,
        }
    }

    /// The file is in the shared folder and served on `file_port`.
    pub fn available(filename: impl Into<String>, file_port: u16) -> Self {
        Self {
            file_port: Some(file_port),
            ..Self::received(filename)
        }
    }

    /// The file is not in the shared folder.
    pub fn not_found(filename: impl Into<String>) -> Self {
        Self {
            status: FILE_NOT_FOUND_STATUS.to_string(),
            filename: filename.into(),
            file_port: None,
        }
    }
}

/// What a holder answered to a file request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HolderAnswer {
    /// The holder acknowledged the request or did not answer in time
    #[default]
    Received,
    /// The holder has the file and serves it on `file_port`
    Available {
        /// File server port on the holder's host
        file_port: u16,
    },
    /// The holder does not have the file
    NotFound,
}

impl HolderAnswer {
    /// Interpret a reply frame; anything unrecognised counts as received.
    pub fn from_reply(text: &str) -> Self {
        let Ok(reply) = serde_json::from_str::<FileRequestReply>(text) else {
            return Self::Received;
        };
        match (reply.status.as_str(), reply.file_port) {
            (FILE_NOT_FOUND_STATUS, _) => Self::NotFound,
            (REQUEST_RECEIVED_STATUS, Some(file_port)) => Self::Available { file_port },
            _ => Self::Received,
        }
    }
}

/// Capability that notifies a holder that a file is wanted.
pub trait Signaler: Send + Sync {
    /// Send `receive_file:<file_name>` to `peer` and report its answer.
    fn notify<'a>(
        &'a self,
        peer: &'a str,
        file_name: &'a str,
    ) -> BoxFuture<'a, Result<HolderAnswer>>;
}

/// [`Signaler`] over a short-lived WebSocket connection.
#[derive(Debug, Clone)]
pub struct WebSocketSignaler {
    connect_timeout: Duration,
}

impl Default for WebSocketSignaler {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

impl WebSocketSignaler {
    /// Create a signaler that gives up connecting after `connect_timeout`.
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn send(&self, peer: &str, file_name: &str) -> Result<HolderAnswer> {
        let failed = |reason: String| Error::SignalingFailed {
            peer: peer.to_string(),
            reason,
        };

        let addr = parse_host_address(peer, crate::DEFAULT_SIGNAL_PORT)?;
        let url = format!("ws://{addr}/");

        let (mut ws, _) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| failed(format!("no connection after {:?}", self.connect_timeout)))?
                .map_err(|e| failed(e.to_string()))?;

        let message = SignalMessage::ReceiveFile(file_name.to_string()).encode();
        ws.send(Message::Text(message))
            .await
            .map_err(|e| failed(e.to_string()))?;

        let answer = match tokio::time::timeout(ANSWER_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => HolderAnswer::from_reply(&text),
            _ => HolderAnswer::Received,
        };

        if let Err(e) = ws.close(None).await {
            tracing::debug!("Closing signal connection to {} failed: {}", addr, e);
        }

        tracing::info!("Signaled {} for '{}' ({:?})", addr, file_name, answer);
        Ok(answer)
    }
}

impl Signaler for WebSocketSignaler {
    fn notify<'a>(
        &'a self,
        peer: &'a str,
        file_name: &'a str,
    ) -> BoxFuture<'a, Result<HolderAnswer>> {
        Box::pin(self.send(peer, file_name))
    }
}
