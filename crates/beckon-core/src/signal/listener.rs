//! Holder side of the signaling channel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{FileRequestReply, SignalMessage};
use crate::discovery::{self, DiscoverySettings, PeerTable};
use crate::error::Result;

/// A file request received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    /// Requested file name
    pub file_name: String,
    /// Address the request came from
    pub from: SocketAddr,
    /// Whether the shared folder has the file, if the listener serves one
    pub available: Option<bool>,
}

/// Shared folder offered through the file server.
#[derive(Debug, Clone)]
struct Serving {
    shared_dir: PathBuf,
    file_port: u16,
}

/// Peers answered to `discover_peers`.
#[derive(Debug, Clone)]
struct PeerLookup {
    peers: PeerTable,
    settings: Option<DiscoverySettings>,
}

#[derive(Debug, Default)]
struct Context {
    serving: Option<Serving>,
    lookup: Option<PeerLookup>,
}

/// Accepts signaling connections and forwards parsed requests.
///
/// Every text frame is answered with a small JSON reply. A listener that
/// [serves](Self::serving) a shared folder tells requesters whether it has a
/// file and on which port they can fetch it.
pub struct SignalListener {
    listener: TcpListener,
    context: Context,
}

impl SignalListener {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Signal listener on ws://{}", listener.local_addr()?);
        Ok(Self {
            listener,
            context: Context::default(),
        })
    }

    /// Answer file requests and listings from `shared_dir`, offering files on
    /// `file_port`.
    #[must_use]
    pub fn serving(mut self, shared_dir: impl Into<PathBuf>, file_port: u16) -> Self {
        self.context.serving = Some(Serving {
            shared_dir: shared_dir.into(),
            file_port,
        });
        self
    }

    /// Answer `discover_peers` from `peers`, refreshed by a scan with
    /// `settings` when given.
    #[must_use]
    pub fn with_peers(mut self, peers: PeerTable, settings: Option<DiscoverySettings>) -> Self {
        self.context.lookup = Some(PeerLookup { peers, settings });
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `requests` is closed.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn run(self, requests: mpsc::UnboundedSender<SignalRequest>) -> Result<()> {
        let context = Arc::new(self.context);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, from) = accepted?;
                    let requests = requests.clone();
                    let context = Arc::clone(&context);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, from, &context, requests).await {
                            tracing::debug!("Signal connection from {} ended: {}", from, e);
                        }
                    });
                }
                () = requests.closed() => {
                    tracing::debug!("Signal listener stopping");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    from: SocketAddr,
    context: &Context,
    requests: mpsc::UnboundedSender<SignalRequest>,
) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::debug!("Signal connection from {}", from);

    while let Some(message) = ws.next().await {
        let reply = match message? {
            Message::Text(text) => match SignalMessage::parse(&text) {
                Ok(SignalMessage::ReceiveFile(file_name)) => {
                    file_requested(context, file_name, from, &requests)
                }
                Ok(SignalMessage::GetLocalFilesInfo) => local_files(context).await,
                Ok(SignalMessage::DiscoverPeers) => peer_list(context).await,
                Err(e) => {
                    tracing::warn!("Bad signal message from {}: {}", from, e);
                    json!({ "error": e.to_string() })
                }
            },
            Message::Binary(_) => {
                json!({ "error": "invalid message format, expected text" })
            }
            Message::Close(_) => break,
            _ => continue,
        };

        // The requester usually closed already.
        if ws.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }

    Ok(())
}

fn file_requested(
    context: &Context,
    file_name: String,
    from: SocketAddr,
    requests: &mpsc::UnboundedSender<SignalRequest>,
) -> Value {
    let (reply, available) = match &context.serving {
        Some(serving) if serving.shared_dir.join(&file_name).is_file() => (
            FileRequestReply::available(&file_name, serving.file_port),
            Some(true),
        ),
        Some(_) => (FileRequestReply::not_found(&file_name), Some(false)),
        None => (FileRequestReply::received(&file_name), None),
    };
    tracing::info!("{} requested '{}'", from, file_name);

    let _ = requests.send(SignalRequest {
        file_name,
        from,
        available,
    });
    serde_json::to_value(reply).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

async fn local_files(context: &Context) -> Value {
    let Some(serving) = &context.serving else {
        return json!({ "error": "no shared folder" });
    };

    let shared_dir = serving.shared_dir.clone();
    let listed = tokio::task::spawn_blocking(move || crate::file::list_shared(&shared_dir)).await;
    match listed {
        Ok(Ok(files)) => json!({ "type": "local_files_list", "files": files }),
        Ok(Err(e)) => json!({ "error": e.to_string() }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn peer_list(context: &Context) -> Value {
    let Some(lookup) = &context.lookup else {
        return json!({ "type": "peer_list", "peers": [] });
    };

    if let Some(settings) = &lookup.settings {
        match discovery::discover(settings).await {
            Ok(found) => {
                for peer in found {
                    lookup.peers.record(peer).await;
                }
            }
            Err(e) => tracing::warn!("Peer discovery failed: {}", e),
        }
    }

    json!({ "type": "peer_list", "peers": lookup.peers.peers().await })
}
