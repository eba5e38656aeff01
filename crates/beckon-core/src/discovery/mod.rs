//! Peer discovery on the local network.
//!
//! A requester that knows no holder broadcasts a `discover` packet on the
//! discovery port. Every holder running a [`DiscoveryResponder`] answers the
//! sender directly with a `peer_info` packet naming its signaling and file
//! server ports, and remembers the sender if it announced a signaling port
//! of its own.
//!
//! ## Packet
//!
//! ```json
//! {
//!   "protocol": "beckon",
//!   "version": "1.0",
//!   "type": "peer_info",
//!   "device_name": "studio-mac",
//!   "signal_port": 8765,
//!   "file_port": 5001
//! }
//! ```

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::Result;

mod responder;

pub use responder::DiscoveryResponder;

/// Default discovery port (UDP).
pub const DEFAULT_DISCOVERY_PORT: u16 = 5003;

/// Default time a scan waits for answers.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(3);

const PROTOCOL: &str = "beckon";
const VERSION: &str = "1.0";
const MAX_PACKET_SIZE: usize = 2048;

/// What a discovery packet is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// Who is out there?
    Discover,
    /// Answer to a `discover`
    PeerInfo,
}

/// Packet exchanged on the discovery port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPacket {
    /// Protocol identifier
    pub protocol: String,
    /// Protocol version
    pub version: String,
    /// Packet type
    #[serde(rename = "type")]
    pub kind: PacketKind,
    /// Display name of the sender
    pub device_name: String,
    /// Sender's signaling port, 0 if it does not listen
    pub signal_port: u16,
    /// Sender's file server port, 0 if it does not serve
    pub file_port: u16,
}

impl DiscoveryPacket {
    /// A `discover` query.
    pub fn discover(device_name: &str, signal_port: u16) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            version: VERSION.to_string(),
            kind: PacketKind::Discover,
            device_name: device_name.to_string(),
            signal_port,
            file_port: 0,
        }
    }

    /// A `peer_info` answer.
    pub fn peer_info(device_name: &str, signal_port: u16, file_port: u16) -> Self {
        Self {
            kind: PacketKind::PeerInfo,
            file_port,
            ..Self::discover(device_name, signal_port)
        }
    }

    /// Check if this is a packet of our protocol.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.protocol == PROTOCOL && self.version == VERSION
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(bytes)
            .ok()
            .filter(Self::is_valid)
    }

    /// The peer this packet describes, if it sent from `source` and listens
    /// for signals.
    fn peer_at(&self, source: SocketAddr) -> Option<DiscoveredPeer> {
        (self.signal_port != 0).then(|| DiscoveredPeer {
            device_name: self.device_name.clone(),
            signal_addr: SocketAddr::new(source.ip(), self.signal_port),
            file_addr: (self.file_port != 0).then(|| SocketAddr::new(source.ip(), self.file_port)),
        })
    }
}

/// A peer found on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    /// Display name
    pub device_name: String,
    /// Signaling address, usable as `--peer`
    pub signal_addr: SocketAddr,
    /// File server address, if the peer serves files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_addr: Option<SocketAddr>,
}

/// Peers a holder has seen, shared between the responder and the signal
/// listener.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: Arc<Mutex<HashMap<SocketAddr, DiscoveredPeer>>>,
}

impl PeerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `peer`, replacing an older entry for the same address.
    pub async fn record(&self, peer: DiscoveredPeer) {
        self.peers.lock().await.insert(peer.signal_addr, peer);
    }

    /// Known peers ordered by address.
    pub async fn peers(&self) -> Vec<DiscoveredPeer> {
        let mut peers: Vec<_> = self.peers.lock().await.values().cloned().collect();
        peers.sort_by_key(|peer| peer.signal_addr);
        peers
    }
}

/// Where and how long to look for peers.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Address the `discover` packet is sent to
    pub target: SocketAddr,
    /// How long answers are collected
    pub window: Duration,
    /// Name announced in the query
    pub device_name: String,
    /// Our own signaling port, 0 if we do not listen
    pub signal_port: u16,
}

impl DiscoverySettings {
    /// Broadcast on the local network to `port`.
    pub fn broadcast(port: u16, window: Duration, device_name: impl Into<String>) -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port)),
            window,
            device_name: device_name.into(),
            signal_port: 0,
        }
    }

    /// Announce our own signaling port so answering holders remember us.
    #[must_use]
    pub fn announcing(mut self, signal_port: u16) -> Self {
        self.signal_port = signal_port;
        self
    }
}

/// Send a `discover` query and collect the answers until the window closes.
///
/// Answers are deduplicated by signaling address.
///
/// # Errors
///
/// Returns an error if the socket cannot be created or the query cannot be
/// sent.
pub async fn discover(settings: &DiscoverySettings) -> Result<Vec<DiscoveredPeer>> {
    let socket = query_socket()?;
    let query = serde_json::to_vec(&DiscoveryPacket::discover(
        &settings.device_name,
        settings.signal_port,
    ))
    .map_err(|e| crate::error::Error::Internal(e.to_string()))?;
    socket.send_to(&query, settings.target).await?;
    tracing::debug!("Sent discovery query to {}", settings.target);

    let deadline = Instant::now() + settings.window;
    let mut peers: HashMap<SocketAddr, DiscoveredPeer> = HashMap::new();
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, source))) => {
                let Some(packet) = DiscoveryPacket::decode(&buf[..len]) else {
                    continue;
                };
                if packet.kind != PacketKind::PeerInfo {
                    continue;
                }
                if let Some(peer) = packet.peer_at(source) {
                    tracing::debug!("Found {} at {}", peer.device_name, peer.signal_addr);
                    peers.insert(peer.signal_addr, peer);
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Error receiving discovery answer: {}", e);
            }
            Err(_) => break,
        }
    }

    let mut peers: Vec<_> = peers.into_values().collect();
    peers.sort_by_key(|peer| peer.signal_addr);
    Ok(peers)
}

/// Broadcast-capable socket on an ephemeral port.
fn query_socket() -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}
