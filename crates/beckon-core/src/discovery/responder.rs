//! Holder side of discovery.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

use super::{DiscoveryPacket, PacketKind, PeerTable, MAX_PACKET_SIZE};
use crate::error::{Error, Result};

/// Answers `discover` queries with this holder's ports.
#[derive(Debug)]
pub struct DiscoveryResponder {
    socket: UdpSocket,
    answer: Vec<u8>,
    peers: PeerTable,
}

impl DiscoveryResponder {
    /// Bind the discovery port and answer with `answer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    pub fn bind(port: u16, answer: &DiscoveryPacket) -> Result<Self> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;

        socket.set_reuse_address(true)?;

        #[cfg(target_os = "macos")]
        socket.set_reuse_port(true)?;

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        tracing::info!("Answering discovery on udp/{}", socket.local_addr()?.port());

        Ok(Self {
            socket,
            answer: serde_json::to_vec(answer).map_err(|e| Error::Internal(e.to_string()))?,
            peers: PeerTable::new(),
        })
    }

    /// Record queriers in `peers` instead of a private table.
    #[must_use]
    pub fn with_peers(mut self, peers: PeerTable) -> Self {
        self.peers = peers;
        self
    }

    /// Port the responder is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Table of peers that queried us.
    pub fn peers(&self) -> PeerTable {
        self.peers.clone()
    }

    /// Answer queries forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails.
    pub async fn run(self) -> Result<()> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let (len, source) = self.socket.recv_from(&mut buf).await?;
            let Some(packet) = DiscoveryPacket::decode(&buf[..len]) else {
                continue;
            };
            if packet.kind != PacketKind::Discover {
                continue;
            }

            tracing::debug!("Discovery query from {} ({})", source, packet.device_name);
            if let Err(e) = self.socket.send_to(&self.answer, source).await {
                tracing::warn!("Cannot answer discovery query from {}: {}", source, e);
            }
            self.remember(&packet, source).await;
        }
    }

    async fn remember(&self, packet: &DiscoveryPacket, source: SocketAddr) {
        if let Some(peer) = packet.peer_at(source) {
            self.peers.record(peer).await;
        }
    }
}
