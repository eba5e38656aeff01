//! Serve command implementation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use beckon_core::discovery::{DiscoveryPacket, DiscoveryResponder, DiscoverySettings, PeerTable};
use beckon_core::fetch::FileServer;
use beckon_core::signal::SignalListener;

use super::ServeArgs;
use crate::ui;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let global = super::load_config();
    let shared = super::shared_dir(args.shared, &global, true).await?;

    let host = if global.server.localhost_only {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    let file_port = args.port.unwrap_or(global.server.port);
    let signal_port = args.signal_port.unwrap_or(global.signal.listen_port);

    let server = FileServer::bind(SocketAddr::new(host, file_port), &shared).await?;
    let file_addr = server.local_addr()?;
    let listener = SignalListener::bind(SocketAddr::new(host, signal_port))
        .await?
        .serving(&shared, file_addr.port());
    let signal_addr = listener.local_addr()?;

    let peers = PeerTable::new();
    let responder = if global.discovery.enabled && !global.server.localhost_only {
        let answer = DiscoveryPacket::peer_info(
            &global.general.device_name,
            signal_addr.port(),
            file_addr.port(),
        );
        match DiscoveryResponder::bind(global.discovery.port, &answer) {
            Ok(responder) => Some(responder.with_peers(peers.clone())),
            Err(e) => {
                tracing::warn!("Discovery disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    // `discover_peers` rescans only where queries can be answered back.
    let rescan = responder.as_ref().map(|_| {
        DiscoverySettings::broadcast(
            global.discovery.port,
            global.discovery.scan_timeout,
            &global.general.device_name,
        )
        .announcing(signal_addr.port())
    });
    let listener = listener.with_peers(peers, rescan);

    ui::print_serving(
        &global.general.device_name,
        &shared,
        file_addr,
        signal_addr,
        responder.as_ref().map(|_| global.discovery.port),
    );

    let (request_tx, mut requests) = mpsc::unbounded_channel();
    let mut server_task = tokio::spawn(server.run());
    let mut listener_task = tokio::spawn(listener.run(request_tx));
    if let Some(responder) = responder {
        tokio::spawn(async move {
            if let Err(e) = responder.run().await {
                tracing::warn!("Discovery responder stopped: {}", e);
            }
        });
    }

    loop {
        tokio::select! {
            Some(request) = requests.recv() => {
                ui::print_incoming(&request.file_name, request.from, request.available == Some(true));
            }
            result = &mut server_task => {
                result??;
                bail!("File server stopped");
            }
            result = &mut listener_task => {
                result??;
                bail!("Signal listener stopped");
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  Stopped.");
                return Ok(());
            }
        }
    }
}
