//! Request command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use beckon_core::config::{parse_duration, Config, DeliveryMode};
use beckon_core::coordinator::{Capabilities, CoordinatorConfig, TransferCoordinator, TransferEvent};
use beckon_core::discovery::{self, DiscoveredPeer, DiscoverySettings};
use beckon_core::resolver::{FixedDestination, PathResolver};

use super::RequestArgs;
use crate::prompt::PromptChooser;
use crate::ui;

/// Run the request command.
pub async fn run(args: RequestArgs) -> Result<()> {
    let mut global = super::load_config();

    let interactive = !args.yes && !args.json;
    let shared = super::shared_dir(args.shared.clone(), &global, interactive).await?;

    if let Some(peer) = args.peer.clone() {
        global.signal.peer = Some(peer);
    }
    if args.fetch {
        global.transfer.mode = DeliveryMode::Fetch;
    }
    if let Some(timeout) = &args.timeout {
        global.transfer.request_timeout =
            Some(parse_duration(timeout).context("Invalid --timeout")?);
    }

    let wanted_remotely = !shared.join(&args.name).is_file();
    let discovered = if global.signal.peer.is_none()
        && global.discovery.enabled
        && !args.no_discover
        && wanted_remotely
    {
        find_holder(&global, args.json).await
    } else {
        None
    };
    if let Some(holder) = &discovered {
        global.signal.peer = Some(holder.signal_addr.to_string());
    }

    let mut config = CoordinatorConfig::from_config(&shared, &global);
    config.fetch_peer = args
        .fetch_from
        .clone()
        .or_else(|| discovered.and_then(|holder| holder.file_addr.map(|addr| addr.to_string())));

    let download_dir = args
        .output_dir
        .clone()
        .or_else(|| global.general.download_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let resolver = if args.output_dir.is_some() || !interactive {
        PathResolver::new(Arc::new(FixedDestination::new(&download_dir)))
    } else {
        PathResolver::new(Arc::new(PromptChooser::new(download_dir)))
    };
    let caps = Capabilities::networked(resolver, global.signal.connect_timeout);

    if !args.quiet && !args.json {
        ui::print_header(&args.name, &shared, config.peer.as_deref());
    }

    let (handle, mut events) = TransferCoordinator::spawn(config, caps)?;

    if let Some(to) = args.to {
        handle.request_file_to(&args.name, to).await?;
    } else {
        handle.request_file(&args.name).await?;
    }

    let mut outcome = None;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                ui::print_event(&event, args.json, args.quiet)?;
                if event.is_terminal() {
                    outcome = Some(event);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling request");
                handle.shutdown().await?;
            }
        }
    }

    handle.shutdown().await.ok();

    match outcome {
        Some(TransferEvent::Completed { .. }) => Ok(()),
        Some(TransferEvent::Failed { reason, .. }) => bail!("Request failed: {}", reason),
        _ => bail!("Coordinator stopped before the request finished"),
    }
}

/// Scan the network and pick the first holder that answers.
async fn find_holder(global: &Config, quiet: bool) -> Option<DiscoveredPeer> {
    if !quiet {
        println!(
            "  Looking for a holder ({}s)...",
            global.discovery.scan_timeout.as_secs()
        );
    }

    let settings = DiscoverySettings::broadcast(
        global.discovery.port,
        global.discovery.scan_timeout,
        &global.general.device_name,
    );
    let peers = match discovery::discover(&settings).await {
        Ok(peers) => peers,
        Err(e) => {
            tracing::warn!("Holder discovery failed: {}", e);
            return None;
        }
    };

    if peers.len() > 1 {
        tracing::info!(
            "{} holders answered, using {}",
            peers.len(),
            peers[0].device_name
        );
    }
    let holder = peers.into_iter().next();
    if holder.is_none() {
        tracing::warn!("No holder answered; waiting for the file to arrive locally");
    }
    holder
}
