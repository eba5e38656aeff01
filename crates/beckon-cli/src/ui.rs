//! UI utilities for Beckon CLI.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Result;

use beckon_core::coordinator::TransferEvent;

/// Print the banner of a request.
pub fn print_header(file_name: &str, shared: &Path, peer: Option<&str>) {
    println!();
    println!("Beckon v{}", beckon_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  File:    {}", file_name);
    println!("  Shared:  {}", shared.display());
    if let Some(peer) = peer {
        println!("  Holder:  {}", peer);
    }
    println!();
}

/// Print one status update.
///
/// With `json` every event is a JSON line; with `quiet` only the final
/// outcome is printed.
pub fn print_event(event: &TransferEvent, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    if quiet && !event.is_terminal() {
        return Ok(());
    }

    let marker = match event {
        TransferEvent::Completed { .. } => "✓",
        TransferEvent::Failed { .. } => "✗",
        _ => "•",
    };
    println!("  {} {}", marker, event);
    Ok(())
}

/// Print the banner of the serve command.
pub fn print_serving(
    device_name: &str,
    shared: &Path,
    files: SocketAddr,
    signals: SocketAddr,
    discovery_port: Option<u16>,
) {
    println!();
    println!("Beckon v{}", beckon_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Device:   {}", device_name);
    println!("  Sharing:  {}", shared.display());
    println!("  Files:    tcp://{}", files);
    println!("  Signals:  ws://{}", signals);
    if let Some(port) = discovery_port {
        println!("  Discover: udp/{}", port);
    }
    println!();
    println!("  Waiting for requests... (Ctrl+C to stop)");
    println!();
}

/// Print a request received from a peer.
pub fn print_incoming(file_name: &str, from: SocketAddr, available: bool) {
    let note = if available {
        "offered for fetch"
    } else {
        "not in the shared folder"
    };
    println!("  {} wants '{}' ({})", from.ip(), file_name, note);
}
