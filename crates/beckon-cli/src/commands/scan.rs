//! Scan command implementation.

use anyhow::{Context, Result};

use beckon_core::config::parse_duration;
use beckon_core::discovery::{self, DiscoveredPeer, DiscoverySettings};

use super::ScanArgs;

/// Run the scan command.
pub async fn run(args: ScanArgs) -> Result<()> {
    let global = super::load_config();

    let window = match &args.duration {
        Some(duration) => parse_duration(duration)
            .context("Invalid duration format. Use formats like '5s', '10s', '30s'")?,
        None => global.discovery.scan_timeout,
    };
    let port = args.port.unwrap_or(global.discovery.port);

    if !args.json {
        println!();
        println!("Scanning for holders ({}s)...", window.as_secs());
        println!();
    }

    let settings = DiscoverySettings::broadcast(port, window, &global.general.device_name);
    let peers = discovery::discover(&settings)
        .await
        .context("Failed to send discovery query")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "peers": peers }))?);
    } else {
        display_peers(&peers);
    }

    Ok(())
}

/// Display peers as text table.
fn display_peers(peers: &[DiscoveredPeer]) {
    println!("Holders on Network:");
    println!("{}", "─".repeat(60));
    println!("  {:20}  {:21}  {:21}", "Device", "Signals", "Files");
    println!("{}", "─".repeat(60));

    if peers.is_empty() {
        println!("  (no holders found)");
        println!("{}", "─".repeat(60));
        return;
    }

    for peer in peers {
        let files = peer
            .file_addr
            .map_or_else(|| "-".to_string(), |addr| addr.to_string());
        println!(
            "  {:20}  {:21}  {:21}",
            truncate_string(&peer.device_name, 20),
            peer.signal_addr.to_string(),
            files
        );
    }

    println!("{}", "─".repeat(60));
}

/// Truncate a string to fit within a maximum width.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 1).collect();
        format!("{}…", truncated)
    }
}
