//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use beckon_core::config::Config;
use beckon_core::resolver::{Destination, PathResolver};

use crate::prompt::PromptChooser;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> Config {
    Config::load().unwrap_or_default()
}

/// Shared folder from the command line, the configuration, or a prompt.
pub async fn shared_dir(arg: Option<PathBuf>, config: &Config, interactive: bool) -> Result<PathBuf> {
    if let Some(dir) = arg.or_else(|| config.share.directory.clone()) {
        return Ok(dir);
    }
    if !interactive {
        bail!("No shared folder. Pass --shared or set share.directory");
    }

    let prompt = Arc::new(PromptChooser::new(PathBuf::from(".")));
    let resolver = PathResolver::new(prompt.clone()).with_folder_chooser(prompt);
    match resolver.choose_folder().await? {
        Destination::Chosen(dir) => Ok(dir),
        Destination::Cancelled => bail!("No shared folder chosen"),
    }
}

pub mod config;
pub mod request;
pub mod scan;
pub mod serve;

/// Beckon - request files from a peer's shared folder
#[derive(Parser)]
#[command(name = "beckon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Request a file and save it locally
    Request(RequestArgs),

    /// Serve a shared folder to requesters
    Serve(ServeArgs),

    /// Scan the local network for holders
    Scan(ScanArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

impl Command {
    /// Whether detailed logging was asked for.
    pub const fn verbose(&self) -> bool {
        match self {
            Self::Request(args) => args.verbose,
            Self::Serve(args) => args.verbose,
            Self::Scan(_) | Self::Config(_) => false,
        }
    }

    /// Whether output should be minimal.
    pub const fn quiet(&self) -> bool {
        match self {
            Self::Request(args) => args.quiet || args.json,
            Self::Scan(args) => args.json,
            Self::Serve(_) | Self::Config(_) => false,
        }
    }
}

/// Arguments for the request command
#[derive(Parser)]
pub struct RequestArgs {
    /// Name of the file to request
    pub name: String,

    /// Save to this path without asking
    #[arg(long, value_name = "PATH")]
    pub to: Option<PathBuf>,

    /// Save into this directory without asking
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Shared folder to check and watch
    #[arg(short, long, value_name = "DIR")]
    pub shared: Option<PathBuf>,

    /// Holder to signal (host or host:port); found by a network scan if unset
    #[arg(short, long, env = "BECKON_PEER")]
    pub peer: Option<String>,

    /// Do not scan the network for a holder
    #[arg(long)]
    pub no_discover: bool,

    /// Pull the file from the holder's file server
    #[arg(long)]
    pub fetch: bool,

    /// File server address, if not on the holder's default port
    #[arg(long, value_name = "ADDR")]
    pub fetch_from: Option<String>,

    /// Give up after this long (e.g., 30s, 5m)
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Non-interactive mode (save to the download directory)
    #[arg(short, long)]
    pub yes: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Detailed logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Shared folder to serve
    #[arg(short, long, value_name = "DIR")]
    pub shared: Option<PathBuf>,

    /// File server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Signal listener port
    #[arg(long)]
    pub signal_port: Option<u16>,

    /// Detailed logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments for the scan command
#[derive(Parser)]
pub struct ScanArgs {
    /// Duration to scan (e.g., 5s, 10s)
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Discovery port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set
        value: String,
    },

    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}
