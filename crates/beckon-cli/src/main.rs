//! Beckon CLI - request files from a peer's shared folder
//!
//! Beckon asks a holder for a file by name and saves it wherever you choose,
//! whether the file is already in your shared folder, lands there later, or
//! has to be pulled from the holder.
//!
//! ## Quick Start
//!
//! ```bash
//! # On the holder: serves files, answers requests and discovery queries
//! beckon serve --shared ~/Public
//!
//! # On the requester: the holder offers the file and it is fetched
//! beckon request report.pdf --shared ~/Inbox --peer 192.168.1.20
//!
//! # Without --peer the network is scanned for a holder
//! beckon scan
//! beckon request report.pdf --shared ~/Inbox
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]
#![allow(clippy::struct_excessive_bools)]

use anyhow::Result;
use clap::Parser;

mod commands;
mod prompt;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.command.verbose(), cli.command.quiet());

    match cli.command {
        Command::Request(args) => commands::request::run(args).await,
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "warn,beckon=debug,beckon_core=debug"
    } else if quiet {
        "warn"
    } else {
        "warn,beckon=info,beckon_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
