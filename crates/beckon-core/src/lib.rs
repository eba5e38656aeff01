//! # Beckon Core Library
//!
//! `beckon-core` coordinates delivery of a named file from a holder's shared
//! folder to a destination picked by the requester.
//!
//! ## Features
//!
//! - **One copy per request**: a request is fulfilled by at most one copy,
//!   whatever order the destination and the file show up in
//! - **Shared folder watching**: files that land in the watched folder after
//!   a request was made satisfy it automatically
//! - **Lightweight signaling**: the holder is told about a wanted file with a
//!   single `receive_file:<name>` WebSocket message
//! - **Direct fetch**: pull the bytes straight from the holder's file server,
//!   always or whenever the holder offers the file
//! - **Discovery**: find holders on the local network by UDP broadcast
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`connection`] - Peer address parsing
//! - [`coordinator`] - Transfer request table and state machine
//! - [`discovery`] - Finding holders on the local network
//! - [`mod@file`] - File name validation and helpers
//! - [`fetch`] - Direct byte fetch from a holder and the holder's file server
//! - [`resolver`] - Destination and folder chooser capabilities
//! - [`signal`] - Signaling message, sender and listener
//! - [`watcher`] - Shared folder watching
//!
//! ## Example
//!
//! ```rust,ignore
//! use beckon_core::coordinator::{Capabilities, CoordinatorConfig, TransferCoordinator};
//! use beckon_core::resolver::{FixedDestination, PathResolver};
//!
//! let resolver = PathResolver::new(Arc::new(FixedDestination::new("/home/me/Downloads")));
//! let (handle, mut events) =
//!     TransferCoordinator::spawn(CoordinatorConfig::new("/srv/shared"), Capabilities::local(resolver))?;
//!
//! handle.request_file("report.pdf").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod file;
pub mod resolver;
pub mod signal;
pub mod watcher;

pub use error::{Error, FailureReason, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port of the signaling listener (WebSocket)
pub const DEFAULT_SIGNAL_PORT: u16 = 8765;

/// Default port of the holder's file server (TCP)
pub const DEFAULT_FILE_PORT: u16 = 5001;

/// Default debounce window for shared folder events in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Default connect timeout for signaling and fetch connections in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
