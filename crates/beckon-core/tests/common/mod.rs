//! Common test utilities for `Beckon` integration tests.
//!
//! This module provides temp files and test doubles for the coordinator's
//! capabilities.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Notify};

use beckon_core::coordinator::{CoordinatorConfig, TransferEvent};
use beckon_core::fetch::{FileFetcher, Fetched};
use beckon_core::resolver::{Destination, DestinationChooser};
use beckon_core::signal::{HolderAnswer, Signaler};
use beckon_core::{Error, Result};

/// How long a test waits for any single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Coordinator settings without a watcher, so tests inject arrivals.
pub fn local_config(shared: &Path) -> CoordinatorConfig {
    CoordinatorConfig {
        watch: false,
        ..CoordinatorConfig::new(shared)
    }
}

/// A loopback address nothing listens on.
pub fn closed_port_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    drop(listener);
    addr.to_string()
}

/// Receive the next event or panic after [`EVENT_TIMEOUT`].
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<TransferEvent>) -> TransferEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("Timed out waiting for an event")
        .expect("Event stream closed")
}

/// Collect events up to and including the first terminal one.
pub async fn events_until_terminal(
    events: &mut mpsc::UnboundedReceiver<TransferEvent>,
) -> Vec<TransferEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = event.is_terminal();
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Number of copies the events report.
pub fn copies_started(events: &[TransferEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, TransferEvent::Fulfilling { .. }))
        .count()
}

/// Position of the first event matching `predicate`.
pub fn position(events: &[TransferEvent], predicate: impl Fn(&TransferEvent) -> bool) -> usize {
    events
        .iter()
        .position(predicate)
        .expect("Expected event not found")
}

/// Chooser that answers `<directory>/<name>` once its gate is opened.
pub struct GatedChooser {
    directory: PathBuf,
    gate: Arc<Notify>,
}

impl GatedChooser {
    /// Create a chooser and the gate that releases its answer.
    pub fn new(directory: impl Into<PathBuf>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                directory: directory.into(),
                gate: Arc::clone(&gate),
            },
            gate,
        )
    }
}

impl DestinationChooser for GatedChooser {
    fn choose_destination<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Destination>> {
        Box::pin(async move {
            self.gate.notified().await;
            Ok(Destination::Chosen(self.directory.join(name)))
        })
    }
}

/// Chooser that is always cancelled.
pub struct CancellingChooser;

impl DestinationChooser for CancellingChooser {
    fn choose_destination<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<Destination>> {
        Box::pin(async { Ok(Destination::Cancelled) })
    }
}

/// Signaler that records calls and answers or fails as configured.
#[derive(Default)]
pub struct RecordingSignaler {
    calls: Mutex<Vec<(String, String)>>,
    fail: bool,
    answer: HolderAnswer,
}

impl RecordingSignaler {
    /// A signaler whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A signaler the holder always answers with `answer`.
    pub fn answering(answer: HolderAnswer) -> Self {
        Self {
            answer,
            ..Self::default()
        }
    }

    /// `(peer, file_name)` of every call so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Signaler for RecordingSignaler {
    fn notify<'a>(
        &'a self,
        peer: &'a str,
        file_name: &'a str,
    ) -> BoxFuture<'a, Result<HolderAnswer>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((peer.to_string(), file_name.to_string()));
            if self.fail {
                Err(Error::SignalingFailed {
                    peer: peer.to_string(),
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(self.answer)
            }
        })
    }
}

/// Fetcher serving the same bytes for every name, or failing.
pub struct StaticFetcher {
    content: Option<Vec<u8>>,
    peers: Mutex<Vec<String>>,
}

impl StaticFetcher {
    /// Serve `content`.
    pub fn serving(content: &[u8]) -> Self {
        Self {
            content: Some(content.to_vec()),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Fail every fetch.
    pub fn failing() -> Self {
        Self {
            content: None,
            peers: Mutex::new(Vec::new()),
        }
    }

    /// File server addresses fetched from so far.
    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().unwrap().clone()
    }
}

impl FileFetcher for StaticFetcher {
    fn fetch<'a>(&'a self, peer: &'a str, file_name: &'a str) -> BoxFuture<'a, Result<Fetched>> {
        Box::pin(async move {
            self.peers.lock().unwrap().push(peer.to_string());
            let content = self
                .content
                .clone()
                .ok_or_else(|| Error::FetchFailed(format!("{file_name}: file not found")))?;
            Ok(Fetched {
                size: content.len() as u64,
                reader: Box::pin(std::io::Cursor::new(content)),
            })
        })
    }
}
