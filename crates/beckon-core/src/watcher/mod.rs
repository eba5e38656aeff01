//! Shared folder watching.
//!
//! [`ShareWatcher`] reports files that appear in the shared folder after
//! [`ShareWatcher::start`] was called. It uses the `notify` crate and handles:
//! - Debouncing, so a file is reported once its writes have gone quiet
//! - Pattern-based exclusion of temporary and partial files
//! - Renames into the folder (reported like creations)
//!
//! Files already present before `start` are not reported, and the same name
//! may be reported more than once (e.g. rename followed by a write). The
//! consumer is expected to check for pre-existing files and drop duplicates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::ShareConfig;
use crate::error::{Error, Result};

/// A file became available in the shared folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArrived {
    /// File name relative to the shared folder
    pub name: String,
    /// Absolute path of the file
    pub path: PathBuf,
}

/// Settings for a [`ShareWatcher`].
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Folder to watch (not recursive)
    pub directory: PathBuf,
    /// File name patterns to ignore
    pub exclude_patterns: Vec<String>,
    /// Debounce window for file events (ms)
    pub debounce_ms: u64,
}

impl WatchConfig {
    /// Watch `directory` with the exclusions and debounce from `share`.
    pub fn from_share(directory: impl Into<PathBuf>, share: &ShareConfig) -> Self {
        Self {
            directory: directory.into(),
            exclude_patterns: share.exclude_patterns.clone(),
            debounce_ms: share.debounce_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Watching,
    Stopped,
}

/// Watches the shared folder for arriving files.
///
/// # Example
///
/// ```rust,ignore
/// let mut watcher = ShareWatcher::new(WatchConfig::from_share("/srv/shared", &config.share))?;
/// watcher.start()?;
///
/// while let Some(arrival) = watcher.next_arrival().await {
///     println!("{} arrived", arrival.name);
/// }
/// ```
pub struct ShareWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<FileArrived>,
    config: Arc<WatchConfig>,
    debouncer: Debouncer,
    phase: Phase,
}

impl ShareWatcher {
    /// Create a watcher for the given configuration.
    ///
    /// The watcher is created but not started. Call `start()` to begin watching.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist
    /// - The exclusion patterns are invalid
    /// - The file system watcher cannot be created
    pub fn new(config: WatchConfig) -> Result<Self> {
        if !config.directory.is_dir() {
            return Err(Error::DirectoryNotFound(
                config.directory.display().to_string(),
            ));
        }

        // Events carry canonical paths on some platforms.
        let directory = config
            .directory
            .canonicalize()
            .unwrap_or_else(|_| config.directory.clone());
        let config = Arc::new(WatchConfig {
            directory,
            ..config
        });

        let matcher = PatternMatcher::new(&config.exclude_patterns)?;
        let filter_config = Arc::clone(&config);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => handle_notify_event(&filter_config, &matcher, &event, &event_tx),
            Err(e) => tracing::warn!("Shared folder watch error: {}", e),
        })
        .map_err(|e| Error::WatcherError(e.to_string()))?;

        let debouncer = Debouncer::new(config.debounce_ms);

        Ok(Self {
            watcher,
            event_rx,
            config,
            debouncer,
            phase: Phase::Idle,
        })
    }

    /// The folder being watched.
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Start watching the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher was already stopped or the directory
    /// cannot be watched.
    pub fn start(&mut self) -> Result<()> {
        match self.phase {
            Phase::Watching => return Ok(()),
            Phase::Stopped => {
                return Err(Error::WatcherError(
                    "watcher cannot be restarted once stopped".to_string(),
                ))
            }
            Phase::Idle => {}
        }

        self.watcher
            .watch(&self.config.directory, RecursiveMode::NonRecursive)
            .map_err(|e| Error::WatcherError(e.to_string()))?;
        self.phase = Phase::Watching;
        tracing::debug!("Watching {}", self.config.directory.display());
        Ok(())
    }

    /// Stop watching the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot stop watching the directory.
    pub fn stop(&mut self) -> Result<()> {
        if self.phase == Phase::Watching {
            self.watcher
                .unwatch(&self.config.directory)
                .map_err(|e| Error::WatcherError(e.to_string()))?;
        }
        self.phase = Phase::Stopped;
        Ok(())
    }

    /// Receive the next debounced arrival.
    ///
    /// Returns `None` once the watcher is stopped and every pending arrival
    /// was delivered.
    pub async fn next_arrival(&mut self) -> Option<FileArrived> {
        let window = Duration::from_millis(self.config.debounce_ms);
        loop {
            if self.phase == Phase::Stopped {
                while let Ok(arrival) = self.event_rx.try_recv() {
                    self.debouncer.add(arrival);
                }
                return self.debouncer.pop_any();
            }

            tokio::select! {
                arrival = self.event_rx.recv() => {
                    if let Some(arrival) = arrival {
                        self.debouncer.add(arrival);
                    } else {
                        return self.debouncer.pop_any();
                    }
                }
                () = tokio::time::sleep(window) => {
                    if let Some(arrival) = self.debouncer.flush_next() {
                        return Some(arrival);
                    }
                }
            }
        }
    }
}

/// Convert a notify event into arrivals for files directly inside the folder.
fn handle_notify_event(
    config: &WatchConfig,
    matcher: &PatternMatcher,
    event: &Event,
    tx: &mpsc::UnboundedSender<FileArrived>,
) {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(_) | ModifyKind::Data(_) | ModifyKind::Any)
    );
    if !relevant {
        return;
    }

    for path in &event.paths {
        if let Some(arrival) = arrival_for(config, matcher, path) {
            let _ = tx.send(arrival);
        }
    }
}

fn arrival_for(config: &WatchConfig, matcher: &PatternMatcher, path: &Path) -> Option<FileArrived> {
    if path.parent() != Some(config.directory.as_path()) {
        return None;
    }

    let name = path.file_name()?.to_str()?.to_string();
    if crate::file::is_partial(path) || matcher.is_excluded(Path::new(&name)) {
        tracing::debug!("Skipping excluded file: {}", path.display());
        return None;
    }

    // Renamed-away sources and directories show up too.
    if !path.is_file() {
        return None;
    }

    Some(FileArrived {
        name,
        path: path.to_path_buf(),
    })
}

/// Debouncer to coalesce rapid file system events.
///
/// Writing a file produces a create followed by several modify events. The
/// debouncer keeps the latest event per name and releases it after a quiet
/// period, by which time the writer is usually done.
struct Debouncer {
    pending: HashMap<String, (FileArrived, Instant)>,
    window_ms: u64,
}

impl Debouncer {
    fn new(window_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            window_ms,
        }
    }

    fn add(&mut self, arrival: FileArrived) {
        self.pending
            .insert(arrival.name.clone(), (arrival, Instant::now()));
    }

    /// Returns an arrival that has been quiet for longer than the window.
    fn flush_next(&mut self) -> Option<FileArrived> {
        let now = Instant::now();
        let window = Duration::from_millis(self.window_ms);

        let ready = self
            .pending
            .iter()
            .find(|(_, (_, time))| now.duration_since(*time) >= window)
            .map(|(name, _)| name.clone())?;

        self.pending.remove(&ready).map(|(arrival, _)| arrival)
    }

    /// Remove any pending arrival regardless of the window.
    fn pop_any(&mut self) -> Option<FileArrived> {
        let name = self.pending.keys().next()?.clone();
        self.pending.remove(&name).map(|(arrival, _)| arrival)
    }
}

/// Pattern matcher for file exclusions.
struct PatternMatcher {
    set: globset::GlobSet,
}

impl PatternMatcher {
    fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = globset::GlobSetBuilder::new();

        for pattern in patterns {
            let glob = globset::Glob::new(pattern)
                .map_err(|e| Error::InvalidConfig {
                    key: "share.exclude_patterns".to_string(),
                    reason: format!("invalid glob pattern: {e}"),
                })?;
            builder.add(glob);
        }

        let set = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build glob set: {e}")))?;

        Ok(Self { set })
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }
}
