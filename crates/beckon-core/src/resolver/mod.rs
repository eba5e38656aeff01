//! Destination and folder choosers.
//!
//! Picking where a file is saved (and which folder is shared) is left to the
//! UI: a file dialog, a terminal prompt, or a fixed directory. The
//! [`PathResolver`] wraps those capabilities and performs exactly one round
//! trip per call. A cancellation is a normal answer, not an error, and is
//! never retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{Error, Result};

/// Answer of a chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The user picked this path
    Chosen(PathBuf),
    /// The user dismissed the chooser
    Cancelled,
}

/// Capability that asks where a requested file should be saved.
pub trait DestinationChooser: Send + Sync {
    /// Ask for a destination, suggesting `suggested_name` as the file name.
    fn choose_destination<'a>(&'a self, suggested_name: &'a str)
        -> BoxFuture<'a, Result<Destination>>;
}

/// Capability that asks which folder to share or watch.
pub trait FolderChooser: Send + Sync {
    /// Ask for a folder.
    fn choose_folder(&self) -> BoxFuture<'_, Result<Destination>>;
}

/// Request/response wrapper over the chooser capabilities.
///
/// Holds no state between calls; cloning is cheap.
#[derive(Clone)]
pub struct PathResolver {
    destinations: Arc<dyn DestinationChooser>,
    folders: Option<Arc<dyn FolderChooser>>,
}

impl PathResolver {
    /// Create a resolver over a destination chooser.
    pub fn new(destinations: Arc<dyn DestinationChooser>) -> Self {
        Self {
            destinations,
            folders: None,
        }
    }

    /// Attach a folder chooser.
    #[must_use]
    pub fn with_folder_chooser(mut self, folders: Arc<dyn FolderChooser>) -> Self {
        self.folders = Some(folders);
        self
    }

    /// Ask for the save destination of `suggested_name`.
    ///
    /// Relative answers are made absolute against the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the chooser itself fails. Cancellation is `Ok`.
    pub async fn choose_destination(&self, suggested_name: &str) -> Result<Destination> {
        match self.destinations.choose_destination(suggested_name).await? {
            Destination::Chosen(path) => {
                let path = absolutize(&path)?;
                tracing::debug!("Destination for '{}': {}", suggested_name, path.display());
                Ok(Destination::Chosen(path))
            }
            Destination::Cancelled => {
                tracing::debug!("Destination chooser cancelled for '{}'", suggested_name);
                Ok(Destination::Cancelled)
            }
        }
    }

    /// Ask for a folder and check that it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if no folder chooser is attached, the chooser fails, or
    /// the chosen path is not a directory.
    pub async fn choose_folder(&self) -> Result<Destination> {
        let folders = self
            .folders
            .as_ref()
            .ok_or_else(|| Error::Internal("no folder chooser configured".to_string()))?;

        match folders.choose_folder().await? {
            Destination::Chosen(path) => {
                let path = absolutize(&path)?;
                if !path.is_dir() {
                    return Err(Error::DirectoryNotFound(path.display().to_string()));
                }
                Ok(Destination::Chosen(path))
            }
            Destination::Cancelled => Ok(Destination::Cancelled),
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Chooser that always answers with a fixed directory.
///
/// Destinations are `<directory>/<suggested name>`; as a folder chooser it
/// returns the directory itself. Used for non-interactive runs.
#[derive(Debug, Clone)]
pub struct FixedDestination {
    directory: PathBuf,
}

impl FixedDestination {
    /// Create a chooser answering with `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl DestinationChooser for FixedDestination {
    fn choose_destination<'a>(
        &'a self,
        suggested_name: &'a str,
    ) -> BoxFuture<'a, Result<Destination>> {
        Box::pin(async move { Ok(Destination::Chosen(self.directory.join(suggested_name))) })
    }
}

impl FolderChooser for FixedDestination {
    fn choose_folder(&self) -> BoxFuture<'_, Result<Destination>> {
        Box::pin(async move { Ok(Destination::Chosen(self.directory.clone())) })
    }
}
