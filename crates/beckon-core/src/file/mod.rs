//! File name handling shared by the coordinator, watcher and file server.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Suffix of in-progress files written next to their final location.
pub const PARTIAL_SUFFIX: &str = ".beckon-part";

/// Longest file name accepted from a peer or the user.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Check that `name` is a plain file name: a single normal path component.
///
/// Requests are keyed by file name and resolved inside the shared folder, so
/// separators, `..`, and absolute paths are refused.
///
/// # Examples
///
/// ```
/// use beckon_core::file::validate_file_name;
///
/// assert!(validate_file_name("report.pdf").is_ok());
/// assert!(validate_file_name("../etc/passwd").is_err());
/// ```
///
/// # Errors
///
/// Returns [`Error::InvalidFileName`] if the name is empty, too long, or not
/// a single normal component.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let invalid = || Error::InvalidFileName(name.to_string());

    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}

/// Path of the hidden partial file used while writing `target`.
#[must_use]
pub fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().to_string());
    target.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
}

/// Whether `path` names a partial file produced by [`partial_path`].
#[must_use]
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
}

/// Absolute form of `path` with symlinks resolved as far as it exists.
///
/// `.` and `..` are folded lexically, then the longest existing ancestor is
/// canonicalized and the missing tail appended, so paths that are about to be
/// created compare equal to their eventual canonical form.
#[must_use]
pub fn resolve_path(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    let mut absolute = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                absolute.pop();
            }
            other => absolute.push(other),
        }
    }

    let mut tail = Vec::new();
    let mut existing = absolute.as_path();
    loop {
        if let Ok(resolved) = existing.canonicalize() {
            return tail
                .iter()
                .rev()
                .fold(resolved, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// Whether `path` is `dir` or lies somewhere below it, after resolving both.
#[must_use]
pub fn is_within(path: &Path, dir: &Path) -> bool {
    resolve_path(path).starts_with(resolve_path(dir))
}

/// A file offered in a shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    /// File name inside the folder
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Size in bytes
    pub size: u64,
}

/// Regular files directly in `dir`, sorted by name.
///
/// Hidden files and partial files are left out.
///
/// # Errors
///
/// Returns an error if the folder cannot be read.
pub fn list_shared(dir: &Path) -> Result<Vec<SharedFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if file_name.starts_with('.') || is_partial(Path::new(&file_name)) {
            continue;
        }
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            files.push(SharedFile {
                file_name,
                size: metadata.len(),
            });
        }
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Format a byte count as a human-readable size.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
