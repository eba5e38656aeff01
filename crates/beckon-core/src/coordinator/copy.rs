//! The one copy that fulfills a request.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh64::Xxh64;

use crate::error::FailureReason;
use crate::file::partial_path;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Final path of the copy: `destination`, or `destination/<file_name>` when
/// the destination is an existing directory.
pub(crate) fn target_path(destination: &Path, file_name: &str) -> PathBuf {
    if destination.is_dir() {
        destination.join(file_name)
    } else {
        destination.to_path_buf()
    }
}

/// Copy `source` to `target` through a partial file and return the bytes
/// written.
///
/// The target only appears once the full file was written, synced, and (with
/// `verify`) matched against the source's xxh64 digest.
pub(crate) async fn verified_copy(
    source: PathBuf,
    target: PathBuf,
    verify: bool,
) -> Result<u64, FailureReason> {
    tokio::task::spawn_blocking(move || copy_file(&source, &target, verify))
        .await
        .unwrap_or_else(|e| Err(FailureReason::CopyError(e.to_string())))
}

fn copy_file(source: &Path, target: &Path, verify: bool) -> Result<u64, FailureReason> {
    let mut input = match File::open(source) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FailureReason::SourceVanished),
        Err(e) => return Err(copy_error(&e)),
    };
    let expected = input.metadata().map_err(|e| copy_error(&e))?.len();

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| copy_error(&e))?;
    }

    let partial = partial_path(target);
    let result = write_partial(&mut input, &partial, expected, verify)
        .and_then(|written| {
            std::fs::rename(&partial, target).map_err(|e| copy_error(&e))?;
            Ok(written)
        });

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn write_partial(
    input: &mut File,
    partial: &Path,
    expected: u64,
    verify: bool,
) -> Result<u64, FailureReason> {
    let mut output = File::create(partial).map_err(|e| copy_error(&e))?;
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        let n = input.read(&mut buffer).map_err(|e| copy_error(&e))?;
        if n == 0 {
            break;
        }
        output.write_all(&buffer[..n]).map_err(|e| copy_error(&e))?;
        hasher.update(&buffer[..n]);
        written += n as u64;
    }

    output.sync_all().map_err(|e| copy_error(&e))?;
    drop(output);

    if written != expected {
        return Err(FailureReason::CopyError(format!(
            "source changed during copy: expected {expected} bytes, read {written}"
        )));
    }

    if verify {
        let copied = digest(partial).map_err(|e| copy_error(&e))?;
        if copied != hasher.digest() {
            return Err(FailureReason::CopyError(
                "checksum mismatch after copy".to_string(),
            ));
        }
    }

    Ok(written)
}

fn digest(path: &Path) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            return Ok(hasher.digest());
        }
        hasher.update(&buffer[..n]);
    }
}

fn copy_error(e: &io::Error) -> FailureReason {
    FailureReason::CopyError(e.to_string())
}
