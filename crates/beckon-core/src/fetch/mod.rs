//! Direct fetch of a file from a holder.
//!
//! When the holder does not push files into the requester's shared folder,
//! the requester pulls them from the holder's [`FileServer`]. The exchange is
//! one file per connection:
//!
//! ```text
//! requester -> holder   <file name>\n
//! holder -> requester   OK <size>\n<size bytes>
//!                   or  ERR <message>\n
//! ```

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::connection::parse_host_address;
use crate::error::{Error, Result};

mod server;

pub use server::FileServer;

/// Longest status line accepted from a file server.
const MAX_STATUS_LINE: u64 = 512;

/// Byte stream of a fetched file.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// A file being fetched from a holder.
pub struct Fetched {
    /// Size announced by the holder
    pub size: u64,
    /// The file's bytes, exactly `size` of them if the transfer completes
    pub reader: ByteStream,
}

/// Capability that supplies a holder's file as a byte stream.
pub trait FileFetcher: Send + Sync {
    /// Open `file_name` on `peer`.
    fn fetch<'a>(&'a self, peer: &'a str, file_name: &'a str) -> BoxFuture<'a, Result<Fetched>>;
}

/// [`FileFetcher`] talking to a holder's [`FileServer`] over TCP.
#[derive(Debug, Clone)]
pub struct TcpFileFetcher {
    connect_timeout: Duration,
}

impl Default for TcpFileFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

impl TcpFileFetcher {
    /// Create a fetcher that gives up connecting after `connect_timeout`.
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn open(&self, peer: &str, file_name: &str) -> Result<Fetched> {
        let addr = parse_host_address(peer, crate::DEFAULT_FILE_PORT)?;

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::FetchFailed(format!("no connection to {addr}")))?
            .map_err(|e| Error::FetchFailed(format!("cannot connect to {addr}: {e}")))?;

        stream
            .write_all(format!("{file_name}\n").as_bytes())
            .await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut status = String::new();
        (&mut reader)
            .take(MAX_STATUS_LINE)
            .read_line(&mut status)
            .await?;

        let size = parse_status(&status)?;
        tracing::debug!("{} serves '{}' ({} bytes)", addr, file_name, size);

        Ok(Fetched {
            size,
            reader: Box::pin(reader.take(size)),
        })
    }
}

impl FileFetcher for TcpFileFetcher {
    fn fetch<'a>(&'a self, peer: &'a str, file_name: &'a str) -> BoxFuture<'a, Result<Fetched>> {
        Box::pin(self.open(peer, file_name))
    }
}

fn parse_status(line: &str) -> Result<u64> {
    let line = line.trim_end();
    if let Some(size) = line.strip_prefix("OK ") {
        return size
            .trim()
            .parse()
            .map_err(|_| Error::ProtocolError(format!("invalid size in status '{line}'")));
    }
    if let Some(message) = line.strip_prefix("ERR ") {
        return Err(Error::FetchFailed(message.to_string()));
    }
    Err(Error::ProtocolError(format!("unexpected status '{line}'")))
}

/// Fetch `file_name` from `peer` into `staging_dir` and return its path.
///
/// Bytes go to a partial file first and are renamed once the announced size
/// was received in full, so the staged path never holds a truncated file.
///
/// # Errors
///
/// Returns an error if the fetch fails, the stream ends early, or the staging
/// directory cannot be written.
pub async fn download_to(
    fetcher: &dyn FileFetcher,
    peer: &str,
    file_name: &str,
    staging_dir: &Path,
) -> Result<PathBuf> {
    let file_name = crate::file::validate_file_name(file_name)?;
    let Fetched { size, mut reader } = fetcher.fetch(peer, file_name).await?;

    tokio::fs::create_dir_all(staging_dir).await?;
    let target = staging_dir.join(file_name);
    let partial = crate::file::partial_path(&target);

    let result = write_staged(&mut reader, size, &partial, &target).await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    } else {
        tracing::info!(
            "Fetched '{}' from {} ({})",
            file_name,
            peer,
            crate::file::format_size(size)
        );
    }

    result
}

async fn write_staged(
    reader: &mut ByteStream,
    size: u64,
    partial: &Path,
    target: &Path,
) -> Result<PathBuf> {
    let mut file = tokio::fs::File::create(partial).await?;
    let received = tokio::io::copy(reader, &mut file).await?;
    file.sync_all().await?;
    drop(file);

    if received != size {
        return Err(Error::FetchFailed(format!(
            "stream ended after {received} of {size} bytes"
        )));
    }

    tokio::fs::rename(partial, target).await?;
    Ok(target.to_path_buf())
}
