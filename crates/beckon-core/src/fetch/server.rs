//! Holder side of the direct fetch.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// Longest request line (a file name plus newline) the server reads.
const MAX_REQUEST_LINE: u64 = crate::file::MAX_FILE_NAME_LEN as u64 + 2;

/// Serves files from the shared folder, one per connection.
pub struct FileServer {
    listener: TcpListener,
    shared_dir: PathBuf,
}

impl FileServer {
    /// Bind a server for `shared_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder doesn't exist or the address cannot be bound.
    pub async fn bind(addr: SocketAddr, shared_dir: impl Into<PathBuf>) -> Result<Self> {
        let shared_dir = shared_dir.into();
        if !shared_dir.is_dir() {
            return Err(Error::DirectoryNotFound(shared_dir.display().to_string()));
        }

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            "Serving {} on {}",
            shared_dir.display(),
            listener.local_addr()?
        );
        Ok(Self {
            listener,
            shared_dir,
        })
    }

    /// Address the server is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, from) = self.listener.accept().await?;
            let shared_dir = self.shared_dir.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, &shared_dir).await {
                    tracing::warn!("Serving {} failed: {}", from, e);
                }
            });
        }
    }
}

async fn serve_connection(stream: TcpStream, shared_dir: &Path) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    (&mut reader)
        .take(MAX_REQUEST_LINE)
        .read_line(&mut line)
        .await?;
    let mut stream = reader.into_inner();

    let name = line.trim_end_matches(['\r', '\n']);
    let Ok(name) = crate::file::validate_file_name(name) else {
        stream.write_all(b"ERR invalid file name\n").await?;
        return Ok(());
    };

    let path = shared_dir.join(name);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) if path.is_file() => file,
        Ok(_) => {
            stream.write_all(b"ERR not a file\n").await?;
            return Ok(());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Requested '{}' is not shared", name);
            stream.write_all(b"ERR file not found\n").await?;
            return Ok(());
        }
        Err(e) => {
            stream.write_all(b"ERR cannot read file\n").await?;
            return Err(e.into());
        }
    };

    let size = file.metadata().await?.len();
    stream.write_all(format!("OK {size}\n").as_bytes()).await?;
    let sent = tokio::io::copy(&mut (&mut file).take(size), &mut stream).await?;
    stream.shutdown().await?;

    tracing::info!(
        "Sent '{}' ({})",
        name,
        crate::file::format_size(sent)
    );
    Ok(())
}
