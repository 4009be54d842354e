//! Frame protocol handler for the Tokio runtime.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use super::decoder::{Decoder, FrameError};
use super::sink::FrameSink;
use crate::config::Config;
use crate::shutdown::Shutdown;

/// Default size of a single socket read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Per-connection read settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound on bytes taken from the socket per read.
    pub read_buffer_size: usize,
    /// Close the connection after this long without data. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

impl From<&Config> for ConnectionOptions {
    fn from(config: &Config) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Why a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// End of stream from the remote side.
    PeerClosed,
    /// No data within the idle timeout.
    IdleTimeout,
    /// Server is shutting down.
    Shutdown,
}

/// Conditions that end a single connection. None of these affect the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Handle a frame protocol connection.
///
/// Reads chunks of up to `read_buffer_size` bytes and feeds them to a fresh
/// [`Decoder`], which hands completed frames to `sink`. Returns when the peer
/// closes the stream, the idle timeout expires, shutdown is signalled, a read
/// fails, or the peer violates the framing. The stream is dropped, and so
/// closed, on every one of those paths.
pub async fn handle_connection<R, S>(
    mut stream: R,
    peer: SocketAddr,
    sink: &mut S,
    options: &ConnectionOptions,
    shutdown: &mut Shutdown,
) -> Result<CloseReason, ConnectionError>
where
    R: AsyncRead + Unpin,
    S: FrameSink + ?Sized,
{
    let mut decoder = Decoder::new();
    let mut buffer = vec![0u8; options.read_buffer_size.max(1)];

    loop {
        let n = tokio::select! {
            read = read_chunk(&mut stream, &mut buffer, options.idle_timeout) => match read {
                Some(result) => result?,
                None => {
                    if !decoder.is_idle() {
                        debug!(peer = %peer, buffered = decoder.buffered(), "Idle timeout mid-frame");
                    }
                    return Ok(CloseReason::IdleTimeout);
                }
            },
            _ = shutdown.recv() => {
                return Ok(CloseReason::Shutdown);
            }
        };

        if n == 0 {
            if !decoder.is_idle() {
                debug!(peer = %peer, buffered = decoder.buffered(), "Stream ended mid-frame");
            }
            return Ok(CloseReason::PeerClosed);
        }

        trace!(peer = %peer, bytes = n, "Received bytes");

        let frames = decoder.decode(&buffer[..n], sink)?;
        if frames > 0 {
            trace!(peer = %peer, frames, "Frames completed");
        }
    }
}

/// One read, bounded by the idle timeout if set. `None` means the timeout fired.
async fn read_chunk<R>(
    stream: &mut R,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Option<io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.read(buffer)).await.ok(),
        None => Some(stream.read(buffer).await),
    }
}
