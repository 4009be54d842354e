//! TCP server for length-prefixed frame connections.
//!
//! Binds the listening socket, accepts connections, and runs each one on its
//! own task with its own decoder. Connections share nothing but the
//! connection limit and the shutdown signal.

use crate::config::Config;
use crate::protocols::frame::{
    handle_connection, CloseReason, ConnectionError, ConnectionOptions, SinkFactory, TraceSink,
};
use crate::shutdown::Shutdown;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Listen backlog passed to the kernel
const LISTEN_BACKLOG: i32 = 1024;

/// Give up on accept after the retry delay passes this many seconds
const MAX_ACCEPT_BACKOFF_SECS: u64 = 64;

/// Server-level failures. Connection-level failures never surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    options: ConnectionOptions,
    connection_limit: Arc<Semaphore>,
    sink_factory: SinkFactory,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
}

impl Server {
    /// Bind the listening socket. Frames are delivered to a [`TraceSink`]
    /// unless another factory is set with [`Server::with_sink_factory`].
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let std_listener = create_listener(config.listen).map_err(|source| ServerError::Bind {
            addr: config.listen,
            source,
        })?;
        let listener = TcpListener::from_std(std_listener).map_err(|source| ServerError::Bind {
            addr: config.listen,
            source,
        })?;

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        Ok(Server {
            listener,
            options: ConnectionOptions::from(config),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            sink_factory: TraceSink::factory(),
            notify_shutdown,
            shutdown_complete_tx,
            shutdown_complete_rx,
        })
    }

    /// Replace the per-connection frame sink.
    #[allow(dead_code)]
    pub fn with_sink_factory(mut self, sink_factory: SinkFactory) -> Self {
        self.sink_factory = sink_factory;
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes or accepting fails for good.
    ///
    /// On the way out, every connection task is told to stop and awaited.
    pub async fn run(self, shutdown: impl Future) -> Result<(), ServerError> {
        let result = tokio::select! {
            res = self.accept_loop() => res,
            _ = shutdown => {
                info!("Shutting down");
                Ok(())
            }
        };

        let Server {
            notify_shutdown,
            shutdown_complete_tx,
            mut shutdown_complete_rx,
            ..
        } = self;

        // Closing the broadcast wakes every handler; each holds a sender
        // clone, so recv() returns once the last one has finished.
        drop(notify_shutdown);
        drop(shutdown_complete_tx);
        let _ = shutdown_complete_rx.recv().await;

        result
    }

    async fn accept_loop(&self) -> Result<(), ServerError> {
        info!(address = ?self.local_addr().ok(), "Waiting for connections");

        loop {
            // Wait for a connection slot
            let Ok(permit) = self.connection_limit.clone().acquire_owned().await else {
                return Ok(());
            };

            let (stream, peer) = self.accept().await?;
            debug!(peer = %peer, "New connection");

            let mut sink = (self.sink_factory)(peer);
            let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
            let shutdown_complete = self.shutdown_complete_tx.clone();
            let options = self.options.clone();

            tokio::spawn(async move {
                let result =
                    handle_connection(stream, peer, sink.as_mut(), &options, &mut shutdown).await;
                log_close(peer, result);
                drop(permit);
                drop(shutdown_complete);
            });
        }
    }

    /// Accept one connection, retrying transient failures with exponential backoff.
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let listener = &self.listener;
        accept_with_backoff(|| listener.accept()).await
    }
}

/// Run `accept` until it succeeds, sleeping 1s, 2s, 4s ... between failures.
/// Once the next delay would exceed [`MAX_ACCEPT_BACKOFF_SECS`] the last error
/// is returned.
async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> Result<T, ServerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut backoff = 1;

    loop {
        match accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(e) => {
                if backoff > MAX_ACCEPT_BACKOFF_SECS {
                    error!(error = %e, "Failed to accept connection, giving up");
                    return Err(ServerError::Accept(e));
                }
                error!(error = %e, retry_in_secs = backoff, "Failed to accept connection");
            }
        }

        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

fn log_close(peer: SocketAddr, result: Result<CloseReason, ConnectionError>) {
    match result {
        Ok(CloseReason::PeerClosed) => debug!(peer = %peer, "Connection closed by remote side"),
        Ok(CloseReason::IdleTimeout) => debug!(peer = %peer, "Idle timeout, closing connection"),
        Ok(CloseReason::Shutdown) => debug!(peer = %peer, "Server shutdown, closing connection"),
        Err(ConnectionError::Frame(e)) => {
            warn!(peer = %peer, error = %e, "Framing error, closing connection")
        }
        Err(ConnectionError::Io(e)) => {
            warn!(peer = %peer, error = %e, "Read failed, closing connection")
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR so restarts don't wait out TIME_WAIT.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
