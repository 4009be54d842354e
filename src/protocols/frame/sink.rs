//! Delivery of completed frames.
//!
//! The decoder's job ends when a payload is fully assembled; whatever
//! processes payloads plugs in here.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives completed frame payloads, in stream order.
pub trait FrameSink {
    fn deliver(&mut self, frame: Bytes);
}

/// Builds the sink for each accepted connection.
pub type SinkFactory = Arc<dyn Fn(SocketAddr) -> Box<dyn FrameSink + Send> + Send + Sync>;

/// Default sink: logs each frame and drops it.
#[derive(Debug)]
pub struct TraceSink {
    peer: SocketAddr,
}

impl TraceSink {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }

    /// Factory handing every connection its own `TraceSink`.
    pub fn factory() -> SinkFactory {
        Arc::new(|peer: SocketAddr| Box::new(TraceSink::new(peer)) as Box<dyn FrameSink + Send>)
    }
}

impl FrameSink for TraceSink {
    fn deliver(&mut self, frame: Bytes) {
        if frame.is_empty() {
            debug!(peer = %self.peer, "Empty frame received");
        } else {
            debug!(peer = %self.peer, length = frame.len(), "Message received");
        }
    }
}

impl FrameSink for Vec<Bytes> {
    fn deliver(&mut self, frame: Bytes) {
        self.push(frame);
    }
}

/// Forwards frames to another task. Frames are dropped once the receiver is gone.
impl FrameSink for mpsc::UnboundedSender<Bytes> {
    fn deliver(&mut self, frame: Bytes) {
        let _ = self.send(frame);
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn deliver(&mut self, frame: Bytes) {
        (**self).deliver(frame);
    }
}
