//! Shutdown signal for connection tasks.

use tokio::sync::broadcast;

/// Listens for the server's shutdown broadcast.
///
/// Shutdown is signalled either by a value on the channel or by the sender
/// being dropped. Once observed, it stays observed.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    #[allow(dead_code)]
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Wait for the shutdown notice.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // Lagged and Closed both mean the server has moved on.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_on_notify() {
        let (tx, _) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(tx.subscribe());
        assert!(!shutdown.is_shutdown());

        tx.send(()).unwrap();
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());

        // Subsequent waits return immediately.
        shutdown.recv().await;
    }

    #[tokio::test]
    async fn test_recv_on_sender_dropped() {
        let (tx, _) = broadcast::channel::<()>(1);
        let mut shutdown = Shutdown::new(tx.subscribe());
        drop(tx);

        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }
}
