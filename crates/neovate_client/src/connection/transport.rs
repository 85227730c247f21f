use futures::future::BoxFuture;
use tokio::sync::oneshot;

/// Opens links to the backend. `open` resolves once the handshake is done;
/// the caller bounds it with its own timeout.
pub trait Transport: Send + Sync + 'static {
    fn open(&self) -> BoxFuture<'static, anyhow::Result<Link>>;
}

/// An established connection as seen by the connection driver.
pub struct Link {
    closed: oneshot::Receiver<()>,
    shutdown: oneshot::Sender<()>,
}

/// The transport's end of a [`Link`].
pub struct LinkPeer {
    closed: Option<oneshot::Sender<()>>,
    shutdown: oneshot::Receiver<()>,
}

impl Link {
    pub fn pair() -> (Link, LinkPeer) {
        let (closed_tx, closed_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            Link {
                closed: closed_rx,
                shutdown: shutdown_tx,
            },
            LinkPeer {
                closed: Some(closed_tx),
                shutdown: shutdown_rx,
            },
        )
    }

    /// Resolves when the remote side goes away.
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }

    pub fn close(self) {
        let _ = self.shutdown.send(());
    }

    pub(super) fn into_parts(self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        (self.closed, self.shutdown)
    }
}

impl LinkPeer {
    /// Resolves when the client closed or dropped its [`Link`].
    pub async fn shutdown_requested(&mut self) {
        let _ = (&mut self.shutdown).await;
    }

    pub fn notify_closed(&mut self) {
        if let Some(closed) = self.closed.take() {
            let _ = closed.send(());
        }
    }
}

impl Drop for LinkPeer {
    fn drop(&mut self) {
        self.notify_closed();
    }
}
