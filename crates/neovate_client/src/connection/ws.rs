use anyhow::{Context as _, anyhow};
use futures::future::BoxFuture;
use futures::{SinkExt as _, StreamExt as _};
use neovate_api::{PROTOCOL_VERSION, WsClientMessage, WsServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::transport::{Link, LinkPeer, Transport};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport. The handshake is the upgrade followed by a hello
/// exchange that must agree on [`PROTOCOL_VERSION`].
#[derive(Clone, Debug)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Transport for WsTransport {
    fn open(&self) -> BoxFuture<'static, anyhow::Result<Link>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (mut socket, _) = connect_async(url.as_str())
                .await
                .with_context(|| format!("failed to connect to {url}"))?;
            handshake(&mut socket).await?;

            let (link, peer) = Link::pair();
            tokio::spawn(pump(socket, peer));
            Ok(link)
        })
    }
}

async fn handshake(socket: &mut Socket) -> anyhow::Result<()> {
    let hello = serde_json::to_string(&WsClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
    })?;
    socket
        .send(Message::Text(hello.into()))
        .await
        .context("failed to send hello")?;

    loop {
        let Some(msg) = socket.next().await else {
            return Err(anyhow!("connection closed during handshake"));
        };
        let text = match msg.context("websocket error during handshake")? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(anyhow!("connection closed during handshake")),
            _ => continue,
        };
        match serde_json::from_str::<WsServerMessage>(text.as_str())
            .context("invalid handshake message")?
        {
            WsServerMessage::Hello { protocol_version } if protocol_version == PROTOCOL_VERSION => {
                return Ok(());
            }
            WsServerMessage::Hello { protocol_version } => {
                return Err(anyhow!(
                    "protocol version mismatch: server={protocol_version}, client={PROTOCOL_VERSION}"
                ));
            }
            WsServerMessage::Error { message } => {
                return Err(anyhow!("server rejected handshake: {message}"));
            }
        }
    }
}

/// Owns the socket after the handshake until either side closes it.
async fn pump(mut socket: Socket, mut peer: LinkPeer) {
    loop {
        tokio::select! {
            _ = peer.shutdown_requested() => {
                let _ = socket.close(None).await;
                break;
            }
            msg = socket.next() => match msg {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("websocket link closed");
    peer.notify_closed();
}
