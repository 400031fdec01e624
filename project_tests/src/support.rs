//! Helpers shared by the end-to-end tests: an in-process server on an
//! ephemeral port and a raw WebSocket peer that decodes server messages.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lib_common::configs::config_coordinator::CoordinatorConfig;
use lib_common::core::{CoordinatorHandle, CoordinatorService, Notice, ServerMessage};
use servers::singleton_logic::downstream;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    pub coordinator: CoordinatorHandle,
}

impl TestServer {
    pub async fn start(config: CoordinatorConfig) -> anyhow::Result<Self> {
        let (coordinator, _task) = CoordinatorService::spawn(config)?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = downstream::router(coordinator.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, coordinator })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// A WebSocket peer that speaks the wire protocol by hand.
pub struct RawPeer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RawPeer {
    pub async fn connect(server: &TestServer) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(server.ws_url()).await?;
        Ok(Self { ws })
    }

    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::text(text.to_string())).await?;
        Ok(())
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.send(Message::Close(None)).await?;
        Ok(())
    }

    /// Next decoded server message, `None` once the server closed the socket.
    pub async fn next(&mut self) -> anyhow::Result<Option<ServerMessage>> {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next()).await?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Reads until `wanted` arrives, returning everything seen before it.
    pub async fn until(&mut self, wanted: &ServerMessage) -> anyhow::Result<Vec<ServerMessage>> {
        let mut seen = Vec::new();
        while let Some(message) = self.next().await? {
            if &message == wanted {
                return Ok(seen);
            }
            seen.push(message);
        }
        anyhow::bail!("socket closed before {:?} arrived; saw {:?}", wanted, seen)
    }

    pub async fn until_notice(&mut self, notice: Notice) -> anyhow::Result<Vec<ServerMessage>> {
        self.until(&ServerMessage::notice(notice)).await
    }
}
