//! # Singleton Client
//!
//! Attaches an application to the coordinator over WebSocket. The
//! application registers two callbacks before attaching:
//!
//! - **start**: invoked when this connection becomes leader (on the `ready`
//!   signal). This is where privileged work such as polling a data source
//!   begins; the callback receives a `SingletonHandle` to publish with.
//! - **data**: invoked for every payload broadcast, including the ones this
//!   connection published itself.
//!
//! Once attached the client sends a heartbeat on a fixed cadence and sends
//! `closing` on `close()`. Callbacks run on the reader task; long work
//! should be spawned.
//!
//! ```no_run
//! use lib_common::client::SingletonBuilder;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), lib_common::client::ClientError> {
//! let client = SingletonBuilder::new("ws://127.0.0.1:9010/ws")
//!     .on_start(|handle| {
//!         let _ = handle.set_data(&json!({ "value": "only the leader sends this" }));
//!     })
//!     .on_data(|_handle, data| println!("received {}", data))
//!     .init()
//!     .await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::configs::config_coordinator::DEFAULT_HEARTBEAT_INTERVAL;
use crate::core::protocol::{Inbound, ServerMessage};

/// How long `close` waits for the coordinator to close its side.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Callback run when this connection is granted leadership.
pub type StartCallback = Arc<dyn Fn(&SingletonHandle) + Send + Sync>;
/// Callback run for every payload received.
pub type DataCallback = Arc<dyn Fn(&SingletonHandle, Value) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("on_start(callback) must be called before init()")]
    MissingStartCallback,

    #[error("on_data(callback) must be called before init()")]
    MissingDataCallback,

    #[error("invalid coordinator url: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection to the coordinator is closed")]
    Closed,
}

/// Builder mirroring `start(cb).data(cb).init()`.
pub struct SingletonBuilder {
    url: String,
    heartbeat_interval: Duration,
    on_start: Option<StartCallback>,
    on_data: Option<DataCallback>,
}

impl SingletonBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            on_start: None,
            on_data: None,
        }
    }

    /// Overrides the heartbeat cadence (500 ms by default).
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn on_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SingletonHandle) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(callback));
        self
    }

    pub fn on_data<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SingletonHandle, Value) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(callback));
        self
    }

    /// Attaches to the coordinator. Fails before any network activity if a
    /// callback is missing.
    pub async fn init(self) -> Result<SingletonClient, ClientError> {
        let on_start = self.on_start.ok_or(ClientError::MissingStartCallback)?;
        let on_data = self.on_data.ok_or(ClientError::MissingDataCallback)?;
        let url = url::Url::parse(&self.url)?;

        log::info!("Attaching to coordinator at {}", url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let handle = SingletonHandle { tx };
        let token = CancellationToken::new();

        // Writer: the only owner of the sink. Stops after a Close frame.
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    log::warn!("Coordinator write failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        // Heartbeat: first beat one interval after attach.
        let heartbeat_handle = handle.clone();
        let heartbeat_token = token.clone();
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if heartbeat_handle.send(Inbound::Heartbeat).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader: dispatches server messages to the callbacks.
        let reader_handle = handle.clone();
        let reader_token = token.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch(text.as_str(), &reader_handle, &on_start, &on_data);
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Coordinator closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("Coordinator read error: {}", e);
                        break;
                    }
                }
            }
            reader_token.cancel();
        });

        Ok(SingletonClient {
            handle,
            token,
            writer: Some(writer),
            reader: Some(reader),
        })
    }
}

fn dispatch(text: &str, handle: &SingletonHandle, on_start: &StartCallback, on_data: &DataCallback) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Unrecognised frame from coordinator ({}): {}", e, text);
            return;
        }
    };
    match message {
        ServerMessage::Ready => on_start(handle),
        ServerMessage::Data { data } => on_data(handle, data),
        ServerMessage::Reply { data: Some(data) } => on_data(handle, data),
        ServerMessage::Reply { data: None } => log::debug!("Coordinator holds no data yet"),
        ServerMessage::Notice { message, .. } => log::info!("Coordinator: {}", message),
    }
}

/// Cloneable sending side of an attached client.
#[derive(Debug, Clone)]
pub struct SingletonHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl SingletonHandle {
    fn send(&self, message: Inbound) -> Result<(), ClientError> {
        self.tx
            .send(Message::text(message.to_text()))
            .map_err(|_| ClientError::Closed)
    }

    /// Publishes `data`. Only the leader's publish is accepted; anyone else
    /// gets a rejection notice, not an error.
    pub fn set_data(&self, data: &Value) -> Result<(), ClientError> {
        self.send(Inbound::Publish(data.clone()))
    }

    /// Asks for the last published payload; the answer arrives through the
    /// data callback if there is one.
    pub fn request_data(&self) -> Result<(), ClientError> {
        self.send(Inbound::Get)
    }
}

/// An attached client. Dropping it without `close` leaves the coordinator to
/// expire the connection once heartbeats stop.
pub struct SingletonClient {
    handle: SingletonHandle,
    token: CancellationToken,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SingletonClient {
    pub fn handle(&self) -> &SingletonHandle {
        &self.handle
    }

    pub fn set_data(&self, data: &Value) -> Result<(), ClientError> {
        self.handle.set_data(data)
    }

    pub fn request_data(&self) -> Result<(), ClientError> {
        self.handle.request_data()
    }

    /// Whether the coordinator side is still connected.
    pub fn is_attached(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Leaves gracefully: stops the heartbeat, says `closing`, closes the socket.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.token.cancel();
        self.handle.send(Inbound::Closing)?;
        self.handle
            .tx
            .send(Message::Close(None))
            .map_err(|_| ClientError::Closed)?;

        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        Ok(())
    }
}

impl Drop for SingletonClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (SingletonHandle, StartCallback, DataCallback, Arc<Mutex<Vec<Value>>>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_start: StartCallback = Arc::new(|_: &SingletonHandle| {});
        let on_data: DataCallback =
            Arc::new(move |_: &SingletonHandle, data: Value| sink.lock().unwrap().push(data));
        (SingletonHandle { tx }, on_start, on_data, seen)
    }

    #[test]
    fn test_reply_with_published_null_reaches_data_callback() {
        let (handle, on_start, on_data, seen) = recording();
        let wire = ServerMessage::Reply { data: Some(Value::Null) }.to_json().unwrap();

        dispatch(&wire, &handle, &on_start, &on_data);

        assert_eq!(*seen.lock().unwrap(), vec![Value::Null]);
    }

    #[test]
    fn test_absent_reply_is_not_delivered() {
        let (handle, on_start, on_data, seen) = recording();
        let wire = ServerMessage::Reply { data: None }.to_json().unwrap();

        dispatch(&wire, &handle, &on_start, &on_data);

        assert!(seen.lock().unwrap().is_empty());
    }
}
