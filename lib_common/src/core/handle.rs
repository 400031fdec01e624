//! # Coordinator Service and Handle
//!
//! The coordinator runs as one tokio task that owns the `Coordinator` state
//! and drains an unbounded request queue. Transports never touch the state;
//! they hold a cloneable `CoordinatorHandle` and submit requests. Requests
//! from one connection keep their order because each transport task sends
//! them in sequence on the same queue.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::configs::config_coordinator::CoordinatorConfig;
use crate::core::coordinator::{Coordinator, CoordinatorSnapshot};
use crate::core::error::CoordinatorError;
use crate::core::protocol::{Inbound, ServerMessage};
use crate::core::registry::{ConnectionId, Outbox};

/// Requests processed by the coordinator loop, one at a time.
#[derive(Debug)]
pub enum CoordRequest {
    /// Register a new connection whose outbound messages go to `outbox`.
    Attach {
        outbox: Outbox,
        reply: oneshot::Sender<ConnectionId>,
    },
    /// A message received from a connection.
    Inbound {
        id: ConnectionId,
        message: Inbound,
    },
    /// Liveness monitor tick.
    Sweep,
    /// Read-only state query.
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
}

/// What a transport gets back from `attach`.
#[derive(Debug)]
pub struct Attachment {
    pub id: ConnectionId,
    /// Closed by the coordinator when the connection departs or expires.
    pub outbound: mpsc::UnboundedReceiver<Arc<ServerMessage>>,
}

/// Entry point that starts the coordinator loop.
pub struct CoordinatorService;

impl CoordinatorService {
    /// Validates `config` and spawns the request loop. The loop ends once
    /// every handle has been dropped.
    pub fn spawn(
        config: CoordinatorConfig,
    ) -> Result<(CoordinatorHandle, JoinHandle<()>), CoordinatorError> {
        config.validate()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator = Coordinator::new(config, tx.downgrade());

        let task = tokio::spawn(async move {
            log::info!("Coordinator loop started");
            while let Some(request) = rx.recv().await {
                coordinator.handle(request);
            }
            log::info!("Coordinator loop finished");
        });

        Ok((CoordinatorHandle { tx }, task))
    }
}

/// Cloneable sender into the coordinator loop; one per transport task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordRequest>,
}

impl CoordinatorHandle {
    /// Attaches a new connection and returns its handle and outbound queue.
    pub async fn attach(&self) -> Result<Attachment, CoordinatorError> {
        let (outbox, outbound) = mpsc::unbounded_channel();
        let (reply, response) = oneshot::channel();
        self.tx
            .send(CoordRequest::Attach { outbox, reply })
            .map_err(|_| CoordinatorError::Closed)?;
        let id = response.await.map_err(|_| CoordinatorError::Closed)?;
        Ok(Attachment { id, outbound })
    }

    /// Queues an inbound message from `id`.
    pub fn send(&self, id: ConnectionId, message: Inbound) -> Result<(), CoordinatorError> {
        self.tx
            .send(CoordRequest::Inbound { id, message })
            .map_err(|_| CoordinatorError::Closed)
    }

    /// Current state, consistent with every request queued before it.
    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(CoordRequest::Snapshot { reply })
            .map_err(|_| CoordinatorError::Closed)?;
        response.await.map_err(|_| CoordinatorError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::Notice;
    use serde_json::json;
    use std::time::Duration;

    async fn next_data(attachment: &mut Attachment) -> Option<serde_json::Value> {
        while let Some(message) = attachment.outbound.recv().await {
            if let ServerMessage::Data { data } = &*message {
                return Some(data.clone());
            }
        }
        None
    }

    #[tokio::test]
    async fn test_invalid_config_is_refused() {
        let config = CoordinatorConfig::from_millis(3000, 1000, 500);
        assert!(matches!(
            CoordinatorService::spawn(config),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_round_trip_through_loop() {
        let (handle, _task) = CoordinatorService::spawn(CoordinatorConfig::default()).unwrap();
        let mut a = handle.attach().await.unwrap();
        let mut b = handle.attach().await.unwrap();
        assert_eq!((a.id.seat(), b.id.seat()), (1, 2));

        handle.send(a.id, Inbound::Publish(json!({"v": 1}))).unwrap();
        assert_eq!(next_data(&mut b).await, Some(json!({"v": 1})));
        assert_eq!(next_data(&mut a).await, Some(json!({"v": 1})));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.leader_seat, Some(1));
        assert!(snapshot.has_payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_expires_silent_connection() {
        let (handle, _task) = CoordinatorService::spawn(CoordinatorConfig::default()).unwrap();
        let mut a = handle.attach().await.unwrap();

        // No heartbeats: the first sweep after 3 s expires it and closes the queue.
        tokio::time::sleep(Duration::from_millis(3100)).await;
        let mut seen = Vec::new();
        while let Some(message) = a.outbound.recv().await {
            seen.push((*message).clone());
        }
        assert!(seen.contains(&ServerMessage::Ready));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.live_connections, 0);
        assert_eq!(snapshot.leader_seat, None);
        assert!(!snapshot.monitor_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_connection_alive() {
        let (handle, _task) = CoordinatorService::spawn(CoordinatorConfig::default()).unwrap();
        let a = handle.attach().await.unwrap();

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.send(a.id, Inbound::Heartbeat).unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.live_connections, 1);
        assert!(snapshot.monitor_running);
    }

    #[tokio::test]
    async fn test_closing_notifies_survivors() {
        let (handle, _task) = CoordinatorService::spawn(CoordinatorConfig::default()).unwrap();
        let a = handle.attach().await.unwrap();
        let mut b = handle.attach().await.unwrap();
        handle.send(a.id, Inbound::Closing).unwrap();

        let departed = ServerMessage::notice(Notice::Departed { seat: 1 });
        loop {
            let message = b.outbound.recv().await.expect("b stays attached");
            if *message == departed {
                break;
            }
        }
        assert_eq!(*b.outbound.recv().await.unwrap(), ServerMessage::notice(Notice::LeadershipInherited));
        assert_eq!(*b.outbound.recv().await.unwrap(), ServerMessage::Ready);
    }
}
