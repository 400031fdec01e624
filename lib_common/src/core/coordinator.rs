//! # Coordinator
//!
//! Composition root of the engine. Owns the registry, the leadership state,
//! the data relay and the liveness monitor, and performs every unicast and
//! broadcast. It is a plain state machine driven through `&mut self`; the
//! request loop in `handle` feeds it one request at a time, which is what
//! makes each transition atomic with respect to the others.
//!
//! ## Event paths
//! - **attach**: register, ensure the monitor runs, broadcast the join
//!   notice, tell the newcomer its seat, then appoint it if nobody leads.
//! - **heartbeat**: refresh the timestamp.
//! - **closing** / **expiry**: tombstone, broadcast departure, run
//!   succession, drop the connection's channel.
//! - **get**: unicast the current payload, absent or not.
//! - **publish**: leader-gated store then broadcast, or a rejection notice.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::Instant;

use crate::configs::config_coordinator::CoordinatorConfig;
use crate::core::error::RelayError;
use crate::core::handle::CoordRequest;
use crate::core::leadership::{Leadership, Succession};
use crate::core::monitor::LivenessMonitor;
use crate::core::protocol::{Inbound, Notice, ServerMessage};
use crate::core::registry::{ConnectionId, Outbox, Registry};
use crate::core::relay::DataRelay;

/// Why a connection left. Only the notice wording differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The connection said `closing`.
    Closed,
    /// The connection's heartbeat went stale.
    Expired,
}

/// Read-only view of the coordinator, served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSnapshot {
    pub live_connections: usize,
    /// Seats ever handed out, departed ones included.
    pub seats_issued: usize,
    pub leader_seat: Option<usize>,
    pub monitor_running: bool,
    /// Whether anything has been published yet.
    pub has_payload: bool,
}

/// Registry, leadership, relay and monitor behind one `&mut self`.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Registry,
    leadership: Leadership,
    relay: DataRelay,
    monitor: LivenessMonitor,
    requests: WeakUnboundedSender<CoordRequest>,
}

impl Coordinator {
    /// `requests` is where monitor ticks are delivered; it is normally the
    /// sending side of the loop that drives this coordinator.
    pub fn new(config: CoordinatorConfig, requests: WeakUnboundedSender<CoordRequest>) -> Self {
        Self {
            monitor: LivenessMonitor::new(config.sweep_interval),
            config,
            registry: Registry::new(),
            leadership: Leadership::new(),
            relay: DataRelay::new(),
            requests,
        }
    }

    /// Applies one request. This is the only entry point used by the loop.
    pub fn handle(&mut self, request: CoordRequest) {
        match request {
            CoordRequest::Attach { outbox, reply } => {
                let id = self.attach(outbox);
                if reply.send(id).is_err() {
                    // The transport gave up while waiting; let it go now
                    // rather than waiting for expiry.
                    log::debug!("{} attached but nobody awaited the reply", id);
                    self.depart(id, Departure::Closed);
                }
            }
            CoordRequest::Inbound { id, message } => self.on_inbound(id, message),
            CoordRequest::Sweep => {
                self.sweep();
            }
            CoordRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Registers a connection and runs the attach path. Returns its handle.
    pub fn attach(&mut self, outbox: Outbox) -> ConnectionId {
        let id = self.registry.attach(outbox, Instant::now());
        log::info!("Connection {} attached ({} live)", id, self.registry.live_count());

        if self.monitor.ensure_running(&self.requests) {
            self.broadcast(ServerMessage::notice(Notice::MonitorStarted));
        }
        self.broadcast(ServerMessage::notice(Notice::Joined { seat: id.seat() }));
        self.unicast(id, ServerMessage::notice(Notice::SeatAssigned { seat: id.seat() }));

        if self.leadership.appoint_if_vacant(id) {
            self.unicast(id, ServerMessage::notice(Notice::LeadershipGranted));
            self.unicast(id, ServerMessage::Ready);
        }
        id
    }

    /// Dispatches one inbound message from `id`.
    pub fn on_inbound(&mut self, id: ConnectionId, message: Inbound) {
        if !self.registry.contains(id) {
            log::debug!("Ignoring {:?} from departed connection {}", message, id);
            return;
        }
        match message {
            Inbound::Heartbeat => {
                self.registry.touch(id, Instant::now());
            }
            Inbound::Closing => self.depart(id, Departure::Closed),
            Inbound::Get => {
                let data = self.relay.get().cloned();
                self.unicast(id, ServerMessage::Reply { data });
            }
            Inbound::Publish(payload) => self.publish(id, payload),
        }
    }

    /// One monitor tick: expires every connection whose heartbeat is at
    /// least the expiry threshold old, then stops the monitor if nothing is
    /// left. Returns the expired handles in attach order.
    pub fn sweep(&mut self) -> Vec<ConnectionId> {
        let expired = self
            .registry
            .expired(Instant::now(), self.config.expiry_threshold);
        for id in &expired {
            log::warn!(
                "Connection {} missed heartbeats for {} ms, expiring",
                id,
                self.config.expiry_threshold.as_millis()
            );
            self.depart(*id, Departure::Expired);
        }
        self.stop_monitor_if_idle();
        expired
    }

    /// Shared removal path for graceful departure and expiry.
    pub fn depart(&mut self, id: ConnectionId, reason: Departure) {
        let Some(departed) = self.registry.remove(id) else {
            return;
        };
        let notice = match reason {
            Departure::Closed => Notice::Departed { seat: id.seat() },
            Departure::Expired => Notice::Expired { seat: id.seat() },
        };
        log::info!("{}", notice.message());
        self.broadcast(ServerMessage::notice(notice));

        match self.leadership.departure_of(id, &self.registry) {
            Succession::SucceededBy(successor) => {
                self.unicast(successor, ServerMessage::notice(Notice::LeadershipInherited));
                self.unicast(successor, ServerMessage::Ready);
            }
            Succession::Vacant | Succession::Unaffected => {}
        }

        // Dropping the record closes the departed connection's channel.
        drop(departed);
        self.stop_monitor_if_idle();
    }

    fn publish(&mut self, id: ConnectionId, payload: Value) {
        match self.relay.publish(&self.leadership, id, payload) {
            Ok(stored) => {
                let message = ServerMessage::Data {
                    data: stored.clone(),
                };
                let delivered = self.broadcast(message);
                log::debug!("Leader {} published to {} connections", id, delivered);
            }
            Err(RelayError::NotLeader { seat }) => {
                log::warn!("Rejected publish from non-leader seat {}", seat);
                self.unicast(id, ServerMessage::notice(Notice::PublishRejected));
            }
        }
    }

    fn stop_monitor_if_idle(&mut self) {
        if self.registry.is_empty() {
            self.monitor.stop();
        }
    }

    /// Sends to every live connection in attach order; returns how many
    /// accepted the message.
    fn broadcast(&self, message: ServerMessage) -> usize {
        let message = Arc::new(message);
        self.registry
            .live_connections()
            .filter(|c| c.send(Arc::clone(&message)))
            .count()
    }

    fn unicast(&self, id: ConnectionId, message: ServerMessage) -> bool {
        match self.registry.get(id) {
            Some(connection) => connection.send(Arc::new(message)),
            None => false,
        }
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            live_connections: self.registry.live_count(),
            seats_issued: self.registry.seats_issued(),
            leader_seat: self.leadership.leader().map(|id| id.seat()),
            monitor_running: self.monitor.is_running(),
            has_payload: self.relay.get().is_some(),
        }
    }

    pub fn leader(&self) -> Option<ConnectionId> {
        self.leadership.leader()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.relay.get()
    }

    pub fn is_monitor_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    type Inbox = UnboundedReceiver<Arc<ServerMessage>>;

    struct Harness {
        coordinator: Coordinator,
        // Keeps the weak sender upgradable.
        _requests: UnboundedSender<CoordRequest>,
    }

    fn harness() -> Harness {
        let (tx, _rx) = mpsc::unbounded_channel();
        Harness {
            coordinator: Coordinator::new(CoordinatorConfig::default(), tx.downgrade()),
            _requests: tx,
        }
    }

    fn connect(coordinator: &mut Coordinator) -> (ConnectionId, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (coordinator.attach(tx), rx)
    }

    fn drain(inbox: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            out.push((*message).clone());
        }
        out
    }

    fn data_of(messages: &[ServerMessage]) -> Vec<Value> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Data { data } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_attach_becomes_leader() {
        let mut h = harness();
        let (a, mut inbox) = connect(&mut h.coordinator);

        assert_eq!(h.coordinator.leader(), Some(a));
        assert_eq!(
            drain(&mut inbox),
            vec![
                ServerMessage::notice(Notice::MonitorStarted),
                ServerMessage::notice(Notice::Joined { seat: 1 }),
                ServerMessage::notice(Notice::SeatAssigned { seat: 1 }),
                ServerMessage::notice(Notice::LeadershipGranted),
                ServerMessage::Ready,
            ]
        );
    }

    #[tokio::test]
    async fn test_followers_hear_join_but_get_no_ready() {
        let mut h = harness();
        let (_a, mut inbox_a) = connect(&mut h.coordinator);
        drain(&mut inbox_a);
        let (_b, mut inbox_b) = connect(&mut h.coordinator);

        assert_eq!(
            drain(&mut inbox_a),
            vec![ServerMessage::notice(Notice::Joined { seat: 2 })]
        );
        assert_eq!(
            drain(&mut inbox_b),
            vec![
                ServerMessage::notice(Notice::Joined { seat: 2 }),
                ServerMessage::notice(Notice::SeatAssigned { seat: 2 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_before_and_after_publish() {
        let mut h = harness();
        let (a, mut inbox_a) = connect(&mut h.coordinator);
        let (b, mut inbox_b) = connect(&mut h.coordinator);
        drain(&mut inbox_a);
        drain(&mut inbox_b);

        h.coordinator.on_inbound(b, Inbound::Get);
        assert_eq!(drain(&mut inbox_b), vec![ServerMessage::Reply { data: None }]);

        h.coordinator.on_inbound(a, Inbound::Publish(json!({"v": 1})));
        h.coordinator.on_inbound(b, Inbound::Get);
        assert_eq!(
            drain(&mut inbox_b),
            vec![
                ServerMessage::Data { data: json!({"v": 1}) },
                ServerMessage::Reply { data: Some(json!({"v": 1})) },
            ]
        );
        // The leader receives its own broadcast too.
        assert_eq!(data_of(&drain(&mut inbox_a)), vec![json!({"v": 1})]);
    }

    #[tokio::test]
    async fn test_non_leader_publish_is_rejected_without_broadcast() {
        let mut h = harness();
        let (a, mut inbox_a) = connect(&mut h.coordinator);
        let (b, mut inbox_b) = connect(&mut h.coordinator);
        h.coordinator.on_inbound(a, Inbound::Publish(json!({"v": 1})));
        drain(&mut inbox_a);
        drain(&mut inbox_b);

        h.coordinator.on_inbound(b, Inbound::Publish(json!({"v": 666})));

        assert_eq!(
            drain(&mut inbox_b),
            vec![ServerMessage::notice(Notice::PublishRejected)]
        );
        assert!(drain(&mut inbox_a).is_empty());
        assert_eq!(h.coordinator.payload(), Some(&json!({"v": 1})));
        assert_eq!(h.coordinator.live_count(), 2);
    }

    #[tokio::test]
    async fn test_leader_closing_hands_over_to_lowest_seat() {
        let mut h = harness();
        let (a, mut inbox_a) = connect(&mut h.coordinator);
        let (b, mut inbox_b) = connect(&mut h.coordinator);
        let (_c, mut inbox_c) = connect(&mut h.coordinator);
        drain(&mut inbox_a);
        drain(&mut inbox_b);
        drain(&mut inbox_c);

        h.coordinator.on_inbound(a, Inbound::Closing);

        assert_eq!(h.coordinator.leader(), Some(b));
        assert_eq!(
            drain(&mut inbox_b),
            vec![
                ServerMessage::notice(Notice::Departed { seat: 1 }),
                ServerMessage::notice(Notice::LeadershipInherited),
                ServerMessage::Ready,
            ]
        );
        assert_eq!(
            drain(&mut inbox_c),
            vec![ServerMessage::notice(Notice::Departed { seat: 1 })]
        );
        // The departed connection's channel is closed and saw nothing new.
        assert!(drain(&mut inbox_a).is_empty());
        assert!(inbox_a.is_closed());
    }

    #[tokio::test]
    async fn test_follower_closing_keeps_leader() {
        let mut h = harness();
        let (a, _inbox_a) = connect(&mut h.coordinator);
        let (b, _inbox_b) = connect(&mut h.coordinator);
        h.coordinator.on_inbound(b, Inbound::Closing);
        assert_eq!(h.coordinator.leader(), Some(a));

        // A second closing for the same connection is ignored.
        h.coordinator.depart(b, Departure::Closed);
        assert_eq!(h.coordinator.live_count(), 1);
    }

    #[tokio::test]
    async fn test_monitor_tracks_registry_emptiness() {
        let mut h = harness();
        assert!(!h.coordinator.is_monitor_running());

        let (a, _inbox_a) = connect(&mut h.coordinator);
        assert!(h.coordinator.is_monitor_running());
        let (b, _inbox_b) = connect(&mut h.coordinator);
        assert!(h.coordinator.is_monitor_running());

        h.coordinator.on_inbound(a, Inbound::Closing);
        assert!(h.coordinator.is_monitor_running());
        h.coordinator.on_inbound(b, Inbound::Closing);
        assert!(!h.coordinator.is_monitor_running());
        assert_eq!(h.coordinator.leader(), None);

        let (c, mut inbox_c) = connect(&mut h.coordinator);
        assert!(h.coordinator.is_monitor_running());
        assert_eq!(h.coordinator.leader(), Some(c));
        assert_eq!(c.seat(), 3);
        assert_eq!(
            drain(&mut inbox_c)[0],
            ServerMessage::notice(Notice::MonitorStarted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_stale_leader_and_promotes_next() {
        let mut h = harness();
        let (a, _inbox_a) = connect(&mut h.coordinator);
        let (b, mut inbox_b) = connect(&mut h.coordinator);
        drain(&mut inbox_b);

        tokio::time::advance(Duration::from_millis(2000)).await;
        h.coordinator.on_inbound(b, Inbound::Heartbeat);
        tokio::time::advance(Duration::from_millis(1000)).await;

        assert_eq!(h.coordinator.sweep(), vec![a]);
        assert_eq!(h.coordinator.leader(), Some(b));
        assert_eq!(
            drain(&mut inbox_b),
            vec![
                ServerMessage::notice(Notice::Expired { seat: 1 }),
                ServerMessage::notice(Notice::LeadershipInherited),
                ServerMessage::Ready,
            ]
        );

        // Already removed: a later sweep does not expire it again.
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(h.coordinator.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expiring_leader_and_successor_lands_on_third_seat() {
        let mut h = harness();
        let (a, _inbox_a) = connect(&mut h.coordinator);
        let (b, mut inbox_b) = connect(&mut h.coordinator);
        let (c, mut inbox_c) = connect(&mut h.coordinator);
        drain(&mut inbox_b);
        drain(&mut inbox_c);

        tokio::time::advance(Duration::from_millis(2000)).await;
        h.coordinator.on_inbound(c, Inbound::Heartbeat);
        tokio::time::advance(Duration::from_millis(1000)).await;

        // Attach order: seat 2 briefly inherits before its own expiry.
        assert_eq!(h.coordinator.sweep(), vec![a, b]);
        assert_eq!(h.coordinator.leader(), Some(c));
        assert_eq!(
            drain(&mut inbox_b),
            vec![
                ServerMessage::notice(Notice::Expired { seat: 1 }),
                ServerMessage::notice(Notice::LeadershipInherited),
                ServerMessage::Ready,
            ]
        );
        assert!(inbox_b.is_closed());
        assert_eq!(
            drain(&mut inbox_c),
            vec![
                ServerMessage::notice(Notice::Expired { seat: 1 }),
                ServerMessage::notice(Notice::Expired { seat: 2 }),
                ServerMessage::notice(Notice::LeadershipInherited),
                ServerMessage::Ready,
            ]
        );
        assert!(h.coordinator.is_monitor_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_connection_expires_and_monitor_stops() {
        let mut h = harness();
        let (_a, _inbox_a) = connect(&mut h.coordinator);

        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(h.coordinator.sweep().is_empty());
        assert!(h.coordinator.is_monitor_running());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(h.coordinator.sweep().len(), 1);
        assert_eq!(h.coordinator.live_count(), 0);
        assert_eq!(h.coordinator.leader(), None);
        assert!(!h.coordinator.is_monitor_running());
    }

    #[tokio::test]
    async fn test_messages_from_departed_connection_are_ignored() {
        let mut h = harness();
        let (a, _inbox_a) = connect(&mut h.coordinator);
        let (_b, mut inbox_b) = connect(&mut h.coordinator);
        h.coordinator.on_inbound(a, Inbound::Closing);
        drain(&mut inbox_b);

        h.coordinator.on_inbound(a, Inbound::Publish(json!("late")));
        h.coordinator.on_inbound(a, Inbound::Closing);
        assert!(drain(&mut inbox_b).is_empty());
        assert_eq!(h.coordinator.payload(), None);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state() {
        let mut h = harness();
        let (a, _inbox_a) = connect(&mut h.coordinator);
        let (_b, _inbox_b) = connect(&mut h.coordinator);
        h.coordinator.on_inbound(a, Inbound::Publish(json!(1)));
        h.coordinator.on_inbound(a, Inbound::Closing);

        assert_eq!(
            h.coordinator.snapshot(),
            CoordinatorSnapshot {
                live_connections: 1,
                seats_issued: 2,
                leader_seat: Some(2),
                monitor_running: true,
                has_payload: true,
            }
        );
    }
}
