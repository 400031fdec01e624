//! # Connection Registry
//!
//! An append-only arena of connection slots. A connection's seat number is
//! `1 + its index`, fixed at attach time. Departures leave a tombstone
//! (`None`) in place instead of compacting, so later seats never shift and a
//! seat is never handed to another connection.
//!
//! Each slot owns the sending half of its connection's outbound channel.
//! Tombstoning a slot drops that sender, which is how the coordinator closes
//! a connection's channel.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::protocol::ServerMessage;

/// Sending half of a connection's outbound channel.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerMessage>>;

/// Opaque handle of one attachment. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// 1-based seat number, used for status wording.
    pub fn seat(&self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat-{}", self.seat())
    }
}

/// A live connection record.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    last_heartbeat: Instant,
    outbox: Outbox,
}

impl Connection {
    /// The connection's handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// When the last heartbeat (or the attach) was recorded.
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// Queues a message for this connection. Returns `false` if the
    /// connection's transport task has already gone away.
    pub fn send(&self, message: Arc<ServerMessage>) -> bool {
        self.outbox.send(message).is_ok()
    }
}

/// Ordered collection of connection slots with tombstone-on-departure.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Option<Connection>>,
    live: usize,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new slot and returns the handle; its seat is the new slot count.
    pub fn attach(&mut self, outbox: Outbox, now: Instant) -> ConnectionId {
        let id = ConnectionId(self.slots.len());
        self.slots.push(Some(Connection {
            id,
            last_heartbeat: now,
            outbox,
        }));
        self.live += 1;
        log::debug!("Registry: {} attached ({} live)", id, self.live);
        id
    }

    /// Records `now` as the connection's last heartbeat. No-op for a
    /// tombstoned connection; returns whether a live slot was updated.
    pub fn touch(&mut self, id: ConnectionId, now: Instant) -> bool {
        match self.slots.get_mut(id.0) {
            Some(Some(connection)) => {
                connection.last_heartbeat = now;
                true
            }
            _ => false,
        }
    }

    /// Tombstones the slot and hands back the departed record (its seat is
    /// `record.id().seat()`). Removing an already-tombstoned connection is a
    /// no-op returning `None`.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let departed = self.slots.get_mut(id.0).and_then(Option::take)?;
        self.live -= 1;
        log::debug!("Registry: {} removed ({} live)", id, self.live);
        Some(departed)
    }

    /// Live connections in attach order.
    pub fn live_connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.slots.iter().flatten()
    }

    /// The earliest-attached connection still present.
    pub fn first_live(&self) -> Option<ConnectionId> {
        self.live_connections().next().map(Connection::id)
    }

    /// Looks up a live connection.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Whether the handle refers to a live connection.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Connections whose heartbeat is at least `threshold` old at `now`, in attach order.
    pub fn expired(&self, now: Instant, threshold: Duration) -> Vec<ConnectionId> {
        self.live_connections()
            .filter(|c| now.saturating_duration_since(c.last_heartbeat) >= threshold)
            .map(Connection::id)
            .collect()
    }

    /// True when no live connection remains.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of live connections.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of seats ever handed out, tombstones included.
    pub fn seats_issued(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Arc<ServerMessage>>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_seats_follow_attach_order() {
        let mut registry = Registry::new();
        let now = Instant::now();
        let (a, _ra) = outbox();
        let (b, _rb) = outbox();
        let (c, _rc) = outbox();

        let ids = [
            registry.attach(a, now),
            registry.attach(b, now),
            registry.attach(c, now),
        ];
        let seats: Vec<usize> = ids.iter().map(ConnectionId::seat).collect();
        assert_eq!(seats, vec![1, 2, 3]);
        assert_eq!(registry.live_count(), 3);
    }

    #[test]
    fn test_remove_leaves_tombstone_and_keeps_seats() {
        let mut registry = Registry::new();
        let now = Instant::now();
        let (a, _ra) = outbox();
        let (b, _rb) = outbox();
        let first = registry.attach(a, now);
        let second = registry.attach(b, now);

        let departed = registry.remove(first).expect("first was live");
        assert_eq!(departed.id().seat(), 1);

        let (c, _rc) = outbox();
        let third = registry.attach(c, now);
        assert_eq!(third.seat(), 3);
        assert_eq!(registry.first_live(), Some(second));
        assert_eq!(registry.seats_issued(), 3);

        let live: Vec<usize> = registry.live_connections().map(|c| c.id().seat()).collect();
        assert_eq!(live, vec![2, 3]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = Registry::new();
        let (a, _ra) = outbox();
        let id = registry.attach(a, Instant::now());

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_touch_ignores_tombstones() {
        let mut registry = Registry::new();
        let (a, _ra) = outbox();
        let id = registry.attach(a, Instant::now());
        assert!(registry.touch(id, Instant::now()));
        registry.remove(id);
        assert!(!registry.touch(id, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_uses_threshold_inclusively() {
        let mut registry = Registry::new();
        let (a, _ra) = outbox();
        let (b, _rb) = outbox();
        let stale = registry.attach(a, Instant::now());
        let fresh = registry.attach(b, Instant::now());

        tokio::time::advance(Duration::from_millis(3000)).await;
        registry.touch(fresh, Instant::now());

        let expired = registry.expired(Instant::now(), Duration::from_millis(3000));
        assert_eq!(expired, vec![stale]);
    }

    #[test]
    fn test_dropping_record_closes_channel() {
        let mut registry = Registry::new();
        let (a, mut ra) = outbox();
        let id = registry.attach(a, Instant::now());
        drop(registry.remove(id));
        assert!(ra.try_recv().is_err());
        assert!(ra.is_closed());
    }
}
