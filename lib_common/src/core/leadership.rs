//! # Leadership Manager
//!
//! Holds the single leader reference. A connection appoints itself on attach
//! when nobody leads; when the leader departs, the earliest
//! surviving connection (lowest seat) succeeds it in the same call.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use crate::core::registry::{ConnectionId, Registry};

/// Outcome of a departure as seen by the leadership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Succession {
    /// The departed connection was not leader; nothing changed.
    Unaffected,
    /// The leader left and this connection took over.
    SucceededBy(ConnectionId),
    /// The leader left and nobody is left to take over.
    Vacant,
}

#[derive(Debug, Default)]
pub struct Leadership {
    leader: Option<ConnectionId>,
}

impl Leadership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current leader, if any.
    pub fn leader(&self) -> Option<ConnectionId> {
        self.leader
    }

    pub fn is_leader(&self, id: ConnectionId) -> bool {
        self.leader == Some(id)
    }

    /// Makes `id` leader if nobody holds the role. The caller notifies the
    /// connection when this returns `true`.
    pub fn appoint_if_vacant(&mut self, id: ConnectionId) -> bool {
        if self.leader.is_some() {
            return false;
        }
        self.leader = Some(id);
        log::info!("Leadership: {} appointed itself leader", id);
        true
    }

    /// Must be called after `departed` has been removed from `registry`.
    ///
    /// Clearing the old leader and choosing the successor happen within this
    /// single `&mut self` call; nothing can observe the gap between them.
    pub fn departure_of(&mut self, departed: ConnectionId, registry: &Registry) -> Succession {
        if !self.is_leader(departed) {
            return Succession::Unaffected;
        }
        self.leader = registry.first_live();
        match self.leader {
            Some(successor) => {
                log::info!("Leadership: {} succeeded {}", successor, departed);
                Succession::SucceededBy(successor)
            }
            None => {
                log::info!("Leadership: {} left, leadership vacant", departed);
                Succession::Vacant
            }
        }
    }
}
