//! # Wire Protocol
//!
//! Messages exchanged between a connection and the coordinator.
//!
//! Inbound frames are plain text: three keywords (`heartbeat`, `closing`,
//! `get`) and anything else is a publish attempt. Outbound frames are JSON
//! objects tagged by `type`, so clients can tell status notices, the ready
//! signal, broadcast data and `get` replies apart without guessing.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Keyword for a liveness signal.
pub const HEARTBEAT: &str = "heartbeat";
/// Short form accepted for compatibility with older clients.
pub const HEARTBEAT_SHORT: &str = "heart";
/// Keyword for a graceful departure.
pub const CLOSING: &str = "closing";
/// Keyword for a payload request.
pub const GET: &str = "get";

/// A message sent by a connection to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Refreshes the connection's last-heartbeat timestamp.
    Heartbeat,
    /// The connection is leaving on purpose.
    Closing,
    /// Asks for the last published payload.
    Get,
    /// Attempts to replace the shared payload. Only honoured for the leader.
    Publish(Value),
}

impl Inbound {
    /// Parses a text frame.
    ///
    /// Keywords are matched after trimming whitespace. Any other text is
    /// parsed as JSON; text that is not valid JSON is published as a JSON
    /// string so that no frame is silently dropped.
    pub fn from_text(text: &str) -> Self {
        match text.trim() {
            HEARTBEAT | HEARTBEAT_SHORT => Inbound::Heartbeat,
            CLOSING => Inbound::Closing,
            GET => Inbound::Get,
            _ => match serde_json::from_str::<Value>(text) {
                Ok(value) => Inbound::Publish(value),
                Err(_) => Inbound::Publish(Value::String(text.to_string())),
            },
        }
    }

    /// Renders the message as the text frame a client would send.
    pub fn to_text(&self) -> String {
        match self {
            Inbound::Heartbeat => HEARTBEAT.to_string(),
            Inbound::Closing => CLOSING.to_string(),
            Inbound::Get => GET.to_string(),
            Inbound::Publish(value) => value.to_string(),
        }
    }
}

/// Informational status events. They carry no payload and never change
/// client behaviour except for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notice {
    /// The liveness monitor went from stopped to running.
    MonitorStarted,
    /// A new connection took the given seat (broadcast).
    Joined {
        /// Seat number of the newcomer.
        seat: usize,
    },
    /// Tells a new connection which seat it occupies (unicast).
    SeatAssigned {
        /// Seat number of the recipient.
        seat: usize,
    },
    /// The recipient became leader on attach.
    LeadershipGranted,
    /// The recipient became leader because the previous leader left.
    LeadershipInherited,
    /// The connection on this seat left gracefully.
    Departed {
        /// Seat number that was vacated.
        seat: usize,
    },
    /// The connection on this seat stopped sending heartbeats.
    Expired {
        /// Seat number that was vacated.
        seat: usize,
    },
    /// The recipient tried to publish without being leader.
    PublishRejected,
}

impl Notice {
    /// Human-readable wording for status displays and logs.
    pub fn message(&self) -> String {
        match self {
            Notice::MonitorStarted => "Someone finally arrived".to_string(),
            Notice::Joined { seat } => format!("Seat {} is now taken", seat),
            Notice::SeatAssigned { seat } => format!("You are sitting in seat {}", seat),
            Notice::LeadershipGranted => "You have appointed yourself leader".to_string(),
            Notice::LeadershipInherited => "You have inherited the leadership".to_string(),
            Notice::Departed { seat } => format!("The connection in seat {} has left", seat),
            Notice::Expired { seat } => format!("The connection in seat {} seems to be dead", seat),
            Notice::PublishRejected => {
                "Another connection is handling the data; you may not publish, use get instead"
                    .to_string()
            }
        }
    }
}

/// A message sent by the coordinator to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A status notice with its rendered wording.
    Notice {
        /// The structured event.
        notice: Notice,
        /// Rendered wording of `notice`.
        message: String,
    },
    /// The recipient may begin privileged work.
    Ready,
    /// A payload accepted from the leader, sent to every live connection.
    Data {
        /// The published value.
        data: Value,
    },
    /// Answer to `get`; `None` until the first publish.
    ///
    /// Absence is encoded by leaving `data` out, so a published `null`
    /// (`"data": null`) stays distinguishable from "nothing yet".
    Reply {
        /// The last published value, if any.
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "present_value"
        )]
        data: Option<Value>,
    },
}

impl ServerMessage {
    /// Wraps a notice together with its wording.
    pub fn notice(notice: Notice) -> Self {
        let message = notice.message();
        ServerMessage::Notice { notice, message }
    }

    /// Serializes the message into a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Only called when the field is present, so `null` becomes `Some(Value::Null)`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
