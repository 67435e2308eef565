//! Core data model.
//!
//! A parsing event is one queued refresh request. It has identity (type +
//! message), a lifecycle status, and timestamps. Log entries hang off an
//! event id and are append-only.

pub mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Parsing Event
// ---------------------------------------------------------------------------

/// A unit of scheduled refresh work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingEvent {
    pub id: EventId,

    /// Which worker must handle this event.
    pub event_type: EventType,

    /// What to refresh. Together with `event_type` this is the dedup key.
    pub event_message: EventMessage,

    pub event_status: EventStatus,

    /// Set exactly when the event reaches `Done`, null otherwise.
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Newtype for parsing event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a parsing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Queued, waiting for a poller to acquire it.
    Wait,
    /// Acquired by exactly one poller, worker running.
    Processing,
    /// Every target refreshed. Terminal.
    Done,
    /// At least one target failed or no worker was registered. Terminal.
    Fail,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Wait,
        EventStatus::Processing,
        EventStatus::Done,
        EventStatus::Fail,
    ];

    /// Is `self -> to` part of the normal lifecycle?
    ///
    /// `set_status` does not enforce this; operators may override any
    /// status. It is used to flag overrides in the logs.
    pub fn can_transition_to(self, to: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, to),
            (Wait, Processing) | (Processing, Done) | (Processing, Fail)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Done | EventStatus::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Wait => "WAIT",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Done => "DONE",
            EventStatus::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Other(format!("unknown event status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Event Type
// ---------------------------------------------------------------------------

/// Which external source an event refreshes. Each has its own worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "DINNER_QUEEN")]
    DinnerQueen,
    #[serde(rename = "SEOUL_OUBA")]
    Seoulouba,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::DinnerQueen, EventType::Seoulouba];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::DinnerQueen => "DINNER_QUEEN",
            EventType::Seoulouba => "SEOUL_OUBA",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnsupportedEventType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Event Message
// ---------------------------------------------------------------------------

/// Current on-disk schema version of `event_message`.
pub const MESSAGE_SCHEMA_VERSION: u16 = 1;

/// What an event asks its worker to refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventMessage {
    /// Refresh everything the source exposes.
    All,
    /// Refresh a single target.
    Update { target_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    All,
    Update,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::All => "ALL",
            RequestType::Update => "UPDATE",
        }
    }
}

impl EventMessage {
    /// Request for one target. An empty id is caught by
    /// [`validate`](Self::validate) when the event is created.
    pub fn update(target_id: impl Into<String>) -> Self {
        EventMessage::Update {
            target_id: target_id.into(),
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            EventMessage::All => RequestType::All,
            EventMessage::Update { .. } => RequestType::Update,
        }
    }

    pub fn target_id(&self) -> Option<&str> {
        match self {
            EventMessage::All => None,
            EventMessage::Update { target_id } => Some(target_id),
        }
    }

    /// Encode to the versioned JSON stored in `event_message`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "schemaVersion": MESSAGE_SCHEMA_VERSION,
            "requestType": self.request_type().as_str(),
        });
        if let Some(target_id) = self.target_id() {
            value["targetId"] = serde_json::Value::from(target_id);
        }
        value
    }

    /// Decode the versioned JSON stored in `event_message`.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let stored: StoredMessage = serde_json::from_value(value)
            .map_err(|e| Error::InvalidMessage(e.to_string()))?;

        if stored.schema_version != MESSAGE_SCHEMA_VERSION {
            return Err(Error::InvalidMessage(format!(
                "unsupported schema version {}",
                stored.schema_version
            )));
        }

        let message = match (stored.request_type, stored.target_id) {
            (RequestType::All, None) => EventMessage::All,
            (RequestType::All, Some(_)) => {
                return Err(Error::InvalidMessage(
                    "ALL request must not carry a targetId".to_string(),
                ));
            }
            (RequestType::Update, target_id) => EventMessage::Update {
                target_id: target_id.unwrap_or_default(),
            },
        };
        message.validate()?;
        Ok(message)
    }

    /// Reject messages the store would not be able to read back.
    pub fn validate(&self) -> Result<()> {
        match self {
            EventMessage::Update { target_id } if target_id.is_empty() => Err(
                Error::InvalidMessage("UPDATE request requires a targetId".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for EventMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventMessage::All => write!(f, "ALL"),
            EventMessage::Update { target_id } => write!(f, "UPDATE({target_id})"),
        }
    }
}

impl Serialize for EventMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventMessage {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        EventMessage::from_json(value).map_err(serde::de::Error::custom)
    }
}

/// Wire shape of `event_message`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    schema_version: u16,
    request_type: RequestType,
    #[serde(default)]
    target_id: Option<String>,
}
