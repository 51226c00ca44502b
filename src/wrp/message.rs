//! WRP message types
//!
//! These mirror what parodus puts on the wire so both sides agree on the
//! frame shape.

use serde::{Deserialize, Serialize};

/// A request that expects a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub transaction_uuid: String,
    pub source: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// A one-way notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub source: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// The messages an application sends and receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrpMessage {
    Request(Request),
    Event(Event),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Event,
}

impl WrpMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WrpMessage::Request(_) => MessageKind::Request,
            WrpMessage::Event(_) => MessageKind::Event,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, WrpMessage::Request(_))
    }

    pub fn source(&self) -> &str {
        match self {
            WrpMessage::Request(r) => &r.source,
            WrpMessage::Event(e) => &e.source,
        }
    }

    pub fn dest(&self) -> &str {
        match self {
            WrpMessage::Request(r) => &r.dest,
            WrpMessage::Event(e) => &e.dest,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            WrpMessage::Request(r) => r.content_type.as_deref(),
            WrpMessage::Event(e) => e.content_type.as_deref(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            WrpMessage::Request(r) => &r.payload,
            WrpMessage::Event(e) => &e.payload,
        }
    }
}

impl From<Request> for WrpMessage {
    fn from(r: Request) -> Self {
        WrpMessage::Request(r)
    }
}

impl From<Event> for WrpMessage {
    fn from(e: Event) -> Self {
        WrpMessage::Event(e)
    }
}

/// Everything that travels between a client and parodus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Frame {
    /// Parodus accepted (or refused) a registration
    Auth { status: i32 },

    Request(Request),

    Event(Event),

    /// Client announces its name and where parodus should push to
    ServiceRegistration { service_name: String, url: String },

    /// Keepalive, in either direction
    ServiceAlive,
}

impl From<WrpMessage> for Frame {
    fn from(msg: WrpMessage) -> Self {
        match msg {
            WrpMessage::Request(r) => Frame::Request(r),
            WrpMessage::Event(e) => Frame::Event(e),
        }
    }
}

impl From<&WrpMessage> for Frame {
    fn from(msg: &WrpMessage) -> Self {
        Frame::from(msg.clone())
    }
}
