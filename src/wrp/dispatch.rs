use crate::error::{Error, Result};

use super::codec::{self, CodecError};
use super::message::{Frame, MessageKind, WrpMessage};

/// Status parodus sends back for an accepted registration.
pub const AUTH_OK: i32 = 200;

/// What the receive thread should do with an incoming frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Queue it for the application
    Deliver(MessageKind),
    Auth { status: i32 },
    KeepAlive,
    /// Valid, but nothing a client consumes
    Ignored,
}

/// Reject a message that could not be routed.
pub fn validate_outbound(msg: &WrpMessage) -> Result<()> {
    if msg.source().is_empty() {
        return Err(Error::SendInvalidMessage("source is empty".into()));
    }
    if msg.dest().is_empty() {
        return Err(Error::SendInvalidMessage("dest is empty".into()));
    }
    if let WrpMessage::Request(r) = msg {
        if r.transaction_uuid.is_empty() {
            return Err(Error::SendInvalidMessage("request has no transaction uuid".into()));
        }
    }
    Ok(())
}

/// Validate and encode a message for the sender socket.
pub fn encode_outbound(msg: &WrpMessage) -> Result<Vec<u8>> {
    validate_outbound(msg)?;
    codec::encode(&Frame::from(msg)).map_err(|e| Error::SendInvalidMessage(e.to_string()))
}

/// Decode caller-supplied bytes that must hold a request or event.
pub fn decode_outbound(bytes: &[u8]) -> Result<WrpMessage> {
    let frame = codec::decode(bytes).map_err(|e| Error::SendInvalidMessage(e.to_string()))?;
    let msg = match frame {
        Frame::Request(r) => WrpMessage::Request(r),
        Frame::Event(e) => WrpMessage::Event(e),
        other => {
            return Err(Error::SendInvalidMessage(format!(
                "{} frames cannot be sent by a client",
                frame_name(&other)
            )))
        }
    };
    validate_outbound(&msg)?;
    Ok(msg)
}

pub fn classify_inbound(bytes: &[u8]) -> std::result::Result<Inbound, CodecError> {
    Ok(match codec::decode(bytes)? {
        Frame::Request(_) => Inbound::Deliver(MessageKind::Request),
        Frame::Event(_) => Inbound::Deliver(MessageKind::Event),
        Frame::Auth { status } => Inbound::Auth { status },
        Frame::ServiceAlive => Inbound::KeepAlive,
        Frame::ServiceRegistration { .. } => Inbound::Ignored,
    })
}

/// Decode a frame the receive thread already classified as deliverable.
pub fn decode_delivered(bytes: &[u8]) -> Result<WrpMessage> {
    match codec::decode(bytes).map_err(Error::ReceiveDecode)? {
        Frame::Request(r) => Ok(WrpMessage::Request(r)),
        Frame::Event(e) => Ok(WrpMessage::Event(e)),
        other => Err(Error::ReceiveDecode(CodecError::Malformed(serde::de::Error::custom(
            format!("unexpected {} frame in receive queue", frame_name(&other)),
        )))),
    }
}

fn frame_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::Auth { .. } => "auth",
        Frame::Request(_) => "request",
        Frame::Event(_) => "event",
        Frame::ServiceRegistration { .. } => "service_registration",
        Frame::ServiceAlive => "service_alive",
    }
}
