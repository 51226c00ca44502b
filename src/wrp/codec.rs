// Byte encoding of frames. Everything outside this file treats the bytes as
// opaque.

use thiserror::Error;

use super::message::Frame;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(frame)?)
}

pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrp::message::{Event, Request};

    #[test]
    fn request_carries_type_tag() {
        let frame = Frame::Request(Request {
            transaction_uuid: "c2bb1f16-0f1e".into(),
            source: "dns:parodus".into(),
            dest: "mac:112233445566/iot".into(),
            content_type: None,
            payload: b"Hello".to_vec(),
        });
        let bytes = encode(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["msg_type"], "request");
        assert!(value.get("content_type").is_none());
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn decodes_unit_and_struct_frames() {
        assert_eq!(
            decode(br#"{"msg_type":"service_alive"}"#).unwrap(),
            Frame::ServiceAlive
        );
        assert_eq!(
            decode(br#"{"msg_type":"auth","status":200}"#).unwrap(),
            Frame::Auth { status: 200 }
        );
    }

    #[test]
    fn event_payload_defaults_to_empty() {
        let frame = decode(br#"{"msg_type":"event","source":"a","dest":"b"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event(Event {
                source: "a".into(),
                dest: "b".into(),
                content_type: None,
                payload: Vec::new(),
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode(b""), Err(CodecError::Empty)));
        assert!(matches!(
            decode(b"*** Invalid WRP message\n"),
            Err(CodecError::Malformed(_))
        ));
        assert!(decode(br#"{"msg_type":"teapot"}"#).is_err());
    }
}
