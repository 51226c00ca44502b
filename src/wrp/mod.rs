pub mod codec;
pub mod dispatch;
pub mod message;

pub use codec::{decode, encode, CodecError};
pub use dispatch::{classify_inbound, decode_outbound, validate_outbound, Inbound, AUTH_OK};
pub use message::{Event, Frame, MessageKind, Request, WrpMessage};
