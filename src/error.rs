//! Error types for libparodus
//!
//! Every failure carries a stable negative code (see [`codes`]) that also
//! crosses the C ABI, plus an OS errno where one applies.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::wrp::CodecError;
use crate::Core::transport::TransportError;

/// Stable numeric codes. Zero is success; positive values are receive
/// outcomes, negative values are errors.
pub mod codes {
    pub const OK: i32 = 0;
    pub const RECEIVE_TIMEOUT: i32 = 1;
    pub const RECEIVE_CLOSED: i32 = 2;

    pub const INIT_CFG: i32 = -0x20000;
    pub const INIT_CONNECT: i32 = -0x30000;
    pub const INIT_QUEUE: i32 = -0x50000;
    pub const INIT_REGISTER: i32 = -0x60000;
    pub const INIT_RCV_THREAD: i32 = -0x70000;
    pub const RCV_NULL_INST: i32 = -0x80000;
    pub const RCV_CFG: i32 = -0xA0000;
    pub const RCV_RCV: i32 = -0xB0000;
    pub const RCV_RECONNECT: i32 = -0xC0000;
    pub const CLOSE_RCV_NULL_INST: i32 = -0xD0000;
    pub const CLOSE_RCV_CFG: i32 = -0xF0000;
    pub const SEND_NULL_INST: i32 = -0x120000;
    pub const SEND_WRP_MSG: i32 = -0x140000;
    pub const SEND_SOCKET: i32 = -0x150000;
    pub const INVALID_ARG: i32 = -0x160000;

    /// Init step that failed, reported next to `INIT_*` codes.
    pub mod detail {
        pub const NONE: i32 = 0;
        pub const SERVICE_NAME: i32 = -0x101;
        pub const SENDER_URL: i32 = -0x102;
        pub const RECEIVER_URL: i32 = -0x103;
        pub const SENDER_CREATE: i32 = -0x104;
        pub const RECEIVER_CREATE: i32 = -0x105;
        pub const QUEUE: i32 = -0x106;
        pub const REGISTER: i32 = -0x107;
        pub const RECEIVE_THREAD: i32 = -0x108;
        pub const MONITOR_THREAD: i32 = -0x109;
        pub const SETTINGS: i32 = -0x10A;
    }
}

/// Which init step an `INIT_*` error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDetail {
    ServiceName,
    Settings,
    SenderUrl,
    ReceiverUrl,
    SenderCreate,
    ReceiverCreate,
    Queue,
    Register,
    ReceiveThread,
    MonitorThread,
}

impl InitDetail {
    pub fn code(self) -> i32 {
        use codes::detail;
        match self {
            InitDetail::ServiceName => detail::SERVICE_NAME,
            InitDetail::Settings => detail::SETTINGS,
            InitDetail::SenderUrl => detail::SENDER_URL,
            InitDetail::ReceiverUrl => detail::RECEIVER_URL,
            InitDetail::SenderCreate => detail::SENDER_CREATE,
            InitDetail::ReceiverCreate => detail::RECEIVER_CREATE,
            InitDetail::Queue => detail::QUEUE,
            InitDetail::Register => detail::REGISTER,
            InitDetail::ReceiveThread => detail::RECEIVE_THREAD,
            InitDetail::MonitorThread => detail::MONITOR_THREAD,
        }
    }
}

impl fmt::Display for InitDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitDetail::ServiceName => "service name",
            InitDetail::Settings => "settings",
            InitDetail::SenderUrl => "parodus url",
            InitDetail::ReceiverUrl => "client url",
            InitDetail::SenderCreate => "sender socket",
            InitDetail::ReceiverCreate => "receiver socket",
            InitDetail::Queue => "receive queue",
            InitDetail::Register => "service registration",
            InitDetail::ReceiveThread => "receive thread",
            InitDetail::MonitorThread => "keepalive thread",
        };
        f.write_str(name)
    }
}

/// Errors returned by libparodus entry points.
///
/// Receive timeouts and a closed receiver are not errors; see
/// [`Received`](crate::session::Received).
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value (including an endpoint URL) is unusable
    #[error("Error on libparodus init. Bad {detail}: {reason}")]
    InitConfig {
        detail: InitDetail,
        reason: String,
        oserr: i32,
    },

    /// A socket could not be created or bound
    #[error("Error on libparodus init. Could not create {detail}: {source}")]
    InitConnect {
        detail: InitDetail,
        #[source]
        source: TransportError,
    },

    #[error("Error on libparodus init. Could not create receive queue: {0}")]
    InitQueue(#[source] io::Error),

    #[error("Error on libparodus init. Could not register with parodus: {0}")]
    InitRegister(#[source] TransportError),

    #[error("Error on libparodus init. Could not start {detail}: {source}")]
    InitThread {
        detail: InitDetail,
        #[source]
        source: io::Error,
    },

    /// The instance was created without `receive`
    #[error("Error on libparodus receive. Receive option not set.")]
    ReceiveDisabled,

    /// A queued message could not be decoded
    #[error("Error on libparodus receive. Could not decode message: {0}")]
    ReceiveDecode(#[source] CodecError),

    /// The connection to parodus is down and rebuilding it keeps failing
    #[error("Error on libparodus receive. Reconnect to parodus failed.")]
    ReceiveReconnectFailed,

    #[error("Error on libparodus close receiver. Receive option not set.")]
    CloseReceiverDisabled,

    /// The outbound message is not a well-formed request or event
    #[error("Error on libparodus send. Invalid WRP message: {0}")]
    SendInvalidMessage(String),

    #[error("Error on libparodus send. Socket send failed: {0}")]
    SendSocket(#[source] TransportError),
}

impl Error {
    /// The stable numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::InitConfig { .. } => codes::INIT_CFG,
            Error::InitConnect { .. } => codes::INIT_CONNECT,
            Error::InitQueue(_) => codes::INIT_QUEUE,
            Error::InitRegister(_) => codes::INIT_REGISTER,
            Error::InitThread { .. } => codes::INIT_RCV_THREAD,
            Error::ReceiveDisabled => codes::RCV_CFG,
            Error::ReceiveDecode(_) => codes::RCV_RCV,
            Error::ReceiveReconnectFailed => codes::RCV_RECONNECT,
            Error::CloseReceiverDisabled => codes::CLOSE_RCV_CFG,
            Error::SendInvalidMessage(_) => codes::SEND_WRP_MSG,
            Error::SendSocket(_) => codes::SEND_SOCKET,
        }
    }

    /// The init step that failed, for `INIT_*` errors.
    pub fn detail(&self) -> Option<InitDetail> {
        match self {
            Error::InitConfig { detail, .. }
            | Error::InitConnect { detail, .. }
            | Error::InitThread { detail, .. } => Some(*detail),
            Error::InitQueue(_) => Some(InitDetail::Queue),
            Error::InitRegister(_) => Some(InitDetail::Register),
            _ => None,
        }
    }

    /// The underlying OS errno, or 0 when there is none.
    pub fn os_error(&self) -> i32 {
        match self {
            Error::InitConfig { oserr, .. } => *oserr,
            Error::InitConnect { source, .. } | Error::InitRegister(source) | Error::SendSocket(source) => {
                source.os_error()
            }
            Error::InitQueue(e) => e.raw_os_error().unwrap_or(libc::EINVAL),
            Error::InitThread { source, .. } => source.raw_os_error().unwrap_or(libc::EAGAIN),
            _ => 0,
        }
    }

    /// Map a socket failure during init to a config error (bad URL) or a
    /// connect error (everything else).
    pub(crate) fn from_init_transport(err: TransportError, url: InitDetail, create: InitDetail) -> Self {
        if err.is_invalid_url() {
            Error::InitConfig {
                detail: url,
                oserr: err.os_error(),
                reason: err.to_string(),
            }
        } else {
            Error::InitConnect {
                detail: create,
                source: err,
            }
        }
    }
}

/// Result type for libparodus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed human-readable text for a code returned by any entry point.
pub fn strerror(code: i32) -> &'static str {
    match code {
        codes::OK => "Success.",
        codes::RECEIVE_TIMEOUT => "Timed out waiting for a message.",
        codes::RECEIVE_CLOSED => "Receiver closed.",
        codes::INIT_CFG => "Error on libparodus init. Invalid config.",
        codes::INIT_CONNECT => "Error on libparodus init. Could not connect.",
        codes::INIT_QUEUE => "Error on libparodus init. Could not create receive queue.",
        codes::INIT_REGISTER => "Error on libparodus init. Could not register with parodus.",
        codes::INIT_RCV_THREAD => "Error on libparodus init. Could not start receive thread.",
        codes::RCV_NULL_INST => "Error on libparodus receive. Null instance given.",
        codes::RCV_CFG => "Error on libparodus receive. Receive option not set.",
        codes::RCV_RCV => "Error on libparodus receive. Could not decode message.",
        codes::RCV_RECONNECT => "Error on libparodus receive. Reconnect to parodus failed.",
        codes::CLOSE_RCV_NULL_INST => "Error on libparodus close receiver. Null instance given.",
        codes::CLOSE_RCV_CFG => "Error on libparodus close receiver. Receive option not set.",
        codes::SEND_NULL_INST => "Error on libparodus send. Null instance given.",
        codes::SEND_WRP_MSG => "Error on libparodus send. Invalid WRP message.",
        codes::SEND_SOCKET => "Error on libparodus send. Socket send failed.",
        codes::INVALID_ARG => "Error on libparodus. Invalid argument.",
        _ => "Unknown libparodus error.",
    }
}

/// Every code [`strerror`] knows about.
pub const ALL_CODES: &[i32] = &[
    codes::OK,
    codes::RECEIVE_TIMEOUT,
    codes::RECEIVE_CLOSED,
    codes::INIT_CFG,
    codes::INIT_CONNECT,
    codes::INIT_QUEUE,
    codes::INIT_REGISTER,
    codes::INIT_RCV_THREAD,
    codes::RCV_NULL_INST,
    codes::RCV_CFG,
    codes::RCV_RCV,
    codes::RCV_RECONNECT,
    codes::CLOSE_RCV_NULL_INST,
    codes::CLOSE_RCV_CFG,
    codes::SEND_NULL_INST,
    codes::SEND_WRP_MSG,
    codes::SEND_SOCKET,
    codes::INVALID_ARG,
];
