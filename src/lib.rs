//! Client library for talking to parodus over WRP.
//!
//! An [`Instance`] registers one service with parodus, sends requests and
//! events through it and, when configured to receive, queues whatever
//! parodus pushes back until the application collects it.

// Module naming follows project convention (Queue = bounded receive queue)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Queue;
#[allow(non_snake_case)]
pub mod Debug {
    #[allow(non_snake_case)]
    pub mod StructDebug;
}

pub mod config;
pub mod error;
pub mod ffi;
pub mod session;
pub mod wrp;

pub use config::{Config, TestFlags};
pub use error::{codes, strerror, Error, InitDetail, Result};
pub use session::{Instance, InstanceState, MonitorState, Received};
pub use wrp::{Event, MessageKind, Request, WrpMessage};
