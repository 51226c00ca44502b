mod bounded;
mod builder;
mod debug;

pub use bounded::{BoundedQueue, RecvOutcome, SendOutcome};
pub use builder::QueueBuilder;

#[allow(non_snake_case)]
pub mod RingBuffer;
#[allow(non_snake_case)]
pub mod RingBuffer_impl;
pub mod layout;
