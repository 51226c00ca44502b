pub mod futex;
pub mod transport;

pub use transport::{
    connect_receiver, connect_sender, parse_endpoint, shutdown_socket, Endpoint, Polled,
    ReceiverSocket, SenderSocket, TransportError,
};
