use libparodus::Core::transport::{
    connect_receiver, connect_sender, shutdown_socket, Polled, ReceiverSocket, TransportError,
};
use serial_test::serial;
use std::net::TcpListener;
use std::time::{Duration, Instant};

const KEEPALIVE: Duration = Duration::from_secs(20);
const TIMEOUT: Duration = Duration::from_secs(2);
const BAD_RCV_URL: &str = "tcp://127.0.0.1:X007";
const BAD_SEND_URL: &str = "tcp://127.0.0.1:X006";

fn next_frame(receiver: &mut ReceiverSocket) -> Vec<u8> {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        match receiver.poll_frame(Duration::from_millis(20)).unwrap() {
            Polled::Frame(frame) => return frame,
            Polled::NoPeer => std::thread::sleep(Duration::from_millis(5)),
            Polled::Idle | Polled::PeerClosed => {}
        }
    }
    panic!("no frame within {TIMEOUT:?}");
}

#[test]
#[serial]
fn receiver_bind_classification() {
    let mut first = Some(connect_receiver("tcp://127.0.0.1:0", KEEPALIVE).unwrap());
    let url = first.as_ref().unwrap().url();
    assert!(url.starts_with("tcp://127.0.0.1:"));
    assert!(!url.ends_with(":0"));

    let err = connect_receiver(BAD_RCV_URL, Duration::ZERO).unwrap_err();
    assert!(matches!(err, TransportError::InvalidUrl { .. }));
    assert_eq!(err.os_error(), libc::EINVAL);

    let err = connect_receiver(&url, KEEPALIVE).unwrap_err();
    assert!(matches!(err, TransportError::AddressInUse { .. }));
    assert_eq!(err.os_error(), libc::EADDRINUSE);

    // still a malformed address, whatever is bound
    let err = connect_receiver(BAD_RCV_URL, KEEPALIVE).unwrap_err();
    assert_eq!(err.os_error(), libc::EINVAL);

    shutdown_socket(&mut first);
    shutdown_socket(&mut first);
    assert!(first.is_none());
    let again = connect_receiver(&url, KEEPALIVE).unwrap();
    assert_eq!(again.url(), url);
}

#[test]
fn sender_validates_url_without_connecting() {
    let sender = connect_sender("tcp://127.0.0.1:6666", TIMEOUT, TIMEOUT).unwrap();
    assert!(!sender.is_connected());
    assert!(!sender.reconnect_every_send());

    let err = connect_sender(BAD_SEND_URL, TIMEOUT, TIMEOUT).unwrap_err();
    assert_eq!(err.os_error(), libc::EINVAL);
}

#[test]
#[serial]
fn sender_reports_unreachable_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("tcp://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut sender = connect_sender(&url, TIMEOUT, TIMEOUT).unwrap();
    let err = sender.send_frame(b"{}").unwrap_err();
    assert!(matches!(err, TransportError::Unreachable { .. }));
    assert_eq!(err.os_error(), libc::EINVAL);
    assert!(!sender.is_connected());
}

#[test]
#[serial]
fn frames_flow_from_sender_to_receiver() {
    let mut receiver = connect_receiver("tcp://127.0.0.1:0", KEEPALIVE).unwrap();
    let mut sender = connect_sender(&receiver.url(), TIMEOUT, TIMEOUT).unwrap();

    sender.send_frame(b"first").unwrap();
    assert!(sender.is_connected());
    assert_eq!(next_frame(&mut receiver), b"first");

    let big = vec![0xA5u8; 100_000];
    sender.send_frame(&big).unwrap();
    sender.send_frame(b"").unwrap();
    assert_eq!(next_frame(&mut receiver), big);
    assert_eq!(next_frame(&mut receiver), b"");
    assert!(receiver.has_peer());
}

#[test]
#[serial]
fn test_prefix_reconnects_on_every_send() {
    let mut receiver = connect_receiver("tcp://127.0.0.1:0", KEEPALIVE).unwrap();
    let url = format!("test:{}", receiver.url());
    let mut sender = connect_sender(&url, TIMEOUT, TIMEOUT).unwrap();
    assert!(sender.reconnect_every_send());

    for n in 0..3u8 {
        sender.send_frame(&[n]).unwrap();
        assert!(!sender.is_connected());
        assert_eq!(next_frame(&mut receiver), vec![n]);
    }
}

#[test]
#[serial]
fn receiver_notices_peer_going_away() {
    let mut receiver = connect_receiver("tcp://127.0.0.1:0", KEEPALIVE).unwrap();
    let mut sender = connect_sender(&receiver.url(), TIMEOUT, TIMEOUT).unwrap();
    sender.send_frame(b"bye").unwrap();
    assert_eq!(next_frame(&mut receiver), b"bye");

    sender.disconnect();
    let deadline = Instant::now() + TIMEOUT;
    loop {
        match receiver.poll_frame(Duration::from_millis(20)).unwrap() {
            Polled::PeerClosed => break,
            Polled::Idle => assert!(Instant::now() < deadline, "peer close not seen"),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(!receiver.has_peer());
}
