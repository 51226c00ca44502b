#![allow(dead_code)]

use libparodus::wrp::{codec, Frame, WrpMessage, AUTH_OK};
use libparodus::Core::transport::{write_frame, FrameReader};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// In-process stand-in for parodus.
///
/// Accepts client connections, answers registrations with an auth frame on
/// a push connection to the registered URL, echoes keepalive probes unless
/// silenced, and records every request and event it is sent.
pub struct MockBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct BrokerState {
    received: Mutex<Vec<WrpMessage>>,
    registrations: Mutex<Vec<(String, String)>>,
    clients: Mutex<HashMap<String, TcpStream>>,
    probes: AtomicU64,
    silent: AtomicBool,
    muted: AtomicBool,
}

impl MockBroker {
    pub fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState::default());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = state.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut readers = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let state = state.clone();
                            let stop = stop.clone();
                            readers.push(thread::spawn(move || serve(stream, state, stop)));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
                for reader in readers {
                    let _ = reader.join();
                }
            })
        };

        Self {
            addr,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Push a frame to a registered service.
    pub fn push(&self, service: &str, frame: &Frame) {
        self.push_bytes(service, &codec::encode(frame).unwrap());
    }

    /// Push an already encoded frame, byte for byte.
    pub fn push_bytes(&self, service: &str, bytes: &[u8]) {
        let mut clients = self.state.clients.lock().unwrap();
        let stream = clients
            .get_mut(service)
            .unwrap_or_else(|| panic!("service {service} not registered"));
        write_frame(stream, bytes).unwrap();
    }

    /// Stop answering keepalive probes. A new registration turns answering
    /// back on.
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Swallow everything: no keepalive echoes and no auth for new
    /// registrations, until unmuted.
    pub fn set_muted(&self, muted: bool) {
        self.state.muted.store(muted, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<WrpMessage> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<(String, String)> {
        self.state.registrations.lock().unwrap().clone()
    }

    /// Whether a push connection to `service` is open.
    pub fn has_client(&self, service: &str) -> bool {
        self.state.clients.lock().unwrap().contains_key(service)
    }

    pub fn probes(&self) -> u64 {
        self.state.probes.load(Ordering::SeqCst)
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(mut stream: TcpStream, state: Arc<BrokerState>, stop: Arc<AtomicBool>) {
    stream
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    let mut reader = FrameReader::new();

    while !stop.load(Ordering::SeqCst) {
        let frame = match reader.read_frame(&mut stream) {
            Ok(Some(bytes)) => codec::decode(&bytes).unwrap(),
            Ok(None) => return,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(_) => return,
        };

        match frame {
            Frame::ServiceRegistration { service_name, url } => {
                state
                    .registrations
                    .lock()
                    .unwrap()
                    .push((service_name.clone(), url.clone()));
                if state.muted.load(Ordering::SeqCst) {
                    continue;
                }
                state.silent.store(false, Ordering::SeqCst);
                let addr = url.trim_start_matches("tcp://").to_string();
                if let Ok(mut push) = TcpStream::connect(addr) {
                    let auth = codec::encode(&Frame::Auth { status: AUTH_OK }).unwrap();
                    let mut clients = state.clients.lock().unwrap();
                    if write_frame(&mut push, &auth).is_ok() {
                        clients.insert(service_name, push);
                    }
                }
            }
            Frame::ServiceAlive => {
                state.probes.fetch_add(1, Ordering::SeqCst);
                if !state.silent.load(Ordering::SeqCst) && !state.muted.load(Ordering::SeqCst) {
                    let alive = codec::encode(&Frame::ServiceAlive).unwrap();
                    let mut clients = state.clients.lock().unwrap();
                    clients.retain(|_, push| write_frame(push, &alive).is_ok());
                }
            }
            Frame::Request(r) => state.received.lock().unwrap().push(WrpMessage::Request(r)),
            Frame::Event(e) => state.received.lock().unwrap().push(WrpMessage::Event(e)),
            Frame::Auth { .. } => {}
        }
    }
}

/// Route library logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// A loopback URL nothing is listening on.
pub fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("tcp://{addr}")
}
