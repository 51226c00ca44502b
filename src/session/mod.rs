//! A libparodus instance: one registered service with its sockets, receive
//! queue and background threads.

use std::sync::atomic::Ordering::{AcqRel, Acquire, Release, SeqCst};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, InitDetail, Result};
use crate::wrp::{codec, dispatch, Frame, WrpMessage};
use crate::Core::transport::{
    connect_receiver, connect_sender, shutdown_socket, ReceiverSocket, SenderSocket, TransportError,
};
use crate::Queue::{BoundedQueue, QueueBuilder, RecvOutcome};

mod debug;
pub mod getters;
pub mod monitor;
mod receiver;

pub use monitor::MonitorState;

/// Lifecycle of an [`Instance`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    ReceiverClosed = 3,
    ShutDown = 4,
}

impl InstanceState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => InstanceState::Initializing,
            2 => InstanceState::Running,
            3 => InstanceState::ReceiverClosed,
            4 => InstanceState::ShutDown,
            _ => InstanceState::Uninitialized,
        }
    }
}

/// Outcome of [`Instance::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(WrpMessage),
    /// Nothing arrived within the timeout
    Timeout,
    /// The receiver was closed; no more messages will arrive
    Closed,
}

pub(crate) type WrpQueue = BoundedQueue<Vec<u8>>;

/// State shared between the caller-facing handle and the background threads.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) sender: Mutex<SenderSocket>,
    pub(crate) receiver: Mutex<Option<ReceiverSocket>>,
    pub(crate) receiver_url: Mutex<Option<String>>,
    pub(crate) keepalive_count: AtomicU64,
    pub(crate) reconnect_count: AtomicU64,
    pub(crate) auth_received: AtomicBool,
    pub(crate) monitor_state: AtomicU8,
    state: AtomicU8,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    stop: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn new(config: Config, sender: SenderSocket, receiver: Option<ReceiverSocket>) -> Self {
        let receiver_url = receiver.as_ref().map(ReceiverSocket::url);
        Self {
            config,
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            receiver_url: Mutex::new(receiver_url),
            keepalive_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
            auth_received: AtomicBool::new(false),
            monitor_state: AtomicU8::new(MonitorState::Idle as u8),
            state: AtomicU8::new(InstanceState::Initializing as u8),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn service(&self) -> &str {
        &self.config.service_name
    }

    pub(crate) fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Acquire))
    }

    fn set_state(&self, state: InstanceState) {
        self.state.store(state as u8, Release);
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record that a frame just arrived from parodus.
    pub(crate) fn touch(&self) {
        self.last_activity_ms.fetch_max(self.now_ms(), AcqRel);
    }

    pub(crate) fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Acquire)
    }

    /// Time since the last frame arrived (or since the instance started).
    pub(crate) fn silence(&self) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(self.last_activity_ms()))
    }

    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(SeqCst)
    }

    fn request_stop(&self) {
        self.stop.store(true, SeqCst);
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Sleep for `timeout` or until a stop is requested. Returns true when
    /// stopping.
    pub(crate) fn wait_stop(&self, timeout: Duration) -> bool {
        let mut guard = self.wake_lock.lock();
        if !self.stopping() {
            self.wake.wait_for(&mut guard, timeout);
        }
        self.stopping()
    }

    pub(crate) fn send_frame(&self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
        self.sender.lock().send_frame(bytes)
    }

    pub(crate) fn send_control(&self, frame: &Frame) -> std::result::Result<(), TransportError> {
        let bytes = codec::encode(frame).map_err(|e| TransportError::Io {
            url: self.config.parodus_url.clone(),
            context: "encode",
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        self.send_frame(&bytes)
    }

    /// Tell parodus who we are and where to push messages.
    pub(crate) fn register(&self) -> std::result::Result<(), TransportError> {
        let url = self.receiver_url.lock().clone().unwrap_or_default();
        debug!(service = %self.service(), %url, "registering with parodus");
        self.send_control(&Frame::ServiceRegistration {
            service_name: self.config.service_name.clone(),
            url,
        })
    }

    /// Drop and rebind the receiver, reset the sender connection and
    /// register again. Queue and counters are left alone.
    pub(crate) fn rebuild(&self) -> std::result::Result<(), TransportError> {
        {
            let mut slot = self.receiver.lock();
            shutdown_socket(&mut *slot);
            let socket = connect_receiver(&self.config.client_url, self.config.keepalive_timeout)?;
            *self.receiver_url.lock() = Some(socket.url());
            *slot = Some(socket);
        }
        self.sender.lock().disconnect();
        self.register()
    }
}

/// A connection to parodus for one service.
///
/// Dropping an instance shuts it down; [`shutdown`](Self::shutdown) does the
/// same and reports how many received messages were never collected.
pub struct Instance {
    pub(crate) shared: Arc<Shared>,
    pub(crate) queue: Option<Arc<WrpQueue>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Instance {
    /// Open the sockets, create the receive queue, register and start the
    /// background threads.
    ///
    /// On error nothing is left running: whatever was created before the
    /// failing step is torn down on the way out.
    pub fn init(config: Config) -> Result<Instance> {
        config.validate()?;
        info!(service = %config.service_name, receive = config.receive, "libparodus init");

        let mut sender = connect_sender(&config.parodus_url, config.connect_timeout, config.send_timeout)
            .map_err(|e| Error::from_init_transport(e, InitDetail::SenderUrl, InitDetail::SenderCreate))?;
        if config.test_flags.reconnect_every_send {
            sender.set_reconnect_every_send(true);
        }

        let receiver = if config.receive {
            let socket = connect_receiver(&config.client_url, config.keepalive_timeout).map_err(|e| {
                Error::from_init_transport(e, InitDetail::ReceiverUrl, InitDetail::ReceiverCreate)
            })?;
            Some(socket)
        } else {
            None
        };

        let queue = if config.receive {
            let queue = QueueBuilder::new()
                .with_name(format!("/LIBPD_QUEUE_{}", config.service_name))
                .with_capacity(config.queue_capacity)
                .build()
                .map_err(Error::InitQueue)?;
            Some(Arc::new(queue))
        } else {
            None
        };

        // From here on, Drop cleans up a failed init.
        let instance = Instance {
            shared: Arc::new(Shared::new(config, sender, receiver)),
            queue,
            threads: Mutex::new(Vec::new()),
        };

        if let Some(queue) = &instance.queue {
            instance.shared.register().map_err(Error::InitRegister)?;
            instance.start_threads(queue)?;
        }

        instance.shared.set_state(InstanceState::Running);
        info!(
            service = %instance.shared.service(),
            url = ?instance.receiver_url(),
            "libparodus running"
        );
        Ok(instance)
    }

    fn start_threads(&self, queue: &Arc<WrpQueue>) -> Result<()> {
        let service = self.shared.service().to_string();

        let shared = Arc::clone(&self.shared);
        let rcv_queue = Arc::clone(queue);
        let handle = thread::Builder::new()
            .name(format!("libpd-rcv-{service}"))
            .spawn(move || receiver::run(shared, rcv_queue))
            .map_err(|source| Error::InitThread {
                detail: InitDetail::ReceiveThread,
                source,
            })?;
        self.threads.lock().push(handle);

        if self.shared.config.keepalive_enabled() {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("libpd-ka-{service}"))
                .spawn(move || monitor::run(shared))
                .map_err(|source| Error::InitThread {
                    detail: InitDetail::MonitorThread,
                    source,
                })?;
            self.threads.lock().push(handle);
        }
        Ok(())
    }

    /// Send a request or event to parodus.
    pub fn send(&self, msg: &WrpMessage) -> Result<()> {
        let bytes = dispatch::encode_outbound(msg)?;
        self.shared.send_frame(&bytes).map_err(Error::SendSocket)
    }

    /// Send an already encoded message. Bytes that do not decode to a
    /// request or event are rejected before anything is written.
    pub fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let msg = dispatch::decode_outbound(bytes)?;
        self.send(&msg)
    }

    /// Wait up to `timeout` for the next message from parodus.
    pub fn receive(&self, timeout: Duration) -> Result<Received> {
        match self.receive_raw(timeout)? {
            RecvOutcome::Message(bytes) => dispatch::decode_delivered(&bytes).map(Received::Message),
            RecvOutcome::Timeout => Ok(Received::Timeout),
            RecvOutcome::Closed => Ok(Received::Closed),
        }
    }

    /// Like [`receive`](Self::receive), but hands back the request or event
    /// exactly as parodus encoded it.
    pub fn receive_raw(&self, timeout: Duration) -> Result<RecvOutcome<Vec<u8>>> {
        let queue = self.queue.as_ref().ok_or(Error::ReceiveDisabled)?;
        match queue.receive(timeout) {
            RecvOutcome::Timeout if self.monitor_state() == MonitorState::Failed => {
                Err(Error::ReceiveReconnectFailed)
            }
            outcome => Ok(outcome),
        }
    }

    /// Stop receiving. Every blocked and future [`receive`](Self::receive)
    /// returns [`Received::Closed`]; sending keeps working. Calling it again
    /// does nothing.
    pub fn close_receiver(&self) -> Result<()> {
        let queue = self.queue.as_ref().ok_or(Error::CloseReceiverDisabled)?;
        self.stop_receiver(queue);
        Ok(())
    }

    fn stop_receiver(&self, queue: &WrpQueue) {
        queue.close();
        self.shared.request_stop();

        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(service = %self.shared.service(), "background thread panicked");
            }
        }
        shutdown_socket(&mut *self.shared.receiver.lock());

        if self.shared.state() == InstanceState::Running {
            self.shared.set_state(InstanceState::ReceiverClosed);
            info!(service = %self.shared.service(), "receiver closed");
        }
    }

    /// Tear everything down and return the number of received messages that
    /// were discarded without being collected.
    pub fn shutdown(mut self) -> usize {
        self.teardown()
    }

    fn teardown(&mut self) -> usize {
        if self.shared.state() == InstanceState::ShutDown {
            return 0;
        }
        if let Some(queue) = &self.queue {
            self.stop_receiver(queue);
        }
        self.shared.sender.lock().disconnect();

        let discarded = match self.queue.take() {
            Some(queue) => match Arc::try_unwrap(queue) {
                Ok(queue) => queue.destroy(drop),
                Err(queue) => queue.flush(drop),
            },
            None => 0,
        };

        self.shared.set_state(InstanceState::ShutDown);
        info!(service = %self.shared.service(), discarded, "libparodus shut down");
        discarded
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.teardown();
    }
}
