// Socket plumbing between an instance and the broker.
//
// The sender connects to the broker's URL and pushes frames; the receiver
// binds the client URL and the broker connects to it to push frames back.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// URL prefix that asks for a fresh connection around every send.
pub const TEST_PREFIX: &str = "test:";

/// Largest frame either side will accept.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length of the big-endian frame length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

const READ_CHUNK: usize = 8192;

/// Connect/bind failures, classified so callers can tell a bad address from
/// a busy one.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("malformed endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("address {url} already in use")]
    AddressInUse {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("address {url} not reachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("{context} failed on {url}: {source}")]
    Io {
        url: String,
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// The errno reported alongside this failure.
    ///
    /// Malformed and unreachable addresses both report `EINVAL`; a busy
    /// address reports `EADDRINUSE`.
    pub fn os_error(&self) -> i32 {
        match self {
            TransportError::InvalidUrl { .. } | TransportError::Unreachable { .. } => libc::EINVAL,
            TransportError::AddressInUse { .. } => libc::EADDRINUSE,
            TransportError::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    pub fn is_invalid_url(&self) -> bool {
        matches!(self, TransportError::InvalidUrl { .. })
    }
}

/// A parsed, resolved `tcp://host:port` endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub addrs: Vec<SocketAddr>,
    /// Set when the URL carried the `test:` prefix.
    pub reconnect_every_send: bool,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Parse and resolve an endpoint URL.
pub fn parse_endpoint(url: &str) -> Result<Endpoint, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let (raw, reconnect_every_send) = match url.strip_prefix(TEST_PREFIX) {
        Some(rest) => (rest, true),
        None => (url, false),
    };

    let parsed = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if parsed.scheme() != "tcp" {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = parsed
        .port()
        .ok_or_else(|| invalid("missing port".to_string()))?;

    // IPv6 literals come back bracketed
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let addrs: Vec<SocketAddr> = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| invalid(format!("cannot resolve host: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(invalid("host resolved to no addresses".to_string()));
    }

    Ok(Endpoint {
        url: url.to_string(),
        host,
        port,
        addrs,
        reconnect_every_send,
    })
}

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Frame too large ({} > {})", frame.len(), MAX_FRAME_SIZE),
        ));
    }
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + frame.len());
    buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    buf.extend_from_slice(frame);
    writer.write_all(&buf)?;
    writer.flush()
}

/// Incremental frame decoder that survives read timeouts mid-frame.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any partial frame (the peer went away).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Read whatever is available into the buffer. `Ok(0)` means end of stream.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = reader.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Pop the next complete frame out of the buffer, if there is one.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_SIZE {
            self.buf.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame too large ({} > {})", len, MAX_FRAME_SIZE),
            ));
        }
        if self.buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }
        let frame = self.buf[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len].to_vec();
        self.buf.drain(..LENGTH_PREFIX_SIZE + len);
        Ok(Some(frame))
    }

    /// Block (subject to the reader's own timeout) until a whole frame is
    /// available. `Ok(None)` means the peer closed the stream.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(Some(frame));
            }
            if self.fill(reader)? == 0 {
                return Ok(None);
            }
        }
    }
}

/// Something `shutdown_socket` can close.
pub trait Closeable {
    fn close(self);
}

/// Close and clear a socket slot. Safe to call on an already-empty slot.
pub fn shutdown_socket<S: Closeable>(socket: &mut Option<S>) {
    if let Some(socket) = socket.take() {
        socket.close();
    }
}

/// What one receiver poll produced.
#[derive(Debug)]
pub enum Polled {
    Frame(Vec<u8>),
    /// A peer is connected but nothing complete arrived within the wait.
    Idle,
    /// No broker connection yet.
    NoPeer,
    /// The broker closed its connection.
    PeerClosed,
}

/// Listening side of an instance: bound to the client URL, accepting the
/// broker's push connection.
#[derive(Debug)]
pub struct ReceiverSocket {
    endpoint: Endpoint,
    listener: TcpListener,
    local_addr: SocketAddr,
    peer: Option<TcpStream>,
    reader: FrameReader,
    keepalive: Duration,
}

/// Bind the receiver URL.
///
/// A second bind of an address some live socket already holds fails with
/// [`TransportError::AddressInUse`]; a malformed URL fails with
/// [`TransportError::InvalidUrl`] no matter what was bound before.
pub fn connect_receiver(url: &str, keepalive: Duration) -> Result<ReceiverSocket, TransportError> {
    let endpoint = parse_endpoint(url)?;
    let listener = TcpListener::bind(&endpoint.addrs[..]).map_err(|e| match e.kind() {
        io::ErrorKind::AddrInUse => TransportError::AddressInUse {
            url: url.to_string(),
            source: e,
        },
        io::ErrorKind::AddrNotAvailable => TransportError::Unreachable {
            url: url.to_string(),
            source: e,
        },
        _ => TransportError::Io {
            url: url.to_string(),
            context: "bind",
            source: e,
        },
    })?;
    let io_err = |context: &'static str| {
        let url = url.to_string();
        move |source: io::Error| TransportError::Io {
            url,
            context,
            source,
        }
    };
    listener.set_nonblocking(true).map_err(io_err("set_nonblocking"))?;
    let local_addr = listener.local_addr().map_err(io_err("local_addr"))?;

    info!(url = %endpoint, %local_addr, "receiver bound");
    Ok(ReceiverSocket {
        endpoint,
        listener,
        local_addr,
        peer: None,
        reader: FrameReader::new(),
        keepalive,
    })
}

impl ReceiverSocket {
    /// The URL as configured.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The URL of the address actually bound (resolves port 0).
    pub fn url(&self) -> String {
        format!("tcp://{}", self.local_addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Accept a pending broker connection if there is one, then wait up to
    /// `wait` for a complete frame from the current peer.
    pub fn poll_frame(&mut self, wait: Duration) -> io::Result<Polled> {
        match self.listener.accept() {
            Ok((stream, peer_addr)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;
                if !self.keepalive.is_zero() {
                    if let Err(e) = set_tcp_keepalive(&stream, self.keepalive) {
                        warn!(%peer_addr, error = %e, "could not enable tcp keepalive");
                    }
                }
                if self.peer.is_some() {
                    debug!(%peer_addr, "replacing broker connection");
                } else {
                    debug!(%peer_addr, "broker connected");
                }
                self.peer = Some(stream);
                self.reader.clear();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        if let Some(frame) = self.reader.next_frame()? {
            return Ok(Polled::Frame(frame));
        }
        let Some(stream) = self.peer.as_mut() else {
            return Ok(Polled::NoPeer);
        };

        match self.reader.fill(stream) {
            Ok(0) => {
                self.drop_peer();
                Ok(Polled::PeerClosed)
            }
            Ok(_) => match self.reader.next_frame() {
                Ok(Some(frame)) => Ok(Polled::Frame(frame)),
                Ok(None) => Ok(Polled::Idle),
                Err(e) => {
                    self.drop_peer();
                    Err(e)
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Polled::Idle)
            }
            Err(e) => {
                self.drop_peer();
                Err(e)
            }
        }
    }

    fn drop_peer(&mut self) {
        if let Some(stream) = self.peer.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.reader.clear();
    }
}

impl Closeable for ReceiverSocket {
    fn close(mut self) {
        self.drop_peer();
        debug!(url = %self.endpoint, "receiver closed");
    }
}

/// Connecting side of an instance: pushes frames to the broker.
///
/// The TCP connection is made on first use and re-made after a failed write,
/// so a sender can be created before the broker is listening.
#[derive(Debug)]
pub struct SenderSocket {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    send_timeout: Duration,
    reconnect_every_send: bool,
}

/// Validate and resolve the broker URL.
pub fn connect_sender(
    url: &str,
    connect_timeout: Duration,
    send_timeout: Duration,
) -> Result<SenderSocket, TransportError> {
    let endpoint = parse_endpoint(url)?;
    let reconnect_every_send = endpoint.reconnect_every_send;
    debug!(url = %endpoint, "sender ready");
    Ok(SenderSocket {
        endpoint,
        stream: None,
        connect_timeout,
        send_timeout,
        reconnect_every_send,
    })
}

impl SenderSocket {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn set_reconnect_every_send(&mut self, on: bool) {
        self.reconnect_every_send = on;
    }

    pub fn reconnect_every_send(&self) -> bool {
        self.reconnect_every_send
    }

    /// Write one frame to the broker. A failed write drops the connection so
    /// the next send starts fresh; there is no retry here.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.reconnect_every_send {
            self.disconnect();
        }
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.open()?,
        };
        match write_frame(&mut stream, frame) {
            Ok(()) => {
                if self.reconnect_every_send {
                    let _ = stream.shutdown(Shutdown::Both);
                } else {
                    self.stream = Some(stream);
                }
                Ok(())
            }
            Err(source) => {
                let _ = stream.shutdown(Shutdown::Both);
                Err(TransportError::Io {
                    url: self.endpoint.url.clone(),
                    context: "write",
                    source,
                })
            }
        }
    }

    /// Drop the current connection, if any.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn open(&self) -> Result<TcpStream, TransportError> {
        let mut last_err = None;
        for addr in &self.endpoint.addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => {
                    let configure = |s: &TcpStream| -> io::Result<()> {
                        s.set_write_timeout(Some(self.send_timeout))?;
                        s.set_nodelay(true)
                    };
                    configure(&stream).map_err(|source| TransportError::Io {
                        url: self.endpoint.url.clone(),
                        context: "configure",
                        source,
                    })?;
                    debug!(url = %self.endpoint, %addr, "sender connected");
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        let source = last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to connect to"));
        Err(TransportError::Unreachable {
            url: self.endpoint.url.clone(),
            source,
        })
    }
}

impl Closeable for SenderSocket {
    fn close(mut self) {
        self.disconnect();
        debug!(url = %self.endpoint, "sender closed");
    }
}

#[cfg(target_os = "linux")]
fn set_tcp_keepalive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let on: libc::c_int = 1;
    let idle_secs = idle.as_secs().clamp(1, i32::MAX as u64) as libc::c_int;
    let len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    unsafe {
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const libc::c_int as *const libc::c_void,
            len,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }
        if libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_KEEPIDLE,
            &idle_secs as *const libc::c_int as *const libc::c_void,
            len,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_tcp_keepalive(_stream: &TcpStream, _idle: Duration) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_url() {
        let ep = parse_endpoint("tcp://127.0.0.1:6666").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 6666);
        assert!(!ep.reconnect_every_send);
        assert_eq!(ep.addrs[0], "127.0.0.1:6666".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_prefix_requests_reconnect_every_send() {
        let ep = parse_endpoint("test:tcp://127.0.0.1:6666").unwrap();
        assert!(ep.reconnect_every_send);
        assert_eq!(ep.port, 6666);
    }

    #[test]
    fn rejects_bad_port() {
        let err = parse_endpoint("tcp://127.0.0.1:X006").unwrap_err();
        assert!(err.is_invalid_url());
        assert_eq!(err.os_error(), libc::EINVAL);
    }

    #[test]
    fn rejects_missing_port_and_scheme() {
        assert!(parse_endpoint("tcp://127.0.0.1").unwrap_err().is_invalid_url());
        assert!(parse_endpoint("ipc:///tmp/parodus.ipc").unwrap_err().is_invalid_url());
        assert!(parse_endpoint("127.0.0.1:6666").unwrap_err().is_invalid_url());
    }

    #[test]
    fn frame_reader_handles_split_input() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"hello").unwrap();
        write_frame(&mut wire, b"world!").unwrap();

        let mut reader = FrameReader::new();
        let (first, second) = wire.split_at(6);
        reader.fill(&mut &first[..]).unwrap();
        assert_eq!(reader.next_frame().unwrap(), None);
        reader.fill(&mut &second[..]).unwrap();
        assert_eq!(reader.next_frame().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reader.next_frame().unwrap(), Some(b"world!".to_vec()));
        assert_eq!(reader.next_frame().unwrap(), None);
    }

    #[test]
    fn frame_reader_rejects_oversized_prefix() {
        let mut reader = FrameReader::new();
        let prefix = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        reader.fill(&mut &prefix[..]).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn shutdown_socket_is_idempotent() {
        let mut slot = Some(connect_receiver("tcp://127.0.0.1:0", Duration::ZERO).unwrap());
        shutdown_socket(&mut slot);
        assert!(slot.is_none());
        shutdown_socket(&mut slot);
        assert!(slot.is_none());
    }
}
