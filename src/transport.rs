//! FINS/TCP session.
//!
//! A [`Session`] owns one byte stream to a PLC, performs the node-address
//! handshake on connect and runs request/response exchanges strictly one at a
//! time. The session lock is held for the write *and* both reads of an
//! exchange: the driver never relies on service IDs to pair concurrent
//! responses, so the Nth response is read in full before the (N+1)th request
//! is written.
//!
//! The stream itself is abstracted behind [`ByteStream`] and [`Connector`];
//! [`TcpConnector`] is the production implementation over
//! [`std::net::TcpStream`].
//!
//! # States
//!
//! `Disconnected → Connecting → Connected ⇄ Exchanging`. Any error during an
//! exchange, and any failed connect, drops the stream and returns to
//! `Disconnected`. The session never reconnects on its own.
//!
//! # Example
//!
//! ```no_run
//! use fins_driver::command::build_read_frame;
//! use fins_driver::{parse_address, DataType, Session, SessionConfig};
//! use std::net::Ipv4Addr;
//!
//! let session = Session::new(SessionConfig::new(Ipv4Addr::new(192, 168, 1, 250)))?;
//! session.connect()?;
//!
//! let addr = parse_address("D100", DataType::Int16)?;
//! let frame = build_read_frame(&addr, session.header()?)?;
//! let response = session.request(&frame)?;
//! response.check_error()?;
//! println!("DM100 = {:?}", response.to_words()?);
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::envelope::{
    build_handshake, envelope_payload_len, unwrap_frame, validate_handshake, wrap_frame,
    NegotiatedNodes, ENVELOPE_HEADER_SIZE,
};
use crate::error::{FinsError, Result};
use crate::header::{FinsHeader, NodeAddress};
use crate::response::{FinsResponse, ResponseFormat};

/// Default FINS/TCP port.
pub const DEFAULT_FINS_PORT: u16 = 9600;

/// Default connect, send and receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A blocking byte stream with per-call timeouts.
///
/// Every method bounds its total blocking time by `timeout`; a partial
/// transfer does not extend it.
pub trait ByteStream: Send {
    /// Writes the whole buffer.
    ///
    /// # Errors
    ///
    /// `FinsError::SendTimeout`, `FinsError::ConnectionClosed` or `FinsError::Io`.
    fn write_all(&mut self, buf: &[u8], timeout: Duration) -> Result<()>;

    /// Reads exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// `FinsError::ReceiveTimeout`, `FinsError::ConnectionClosed` (zero-length
    /// read) or `FinsError::Io`.
    fn read_exactly(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Shuts the stream down in both directions.
    ///
    /// # Errors
    ///
    /// `FinsError::Io` if the underlying shutdown fails.
    fn shutdown(&mut self) -> Result<()>;
}

/// Opens byte streams to one endpoint.
pub trait Connector: Send + Sync {
    /// Stream type produced.
    type Stream: ByteStream;

    /// Opens a new stream.
    ///
    /// # Errors
    ///
    /// `FinsError::ConnectTimeout` or `FinsError::Io`.
    fn connect(&self, timeout: Duration) -> Result<Self::Stream>;
}

fn time_left(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// [`Connector`] for plain TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    endpoint: SocketAddr,
}

impl TcpConnector {
    /// Creates a connector for `endpoint`.
    pub fn new(endpoint: SocketAddr) -> Self {
        Self { endpoint }
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }
}

impl Connector for TcpConnector {
    type Stream = TcpByteStream;

    fn connect(&self, timeout: Duration) -> Result<TcpByteStream> {
        let stream = TcpStream::connect_timeout(&self.endpoint, timeout).map_err(|e| {
            if is_timeout(e.kind()) {
                FinsError::ConnectTimeout
            } else {
                FinsError::Io(e)
            }
        })?;
        stream.set_nodelay(true)?;
        Ok(TcpByteStream { stream })
    }
}

/// [`ByteStream`] over a [`TcpStream`].
#[derive(Debug)]
pub struct TcpByteStream {
    stream: TcpStream,
}

impl ByteStream for TcpByteStream {
    fn write_all(&mut self, buf: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        while written < buf.len() {
            let left = time_left(deadline).ok_or(FinsError::SendTimeout)?;
            self.stream.set_write_timeout(Some(left))?;
            match self.stream.write(&buf[written..]) {
                Ok(0) => return Err(FinsError::ConnectionClosed),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(e.kind()) => return Err(FinsError::SendTimeout),
                Err(e) => return Err(FinsError::Io(e)),
            }
        }
        Ok(())
    }

    fn read_exactly(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let left = time_left(deadline).ok_or(FinsError::ReceiveTimeout)?;
            self.stream.set_read_timeout(Some(left))?;
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(FinsError::ConnectionClosed),
                Ok(read) => filled += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(e.kind()) => return Err(FinsError::ReceiveTimeout),
                Err(e) => return Err(FinsError::Io(e)),
            }
        }
        Ok(buf)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

/// Reads one envelope: the fixed 16-byte header, then the body it announces.
///
/// Each of the two reads is bounded by `timeout`. Returns header and body
/// concatenated.
///
/// # Errors
///
/// Transport errors from the stream, or `FinsError::Format` for a header with
/// a bad magic or an oversized length.
pub fn receive_framed<S: ByteStream + ?Sized>(stream: &mut S, timeout: Duration) -> Result<Vec<u8>> {
    let mut frame = stream.read_exactly(ENVELOPE_HEADER_SIZE, timeout)?;
    let header: &[u8; ENVELOPE_HEADER_SIZE] = frame
        .as_slice()
        .try_into()
        .map_err(|_| FinsError::format("short envelope header"))?;
    let remaining = envelope_payload_len(header)?;
    if remaining > 0 {
        let body = stream.read_exactly(remaining, timeout)?;
        frame.extend_from_slice(&body);
    }
    Ok(frame)
}

/// Configuration for a [`Session`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// PLC endpoint.
    pub endpoint: SocketAddr,
    /// Bound on opening the stream.
    pub connect_timeout: Duration,
    /// Bound on writing one frame.
    pub send_timeout: Duration,
    /// Bound on each of the two reads of a response.
    pub receive_timeout: Duration,
    /// Node number requested in the handshake (0 = let the PLC assign one).
    pub client_node: u8,
    /// Source network address.
    pub source_network: u8,
    /// Source unit address.
    pub source_unit: u8,
    /// Destination network address.
    pub dest_network: u8,
    /// Destination unit address (0 = CPU unit).
    pub dest_unit: u8,
    /// Response layout the PLC uses.
    pub response_format: ResponseFormat,
}

impl SessionConfig {
    /// Creates a configuration for `plc_ip` on the default port.
    ///
    /// # Example
    ///
    /// ```
    /// use fins_driver::SessionConfig;
    /// use std::net::Ipv4Addr;
    /// use std::time::Duration;
    ///
    /// let config = SessionConfig::new(Ipv4Addr::new(192, 168, 1, 250))
    ///     .with_port(9601)
    ///     .with_receive_timeout(Duration::from_secs(5));
    /// assert_eq!(config.endpoint.port(), 9601);
    /// assert_eq!(config.send_timeout, Duration::from_secs(2));
    /// ```
    pub fn new(plc_ip: impl Into<IpAddr>) -> Self {
        Self::with_endpoint(SocketAddr::new(plc_ip.into(), DEFAULT_FINS_PORT))
    }

    /// Creates a configuration for a full endpoint.
    pub fn with_endpoint(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_TIMEOUT,
            send_timeout: DEFAULT_TIMEOUT,
            receive_timeout: DEFAULT_TIMEOUT,
            client_node: 0,
            source_network: 0,
            source_unit: 0,
            dest_network: 0,
            dest_unit: 0,
            response_format: ResponseFormat::default(),
        }
    }

    /// Sets a custom PLC port (default is 9600).
    pub fn with_port(mut self, port: u16) -> Self {
        self.endpoint.set_port(port);
        self
    }

    /// Sets all three timeouts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.send_timeout = timeout;
        self.receive_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the receive timeout.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Requests a specific client node number in the handshake.
    pub fn with_client_node(mut self, node: u8) -> Self {
        self.client_node = node;
        self
    }

    /// Sets the source network address.
    pub fn with_source_network(mut self, network: u8) -> Self {
        self.source_network = network;
        self
    }

    /// Sets the source unit address.
    pub fn with_source_unit(mut self, unit: u8) -> Self {
        self.source_unit = unit;
        self
    }

    /// Sets the destination network address.
    pub fn with_dest_network(mut self, network: u8) -> Self {
        self.dest_network = network;
        self
    }

    /// Sets the destination unit address.
    pub fn with_dest_unit(mut self, unit: u8) -> Self {
        self.dest_unit = unit;
        self
    }

    /// Sets the response layout.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Checks that every timeout is non-zero.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` naming the zero timeout.
    pub fn validate(&self) -> Result<()> {
        for (name, timeout) in [
            ("connect_timeout", self.connect_timeout),
            ("send_timeout", self.send_timeout),
            ("receive_timeout", self.receive_timeout),
        ] {
            if timeout.is_zero() {
                return Err(FinsError::invalid_parameter(name, "must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No stream.
    Disconnected = 0,
    /// Opening the stream or handshaking.
    Connecting = 1,
    /// Handshake done, idle.
    Connected = 2,
    /// An exchange holds the stream.
    Exchanging = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            3 => SessionState::Exchanging,
            _ => SessionState::Disconnected,
        }
    }
}

struct Link<S> {
    stream: S,
    nodes: NegotiatedNodes,
}

/// One FINS/TCP connection with strictly sequential exchanges.
///
/// `Session` is `Send + Sync`; share it by reference between threads.
pub struct Session<C: Connector = TcpConnector> {
    connector: C,
    config: SessionConfig,
    link: Mutex<Option<Link<C::Stream>>>,
    nodes: RwLock<Option<NegotiatedNodes>>,
    state: AtomicU8,
    sid_counter: AtomicU8,
}

impl Session<TcpConnector> {
    /// Creates a disconnected TCP session.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if a timeout is zero.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_connector(TcpConnector::new(config.endpoint), config)
    }
}

impl<C: Connector> Session<C> {
    /// Creates a disconnected session over a custom connector.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if a timeout is zero.
    pub fn with_connector(connector: C, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            link: Mutex::new(None),
            nodes: RwLock::new(None),
            state: AtomicU8::new(SessionState::Disconnected as u8),
            sid_counter: AtomicU8::new(0),
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns whether a handshake-complete stream is held.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Connected | SessionState::Exchanging
        )
    }

    /// Node numbers from the last successful handshake.
    pub fn negotiated_nodes(&self) -> Option<NegotiatedNodes> {
        *self.nodes.read()
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Opens the stream and performs the node-address handshake.
    ///
    /// An existing stream is closed first. On failure the stream is closed
    /// and the session is left disconnected.
    ///
    /// # Errors
    ///
    /// `FinsError::ConnectTimeout`, `FinsError::Io`, `FinsError::SendTimeout`,
    /// `FinsError::ReceiveTimeout`, `FinsError::ConnectionClosed`, or
    /// `FinsError::Checksum` for a handshake response that fails validation.
    pub fn connect(&self) -> Result<()> {
        let mut link = self.link.lock();
        self.drop_link(&mut link);

        self.set_state(SessionState::Connecting);
        info!(endpoint = %self.config.endpoint, "connecting");

        match self.open() {
            Ok(new_link) => {
                info!(
                    endpoint = %self.config.endpoint,
                    local_node = new_link.nodes.local_node,
                    remote_node = new_link.nodes.remote_node,
                    "connected"
                );
                *self.nodes.write() = Some(new_link.nodes);
                *link = Some(new_link);
                self.set_state(SessionState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.config.endpoint, error = %e, "connect failed");
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    fn open(&self) -> Result<Link<C::Stream>> {
        let mut stream = self.connector.connect(self.config.connect_timeout)?;
        match self.handshake(&mut stream) {
            Ok(nodes) => Ok(Link { stream, nodes }),
            Err(e) => {
                if let Err(close) = stream.shutdown() {
                    debug!(error = %close, "shutdown after failed handshake");
                }
                Err(e)
            }
        }
    }

    fn handshake(&self, stream: &mut C::Stream) -> Result<NegotiatedNodes> {
        let request = build_handshake(self.config.client_node);
        trace!(frame = %hex::encode_upper(request), "handshake request");
        stream.write_all(&request, self.config.send_timeout)?;

        let response = receive_framed(stream, self.config.receive_timeout).map_err(|e| match e {
            FinsError::Format { reason } => FinsError::checksum(reason),
            other => other,
        })?;
        trace!(frame = %hex::encode_upper(&response), "handshake response");

        let nodes = validate_handshake(&response)?;
        debug!(
            local_node = nodes.local_node,
            remote_node = nodes.remote_node,
            "handshake accepted"
        );
        Ok(nodes)
    }

    /// Writes `frame` and reads one complete envelope back.
    ///
    /// The session lock is held from the first byte written to the last byte
    /// read. Any error drops the stream and leaves the session disconnected.
    ///
    /// # Errors
    ///
    /// `FinsError::NotConnected`, or any transport error from the stream.
    pub fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>> {
        self.exchange_with(frame, Ok)
    }

    /// Runs one exchange and hands the reply to `accept` before the lock is
    /// released. An error from either step drops the stream.
    fn exchange_with<T, F>(&self, frame: &[u8], accept: F) -> Result<T>
    where
        F: FnOnce(Vec<u8>) -> Result<T>,
    {
        let mut guard = self.link.lock();
        let Some(link) = guard.as_mut() else {
            return Err(FinsError::NotConnected);
        };
        self.set_state(SessionState::Exchanging);

        trace!(len = frame.len(), frame = %hex::encode_upper(frame), "send");
        let result = link
            .stream
            .write_all(frame, self.config.send_timeout)
            .and_then(|()| receive_framed(&mut link.stream, self.config.receive_timeout))
            .and_then(|response| {
                trace!(len = response.len(), frame = %hex::encode_upper(&response), "recv");
                accept(response)
            });

        match result {
            Ok(value) => {
                self.set_state(SessionState::Connected);
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "exchange failed, dropping session");
                self.drop_link(&mut guard);
                Err(e)
            }
        }
    }

    /// Sends a FINS frame and returns the FINS response bytes.
    ///
    /// Wraps the frame in an envelope, unwraps the reply and checks that it
    /// answers the frame's service ID, all under the session lock. An
    /// envelope error or a SID mismatch leaves the stream out of step, so
    /// both drop the session.
    ///
    /// # Errors
    ///
    /// Everything [`Session::exchange`] returns, `FinsError::Envelope` when the
    /// PLC reports an envelope error, `FinsError::Format` for a malformed
    /// reply, and `FinsError::SidMismatch`.
    pub fn request_raw(&self, fins_frame: &[u8]) -> Result<Vec<u8>> {
        let sid = FinsHeader::from_bytes(fins_frame)?.sid;
        self.exchange_with(&wrap_frame(fins_frame), |envelope| {
            let body = unwrap_frame(&envelope)?.to_vec();
            let received = FinsHeader::from_bytes(&body)?.sid;
            if received != sid {
                return Err(FinsError::sid_mismatch(sid, received));
            }
            Ok(body)
        })
    }

    /// Sends a FINS frame and parses the response with the configured layout.
    ///
    /// The end code is not checked; call [`FinsResponse::check_error`].
    ///
    /// # Errors
    ///
    /// See [`Session::request_raw`].
    pub fn request(&self, fins_frame: &[u8]) -> Result<FinsResponse> {
        let body = self.request_raw(fins_frame)?;
        FinsResponse::from_bytes(&body, self.config.response_format)
    }

    /// Closes the stream. Shutdown errors are logged and swallowed.
    pub fn disconnect(&self) {
        let mut link = self.link.lock();
        if link.is_some() {
            info!(endpoint = %self.config.endpoint, "disconnecting");
        }
        self.drop_link(&mut link);
    }

    fn drop_link(&self, link: &mut Option<Link<C::Stream>>) {
        if let Some(mut old) = link.take() {
            if let Err(e) = old.stream.shutdown() {
                debug!(error = %e, "stream shutdown failed");
            }
        }
        *self.nodes.write() = None;
        self.set_state(SessionState::Disconnected);
    }

    /// Returns the next service ID.
    pub fn next_sid(&self) -> u8 {
        self.sid_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds a command header addressed with the negotiated nodes and a
    /// fresh service ID.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::NotConnected` before a successful handshake.
    pub fn header(&self) -> Result<FinsHeader> {
        let nodes = self.negotiated_nodes().ok_or(FinsError::NotConnected)?;
        let destination = NodeAddress::new(
            self.config.dest_network,
            nodes.remote_node,
            self.config.dest_unit,
        );
        let source = NodeAddress::new(
            self.config.source_network,
            nodes.local_node,
            self.config.source_unit,
        );
        Ok(FinsHeader::new_command(destination, source, self.next_sid()))
    }
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .field("nodes", &self.negotiated_nodes())
            .finish()
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        let link = self.link.get_mut();
        if let Some(old) = link.as_mut() {
            if let Err(e) = old.stream.shutdown() {
                debug!(error = %e, "stream shutdown on drop failed");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{Event, MockConnector, CLIENT_NODE, PLC_NODE};
    use super::*;
    use crate::address::{parse_address, AddressRef, DataType};
    use crate::command::build_read_frame;
    use crate::memory::MemoryArea;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    fn session(connector: &MockConnector) -> Session<MockConnector> {
        Session::with_connector(connector.clone(), SessionConfig::new(Ipv4Addr::LOCALHOST)).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::new(Ipv4Addr::new(192, 168, 1, 250));
        assert_eq!(config.endpoint.port(), DEFAULT_FINS_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.receive_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.client_node, 0);
        assert_eq!(config.response_format, ResponseFormat::Compact);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SessionConfig::new(Ipv4Addr::LOCALHOST).with_send_timeout(Duration::ZERO);
        assert!(matches!(
            Session::new(config),
            Err(FinsError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_connect_negotiates_nodes() {
        let connector = MockConnector::default();
        let session = session(&connector);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.connect().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(
            session.negotiated_nodes(),
            Some(NegotiatedNodes {
                local_node: CLIENT_NODE,
                remote_node: PLC_NODE
            })
        );

        let header = session.header().unwrap();
        assert_eq!(header.da1, PLC_NODE);
        assert_eq!(header.sa1, CLIENT_NODE);
    }

    #[test]
    fn test_bad_handshake_is_checksum_error() {
        let connector = MockConnector::default();
        connector.plc.lock().handshake = Some(b"FINS\x00\x00\x00\x08\x00\x00\x00\x03\x00\x00\x00\x00".to_vec());
        let session = session(&connector);

        assert!(matches!(session.connect(), Err(FinsError::Checksum { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.header(), Err(FinsError::NotConnected)));
    }

    #[test]
    fn test_exchange_requires_connection() {
        let connector = MockConnector::default();
        let session = session(&connector);
        assert!(matches!(
            session.exchange(&[0u8; 4]),
            Err(FinsError::NotConnected)
        ));
    }

    #[test]
    fn test_request_reads_words() {
        let connector = MockConnector::default();
        connector.set_word(0x82, 100, 0x1234);
        let session = session(&connector);
        session.connect().unwrap();

        let addr = parse_address("D100", DataType::Int16).unwrap();
        let frame = build_read_frame(&addr, session.header().unwrap()).unwrap();
        let response = session.request(&frame).unwrap();
        response.check_error().unwrap();
        assert_eq!(response.to_words().unwrap(), vec![0x1234]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_closed_stream_invalidates_session() {
        let connector = MockConnector::default();
        connector.plc.lock().close_at.insert(7);
        let session = session(&connector);
        session.connect().unwrap();

        let addr = parse_address("D7", DataType::Int16).unwrap();
        let frame = build_read_frame(&addr, session.header().unwrap()).unwrap();
        assert!(matches!(
            session.request(&frame),
            Err(FinsError::ConnectionClosed)
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.exchange(&frame), Err(FinsError::NotConnected)));
    }

    #[test]
    fn test_sid_mismatch_invalidates_session() {
        let connector = MockConnector::default();
        connector.plc.lock().sid_skew = 1;
        let session = session(&connector);
        session.connect().unwrap();

        let addr = parse_address("D0", DataType::Int16).unwrap();
        let frame = build_read_frame(&addr, session.header().unwrap()).unwrap();
        assert!(matches!(
            session.request(&frame),
            Err(FinsError::SidMismatch { .. })
        ));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_envelope_error_invalidates_session() {
        let connector = MockConnector::default();
        let session = session(&connector);
        session.connect().unwrap();
        connector.plc.lock().envelope_error = 0x03;

        let addr = parse_address("D0", DataType::Int16).unwrap();
        let frame = build_read_frame(&addr, session.header().unwrap()).unwrap();
        assert!(matches!(
            session.request_raw(&frame),
            Err(FinsError::Envelope { code: 0x03, .. })
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.negotiated_nodes().is_none());
        assert!(matches!(session.exchange(&frame), Err(FinsError::NotConnected)));
    }

    #[test]
    fn test_connect_timeout_is_reported_as_such() {
        let connector = MockConnector::default();
        connector.plc.lock().connect_timeout = true;
        let session = session(&connector);

        let err = session.connect().unwrap_err();
        assert!(matches!(err, FinsError::ConnectTimeout));
        assert!(err.is_transport());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(connector.plc.lock().connects, 0);
    }

    #[test]
    fn test_send_timeout_is_reported_as_such() {
        let connector = MockConnector::default();
        connector.plc.lock().send_timeout = true;
        let session = session(&connector);

        // the handshake write times out
        assert!(matches!(session.connect(), Err(FinsError::SendTimeout)));
        assert_eq!(session.state(), SessionState::Disconnected);

        // and so does a frame write on an established session
        connector.plc.lock().send_timeout = false;
        session.connect().unwrap();
        connector.plc.lock().send_timeout = true;
        let addr = parse_address("D0", DataType::Int16).unwrap();
        let frame = build_read_frame(&addr, session.header().unwrap()).unwrap();
        assert!(matches!(session.request(&frame), Err(FinsError::SendTimeout)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_disconnect_clears_state() {
        let connector = MockConnector::default();
        let session = session(&connector);
        session.connect().unwrap();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.negotiated_nodes().is_none());

        // reconnect opens a fresh stream
        session.connect().unwrap();
        assert_eq!(connector.plc.lock().connects, 2);
    }

    #[test]
    fn test_concurrent_exchanges_never_interleave() {
        let connector = MockConnector::default();
        let session = session(&connector);
        session.connect().unwrap();
        connector.plc.lock().events.clear();

        std::thread::scope(|scope| {
            for worker in 0..2u16 {
                let session = &session;
                scope.spawn(move || {
                    for i in 0..10u16 {
                        let addr =
                            AddressRef::word(MemoryArea::DM, worker * 100 + i, DataType::Int16)
                                .unwrap();
                        let frame = build_read_frame(&addr, session.header().unwrap()).unwrap();
                        session.request(&frame).unwrap().check_error().unwrap();
                    }
                });
            }
        });

        let events = connector.plc.lock().events.clone();
        assert_eq!(events.len(), 20 * 3);
        for exchange in events.chunks_exact(3) {
            assert_eq!(exchange[0], Event::Write);
            assert_eq!(exchange[1], Event::Read(ENVELOPE_HEADER_SIZE));
            assert!(matches!(exchange[2], Event::Read(_)));
        }
    }

    #[test]
    fn test_receive_framed_two_phase() {
        struct Chunks(VecDeque<Vec<u8>>);
        impl ByteStream for Chunks {
            fn write_all(&mut self, _: &[u8], _: Duration) -> Result<()> {
                Ok(())
            }
            fn read_exactly(&mut self, n: usize, _: Duration) -> Result<Vec<u8>> {
                let chunk = self.0.pop_front().ok_or(FinsError::ConnectionClosed)?;
                assert_eq!(chunk.len(), n);
                Ok(chunk)
            }
            fn shutdown(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let wrapped = wrap_frame(&[0xAA; 12]);
        let mut stream = Chunks(VecDeque::from(vec![
            wrapped[..16].to_vec(),
            wrapped[16..].to_vec(),
        ]));
        assert_eq!(receive_framed(&mut stream, DEFAULT_TIMEOUT).unwrap(), wrapped);

        let mut bad = wrapped[..16].to_vec();
        bad[0] = b'X';
        let mut stream = Chunks(VecDeque::from(vec![bad]));
        assert!(matches!(
            receive_framed(&mut stream, DEFAULT_TIMEOUT),
            Err(FinsError::Format { .. })
        ));
    }
}
