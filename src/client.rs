//! Batch client on top of a [`Session`].
//!
//! This module provides the [`Client`] struct, which composes the rest of the
//! crate into the operations a poller needs:
//!
//! - parse a list of address strings (bad entries are reported, not fatal)
//! - group them into read blocks with the optimizer
//! - run one exchange per block
//! - split every block response back into per-address values
//!
//! A failed block only fails its own members. Each block's raw request and
//! response bytes are kept in a [`BlockReport`] for diagnostics.
//!
//! # Example
//!
//! ```no_run
//! use fins_driver::{Client, DataType, SessionConfig};
//! use std::net::Ipv4Addr;
//!
//! let client = Client::new(SessionConfig::new(Ipv4Addr::new(192, 168, 1, 250)))?;
//! client.connect()?;
//!
//! let batch = client.read_batch([
//!     ("D100", DataType::Int16),
//!     ("D102", DataType::Float32),
//!     ("CIO0.05", DataType::Bool),
//! ]);
//! for (address, value) in &batch.values {
//!     match value {
//!         Ok(v) => println!("{address} = {v:?}"),
//!         Err(e) => println!("{address} failed: {e}"),
//!     }
//! }
//! # Ok::<(), fins_driver::FinsError>(())
//! ```
//!
//! # Reconnection
//!
//! With `reconnect_on_failure` set (the default), a request that fails with a
//! transport error reconnects the session once and is sent again. The
//! [`Session`] itself never retries.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::address::{parse_address, parse_batch, AddressRef, DataType, MemorySpan};
use crate::command::{
    build_batch_read_frame, build_read_frame, build_write_frame, parse_batch_read_payload,
    response_len,
};
use crate::error::{FinsError, Result};
use crate::header::FinsHeader;
use crate::memory::MemoryArea;
use crate::optimizer::{optimize, optimize_writes, AddressBlock, OptimizerConfig};
use crate::response::FinsResponse;
use crate::transport::{Connector, Session, SessionConfig, TcpConnector};
use crate::value::{decode, decode_bit, encode, encode_bit, Value};

/// Outcome of one address in a batch.
pub type ItemResult<T> = std::result::Result<T, Arc<FinsError>>;

/// Diagnostics for one block exchange.
#[derive(Debug, Clone)]
pub struct BlockReport {
    /// Memory area of the block.
    pub area: MemoryArea,
    /// First word covered.
    pub start_word: u16,
    /// Words covered.
    pub length_words: u16,
    /// Original strings of the member addresses.
    pub members: Vec<String>,
    /// Last FINS request frame sent (empty if none was built).
    pub request: Vec<u8>,
    /// FINS response frame (empty if none arrived).
    pub response: Vec<u8>,
    /// Error shared by every member, if the block failed.
    pub error: Option<Arc<FinsError>>,
}

impl BlockReport {
    fn new(block: &AddressBlock) -> Self {
        Self {
            area: block.area(),
            start_word: block.start_word_offset(),
            length_words: block.total_length_words(),
            members: block.members().iter().map(|m| m.original().to_string()).collect(),
            request: Vec::new(),
            response: Vec::new(),
            error: None,
        }
    }
}

/// Result of [`Client::read_batch`].
#[derive(Debug, Default)]
pub struct BatchRead {
    /// Value or error per original address string.
    pub values: BTreeMap<String, ItemResult<Value>>,
    /// One report per block, in exchange order.
    pub blocks: Vec<BlockReport>,
}

impl BatchRead {
    /// Returns the decoded value of `address`, if it was read successfully.
    pub fn value(&self, address: &str) -> Option<&Value> {
        self.values.get(address).and_then(|r| r.as_ref().ok())
    }

    /// Returns the error of `address`, if it failed.
    pub fn error(&self, address: &str) -> Option<&FinsError> {
        self.values
            .get(address)
            .and_then(|r| r.as_ref().err())
            .map(|e| e.as_ref())
    }

    /// Number of addresses that failed.
    pub fn failure_count(&self) -> usize {
        self.values.values().filter(|r| r.is_err()).count()
    }
}

/// Result of [`Client::write_batch`].
#[derive(Debug, Default)]
pub struct BatchWrite {
    /// Outcome per original address string.
    pub results: BTreeMap<String, ItemResult<()>>,
    /// One report per block, in exchange order.
    pub blocks: Vec<BlockReport>,
}

impl BatchWrite {
    /// Returns whether every address was written.
    pub fn is_complete(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }
}

struct Transaction {
    raw: Vec<u8>,
    response: FinsResponse,
}

/// Batch-oriented FINS client.
///
/// `Client` is `Send + Sync`; concurrent calls are serialized by the session.
pub struct Client<C: Connector = TcpConnector> {
    session: Session<C>,
    optimizer: OptimizerConfig,
    reconnect_on_failure: bool,
}

impl Client<TcpConnector> {
    /// Creates a disconnected TCP client.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if the configuration is invalid.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self::with_session(Session::new(config)?))
    }
}

impl<C: Connector> Client<C> {
    /// Wraps an existing session.
    pub fn with_session(session: Session<C>) -> Self {
        Self {
            session,
            optimizer: OptimizerConfig::default(),
            reconnect_on_failure: true,
        }
    }

    /// Sets the block optimizer tuning.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if the tuning is out of range.
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Result<Self> {
        optimizer.validate()?;
        self.optimizer = optimizer;
        Ok(self)
    }

    /// Enables or disables the single reconnect-and-retry on transport errors.
    pub fn with_reconnect_on_failure(mut self, enabled: bool) -> Self {
        self.reconnect_on_failure = enabled;
        self
    }

    /// Underlying session.
    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    /// Block optimizer tuning.
    pub fn optimizer(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    /// Connects the session.
    ///
    /// # Errors
    ///
    /// See [`Session::connect`].
    pub fn connect(&self) -> Result<()> {
        self.session.connect()
    }

    /// Disconnects the session.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Returns whether the session is connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn try_transact<F>(&self, build: &F, request: &mut Vec<u8>) -> Result<Transaction>
    where
        F: Fn(FinsHeader) -> Result<Vec<u8>>,
    {
        *request = build(self.session.header()?)?;
        let raw = self.session.request_raw(request)?;
        let response = FinsResponse::from_bytes(&raw, self.session.config().response_format)?;
        Ok(Transaction { raw, response })
    }

    /// Builds a frame with a fresh header and exchanges it, reconnecting once
    /// on a transport error when enabled.
    fn transact<F>(&self, build: F, request: &mut Vec<u8>) -> Result<Transaction>
    where
        F: Fn(FinsHeader) -> Result<Vec<u8>>,
    {
        match self.try_transact(&build, request) {
            Err(e) if e.is_transport() && self.reconnect_on_failure => {
                warn!(error = %e, "transport failure, reconnecting once");
                self.session.connect()?;
                self.try_transact(&build, request)
            }
            other => other,
        }
    }

    /// Reads the raw data bytes of one span.
    ///
    /// # Errors
    ///
    /// Frame building, transport and `FinsError::Protocol` errors, or
    /// `FinsError::Format` if the PLC returns the wrong amount of data.
    pub fn read_span<S: MemorySpan + ?Sized>(&self, span: &S) -> Result<Vec<u8>> {
        let mut request = Vec::new();
        let t = self.transact(|header| build_read_frame(span, header), &mut request)?;
        t.response.check_error()?;

        let expected = response_len(span);
        if t.response.data.len() != expected {
            return Err(FinsError::format(format!(
                "expected {expected} data bytes, got {}",
                t.response.data.len()
            )));
        }
        Ok(t.response.data)
    }

    /// Writes raw data bytes to one span.
    ///
    /// # Errors
    ///
    /// Frame building, transport and `FinsError::Protocol` errors.
    pub fn write_span<S: MemorySpan + ?Sized>(&self, span: &S, payload: &[u8]) -> Result<()> {
        let mut request = Vec::new();
        let t = self.transact(|header| build_write_frame(span, payload, header), &mut request)?;
        t.response.check_error()
    }

    /// Reads and decodes one address.
    ///
    /// # Errors
    ///
    /// `FinsError::Format` for a bad address, otherwise as [`Client::read_span`].
    pub fn read(&self, address: &str, data_type: DataType) -> Result<Value> {
        let addr = parse_address(address, data_type)?;
        let data = self.read_span(&addr)?;
        decode_read(&addr, &data)
    }

    /// Encodes and writes one value.
    ///
    /// The value's variant selects the data type used to parse `address`.
    ///
    /// # Errors
    ///
    /// `FinsError::Format` for a bad address, `FinsError::InvalidParameter`
    /// for a non-bool value on a bit address, otherwise as
    /// [`Client::write_span`].
    pub fn write(&self, address: &str, value: &Value) -> Result<()> {
        let addr = parse_address(address, value.data_type())?;
        self.write_span(&addr, &member_payload(&addr, value)?)
    }

    /// Reads scattered addresses with a single multiple-read exchange.
    ///
    /// Values come back in the order of `refs`.
    ///
    /// # Errors
    ///
    /// Any frame, transport or protocol error fails the whole call.
    pub fn read_multiple(&self, refs: &[AddressRef]) -> Result<Vec<Value>> {
        let mut request = Vec::new();
        let t = self.transact(|header| build_batch_read_frame(refs, header), &mut request)?;
        t.response.check_error()?;

        parse_batch_read_payload(refs, &t.response.data)?
            .iter()
            .zip(refs)
            .map(|(bytes, addr)| decode_read(addr, bytes))
            .collect()
    }

    /// Reads a batch of addresses through the block optimizer.
    ///
    /// Every input string appears in [`BatchRead::values`]: unparsable ones
    /// with their format error, members of a failed block with that block's
    /// error, the rest with their decoded value. This call itself never fails.
    pub fn read_batch<I, S>(&self, items: I) -> BatchRead
    where
        I: IntoIterator<Item = (S, DataType)>,
        S: AsRef<str>,
    {
        let parsed = parse_batch(items);
        let mut batch = BatchRead::default();
        for (address, e) in parsed.failures {
            batch.values.insert(address, Err(Arc::new(e)));
        }

        let blocks = optimize(&parsed.refs, &self.optimizer);
        debug!(
            addresses = parsed.refs.len(),
            blocks = blocks.len(),
            "batch read plan"
        );

        for block in &blocks {
            let mut report = BlockReport::new(block);
            match self.read_block(block, &mut report) {
                Ok(data) => {
                    for member in block.members() {
                        let value = decode_member(block, member, &data).map_err(Arc::new);
                        batch.values.insert(member.original().to_string(), value);
                    }
                }
                Err(e) => {
                    warn!(
                        area = %block.area(),
                        start = block.start_word_offset(),
                        length = block.total_length_words(),
                        error = %e,
                        "block read failed"
                    );
                    let e = Arc::new(e);
                    for member in block.members() {
                        batch
                            .values
                            .insert(member.original().to_string(), Err(Arc::clone(&e)));
                    }
                    report.error = Some(e);
                }
            }
            batch.blocks.push(report);
        }

        batch
    }

    fn read_block(&self, block: &AddressBlock, report: &mut BlockReport) -> Result<Vec<u8>> {
        let t = self.transact(|header| build_read_frame(block, header), &mut report.request)?;
        report.response = t.raw;
        t.response.check_error()?;

        let expected = response_len(block);
        if t.response.data.len() < expected {
            return Err(FinsError::format(format!(
                "block response holds {} bytes, expected {expected}",
                t.response.data.len()
            )));
        }
        Ok(t.response.data)
    }

    /// Writes a batch of values, merging only exactly adjacent word addresses.
    ///
    /// Each address is parsed with the data type of its value. Bit addresses
    /// are written one by one. If the same address appears twice, the later
    /// value is written. This call itself never fails.
    pub fn write_batch<I, S>(&self, items: I) -> BatchWrite
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let mut batch = BatchWrite::default();
        let mut values: BTreeMap<String, Value> = BTreeMap::new();
        let mut refs = Vec::new();

        for (address, value) in items {
            let address = address.as_ref();
            match parse_address(address, value.data_type()) {
                Ok(addr) => {
                    values.insert(address.to_string(), value);
                    refs.push(addr);
                }
                Err(e) => {
                    warn!(address, error = %e, "dropping unparsable address from batch");
                    batch.results.insert(address.to_string(), Err(Arc::new(e)));
                }
            }
        }

        let blocks = optimize_writes(&refs, self.optimizer.max_block_words);
        debug!(addresses = refs.len(), blocks = blocks.len(), "batch write plan");

        for block in &blocks {
            let mut report = BlockReport::new(block);
            let outcome = self.write_block(block, &values, &mut report);
            if let Err(e) = &outcome {
                warn!(
                    area = %block.area(),
                    start = block.start_word_offset(),
                    error = %e,
                    "block write failed"
                );
            }
            let outcome = outcome.map_err(Arc::new);
            report.error = outcome.as_ref().err().cloned();
            for member in block.members() {
                batch
                    .results
                    .insert(member.original().to_string(), outcome.clone());
            }
            batch.blocks.push(report);
        }

        batch
    }

    fn write_block(
        &self,
        block: &AddressBlock,
        values: &BTreeMap<String, Value>,
        report: &mut BlockReport,
    ) -> Result<()> {
        let mut payload = Vec::new();
        for member in block.members() {
            let value = values.get(member.original()).ok_or_else(|| {
                FinsError::invalid_parameter("value", format!("no value for {member}"))
            })?;
            payload.extend(member_payload(member, value)?);
        }

        // bit blocks from optimize_writes hold exactly one member
        let target: &dyn MemorySpan = match block.members() {
            [single] if single.is_bit() => single,
            _ => block,
        };
        let t = self.transact(
            |header| build_write_frame(target, &payload, header),
            &mut report.request,
        )?;
        report.response = t.raw;
        t.response.check_error()
    }
}

/// Bytes written for one member: a single byte for bit and flag access, the
/// word encoding otherwise.
fn member_payload(member: &AddressRef, value: &Value) -> Result<Vec<u8>> {
    if member.is_bit() || member.area().element_size() == 1 {
        Ok(vec![encode_bit(value)?])
    } else {
        Ok(encode(value))
    }
}

/// Decodes the data of a direct read of `addr`.
///
/// Bit access returns one byte whatever the requested type, so bit
/// addresses always decode to `Value::Bool`.
fn decode_read(addr: &AddressRef, bytes: &[u8]) -> Result<Value> {
    if addr.is_bit() {
        return decode(DataType::Bool, bytes);
    }
    decode(addr.data_type(), bytes)
}

/// Picks a member's bytes out of its block's data and decodes them.
fn decode_member(block: &AddressBlock, member: &AddressRef, data: &[u8]) -> Result<Value> {
    let size = block.area().element_size();
    let start = block.relative_offset(member) * size;
    let len = usize::from(member.length_words()) * size;
    let bytes = data
        .get(start..start + len)
        .ok_or_else(|| FinsError::format(format!("block data too short for {member}")))?;

    match member.bit_offset() {
        Some(bit) => decode_bit(bytes, bit),
        None => decode(member.data_type(), bytes),
    }
}

impl<C: Connector> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("optimizer", &self.optimizer)
            .field("reconnect_on_failure", &self.reconnect_on_failure)
            .finish()
    }
}
