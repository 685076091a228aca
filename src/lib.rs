//! # FINS/TCP Driver Core
//!
//! Building blocks for polling Omron PLCs over FINS/TCP: an address grammar,
//! a frame codec, a read-block optimizer and a half-duplex session, plus a
//! batch [`Client`] that composes them.
//!
//! ## Features
//!
//! - **Address grammar** turning strings like `D100`, `CIO0.05` or `T3` into
//!   validated [`AddressRef`]s
//! - **Block optimizer** merging nearby addresses into few read commands
//! - **One request in flight** per session, with SID matching and a handshake
//! - **Partial failure** reporting in batches: one bad block fails only its members
//! - **No panics** — all errors returned as `Result<T, FinsError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use fins_driver::{Client, DataType, SessionConfig, Value};
//! use std::net::Ipv4Addr;
//!
//! fn main() -> fins_driver::Result<()> {
//!     let client = Client::new(SessionConfig::new(Ipv4Addr::new(192, 168, 1, 250)))?;
//!     client.connect()?;
//!
//!     // one value
//!     let setpoint = client.read("D100", DataType::Float32)?;
//!     println!("D100 = {setpoint:?}");
//!
//!     // many values, grouped into as few commands as the optimizer allows
//!     let batch = client.read_batch([
//!         ("D0", DataType::Int16),
//!         ("D1", DataType::Int16),
//!         ("D4", DataType::UInt32),
//!         ("W3.00", DataType::Bool),
//!     ]);
//!     println!("{} blocks, {} failures", batch.blocks.len(), batch.failure_count());
//!
//!     client.write("D200", &Value::Int16(-5))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Address Grammar
//!
//! | Input | Area | Notes |
//! |-------|------|-------|
//! | `D100`, `DM100` | [`MemoryArea::DM`] | |
//! | `CIO0.05`, `0.05` | [`MemoryArea::CIO`] | bare digits mean CIO |
//! | `W3`, `H10.15`, `A448` | WR, HR, AR | |
//! | `E200` | [`MemoryArea::EM`] | current bank |
//! | `T3` / `C7` with `Bool` | completion flag | one byte per element |
//! | `T3` / `C7` otherwise | present value | |
//!
//! ## Planning Reads
//!
//! ```
//! use fins_driver::{optimize, parse_batch, DataType, OptimizerConfig};
//!
//! let parsed = parse_batch([
//!     ("D0", DataType::Int16),
//!     ("D1", DataType::Int16),
//!     ("D2", DataType::Int16),
//!     ("D4", DataType::Int16),
//!     ("D500", DataType::Int16),
//! ]);
//! let blocks = optimize(&parsed.refs, &OptimizerConfig::default());
//!
//! assert_eq!(blocks.len(), 2);
//! assert_eq!(blocks[0].start_word_offset(), 0);
//! // D3 is padding: 4 of 5 words wanted meets the 0.8 default
//! assert_eq!(blocks[0].total_length_words(), 5);
//! assert_eq!(blocks[1].start_word_offset(), 500);
//! ```
//!
//! ## Error Handling
//!
//! ```
//! use fins_driver::{ErrorCategory, FinsError};
//!
//! let err = FinsError::protocol(0x11, 0x03);
//! match &err {
//!     FinsError::Protocol { category, .. } => assert_eq!(*category, ErrorCategory::AddressRangeExceeded),
//!     _ => unreachable!(),
//! }
//! assert!(!err.is_transport());
//! assert!(FinsError::ReceiveTimeout.is_transport());
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events: `debug` for connects and block plans,
//! `warn` for dropped addresses, failed blocks and invalidated sessions.
//! Install any subscriber to see them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod address;
mod client;
pub mod command;
pub mod envelope;
mod error;
mod header;
mod memory;
mod optimizer;
mod response;
mod transport;
pub mod value;

// Public re-exports
pub use address::{
    parse_address, parse_batch, AddressRef, DataType, MemorySpan, ParsedBatch, MAX_BIT_OFFSET,
};
pub use client::{BatchRead, BatchWrite, BlockReport, Client, ItemResult};
pub use command::{MAX_BATCH_ITEMS, MAX_WORDS_PER_COMMAND};
pub use envelope::NegotiatedNodes;
pub use error::{
    envelope_error_description, error_category, fins_error_description, ErrorCategory, FinsError,
    Result,
};
pub use header::{FinsHeader, NodeAddress, FINS_HEADER_SIZE};
pub use memory::MemoryArea;
pub use optimizer::{
    optimize, optimize_writes, AddressBlock, OptimizerConfig, DEFAULT_MAX_BLOCK_WORDS,
    DEFAULT_MIN_EFFICIENCY,
};
pub use response::{
    extract_payload, parse_response_header, FinsResponse, ResponseFormat, ResponseHeader,
    MIN_RESPONSE_SIZE,
};
pub use transport::{
    receive_framed, ByteStream, Connector, Session, SessionConfig, SessionState, TcpByteStream,
    TcpConnector, DEFAULT_FINS_PORT, DEFAULT_TIMEOUT,
};
pub use value::Value;
