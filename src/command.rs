//! FINS memory command frames.
//!
//! Pure builders for the three memory commands the driver issues. Each takes
//! a ready [`FinsHeader`] (the session fills in nodes and SID) and a
//! [`MemorySpan`], so the same builder serves a single address and a whole
//! optimized block.
//!
//! | Command | MRC SRC | Body |
//! |---------|---------|------|
//! | Memory Area Read | `01 01` | area, address(3), count(2) |
//! | Memory Area Write | `01 02` | area, address(3), count(2), data |
//! | Multiple Memory Area Read | `01 04` | count(1), N × (area, address(3), length(2)) |
//!
//! The 3-byte address is word high, word low, bit (0 for word access).
//!
//! # Example
//!
//! ```
//! use fins_driver::command::build_read_frame;
//! use fins_driver::{parse_address, DataType, FinsHeader, NodeAddress};
//!
//! let header = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 0x01);
//! let addr = parse_address("D100", DataType::Int32)?;
//!
//! let frame = build_read_frame(&addr, header)?;
//! assert_eq!(&frame[10..], &[0x01, 0x01, 0x82, 0x00, 0x64, 0x00, 0x00, 0x02]);
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use crate::address::{AddressRef, MemorySpan};
use crate::error::{FinsError, Result};
use crate::header::{FinsHeader, FINS_HEADER_SIZE};

/// Memory command code (MRC).
pub(crate) const MRC_MEMORY: u8 = 0x01;
/// Memory Area Read sub-code (SRC).
pub(crate) const SRC_MEMORY_READ: u8 = 0x01;
/// Memory Area Write sub-code (SRC).
pub(crate) const SRC_MEMORY_WRITE: u8 = 0x02;
/// Multiple Memory Area Read sub-code (SRC).
pub(crate) const SRC_MULTIPLE_READ: u8 = 0x04;

/// Maximum number of elements read or written by a single command.
pub const MAX_WORDS_PER_COMMAND: u16 = 999;

/// Maximum number of items in one multiple-read command (the count is one byte).
pub const MAX_BATCH_ITEMS: usize = 255;

/// Area code and 3-byte address for a span.
///
/// Spans with an access bit go through the bit area code; everything else
/// (including bit-only blocks, which fetch their whole word) through the word
/// area code.
fn locate<S: MemorySpan + ?Sized>(span: &S) -> Result<(u8, [u8; 3])> {
    let area = span.area();
    let [hi, lo] = area.wire_offset(span.start_word())?.to_be_bytes();
    match span.access_bit() {
        Some(bit) => Ok((area.bit_code()?, [hi, lo, bit])),
        None => Ok((area.word_code(), [hi, lo, 0x00])),
    }
}

/// Element count carried in the count field for a span.
fn element_count<S: MemorySpan + ?Sized>(span: &S) -> Result<u16> {
    if span.access_bit().is_some() {
        return Ok(1);
    }
    let count = span.length_words();
    if count == 0 || count > MAX_WORDS_PER_COMMAND {
        return Err(FinsError::invalid_parameter(
            "count",
            format!("must be 1-{MAX_WORDS_PER_COMMAND}, got {count}"),
        ));
    }
    Ok(count)
}

/// Number of data bytes the device returns for a span.
pub fn response_len<S: MemorySpan + ?Sized>(span: &S) -> usize {
    match span.access_bit() {
        Some(_) => 1,
        None => usize::from(span.length_words()) * span.area().element_size(),
    }
}

fn frame_prefix(header: FinsHeader, src: u8, capacity: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FINS_HEADER_SIZE + 2 + capacity);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.push(MRC_MEMORY);
    bytes.push(src);
    bytes
}

/// Builds a Memory Area Read frame.
///
/// Bit reads always request one element.
///
/// # Errors
///
/// Returns `FinsError::InvalidParameter` if the span is empty or longer than
/// [`MAX_WORDS_PER_COMMAND`], and `FinsError::Format` if the area cannot be
/// addressed as requested.
pub fn build_read_frame<S: MemorySpan + ?Sized>(span: &S, header: FinsHeader) -> Result<Vec<u8>> {
    let (code, address) = locate(span)?;
    let count = element_count(span)?;

    let mut bytes = frame_prefix(header, SRC_MEMORY_READ, 6);
    bytes.push(code);
    bytes.extend_from_slice(&address);
    bytes.extend_from_slice(&count.to_be_bytes());
    Ok(bytes)
}

/// Builds a Memory Area Write frame.
///
/// The count field is the payload length in elements: words for word areas,
/// bytes for completion-flag areas, and 1 for a bit write (whose payload is
/// the single byte `0x00` or `0x01`).
///
/// # Errors
///
/// Returns `FinsError::InvalidParameter` if the payload is empty, is not a
/// whole number of elements, or holds more than [`MAX_WORDS_PER_COMMAND`]
/// elements.
///
/// # Example
///
/// ```
/// use fins_driver::command::build_write_frame;
/// use fins_driver::{parse_address, DataType, FinsHeader, NodeAddress};
///
/// let header = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 0x02);
/// let addr = parse_address("W50.10", DataType::Bool)?;
///
/// let frame = build_write_frame(&addr, &[0x01], header)?;
/// assert_eq!(&frame[10..], &[0x01, 0x02, 0x31, 0x00, 0x32, 0x0A, 0x00, 0x01, 0x01]);
/// # Ok::<(), fins_driver::FinsError>(())
/// ```
pub fn build_write_frame<S: MemorySpan + ?Sized>(
    span: &S,
    payload: &[u8],
    header: FinsHeader,
) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(FinsError::invalid_parameter("payload", "must not be empty"));
    }

    let (code, address) = locate(span)?;
    let count = if span.access_bit().is_some() {
        if payload.len() != 1 {
            return Err(FinsError::invalid_parameter(
                "payload",
                format!("bit writes take 1 byte, got {}", payload.len()),
            ));
        }
        1
    } else {
        let element_size = span.area().element_size();
        if payload.len() % element_size != 0 {
            return Err(FinsError::invalid_parameter(
                "payload",
                format!("{} bytes is not a whole number of words", payload.len()),
            ));
        }
        let elements = payload.len() / element_size;
        if elements > usize::from(MAX_WORDS_PER_COMMAND) {
            return Err(FinsError::invalid_parameter(
                "payload",
                format!("must not exceed {MAX_WORDS_PER_COMMAND} words"),
            ));
        }
        elements as u16
    };

    let mut bytes = frame_prefix(header, SRC_MEMORY_WRITE, 6 + payload.len());
    bytes.push(code);
    bytes.extend_from_slice(&address);
    bytes.extend_from_slice(&count.to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Builds a Multiple Memory Area Read frame.
///
/// Items are written in the order given, so the response can be split
/// positionally with [`parse_batch_read_payload`].
///
/// # Errors
///
/// Returns `FinsError::InvalidParameter` for an empty list or more than
/// [`MAX_BATCH_ITEMS`] items.
pub fn build_batch_read_frame(refs: &[AddressRef], header: FinsHeader) -> Result<Vec<u8>> {
    if refs.is_empty() {
        return Err(FinsError::invalid_parameter("refs", "must not be empty"));
    }
    if refs.len() > MAX_BATCH_ITEMS {
        return Err(FinsError::invalid_parameter(
            "refs",
            format!("must not exceed {MAX_BATCH_ITEMS} items"),
        ));
    }

    let mut bytes = frame_prefix(header, SRC_MULTIPLE_READ, 1 + refs.len() * 6);
    bytes.push(refs.len() as u8);
    for addr in refs {
        let (code, address) = locate(addr)?;
        bytes.push(code);
        bytes.extend_from_slice(&address);
        bytes.extend_from_slice(&element_count(addr)?.to_be_bytes());
    }
    Ok(bytes)
}

/// Splits a Multiple Memory Area Read response payload into per-item data.
///
/// Each item is echoed as its area code followed by its data bytes.
///
/// # Errors
///
/// Returns `FinsError::Format` if an area code does not match the request or
/// the payload is shorter than the items require.
pub fn parse_batch_read_payload(refs: &[AddressRef], payload: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut items = Vec::with_capacity(refs.len());
    let mut rest = payload;

    for addr in refs {
        let (code, _) = locate(addr)?;
        let len = response_len(addr);
        let Some((&echoed, tail)) = rest.split_first() else {
            return Err(FinsError::format(format!(
                "multiple read response ends before {addr}"
            )));
        };
        if echoed != code {
            return Err(FinsError::format(format!(
                "area code 0x{echoed:02X} for {addr}, expected 0x{code:02X}"
            )));
        }
        if tail.len() < len {
            return Err(FinsError::format(format!(
                "{addr} needs {len} bytes, {} left",
                tail.len()
            )));
        }
        let (data, next) = tail.split_at(len);
        items.push(data.to_vec());
        rest = next;
    }

    Ok(items)
}
