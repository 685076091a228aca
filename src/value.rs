//! Typed values and their word encoding.
//!
//! Omron CPUs store multi-word numbers with the least significant word first
//! (a 32-bit `0x1234_5678` is the word pair `5678 1234`), while each word is
//! big-endian on the wire. Strings hold two ASCII characters per word, first
//! character in the low byte.
//!
//! # Example
//!
//! ```
//! use fins_driver::value::{decode, encode};
//! use fins_driver::{DataType, Value};
//!
//! let bytes = encode(&Value::Int32(0x1234_5678));
//! assert_eq!(bytes, vec![0x56, 0x78, 0x12, 0x34]);
//! assert_eq!(decode(DataType::Int32, &bytes)?, Value::Int32(0x1234_5678));
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use crate::address::DataType;
use crate::error::{FinsError, Result};

/// A decoded PLC value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Bit or completion flag.
    Bool(bool),
    /// Low byte of a word.
    Byte(u8),
    /// INT.
    Int16(i16),
    /// UINT.
    UInt16(u16),
    /// DINT.
    Int32(i32),
    /// UDINT.
    UInt32(u32),
    /// REAL.
    Float32(f32),
    /// LINT.
    Int64(i64),
    /// ULINT.
    UInt64(u64),
    /// LREAL.
    Float64(f64),
    /// ASCII text, trailing NULs removed.
    String(String),
}

impl Value {
    /// The data type a value of this variant is written as.
    ///
    /// Strings occupy `ceil(len / 2)` words, at least one.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Byte(_) => DataType::Byte,
            Value::Int16(_) => DataType::Int16,
            Value::UInt16(_) => DataType::UInt16,
            Value::Int32(_) => DataType::Int32,
            Value::UInt32(_) => DataType::UInt32,
            Value::Float32(_) => DataType::Float32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt64(_) => DataType::UInt64,
            Value::Float64(_) => DataType::Float64,
            Value::String(s) => {
                let words = s.len().div_ceil(2).clamp(1, usize::from(u16::MAX));
                DataType::String(words as u16)
            }
        }
    }
}

/// Gets a single bit from a 16-bit word (bit 0 is the LSB).
#[inline]
pub fn get_bit(word: u16, bit: u8) -> bool {
    (word & (1 << bit)) != 0
}

/// Reverses word order so a low-word-first buffer becomes plain big-endian.
fn swap_words<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    for (i, word) in bytes.chunks_exact(2).rev().enumerate() {
        out[i * 2] = word[0];
        out[i * 2 + 1] = word[1];
    }
    out
}

/// Decodes one value from its word bytes.
///
/// `bytes` must hold exactly `data_type.length_words()` words, except for
/// [`DataType::Bool`] which also accepts the single byte returned for bit
/// and completion-flag access.
///
/// # Errors
///
/// Returns `FinsError::Format` if the byte count does not match the type.
pub fn decode(data_type: DataType, bytes: &[u8]) -> Result<Value> {
    if data_type == DataType::Bool && bytes.len() == 1 {
        return Ok(Value::Bool(bytes[0] != 0));
    }

    let expected = usize::from(data_type.length_words()) * 2;
    if bytes.len() != expected {
        return Err(FinsError::format(format!(
            "{data_type:?} needs {expected} bytes, got {}",
            bytes.len()
        )));
    }

    let value = match data_type {
        DataType::Bool => Value::Bool(u16::from_be_bytes([bytes[0], bytes[1]]) != 0),
        DataType::Byte => Value::Byte(bytes[1]),
        DataType::Int16 => Value::Int16(i16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::UInt16 => Value::UInt16(u16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::Int32 => Value::Int32(i32::from_be_bytes(swap_words(bytes))),
        DataType::UInt32 => Value::UInt32(u32::from_be_bytes(swap_words(bytes))),
        DataType::Float32 => Value::Float32(f32::from_be_bytes(swap_words(bytes))),
        DataType::Int64 => Value::Int64(i64::from_be_bytes(swap_words(bytes))),
        DataType::UInt64 => Value::UInt64(u64::from_be_bytes(swap_words(bytes))),
        DataType::Float64 => Value::Float64(f64::from_be_bytes(swap_words(bytes))),
        DataType::String(_) => {
            let mut chars: Vec<u8> = Vec::with_capacity(bytes.len());
            for word in bytes.chunks_exact(2) {
                chars.push(word[1]);
                chars.push(word[0]);
            }
            while chars.last() == Some(&0) {
                chars.pop();
            }
            Value::String(String::from_utf8_lossy(&chars).into_owned())
        }
    };
    Ok(value)
}

/// Decodes bit `bit` of a big-endian word.
///
/// # Errors
///
/// Returns `FinsError::Format` unless `word` is exactly two bytes.
pub fn decode_bit(word: &[u8], bit: u8) -> Result<Value> {
    match word {
        [hi, lo] => Ok(Value::Bool(get_bit(u16::from_be_bytes([*hi, *lo]), bit))),
        _ => Err(FinsError::format(format!(
            "bit extraction needs one word, got {} bytes",
            word.len()
        ))),
    }
}

/// Encodes a value as the big-endian word bytes written to memory.
///
/// `Bool` encodes as a whole word (`0x0001`/`0x0000`); bit and flag writes
/// use a single byte instead, see [`encode_bit`].
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Bool(b) => vec![0x00, u8::from(*b)],
        Value::Byte(b) => vec![0x00, *b],
        Value::Int16(v) => v.to_be_bytes().to_vec(),
        Value::UInt16(v) => v.to_be_bytes().to_vec(),
        Value::Int32(v) => swap_words::<4>(&v.to_be_bytes()).to_vec(),
        Value::UInt32(v) => swap_words::<4>(&v.to_be_bytes()).to_vec(),
        Value::Float32(v) => swap_words::<4>(&v.to_be_bytes()).to_vec(),
        Value::Int64(v) => swap_words::<8>(&v.to_be_bytes()).to_vec(),
        Value::UInt64(v) => swap_words::<8>(&v.to_be_bytes()).to_vec(),
        Value::Float64(v) => swap_words::<8>(&v.to_be_bytes()).to_vec(),
        Value::String(s) => {
            let words = usize::from(value.data_type().length_words());
            let mut raw = s.as_bytes().to_vec();
            raw.resize(words * 2, 0);
            raw.chunks_exact(2).flat_map(|pair| [pair[1], pair[0]]).collect()
        }
    }
}

/// Encodes the single data byte used by bit and completion-flag writes.
///
/// # Errors
///
/// Returns `FinsError::InvalidParameter` for anything but `Value::Bool`.
pub fn encode_bit(value: &Value) -> Result<u8> {
    match value {
        Value::Bool(b) => Ok(u8::from(*b)),
        other => Err(FinsError::invalid_parameter(
            "value",
            format!("bit writes take a Bool, got {:?}", other.data_type()),
        )),
    }
}
