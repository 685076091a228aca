//! Symbolic address grammar.
//!
//! Turns strings such as `"D100"`, `"cio 100.05"` or `"T12"` into a canonical
//! [`AddressRef`]. Input is normalized (whitespace removed, uppercased) and
//! must match one of two forms:
//!
//! - word form: `<prefix><digits>`
//! - bit form: `<prefix><digits>.<1-2 digits>`, bit in `0..=15`
//!
//! Prefixes resolve through a small alias table. Timer and counter prefixes
//! resolve to the completion-flag area for [`DataType::Bool`] and to the
//! present-value area otherwise.
//!
//! # Example
//!
//! ```
//! use fins_driver::{parse_address, DataType, MemoryArea};
//!
//! let addr = parse_address("CIO100.05", DataType::Bool)?;
//! assert_eq!(addr.area(), MemoryArea::CIO);
//! assert_eq!(addr.word_offset(), 100);
//! assert_eq!(addr.bit_offset(), Some(5));
//!
//! let addr = parse_address("D100", DataType::Float32)?;
//! assert_eq!(addr.area(), MemoryArea::DM);
//! assert_eq!(addr.length_words(), 2);
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use tracing::warn;

use crate::error::{FinsError, Result};
use crate::memory::MemoryArea;

/// Highest bit index inside a word.
pub const MAX_BIT_OFFSET: u8 = 15;

/// Data type requested for an address; determines how many words it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    /// Single bit (or completion flag).
    Bool,
    /// Low byte of one word.
    Byte,
    /// Signed 16-bit integer (INT).
    Int16,
    /// Unsigned 16-bit integer (UINT/WORD).
    UInt16,
    /// Signed 32-bit integer (DINT).
    Int32,
    /// Unsigned 32-bit integer (UDINT/DWORD).
    UInt32,
    /// IEEE-754 single precision (REAL).
    Float32,
    /// Signed 64-bit integer (LINT).
    Int64,
    /// Unsigned 64-bit integer (ULINT/LWORD).
    UInt64,
    /// IEEE-754 double precision (LREAL).
    Float64,
    /// ASCII string spanning the given number of words (two characters per word).
    String(u16),
}

impl DataType {
    /// Number of words occupied by a value of this type.
    ///
    /// # Example
    ///
    /// ```
    /// use fins_driver::DataType;
    ///
    /// assert_eq!(DataType::Int16.length_words(), 1);
    /// assert_eq!(DataType::Float32.length_words(), 2);
    /// assert_eq!(DataType::Float64.length_words(), 4);
    /// assert_eq!(DataType::String(10).length_words(), 10);
    /// ```
    pub fn length_words(self) -> u16 {
        match self {
            DataType::Bool | DataType::Byte | DataType::Int16 | DataType::UInt16 => 1,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 2,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 4,
            DataType::String(words) => words,
        }
    }
}

/// How an area prefix resolves to a [`MemoryArea`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AreaAlias {
    Fixed(MemoryArea),
    TimerCounter { flag: MemoryArea, value: MemoryArea },
}

impl AreaAlias {
    fn resolve(self, data_type: DataType) -> MemoryArea {
        match self {
            AreaAlias::Fixed(area) => area,
            AreaAlias::TimerCounter { flag, .. } if data_type == DataType::Bool => flag,
            AreaAlias::TimerCounter { value, .. } => value,
        }
    }
}

const TIMER: AreaAlias = AreaAlias::TimerCounter {
    flag: MemoryArea::TimerFlag,
    value: MemoryArea::TimerValue,
};

const COUNTER: AreaAlias = AreaAlias::TimerCounter {
    flag: MemoryArea::CounterFlag,
    value: MemoryArea::CounterValue,
};

/// Omron prefix table. The empty prefix is plain CIO notation (`"0.05"`).
const AREA_ALIASES: &[(&str, AreaAlias)] = &[
    ("", AreaAlias::Fixed(MemoryArea::CIO)),
    ("CIO", AreaAlias::Fixed(MemoryArea::CIO)),
    ("W", AreaAlias::Fixed(MemoryArea::WR)),
    ("WR", AreaAlias::Fixed(MemoryArea::WR)),
    ("H", AreaAlias::Fixed(MemoryArea::HR)),
    ("HR", AreaAlias::Fixed(MemoryArea::HR)),
    ("A", AreaAlias::Fixed(MemoryArea::AR)),
    ("AR", AreaAlias::Fixed(MemoryArea::AR)),
    ("D", AreaAlias::Fixed(MemoryArea::DM)),
    ("DM", AreaAlias::Fixed(MemoryArea::DM)),
    ("E", AreaAlias::Fixed(MemoryArea::EM)),
    ("EM", AreaAlias::Fixed(MemoryArea::EM)),
    ("T", TIMER),
    ("TIM", TIMER),
    ("C", COUNTER),
    ("CNT", COUNTER),
];

fn lookup_alias(prefix: &str) -> Option<AreaAlias> {
    AREA_ALIASES
        .iter()
        .find(|(name, _)| *name == prefix)
        .map(|(_, alias)| *alias)
}

/// One resolved address.
///
/// Fields are read-only; an `AddressRef` only comes out of [`parse_address`]
/// or the validating constructors, so it always satisfies the grammar rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressRef {
    original: String,
    area: MemoryArea,
    word_offset: u16,
    bit_offset: Option<u8>,
    length_words: u16,
    data_type: DataType,
}

impl AddressRef {
    /// Builds a word address without going through the text grammar.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` for a zero-length string type, a span that
    /// runs past the end of the area, or a counter number out of range.
    pub fn word(area: MemoryArea, word_offset: u16, data_type: DataType) -> Result<Self> {
        let mut addr = Self {
            original: String::new(),
            area,
            word_offset,
            bit_offset: None,
            length_words: data_type.length_words(),
            data_type,
        };
        addr.validate()?;
        addr.original = addr.canonical();
        Ok(addr)
    }

    /// Builds a bit address without going through the text grammar.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` if `bit > 15` or the area has no bit access.
    pub fn bit(area: MemoryArea, word_offset: u16, bit: u8) -> Result<Self> {
        let mut addr = Self {
            original: String::new(),
            area,
            word_offset,
            bit_offset: Some(bit),
            length_words: 1,
            data_type: DataType::Bool,
        };
        addr.validate()?;
        addr.original = addr.canonical();
        Ok(addr)
    }

    fn validate(&self) -> Result<()> {
        if let Some(bit) = self.bit_offset {
            if bit > MAX_BIT_OFFSET {
                return Err(FinsError::format(format!(
                    "bit offset {bit} out of range 0-{MAX_BIT_OFFSET}"
                )));
            }
            self.area.bit_code()?;
        }
        if self.length_words == 0 {
            return Err(FinsError::format("string length must be at least 1 word"));
        }
        if u32::from(self.word_offset) + u32::from(self.length_words) > self.area.word_limit() {
            return Err(FinsError::format(format!(
                "{} words at {}{} run past the end of the area",
                self.length_words,
                self.area.prefix(),
                self.word_offset
            )));
        }
        self.area.wire_offset(self.word_offset)?;
        Ok(())
    }

    /// The string this address was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Memory area.
    pub fn area(&self) -> MemoryArea {
        self.area
    }

    /// Word offset inside the area.
    pub fn word_offset(&self) -> u16 {
        self.word_offset
    }

    /// Bit index for bit addresses.
    pub fn bit_offset(&self) -> Option<u8> {
        self.bit_offset
    }

    /// Whether this is a bit address.
    pub fn is_bit(&self) -> bool {
        self.bit_offset.is_some()
    }

    /// Number of words covered.
    pub fn length_words(&self) -> u16 {
        self.length_words
    }

    /// Requested data type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// One past the last word covered, widened so `0xFFFF + n` does not wrap.
    pub fn end_word(&self) -> u32 {
        u32::from(self.word_offset) + u32::from(self.length_words)
    }

    /// Renders the canonical form, e.g. `DM100` or `CIO100.05`.
    ///
    /// Parsing the canonical form with the same data type yields an equal
    /// set of fields.
    pub fn canonical(&self) -> String {
        match self.bit_offset {
            Some(bit) => format!("{}{}.{:02}", self.area.prefix(), self.word_offset, bit),
            None => format!("{}{}", self.area.prefix(), self.word_offset),
        }
    }
}

impl std::fmt::Display for AddressRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Something that can be the target of one read or write frame: a single
/// address or a whole optimized block.
pub trait MemorySpan {
    /// Memory area.
    fn area(&self) -> MemoryArea;
    /// First word covered.
    fn start_word(&self) -> u16;
    /// Bit index when the span must be accessed through the bit area code.
    fn access_bit(&self) -> Option<u8>;
    /// Words covered (always 1 for bit access).
    fn length_words(&self) -> u16;
}

impl MemorySpan for AddressRef {
    fn area(&self) -> MemoryArea {
        self.area
    }

    fn start_word(&self) -> u16 {
        self.word_offset
    }

    fn access_bit(&self) -> Option<u8> {
        self.bit_offset
    }

    fn length_words(&self) -> u16 {
        self.length_words
    }
}

/// Parses one address string.
///
/// # Errors
///
/// Returns `FinsError::Format` naming the input when the prefix is unknown,
/// the grammar does not match, the bit is outside `0..=15`, or the offset
/// does not fit the area.
pub fn parse_address(address: &str, data_type: DataType) -> Result<AddressRef> {
    let normalized: String = address
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    let malformed = |what: &str| FinsError::format(format!("{what} in '{address}'"));

    let digits_at = normalized
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| malformed("missing word offset"))?;
    let (prefix, rest) = normalized.split_at(digits_at);

    let alias = lookup_alias(prefix)
        .ok_or_else(|| malformed(&format!("unknown area prefix '{prefix}'")))?;

    let (word_part, bit_part) = match rest.split_once('.') {
        Some((word, bit)) => (word, Some(bit)),
        None => (rest, None),
    };

    if word_part.is_empty() || !word_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("malformed word offset"));
    }
    let word_offset: u16 = word_part
        .parse()
        .map_err(|_| malformed("word offset out of range"))?;

    let area = alias.resolve(data_type);

    let mut addr = match bit_part {
        Some(bit) => {
            if bit.is_empty() || bit.len() > 2 || !bit.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed("malformed bit offset"));
            }
            let bit: u8 = bit.parse().map_err(|_| malformed("malformed bit offset"))?;
            if bit > MAX_BIT_OFFSET {
                return Err(malformed(&format!(
                    "bit offset {bit} out of range 0-{MAX_BIT_OFFSET}"
                )));
            }
            if !area.supports_bit_access() {
                return Err(malformed(&format!("{area} area has no bit addressing")));
            }
            AddressRef {
                original: String::new(),
                area,
                word_offset,
                bit_offset: Some(bit),
                length_words: 1,
                data_type,
            }
        }
        None => AddressRef {
            original: String::new(),
            area,
            word_offset,
            bit_offset: None,
            length_words: data_type.length_words(),
            data_type,
        },
    };

    addr.validate().map_err(|e| match e {
        FinsError::Format { reason } => malformed(&reason),
        other => other,
    })?;
    addr.original = address.to_string();
    Ok(addr)
}

/// Result of parsing a batch of address strings.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    /// Addresses that parsed, in input order.
    pub refs: Vec<AddressRef>,
    /// Inputs that failed, with the reason.
    pub failures: Vec<(String, FinsError)>,
}

/// Parses every item independently; a failure never aborts the batch.
///
/// # Example
///
/// ```
/// use fins_driver::{parse_batch, DataType};
///
/// let batch = parse_batch([
///     ("D100", DataType::Int16),
///     ("CIO100.16", DataType::Bool),
///     ("W3.00", DataType::Bool),
/// ]);
/// assert_eq!(batch.refs.len(), 2);
/// assert_eq!(batch.failures.len(), 1);
/// assert_eq!(batch.failures[0].0, "CIO100.16");
/// ```
pub fn parse_batch<I, S>(items: I) -> ParsedBatch
where
    I: IntoIterator<Item = (S, DataType)>,
    S: AsRef<str>,
{
    let mut batch = ParsedBatch::default();
    for (address, data_type) in items {
        let address = address.as_ref();
        match parse_address(address, data_type) {
            Ok(addr) => batch.refs.push(addr),
            Err(e) => {
                warn!(address, error = %e, "dropping unparsable address from batch");
                batch.failures.push((address.to_string(), e));
            }
        }
    }
    batch
}
