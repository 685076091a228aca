//! Memory area definitions for the FINS protocol.
//!
//! This module defines the [`MemoryArea`] enum which represents the memory
//! areas addressable on CS/CJ/CP/NJ-series Omron PLCs, together with the FINS
//! area codes used on the wire.
//!
//! # Memory Areas Overview
//!
//! | Area | Prefixes | Word code | Bit code | Bytes per element |
//! |------|----------|:---------:|:--------:|:-----------------:|
//! | CIO | `CIO`, none | 0xB0 | 0x30 | 2 |
//! | WR | `W`, `WR` | 0xB1 | 0x31 | 2 |
//! | HR | `H`, `HR` | 0xB2 | 0x32 | 2 |
//! | AR | `A`, `AR` | 0xB3 | 0x33 | 2 |
//! | DM | `D`, `DM` | 0x82 | 0x02 | 2 |
//! | EM (current bank) | `E`, `EM` | 0x98 | 0x0A | 2 |
//! | Timer completion flag | `T`, `TIM` (bool) | 0x09 | - | 1 |
//! | Timer present value | `T`, `TIM` | 0x89 | - | 2 |
//! | Counter completion flag | `C`, `CNT` (bool) | 0x09 | - | 1 |
//! | Counter present value | `C`, `CNT` | 0x89 | - | 2 |
//!
//! Timers and counters share area codes; counters live at `0x8000 + n` on the wire.
//!
//! # Example
//!
//! ```
//! use fins_driver::MemoryArea;
//!
//! assert!(MemoryArea::CIO.supports_bit_access());
//! assert!(!MemoryArea::TimerValue.supports_bit_access());
//! assert_eq!(MemoryArea::DM.to_string(), "DM");
//! ```

use crate::error::{FinsError, Result};

/// Wire offset of the counter bank inside the shared timer/counter areas.
pub(crate) const COUNTER_WIRE_BASE: u16 = 0x8000;

/// Memory areas available in Omron PLCs.
///
/// The variant order is the order in which the block optimizer emits areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryArea {
    /// CIO (Core I/O) area - general purpose I/O and internal relays.
    CIO,
    /// WR (Work) area - work bits/words.
    WR,
    /// HR (Holding) area - holding bits/words that retain values.
    HR,
    /// AR (Auxiliary Relay) area - system status and control bits/words.
    AR,
    /// DM (Data Memory) area.
    DM,
    /// EM (Extended Memory), current bank.
    EM,
    /// Timer completion flags.
    TimerFlag,
    /// Timer present values.
    TimerValue,
    /// Counter completion flags.
    CounterFlag,
    /// Counter present values.
    CounterValue,
}

impl MemoryArea {
    /// Returns the FINS code for element (word or flag) access to this area.
    pub fn word_code(self) -> u8 {
        match self {
            MemoryArea::CIO => 0xB0,
            MemoryArea::WR => 0xB1,
            MemoryArea::HR => 0xB2,
            MemoryArea::AR => 0xB3,
            MemoryArea::DM => 0x82,
            MemoryArea::EM => 0x98,
            MemoryArea::TimerFlag | MemoryArea::CounterFlag => 0x09,
            MemoryArea::TimerValue | MemoryArea::CounterValue => 0x89,
        }
    }

    /// Returns the FINS code for bit access to this area.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` for timer and counter areas, which have no
    /// bit-addressable form.
    pub fn bit_code(self) -> Result<u8> {
        match self {
            MemoryArea::CIO => Ok(0x30),
            MemoryArea::WR => Ok(0x31),
            MemoryArea::HR => Ok(0x32),
            MemoryArea::AR => Ok(0x33),
            MemoryArea::DM => Ok(0x02),
            MemoryArea::EM => Ok(0x0A),
            MemoryArea::TimerFlag
            | MemoryArea::TimerValue
            | MemoryArea::CounterFlag
            | MemoryArea::CounterValue => Err(FinsError::format(format!(
                "{self} area does not support bit access"
            ))),
        }
    }

    /// Returns whether this memory area supports bit access.
    pub fn supports_bit_access(self) -> bool {
        self.bit_code().is_ok()
    }

    /// Number of payload bytes per element for word-code access.
    ///
    /// Completion flag areas return one byte per flag; every other area
    /// returns one 16-bit word per element.
    pub fn element_size(self) -> usize {
        match self {
            MemoryArea::TimerFlag | MemoryArea::CounterFlag => 1,
            _ => 2,
        }
    }

    /// One past the highest addressable user-facing word offset.
    ///
    /// Counters live in the upper half of the timer/counter space, so their
    /// numbers stop at the counter bank base.
    pub fn word_limit(self) -> u32 {
        match self {
            MemoryArea::CounterFlag | MemoryArea::CounterValue => u32::from(COUNTER_WIRE_BASE),
            _ => 0x1_0000,
        }
    }

    /// Translates a user-facing word offset into the offset sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` when a counter offset does not fit below
    /// the counter bank base.
    pub fn wire_offset(self, offset: u16) -> Result<u16> {
        match self {
            MemoryArea::CounterFlag | MemoryArea::CounterValue => {
                if offset >= COUNTER_WIRE_BASE {
                    return Err(FinsError::format(format!(
                        "counter number {offset} out of range"
                    )));
                }
                Ok(COUNTER_WIRE_BASE + offset)
            }
            _ => Ok(offset),
        }
    }

    /// Canonical textual prefix used when re-rendering an address.
    pub fn prefix(self) -> &'static str {
        match self {
            MemoryArea::CIO => "CIO",
            MemoryArea::WR => "WR",
            MemoryArea::HR => "HR",
            MemoryArea::AR => "AR",
            MemoryArea::DM => "DM",
            MemoryArea::EM => "EM",
            MemoryArea::TimerFlag | MemoryArea::TimerValue => "TIM",
            MemoryArea::CounterFlag | MemoryArea::CounterValue => "CNT",
        }
    }
}

impl std::fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryArea::TimerFlag => write!(f, "TIM flag"),
            MemoryArea::CounterFlag => write!(f, "CNT flag"),
            other => write!(f, "{}", other.prefix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_codes() {
        assert_eq!(MemoryArea::CIO.word_code(), 0xB0);
        assert_eq!(MemoryArea::WR.word_code(), 0xB1);
        assert_eq!(MemoryArea::HR.word_code(), 0xB2);
        assert_eq!(MemoryArea::AR.word_code(), 0xB3);
        assert_eq!(MemoryArea::DM.word_code(), 0x82);
        assert_eq!(MemoryArea::EM.word_code(), 0x98);
        assert_eq!(MemoryArea::TimerFlag.word_code(), 0x09);
        assert_eq!(MemoryArea::CounterValue.word_code(), 0x89);
    }

    #[test]
    fn test_bit_codes() {
        assert_eq!(MemoryArea::CIO.bit_code().unwrap(), 0x30);
        assert_eq!(MemoryArea::DM.bit_code().unwrap(), 0x02);
        assert_eq!(MemoryArea::EM.bit_code().unwrap(), 0x0A);
        assert!(MemoryArea::TimerValue.bit_code().is_err());
        assert!(MemoryArea::CounterFlag.bit_code().is_err());
    }

    #[test]
    fn test_element_size() {
        assert_eq!(MemoryArea::DM.element_size(), 2);
        assert_eq!(MemoryArea::TimerValue.element_size(), 2);
        assert_eq!(MemoryArea::TimerFlag.element_size(), 1);
        assert_eq!(MemoryArea::CounterFlag.element_size(), 1);
    }

    #[test]
    fn test_counter_wire_offset() {
        assert_eq!(MemoryArea::TimerValue.wire_offset(5).unwrap(), 5);
        assert_eq!(MemoryArea::CounterValue.wire_offset(5).unwrap(), 0x8005);
        assert_eq!(MemoryArea::CounterFlag.wire_offset(0).unwrap(), 0x8000);
        assert!(MemoryArea::CounterValue.wire_offset(0x8000).is_err());
        assert_eq!(MemoryArea::DM.wire_offset(0xFFFF).unwrap(), 0xFFFF);
    }

    #[test]
    fn test_word_limit() {
        assert_eq!(MemoryArea::CounterValue.word_limit(), 0x8000);
        assert_eq!(MemoryArea::CounterFlag.word_limit(), 0x8000);
        assert_eq!(MemoryArea::TimerValue.word_limit(), 0x1_0000);
        assert_eq!(MemoryArea::DM.word_limit(), 0x1_0000);
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryArea::CIO.to_string(), "CIO");
        assert_eq!(MemoryArea::EM.to_string(), "EM");
        assert_eq!(MemoryArea::TimerValue.to_string(), "TIM");
        assert_eq!(MemoryArea::CounterFlag.to_string(), "CNT flag");
    }
}
