//! Decoding of FINS replies: header, end code and data.
//!
//! # Layout
//!
//! | Part | Bytes | Notes |
//! |------|-------|-------|
//! | Header | 10 | ICF response bit set, routing swapped |
//! | MRC, SRC | 2 | only with [`ResponseFormat::CommandEcho`] |
//! | End code | 2 | main, sub; `00 00` is normal completion |
//! | Data | rest | empty for writes |
//!
//! The compact layout (no command echo) is the default; units that echo the
//! command code are handled by selecting [`ResponseFormat::CommandEcho`] on
//! the session.
//!
//! # Example
//!
//! ```
//! use fins_driver::{extract_payload, parse_response_header};
//!
//! let bytes = [
//!     0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x01, // header
//!     0x00, 0x00, // end code
//!     0x12, 0x34, // data
//! ];
//!
//! let header = parse_response_header(&bytes)?;
//! assert!(header.is_success());
//! assert_eq!(extract_payload(&bytes), &[0x12, 0x34]);
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use tracing::debug;

use crate::error::{error_category, ErrorCategory, FinsError, Result};
use crate::header::{FinsHeader, FINS_HEADER_SIZE};

/// Minimum compact response size: header (10) + main code (1) + sub code (1).
pub const MIN_RESPONSE_SIZE: usize = FINS_HEADER_SIZE + 2;

/// Layout of the bytes between the header and the response data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseFormat {
    /// Header followed directly by the end code.
    #[default]
    Compact,
    /// Header, echoed MRC/SRC, then the end code.
    CommandEcho,
}

impl ResponseFormat {
    /// Bytes before the response data.
    pub fn prefix_len(self) -> usize {
        match self {
            ResponseFormat::Compact => MIN_RESPONSE_SIZE,
            ResponseFormat::CommandEcho => MIN_RESPONSE_SIZE + 2,
        }
    }
}

/// Header and end code of a compact response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Response header.
    pub header: FinsHeader,
    /// End code main.
    pub main_code: u8,
    /// End code sub.
    pub sub_code: u8,
}

impl ResponseHeader {
    /// Returns whether both end code bytes are zero.
    pub fn is_success(&self) -> bool {
        self.main_code == 0x00 && self.sub_code == 0x00
    }

    /// Classifies the end code.
    pub fn category(&self) -> ErrorCategory {
        error_category(self.main_code, self.sub_code)
    }
}

/// Parses the header and end code of a compact response.
///
/// # Errors
///
/// Returns `FinsError::Format` if fewer than 12 bytes are given.
pub fn parse_response_header(bytes: &[u8]) -> Result<ResponseHeader> {
    if bytes.len() < MIN_RESPONSE_SIZE {
        return Err(FinsError::format(format!(
            "response too short: expected at least {} bytes, got {}",
            MIN_RESPONSE_SIZE,
            bytes.len()
        )));
    }

    Ok(ResponseHeader {
        header: FinsHeader::from_bytes(bytes)?,
        main_code: bytes[FINS_HEADER_SIZE],
        sub_code: bytes[FINS_HEADER_SIZE + 1],
    })
}

/// Returns everything after the 12-byte compact prefix, or an empty slice.
pub fn extract_payload(bytes: &[u8]) -> &[u8] {
    bytes.get(MIN_RESPONSE_SIZE..).unwrap_or(&[])
}

/// Parsed FINS response that owns its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinsResponse {
    /// Response header.
    pub header: FinsHeader,
    /// Echoed (MRC, SRC), present for [`ResponseFormat::CommandEcho`].
    pub command: Option<(u8, u8)>,
    /// End code main.
    pub main_code: u8,
    /// End code sub.
    pub sub_code: u8,
    /// Response data.
    pub data: Vec<u8>,
}

impl FinsResponse {
    /// Parses a response laid out as `format`.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` if the bytes are shorter than the layout
    /// prefix.
    ///
    /// # Example
    ///
    /// ```
    /// use fins_driver::{FinsResponse, ResponseFormat};
    ///
    /// let bytes = [
    ///     0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x01,
    ///     0x01, 0x01, // MRC, SRC
    ///     0x00, 0x00,
    ///     0x12, 0x34,
    /// ];
    /// let response = FinsResponse::from_bytes(&bytes, ResponseFormat::CommandEcho)?;
    /// assert_eq!(response.command, Some((0x01, 0x01)));
    /// assert_eq!(response.to_words()?, vec![0x1234]);
    /// # Ok::<(), fins_driver::FinsError>(())
    /// ```
    pub fn from_bytes(bytes: &[u8], format: ResponseFormat) -> Result<Self> {
        let prefix = format.prefix_len();
        if bytes.len() < prefix {
            return Err(FinsError::format(format!(
                "{} byte response is shorter than its {prefix} byte prefix",
                bytes.len()
            )));
        }

        let header = FinsHeader::from_bytes(bytes)?;
        let (command, code_at) = match format {
            ResponseFormat::Compact => (None, FINS_HEADER_SIZE),
            ResponseFormat::CommandEcho => (
                Some((bytes[FINS_HEADER_SIZE], bytes[FINS_HEADER_SIZE + 1])),
                FINS_HEADER_SIZE + 2,
            ),
        };

        Ok(Self {
            header,
            command,
            main_code: bytes[code_at],
            sub_code: bytes[code_at + 1],
            data: bytes[prefix..].to_vec(),
        })
    }

    /// Returns whether both end code bytes are zero.
    pub fn is_success(&self) -> bool {
        self.main_code == 0x00 && self.sub_code == 0x00
    }

    /// Fails with the classified end code unless the command completed.
    ///
    /// The relay-error bit of the main code and the CPU status bits of the
    /// sub code only report unit conditions; a response whose remaining bits
    /// are zero is accepted.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Protocol` carrying the raw codes and their category.
    pub fn check_error(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        if self.main_code & 0x7F == 0x00 && self.sub_code & 0x3F == 0x00 {
            debug!(
                main = self.main_code,
                sub = self.sub_code,
                "accepting response with unit status bits set"
            );
            return Ok(());
        }
        Err(FinsError::protocol(self.main_code, self.sub_code))
    }

    /// Checks that the response answers the request with service ID `expected`.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::SidMismatch` if the SID differs.
    pub fn check_sid(&self, expected: u8) -> Result<()> {
        if self.header.sid == expected {
            Ok(())
        } else {
            Err(FinsError::sid_mismatch(expected, self.header.sid))
        }
    }

    /// Converts response data to big-endian words.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` if the data length is odd.
    pub fn to_words(&self) -> Result<Vec<u16>> {
        if self.data.len() % 2 != 0 {
            return Err(FinsError::format(
                "odd data length cannot be split into words",
            ));
        }

        Ok(self
            .data
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(main_code: u8, sub_code: u8, data: &[u8]) -> Vec<u8> {
        let mut bytes = vec![
            0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x01, // header
            main_code, sub_code,
        ];
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_twelve_byte_success() {
        let bytes = compact(0x00, 0x00, &[]);
        assert_eq!(bytes.len(), 12);

        let header = parse_response_header(&bytes).unwrap();
        assert!(header.is_success());
        assert!(header.header.is_response());
        assert!(extract_payload(&bytes).is_empty());
    }

    #[test]
    fn test_address_range_error() {
        let bytes = compact(0x11, 0x02, &[]);
        let header = parse_response_header(&bytes).unwrap();
        assert!(!header.is_success());
        assert_eq!(header.category(), ErrorCategory::AddressRange);

        let response = FinsResponse::from_bytes(&bytes, ResponseFormat::Compact).unwrap();
        match response.check_error().unwrap_err() {
            FinsError::Protocol {
                main,
                sub,
                category,
            } => {
                assert_eq!((main, sub), (0x11, 0x02));
                assert_eq!(category, ErrorCategory::AddressRange);
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    #[test]
    fn test_short_response_is_format_error() {
        let bytes = compact(0x00, 0x00, &[]);
        assert!(matches!(
            parse_response_header(&bytes[..11]),
            Err(FinsError::Format { .. })
        ));
        assert!(matches!(
            FinsResponse::from_bytes(&bytes, ResponseFormat::CommandEcho),
            Err(FinsError::Format { .. })
        ));
    }

    #[test]
    fn test_extract_payload() {
        let bytes = compact(0x00, 0x00, &[0xAB, 0xCD]);
        assert_eq!(extract_payload(&bytes), &[0xAB, 0xCD]);
        assert!(extract_payload(&bytes[..5]).is_empty());
    }

    #[test]
    fn test_status_bits_accepted() {
        // non-fatal CPU error flag with data present
        let bytes = compact(0x00, 0x40, &[0x00, 0x01]);
        let response = FinsResponse::from_bytes(&bytes, ResponseFormat::Compact).unwrap();
        assert!(!response.is_success());
        assert!(response.check_error().is_ok());

        let relayed = compact(0x81, 0x01, &[]);
        let response = FinsResponse::from_bytes(&relayed, ResponseFormat::Compact).unwrap();
        assert!(matches!(
            response.check_error(),
            Err(FinsError::Protocol {
                category: ErrorCategory::LocalNode,
                ..
            })
        ));
    }

    #[test]
    fn test_command_echo_layout() {
        let mut bytes = compact(0x01, 0x01, &[]);
        bytes.extend_from_slice(&[0x00, 0x00, 0x12, 0x34, 0x56, 0x78]);
        let response = FinsResponse::from_bytes(&bytes, ResponseFormat::CommandEcho).unwrap();
        assert_eq!(response.command, Some((0x01, 0x01)));
        assert!(response.is_success());
        assert_eq!(response.to_words().unwrap(), vec![0x1234, 0x5678]);
    }

    #[test]
    fn test_check_sid() {
        let response =
            FinsResponse::from_bytes(&compact(0x00, 0x00, &[]), ResponseFormat::Compact).unwrap();
        assert!(response.check_sid(0x01).is_ok());
        assert!(matches!(
            response.check_sid(0x02),
            Err(FinsError::SidMismatch {
                expected: 0x02,
                received: 0x01
            })
        ));
    }

    #[test]
    fn test_to_words_odd_length() {
        let response =
            FinsResponse::from_bytes(&compact(0x00, 0x00, &[0x12, 0x34, 0x56]), ResponseFormat::Compact)
                .unwrap();
        assert!(response.to_words().is_err());
    }
}
