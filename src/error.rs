//! Error types for the FINS driver.
//!
//! Every fallible operation returns [`Result<T>`]. Errors fall in three groups:
//!
//! - **Input errors** ([`FinsError::Format`], [`FinsError::InvalidParameter`]) reject a
//!   malformed address string, frame or argument before anything touches the wire.
//! - **Transport errors** (timeouts, [`FinsError::ConnectionClosed`], [`FinsError::Io`], ...)
//!   abort the in-flight exchange and invalidate the session. See [`FinsError::is_transport`].
//! - **Device errors** ([`FinsError::Protocol`], [`FinsError::Envelope`]) are end codes
//!   reported by the PLC itself; the session stays usable.

use std::io;
use thiserror::Error;

/// Result type alias for FINS operations.
pub type Result<T> = std::result::Result<T, FinsError>;

/// Errors that can occur while addressing, framing or talking to a PLC.
#[derive(Debug, Error)]
pub enum FinsError {
    /// Malformed address string or malformed/short frame.
    #[error("Format error: {reason}")]
    Format {
        /// Description of what could not be parsed.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// The stream could not be opened within the connect timeout.
    #[error("Connect timeout")]
    ConnectTimeout,

    /// A frame could not be written within the send timeout.
    #[error("Send timeout")]
    SendTimeout,

    /// A response did not arrive within the receive timeout.
    #[error("Receive timeout")]
    ReceiveTimeout,

    /// The peer closed the stream (zero-length read or write).
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// An exchange was attempted on a session that is not connected.
    #[error("Session is not connected")]
    NotConnected,

    /// Error end code returned by the PLC.
    #[error("PLC error: main code 0x{main:02X}, sub code 0x{sub:02X} ({category})")]
    Protocol {
        /// Main end code.
        main: u8,
        /// Sub end code.
        sub: u8,
        /// Classification of the end code.
        category: ErrorCategory,
    },

    /// The handshake response failed validation.
    #[error("Handshake validation failed: {reason}")]
    Checksum {
        /// Description of the validation failure.
        reason: String,
    },

    /// Non-zero error code in the FINS/TCP envelope.
    #[error("FINS/TCP error 0x{code:08X}: {description}")]
    Envelope {
        /// Envelope error code.
        code: u32,
        /// Text for the code, see [`envelope_error_description`].
        description: &'static str,
    },

    /// Service ID mismatch between request and response.
    #[error("SID mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    SidMismatch {
        /// Expected SID value.
        expected: u8,
        /// Received SID value.
        received: u8,
    },

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FinsError {
    /// Creates a new `Format` error.
    ///
    /// # Example
    ///
    /// ```
    /// use fins_driver::FinsError;
    ///
    /// let err = FinsError::format("unknown area prefix in 'X100'");
    /// assert_eq!(err.to_string(), "Format error: unknown area prefix in 'X100'");
    /// ```
    pub fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Protocol` error, classifying the end code.
    ///
    /// # Example
    ///
    /// ```
    /// use fins_driver::{ErrorCategory, FinsError};
    ///
    /// let err = FinsError::protocol(0x11, 0x02);
    /// assert!(matches!(
    ///     err,
    ///     FinsError::Protocol { category: ErrorCategory::AddressRange, .. }
    /// ));
    /// ```
    pub fn protocol(main: u8, sub: u8) -> Self {
        Self::Protocol {
            main,
            sub,
            category: error_category(main, sub),
        }
    }

    /// Creates a new `Checksum` error.
    pub fn checksum(reason: impl Into<String>) -> Self {
        Self::Checksum {
            reason: reason.into(),
        }
    }

    /// Creates an `Envelope` error for a FINS/TCP error code.
    pub fn envelope(code: u32) -> Self {
        Self::Envelope {
            code,
            description: envelope_error_description(code),
        }
    }

    /// Creates a new `SidMismatch` error.
    pub fn sid_mismatch(expected: u8, received: u8) -> Self {
        Self::SidMismatch { expected, received }
    }

    /// Returns true for errors that leave the byte stream in an unknown state.
    ///
    /// A session that hits one of these is invalidated; reconnecting is the
    /// caller's decision.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FinsError::ConnectTimeout
                | FinsError::SendTimeout
                | FinsError::ReceiveTimeout
                | FinsError::ConnectionClosed
                | FinsError::NotConnected
                | FinsError::Checksum { .. }
                | FinsError::SidMismatch { .. }
                | FinsError::Io(_)
        )
    }
}

/// Classification of a FINS end code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorCategory {
    /// Local node error (0x01).
    LocalNode,
    /// Destination node error (0x02).
    DestinationNode,
    /// Communications controller or CPU unit error (0x03).
    Controller,
    /// Service not supported by the unit (0x04).
    UnsupportedService,
    /// Routing table error (0x05).
    Routing,
    /// Command format error (0x10).
    CommandFormat,
    /// Command too long or too short (0x10 01/02).
    CommandLength,
    /// Parameter error (0x11).
    Parameter,
    /// Memory area classification missing or not supported (0x11 01).
    MemoryArea,
    /// Address range error (0x11 02).
    AddressRange,
    /// Address range exceeded (0x11 03).
    AddressRangeExceeded,
    /// Requested read length is too long (0x11 0B).
    ReadLengthTooLong,
    /// Read not possible (0x20).
    ReadNotPossible,
    /// Write not possible (0x21).
    WriteNotPossible,
    /// Not executable in the current operating mode (0x22).
    ModeMismatch,
    /// Combination not present in the table.
    Unknown {
        /// Main end code.
        main: u8,
        /// Sub end code.
        sub: u8,
    },
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::LocalNode => write!(f, "local node error"),
            ErrorCategory::DestinationNode => write!(f, "destination node error"),
            ErrorCategory::Controller => write!(f, "controller error"),
            ErrorCategory::UnsupportedService => write!(f, "service unsupported"),
            ErrorCategory::Routing => write!(f, "routing table error"),
            ErrorCategory::CommandFormat => write!(f, "command format error"),
            ErrorCategory::CommandLength => write!(f, "command length error"),
            ErrorCategory::Parameter => write!(f, "parameter error"),
            ErrorCategory::MemoryArea => write!(f, "memory area error"),
            ErrorCategory::AddressRange => write!(f, "address range error"),
            ErrorCategory::AddressRangeExceeded => write!(f, "address range exceeded"),
            ErrorCategory::ReadLengthTooLong => write!(f, "read length too long"),
            ErrorCategory::ReadNotPossible => write!(f, "read not possible"),
            ErrorCategory::WriteNotPossible => write!(f, "write not possible"),
            ErrorCategory::ModeMismatch => write!(f, "not executable in current mode"),
            ErrorCategory::Unknown { main, sub } => {
                write!(f, "unknown protocol error(0x{main:02X},0x{sub:02X})")
            }
        }
    }
}

/// Classifies a FINS end code.
///
/// The network relay flag (bit 7 of the main code) and the CPU status flags
/// (bits 6 and 7 of the sub code) are masked before the lookup.
///
/// # Example
///
/// ```
/// use fins_driver::{error_category, ErrorCategory};
///
/// assert_eq!(error_category(0x11, 0x02), ErrorCategory::AddressRange);
/// assert_eq!(error_category(0x05, 0x01), ErrorCategory::Routing);
/// assert_eq!(
///     error_category(0x7E, 0x01),
///     ErrorCategory::Unknown { main: 0x7E, sub: 0x01 }
/// );
/// ```
pub fn error_category(main: u8, sub: u8) -> ErrorCategory {
    let m = main & 0x7F;
    let s = sub & 0x3F;
    match (m, s) {
        (0x01, _) => ErrorCategory::LocalNode,
        (0x02, _) => ErrorCategory::DestinationNode,
        (0x03, _) => ErrorCategory::Controller,
        (0x04, _) => ErrorCategory::UnsupportedService,
        (0x05, _) => ErrorCategory::Routing,
        (0x10, 0x01) | (0x10, 0x02) => ErrorCategory::CommandLength,
        (0x10, _) => ErrorCategory::CommandFormat,
        (0x11, 0x01) => ErrorCategory::MemoryArea,
        (0x11, 0x02) => ErrorCategory::AddressRange,
        (0x11, 0x03) => ErrorCategory::AddressRangeExceeded,
        (0x11, 0x0B) => ErrorCategory::ReadLengthTooLong,
        (0x11, _) => ErrorCategory::Parameter,
        (0x20, _) => ErrorCategory::ReadNotPossible,
        (0x21, _) => ErrorCategory::WriteNotPossible,
        (0x22, _) => ErrorCategory::ModeMismatch,
        _ => ErrorCategory::Unknown { main, sub },
    }
}

/// Returns a human readable description of a FINS end code.
///
/// Falls back to the category text for codes without a dedicated message.
pub fn fins_error_description(main: u8, sub: u8) -> String {
    let text = match (main & 0x7F, sub & 0x3F) {
        (0x00, 0x00) => "normal completion",
        (0x00, 0x01) => "service canceled",
        (0x01, 0x01) => "local node not in network",
        (0x01, 0x02) => "token timeout",
        (0x01, 0x03) => "retries failed",
        (0x01, 0x04) => "too many send frames",
        (0x01, 0x05) => "node address range error",
        (0x01, 0x06) => "node address duplication",
        (0x02, 0x01) => "destination node not in network",
        (0x02, 0x02) => "unit missing",
        (0x02, 0x03) => "third node missing",
        (0x02, 0x04) => "destination node busy",
        (0x02, 0x05) => "response timeout",
        (0x04, 0x01) => "undefined command",
        (0x04, 0x02) => "not supported by model/version",
        (0x10, 0x01) => "command too long",
        (0x10, 0x02) => "command too short",
        (0x10, 0x03) => "elements/data don't match",
        (0x10, 0x04) => "command format error",
        (0x10, 0x05) => "header error",
        (0x11, 0x01) => "area classification missing",
        (0x11, 0x02) => "address range error",
        (0x11, 0x03) => "address range exceeded",
        (0x11, 0x0B) => "response too long",
        (0x11, 0x0C) => "parameter error",
        (0x22, 0x03) => "not possible in current mode",
        _ => return error_category(main, sub).to_string(),
    };
    text.to_string()
}

/// Returns a description of a FINS/TCP envelope error code.
pub fn envelope_error_description(code: u32) -> &'static str {
    match code {
        0x00 => "normal",
        0x01 => "header is not 'FINS'",
        0x02 => "data length too long",
        0x03 => "command not supported",
        0x20 => "all connections are in use",
        0x21 => "specified node is already connected",
        0x22 => "attempt to access a protected node from an unspecified IP address",
        0x23 => "client FINS node address out of range",
        0x24 => "same FINS node address is being used by another client",
        0x25 => "all node addresses available for allocation are in use",
        _ => "unknown FINS/TCP error",
    }
}
