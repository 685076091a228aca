//! FINS/TCP envelope and node-address handshake.
//!
//! On TCP every FINS frame travels inside a 16-byte envelope whose length
//! field tells the receiver how many bytes follow:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic `"FINS"` |
//! | 4 | 4 | Length of everything after this field |
//! | 8 | 4 | Command (0 = node request, 1 = node response, 2 = frame) |
//! | 12 | 4 | Error code |
//! | 16 | n | Command data |
//!
//! Before any frame, the client sends a node-address request and the server
//! answers with the node numbers both sides must use in FINS headers.
//!
//! # Example
//!
//! ```
//! use fins_driver::envelope::{unwrap_frame, wrap_frame};
//!
//! let frame = [0x80, 0x00, 0x02, 0x00, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01];
//! let wrapped = wrap_frame(&frame);
//! assert_eq!(&wrapped[..4], b"FINS");
//! assert_eq!(unwrap_frame(&wrapped)?, &frame);
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use crate::error::{FinsError, Result};

/// Envelope magic.
pub const FINS_MAGIC: [u8; 4] = *b"FINS";

/// Fixed envelope header size.
pub const ENVELOPE_HEADER_SIZE: usize = 16;

/// Node-address request size.
pub const HANDSHAKE_REQUEST_SIZE: usize = 20;

/// Node-address response size.
pub const HANDSHAKE_RESPONSE_SIZE: usize = 24;

/// Largest body accepted after the envelope header.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Bytes of the header counted by the length field (command + error code).
const LENGTH_COVERED_HEADER: usize = 8;

/// Envelope command codes.
pub(crate) const CMD_NODE_REQUEST: u32 = 0;
pub(crate) const CMD_NODE_RESPONSE: u32 = 1;
pub(crate) const CMD_FRAME: u32 = 2;

/// Node numbers assigned by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedNodes {
    /// Node number the server assigned (or confirmed) for this client.
    pub local_node: u8,
    /// Node number of the PLC side.
    pub remote_node: u8,
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn envelope_header(length: usize, command: u32) -> [u8; ENVELOPE_HEADER_SIZE] {
    let mut header = [0u8; ENVELOPE_HEADER_SIZE];
    header[..4].copy_from_slice(&FINS_MAGIC);
    // frames never exceed MAX_FRAME_SIZE
    header[4..8].copy_from_slice(&(length as u32).to_be_bytes());
    header[8..12].copy_from_slice(&command.to_be_bytes());
    header
}

/// Builds the node-address request.
///
/// `client_node` 0 asks the server to assign a node number.
///
/// # Example
///
/// ```
/// use fins_driver::envelope::build_handshake;
///
/// let request = build_handshake(0);
/// assert_eq!(request, [
///     0x46, 0x49, 0x4E, 0x53, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x00,
///     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
/// ]);
/// ```
pub fn build_handshake(client_node: u8) -> [u8; HANDSHAKE_REQUEST_SIZE] {
    let mut request = [0u8; HANDSHAKE_REQUEST_SIZE];
    request[..ENVELOPE_HEADER_SIZE].copy_from_slice(&envelope_header(
        HANDSHAKE_REQUEST_SIZE - 8,
        CMD_NODE_REQUEST,
    ));
    request[HANDSHAKE_REQUEST_SIZE - 1] = client_node;
    request
}

/// Validates a node-address response and extracts the node numbers.
///
/// # Errors
///
/// Returns `FinsError::Checksum` if the response is shorter than 24 bytes, has
/// the wrong magic or command, or carries a non-zero error code.
pub fn validate_handshake(bytes: &[u8]) -> Result<NegotiatedNodes> {
    if bytes.len() < HANDSHAKE_RESPONSE_SIZE {
        return Err(FinsError::checksum(format!(
            "handshake response too short: expected {} bytes, got {}",
            HANDSHAKE_RESPONSE_SIZE,
            bytes.len()
        )));
    }
    if bytes[..4] != FINS_MAGIC {
        return Err(FinsError::checksum(format!(
            "bad magic {}",
            hex::encode_upper(&bytes[..4])
        )));
    }
    let command = read_u32(bytes, 8);
    if command != CMD_NODE_RESPONSE {
        return Err(FinsError::checksum(format!(
            "expected node address response, got command {command}"
        )));
    }
    let code = read_u32(bytes, 12);
    if code != 0 {
        return Err(FinsError::checksum(format!(
            "server refused node address: {}",
            FinsError::envelope(code)
        )));
    }

    Ok(NegotiatedNodes {
        local_node: bytes[19],
        remote_node: bytes[23],
    })
}

/// Wraps a FINS frame in a frame envelope.
pub fn wrap_frame(fins_frame: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_SIZE + fins_frame.len());
    bytes.extend_from_slice(&envelope_header(
        LENGTH_COVERED_HEADER + fins_frame.len(),
        CMD_FRAME,
    ));
    bytes.extend_from_slice(fins_frame);
    bytes
}

/// Number of bytes that follow a 16-byte envelope header.
///
/// # Errors
///
/// Returns `FinsError::Format` for a bad magic, a length too small to cover
/// the header, or a body larger than [`MAX_FRAME_SIZE`].
pub fn envelope_payload_len(header: &[u8; ENVELOPE_HEADER_SIZE]) -> Result<usize> {
    if header[..4] != FINS_MAGIC {
        return Err(FinsError::format(format!(
            "envelope magic {} is not FINS",
            hex::encode_upper(&header[..4])
        )));
    }
    let length = read_u32(header, 4) as usize;
    let Some(remaining) = length.checked_sub(LENGTH_COVERED_HEADER) else {
        return Err(FinsError::format(format!("envelope length {length} too small")));
    };
    if remaining > MAX_FRAME_SIZE {
        return Err(FinsError::format(format!(
            "envelope body of {remaining} bytes exceeds {MAX_FRAME_SIZE}"
        )));
    }
    Ok(remaining)
}

/// Returns the FINS frame carried by a complete envelope.
///
/// # Errors
///
/// Returns `FinsError::Envelope` when the server reports an error code,
/// and `FinsError::Format` for a malformed or truncated envelope or a command
/// other than a frame.
pub fn unwrap_frame(bytes: &[u8]) -> Result<&[u8]> {
    let Some(header) = bytes.first_chunk::<ENVELOPE_HEADER_SIZE>() else {
        return Err(FinsError::format(format!(
            "envelope too short: {} bytes",
            bytes.len()
        )));
    };
    let body_len = envelope_payload_len(header)?;

    let code = read_u32(bytes, 12);
    if code != 0 {
        return Err(FinsError::envelope(code));
    }
    let command = read_u32(bytes, 8);
    if command != CMD_FRAME {
        return Err(FinsError::format(format!(
            "expected frame envelope, got command {command}"
        )));
    }

    let body = &bytes[ENVELOPE_HEADER_SIZE..];
    if body.len() < body_len {
        return Err(FinsError::format(format!(
            "envelope declares {body_len} bytes, {} present",
            body.len()
        )));
    }
    Ok(&body[..body_len])
}
