//! FINS header and node addressing.
//!
//! Every FINS command and response starts with the same 10-byte header:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | ICF | Information Control Field |
//! | 1 | RSV | Reserved (always 0x00) |
//! | 2 | GCT | Gateway Count |
//! | 3 | DNA | Destination Network Address |
//! | 4 | DA1 | Destination Node Address |
//! | 5 | DA2 | Destination Unit Address |
//! | 6 | SNA | Source Network Address |
//! | 7 | SA1 | Source Node Address |
//! | 8 | SA2 | Source Unit Address |
//! | 9 | SID | Service ID |
//!
//! On FINS/TCP the node numbers (DA1/SA1) are not chosen by the caller: they
//! are negotiated by the handshake and then carried by the session.
//!
//! # Example
//!
//! ```
//! use fins_driver::{FinsHeader, NodeAddress};
//!
//! let plc = NodeAddress::new(0, 10, 0);
//! let me = NodeAddress::new(0, 1, 0);
//!
//! let header = FinsHeader::new_command(plc, me, 0x01);
//! assert_eq!(header.to_bytes()[4], 10);
//! ```

use crate::error::{FinsError, Result};

/// FINS header size in bytes.
pub const FINS_HEADER_SIZE: usize = 10;

/// ICF for a command that expects a response.
pub const ICF_COMMAND: u8 = 0x80;

/// ICF bit set on every response.
pub const ICF_RESPONSE_BIT: u8 = 0x40;

/// Default gateway count (number of bridges a frame may cross).
pub const DEFAULT_GATEWAY_COUNT: u8 = 0x02;

/// Where a frame comes from or goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeAddress {
    /// 0 for the local network.
    pub network: u8,
    /// Node number; on FINS/TCP it comes from the handshake.
    pub node: u8,
    /// 0 addresses the CPU unit.
    pub unit: u8,
}

impl NodeAddress {
    /// Builds an address from its three parts.
    pub fn new(network: u8, node: u8, unit: u8) -> Self {
        Self {
            network,
            node,
            unit,
        }
    }

    /// Returns a copy with the node number replaced.
    ///
    /// Used when the handshake assigns the node number of a configured
    /// network/unit pair.
    ///
    /// # Example
    ///
    /// ```
    /// use fins_driver::NodeAddress;
    ///
    /// let addr = NodeAddress::new(1, 0, 0).with_node(23);
    /// assert_eq!(addr, NodeAddress::new(1, 23, 0));
    /// ```
    pub fn with_node(self, node: u8) -> Self {
        Self { node, ..self }
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.network, self.node, self.unit)
    }
}

/// The 10-byte routing header in front of every command and response.
///
/// Field names follow the Omron manuals (`dna`/`da1`/`da2` for the
/// destination, `sna`/`sa1`/`sa2` for the source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinsHeader {
    /// ICF: bit 7 set on requests, bit 6 set on responses.
    pub icf: u8,
    /// Always zero.
    pub rsv: u8,
    /// Bridges the frame may still cross.
    pub gct: u8,
    /// Destination network.
    pub dna: u8,
    /// Destination node.
    pub da1: u8,
    /// Destination unit.
    pub da2: u8,
    /// Source network.
    pub sna: u8,
    /// Source node.
    pub sa1: u8,
    /// Source unit.
    pub sa2: u8,
    /// Service ID; the response carries the request's value.
    pub sid: u8,
}

impl FinsHeader {
    /// Header for a command sent from `source` to `destination`.
    pub fn new_command(destination: NodeAddress, source: NodeAddress, sid: u8) -> Self {
        let NodeAddress {
            network: dna,
            node: da1,
            unit: da2,
        } = destination;
        let NodeAddress {
            network: sna,
            node: sa1,
            unit: sa2,
        } = source;
        Self {
            icf: ICF_COMMAND,
            rsv: 0x00,
            gct: DEFAULT_GATEWAY_COUNT,
            dna,
            da1,
            da2,
            sna,
            sa1,
            sa2,
            sid,
        }
    }

    /// Wire bytes in field order.
    pub fn to_bytes(self) -> [u8; FINS_HEADER_SIZE] {
        let Self {
            icf,
            rsv,
            gct,
            dna,
            da1,
            da2,
            sna,
            sa1,
            sa2,
            sid,
        } = self;
        [icf, rsv, gct, dna, da1, da2, sna, sa1, sa2, sid]
    }

    /// Reads a header from the start of `data`; trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Format` if fewer than 10 bytes are given.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some(&[icf, rsv, gct, dna, da1, da2, sna, sa1, sa2, sid]) =
            data.first_chunk::<FINS_HEADER_SIZE>()
        else {
            return Err(FinsError::format(format!(
                "FINS header needs {FINS_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        };
        Ok(Self {
            icf,
            rsv,
            gct,
            dna,
            da1,
            da2,
            sna,
            sa1,
            sa2,
            sid,
        })
    }

    /// Whether the ICF response bit is set.
    pub fn is_response(self) -> bool {
        self.icf & ICF_RESPONSE_BIT == ICF_RESPONSE_BIT
    }

    /// Destination triple.
    pub fn destination(self) -> NodeAddress {
        NodeAddress::new(self.dna, self.da1, self.da2)
    }

    /// Source triple.
    pub fn source(self) -> NodeAddress {
        NodeAddress::new(self.sna, self.sa1, self.sa2)
    }
}
