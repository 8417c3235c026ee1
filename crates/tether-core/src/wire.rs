//! Tether frame format: how a (address, payload) pair crosses a TCP link.
//!
//! Every frame is a fixed 8-byte header, the UTF-8 address, then the
//! payload. Multi-byte header fields are little-endian on the wire.
//!
//! The header is #[repr(C, packed)] with zerocopy derives, so encoding and
//! decoding need no unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Current frame version.
pub const FRAME_VERSION: u8 = 0x01;

pub const FRAME_HEADER_SIZE: usize = 8;

/// Longest address accepted on the wire.
pub const MAX_ADDRESS: usize = 4096;

/// Largest payload accepted on the wire. Comfortably above the default
/// 128KB chunk and any reasonable raw file in the verbatim subtree.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Frame format version. Unknown versions close the link.
    pub version: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// Address length in bytes (LE).
    pub address_len: u16,
    /// Payload length in bytes (LE).
    pub payload_len: u32,
}

assert_eq_size!(FrameHeader, [u8; FRAME_HEADER_SIZE]);

impl FrameHeader {
    pub fn new(address_len: usize, payload_len: usize) -> Result<Self, WireError> {
        if address_len == 0 {
            return Err(WireError::InvalidAddress);
        }
        if address_len > MAX_ADDRESS {
            return Err(WireError::AddressTooLong(address_len));
        }
        if payload_len > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload_len));
        }
        Ok(Self {
            version: FRAME_VERSION,
            flags: 0,
            address_len: (address_len as u16).to_le(),
            payload_len: (payload_len as u32).to_le(),
        })
    }

    /// Parse and validate a header read off the wire.
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, WireError> {
        // read_from on an exactly-sized slice cannot fail
        let header = FrameHeader::read_from(&bytes[..]).ok_or(WireError::Truncated)?;
        header.validate()?;
        Ok(header)
    }

    pub fn address_len(&self) -> usize {
        u16::from_le(self.address_len) as usize
    }

    pub fn payload_len(&self) -> usize {
        u32::from_le(self.payload_len) as usize
    }

    pub fn validate(&self) -> Result<(), WireError> {
        let (version, flags) = (self.version, self.flags);
        if version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(version));
        }
        if flags != 0 {
            return Err(WireError::ReservedFlagsSet(flags));
        }
        match self.address_len() {
            0 => return Err(WireError::InvalidAddress),
            n if n > MAX_ADDRESS => return Err(WireError::AddressTooLong(n)),
            _ => {}
        }
        let payload_len = self.payload_len();
        if payload_len > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload_len));
        }
        Ok(())
    }
}

/// Encode a full frame: header, address, payload.
pub fn encode_frame(address: &str, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let header = FrameHeader::new(address.len(), payload.len())?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + address.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(address.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode the address bytes that follow a header.
pub fn decode_address(bytes: Vec<u8>) -> Result<String, WireError> {
    String::from_utf8(bytes).map_err(|_| WireError::InvalidAddress)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("address length {0} exceeds maximum {}", MAX_ADDRESS)]
    AddressTooLong(usize),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("address is empty or not valid UTF-8")]
    InvalidAddress,

    #[error("truncated frame header")]
    Truncated,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
