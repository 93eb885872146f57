//! Wire protocol error taxonomy

use thiserror::Error;

/// Errors raised while encoding or decoding execution data streams.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The modified UTF-8 encoding carries a 16-bit length prefix, so
    /// strings above 65535 encoded bytes cannot be represented.
    #[error("encoded string too long: {len} bytes")]
    StringTooLong { len: usize },

    /// The stream does not start with `0x01 0xC0 0xC0`.
    #[error("invalid execution data stream: bad magic number")]
    BadMagic,

    /// The stream was produced by an incompatible writer version.
    #[error("incompatible execution data version: expected {expected:#06x}, got {actual:#06x}")]
    UnsupportedVersion { expected: u16, actual: u16 },

    /// A frame starts with a tag this reader does not know.
    #[error("unknown block type {0:#04x}")]
    UnknownBlock(u8),

    /// The stream ended in the middle of a frame.
    #[error("truncated frame")]
    TruncatedFrame,

    /// A string payload is not valid modified UTF-8.
    #[error("malformed modified UTF-8 string")]
    MalformedString,

    /// A varint length header did not terminate within 32 bits.
    #[error("oversized varint in length header")]
    OversizedVarint,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
