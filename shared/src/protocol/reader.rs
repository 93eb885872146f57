//! Execution data decoding

use std::io::Read;

use serde::Serialize;

use crate::error::ProtocolError;
use crate::protocol::{compact, wire};
use crate::types::{ExecutionRecord, SessionInfo};

/// One decoded unit of an execution data stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Frame {
    SessionInfo(SessionInfo),
    ExecutionData(ExecutionRecord),
}

/// Deserializes execution data from a binary stream.
///
/// The header is validated on construction: a stream that does not open
/// with `0x01 0xC0 0xC0` and the current format version is rejected before
/// anything else is parsed.
pub struct ExecutionDataReader<R: Read> {
    input: R,
}

impl<R: Read> ExecutionDataReader<R> {
    /// Create a reader, consuming and validating the stream header.
    pub fn new(mut input: R) -> Result<Self, ProtocolError> {
        let tag = compact::read_u8(&mut input)?;
        if tag != wire::BLOCK_HEADER {
            return Err(ProtocolError::BadMagic);
        }
        let magic = compact::read_u16(&mut input)?;
        if magic != wire::MAGIC_NUMBER {
            return Err(ProtocolError::BadMagic);
        }
        let version = compact::read_u16(&mut input)?;
        if version != wire::FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: wire::FORMAT_VERSION,
                actual: version,
            });
        }
        Ok(Self { input })
    }

    /// Read the next frame, or `None` on clean end of stream. EOF in the
    /// middle of a frame is a [`ProtocolError::TruncatedFrame`].
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let tag = match compact::read_u8(&mut self.input) {
            Ok(tag) => tag,
            // EOF at a frame boundary ends the stream
            Err(ProtocolError::TruncatedFrame) => return Ok(None),
            Err(e) => return Err(e),
        };
        match tag {
            wire::BLOCK_SESSION_INFO => {
                let id = compact::read_utf8(&mut self.input)?;
                let start_timestamp = compact::read_i64(&mut self.input)?;
                let dump_timestamp = compact::read_i64(&mut self.input)?;
                Ok(Some(Frame::SessionInfo(SessionInfo::new(
                    id,
                    start_timestamp,
                    dump_timestamp,
                ))))
            }
            wire::BLOCK_EXECUTION_DATA => {
                let class_id = compact::read_i64(&mut self.input)?;
                let class_name = compact::read_utf8(&mut self.input)?;
                let correlation_id = compact::read_utf8(&mut self.input)?;
                let probes = compact::read_bool_array(&mut self.input)?;
                Ok(Some(Frame::ExecutionData(ExecutionRecord {
                    class_id,
                    class_name,
                    correlation_id,
                    probes,
                })))
            }
            other => Err(ProtocolError::UnknownBlock(other)),
        }
    }

    /// Read every remaining frame until end of stream.
    pub fn read_all(&mut self) -> Result<Vec<Frame>, ProtocolError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
