//! Execution data frame encoding
//!
//! Frame grammar, all integers big-endian:
//!
//! ```text
//! HEADER:          0x01 | 0xC0 0xC0 | format version (u16)
//! SESSION_INFO:    0x10 | UTF8(id) | i64 start | i64 dump
//! EXECUTION_DATA:  0x11 | i64 class id | UTF8(class name)
//!                       | UTF8(correlation id) | BoolArray(probes)
//! ```
//!
//! Frames are always built whole before any byte reaches the channel, so a
//! flush can never split a frame.

use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::compact;
use crate::types::{ExecutionRecord, SessionInfo};

/// File format version, incremented for each incompatible change.
///
/// 0x1008 replaced the legacy boolean-array layout (4-byte varint slots and
/// 4 bytes per 8 probes) with a LEB128 length header and tight LSB-first
/// packing; 0x1007 readers reject these streams instead of misparsing them.
pub const FORMAT_VERSION: u16 = 0x1008;

/// Magic number identifying execution data streams.
pub const MAGIC_NUMBER: u16 = 0xC0C0;

/// Block identifier for stream headers.
pub const BLOCK_HEADER: u8 = 0x01;

/// Block identifier for session information.
pub const BLOCK_SESSION_INFO: u8 = 0x10;

/// Block identifier for execution data of a single class.
pub const BLOCK_EXECUTION_DATA: u8 = 0x11;

/// The exact bytes beginning every valid stream: `0x01 0xC0 0xC0` followed
/// by the format version. Readers validate these before trusting the rest.
pub fn header_frame() -> [u8; 5] {
    let mut out = [0u8; 5];
    out[0] = BLOCK_HEADER;
    out[1..3].copy_from_slice(&MAGIC_NUMBER.to_be_bytes());
    out[3..5].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    out
}

/// Encode a SESSION_INFO frame.
pub fn session_info_frame(info: &SessionInfo) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(1 + 2 + info.id.len() + 16);
    buf.put_u8(BLOCK_SESSION_INFO);
    compact::put_utf8(&mut buf, &info.id)?;
    buf.put_i64(info.start_timestamp);
    buf.put_i64(info.dump_timestamp);
    Ok(buf.freeze())
}

/// Encode an EXECUTION_DATA frame, or `None` when no probe fired. Records
/// without hits are skipped silently, not an error.
pub fn execution_data_frame(rec: &ExecutionRecord) -> Result<Option<Bytes>, ProtocolError> {
    if !rec.has_hits() {
        return Ok(None);
    }
    let mut buf = BytesMut::with_capacity(
        1 + 8 + 4 + rec.class_name.len() + rec.correlation_id.len() + 5 + rec.probes.len() / 8 + 1,
    );
    buf.put_u8(BLOCK_EXECUTION_DATA);
    buf.put_i64(rec.class_id);
    compact::put_utf8(&mut buf, &rec.class_name)?;
    compact::put_utf8(&mut buf, &rec.correlation_id)?;
    compact::put_bool_array(&mut buf, &rec.probes);
    Ok(Some(buf.freeze()))
}

/// Serializes execution data into a binary stream.
///
/// The stream header is written on construction, so a fresh writer always
/// opens a brand-new stream. The underlying channel should be buffered as
/// frames are written in one piece but can be small.
pub struct ExecutionDataWriter<W: Write> {
    out: W,
}

impl<W: Write> ExecutionDataWriter<W> {
    /// Create a writer and emit the stream header.
    pub fn new(mut out: W) -> Result<Self, ProtocolError> {
        out.write_all(&header_frame())?;
        Ok(Self { out })
    }

    /// Write a SESSION_INFO frame.
    pub fn write_session_info(&mut self, info: &SessionInfo) -> Result<(), ProtocolError> {
        self.out.write_all(&session_info_frame(info)?)?;
        Ok(())
    }

    /// Write an EXECUTION_DATA frame. Returns `false` when the record had no
    /// hits and was skipped.
    pub fn write_execution_record(&mut self, rec: &ExecutionRecord) -> Result<bool, ProtocolError> {
        match execution_data_frame(rec)? {
            Some(frame) => {
                self.out.write_all(&frame)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flush buffered bytes to the underlying channel. Safe at any time,
    /// frames are only ever written whole.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.out.flush()?;
        Ok(())
    }

    /// Consume the writer and return the underlying channel.
    pub fn into_inner(self) -> W {
        self.out
    }
}
