//! Binary wire protocol for execution data
//!
//! A stream is an ordered sequence of tagged frames over a byte channel
//! (socket or file). Every valid stream begins with a single HEADER frame
//! carrying the magic number and format version; readers must reject
//! anything else before trusting the rest of the stream.

pub mod compact;
pub mod reader;
pub mod wire;

pub use reader::{ExecutionDataReader, Frame};
pub use wire::ExecutionDataWriter;
