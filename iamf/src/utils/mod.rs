//! Utility functions and supporting infrastructure.
//!
//! Provides LEB128 coding, bit-level buffers, fixed-point conversions and the
//! error types shared by the OBU readers and writers.

pub mod bit_buffer;
pub mod bitstream_io;
pub mod errors;
pub mod leb128;
pub mod numeric;
