//! IAMF-level bit buffers.
//!
//! [`WriteBitBuffer`] serializes literals, strings, LEB128 and ISO 14496-1 sizes into
//! a growable byte vector. [`ReadBitBuffer`] is the matching reader; it owns a
//! growable byte store so the streaming decoder can append data between calls.
//! Every read checks availability first and leaves the cursor untouched when the
//! buffer runs dry, so callers can push more bytes and retry.

use std::io::Write;

use anyhow::{Result, bail};
use bitstream_io::UnsignedInteger;

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::BitBufferError;
use crate::utils::leb128::{
    DecodedSleb128, DecodedUleb128, LebGenerator, MAX_EXPANDED_SIZE, MAX_LEB128_SIZE, decode_expanded_size,
    decode_sleb128, decode_uleb128, encode_expanded_size,
};

/// Maximum size of an IAMF string including its NUL terminator.
pub const MAX_STRING_SIZE: usize = 128;

/// Initial capacity of a [`ReadBitBuffer`] used for streaming.
pub const READ_BUFFER_START_SIZE: usize = 1024;

#[derive(Debug, Default)]
pub struct WriteBitBuffer {
    bw: BitstreamIoWriter,
    leb: LebGenerator,
}

impl WriteBitBuffer {
    pub fn new(leb: LebGenerator) -> Self {
        Self {
            bw: BitstreamIoWriter::default(),
            leb,
        }
    }

    pub fn with_capacity(bytes: usize, leb: LebGenerator) -> Self {
        Self {
            bw: BitstreamIoWriter::with_capacity(bytes),
            leb,
        }
    }

    pub fn leb_generator(&self) -> LebGenerator {
        self.leb
    }

    /// Writes the lower `bits` bits of `value`, rejecting values that do not fit.
    pub fn write_unsigned_literal(&mut self, value: u64, bits: u32) -> Result<()> {
        if bits > 64 {
            bail!(BitBufferError::TooManyBits(bits));
        }
        if bits < 64 && value >> bits != 0 {
            bail!(BitBufferError::ValueTooWide { value, bits });
        }

        self.bw.put_n(bits, value)?;
        Ok(())
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.bw.put(value)?;
        Ok(())
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_unsigned_literal(value as u64, 8)
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_unsigned_literal(value as u64, 16)
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_unsigned_literal(value as u64, 32)
    }

    pub fn write_signed8(&mut self, value: i8) -> Result<()> {
        self.bw.put_s(8, value)?;
        Ok(())
    }

    pub fn write_signed16(&mut self, value: i16) -> Result<()> {
        self.bw.put_s(16, value)?;
        Ok(())
    }

    /// Writes a NUL-terminated UTF-8 string of at most 128 bytes including the NUL.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            bail!(BitBufferError::StringInteriorNul);
        }
        if value.len() + 1 > MAX_STRING_SIZE {
            bail!(BitBufferError::StringTooLong(MAX_STRING_SIZE));
        }

        self.bw.put_bytes(value.as_bytes())?;
        self.bw.put_bytes(&[0])?;
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.bw.put_bytes(data)?;
        Ok(())
    }

    pub fn write_uleb128(&mut self, value: DecodedUleb128) -> Result<()> {
        let encoded = self.leb.uleb128_to_bytes(value)?;
        self.write_bytes(&encoded)
    }

    pub fn write_sleb128(&mut self, value: DecodedSleb128) -> Result<()> {
        let encoded = self.leb.sleb128_to_bytes(value)?;
        self.write_bytes(&encoded)
    }

    pub fn write_iso14496_1_expanded(&mut self, value: u32) -> Result<()> {
        let encoded = encode_expanded_size(value)?;
        self.write_bytes(&encoded)
    }

    pub fn bit_offset(&self) -> u64 {
        self.bw.position()
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bw.is_byte_aligned()
    }

    /// Takes everything written so far. The buffer must be byte aligned.
    pub fn take_bytes(&mut self) -> Result<Vec<u8>> {
        if !self.is_byte_aligned() {
            bail!(BitBufferError::NotByteAligned(self.bit_offset()));
        }

        Ok(self.bw.take_bytes()?)
    }

    /// Drains the written bytes into `sink`. The buffer must be byte aligned.
    pub fn flush_to<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        let bytes = self.take_bytes()?;
        sink.write_all(&bytes)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReadBitBuffer {
    data: Vec<u8>,
    pos: u64,
}

impl ReadBitBuffer {
    /// Creates an empty buffer for streaming input.
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(READ_BUFFER_START_SIZE),
            pos: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
        }
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Discards bytes before the cursor. The cursor must be byte aligned.
    pub fn flush_consumed(&mut self) -> Result<()> {
        if self.pos & 7 != 0 {
            bail!(BitBufferError::NotByteAligned(self.pos));
        }

        let consumed = (self.pos >> 3) as usize;
        self.data.drain(..consumed);
        self.pos = 0;
        Ok(())
    }

    /// Cursor position in bits.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        let len = self.len_bits();
        if position > len {
            bail!(BitBufferError::SeekOutOfRange { position, len });
        }

        self.pos = position;
        Ok(())
    }

    pub fn len_bits(&self) -> u64 {
        (self.data.len() as u64) << 3
    }

    pub fn num_bits_available(&self) -> u64 {
        self.len_bits() - self.pos
    }

    pub fn num_bytes_available(&self) -> usize {
        (self.num_bits_available() >> 3) as usize
    }

    pub fn can_read_bytes(&self, count: usize) -> bool {
        self.num_bits_available() >= (count as u64) << 3
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.pos & 7 == 0
    }

    fn ensure_bits(&self, requested: u64) -> Result<()> {
        let available = self.num_bits_available();
        if requested > available {
            bail!(BitBufferError::NotEnoughData {
                requested,
                available,
            });
        }

        Ok(())
    }

    fn reader(&self) -> Result<BsIoSliceReader<'_>> {
        let mut reader = BsIoSliceReader::from_slice(&self.data);
        reader.seek_to(self.pos)?;
        Ok(reader)
    }

    /// Reads `bits` bits into an unsigned integer type.
    pub fn read_n<I: UnsignedInteger>(&mut self, bits: u32) -> Result<I> {
        if bits == 0 {
            bail!(BitBufferError::TooManyBits(bits));
        }
        self.ensure_bits(bits as u64)?;

        let mut reader = self.reader()?;
        let value = reader.get_n::<I>(bits)?;
        self.pos = reader.position()?;
        Ok(value)
    }

    pub fn read_unsigned_literal(&mut self, bits: u32) -> Result<u64> {
        if bits > 64 {
            bail!(BitBufferError::TooManyBits(bits));
        }
        if bits == 0 {
            return Ok(0);
        }

        self.read_n::<u64>(bits)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.ensure_bits(1)?;

        let mut reader = self.reader()?;
        let value = reader.get()?;
        self.pos = reader.position()?;
        Ok(value)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_n::<u8>(8)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_n::<u16>(16)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_n::<u32>(32)
    }

    pub fn read_signed8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_signed16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.ensure_bits((count as u64) << 3)?;

        let mut out = vec![0u8; count];
        let mut reader = self.reader()?;
        reader.get_bytes(&mut out)?;
        self.pos = reader.position()?;
        Ok(out)
    }

    pub fn ignore_bytes(&mut self, count: usize) -> Result<()> {
        self.ensure_bits((count as u64) << 3)?;
        self.pos += (count as u64) << 3;
        Ok(())
    }

    /// Reads a NUL-terminated UTF-8 string of at most 128 bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        let mut bytes = Vec::new();

        for _ in 0..MAX_STRING_SIZE {
            let byte = match self.read_u8() {
                Ok(byte) => byte,
                Err(e) => {
                    self.pos = start;
                    return Err(e);
                }
            };

            if byte == 0 {
                return String::from_utf8(bytes).map_err(|_| {
                    self.pos = start;
                    BitBufferError::StringNotUtf8.into()
                });
            }
            bytes.push(byte);
        }

        self.pos = start;
        bail!(BitBufferError::StringMissingTerminator(MAX_STRING_SIZE))
    }

    /// Gathers up to `max` raw bytes ending at the first byte without a
    /// continuation bit. Restores the cursor if the buffer runs out first.
    fn read_continued_bytes(&mut self, max: usize) -> Result<Vec<u8>> {
        let start = self.pos;
        let mut bytes = Vec::with_capacity(max);

        while bytes.len() < max {
            let byte = match self.read_u8() {
                Ok(byte) => byte,
                Err(e) => {
                    self.pos = start;
                    return Err(e);
                }
            };
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(bytes)
    }

    pub fn read_uleb128(&mut self) -> Result<DecodedUleb128> {
        Ok(self.read_uleb128_with_size()?.0)
    }

    /// Reads a ULEB128 and also reports how many bytes encoded it.
    pub fn read_uleb128_with_size(&mut self) -> Result<(DecodedUleb128, usize)> {
        let start = self.pos;
        let bytes = self.read_continued_bytes(MAX_LEB128_SIZE + 1)?;

        decode_uleb128(&bytes).inspect_err(|_| self.pos = start)
    }

    pub fn read_sleb128(&mut self) -> Result<DecodedSleb128> {
        let start = self.pos;
        let bytes = self.read_continued_bytes(MAX_LEB128_SIZE + 1)?;

        decode_sleb128(&bytes)
            .map(|(value, _)| value)
            .inspect_err(|_| self.pos = start)
    }

    pub fn read_iso14496_1_expanded(&mut self) -> Result<u32> {
        let start = self.pos;
        let bytes = self.read_continued_bytes(MAX_EXPANDED_SIZE)?;

        decode_expanded_size(&bytes)
            .map(|(value, _)| value)
            .inspect_err(|_| self.pos = start)
    }
}
