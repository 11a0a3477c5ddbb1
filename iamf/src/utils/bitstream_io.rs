//! Thin wrappers over `bitstream_io` readers and writers.
//!
//! Errors carry the bit position so a failed parse can be located in the stream.
//! Higher-level IAMF primitives (LEB128, strings) live in
//! [`crate::utils::bit_buffer`].

use std::io;
use std::io::SeekFrom;

use bitstream_io::{
    BigEndian, BitRead, BitReader, BitWrite, BitWriter, SignedInteger, UnsignedInteger,
};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        self.check_available(n as u64, "get_n")?;
        self.bs.read_unsigned_var(n)
    }

    #[inline(always)]
    pub fn get_s<S: SignedInteger>(&mut self, n: u32) -> io::Result<S> {
        self.check_available(n as u64, "get_s")?;
        self.bs.read_signed_var(n)
    }

    #[inline(always)]
    pub fn get_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.check_available((buf.len() as u64) << 3, "get_bytes")?;
        self.bs.read_bytes(buf)
    }

    #[inline(always)]
    pub fn seek_to(&mut self, position: u64) -> io::Result<u64> {
        if position > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek_to({position}): out of bounds bits (len {})", self.len),
            ));
        }

        self.bs.seek_bits(SeekFrom::Start(position))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        self.check_available(n as u64, "skip_n")?;
        self.bs.skip(n)
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits().map(|pos| self.len - pos)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    fn check_available(&mut self, n: u64, op: &str) -> io::Result<()> {
        if n > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{op}({n}): out of bounds bits at {}",
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            ));
        }

        Ok(())
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

/// Big-endian bit writer backed by a growable vector.
pub struct BitstreamIoWriter {
    bs: BitWriter<Vec<u8>, BigEndian>,
    bits: u64,
}

impl std::fmt::Debug for BitstreamIoWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstreamIoWriter")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl Default for BitstreamIoWriter {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl BitstreamIoWriter {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bs: BitWriter::new(Vec::with_capacity(bytes)),
            bits: 0,
        }
    }

    #[inline(always)]
    pub fn put(&mut self, bit: bool) -> io::Result<()> {
        self.bs.write_bit(bit)?;
        self.bits += 1;
        Ok(())
    }

    #[inline(always)]
    pub fn put_n<U: UnsignedInteger>(&mut self, n: u32, value: U) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }

        self.bs.write_unsigned_var(n, value)?;
        self.bits += n as u64;
        Ok(())
    }

    #[inline(always)]
    pub fn put_s<S: SignedInteger>(&mut self, n: u32, value: S) -> io::Result<()> {
        self.bs.write_signed_var(n, value)?;
        self.bits += n as u64;
        Ok(())
    }

    #[inline(always)]
    pub fn put_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bs.write_bytes(buf)?;
        self.bits += (buf.len() as u64) << 3;
        Ok(())
    }

    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    pub fn is_byte_aligned(&self) -> bool {
        self.bits & 7 == 0
    }

    /// Takes the written bytes, leaving the writer empty.
    ///
    /// Fails unless the writer sits on a byte boundary.
    pub fn take_bytes(&mut self) -> io::Result<Vec<u8>> {
        if !self.is_byte_aligned() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("take_bytes: writer is at bit {}", self.bits),
            ));
        }

        let bs = std::mem::replace(&mut self.bs, BitWriter::new(Vec::new()));
        self.bits = 0;
        Ok(bs.into_writer())
    }
}

#[test]
fn reader_positions() -> anyhow::Result<()> {
    let data = [0b1010_0000u8, 0xff, 0x80];
    let mut reader = BsIoSliceReader::from_slice(&data);

    assert!(reader.get()?);
    assert_eq!(reader.get_n::<u8>(3)?, 0b010);
    assert_eq!(reader.position()?, 4);
    reader.skip_n(4)?;
    assert_eq!(reader.get_s::<i8>(8)?, -1);
    assert_eq!(reader.available()?, 8);
    assert!(reader.get_n::<u16>(9).is_err());
    assert_eq!(reader.position()?, 16);

    reader.seek_to(0)?;
    let mut buf = [0u8; 2];
    reader.get_bytes(&mut buf)?;
    assert_eq!(buf, [0xa0, 0xff]);

    Ok(())
}

#[test]
fn writer_alignment() -> anyhow::Result<()> {
    let mut writer = BitstreamIoWriter::default();
    writer.put_n(5u32, 0x1fu8)?;
    writer.put(false)?;
    assert!(writer.take_bytes().is_err());
    writer.put_n(2u32, 0b11u8)?;
    writer.put_s(16, -2i16)?;
    writer.put_bytes(b"ia")?;

    assert_eq!(writer.position(), 40);
    assert_eq!(writer.take_bytes()?, [0xfb, 0xff, 0xfe, b'i', b'a']);
    assert_eq!(writer.position(), 0);

    Ok(())
}
