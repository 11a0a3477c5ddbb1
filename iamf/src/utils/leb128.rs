//! LEB128 variable-length integers.
//!
//! IAMF carries most counts and identifiers as ULEB128 and a few signed values as
//! SLEB128. Each byte holds 7 value bits, least-significant group first, with the
//! top bit set on every byte except the last. Values are bounded to 32 bits and
//! encodings to 8 bytes.
//!
//! Writers may choose between the minimal encoding and a fixed width (padding with
//! continuation bytes), which is controlled by [`LebGenerator`].

use anyhow::{Result, bail};

use crate::utils::errors::LebError;

pub type DecodedUleb128 = u32;
pub type DecodedSleb128 = i32;

/// Maximum number of bytes in an encoded LEB128.
pub const MAX_LEB128_SIZE: usize = 8;

/// Maximum size of an ISO/IEC 14496-1 expanded size field.
pub const MAX_EXPANDED_SIZE: usize = 5;

/// Controls how LEB128 values are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LebGenerator {
    /// Smallest encoding that represents the value.
    #[default]
    Minimum,
    /// Exactly this many bytes, 1..=8.
    Fixed(u8),
}

impl LebGenerator {
    pub fn fixed(size: u8) -> Result<Self> {
        if size == 0 || size as usize > MAX_LEB128_SIZE {
            bail!(LebError::InvalidFixedSize(size));
        }

        Ok(LebGenerator::Fixed(size))
    }

    pub fn uleb128_to_bytes(&self, value: DecodedUleb128) -> Result<Vec<u8>> {
        self.encode(value, false, value as i64)
    }

    pub fn sleb128_to_bytes(&self, value: DecodedSleb128) -> Result<Vec<u8>> {
        self.encode(value as u32, true, value as i64)
    }

    fn encode(&self, bits: u32, is_signed: bool, value: i64) -> Result<Vec<u8>> {
        let (coded_size, minimum) = match *self {
            LebGenerator::Minimum => (MAX_LEB128_SIZE, true),
            LebGenerator::Fixed(size) => {
                if size == 0 || size as usize > MAX_LEB128_SIZE {
                    bail!(LebError::InvalidFixedSize(size));
                }
                (size as usize, false)
            }
        };

        let negative = is_signed && value < 0;
        let mut out = Vec::with_capacity(coded_size);
        let mut remaining = bits;
        let mut terminated = false;

        for _ in 0..coded_size {
            let group = (remaining & 0x7f) as u8;
            out.push(0x80 | group);
            remaining >>= 7;
            if negative {
                remaining |= 0xfe00_0000;
            }

            // A signed encoding ends when the sign bit of the last group agrees
            // with what is left of the value.
            let end_value = if is_signed && group & 0x40 != 0 {
                u32::MAX
            } else {
                0
            };

            if remaining == end_value {
                terminated = true;
                if minimum {
                    break;
                }
            }
        }

        if let Some(last) = out.last_mut() {
            *last &= 0x7f;
        }

        if !terminated {
            let required = if is_signed {
                LebGenerator::Minimum.sleb128_to_bytes(value as i32)?.len()
            } else {
                uleb128_size(bits)
            };
            bail!(LebError::ValueTooLarge {
                value,
                required,
                fixed: coded_size,
            });
        }

        Ok(out)
    }
}

/// Decodes a ULEB128 from the start of `data`.
///
/// Returns the value and the number of bytes consumed. Running out of input is an
/// [`std::io::ErrorKind::UnexpectedEof`] error so streaming callers can retry.
pub fn decode_uleb128(data: &[u8]) -> Result<(DecodedUleb128, usize)> {
    let mut value: u64 = 0;

    for i in 0..MAX_LEB128_SIZE {
        let Some(&byte) = data.get(i) else {
            bail!(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("uleb128: need more than {} bytes", data.len()),
            ));
        };

        // Groups beyond the fifth must be zero padding for a 32-bit value.
        if i < 5 {
            value |= ((byte & 0x7f) as u64) << (7 * i);
        } else if byte & 0x7f != 0 {
            bail!(LebError::Overflow);
        }

        if byte & 0x80 == 0 {
            if value > u32::MAX as u64 {
                bail!(LebError::Overflow);
            }
            return Ok((value as u32, i + 1));
        }
    }

    bail!(LebError::TooManyBytes)
}

/// Decodes an SLEB128 from the start of `data`.
pub fn decode_sleb128(data: &[u8]) -> Result<(DecodedSleb128, usize)> {
    let mut value: i64 = 0;
    let mut shift = 0u32;

    for i in 0..MAX_LEB128_SIZE {
        let Some(&byte) = data.get(i) else {
            bail!(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("sleb128: need more than {} bytes", data.len()),
            ));
        };

        if shift < 56 {
            value |= ((byte & 0x7f) as i64) << shift;
        }
        shift += 7;

        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                value |= -1i64 << shift;
            }
            if value < i32::MIN as i64 || value > i32::MAX as i64 {
                bail!(LebError::Overflow);
            }
            return Ok((value as i32, i + 1));
        }
    }

    bail!(LebError::TooManyBytes)
}

/// Number of bytes the minimal ULEB128 encoding of `value` occupies.
pub fn uleb128_size(value: DecodedUleb128) -> usize {
    let significant = 32 - value.leading_zeros() as usize;
    significant.div_ceil(7).max(1)
}

/// Encodes an ISO/IEC 14496-1 expanded size: 7 bits per byte, most significant
/// group first, continuation in the top bit. Any `u32` fits in 5 bytes.
pub fn encode_expanded_size(value: u32) -> Result<Vec<u8>> {
    let mut groups = Vec::with_capacity(MAX_EXPANDED_SIZE);
    let mut remaining = value;
    loop {
        groups.push((remaining & 0x7f) as u8);
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }

    let last = groups.len() - 1;
    Ok(groups
        .iter()
        .rev()
        .enumerate()
        .map(|(i, g)| if i < last { g | 0x80 } else { *g })
        .collect())
}

pub fn decode_expanded_size(data: &[u8]) -> Result<(u32, usize)> {
    let mut value: u64 = 0;

    for i in 0..MAX_EXPANDED_SIZE {
        let Some(&byte) = data.get(i) else {
            bail!(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "expanded size: out of data",
            ));
        };

        value = (value << 7) | (byte & 0x7f) as u64;
        if value > u32::MAX as u64 {
            bail!(LebError::Overflow);
        }
        if byte & 0x80 == 0 {
            return Ok((value as u32, i + 1));
        }
    }

    bail!(LebError::ExpandedSizeTooLong)
}

#[test]
fn uleb128_minimum_edges() -> anyhow::Result<()> {
    let leb = LebGenerator::Minimum;
    assert_eq!(leb.uleb128_to_bytes(0)?, [0x00]);
    assert_eq!(leb.uleb128_to_bytes(127)?, [0x7f]);
    assert_eq!(leb.uleb128_to_bytes(128)?, [0x80, 0x01]);
    assert_eq!(leb.uleb128_to_bytes(u32::MAX)?, [0xff, 0xff, 0xff, 0xff, 0x0f]);

    Ok(())
}

#[test]
fn uleb128_fixed_size() -> anyhow::Result<()> {
    assert_eq!(
        LebGenerator::fixed(5)?.uleb128_to_bytes(0)?,
        [0x80, 0x80, 0x80, 0x80, 0x00]
    );
    assert_eq!(LebGenerator::fixed(2)?.uleb128_to_bytes(1)?, [0x81, 0x00]);

    let err = LebGenerator::fixed(1)?.uleb128_to_bytes(128).unwrap_err();
    assert_eq!(
        crate::utils::errors::error_kind(&err),
        crate::utils::errors::ErrorKind::InvalidArgument
    );

    assert!(LebGenerator::fixed(0).is_err());
    assert!(LebGenerator::fixed(9).is_err());

    Ok(())
}

#[test]
fn uleb128_round_trip() -> anyhow::Result<()> {
    for value in [0u32, 1, 63, 64, 127, 128, 16_383, 16_384, 1 << 21, 1 << 28, u32::MAX] {
        let encoded = LebGenerator::Minimum.uleb128_to_bytes(value)?;
        assert_eq!(encoded.len(), uleb128_size(value));
        assert_eq!(decode_uleb128(&encoded)?, (value, encoded.len()));

        let fixed = LebGenerator::fixed(8)?.uleb128_to_bytes(value)?;
        assert_eq!(decode_uleb128(&fixed)?, (value, 8));
    }

    Ok(())
}

#[test]
fn uleb128_decode_rejects_bad_input() {
    // Value above u32::MAX.
    assert!(decode_uleb128(&[0xff, 0xff, 0xff, 0xff, 0x1f]).is_err());
    // Ninth continuation byte.
    assert!(decode_uleb128(&[0x80; 9]).is_err());
    // Truncated input reports exhaustion.
    let err = decode_uleb128(&[0x80]).unwrap_err();
    assert!(crate::utils::errors::is_resource_exhausted(&err));
}

#[test]
fn sleb128_round_trip() -> anyhow::Result<()> {
    let leb = LebGenerator::Minimum;
    assert_eq!(leb.sleb128_to_bytes(0)?, [0x00]);
    assert_eq!(leb.sleb128_to_bytes(-1)?, [0x7f]);
    assert_eq!(leb.sleb128_to_bytes(63)?, [0x3f]);
    assert_eq!(leb.sleb128_to_bytes(64)?, [0xc0, 0x00]);
    assert_eq!(leb.sleb128_to_bytes(-64)?, [0x40]);
    assert_eq!(leb.sleb128_to_bytes(-65)?, [0xbf, 0x7f]);

    for value in [i32::MIN, -65_536, -129, -1, 0, 1, 4_096, i32::MAX] {
        let encoded = leb.sleb128_to_bytes(value)?;
        assert_eq!(decode_sleb128(&encoded)?, (value, encoded.len()));
        let fixed = LebGenerator::fixed(8)?.sleb128_to_bytes(value)?;
        assert_eq!(decode_sleb128(&fixed)?.0, value);
    }

    Ok(())
}

#[test]
fn expanded_size() -> anyhow::Result<()> {
    assert_eq!(encode_expanded_size(0)?, [0x00]);
    assert_eq!(encode_expanded_size(127)?, [0x7f]);
    assert_eq!(encode_expanded_size(128)?, [0x81, 0x00]);
    assert_eq!(decode_expanded_size(&[0x81, 0x00])?, (128, 2));

    assert_eq!(encode_expanded_size(1 << 28)?, [0x81, 0x80, 0x80, 0x80, 0x00]);
    assert_eq!(encode_expanded_size(u32::MAX)?, [0x8f, 0xff, 0xff, 0xff, 0x7f]);
    assert_eq!(decode_expanded_size(&[0x81, 0x80, 0x80, 0x80, 0x00])?, (1 << 28, 5));
    assert_eq!(decode_expanded_size(&[0x8f, 0xff, 0xff, 0xff, 0x7f])?, (u32::MAX, 5));

    // Five groups can hold 35 bits; anything past 32 overflows.
    assert!(decode_expanded_size(&[0x90, 0x80, 0x80, 0x80, 0x00]).is_err());
    // A fifth byte may not continue.
    assert!(decode_expanded_size(&[0x80, 0x80, 0x80, 0x80, 0x81, 0x00]).is_err());

    Ok(())
}
