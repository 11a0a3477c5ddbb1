//! Fixed-point and sample conversions.

use anyhow::{Result, bail};

use crate::utils::errors::NumericError;

/// Converts a Q7.8 value (gains, loudness) to floating point.
#[inline]
pub fn q7_8_to_f64(value: i16) -> f64 {
    value as f64 / 256.0
}

/// Converts floating point to Q7.8, rounding to nearest.
pub fn f64_to_q7_8(value: f64) -> Result<i16> {
    let scaled = (value * 256.0).round();
    if !scaled.is_finite() || scaled < i16::MIN as f64 || scaled > i16::MAX as f64 {
        bail!(NumericError::Q7_8OutOfRange { value });
    }

    Ok(scaled as i16)
}

/// Converts a Q0.8 value (recon gain, `default_w` weights) to floating point.
#[inline]
pub fn q0_8_to_f64(value: u8) -> f64 {
    value as f64 / 256.0
}

/// Converts a gain in dB expressed as Q7.8 to a linear factor.
pub fn q7_8_db_to_linear(value: i16) -> f64 {
    10f64.powf(q7_8_to_f64(value) / 20.0)
}

pub fn i32_to_i16(value: i32) -> Result<i16> {
    i16::try_from(value).map_err(|_| {
        NumericError::CastOutOfRange {
            value: value as i64,
            target: "i16",
        }
        .into()
    })
}

/// Maps a left-justified 32-bit sample to [-1.0, 1.0).
#[inline]
pub fn i32_to_normalized(sample: i32) -> f64 {
    sample as f64 / 2_147_483_648.0
}

/// Maps a normalized sample back to left-justified 32 bits, clipping.
#[inline]
pub fn normalized_to_i32(sample: f64) -> i32 {
    let scaled = (sample * 2_147_483_648.0).round();
    scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Packs a left-justified 32-bit sample into `bit_depth` bits, little-endian.
pub fn write_pcm_le(sample: i32, bit_depth: u8, out: &mut Vec<u8>) {
    let bytes = sample.to_le_bytes();
    let skip = 4 - (bit_depth as usize / 8);
    out.extend_from_slice(&bytes[skip..]);
}

#[test]
fn q7_8_conversions() -> anyhow::Result<()> {
    assert_eq!(q7_8_to_f64(256), 1.0);
    assert_eq!(q7_8_to_f64(-384), -1.5);
    assert_eq!(f64_to_q7_8(-24.0)?, -6144);
    assert_eq!(f64_to_q7_8(127.99)?, 32765);
    assert!(f64_to_q7_8(128.0).is_err());
    assert!(f64_to_q7_8(f64::NAN).is_err());
    assert!((q7_8_db_to_linear(0) - 1.0).abs() < 1e-12);

    Ok(())
}

#[test]
fn sample_conversions() {
    assert_eq!(normalized_to_i32(i32_to_normalized(i32::MIN)), i32::MIN);
    assert_eq!(normalized_to_i32(2.0), i32::MAX);
    assert!(i32_to_i16(40_000).is_err());

    let mut out = Vec::new();
    write_pcm_le(0x1234_5678, 16, &mut out);
    write_pcm_le(0x1234_5678, 24, &mut out);
    assert_eq!(out, [0x34, 0x12, 0x56, 0x34, 0x12]);
}
