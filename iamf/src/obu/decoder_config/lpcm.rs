use anyhow::{Result, bail};

use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::CodecConfigError;

const VALID_SAMPLE_SIZES: [u8; 3] = [16, 24, 32];
const VALID_SAMPLE_RATES: [u32; 5] = [16000, 32000, 44100, 48000, 96000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LpcmSampleFormat {
    BigEndian,
    #[default]
    LittleEndian,
}

impl LpcmSampleFormat {
    pub fn from_flags(flags: u8) -> Result<Self> {
        match flags {
            0 => Ok(LpcmSampleFormat::BigEndian),
            1 => Ok(LpcmSampleFormat::LittleEndian),
            other => bail!(CodecConfigError::InvalidLpcmFormatFlags(other)),
        }
    }

    pub fn flags(self) -> u8 {
        match self {
            LpcmSampleFormat::BigEndian => 0,
            LpcmSampleFormat::LittleEndian => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpcmDecoderConfig {
    pub sample_format: LpcmSampleFormat,
    pub sample_size: u8,
    pub sample_rate: u32,
}

impl Default for LpcmDecoderConfig {
    fn default() -> Self {
        Self {
            sample_format: LpcmSampleFormat::LittleEndian,
            sample_size: 16,
            sample_rate: 48000,
        }
    }
}

impl LpcmDecoderConfig {
    pub const REQUIRED_AUDIO_ROLL_DISTANCE: i16 = 0;

    pub fn validate(&self) -> Result<()> {
        if !VALID_SAMPLE_SIZES.contains(&self.sample_size) {
            bail!(CodecConfigError::InvalidLpcmSampleSize(self.sample_size));
        }

        if !VALID_SAMPLE_RATES.contains(&self.sample_rate) {
            bail!(CodecConfigError::InvalidLpcmSampleRate(self.sample_rate));
        }

        Ok(())
    }

    pub fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;
        wb.write_u8(self.sample_format.flags())?;
        wb.write_u8(self.sample_size)?;
        wb.write_u32(self.sample_rate)
    }

    pub fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let config = Self {
            sample_format: LpcmSampleFormat::from_flags(rb.read_u8()?)?,
            sample_size: rb.read_u8()?,
            sample_rate: rb.read_u32()?,
        };
        config.validate()?;

        Ok(config)
    }

    /// Bytes per sample of one channel.
    pub fn bytes_per_sample(&self) -> usize {
        self.sample_size as usize / 8
    }
}

#[test]
fn lpcm_layout() -> anyhow::Result<()> {
    let config = LpcmDecoderConfig {
        sample_format: LpcmSampleFormat::LittleEndian,
        sample_size: 24,
        sample_rate: 48000,
    };
    let mut wb = WriteBitBuffer::default();
    config.write(&mut wb)?;
    let bytes = wb.take_bytes()?;
    assert_eq!(bytes, [1, 24, 0x00, 0x00, 0xbb, 0x80]);

    let read = LpcmDecoderConfig::read(&mut ReadBitBuffer::from_slice(&bytes))?;
    assert_eq!(read, config);
    assert_eq!(read.bytes_per_sample(), 3);

    Ok(())
}

#[test]
fn lpcm_rejects_unsupported_values() {
    let bad_size = LpcmDecoderConfig {
        sample_size: 8,
        ..Default::default()
    };
    assert!(bad_size.validate().is_err());

    let bad_rate = LpcmDecoderConfig {
        sample_rate: 22050,
        ..Default::default()
    };
    assert!(bad_rate.validate().is_err());

    let mut rb = ReadBitBuffer::from_slice(&[2, 16, 0x00, 0x00, 0xbb, 0x80]);
    assert!(LpcmDecoderConfig::read(&mut rb).is_err());
}
