use anyhow::{Result, bail};

use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::CodecConfigError;

/// Highest major version (upper nibble of `version`) this crate understands.
const OPUS_MAJOR_VERSION: u8 = 0;
const AUDIO_ROLL_DIVIDEND: u32 = 3840;

/// Opus identification header fields, minus the magic and channel mapping.
///
/// The channel count, gain and mapping family are pinned by IAMF; the real channel
/// layout comes from the audio element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusDecoderConfig {
    pub version: u8,
    pub output_channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub mapping_family: u8,
}

impl Default for OpusDecoderConfig {
    fn default() -> Self {
        Self {
            version: 1,
            output_channel_count: Self::OUTPUT_CHANNEL_COUNT,
            pre_skip: 312,
            input_sample_rate: 48000,
            output_gain: Self::OUTPUT_GAIN,
            mapping_family: Self::MAPPING_FAMILY,
        }
    }
}

impl OpusDecoderConfig {
    pub const OUTPUT_CHANNEL_COUNT: u8 = 2;
    pub const OUTPUT_GAIN: i16 = 0;
    pub const MAPPING_FAMILY: u8 = 0;
    pub const OUTPUT_SAMPLE_RATE: u32 = 48000;
    pub const BIT_DEPTH_TO_MEASURE_LOUDNESS: u8 = 16;

    /// `-ceil(3840 / num_samples_per_frame)`.
    pub fn required_audio_roll_distance(num_samples_per_frame: u32) -> i16 {
        let frames = AUDIO_ROLL_DIVIDEND.div_ceil(num_samples_per_frame.max(1));
        -(frames as i16)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            bail!(CodecConfigError::InvalidOpusField {
                field: "version",
                expected: 1,
                actual: 0,
            });
        }

        if self.version >> 4 > OPUS_MAJOR_VERSION {
            bail!(CodecConfigError::InvalidOpusField {
                field: "major version",
                expected: OPUS_MAJOR_VERSION as i64,
                actual: (self.version >> 4) as i64,
            });
        }

        let pinned = [
            (
                "output_channel_count",
                Self::OUTPUT_CHANNEL_COUNT as i64,
                self.output_channel_count as i64,
            ),
            ("output_gain", Self::OUTPUT_GAIN as i64, self.output_gain as i64),
            (
                "mapping_family",
                Self::MAPPING_FAMILY as i64,
                self.mapping_family as i64,
            ),
        ];
        for (field, expected, actual) in pinned {
            if expected != actual {
                bail!(CodecConfigError::InvalidOpusField {
                    field,
                    expected,
                    actual,
                });
            }
        }

        Ok(())
    }

    pub fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;
        wb.write_u8(self.version)?;
        wb.write_u8(self.output_channel_count)?;
        wb.write_u16(self.pre_skip)?;
        wb.write_u32(self.input_sample_rate)?;
        wb.write_signed16(self.output_gain)?;
        wb.write_u8(self.mapping_family)
    }

    pub fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let config = Self {
            version: rb.read_u8()?,
            output_channel_count: rb.read_u8()?,
            pre_skip: rb.read_u16()?,
            input_sample_rate: rb.read_u32()?,
            output_gain: rb.read_signed16()?,
            mapping_family: rb.read_u8()?,
        };
        config.validate()?;

        Ok(config)
    }
}

#[test]
fn opus_roll_distance() {
    assert_eq!(OpusDecoderConfig::required_audio_roll_distance(960), -4);
    assert_eq!(OpusDecoderConfig::required_audio_roll_distance(1000), -4);
    assert_eq!(OpusDecoderConfig::required_audio_roll_distance(3840), -1);
    assert_eq!(OpusDecoderConfig::required_audio_roll_distance(120), -32);
}

#[test]
fn opus_layout() -> anyhow::Result<()> {
    let config = OpusDecoderConfig::default();
    let mut wb = WriteBitBuffer::default();
    config.write(&mut wb)?;
    let bytes = wb.take_bytes()?;
    assert_eq!(bytes, [1, 2, 0x01, 0x38, 0x00, 0x00, 0xbb, 0x80, 0x00, 0x00, 0]);

    let read = OpusDecoderConfig::read(&mut ReadBitBuffer::from_slice(&bytes))?;
    assert_eq!(read, config);

    Ok(())
}

#[test]
fn opus_pinned_fields() {
    for config in [
        OpusDecoderConfig {
            version: 0,
            ..Default::default()
        },
        OpusDecoderConfig {
            version: 0x10,
            ..Default::default()
        },
        OpusDecoderConfig {
            output_channel_count: 1,
            ..Default::default()
        },
        OpusDecoderConfig {
            output_gain: 1,
            ..Default::default()
        },
        OpusDecoderConfig {
            mapping_family: 1,
            ..Default::default()
        },
    ] {
        assert!(config.validate().is_err(), "{config:?}");
    }
}
