//! AAC-LC `DecoderConfigDescriptor` (ISO/IEC 14496-1) with its nested
//! `AudioSpecificConfig` (ISO/IEC 14496-3).
//!
//! Both descriptors are prefixed by a tag byte and an expanded size.

use anyhow::{Result, bail};

use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::CodecConfigError;

pub const DECODER_CONFIG_DESCRIPTOR_TAG: u8 = 0x04;
pub const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
pub const OBJECT_TYPE_INDICATION: u8 = 0x40;
pub const STREAM_TYPE: u8 = 0x05;
pub const AUDIO_OBJECT_TYPE: u8 = 2;
pub const CHANNEL_CONFIGURATION: u8 = 2;

/// Signals an explicit 24-bit sampling frequency.
pub const SAMPLE_FREQUENCY_INDEX_ESCAPE: u8 = 0xf;

const SAMPLE_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sample_frequency_index: u8,
    /// Only meaningful with [`SAMPLE_FREQUENCY_INDEX_ESCAPE`].
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
    pub frame_length_flag: bool,
    pub depends_on_core_coder: bool,
    pub extension_flag: bool,
}

impl Default for AudioSpecificConfig {
    fn default() -> Self {
        Self {
            audio_object_type: AUDIO_OBJECT_TYPE,
            sample_frequency_index: 3,
            sampling_frequency: 0,
            channel_configuration: CHANNEL_CONFIGURATION,
            frame_length_flag: false,
            depends_on_core_coder: false,
            extension_flag: false,
        }
    }
}

impl AudioSpecificConfig {
    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_unsigned_literal(self.audio_object_type as u64, 5)?;
        wb.write_unsigned_literal(self.sample_frequency_index as u64, 4)?;
        if self.sample_frequency_index == SAMPLE_FREQUENCY_INDEX_ESCAPE {
            wb.write_unsigned_literal(self.sampling_frequency as u64, 24)?;
        }
        wb.write_unsigned_literal(self.channel_configuration as u64, 4)?;
        wb.write_bool(self.frame_length_flag)?;
        wb.write_bool(self.depends_on_core_coder)?;
        wb.write_bool(self.extension_flag)
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let audio_object_type = rb.read_unsigned_literal(5)? as u8;
        let sample_frequency_index = rb.read_unsigned_literal(4)? as u8;
        let sampling_frequency = if sample_frequency_index == SAMPLE_FREQUENCY_INDEX_ESCAPE {
            rb.read_unsigned_literal(24)? as u32
        } else {
            0
        };

        Ok(Self {
            audio_object_type,
            sample_frequency_index,
            sampling_frequency,
            channel_configuration: rb.read_unsigned_literal(4)? as u8,
            frame_length_flag: rb.read_bool()?,
            depends_on_core_coder: rb.read_bool()?,
            extension_flag: rb.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacDecoderConfig {
    pub object_type_indication: u8,
    pub stream_type: u8,
    pub upstream: bool,
    pub reserved: bool,
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub average_bit_rate: u32,
    pub audio_specific_config: AudioSpecificConfig,
}

impl Default for AacDecoderConfig {
    fn default() -> Self {
        Self {
            object_type_indication: OBJECT_TYPE_INDICATION,
            stream_type: STREAM_TYPE,
            upstream: false,
            reserved: true,
            buffer_size_db: 0,
            max_bitrate: 0,
            average_bit_rate: 0,
            audio_specific_config: AudioSpecificConfig::default(),
        }
    }
}

impl AacDecoderConfig {
    pub const REQUIRED_AUDIO_ROLL_DISTANCE: i16 = -1;
    pub const BIT_DEPTH_TO_MEASURE_LOUDNESS: u8 = 16;

    pub fn validate(&self) -> Result<()> {
        let asc = &self.audio_specific_config;
        let pinned = [
            (
                "object_type_indication",
                OBJECT_TYPE_INDICATION as u32,
                self.object_type_indication as u32,
            ),
            ("stream_type", STREAM_TYPE as u32, self.stream_type as u32),
            ("upstream", 0, self.upstream as u32),
            ("reserved", 1, self.reserved as u32),
            (
                "audio_object_type",
                AUDIO_OBJECT_TYPE as u32,
                asc.audio_object_type as u32,
            ),
            (
                "channel_configuration",
                CHANNEL_CONFIGURATION as u32,
                asc.channel_configuration as u32,
            ),
            ("frame_length_flag", 0, asc.frame_length_flag as u32),
            ("depends_on_core_coder", 0, asc.depends_on_core_coder as u32),
            ("extension_flag", 0, asc.extension_flag as u32),
        ];
        for (field, expected, actual) in pinned {
            if expected != actual {
                bail!(CodecConfigError::InvalidAacField {
                    field,
                    expected,
                    actual,
                });
            }
        }

        if self.buffer_size_db >= 1 << 24 {
            bail!(CodecConfigError::InvalidAacField {
                field: "buffer_size_db",
                expected: (1 << 24) - 1,
                actual: self.buffer_size_db,
            });
        }

        Ok(())
    }

    pub fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        let mut asc = WriteBitBuffer::new(wb.leb_generator());
        self.audio_specific_config.write(&mut asc)?;
        let asc = asc.take_bytes()?;

        let mut dsi = WriteBitBuffer::new(wb.leb_generator());
        dsi.write_u8(DECODER_SPECIFIC_INFO_TAG)?;
        dsi.write_iso14496_1_expanded(asc.len() as u32)?;
        dsi.write_bytes(&asc)?;
        let dsi = dsi.take_bytes()?;

        let mut body = WriteBitBuffer::new(wb.leb_generator());
        body.write_u8(self.object_type_indication)?;
        body.write_unsigned_literal(self.stream_type as u64, 6)?;
        body.write_bool(self.upstream)?;
        body.write_bool(self.reserved)?;
        body.write_unsigned_literal(self.buffer_size_db as u64, 24)?;
        body.write_u32(self.max_bitrate)?;
        body.write_u32(self.average_bit_rate)?;
        body.write_bytes(&dsi)?;
        let body = body.take_bytes()?;

        wb.write_u8(DECODER_CONFIG_DESCRIPTOR_TAG)?;
        wb.write_iso14496_1_expanded(body.len() as u32)?;
        wb.write_bytes(&body)
    }

    pub fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let mut body = read_descriptor(rb, DECODER_CONFIG_DESCRIPTOR_TAG, "decoder_config_descriptor_tag")?;

        let object_type_indication = body.read_u8()?;
        let stream_type = body.read_unsigned_literal(6)? as u8;
        let upstream = body.read_bool()?;
        let reserved = body.read_bool()?;
        let buffer_size_db = body.read_unsigned_literal(24)? as u32;
        let max_bitrate = body.read_u32()?;
        let average_bit_rate = body.read_u32()?;

        let mut dsi = read_descriptor(&mut body, DECODER_SPECIFIC_INFO_TAG, "decoder_specific_info_tag")?;
        let audio_specific_config = AudioSpecificConfig::read(&mut dsi)?;

        let config = Self {
            object_type_indication,
            stream_type,
            upstream,
            reserved,
            buffer_size_db,
            max_bitrate,
            average_bit_rate,
            audio_specific_config,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn output_sample_rate(&self) -> Result<u32> {
        let asc = &self.audio_specific_config;
        match asc.sample_frequency_index {
            SAMPLE_FREQUENCY_INDEX_ESCAPE => Ok(asc.sampling_frequency),
            index @ (13 | 14) => bail!(CodecConfigError::ReservedAacFrequencyIndex(index)),
            index => Ok(SAMPLE_FREQUENCIES[index as usize]),
        }
    }
}

/// Reads a tagged descriptor and returns its body. Trailing extension descriptors
/// inside the body are left for the caller to ignore.
fn read_descriptor(rb: &mut ReadBitBuffer, tag: u8, field: &'static str) -> Result<ReadBitBuffer> {
    let actual = rb.read_u8()?;
    if actual != tag {
        bail!(CodecConfigError::InvalidAacField {
            field,
            expected: tag as u32,
            actual: actual as u32,
        });
    }

    let size = rb.read_iso14496_1_expanded()?;
    let bytes = rb.read_bytes(size as usize)?;
    Ok(ReadBitBuffer::from_slice(&bytes))
}
