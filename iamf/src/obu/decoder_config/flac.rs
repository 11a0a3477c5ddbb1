//! FLAC metadata blocks carried in the codec config.
//!
//! The first block is always STREAMINFO. Other block types are carried as opaque
//! bytes.

use anyhow::{Result, bail};

use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::CodecConfigError;

pub const STREAM_INFO_BLOCK_LENGTH: u32 = 34;

const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 192000;
const MIN_BITS_PER_SAMPLE: u8 = 15;
const MAX_BITS_PER_SAMPLE: u8 = 31;
const MAX_TOTAL_SAMPLES: u64 = (1 << 36) - 1;
/// Raw field value IAMF requires; the field stores channel count minus one.
const NUMBER_OF_CHANNELS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlacBlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    Other(u8),
}

impl FlacBlockType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FlacBlockType::StreamInfo,
            1 => FlacBlockType::Padding,
            2 => FlacBlockType::Application,
            3 => FlacBlockType::SeekTable,
            4 => FlacBlockType::VorbisComment,
            5 => FlacBlockType::CueSheet,
            6 => FlacBlockType::Picture,
            other => FlacBlockType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FlacBlockType::StreamInfo => 0,
            FlacBlockType::Padding => 1,
            FlacBlockType::Application => 2,
            FlacBlockType::SeekTable => 3,
            FlacBlockType::VorbisComment => 4,
            FlacBlockType::CueSheet => 5,
            FlacBlockType::Picture => 6,
            FlacBlockType::Other(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacStreamInfo {
    pub minimum_block_size: u16,
    pub maximum_block_size: u16,
    pub minimum_frame_size: u32,
    pub maximum_frame_size: u32,
    pub sample_rate: u32,
    pub number_of_channels: u8,
    /// Raw field: bit depth minus one.
    pub bits_per_sample: u8,
    pub total_samples_in_stream: u64,
    pub md5_signature: [u8; 16],
}

impl FlacStreamInfo {
    pub fn new(num_samples_per_frame: u16, sample_rate: u32, bit_depth: u8) -> Self {
        Self {
            minimum_block_size: num_samples_per_frame,
            maximum_block_size: num_samples_per_frame,
            minimum_frame_size: 0,
            maximum_frame_size: 0,
            sample_rate,
            number_of_channels: NUMBER_OF_CHANNELS,
            bits_per_sample: bit_depth.saturating_sub(1),
            total_samples_in_stream: 0,
            md5_signature: [0; 16],
        }
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_u16(self.minimum_block_size)?;
        wb.write_u16(self.maximum_block_size)?;
        wb.write_unsigned_literal(self.minimum_frame_size as u64, 24)?;
        wb.write_unsigned_literal(self.maximum_frame_size as u64, 24)?;
        wb.write_unsigned_literal(self.sample_rate as u64, 20)?;
        wb.write_unsigned_literal(self.number_of_channels as u64, 3)?;
        wb.write_unsigned_literal(self.bits_per_sample as u64, 5)?;
        wb.write_unsigned_literal(self.total_samples_in_stream, 36)?;
        wb.write_bytes(&self.md5_signature)
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let mut info = Self {
            minimum_block_size: rb.read_u16()?,
            maximum_block_size: rb.read_u16()?,
            minimum_frame_size: rb.read_unsigned_literal(24)? as u32,
            maximum_frame_size: rb.read_unsigned_literal(24)? as u32,
            sample_rate: rb.read_unsigned_literal(20)? as u32,
            number_of_channels: rb.read_unsigned_literal(3)? as u8,
            bits_per_sample: rb.read_unsigned_literal(5)? as u8,
            total_samples_in_stream: rb.read_unsigned_literal(36)?,
            md5_signature: [0; 16],
        };
        info.md5_signature.copy_from_slice(&rb.read_bytes(16)?);

        Ok(info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlacBlockPayload {
    StreamInfo(FlacStreamInfo),
    Generic(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacMetadataBlock {
    pub last_metadata_block_flag: bool,
    pub block_type: FlacBlockType,
    pub payload: FlacBlockPayload,
}

impl FlacMetadataBlock {
    fn payload_length(&self) -> u32 {
        match &self.payload {
            FlacBlockPayload::StreamInfo(_) => STREAM_INFO_BLOCK_LENGTH,
            FlacBlockPayload::Generic(bytes) => bytes.len() as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacDecoderConfig {
    pub metadata_blocks: Vec<FlacMetadataBlock>,
}

impl FlacDecoderConfig {
    pub const REQUIRED_AUDIO_ROLL_DISTANCE: i16 = 0;

    pub fn new(stream_info: FlacStreamInfo) -> Self {
        Self {
            metadata_blocks: vec![FlacMetadataBlock {
                last_metadata_block_flag: true,
                block_type: FlacBlockType::StreamInfo,
                payload: FlacBlockPayload::StreamInfo(stream_info),
            }],
        }
    }

    pub fn stream_info(&self) -> Result<&FlacStreamInfo> {
        match self.metadata_blocks.first() {
            Some(FlacMetadataBlock {
                block_type: FlacBlockType::StreamInfo,
                payload: FlacBlockPayload::StreamInfo(info),
                ..
            }) => Ok(info),
            _ => bail!(CodecConfigError::FlacMissingStreamInfo),
        }
    }

    /// Constraints that hold for any FLAC stream IAMF accepts.
    pub fn validate_for_decoding(&self, num_samples_per_frame: u32) -> Result<()> {
        let last = self.metadata_blocks.len().saturating_sub(1);
        for (i, block) in self.metadata_blocks.iter().enumerate() {
            if block.last_metadata_block_flag != (i == last) {
                bail!(CodecConfigError::FlacMisplacedLastFlag);
            }
        }

        let info = self.stream_info()?;
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&info.sample_rate) {
            bail!(CodecConfigError::InvalidFlacStreamInfo {
                field: "sample_rate",
                value: info.sample_rate as u64,
            });
        }

        if !(MIN_BITS_PER_SAMPLE..=MAX_BITS_PER_SAMPLE).contains(&info.bits_per_sample) {
            bail!(CodecConfigError::InvalidFlacStreamInfo {
                field: "bits_per_sample",
                value: info.bits_per_sample as u64,
            });
        }

        for block in [info.minimum_block_size, info.maximum_block_size] {
            if block as u32 != num_samples_per_frame {
                bail!(CodecConfigError::FlacBlockSizeMismatch {
                    block,
                    frame: num_samples_per_frame,
                });
            }
        }

        if info.number_of_channels != NUMBER_OF_CHANNELS {
            bail!(CodecConfigError::InvalidFlacStreamInfo {
                field: "number_of_channels",
                value: info.number_of_channels as u64,
            });
        }

        if info.total_samples_in_stream > MAX_TOTAL_SAMPLES {
            bail!(CodecConfigError::InvalidFlacStreamInfo {
                field: "total_samples_in_stream",
                value: info.total_samples_in_stream,
            });
        }

        Ok(())
    }

    /// Decoding constraints plus the fields an encoder must leave unset.
    pub fn validate_for_encoding(&self, num_samples_per_frame: u32) -> Result<()> {
        self.validate_for_decoding(num_samples_per_frame)?;

        let info = self.stream_info()?;
        for (field, value) in [
            ("minimum_frame_size", info.minimum_frame_size),
            ("maximum_frame_size", info.maximum_frame_size),
        ] {
            if value != 0 {
                bail!(CodecConfigError::InvalidFlacStreamInfo {
                    field,
                    value: value as u64,
                });
            }
        }

        if info.md5_signature != [0; 16] {
            bail!(CodecConfigError::InvalidFlacStreamInfo {
                field: "md5_signature",
                value: 0,
            });
        }

        Ok(())
    }

    pub fn write(&self, num_samples_per_frame: u32, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate_for_encoding(num_samples_per_frame)?;

        for block in &self.metadata_blocks {
            wb.write_bool(block.last_metadata_block_flag)?;
            wb.write_unsigned_literal(block.block_type.as_u8() as u64, 7)?;
            wb.write_unsigned_literal(block.payload_length() as u64, 24)?;
            match &block.payload {
                FlacBlockPayload::StreamInfo(info) => info.write(wb)?,
                FlacBlockPayload::Generic(bytes) => wb.write_bytes(bytes)?,
            }
        }

        Ok(())
    }

    pub fn read(num_samples_per_frame: u32, rb: &mut ReadBitBuffer) -> Result<Self> {
        let mut metadata_blocks = Vec::new();
        loop {
            let last_metadata_block_flag = rb.read_bool()?;
            let block_type = FlacBlockType::from_u8(rb.read_unsigned_literal(7)? as u8);
            let length = rb.read_unsigned_literal(24)? as usize;

            let payload = match block_type {
                FlacBlockType::StreamInfo => {
                    if length != STREAM_INFO_BLOCK_LENGTH as usize {
                        bail!(CodecConfigError::InvalidFlacStreamInfo {
                            field: "metadata_data_block_length",
                            value: length as u64,
                        });
                    }
                    FlacBlockPayload::StreamInfo(FlacStreamInfo::read(rb)?)
                }
                _ => FlacBlockPayload::Generic(rb.read_bytes(length)?),
            };

            metadata_blocks.push(FlacMetadataBlock {
                last_metadata_block_flag,
                block_type,
                payload,
            });

            if last_metadata_block_flag {
                break;
            }
        }

        let config = Self { metadata_blocks };
        config.validate_for_decoding(num_samples_per_frame)?;

        Ok(config)
    }

    pub fn output_sample_rate(&self) -> Result<u32> {
        Ok(self.stream_info()?.sample_rate)
    }

    pub fn bit_depth_to_measure_loudness(&self) -> Result<u8> {
        Ok(self.stream_info()?.bits_per_sample + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_info_layout() -> anyhow::Result<()> {
        let config = FlacDecoderConfig::new(FlacStreamInfo::new(1024, 48000, 16));
        let mut wb = WriteBitBuffer::default();
        config.write(1024, &mut wb)?;
        let bytes = wb.take_bytes()?;

        assert_eq!(bytes.len(), 4 + STREAM_INFO_BLOCK_LENGTH as usize);
        assert_eq!(&bytes[..4], [0x80, 0, 0, 34]);
        assert_eq!(&bytes[4..8], [0x04, 0x00, 0x04, 0x00]);

        let read = FlacDecoderConfig::read(1024, &mut ReadBitBuffer::from_slice(&bytes))?;
        assert_eq!(read, config);
        assert_eq!(read.output_sample_rate()?, 48000);
        assert_eq!(read.bit_depth_to_measure_loudness()?, 16);

        Ok(())
    }

    #[test]
    fn generic_blocks_follow_stream_info() -> anyhow::Result<()> {
        let mut config = FlacDecoderConfig::new(FlacStreamInfo::new(960, 48000, 24));
        config.metadata_blocks[0].last_metadata_block_flag = false;
        config.metadata_blocks.push(FlacMetadataBlock {
            last_metadata_block_flag: true,
            block_type: FlacBlockType::Padding,
            payload: FlacBlockPayload::Generic(vec![0; 3]),
        });

        let mut wb = WriteBitBuffer::default();
        config.write(960, &mut wb)?;
        let bytes = wb.take_bytes()?;
        let read = FlacDecoderConfig::read(960, &mut ReadBitBuffer::from_slice(&bytes))?;
        assert_eq!(read.metadata_blocks.len(), 2);
        assert_eq!(read.metadata_blocks[1].payload, FlacBlockPayload::Generic(vec![0; 3]));

        Ok(())
    }

    #[test]
    fn validation() {
        let config = FlacDecoderConfig::new(FlacStreamInfo::new(1024, 48000, 16));
        assert!(config.validate_for_decoding(960).is_err());

        let mut misplaced = config.clone();
        misplaced.metadata_blocks[0].last_metadata_block_flag = false;
        assert!(misplaced.validate_for_decoding(1024).is_err());

        let mut md5 = FlacStreamInfo::new(1024, 48000, 16);
        md5.md5_signature[0] = 1;
        let md5 = FlacDecoderConfig::new(md5);
        assert!(md5.validate_for_decoding(1024).is_ok());
        assert!(md5.validate_for_encoding(1024).is_err());

        let low_rate = FlacDecoderConfig::new(FlacStreamInfo::new(1024, 4000, 16));
        assert!(low_rate.validate_for_decoding(1024).is_err());

        assert!(FlacDecoderConfig { metadata_blocks: vec![] }.stream_info().is_err());
    }
}
