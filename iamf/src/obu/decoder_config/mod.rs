//! Codec-specific `decoder_config` payloads of the codec config OBU.

pub mod aac;
pub mod flac;
pub mod lpcm;
pub mod opus;

use anyhow::{Result, bail};

use crate::obu::codec_config::CodecId;
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::CodecConfigError;

pub use aac::AacDecoderConfig;
pub use flac::FlacDecoderConfig;
pub use lpcm::LpcmDecoderConfig;
pub use opus::OpusDecoderConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderConfig {
    Lpcm(LpcmDecoderConfig),
    Opus(OpusDecoderConfig),
    Aac(AacDecoderConfig),
    Flac(FlacDecoderConfig),
}

impl DecoderConfig {
    pub fn codec_id(&self) -> CodecId {
        match self {
            DecoderConfig::Lpcm(_) => CodecId::Lpcm,
            DecoderConfig::Opus(_) => CodecId::Opus,
            DecoderConfig::Aac(_) => CodecId::AacLc,
            DecoderConfig::Flac(_) => CodecId::Flac,
        }
    }

    pub fn required_audio_roll_distance(&self, num_samples_per_frame: u32) -> i16 {
        match self {
            DecoderConfig::Lpcm(_) => LpcmDecoderConfig::REQUIRED_AUDIO_ROLL_DISTANCE,
            DecoderConfig::Opus(_) => {
                OpusDecoderConfig::required_audio_roll_distance(num_samples_per_frame)
            }
            DecoderConfig::Aac(_) => AacDecoderConfig::REQUIRED_AUDIO_ROLL_DISTANCE,
            DecoderConfig::Flac(_) => FlacDecoderConfig::REQUIRED_AUDIO_ROLL_DISTANCE,
        }
    }

    pub fn validate_audio_roll_distance(
        &self,
        num_samples_per_frame: u32,
        audio_roll_distance: i16,
    ) -> Result<()> {
        let expected = self.required_audio_roll_distance(num_samples_per_frame);
        if audio_roll_distance != expected {
            bail!(CodecConfigError::InvalidRollDistance {
                expected,
                actual: audio_roll_distance,
            });
        }

        Ok(())
    }

    pub fn write(&self, num_samples_per_frame: u32, wb: &mut WriteBitBuffer) -> Result<()> {
        match self {
            DecoderConfig::Lpcm(config) => config.write(wb),
            DecoderConfig::Opus(config) => config.write(wb),
            DecoderConfig::Aac(config) => config.write(wb),
            DecoderConfig::Flac(config) => config.write(num_samples_per_frame, wb),
        }
    }

    pub fn read(codec_id: CodecId, num_samples_per_frame: u32, rb: &mut ReadBitBuffer) -> Result<Self> {
        Ok(match codec_id {
            CodecId::Lpcm => DecoderConfig::Lpcm(LpcmDecoderConfig::read(rb)?),
            CodecId::Opus => DecoderConfig::Opus(OpusDecoderConfig::read(rb)?),
            CodecId::AacLc => DecoderConfig::Aac(AacDecoderConfig::read(rb)?),
            CodecId::Flac => DecoderConfig::Flac(FlacDecoderConfig::read(num_samples_per_frame, rb)?),
        })
    }

    /// Sample rate of the decoded PCM.
    pub fn output_sample_rate(&self) -> Result<u32> {
        match self {
            DecoderConfig::Lpcm(config) => Ok(config.sample_rate),
            DecoderConfig::Opus(_) => Ok(OpusDecoderConfig::OUTPUT_SAMPLE_RATE),
            DecoderConfig::Aac(config) => config.output_sample_rate(),
            DecoderConfig::Flac(config) => config.output_sample_rate(),
        }
    }

    /// Sample rate of the audio that was fed to the encoder.
    pub fn input_sample_rate(&self) -> Result<u32> {
        match self {
            DecoderConfig::Opus(config) => Ok(config.input_sample_rate),
            _ => self.output_sample_rate(),
        }
    }

    pub fn bit_depth_to_measure_loudness(&self) -> Result<u8> {
        match self {
            DecoderConfig::Lpcm(config) => Ok(config.sample_size),
            DecoderConfig::Opus(_) => Ok(OpusDecoderConfig::BIT_DEPTH_TO_MEASURE_LOUDNESS),
            DecoderConfig::Aac(_) => Ok(AacDecoderConfig::BIT_DEPTH_TO_MEASURE_LOUDNESS),
            DecoderConfig::Flac(config) => config.bit_depth_to_measure_loudness(),
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, DecoderConfig::Lpcm(_) | DecoderConfig::Flac(_))
    }
}
