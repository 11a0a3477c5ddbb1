use anyhow::{Result, bail};
use log::{debug, warn};

use crate::obu::decoder_config::DecoderConfig;
use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::{ObuBase, read_payload};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::CodecConfigError;
use crate::utils::leb128::DecodedUleb128;

pub const MAX_SAMPLES_PER_FRAME: u32 = 96000;

/// Four-character codec identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Opus,
    Flac,
    Lpcm,
    AacLc,
}

impl CodecId {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match &value.to_be_bytes() {
            b"Opus" => CodecId::Opus,
            b"fLaC" => CodecId::Flac,
            b"ipcm" => CodecId::Lpcm,
            b"mp4a" => CodecId::AacLc,
            _ => bail!(CodecConfigError::UnknownCodecId(value)),
        })
    }

    pub fn as_u32(self) -> u32 {
        u32::from_be_bytes(*self.fourcc())
    }

    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            CodecId::Opus => b"Opus",
            CodecId::Flac => b"fLaC",
            CodecId::Lpcm => b"ipcm",
            CodecId::AacLc => b"mp4a",
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.fourcc()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfigObu {
    pub header: ObuHeader,
    pub codec_config_id: DecodedUleb128,
    pub num_samples_per_frame: DecodedUleb128,
    pub audio_roll_distance: i16,
    pub decoder_config: DecoderConfig,
}

impl CodecConfigObu {
    /// Builds a codec config whose roll distance is the one its codec requires.
    pub fn new(
        codec_config_id: DecodedUleb128,
        num_samples_per_frame: u32,
        decoder_config: DecoderConfig,
    ) -> Result<Self> {
        let obu = Self {
            header: ObuHeader::new(ObuType::CodecConfig),
            codec_config_id,
            num_samples_per_frame,
            audio_roll_distance: decoder_config.required_audio_roll_distance(num_samples_per_frame),
            decoder_config,
        };
        obu.validate()?;

        Ok(obu)
    }

    pub fn codec_id(&self) -> CodecId {
        self.decoder_config.codec_id()
    }

    pub fn output_sample_rate(&self) -> Result<u32> {
        self.decoder_config.output_sample_rate()
    }

    pub fn input_sample_rate(&self) -> Result<u32> {
        self.decoder_config.input_sample_rate()
    }

    pub fn bit_depth_to_measure_loudness(&self) -> Result<u8> {
        self.decoder_config.bit_depth_to_measure_loudness()
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_samples_per_frame == 0 || self.num_samples_per_frame > MAX_SAMPLES_PER_FRAME {
            bail!(CodecConfigError::InvalidFrameSize(self.num_samples_per_frame));
        }

        self.decoder_config
            .validate_audio_roll_distance(self.num_samples_per_frame, self.audio_roll_distance)?;

        // Derived values must be obtainable for every accepted config.
        self.output_sample_rate()?;
        self.bit_depth_to_measure_loudness()?;

        Ok(())
    }

    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        read_payload(payload_size, rb, |rb| {
            let codec_config_id = rb.read_uleb128()?;
            let codec_id = CodecId::from_u32(rb.read_u32()?)?;
            let num_samples_per_frame = rb.read_uleb128()?;
            if num_samples_per_frame == 0 || num_samples_per_frame > MAX_SAMPLES_PER_FRAME {
                bail!(CodecConfigError::InvalidFrameSize(num_samples_per_frame));
            }
            let audio_roll_distance = rb.read_signed16()?;
            let decoder_config = DecoderConfig::read(codec_id, num_samples_per_frame, rb)?;

            let obu = Self {
                header,
                codec_config_id,
                num_samples_per_frame,
                audio_roll_distance,
                decoder_config,
            };
            if let Err(e) = obu
                .decoder_config
                .validate_audio_roll_distance(num_samples_per_frame, audio_roll_distance)
            {
                // Decoders still work with an unexpected pre-roll.
                warn!("Codec config {codec_config_id}: {e}");
            }
            obu.output_sample_rate()?;
            obu.bit_depth_to_measure_loudness()?;

            debug!(
                "Codec config {}: codec={} samples_per_frame={} roll={} rate={:?}",
                obu.codec_config_id,
                obu.codec_id(),
                obu.num_samples_per_frame,
                obu.audio_roll_distance,
                obu.output_sample_rate().ok()
            );

            Ok(obu)
        })
    }
}

impl ObuBase for CodecConfigObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;
        wb.write_uleb128(self.codec_config_id)?;
        wb.write_u32(self.codec_id().as_u32())?;
        wb.write_uleb128(self.num_samples_per_frame)?;
        wb.write_signed16(self.audio_roll_distance)?;
        self.decoder_config.write(self.num_samples_per_frame, wb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::decoder_config::{LpcmDecoderConfig, OpusDecoderConfig};
    use crate::utils::errors::{ErrorKind, error_kind};

    fn lpcm(sample_rate: u32, sample_size: u8) -> DecoderConfig {
        DecoderConfig::Lpcm(LpcmDecoderConfig {
            sample_size,
            sample_rate,
            ..Default::default()
        })
    }

    #[test]
    fn codec_ids() -> anyhow::Result<()> {
        assert_eq!(CodecId::Opus.as_u32(), 0x4f70_7573);
        assert_eq!(CodecId::Flac.as_u32(), 0x664c_6143);
        assert_eq!(CodecId::Lpcm.as_u32(), 0x6970_636d);
        assert_eq!(CodecId::AacLc.as_u32(), 0x6d70_3461);
        assert_eq!(CodecId::from_u32(0x6970_636d)?, CodecId::Lpcm);
        assert!(CodecId::from_u32(0).is_err());
        assert_eq!(CodecId::Lpcm.to_string(), "ipcm");

        Ok(())
    }

    #[test]
    fn lpcm_codec_config_layout() -> anyhow::Result<()> {
        let obu = CodecConfigObu::new(0, 8, lpcm(16000, 16))?;
        let mut wb = WriteBitBuffer::default();
        obu.validate_and_write(&mut wb)?;
        let bytes = wb.take_bytes()?;

        #[rustfmt::skip]
        let expected = [
            0, 14,
            0, b'i', b'p', b'c', b'm', 8, 0, 0,
            1, 16, 0x00, 0x00, 0x3e, 0x80,
        ];
        assert_eq!(bytes, expected);

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let (header, payload_size) = ObuHeader::read_and_validate(&mut rb)?;
        let read = CodecConfigObu::create_from_buffer(header, payload_size, &mut rb)?;
        assert_eq!(read, obu);
        assert_eq!(read.output_sample_rate()?, 16000);
        assert_eq!(read.bit_depth_to_measure_loudness()?, 16);

        Ok(())
    }

    #[test]
    fn opus_roll_distance_is_derived() -> anyhow::Result<()> {
        let obu = CodecConfigObu::new(3, 960, DecoderConfig::Opus(OpusDecoderConfig::default()))?;
        assert_eq!(obu.audio_roll_distance, -4);
        assert_eq!(obu.output_sample_rate()?, 48000);

        let mut bad = obu.clone();
        bad.audio_roll_distance = 0;
        assert!(bad.validate().is_err());

        Ok(())
    }

    #[test]
    fn frame_size_bounds() {
        let err = CodecConfigObu::new(0, 0, lpcm(48000, 16)).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidArgument);
        assert!(CodecConfigObu::new(0, MAX_SAMPLES_PER_FRAME + 1, lpcm(48000, 16)).is_err());
        assert!(CodecConfigObu::new(0, MAX_SAMPLES_PER_FRAME, lpcm(48000, 16)).is_ok());
    }
}
