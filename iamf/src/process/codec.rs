//! Substream codecs.
//!
//! Samples cross these traits as left-justified 32-bit integers organised as
//! `[sample_index][channel_index]`. Only LPCM ships with the crate; other
//! codecs are plugged in through the factory callables.

use std::collections::VecDeque;

use anyhow::{Result, bail};

use crate::obu::codec_config::CodecConfigObu;
use crate::obu::decoder_config::DecoderConfig;
use crate::obu::decoder_config::lpcm::{LpcmDecoderConfig, LpcmSampleFormat};
use crate::utils::errors::{DecoderError, EncoderError};

pub trait SubstreamEncoder {
    /// Encodes one frame of `[sample][channel]` samples.
    fn encode_frame(&mut self, samples: &[Vec<i32>]) -> Result<()>;

    /// Returns the next coded frame, if the codec has produced one.
    fn pop_frame(&mut self) -> Option<Vec<u8>>;

    /// Flushes frames held back by codec delay.
    fn finalize(&mut self) -> Result<()>;
}

pub trait SubstreamDecoder {
    /// Decodes one frame into `[sample][channel]` samples.
    fn decode_frame(&mut self, frame: &[u8]) -> Result<Vec<Vec<i32>>>;
}

/// Builds an encoder for a codec config and channel count, or `None` if the
/// codec is not handled.
pub type SubstreamEncoderFactory =
    Box<dyn Fn(&CodecConfigObu, usize) -> Option<Box<dyn SubstreamEncoder>>>;

pub type SubstreamDecoderFactory =
    Box<dyn Fn(&CodecConfigObu, usize) -> Option<Box<dyn SubstreamDecoder>>>;

fn lpcm_config(codec_config: &CodecConfigObu) -> Option<&LpcmDecoderConfig> {
    match &codec_config.decoder_config {
        DecoderConfig::Lpcm(config) => Some(config),
        _ => None,
    }
}

/// Tries `factory` first, then the built-in codecs.
pub fn create_substream_encoder(
    factory: Option<&SubstreamEncoderFactory>,
    codec_config: &CodecConfigObu,
    num_channels: usize,
) -> Result<Box<dyn SubstreamEncoder>> {
    if let Some(encoder) = factory.and_then(|f| f(codec_config, num_channels)) {
        return Ok(encoder);
    }

    match lpcm_config(codec_config) {
        Some(config) => Ok(Box::new(LpcmEncoder::new(config, num_channels))),
        None => bail!(EncoderError::NoSubstreamEncoder(codec_config.codec_id())),
    }
}

pub fn create_substream_decoder(
    factory: Option<&SubstreamDecoderFactory>,
    codec_config: &CodecConfigObu,
    num_channels: usize,
) -> Result<Box<dyn SubstreamDecoder>> {
    if let Some(decoder) = factory.and_then(|f| f(codec_config, num_channels)) {
        return Ok(decoder);
    }

    match lpcm_config(codec_config) {
        Some(config) => Ok(Box::new(LpcmDecoder::new(config, num_channels))),
        None => bail!(DecoderError::NoSubstreamDecoder(codec_config.codec_id())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcmFormat {
    sample_format: LpcmSampleFormat,
    bytes_per_sample: usize,
}

impl PcmFormat {
    fn new(config: &LpcmDecoderConfig) -> Self {
        Self {
            sample_format: config.sample_format,
            bytes_per_sample: config.bytes_per_sample(),
        }
    }

    fn pack(self, sample: i32, out: &mut Vec<u8>) {
        let bytes = sample.to_le_bytes();
        let significant = &bytes[4 - self.bytes_per_sample..];
        match self.sample_format {
            LpcmSampleFormat::LittleEndian => out.extend_from_slice(significant),
            LpcmSampleFormat::BigEndian => out.extend(significant.iter().rev()),
        }
    }

    fn unpack(self, chunk: &[u8]) -> i32 {
        let mut bytes = [0u8; 4];
        let significant = &mut bytes[4 - self.bytes_per_sample..];
        significant.copy_from_slice(chunk);
        if self.sample_format == LpcmSampleFormat::BigEndian {
            significant.reverse();
        }
        i32::from_le_bytes(bytes)
    }
}

/// Interleaves samples at the configured size and byte order.
#[derive(Debug)]
pub struct LpcmEncoder {
    format: PcmFormat,
    num_channels: usize,
    frames: VecDeque<Vec<u8>>,
}

impl LpcmEncoder {
    pub fn new(config: &LpcmDecoderConfig, num_channels: usize) -> Self {
        Self {
            format: PcmFormat::new(config),
            num_channels,
            frames: VecDeque::new(),
        }
    }
}

impl SubstreamEncoder for LpcmEncoder {
    fn encode_frame(&mut self, samples: &[Vec<i32>]) -> Result<()> {
        let mut frame = Vec::with_capacity(samples.len() * self.num_channels * self.format.bytes_per_sample);
        for (index, tick) in samples.iter().enumerate() {
            if tick.len() != self.num_channels {
                bail!(EncoderError::RaggedFrame {
                    index,
                    expected: self.num_channels,
                    actual: tick.len(),
                });
            }
            for &sample in tick {
                self.format.pack(sample, &mut frame);
            }
        }

        self.frames.push_back(frame);
        Ok(())
    }

    fn pop_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct LpcmDecoder {
    format: PcmFormat,
    num_channels: usize,
}

impl LpcmDecoder {
    pub fn new(config: &LpcmDecoderConfig, num_channels: usize) -> Self {
        Self {
            format: PcmFormat::new(config),
            num_channels,
        }
    }
}

impl SubstreamDecoder for LpcmDecoder {
    fn decode_frame(&mut self, frame: &[u8]) -> Result<Vec<Vec<i32>>> {
        let unit = self.num_channels * self.format.bytes_per_sample;
        if unit == 0 || frame.len() % unit != 0 {
            bail!(DecoderError::FrameSizeMismatch {
                len: frame.len(),
                unit,
            });
        }

        Ok(frame
            .chunks_exact(unit)
            .map(|tick| {
                tick.chunks_exact(self.format.bytes_per_sample)
                    .map(|chunk| self.format.unpack(chunk))
                    .collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::decoder_config::opus::OpusDecoderConfig;
    use crate::utils::errors::{ErrorKind, error_kind};

    fn lpcm(sample_format: LpcmSampleFormat, sample_size: u8) -> LpcmDecoderConfig {
        LpcmDecoderConfig {
            sample_format,
            sample_size,
            sample_rate: 48000,
        }
    }

    #[test]
    fn lpcm_byte_order() -> anyhow::Result<()> {
        let samples = vec![vec![0x1234_0000, -0x0100_0000]];

        let mut le = LpcmEncoder::new(&lpcm(LpcmSampleFormat::LittleEndian, 16), 2);
        le.encode_frame(&samples)?;
        assert_eq!(le.pop_frame(), Some(vec![0x34, 0x12, 0x00, 0xff]));
        assert_eq!(le.pop_frame(), None);

        let mut be = LpcmEncoder::new(&lpcm(LpcmSampleFormat::BigEndian, 24), 2);
        be.encode_frame(&samples)?;
        let frame = be.pop_frame().unwrap_or_default();
        assert_eq!(frame, [0x12, 0x34, 0x00, 0xff, 0x00, 0x00]);

        let mut decoder = LpcmDecoder::new(&lpcm(LpcmSampleFormat::BigEndian, 24), 2);
        assert_eq!(decoder.decode_frame(&frame)?, samples);
        assert!(decoder.decode_frame(&frame[..5]).is_err());

        Ok(())
    }

    #[test]
    fn channel_count_is_checked() {
        let mut encoder = LpcmEncoder::new(&lpcm(LpcmSampleFormat::LittleEndian, 16), 2);
        assert!(encoder.encode_frame(&[vec![0]]).is_err());
    }

    #[test]
    fn unsupported_codecs() -> anyhow::Result<()> {
        let opus = CodecConfigObu::new(0, 960, DecoderConfig::Opus(OpusDecoderConfig::default()))?;

        let err = create_substream_decoder(None, &opus, 2).err();
        assert_eq!(err.map(|e| error_kind(&e)), Some(ErrorKind::Unimplemented));

        let factory: SubstreamDecoderFactory = Box::new(|_, channels| {
            Some(Box::new(LpcmDecoder::new(&LpcmDecoderConfig::default(), channels)))
        });
        assert!(create_substream_decoder(Some(&factory), &opus, 2).is_ok());

        Ok(())
    }
}
