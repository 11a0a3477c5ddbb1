//! Open Bitstream Units.
//!
//! Every OBU is a [`header::ObuHeader`] followed by a payload whose size the header
//! announces. Writers serialize the payload first so the header can carry its exact
//! length; readers bound each payload so that a parser can neither run past the
//! end of its OBU nor silently leave bytes behind.

pub mod arbitrary;
pub mod audio_element;
pub mod audio_frame;
pub mod codec_config;
pub mod decoder_config;
pub mod header;
pub mod ia_sequence_header;
pub mod mix_presentation;
pub mod param_definitions;
pub mod parameter_block;
pub mod temporal_delimiter;

use anyhow::{Result, bail};

use crate::obu::arbitrary::ArbitraryObu;
use crate::obu::audio_element::AudioElementObu;
use crate::obu::audio_frame::AudioFrameObu;
use crate::obu::codec_config::CodecConfigObu;
use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::ia_sequence_header::IaSequenceHeaderObu;
use crate::obu::mix_presentation::MixPresentationObu;
use crate::obu::parameter_block::ParameterBlockObu;
use crate::obu::temporal_delimiter::TemporalDelimiterObu;
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::{ObuError, is_resource_exhausted};

/// Shared serialization for every OBU.
pub trait ObuBase {
    fn header(&self) -> &ObuHeader;

    /// Validates the OBU and writes its payload, without the header.
    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()>;

    /// Writes the complete OBU: header, then payload.
    ///
    /// The payload is staged in a scratch buffer that uses the same LEB128
    /// generator as `wb`, so `obu_size` is known before the header goes out.
    fn validate_and_write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        let mut payload = WriteBitBuffer::new(wb.leb_generator());
        self.validate_and_write_payload(&mut payload)?;
        let payload = payload.take_bytes()?;

        self.header().validate_and_write(payload.len(), wb)?;
        wb.write_bytes(&payload)
    }
}

/// Runs `parse` over exactly `payload_size` bytes taken from `rb`.
///
/// The payload is consumed from `rb` up front. Bytes the parser leaves unread are a
/// [`ObuError::PayloadSizeMismatch`]; reading past the payload is a
/// [`ObuError::PayloadOverrun`], never a request for more data.
pub(crate) fn read_payload<T>(
    payload_size: u64,
    rb: &mut ReadBitBuffer,
    parse: impl FnOnce(&mut ReadBitBuffer) -> Result<T>,
) -> Result<T> {
    let mut sub = take_payload(payload_size, rb)?;
    let value = match parse(&mut sub) {
        Ok(value) => value,
        Err(e) if is_resource_exhausted(&e) => bail!(ObuError::PayloadOverrun {
            declared: payload_size,
            cause: e.to_string(),
        }),
        Err(e) => return Err(e),
    };

    let remaining = sub.num_bits_available();
    if remaining != 0 {
        bail!(ObuError::PayloadSizeMismatch {
            declared: payload_size,
            consumed: payload_size - remaining.div_ceil(8),
        });
    }

    Ok(value)
}

/// Moves `payload_size` bytes out of `rb` into a standalone buffer.
pub(crate) fn take_payload(payload_size: u64, rb: &mut ReadBitBuffer) -> Result<ReadBitBuffer> {
    let bytes = rb.read_bytes(payload_size as usize)?;
    Ok(ReadBitBuffer::from_slice(&bytes))
}

/// Any OBU the library can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Obu {
    IaSequenceHeader(IaSequenceHeaderObu),
    CodecConfig(CodecConfigObu),
    AudioElement(AudioElementObu),
    MixPresentation(MixPresentationObu),
    ParameterBlock(ParameterBlockObu),
    TemporalDelimiter(TemporalDelimiterObu),
    AudioFrame(AudioFrameObu),
    Arbitrary(ArbitraryObu),
}

impl Obu {
    pub fn obu_type(&self) -> ObuType {
        self.as_base().header().obu_type
    }

    fn as_base(&self) -> &dyn ObuBase {
        match self {
            Obu::IaSequenceHeader(obu) => obu,
            Obu::CodecConfig(obu) => obu,
            Obu::AudioElement(obu) => obu,
            Obu::MixPresentation(obu) => obu,
            Obu::ParameterBlock(obu) => obu,
            Obu::TemporalDelimiter(obu) => obu,
            Obu::AudioFrame(obu) => obu,
            Obu::Arbitrary(obu) => obu,
        }
    }
}

impl ObuBase for Obu {
    fn header(&self) -> &ObuHeader {
        self.as_base().header()
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.as_base().validate_and_write_payload(wb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::{ErrorKind, error_kind};

    #[test]
    fn read_payload_rejects_leftover_bytes() {
        let mut rb = ReadBitBuffer::from_slice(&[1, 2, 3]);
        let err = read_payload(2, &mut rb, |rb| rb.read_u8()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidArgument);
        // The whole payload was consumed regardless.
        assert_eq!(rb.num_bytes_available(), 1);
    }

    #[test]
    fn read_payload_rejects_overrun() {
        let mut rb = ReadBitBuffer::from_slice(&[1, 2, 3]);
        let err = read_payload(1, &mut rb, |rb| rb.read_u16()).unwrap_err();
        // The payload was complete, so this is malformed data rather than a short read.
        assert_eq!(error_kind(&err), ErrorKind::InvalidArgument);
        assert_eq!(rb.num_bytes_available(), 2);
    }

    #[test]
    fn short_outer_buffer_still_needs_more_data() {
        let mut rb = ReadBitBuffer::from_slice(&[1]);
        let err = read_payload(2, &mut rb, |rb| rb.read_u16()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn dispatch_writes_through_enum() -> anyhow::Result<()> {
        let obu = Obu::TemporalDelimiter(TemporalDelimiterObu::default());
        assert_eq!(obu.obu_type(), ObuType::TemporalDelimiter);

        let mut wb = WriteBitBuffer::default();
        obu.validate_and_write(&mut wb)?;
        assert_eq!(wb.take_bytes()?, [0x20, 0x00]);

        Ok(())
    }
}
