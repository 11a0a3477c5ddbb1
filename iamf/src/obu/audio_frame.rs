use anyhow::{Result, bail};
use log::trace;

use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::{ObuBase, read_payload};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::ObuError;
use crate::utils::leb128::DecodedUleb128;

/// One coded frame of a single substream.
///
/// Substreams 0..=17 are addressed through the `obu_type`; larger ids use
/// [`ObuType::AudioFrame`] with the id as a ULEB128 prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrameObu {
    pub header: ObuHeader,
    pub audio_substream_id: DecodedUleb128,
    pub audio_frame: Vec<u8>,
}

impl AudioFrameObu {
    /// Builds a frame, choosing the compact obu type when the id allows it.
    pub fn new(mut header: ObuHeader, audio_substream_id: DecodedUleb128, audio_frame: Vec<u8>) -> Self {
        header.obu_type = ObuType::for_substream(audio_substream_id);
        Self {
            header,
            audio_substream_id,
            audio_frame,
        }
    }

    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        read_payload(payload_size, rb, |rb| {
            let audio_substream_id = match header.obu_type {
                ObuType::AudioFrame => rb.read_uleb128()?,
                ObuType::AudioFrameId(id) => id as u32,
                other => bail!(ObuError::UnexpectedObu(other)),
            };
            let audio_frame = rb.read_bytes(rb.num_bytes_available())?;

            trace!(
                "audio frame: substream={audio_substream_id} size={} trim=({}, {})",
                audio_frame.len(),
                header.num_samples_to_trim_at_start,
                header.num_samples_to_trim_at_end
            );

            Ok(Self {
                header,
                audio_substream_id,
                audio_frame,
            })
        })
    }
}

impl ObuBase for AudioFrameObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        match self.header.obu_type {
            ObuType::AudioFrame => wb.write_uleb128(self.audio_substream_id)?,
            ObuType::AudioFrameId(id) if id as u32 == self.audio_substream_id => {}
            obu_type => bail!(ObuError::SubstreamIdMismatch {
                id: self.audio_substream_id,
                obu_type,
            }),
        }

        wb.write_bytes(&self.audio_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(obu: &AudioFrameObu) -> Result<Vec<u8>> {
        let mut wb = WriteBitBuffer::default();
        obu.validate_and_write(&mut wb)?;
        wb.take_bytes()
    }

    #[test]
    fn implicit_substream_id_boundary() -> anyhow::Result<()> {
        let implicit = AudioFrameObu::new(ObuHeader::new(ObuType::AudioFrame), 17, vec![0xaa]);
        assert_eq!(implicit.header.obu_type, ObuType::AudioFrameId(17));
        assert_eq!(write(&implicit)?, [23 << 3, 1, 0xaa]);

        let explicit = AudioFrameObu::new(ObuHeader::new(ObuType::AudioFrame), 18, vec![0xaa]);
        assert_eq!(explicit.header.obu_type, ObuType::AudioFrame);
        let bytes = write(&explicit)?;
        assert_eq!(bytes, [5 << 3, 2, 0x12, 0xaa]);

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let (header, payload_size) = ObuHeader::read_and_validate(&mut rb)?;
        assert_eq!(AudioFrameObu::create_from_buffer(header, payload_size, &mut rb)?, explicit);

        Ok(())
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let mut obu = AudioFrameObu::new(ObuHeader::new(ObuType::AudioFrame), 3, vec![]);
        obu.header.obu_type = ObuType::AudioFrameId(4);
        assert!(write(&obu).is_err());
    }

    #[test]
    fn trimmed_frame_round_trip() -> anyhow::Result<()> {
        let header = ObuHeader::new(ObuType::AudioFrame).with_trimming(2, 6);
        let obu = AudioFrameObu::new(header, 0, vec![0; 32]);
        let bytes = write(&obu)?;

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let (header, payload_size) = ObuHeader::read_and_validate(&mut rb)?;
        assert_eq!(payload_size, 32);
        assert_eq!(AudioFrameObu::create_from_buffer(header, payload_size, &mut rb)?, obu);

        Ok(())
    }
}
