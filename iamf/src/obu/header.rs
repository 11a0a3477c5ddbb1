//! OBU header.
//!
//! ```text
//! | obu_type:5 | obu_redundant_copy:1 | obu_trimming_status_flag:1 | obu_extension_flag:1 |
//! | obu_size: leb128 |
//! [ num_samples_to_trim_at_end: leb128, num_samples_to_trim_at_start: leb128 ]
//! [ extension_header_size: leb128, extension_header_bytes ]
//! ```
//!
//! `obu_size` counts everything after itself, so it includes the optional trimming
//! and extension fields as well as the payload.

use anyhow::{Result, bail};
use log::trace;

use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::ObuError;

/// Upper bound on a whole OBU, header included.
pub const MAX_OBU_SIZE: u64 = 2 * 1024 * 1024;

/// Number of audio frame types with an implicit substream id.
pub const NUM_IMPLICIT_AUDIO_FRAME_IDS: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObuType {
    CodecConfig,
    AudioElement,
    MixPresentation,
    ParameterBlock,
    TemporalDelimiter,
    /// Audio frame with an explicit substream id in the payload.
    AudioFrame,
    /// Audio frame for substream 0..=17, id implied by the type.
    AudioFrameId(u8),
    Reserved(u8),
    IaSequenceHeader,
}

impl ObuType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ObuType::CodecConfig,
            1 => ObuType::AudioElement,
            2 => ObuType::MixPresentation,
            3 => ObuType::ParameterBlock,
            4 => ObuType::TemporalDelimiter,
            5 => ObuType::AudioFrame,
            6..=23 => ObuType::AudioFrameId(code - 6),
            31 => ObuType::IaSequenceHeader,
            _ => ObuType::Reserved(code & 0x1f),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ObuType::CodecConfig => 0,
            ObuType::AudioElement => 1,
            ObuType::MixPresentation => 2,
            ObuType::ParameterBlock => 3,
            ObuType::TemporalDelimiter => 4,
            ObuType::AudioFrame => 5,
            ObuType::AudioFrameId(id) => 6 + id,
            ObuType::Reserved(code) => code,
            ObuType::IaSequenceHeader => 31,
        }
    }

    /// Type used to carry a frame for `substream_id`.
    pub fn for_substream(substream_id: u32) -> Self {
        if substream_id < NUM_IMPLICIT_AUDIO_FRAME_IDS {
            ObuType::AudioFrameId(substream_id as u8)
        } else {
            ObuType::AudioFrame
        }
    }

    pub fn is_audio_frame(self) -> bool {
        matches!(self, ObuType::AudioFrame | ObuType::AudioFrameId(_))
    }

    /// Types that only appear inside temporal units.
    pub fn is_temporal_unit_obu(self) -> bool {
        self.is_audio_frame()
            || matches!(self, ObuType::ParameterBlock | ObuType::TemporalDelimiter)
    }

    pub fn is_descriptor(self) -> bool {
        matches!(
            self,
            ObuType::IaSequenceHeader
                | ObuType::CodecConfig
                | ObuType::AudioElement
                | ObuType::MixPresentation
        )
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, ObuType::Reserved(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: ObuType,
    pub obu_redundant_copy: bool,
    pub obu_trimming_status_flag: bool,
    pub obu_extension_flag: bool,
    pub num_samples_to_trim_at_end: u32,
    pub num_samples_to_trim_at_start: u32,
    pub extension_header_bytes: Vec<u8>,
}

impl ObuHeader {
    pub fn new(obu_type: ObuType) -> Self {
        Self {
            obu_type,
            obu_redundant_copy: false,
            obu_trimming_status_flag: false,
            obu_extension_flag: false,
            num_samples_to_trim_at_end: 0,
            num_samples_to_trim_at_start: 0,
            extension_header_bytes: Vec::new(),
        }
    }

    pub fn with_trimming(mut self, at_start: u32, at_end: u32) -> Self {
        self.obu_trimming_status_flag = true;
        self.num_samples_to_trim_at_start = at_start;
        self.num_samples_to_trim_at_end = at_end;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let obu_type = self.obu_type;

        if self.obu_redundant_copy && obu_type.is_temporal_unit_obu() {
            bail!(ObuError::IllegalRedundantCopy(obu_type));
        }

        if self.obu_trimming_status_flag && !obu_type.is_audio_frame() {
            bail!(ObuError::IllegalTrimming(obu_type));
        }

        if !self.obu_extension_flag && !self.extension_header_bytes.is_empty() {
            bail!(ObuError::ExtensionSizeMismatch {
                declared: 0,
                actual: self.extension_header_bytes.len(),
            });
        }

        Ok(())
    }

    /// Bytes of the optional fields that `obu_size` covers besides the payload.
    fn optional_fields(&self, wb: &WriteBitBuffer) -> Result<Vec<u8>> {
        let mut fields = WriteBitBuffer::new(wb.leb_generator());

        if self.obu_trimming_status_flag {
            fields.write_uleb128(self.num_samples_to_trim_at_end)?;
            fields.write_uleb128(self.num_samples_to_trim_at_start)?;
        }

        if self.obu_extension_flag {
            fields.write_uleb128(self.extension_header_bytes.len() as u32)?;
            fields.write_bytes(&self.extension_header_bytes)?;
        }

        fields.take_bytes()
    }

    /// Writes the header for a payload of `payload_size` bytes.
    pub fn validate_and_write(&self, payload_size: usize, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        let fields = self.optional_fields(wb)?;
        let obu_size = (fields.len() + payload_size) as u64;
        if obu_size > MAX_OBU_SIZE {
            bail!(ObuError::ObuTooLarge(obu_size));
        }

        wb.write_unsigned_literal(self.obu_type.code() as u64, 5)?;
        wb.write_bool(self.obu_redundant_copy)?;
        wb.write_bool(self.obu_trimming_status_flag)?;
        wb.write_bool(self.obu_extension_flag)?;
        wb.write_uleb128(obu_size as u32)?;
        wb.write_bytes(&fields)?;

        trace!(
            "obu header: type={:?} obu_size={obu_size} payload={payload_size}",
            self.obu_type
        );

        Ok(())
    }

    /// Reads a header and returns it with the number of payload bytes that follow.
    pub fn read_and_validate(rb: &mut ReadBitBuffer) -> Result<(Self, u64)> {
        let start = rb.tell();
        let result = Self::read_inner(rb);
        if result.is_err() {
            rb.seek(start)?;
        }
        result
    }

    fn read_inner(rb: &mut ReadBitBuffer) -> Result<(Self, u64)> {
        let obu_type = ObuType::from_code(rb.read_n::<u8>(5)?);
        let obu_redundant_copy = rb.read_bool()?;
        let obu_trimming_status_flag = rb.read_bool()?;
        let obu_extension_flag = rb.read_bool()?;
        let obu_size = rb.read_uleb128()? as u64;

        let after_size = rb.tell();
        let mut header = Self {
            obu_type,
            obu_redundant_copy,
            obu_trimming_status_flag,
            obu_extension_flag,
            ..Self::new(obu_type)
        };

        if obu_trimming_status_flag {
            header.num_samples_to_trim_at_end = rb.read_uleb128()?;
            header.num_samples_to_trim_at_start = rb.read_uleb128()?;
        }

        if obu_extension_flag {
            let extension_header_size = rb.read_uleb128()?;
            header.extension_header_bytes = rb.read_bytes(extension_header_size as usize)?;
        }

        let header_bytes = (rb.tell() - after_size) >> 3;
        if header_bytes > obu_size {
            bail!(ObuError::HeaderExceedsSize {
                size: obu_size,
                header: header_bytes,
            });
        }

        header.validate()?;

        trace!("obu header: type={obu_type:?} obu_size={obu_size}");

        Ok((header, obu_size - header_bytes))
    }

    /// Peeks the type and the size of the whole OBU without moving the cursor.
    pub fn peek_type_and_total_size(rb: &mut ReadBitBuffer) -> Result<(ObuType, u64)> {
        let start = rb.tell();
        let result = (|| -> Result<(ObuType, u64)> {
            let obu_type = ObuType::from_code(rb.read_n::<u8>(5)?);
            rb.read_unsigned_literal(3)?;
            let (obu_size, leb_size) = rb.read_uleb128_with_size()?;
            Ok((obu_type, 1 + leb_size as u64 + obu_size as u64))
        })();
        rb.seek(start)?;

        let (obu_type, total) = result?;
        if total > MAX_OBU_SIZE {
            bail!(ObuError::ObuTooLarge(total));
        }

        Ok((obu_type, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::{ErrorKind, error_kind};
    use crate::utils::leb128::LebGenerator;

    fn write(header: &ObuHeader, payload_size: usize) -> Result<Vec<u8>> {
        let mut wb = WriteBitBuffer::default();
        header.validate_and_write(payload_size, &mut wb)?;
        wb.take_bytes()
    }

    #[test]
    fn type_codes() {
        for code in 0..32u8 {
            assert_eq!(ObuType::from_code(code).code(), code);
        }
        assert_eq!(ObuType::for_substream(17), ObuType::AudioFrameId(17));
        assert_eq!(ObuType::for_substream(17).code(), 23);
        assert_eq!(ObuType::for_substream(18), ObuType::AudioFrame);
        assert!(ObuType::from_code(24).is_reserved());
        assert!(ObuType::TemporalDelimiter.is_temporal_unit_obu());
    }

    #[test]
    fn minimal_header() -> anyhow::Result<()> {
        let header = ObuHeader::new(ObuType::IaSequenceHeader);
        assert_eq!(write(&header, 6)?, [0xf8, 0x06]);

        let mut redundant = header.clone();
        redundant.obu_redundant_copy = true;
        assert_eq!(write(&redundant, 6)?, [0xfc, 0x06]);

        Ok(())
    }

    #[test]
    fn trimming_and_extension() -> anyhow::Result<()> {
        let mut header = ObuHeader::new(ObuType::AudioFrameId(0)).with_trimming(3, 128);
        header.obu_extension_flag = true;
        header.extension_header_bytes = b"ext".to_vec();

        let bytes = write(&header, 10)?;
        assert_eq!(
            bytes,
            [
                (6 << 3) | 0b011,
                2 + 1 + 1 + 3 + 10,
                0x80,
                0x01,
                3,
                3,
                b'e',
                b'x',
                b't',
            ]
        );

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let (read, payload_size) = ObuHeader::read_and_validate(&mut rb)?;
        assert_eq!(read, header);
        assert_eq!(payload_size, 10);

        Ok(())
    }

    #[test]
    fn fixed_size_leb_counts_in_obu_size() -> anyhow::Result<()> {
        let header = ObuHeader::new(ObuType::AudioFrameId(1)).with_trimming(0, 0);
        let mut wb = WriteBitBuffer::new(LebGenerator::fixed(2)?);
        header.validate_and_write(1, &mut wb)?;
        assert_eq!(wb.take_bytes()?, [0x3a, 0x85, 0x00, 0x80, 0x00, 0x80, 0x00]);

        Ok(())
    }

    #[test]
    fn illegal_flags() {
        let mut header = ObuHeader::new(ObuType::TemporalDelimiter);
        header.obu_redundant_copy = true;
        assert!(write(&header, 0).is_err());

        let mut header = ObuHeader::new(ObuType::ParameterBlock);
        header.obu_redundant_copy = true;
        assert!(write(&header, 0).is_err());

        let header = ObuHeader::new(ObuType::CodecConfig).with_trimming(0, 1);
        let err = write(&header, 0).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidArgument);
    }

    #[test]
    fn peek_does_not_move() -> anyhow::Result<()> {
        let mut rb = ReadBitBuffer::from_slice(&[0x20, 0x05]);
        let (obu_type, total) = ObuHeader::peek_type_and_total_size(&mut rb)?;
        assert_eq!(obu_type, ObuType::TemporalDelimiter);
        assert_eq!(total, 7);
        assert_eq!(rb.tell(), 0);

        let mut partial = ReadBitBuffer::from_slice(&[0x20]);
        let err = ObuHeader::peek_type_and_total_size(&mut partial).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::ResourceExhausted);
        assert_eq!(partial.tell(), 0);

        Ok(())
    }
}
