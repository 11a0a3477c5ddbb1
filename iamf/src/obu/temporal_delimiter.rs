use anyhow::{Result, bail};

use crate::obu::ObuBase;
use crate::obu::header::{ObuHeader, ObuType};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::ObuError;

/// Marks the start of a temporal unit. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalDelimiterObu {
    pub header: ObuHeader,
}

impl Default for TemporalDelimiterObu {
    fn default() -> Self {
        Self {
            header: ObuHeader::new(ObuType::TemporalDelimiter),
        }
    }
}

impl TemporalDelimiterObu {
    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        if payload_size != 0 {
            // Skip the payload so the stream stays in sync.
            rb.ignore_bytes(payload_size as usize)?;
            bail!(ObuError::NonEmptyTemporalDelimiter(payload_size));
        }

        Ok(Self { header })
    }
}

impl ObuBase for TemporalDelimiterObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, _wb: &mut WriteBitBuffer) -> Result<()> {
        Ok(())
    }
}

#[test]
fn temporal_delimiter_is_two_bytes() -> anyhow::Result<()> {
    let mut wb = WriteBitBuffer::default();
    TemporalDelimiterObu::default().validate_and_write(&mut wb)?;
    assert_eq!(wb.take_bytes()?, [0x20, 0x00]);

    Ok(())
}
