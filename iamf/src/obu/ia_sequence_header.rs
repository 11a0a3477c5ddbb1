use anyhow::{Result, bail};
use log::debug;

use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::{ObuBase, read_payload};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::ObuError;

/// `"iamf"` as a big-endian 32-bit literal.
pub const IA_CODE: u32 = 0x6961_6d66;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileVersion {
    Simple,
    Base,
    BaseEnhanced,
    /// Profiles this crate does not know about. Only legal as `additional_profile`.
    Reserved(u8),
}

impl ProfileVersion {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ProfileVersion::Simple,
            1 => ProfileVersion::Base,
            2 => ProfileVersion::BaseEnhanced,
            v => ProfileVersion::Reserved(v),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ProfileVersion::Simple => 0,
            ProfileVersion::Base => 1,
            ProfileVersion::BaseEnhanced => 2,
            ProfileVersion::Reserved(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaSequenceHeaderObu {
    pub header: ObuHeader,
    pub ia_code: u32,
    pub primary_profile: ProfileVersion,
    pub additional_profile: ProfileVersion,
}

impl IaSequenceHeaderObu {
    pub fn new(primary_profile: ProfileVersion, additional_profile: ProfileVersion) -> Self {
        Self {
            header: ObuHeader::new(ObuType::IaSequenceHeader),
            ia_code: IA_CODE,
            primary_profile,
            additional_profile,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ia_code != IA_CODE {
            bail!(ObuError::InvalidIaCode(self.ia_code));
        }

        if let ProfileVersion::Reserved(v) = self.primary_profile {
            bail!(ObuError::UnknownPrimaryProfile(v));
        }

        Ok(())
    }

    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        read_payload(payload_size, rb, |rb| {
            let obu = Self {
                header,
                ia_code: rb.read_u32()?,
                primary_profile: ProfileVersion::from_u8(rb.read_u8()?),
                additional_profile: ProfileVersion::from_u8(rb.read_u8()?),
            };
            obu.validate()?;

            debug!(
                "IA sequence header: primary_profile={:?} additional_profile={:?}",
                obu.primary_profile, obu.additional_profile
            );

            Ok(obu)
        })
    }
}

impl ObuBase for IaSequenceHeaderObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;
        wb.write_u32(self.ia_code)?;
        wb.write_u8(self.primary_profile.as_u8())?;
        wb.write_u8(self.additional_profile.as_u8())
    }
}
