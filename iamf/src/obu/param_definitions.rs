//! Parameter definitions.
//!
//! A definition is declared once in a descriptor (audio element or mix presentation)
//! and names a `parameter_id`. Parameter block OBUs carrying that id are parsed
//! against it: the definition fixes the payload type and, in mode 0, the timing of
//! every block.

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::ParamError;
use crate::utils::leb128::DecodedUleb128;

/// Definitions by `parameter_id`, collected across all descriptors.
pub type ParamDefinitionMap = HashMap<DecodedUleb128, ParamDefinition>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamDefinitionType {
    MixGain,
    Demixing,
    ReconGain,
    Extension(u32),
}

impl ParamDefinitionType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => ParamDefinitionType::MixGain,
            1 => ParamDefinitionType::Demixing,
            2 => ParamDefinitionType::ReconGain,
            other => ParamDefinitionType::Extension(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ParamDefinitionType::MixGain => 0,
            ParamDefinitionType::Demixing => 1,
            ParamDefinitionType::ReconGain => 2,
            ParamDefinitionType::Extension(value) => value,
        }
    }
}

/// Pre-defined down-mixing parameter sets (`dmixp_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmixPMode {
    Mode1,
    Mode2,
    Mode3,
    Mode1N,
    Mode2N,
    Mode3N,
    Reserved(u8),
}

impl DmixPMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DmixPMode::Mode1,
            1 => DmixPMode::Mode2,
            2 => DmixPMode::Mode3,
            4 => DmixPMode::Mode1N,
            5 => DmixPMode::Mode2N,
            6 => DmixPMode::Mode3N,
            other => DmixPMode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DmixPMode::Mode1 => 0,
            DmixPMode::Mode2 => 1,
            DmixPMode::Mode3 => 2,
            DmixPMode::Mode1N => 4,
            DmixPMode::Mode2N => 5,
            DmixPMode::Mode3N => 6,
            DmixPMode::Reserved(value) => value,
        }
    }

    /// Writers only emit defined modes.
    pub fn validate(self) -> Result<()> {
        if let DmixPMode::Reserved(value) = self {
            bail!(ParamError::ReservedDmixpMode(value));
        }

        Ok(())
    }

    pub(crate) fn write(self, reserved: u8, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;
        wb.write_unsigned_literal(self.as_u8() as u64, 3)?;
        wb.write_unsigned_literal(reserved as u64, 5)
    }

    pub(crate) fn read(rb: &mut ReadBitBuffer) -> Result<(Self, u8)> {
        let mode = DmixPMode::from_u8(rb.read_unsigned_literal(3)? as u8);
        let reserved = rb.read_unsigned_literal(5)? as u8;
        Ok((mode, reserved))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultDemixingInfo {
    pub dmixp_mode: DmixPMode,
    pub reserved: u8,
    pub default_w: u8,
    pub reserved_for_future_use: u8,
}

impl Default for DefaultDemixingInfo {
    fn default() -> Self {
        Self {
            dmixp_mode: DmixPMode::Mode1,
            reserved: 0,
            default_w: 0,
            reserved_for_future_use: 0,
        }
    }
}

/// Type-specific part of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    MixGain { default_mix_gain: i16 },
    Demixing(DefaultDemixingInfo),
    /// The flags are not on the wire; they mirror the owning audio element's layers.
    ReconGain { recon_gain_is_present_flags: Vec<bool> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDefinition {
    pub parameter_id: DecodedUleb128,
    pub parameter_rate: DecodedUleb128,
    /// Mode 1 moves the timing fields into each parameter block.
    pub param_definition_mode: bool,
    pub reserved: u8,
    pub duration: DecodedUleb128,
    pub constant_subblock_duration: DecodedUleb128,
    /// Only used when `constant_subblock_duration` is zero.
    pub subblock_durations: Vec<DecodedUleb128>,
    pub kind: ParamKind,
}

impl ParamDefinition {
    /// A mode 0 definition with a single subblock spanning `duration`.
    pub fn new(
        parameter_id: DecodedUleb128,
        parameter_rate: DecodedUleb128,
        duration: DecodedUleb128,
        kind: ParamKind,
    ) -> Self {
        Self {
            parameter_id,
            parameter_rate,
            param_definition_mode: false,
            reserved: 0,
            duration,
            constant_subblock_duration: duration,
            subblock_durations: Vec::new(),
            kind,
        }
    }

    pub fn mix_gain(parameter_id: DecodedUleb128, parameter_rate: DecodedUleb128, duration: u32) -> Self {
        Self::new(
            parameter_id,
            parameter_rate,
            duration,
            ParamKind::MixGain { default_mix_gain: 0 },
        )
    }

    pub fn param_type(&self) -> ParamDefinitionType {
        match self.kind {
            ParamKind::MixGain { .. } => ParamDefinitionType::MixGain,
            ParamKind::Demixing(_) => ParamDefinitionType::Demixing,
            ParamKind::ReconGain { .. } => ParamDefinitionType::ReconGain,
        }
    }

    fn include_subblock_duration_array(&self) -> bool {
        !self.param_definition_mode && self.constant_subblock_duration == 0
    }

    /// Number of subblocks for mode 0. Mode 1 blocks carry their own count.
    pub fn num_subblocks(&self) -> u32 {
        if self.constant_subblock_duration != 0 {
            self.duration.div_ceil(self.constant_subblock_duration)
        } else {
            self.subblock_durations.len() as u32
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parameter_rate == 0 {
            bail!(ParamError::ZeroParameterRate);
        }

        if !self.param_definition_mode {
            if self.duration == 0 {
                bail!(ParamError::ZeroDuration);
            }

            if self.include_subblock_duration_array() {
                if self.subblock_durations.contains(&0) {
                    bail!(ParamError::ZeroSubblockDuration);
                }

                let sum: u64 = self.subblock_durations.iter().map(|&d| d as u64).sum();
                if sum != self.duration as u64 {
                    bail!(ParamError::SubblockDurationMismatch {
                        sum,
                        duration: self.duration,
                    });
                }
            }
        }

        match &self.kind {
            ParamKind::Demixing(_) | ParamKind::ReconGain { .. } => {
                if self.param_definition_mode
                    || self.duration == 0
                    || self.constant_subblock_duration != self.duration
                {
                    bail!(ParamError::RequiresSingleConstantSubblock(self.param_type()));
                }
            }
            ParamKind::MixGain { .. } => {}
        }

        Ok(())
    }

    /// Definitions that share an id must agree. Timing fields only matter in
    /// mode 0.
    pub fn is_equivalent(&self, other: &ParamDefinition) -> bool {
        if self.param_definition_mode != other.param_definition_mode || self.kind != other.kind {
            return false;
        }

        if self.param_definition_mode {
            return true;
        }

        self.duration == other.duration
            && self.constant_subblock_duration == other.constant_subblock_duration
            && (self.constant_subblock_duration != 0
                || self.subblock_durations == other.subblock_durations)
    }

    /// Writes the definition. The `param_definition_type` prefix, where the
    /// syntax has one, belongs to the caller.
    pub fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        wb.write_uleb128(self.parameter_id)?;
        wb.write_uleb128(self.parameter_rate)?;
        wb.write_bool(self.param_definition_mode)?;
        wb.write_unsigned_literal(self.reserved as u64, 7)?;
        if !self.param_definition_mode {
            wb.write_uleb128(self.duration)?;
            wb.write_uleb128(self.constant_subblock_duration)?;
            if self.constant_subblock_duration == 0 {
                wb.write_uleb128(self.subblock_durations.len() as u32)?;
                for &duration in &self.subblock_durations {
                    wb.write_uleb128(duration)?;
                }
            }
        }

        match &self.kind {
            ParamKind::MixGain { default_mix_gain } => wb.write_signed16(*default_mix_gain),
            ParamKind::Demixing(default) => {
                default.dmixp_mode.write(default.reserved, wb)?;
                wb.write_unsigned_literal(default.default_w as u64, 4)?;
                wb.write_unsigned_literal(default.reserved_for_future_use as u64, 4)
            }
            ParamKind::ReconGain { .. } => Ok(()),
        }
    }

    /// Reads a definition of a known type.
    pub fn read(param_type: ParamDefinitionType, rb: &mut ReadBitBuffer) -> Result<Self> {
        let parameter_id = rb.read_uleb128()?;
        let parameter_rate = rb.read_uleb128()?;
        let param_definition_mode = rb.read_bool()?;
        let reserved = rb.read_unsigned_literal(7)? as u8;

        let mut duration = 0;
        let mut constant_subblock_duration = 0;
        let mut subblock_durations = Vec::new();
        if !param_definition_mode {
            duration = rb.read_uleb128()?;
            constant_subblock_duration = rb.read_uleb128()?;
            if constant_subblock_duration == 0 {
                let num_subblocks = rb.read_uleb128()?;
                for _ in 0..num_subblocks {
                    subblock_durations.push(rb.read_uleb128()?);
                }
            }
        }

        let kind = match param_type {
            ParamDefinitionType::MixGain => ParamKind::MixGain {
                default_mix_gain: rb.read_signed16()?,
            },
            ParamDefinitionType::Demixing => {
                let (dmixp_mode, reserved) = DmixPMode::read(rb)?;
                ParamKind::Demixing(DefaultDemixingInfo {
                    dmixp_mode,
                    reserved,
                    default_w: rb.read_unsigned_literal(4)? as u8,
                    reserved_for_future_use: rb.read_unsigned_literal(4)? as u8,
                })
            }
            ParamDefinitionType::ReconGain => ParamKind::ReconGain {
                recon_gain_is_present_flags: Vec::new(),
            },
            ParamDefinitionType::Extension(_) => bail!(ParamError::DataTypeMismatch(param_type)),
        };

        let definition = Self {
            parameter_id,
            parameter_rate,
            param_definition_mode,
            reserved,
            duration,
            constant_subblock_duration,
            subblock_durations,
            kind,
        };
        definition.validate()?;

        Ok(definition)
    }
}

/// Adds `definition` to `map`, requiring agreement with any earlier definition of
/// the same id.
pub fn insert_param_definition(map: &mut ParamDefinitionMap, definition: &ParamDefinition) -> Result<()> {
    match map.get(&definition.parameter_id) {
        Some(existing) if !existing.is_equivalent(definition) => {
            bail!(ParamError::InconsistentDefinition(definition.parameter_id))
        }
        Some(_) => Ok(()),
        None => {
            map.insert(definition.parameter_id, definition.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(definition: &ParamDefinition) -> anyhow::Result<ParamDefinition> {
        let mut wb = WriteBitBuffer::default();
        definition.write(&mut wb)?;
        let bytes = wb.take_bytes()?;
        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let read = ParamDefinition::read(definition.param_type(), &mut rb)?;
        assert_eq!(rb.num_bits_available(), 0);
        Ok(read)
    }

    #[test]
    fn mix_gain_layout() -> anyhow::Result<()> {
        let mut definition = ParamDefinition::mix_gain(12, 48000, 960);
        definition.kind = ParamKind::MixGain { default_mix_gain: -256 };

        let mut wb = WriteBitBuffer::default();
        definition.write(&mut wb)?;
        assert_eq!(
            wb.take_bytes()?,
            [12, 0x80, 0xf7, 0x02, 0x00, 0xc0, 0x07, 0xc0, 0x07, 0xff, 0x00]
        );

        assert_eq!(round_trip(&definition)?, definition);

        Ok(())
    }

    #[test]
    fn explicit_subblocks() -> anyhow::Result<()> {
        let mut definition = ParamDefinition::mix_gain(1, 48000, 30);
        definition.constant_subblock_duration = 0;
        definition.subblock_durations = vec![10, 20];
        assert_eq!(definition.num_subblocks(), 2);
        assert_eq!(round_trip(&definition)?, definition);

        definition.subblock_durations = vec![10, 10];
        assert!(definition.validate().is_err());

        definition.subblock_durations = vec![0, 30];
        assert!(definition.validate().is_err());

        Ok(())
    }

    #[test]
    fn mode_1_has_no_timing() -> anyhow::Result<()> {
        let mut definition = ParamDefinition::mix_gain(1, 48000, 0);
        definition.param_definition_mode = true;
        definition.constant_subblock_duration = 0;

        let mut wb = WriteBitBuffer::default();
        definition.write(&mut wb)?;
        assert_eq!(wb.take_bytes()?, [1, 0x80, 0xf7, 0x02, 0x80, 0x00, 0x00]);

        Ok(())
    }

    #[test]
    fn demixing_requires_single_subblock() -> anyhow::Result<()> {
        let definition = ParamDefinition::new(
            4,
            48000,
            960,
            ParamKind::Demixing(DefaultDemixingInfo {
                dmixp_mode: DmixPMode::Mode3N,
                default_w: 10,
                ..Default::default()
            }),
        );
        assert_eq!(round_trip(&definition)?, definition);

        let mut split = definition.clone();
        split.constant_subblock_duration = 480;
        assert!(split.validate().is_err());

        let mut reserved = definition.clone();
        reserved.kind = ParamKind::Demixing(DefaultDemixingInfo {
            dmixp_mode: DmixPMode::Reserved(3),
            ..Default::default()
        });
        assert!(reserved.write(&mut WriteBitBuffer::default()).is_err());

        Ok(())
    }

    #[test]
    fn rate_must_be_non_zero() {
        assert!(ParamDefinition::mix_gain(1, 0, 8).validate().is_err());
        assert!(ParamDefinition::mix_gain(1, 48000, 0).validate().is_err());
    }

    #[test]
    fn shared_ids_must_agree() -> anyhow::Result<()> {
        let mut map = ParamDefinitionMap::new();
        let definition = ParamDefinition::mix_gain(7, 48000, 960);
        insert_param_definition(&mut map, &definition)?;
        insert_param_definition(&mut map, &definition)?;

        let other = ParamDefinition::mix_gain(7, 48000, 480);
        assert!(insert_param_definition(&mut map, &other).is_err());
        assert_eq!(map.len(), 1);

        Ok(())
    }
}
