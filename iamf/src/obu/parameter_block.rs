use anyhow::{Result, bail};
use log::debug;

use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::param_definitions::{
    DmixPMode, ParamDefinition, ParamDefinitionMap, ParamDefinitionType, ParamKind,
};
use crate::obu::{ObuBase, read_payload};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::ParamError;
use crate::utils::leb128::DecodedUleb128;
use crate::utils::numeric::{q0_8_to_f64, q7_8_to_f64};

/// Number of channel slots in a recon gain element.
pub const RECON_GAIN_SLOTS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixGainAnimation {
    Step {
        start_point_value: i16,
    },
    Linear {
        start_point_value: i16,
        end_point_value: i16,
    },
    Bezier {
        start_point_value: i16,
        end_point_value: i16,
        control_point_value: i16,
        /// Q0.8 position of the control point within the subblock.
        control_point_relative_time: u8,
    },
}

impl MixGainAnimation {
    fn animation_type(&self) -> u32 {
        match self {
            MixGainAnimation::Step { .. } => 0,
            MixGainAnimation::Linear { .. } => 1,
            MixGainAnimation::Bezier { .. } => 2,
        }
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_uleb128(self.animation_type())?;
        match *self {
            MixGainAnimation::Step { start_point_value } => wb.write_signed16(start_point_value),
            MixGainAnimation::Linear {
                start_point_value,
                end_point_value,
            } => {
                wb.write_signed16(start_point_value)?;
                wb.write_signed16(end_point_value)
            }
            MixGainAnimation::Bezier {
                start_point_value,
                end_point_value,
                control_point_value,
                control_point_relative_time,
            } => {
                wb.write_signed16(start_point_value)?;
                wb.write_signed16(end_point_value)?;
                wb.write_signed16(control_point_value)?;
                wb.write_u8(control_point_relative_time)
            }
        }
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        Ok(match rb.read_uleb128()? {
            0 => MixGainAnimation::Step {
                start_point_value: rb.read_signed16()?,
            },
            1 => MixGainAnimation::Linear {
                start_point_value: rb.read_signed16()?,
                end_point_value: rb.read_signed16()?,
            },
            2 => MixGainAnimation::Bezier {
                start_point_value: rb.read_signed16()?,
                end_point_value: rb.read_signed16()?,
                control_point_value: rb.read_signed16()?,
                control_point_relative_time: rb.read_u8()?,
            },
            other => bail!(ParamError::UnknownAnimationType(other)),
        })
    }

    /// Gain in dB at `target` ticks into a subblock of `duration` ticks.
    pub fn gain_db_at(&self, duration: i64, target: i64) -> Result<f64> {
        if target < 0 || target > duration {
            bail!(ParamError::InterpolationOutOfRange {
                start: 0,
                end: duration,
                target,
            });
        }

        let n = target as f64;
        let n_2 = duration as f64;

        Ok(match *self {
            MixGainAnimation::Step { start_point_value } => q7_8_to_f64(start_point_value),
            MixGainAnimation::Linear {
                start_point_value,
                end_point_value,
            } => {
                let a = if n_2 == 0.0 { 0.0 } else { n / n_2 };
                (1.0 - a) * q7_8_to_f64(start_point_value) + a * q7_8_to_f64(end_point_value)
            }
            MixGainAnimation::Bezier {
                start_point_value,
                end_point_value,
                control_point_value,
                control_point_relative_time,
            } => {
                let n_1 = (n_2 * q0_8_to_f64(control_point_relative_time) + 0.5).floor();
                let p_0 = q7_8_to_f64(start_point_value);
                let p_1 = q7_8_to_f64(control_point_value);
                let p_2 = q7_8_to_f64(end_point_value);

                // Solve the quadratic for the curve parameter at time n.
                let alpha = n_2 - 2.0 * n_1;
                let beta = 2.0 * n_1;
                let gamma = -n;
                let a = if alpha == 0.0 {
                    if beta == 0.0 { 0.0 } else { -gamma / beta }
                } else {
                    (-beta + (beta * beta - 4.0 * alpha * gamma).sqrt()) / (2.0 * alpha)
                };

                (1.0 - a) * (1.0 - a) * p_0 + 2.0 * (1.0 - a) * a * p_1 + a * a * p_2
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemixingInfo {
    pub dmixp_mode: DmixPMode,
    pub reserved: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconGainElement {
    /// Bit `i` set means slot `i` of `recon_gain` is on the wire.
    pub recon_gain_flag: DecodedUleb128,
    pub recon_gain: [u8; RECON_GAIN_SLOTS],
}

impl ReconGainElement {
    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_uleb128(self.recon_gain_flag)?;
        for (i, gain) in self.recon_gain.iter().enumerate() {
            if self.recon_gain_flag & (1 << i) != 0 {
                wb.write_u8(*gain)?;
            }
        }

        Ok(())
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let recon_gain_flag = rb.read_uleb128()?;
        let mut recon_gain = [0u8; RECON_GAIN_SLOTS];
        for (i, gain) in recon_gain.iter_mut().enumerate() {
            if recon_gain_flag & (1 << i) != 0 {
                *gain = rb.read_u8()?;
            }
        }

        Ok(Self {
            recon_gain_flag,
            recon_gain,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterData {
    MixGain(MixGainAnimation),
    Demixing(DemixingInfo),
    /// One entry per layer; `None` where the layer carries no recon gain.
    ReconGain(Vec<Option<ReconGainElement>>),
}

impl ParameterData {
    pub fn param_type(&self) -> ParamDefinitionType {
        match self {
            ParameterData::MixGain(_) => ParamDefinitionType::MixGain,
            ParameterData::Demixing(_) => ParamDefinitionType::Demixing,
            ParameterData::ReconGain(_) => ParamDefinitionType::ReconGain,
        }
    }

    fn validate(&self, definition: &ParamDefinition) -> Result<()> {
        if self.param_type() != definition.param_type() {
            bail!(ParamError::DataTypeMismatch(definition.param_type()));
        }

        if let (
            ParameterData::ReconGain(elements),
            ParamKind::ReconGain {
                recon_gain_is_present_flags,
            },
        ) = (self, &definition.kind)
        {
            if elements.len() != recon_gain_is_present_flags.len() {
                bail!(ParamError::ReconGainLayerMismatch {
                    expected: recon_gain_is_present_flags.len(),
                    actual: elements.len(),
                });
            }

            for (element, present) in elements.iter().zip(recon_gain_is_present_flags) {
                if element.is_some() != *present {
                    bail!(ParamError::DataTypeMismatch(ParamDefinitionType::ReconGain));
                }
            }
        }

        Ok(())
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        match self {
            ParameterData::MixGain(animation) => animation.write(wb),
            ParameterData::Demixing(info) => info.dmixp_mode.write(info.reserved, wb),
            ParameterData::ReconGain(elements) => {
                for element in elements.iter().flatten() {
                    element.write(wb)?;
                }
                Ok(())
            }
        }
    }

    fn read(definition: &ParamDefinition, rb: &mut ReadBitBuffer) -> Result<Self> {
        Ok(match &definition.kind {
            ParamKind::MixGain { .. } => ParameterData::MixGain(MixGainAnimation::read(rb)?),
            ParamKind::Demixing(_) => {
                let (dmixp_mode, reserved) = DmixPMode::read(rb)?;
                ParameterData::Demixing(DemixingInfo {
                    dmixp_mode,
                    reserved,
                })
            }
            ParamKind::ReconGain {
                recon_gain_is_present_flags,
            } => {
                let mut elements = Vec::with_capacity(recon_gain_is_present_flags.len());
                for &present in recon_gain_is_present_flags {
                    elements.push(if present {
                        Some(ReconGainElement::read(rb)?)
                    } else {
                        None
                    });
                }
                ParameterData::ReconGain(elements)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSubblock {
    /// Present only for mode 1 blocks without a constant subblock duration.
    pub subblock_duration: Option<DecodedUleb128>,
    pub param_data: ParameterData,
}

/// Timing carried by mode 1 parameter blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTiming {
    pub duration: DecodedUleb128,
    pub constant_subblock_duration: DecodedUleb128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlockObu {
    pub header: ObuHeader,
    pub parameter_id: DecodedUleb128,
    /// `Some` exactly when the definition is mode 1.
    pub timing: Option<BlockTiming>,
    pub subblocks: Vec<ParameterSubblock>,
    /// Copy of the definition this block is parsed and written against.
    pub param_definition: ParamDefinition,
}

impl ParameterBlockObu {
    /// A block for a mode 0 definition; timing comes from the definition.
    pub fn new(param_definition: &ParamDefinition, param_data: Vec<ParameterData>) -> Self {
        Self {
            header: ObuHeader::new(ObuType::ParameterBlock),
            parameter_id: param_definition.parameter_id,
            timing: None,
            subblocks: param_data
                .into_iter()
                .map(|param_data| ParameterSubblock {
                    subblock_duration: None,
                    param_data,
                })
                .collect(),
            param_definition: param_definition.clone(),
        }
    }

    /// A block for a mode 1 definition with explicit timing.
    pub fn with_timing(
        param_definition: &ParamDefinition,
        timing: BlockTiming,
        subblocks: Vec<ParameterSubblock>,
    ) -> Self {
        Self {
            header: ObuHeader::new(ObuType::ParameterBlock),
            parameter_id: param_definition.parameter_id,
            timing: Some(timing),
            subblocks,
            param_definition: param_definition.clone(),
        }
    }

    pub fn duration(&self) -> DecodedUleb128 {
        match self.timing {
            Some(timing) => timing.duration,
            None => self.param_definition.duration,
        }
    }

    pub fn constant_subblock_duration(&self) -> DecodedUleb128 {
        match self.timing {
            Some(timing) => timing.constant_subblock_duration,
            None => self.param_definition.constant_subblock_duration,
        }
    }

    fn expected_num_subblocks(&self) -> usize {
        let constant = self.constant_subblock_duration();
        if constant != 0 {
            self.duration().div_ceil(constant) as usize
        } else if self.timing.is_some() {
            self.subblocks.len()
        } else {
            self.param_definition.subblock_durations.len()
        }
    }

    /// Duration of subblock `index`. The last constant-duration subblock is cut
    /// short when the block duration is not a multiple.
    pub fn subblock_duration(&self, index: usize) -> Option<DecodedUleb128> {
        if index >= self.subblocks.len() {
            return None;
        }

        let constant = self.constant_subblock_duration();
        if constant != 0 {
            let start = constant * index as u32;
            return Some(constant.min(self.duration().saturating_sub(start)));
        }

        match self.timing {
            Some(_) => self.subblocks[index].subblock_duration,
            None => self.param_definition.subblock_durations.get(index).copied(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.param_definition.validate()?;

        if self.timing.is_some() != self.param_definition.param_definition_mode {
            bail!(ParamError::UnexpectedBlockTiming);
        }

        if let Some(timing) = self.timing {
            if timing.duration == 0 {
                bail!(ParamError::ZeroDuration);
            }
        }

        let expected = self.expected_num_subblocks();
        if self.subblocks.len() != expected {
            bail!(ParamError::SubblockCountMismatch {
                expected,
                actual: self.subblocks.len(),
            });
        }

        let explicit = self.timing.is_some() && self.constant_subblock_duration() == 0;
        if explicit {
            let mut sum = 0u64;
            for subblock in &self.subblocks {
                match subblock.subblock_duration {
                    Some(0) | None => bail!(ParamError::ZeroSubblockDuration),
                    Some(duration) => sum += duration as u64,
                }
            }
            if sum != self.duration() as u64 {
                bail!(ParamError::SubblockDurationMismatch {
                    sum,
                    duration: self.duration(),
                });
            }
        }

        for subblock in &self.subblocks {
            subblock.param_data.validate(&self.param_definition)?;
        }

        Ok(())
    }

    /// Parses a parameter block, looking its definition up by id.
    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        param_definitions: &ParamDefinitionMap,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        read_payload(payload_size, rb, |rb| {
            let parameter_id = rb.read_uleb128()?;
            let Some(param_definition) = param_definitions.get(&parameter_id) else {
                bail!(ParamError::UnknownParameterId(parameter_id));
            };

            let mut timing = None;
            let mut num_subblocks = param_definition.num_subblocks();
            if param_definition.param_definition_mode {
                let block_timing = BlockTiming {
                    duration: rb.read_uleb128()?,
                    constant_subblock_duration: rb.read_uleb128()?,
                };
                num_subblocks = if block_timing.constant_subblock_duration == 0 {
                    rb.read_uleb128()?
                } else {
                    block_timing.duration.div_ceil(block_timing.constant_subblock_duration)
                };
                timing = Some(block_timing);
            }

            let explicit = timing.is_some_and(|t| t.constant_subblock_duration == 0);
            let mut subblocks = Vec::new();
            for _ in 0..num_subblocks {
                let subblock_duration = if explicit { Some(rb.read_uleb128()?) } else { None };
                subblocks.push(ParameterSubblock {
                    subblock_duration,
                    param_data: ParameterData::read(param_definition, rb)?,
                });
            }

            let obu = Self {
                header,
                parameter_id,
                timing,
                subblocks,
                param_definition: param_definition.clone(),
            };
            obu.validate()?;

            debug!(
                "Parameter block {}: type={:?} duration={} subblocks={}",
                obu.parameter_id,
                obu.param_definition.param_type(),
                obu.duration(),
                obu.subblocks.len()
            );

            Ok(obu)
        })
    }

    /// Linear mix gain at `relative_time` ticks from the start of the block.
    pub fn linear_mix_gain(&self, relative_time: i64) -> Result<f64> {
        let mut start = 0i64;
        for (i, subblock) in self.subblocks.iter().enumerate() {
            let duration = self.subblock_duration(i).unwrap_or(0) as i64;
            if relative_time >= start && relative_time < start + duration {
                let ParameterData::MixGain(animation) = &subblock.param_data else {
                    bail!(ParamError::DataTypeMismatch(ParamDefinitionType::MixGain));
                };
                let gain_db = animation.gain_db_at(duration, relative_time - start)?;
                return Ok(10f64.powf(gain_db / 20.0));
            }
            start += duration;
        }

        bail!(ParamError::InterpolationOutOfRange {
            start: 0,
            end: start,
            target: relative_time,
        })
    }
}

impl ObuBase for ParameterBlockObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        wb.write_uleb128(self.parameter_id)?;
        if let Some(timing) = self.timing {
            wb.write_uleb128(timing.duration)?;
            wb.write_uleb128(timing.constant_subblock_duration)?;
            if timing.constant_subblock_duration == 0 {
                wb.write_uleb128(self.subblocks.len() as u32)?;
            }
        }

        for subblock in &self.subblocks {
            if let Some(duration) = subblock.subblock_duration {
                wb.write_uleb128(duration)?;
            }
            subblock.param_data.write(wb)?;
        }

        Ok(())
    }
}
