//! Audio element OBU.
//!
//! An audio element groups substreams that are coded with one codec config and
//! rendered together, either as a stack of channel-based layers or as an
//! ambisonics scene.

use std::collections::HashSet;

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::param_definitions::{ParamDefinition, ParamDefinitionType, ParamKind};
use crate::obu::{ObuBase, read_payload};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::AudioElementError;
use crate::utils::leb128::DecodedUleb128;

pub const MAX_NUM_LAYERS: usize = 6;

/// Marks an ambisonics channel that has no substream (mixed-order ambisonics).
pub const INACTIVE_AMBISONICS_CHANNEL: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoudspeakerLayout {
    Mono,
    Stereo,
    L5_1,
    L5_1_2,
    L5_1_4,
    L7_1,
    L7_1_2,
    L7_1_4,
    L3_1_2,
    Binaural,
    Reserved(u8),
    Expanded,
}

impl LoudspeakerLayout {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LoudspeakerLayout::Mono,
            1 => LoudspeakerLayout::Stereo,
            2 => LoudspeakerLayout::L5_1,
            3 => LoudspeakerLayout::L5_1_2,
            4 => LoudspeakerLayout::L5_1_4,
            5 => LoudspeakerLayout::L7_1,
            6 => LoudspeakerLayout::L7_1_2,
            7 => LoudspeakerLayout::L7_1_4,
            8 => LoudspeakerLayout::L3_1_2,
            9 => LoudspeakerLayout::Binaural,
            15 => LoudspeakerLayout::Expanded,
            other => LoudspeakerLayout::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            LoudspeakerLayout::Mono => 0,
            LoudspeakerLayout::Stereo => 1,
            LoudspeakerLayout::L5_1 => 2,
            LoudspeakerLayout::L5_1_2 => 3,
            LoudspeakerLayout::L5_1_4 => 4,
            LoudspeakerLayout::L7_1 => 5,
            LoudspeakerLayout::L7_1_2 => 6,
            LoudspeakerLayout::L7_1_4 => 7,
            LoudspeakerLayout::L3_1_2 => 8,
            LoudspeakerLayout::Binaural => 9,
            LoudspeakerLayout::Reserved(value) => value,
            LoudspeakerLayout::Expanded => 15,
        }
    }

    /// Channels carried by a layer with this layout. `None` for reserved and
    /// expanded layouts.
    pub fn channel_count(self) -> Option<usize> {
        Some(match self {
            LoudspeakerLayout::Mono => 1,
            LoudspeakerLayout::Stereo | LoudspeakerLayout::Binaural => 2,
            LoudspeakerLayout::L5_1 | LoudspeakerLayout::L3_1_2 => 6,
            LoudspeakerLayout::L5_1_2 | LoudspeakerLayout::L7_1 => 8,
            LoudspeakerLayout::L5_1_4 | LoudspeakerLayout::L7_1_2 => 10,
            LoudspeakerLayout::L7_1_4 => 12,
            LoudspeakerLayout::Reserved(_) | LoudspeakerLayout::Expanded => return None,
        })
    }
}

/// Subsets of larger layouts, signalled when `loudspeaker_layout` is `Expanded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandedLoudspeakerLayout {
    Lfe,
    StereoS,
    StereoSs,
    StereoRs,
    StereoTf,
    StereoTb,
    Top4Ch,
    L3_0,
    L9_1_6,
    StereoF,
    StereoSi,
    StereoTpSi,
    Top6Ch,
    Reserved(u8),
}

impl ExpandedLoudspeakerLayout {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ExpandedLoudspeakerLayout::Lfe,
            1 => ExpandedLoudspeakerLayout::StereoS,
            2 => ExpandedLoudspeakerLayout::StereoSs,
            3 => ExpandedLoudspeakerLayout::StereoRs,
            4 => ExpandedLoudspeakerLayout::StereoTf,
            5 => ExpandedLoudspeakerLayout::StereoTb,
            6 => ExpandedLoudspeakerLayout::Top4Ch,
            7 => ExpandedLoudspeakerLayout::L3_0,
            8 => ExpandedLoudspeakerLayout::L9_1_6,
            9 => ExpandedLoudspeakerLayout::StereoF,
            10 => ExpandedLoudspeakerLayout::StereoSi,
            11 => ExpandedLoudspeakerLayout::StereoTpSi,
            12 => ExpandedLoudspeakerLayout::Top6Ch,
            other => ExpandedLoudspeakerLayout::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ExpandedLoudspeakerLayout::Lfe => 0,
            ExpandedLoudspeakerLayout::StereoS => 1,
            ExpandedLoudspeakerLayout::StereoSs => 2,
            ExpandedLoudspeakerLayout::StereoRs => 3,
            ExpandedLoudspeakerLayout::StereoTf => 4,
            ExpandedLoudspeakerLayout::StereoTb => 5,
            ExpandedLoudspeakerLayout::Top4Ch => 6,
            ExpandedLoudspeakerLayout::L3_0 => 7,
            ExpandedLoudspeakerLayout::L9_1_6 => 8,
            ExpandedLoudspeakerLayout::StereoF => 9,
            ExpandedLoudspeakerLayout::StereoSi => 10,
            ExpandedLoudspeakerLayout::StereoTpSi => 11,
            ExpandedLoudspeakerLayout::Top6Ch => 12,
            ExpandedLoudspeakerLayout::Reserved(value) => value,
        }
    }

    pub fn channel_count(self) -> Option<usize> {
        Some(match self {
            ExpandedLoudspeakerLayout::Lfe => 1,
            ExpandedLoudspeakerLayout::L3_0 => 3,
            ExpandedLoudspeakerLayout::Top4Ch => 4,
            ExpandedLoudspeakerLayout::Top6Ch => 6,
            ExpandedLoudspeakerLayout::L9_1_6 => 16,
            ExpandedLoudspeakerLayout::Reserved(_) => return None,
            _ => 2,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGain {
    /// Six bits selecting the channels the gain applies to.
    pub output_gain_flag: u8,
    pub reserved: u8,
    /// Q7.8 dB.
    pub output_gain: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAudioLayerConfig {
    pub loudspeaker_layout: LoudspeakerLayout,
    pub recon_gain_is_present_flag: bool,
    pub reserved_a: u8,
    pub substream_count: u8,
    pub coupled_substream_count: u8,
    pub output_gain: Option<OutputGain>,
    pub expanded_loudspeaker_layout: Option<ExpandedLoudspeakerLayout>,
}

impl ChannelAudioLayerConfig {
    /// A layer without gains that codes its channels with `substream_count`
    /// substreams, `coupled_substream_count` of which carry two channels.
    pub fn new(loudspeaker_layout: LoudspeakerLayout, substream_count: u8, coupled_substream_count: u8) -> Self {
        Self {
            loudspeaker_layout,
            recon_gain_is_present_flag: false,
            reserved_a: 0,
            substream_count,
            coupled_substream_count,
            output_gain: None,
            expanded_loudspeaker_layout: None,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.substream_count as usize + self.coupled_substream_count as usize
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_unsigned_literal(self.loudspeaker_layout.as_u8() as u64, 4)?;
        wb.write_bool(self.output_gain.is_some())?;
        wb.write_bool(self.recon_gain_is_present_flag)?;
        wb.write_unsigned_literal(self.reserved_a as u64, 2)?;
        wb.write_u8(self.substream_count)?;
        wb.write_u8(self.coupled_substream_count)?;

        if let Some(gain) = &self.output_gain {
            wb.write_unsigned_literal(gain.output_gain_flag as u64, 6)?;
            wb.write_unsigned_literal(gain.reserved as u64, 2)?;
            wb.write_signed16(gain.output_gain)?;
        }

        if self.loudspeaker_layout == LoudspeakerLayout::Expanded {
            let Some(expanded) = self.expanded_loudspeaker_layout else {
                bail!(AudioElementError::MissingExpandedLayout);
            };
            wb.write_u8(expanded.as_u8())?;
        }

        Ok(())
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let loudspeaker_layout = LoudspeakerLayout::from_u8(rb.read_unsigned_literal(4)? as u8);
        let output_gain_is_present_flag = rb.read_bool()?;
        let recon_gain_is_present_flag = rb.read_bool()?;
        let reserved_a = rb.read_unsigned_literal(2)? as u8;
        let substream_count = rb.read_u8()?;
        let coupled_substream_count = rb.read_u8()?;

        let output_gain = if output_gain_is_present_flag {
            Some(OutputGain {
                output_gain_flag: rb.read_unsigned_literal(6)? as u8,
                reserved: rb.read_unsigned_literal(2)? as u8,
                output_gain: rb.read_signed16()?,
            })
        } else {
            None
        };

        let expanded_loudspeaker_layout = if loudspeaker_layout == LoudspeakerLayout::Expanded {
            Some(ExpandedLoudspeakerLayout::from_u8(rb.read_u8()?))
        } else {
            None
        };

        Ok(Self {
            loudspeaker_layout,
            recon_gain_is_present_flag,
            reserved_a,
            substream_count,
            coupled_substream_count,
            output_gain,
            expanded_loudspeaker_layout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScalableChannelLayoutConfig {
    pub reserved: u8,
    pub channel_audio_layer_configs: Vec<ChannelAudioLayerConfig>,
}

impl ScalableChannelLayoutConfig {
    pub fn single_layer(layer: ChannelAudioLayerConfig) -> Self {
        Self {
            reserved: 0,
            channel_audio_layer_configs: vec![layer],
        }
    }

    pub fn validate(&self, num_substreams: DecodedUleb128) -> Result<()> {
        let num_layers = self.channel_audio_layer_configs.len();
        if num_layers == 0 || num_layers > MAX_NUM_LAYERS {
            bail!(AudioElementError::InvalidNumLayers(num_layers.min(u8::MAX as usize) as u8));
        }

        let referenced: u32 = self
            .channel_audio_layer_configs
            .iter()
            .map(|layer| layer.substream_count as u32)
            .sum();
        if referenced != num_substreams {
            bail!(AudioElementError::SubstreamCountMismatch {
                referenced,
                declared: num_substreams,
            });
        }

        let has_binaural = self
            .channel_audio_layer_configs
            .iter()
            .any(|layer| layer.loudspeaker_layout == LoudspeakerLayout::Binaural);
        if has_binaural && num_layers != 1 {
            bail!(AudioElementError::BinauralWithMultipleLayers);
        }

        for layer in &self.channel_audio_layer_configs {
            if layer.loudspeaker_layout == LoudspeakerLayout::Expanded
                && layer.expanded_loudspeaker_layout.is_none()
            {
                bail!(AudioElementError::MissingExpandedLayout);
            }
        }

        Ok(())
    }

    pub fn recon_gain_is_present_flags(&self) -> Vec<bool> {
        self.channel_audio_layer_configs
            .iter()
            .map(|layer| layer.recon_gain_is_present_flag)
            .collect()
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_unsigned_literal(self.channel_audio_layer_configs.len() as u64, 3)?;
        wb.write_unsigned_literal(self.reserved as u64, 5)?;
        for layer in &self.channel_audio_layer_configs {
            layer.write(wb)?;
        }

        Ok(())
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let num_layers = rb.read_unsigned_literal(3)? as usize;
        let reserved = rb.read_unsigned_literal(5)? as u8;
        let mut channel_audio_layer_configs = Vec::with_capacity(num_layers);
        for _ in 0..num_layers {
            channel_audio_layer_configs.push(ChannelAudioLayerConfig::read(rb)?);
        }

        Ok(Self {
            reserved,
            channel_audio_layer_configs,
        })
    }
}

/// `(n + 1)^2` for `n` in `0..=14`.
pub fn is_valid_ambisonics_channel_count(count: u8) -> bool {
    (0u32..=14).any(|n| (n + 1) * (n + 1) == count as u32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbisonicsMonoConfig {
    pub output_channel_count: u8,
    pub substream_count: u8,
    /// Substream index per ambisonics channel number.
    pub channel_mapping: Vec<u8>,
}

impl AmbisonicsMonoConfig {
    pub fn validate(&self, num_substreams: DecodedUleb128) -> Result<()> {
        if !is_valid_ambisonics_channel_count(self.output_channel_count) {
            bail!(AudioElementError::InvalidAmbisonicsChannelCount(self.output_channel_count));
        }
        if self.channel_mapping.len() != self.output_channel_count as usize {
            bail!(AudioElementError::DemixingMatrixSize {
                expected: self.output_channel_count as usize,
                actual: self.channel_mapping.len(),
            });
        }
        if self.substream_count > self.output_channel_count {
            bail!(AudioElementError::TooManyAmbisonicsSubstreams {
                substreams: self.substream_count,
                channels: self.output_channel_count,
            });
        }
        if self.substream_count as u32 != num_substreams {
            bail!(AudioElementError::SubstreamCountMismatch {
                referenced: self.substream_count as u32,
                declared: num_substreams,
            });
        }

        let mut mapped = HashSet::new();
        for &index in &self.channel_mapping {
            if index == INACTIVE_AMBISONICS_CHANNEL {
                continue;
            }
            if index >= self.substream_count {
                bail!(AudioElementError::MappingOutOfRange {
                    index,
                    count: self.substream_count,
                });
            }
            mapped.insert(index);
        }
        if let Some(unmapped) = (0..self.substream_count).find(|i| !mapped.contains(i)) {
            bail!(AudioElementError::UnmappedSubstream(unmapped));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbisonicsProjectionConfig {
    pub output_channel_count: u8,
    pub substream_count: u8,
    pub coupled_substream_count: u8,
    /// Q15 coefficients, `(substream_count + coupled_substream_count) * output_channel_count`.
    pub demixing_matrix: Vec<i16>,
}

impl AmbisonicsProjectionConfig {
    pub fn num_demixing_matrix_elements(&self) -> usize {
        (self.substream_count as usize + self.coupled_substream_count as usize)
            * self.output_channel_count as usize
    }

    pub fn validate(&self, num_substreams: DecodedUleb128) -> Result<()> {
        if !is_valid_ambisonics_channel_count(self.output_channel_count) {
            bail!(AudioElementError::InvalidAmbisonicsChannelCount(self.output_channel_count));
        }
        if self.coupled_substream_count > self.substream_count {
            bail!(AudioElementError::TooManyCoupledSubstreams {
                coupled: self.coupled_substream_count,
                substreams: self.substream_count,
            });
        }
        let coded_channels = self.substream_count as u32 + self.coupled_substream_count as u32;
        if coded_channels > self.output_channel_count as u32 {
            bail!(AudioElementError::TooManyAmbisonicsSubstreams {
                substreams: coded_channels.min(u8::MAX as u32) as u8,
                channels: self.output_channel_count,
            });
        }
        if self.substream_count as u32 != num_substreams {
            bail!(AudioElementError::SubstreamCountMismatch {
                referenced: self.substream_count as u32,
                declared: num_substreams,
            });
        }
        if self.demixing_matrix.len() != self.num_demixing_matrix_elements() {
            bail!(AudioElementError::DemixingMatrixSize {
                expected: self.num_demixing_matrix_elements(),
                actual: self.demixing_matrix.len(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbisonicsConfig {
    Mono(AmbisonicsMonoConfig),
    Projection(AmbisonicsProjectionConfig),
    /// Unknown `ambisonics_mode`; nothing follows it.
    Reserved(DecodedUleb128),
}

impl AmbisonicsConfig {
    pub fn ambisonics_mode(&self) -> DecodedUleb128 {
        match self {
            AmbisonicsConfig::Mono(_) => 0,
            AmbisonicsConfig::Projection(_) => 1,
            AmbisonicsConfig::Reserved(mode) => *mode,
        }
    }

    pub fn output_channel_count(&self) -> Option<u8> {
        match self {
            AmbisonicsConfig::Mono(config) => Some(config.output_channel_count),
            AmbisonicsConfig::Projection(config) => Some(config.output_channel_count),
            AmbisonicsConfig::Reserved(_) => None,
        }
    }

    pub fn validate(&self, num_substreams: DecodedUleb128) -> Result<()> {
        match self {
            AmbisonicsConfig::Mono(config) => config.validate(num_substreams),
            AmbisonicsConfig::Projection(config) => config.validate(num_substreams),
            AmbisonicsConfig::Reserved(_) => Ok(()),
        }
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_uleb128(self.ambisonics_mode())?;
        match self {
            AmbisonicsConfig::Mono(config) => {
                wb.write_u8(config.output_channel_count)?;
                wb.write_u8(config.substream_count)?;
                wb.write_bytes(&config.channel_mapping)
            }
            AmbisonicsConfig::Projection(config) => {
                wb.write_u8(config.output_channel_count)?;
                wb.write_u8(config.substream_count)?;
                wb.write_u8(config.coupled_substream_count)?;
                for &coefficient in &config.demixing_matrix {
                    wb.write_signed16(coefficient)?;
                }
                Ok(())
            }
            AmbisonicsConfig::Reserved(_) => Ok(()),
        }
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        Ok(match rb.read_uleb128()? {
            0 => {
                let output_channel_count = rb.read_u8()?;
                let substream_count = rb.read_u8()?;
                let channel_mapping = rb.read_bytes(output_channel_count as usize)?;
                AmbisonicsConfig::Mono(AmbisonicsMonoConfig {
                    output_channel_count,
                    substream_count,
                    channel_mapping,
                })
            }
            1 => {
                let mut config = AmbisonicsProjectionConfig {
                    output_channel_count: rb.read_u8()?,
                    substream_count: rb.read_u8()?,
                    coupled_substream_count: rb.read_u8()?,
                    demixing_matrix: Vec::new(),
                };
                for _ in 0..config.num_demixing_matrix_elements() {
                    config.demixing_matrix.push(rb.read_signed16()?);
                }
                AmbisonicsConfig::Projection(config)
            }
            mode => AmbisonicsConfig::Reserved(mode),
        })
    }
}

/// The type-specific configuration. The variant fixes `audio_element_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioElementConfig {
    ScalableChannel(ScalableChannelLayoutConfig),
    Ambisonics(AmbisonicsConfig),
    /// Reserved `audio_element_type` (2..=7) with an opaque config.
    Extension {
        audio_element_type: u8,
        audio_element_config_bytes: Vec<u8>,
    },
}

impl AudioElementConfig {
    pub fn audio_element_type(&self) -> u8 {
        match self {
            AudioElementConfig::ScalableChannel(_) => 0,
            AudioElementConfig::Ambisonics(_) => 1,
            AudioElementConfig::Extension {
                audio_element_type, ..
            } => *audio_element_type,
        }
    }
}

/// One entry of the element's parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioElementParam {
    /// A demixing or recon gain definition.
    Defined(ParamDefinition),
    /// A definition of an unknown type, kept as its raw bytes.
    Extended {
        param_definition_type: DecodedUleb128,
        param_definition_bytes: Vec<u8>,
    },
}

impl AudioElementParam {
    pub fn param_type(&self) -> ParamDefinitionType {
        match self {
            AudioElementParam::Defined(definition) => definition.param_type(),
            AudioElementParam::Extended {
                param_definition_type,
                ..
            } => ParamDefinitionType::from_u32(*param_definition_type),
        }
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_uleb128(self.param_type().as_u32())?;
        match self {
            AudioElementParam::Defined(definition) => {
                if definition.param_type() == ParamDefinitionType::MixGain {
                    bail!(AudioElementError::IllegalParamType(ParamDefinitionType::MixGain));
                }
                definition.write(wb)
            }
            AudioElementParam::Extended {
                param_definition_bytes,
                ..
            } => {
                wb.write_uleb128(param_definition_bytes.len() as u32)?;
                wb.write_bytes(param_definition_bytes)
            }
        }
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let param_type = ParamDefinitionType::from_u32(rb.read_uleb128()?);
        Ok(match param_type {
            ParamDefinitionType::MixGain => {
                bail!(AudioElementError::IllegalParamType(param_type))
            }
            ParamDefinitionType::Demixing | ParamDefinitionType::ReconGain => {
                AudioElementParam::Defined(ParamDefinition::read(param_type, rb)?)
            }
            ParamDefinitionType::Extension(param_definition_type) => {
                let size = rb.read_uleb128()?;
                AudioElementParam::Extended {
                    param_definition_type,
                    param_definition_bytes: rb.read_bytes(size as usize)?,
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioElementObu {
    pub header: ObuHeader,
    pub audio_element_id: DecodedUleb128,
    pub reserved: u8,
    pub codec_config_id: DecodedUleb128,
    pub audio_substream_ids: Vec<DecodedUleb128>,
    pub audio_element_params: Vec<AudioElementParam>,
    pub config: AudioElementConfig,
}

impl AudioElementObu {
    pub fn new(
        audio_element_id: DecodedUleb128,
        codec_config_id: DecodedUleb128,
        audio_substream_ids: Vec<DecodedUleb128>,
        config: AudioElementConfig,
    ) -> Self {
        Self {
            header: ObuHeader::new(ObuType::AudioElement),
            audio_element_id,
            reserved: 0,
            codec_config_id,
            audio_substream_ids,
            audio_element_params: Vec::new(),
            config,
        }
    }

    /// Adds a parameter definition, filling recon gain flags from the layers.
    pub fn push_param(&mut self, mut param: AudioElementParam) {
        self.fill_recon_gain_flags(&mut param);
        self.audio_element_params.push(param);
    }

    fn fill_recon_gain_flags(&self, param: &mut AudioElementParam) {
        if let (
            AudioElementParam::Defined(ParamDefinition {
                kind: ParamKind::ReconGain {
                    recon_gain_is_present_flags,
                },
                ..
            }),
            AudioElementConfig::ScalableChannel(layout),
        ) = (param, &self.config)
        {
            *recon_gain_is_present_flags = layout.recon_gain_is_present_flags();
        }
    }

    pub fn audio_element_type(&self) -> u8 {
        self.config.audio_element_type()
    }

    pub fn num_substreams(&self) -> DecodedUleb128 {
        self.audio_substream_ids.len() as u32
    }

    /// Channels carried by each substream, in `audio_substream_ids` order.
    ///
    /// Coupled substreams come first within a layer and carry two channels.
    pub fn substream_channel_counts(&self) -> Vec<usize> {
        let coupled_then_mono = |substreams: u8, coupled: u8| {
            (0..substreams).map(move |i| if i < coupled { 2 } else { 1 })
        };

        match &self.config {
            AudioElementConfig::ScalableChannel(layout) => layout
                .channel_audio_layer_configs
                .iter()
                .flat_map(|layer| coupled_then_mono(layer.substream_count, layer.coupled_substream_count))
                .collect(),
            AudioElementConfig::Ambisonics(AmbisonicsConfig::Projection(config)) => {
                coupled_then_mono(config.substream_count, config.coupled_substream_count).collect()
            }
            _ => vec![1; self.audio_substream_ids.len()],
        }
    }

    pub fn num_coded_channels(&self) -> usize {
        self.substream_channel_counts().iter().sum()
    }

    /// Layout of the highest layer of a channel-based element.
    pub fn highest_loudspeaker_layout(&self) -> Option<LoudspeakerLayout> {
        match &self.config {
            AudioElementConfig::ScalableChannel(layout) => layout
                .channel_audio_layer_configs
                .last()
                .map(|layer| layer.loudspeaker_layout),
            _ => None,
        }
    }

    /// Parameter definitions this element declares, excluding extended ones.
    pub fn param_definitions(&self) -> impl Iterator<Item = &ParamDefinition> {
        self.audio_element_params.iter().filter_map(|param| match param {
            AudioElementParam::Defined(definition) => Some(definition),
            AudioElementParam::Extended { .. } => None,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for &id in &self.audio_substream_ids {
            if !seen.insert(id) {
                bail!(AudioElementError::DuplicateSubstreamId(id));
            }
        }

        let mut param_types = HashSet::new();
        for param in &self.audio_element_params {
            let param_type = param.param_type();
            if param_type == ParamDefinitionType::MixGain {
                bail!(AudioElementError::IllegalParamType(param_type));
            }
            if !param_types.insert(param_type) {
                bail!(AudioElementError::DuplicateParamType(param_type));
            }
        }

        match &self.config {
            AudioElementConfig::ScalableChannel(layout) => {
                layout.validate(self.num_substreams())?;
                let expected = layout.recon_gain_is_present_flags();
                for definition in self.param_definitions() {
                    if let ParamKind::ReconGain {
                        recon_gain_is_present_flags,
                    } = &definition.kind
                    {
                        if *recon_gain_is_present_flags != expected {
                            bail!(AudioElementError::ReconGainFlagsMismatch(self.audio_element_id));
                        }
                    }
                }
            }
            AudioElementConfig::Ambisonics(ambisonics) => ambisonics.validate(self.num_substreams())?,
            AudioElementConfig::Extension { .. } => {}
        }

        Ok(())
    }

    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        read_payload(payload_size, rb, |rb| {
            let audio_element_id = rb.read_uleb128()?;
            let audio_element_type = rb.read_unsigned_literal(3)? as u8;
            let reserved = rb.read_unsigned_literal(5)? as u8;
            let codec_config_id = rb.read_uleb128()?;

            let num_substreams = rb.read_uleb128()?;
            let mut audio_substream_ids = Vec::new();
            for _ in 0..num_substreams {
                audio_substream_ids.push(rb.read_uleb128()?);
            }

            let num_parameters = rb.read_uleb128()?;
            let mut params = Vec::new();
            for _ in 0..num_parameters {
                params.push(AudioElementParam::read(rb)?);
            }

            let config = match audio_element_type {
                0 => AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig::read(rb)?),
                1 => AudioElementConfig::Ambisonics(AmbisonicsConfig::read(rb)?),
                _ => {
                    let size = rb.read_uleb128()?;
                    AudioElementConfig::Extension {
                        audio_element_type,
                        audio_element_config_bytes: rb.read_bytes(size as usize)?,
                    }
                }
            };

            let mut obu = Self {
                header,
                audio_element_id,
                reserved,
                codec_config_id,
                audio_substream_ids,
                audio_element_params: Vec::with_capacity(params.len()),
                config,
            };
            for param in params {
                obu.push_param(param);
            }
            obu.validate()?;

            debug!(
                "Audio element {}: type={} codec_config={} substreams={:?} params={}",
                obu.audio_element_id,
                obu.audio_element_type(),
                obu.codec_config_id,
                obu.audio_substream_ids,
                obu.audio_element_params.len()
            );
            if let AudioElementConfig::ScalableChannel(layout) = &obu.config {
                for (i, layer) in layout.channel_audio_layer_configs.iter().enumerate() {
                    trace!("  layer {i}: {layer:?}");
                }
            }

            Ok(obu)
        })
    }
}

impl ObuBase for AudioElementObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        wb.write_uleb128(self.audio_element_id)?;
        wb.write_unsigned_literal(self.audio_element_type() as u64, 3)?;
        wb.write_unsigned_literal(self.reserved as u64, 5)?;
        wb.write_uleb128(self.codec_config_id)?;

        wb.write_uleb128(self.num_substreams())?;
        for &id in &self.audio_substream_ids {
            wb.write_uleb128(id)?;
        }

        wb.write_uleb128(self.audio_element_params.len() as u32)?;
        for param in &self.audio_element_params {
            param.write(wb)?;
        }

        match &self.config {
            AudioElementConfig::ScalableChannel(layout) => layout.write(wb),
            AudioElementConfig::Ambisonics(ambisonics) => ambisonics.write(wb),
            AudioElementConfig::Extension {
                audio_element_config_bytes,
                ..
            } => {
                wb.write_uleb128(audio_element_config_bytes.len() as u32)?;
                wb.write_bytes(audio_element_config_bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::param_definitions::{DefaultDemixingInfo, ParamDefinition};

    fn round_trip(obu: &AudioElementObu) -> anyhow::Result<(Vec<u8>, AudioElementObu)> {
        let mut wb = WriteBitBuffer::default();
        obu.validate_and_write(&mut wb)?;
        let bytes = wb.take_bytes()?;

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let (header, payload_size) = ObuHeader::read_and_validate(&mut rb)?;
        let read = AudioElementObu::create_from_buffer(header, payload_size, &mut rb)?;
        Ok((bytes, read))
    }

    fn stereo(audio_element_id: u32, substream_id: u32) -> AudioElementObu {
        AudioElementObu::new(
            audio_element_id,
            0,
            vec![substream_id],
            AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig::single_layer(
                ChannelAudioLayerConfig::new(LoudspeakerLayout::Stereo, 1, 1),
            )),
        )
    }

    #[test]
    fn stereo_layout() -> anyhow::Result<()> {
        let obu = stereo(300, 0);
        let (bytes, read) = round_trip(&obu)?;

        #[rustfmt::skip]
        let expected = [
            1 << 3, 11,
            // id 300, channel based, codec config 0
            0xac, 0x02, 0x00, 0,
            // one substream, no parameters
            1, 0, 0,
            // one layer: stereo, one coupled substream
            1 << 5, 1 << 4, 1, 1,
        ];
        assert_eq!(bytes, expected);
        assert_eq!(read, obu);

        Ok(())
    }

    #[test]
    fn layers_must_account_for_substreams() {
        let mut obu = stereo(1, 0);
        obu.audio_substream_ids.push(1);
        assert!(obu.validate().is_err());

        let mut duplicate = stereo(1, 0);
        duplicate.audio_substream_ids = vec![4, 4];
        if let AudioElementConfig::ScalableChannel(layout) = &mut duplicate.config {
            layout.channel_audio_layer_configs[0].substream_count = 2;
        }
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn binaural_must_be_alone() {
        let mut obu = stereo(1, 0);
        obu.audio_substream_ids = vec![0, 1];
        obu.config = AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig {
            reserved: 0,
            channel_audio_layer_configs: vec![
                ChannelAudioLayerConfig::new(LoudspeakerLayout::Binaural, 1, 1),
                ChannelAudioLayerConfig::new(LoudspeakerLayout::L5_1, 1, 1),
            ],
        });
        assert!(obu.validate().is_err());
    }

    #[test]
    fn expanded_layout_and_output_gain() -> anyhow::Result<()> {
        let mut layer = ChannelAudioLayerConfig::new(LoudspeakerLayout::Expanded, 1, 0);
        layer.expanded_loudspeaker_layout = Some(ExpandedLoudspeakerLayout::Lfe);
        layer.output_gain = Some(OutputGain {
            output_gain_flag: 0b100000,
            reserved: 0,
            output_gain: -768,
        });
        let obu = AudioElementObu::new(
            2,
            0,
            vec![9],
            AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig::single_layer(layer)),
        );

        let (_, read) = round_trip(&obu)?;
        assert_eq!(read, obu);
        assert_eq!(ExpandedLoudspeakerLayout::Lfe.channel_count(), Some(1));

        let mut missing = obu.clone();
        if let AudioElementConfig::ScalableChannel(layout) = &mut missing.config {
            layout.channel_audio_layer_configs[0].expanded_loudspeaker_layout = None;
        }
        assert!(missing.validate().is_err());

        Ok(())
    }

    #[test]
    fn recon_gain_flags_come_from_layers() -> anyhow::Result<()> {
        let mut base = ChannelAudioLayerConfig::new(LoudspeakerLayout::Stereo, 1, 1);
        base.recon_gain_is_present_flag = false;
        let mut surround = ChannelAudioLayerConfig::new(LoudspeakerLayout::L5_1, 3, 1);
        surround.recon_gain_is_present_flag = true;

        let mut obu = AudioElementObu::new(
            5,
            0,
            vec![0, 1, 2, 3],
            AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig {
                reserved: 0,
                channel_audio_layer_configs: vec![base, surround],
            }),
        );
        assert_eq!(obu.substream_channel_counts(), [2, 2, 1, 1]);
        assert_eq!(obu.num_coded_channels(), 6);
        assert_eq!(obu.highest_loudspeaker_layout(), Some(LoudspeakerLayout::L5_1));

        obu.push_param(AudioElementParam::Defined(ParamDefinition::new(
            10,
            48000,
            960,
            ParamKind::ReconGain {
                recon_gain_is_present_flags: Vec::new(),
            },
        )));
        obu.push_param(AudioElementParam::Defined(ParamDefinition::new(
            11,
            48000,
            960,
            ParamKind::Demixing(DefaultDemixingInfo::default()),
        )));

        let (_, read) = round_trip(&obu)?;
        assert_eq!(read, obu);
        let recon = read
            .param_definitions()
            .find(|definition| definition.param_type() == ParamDefinitionType::ReconGain);
        assert_eq!(
            recon.map(|definition| definition.kind.clone()),
            Some(ParamKind::ReconGain {
                recon_gain_is_present_flags: vec![false, true]
            })
        );

        obu.push_param(AudioElementParam::Defined(ParamDefinition::new(
            12,
            48000,
            960,
            ParamKind::Demixing(DefaultDemixingInfo::default()),
        )));
        assert!(obu.validate().is_err());

        Ok(())
    }

    #[test]
    fn mix_gain_is_not_an_element_param() {
        let mut obu = stereo(1, 0);
        obu.push_param(AudioElementParam::Defined(ParamDefinition::mix_gain(3, 48000, 960)));
        assert!(obu.validate().is_err());
    }

    #[test]
    fn extended_param_is_opaque() -> anyhow::Result<()> {
        let mut obu = stereo(1, 0);
        obu.push_param(AudioElementParam::Extended {
            param_definition_type: 7,
            param_definition_bytes: vec![1, 2, 3],
        });
        let (_, read) = round_trip(&obu)?;
        assert_eq!(read, obu);

        Ok(())
    }

    #[test]
    fn ambisonics_mono() -> anyhow::Result<()> {
        let obu = AudioElementObu::new(
            3,
            0,
            vec![0, 1, 2],
            AudioElementConfig::Ambisonics(AmbisonicsConfig::Mono(AmbisonicsMonoConfig {
                output_channel_count: 4,
                substream_count: 3,
                channel_mapping: vec![0, 1, INACTIVE_AMBISONICS_CHANNEL, 2],
            })),
        );
        let (_, read) = round_trip(&obu)?;
        assert_eq!(read, obu);

        let mut unmapped = obu.clone();
        unmapped.config = AudioElementConfig::Ambisonics(AmbisonicsConfig::Mono(AmbisonicsMonoConfig {
            output_channel_count: 4,
            substream_count: 3,
            channel_mapping: vec![0, 1, INACTIVE_AMBISONICS_CHANNEL, 1],
        }));
        assert!(unmapped.validate().is_err());

        let mut bad_count = obu;
        bad_count.config = AudioElementConfig::Ambisonics(AmbisonicsConfig::Mono(AmbisonicsMonoConfig {
            output_channel_count: 5,
            substream_count: 3,
            channel_mapping: vec![0, 1, 2, 2, 2],
        }));
        assert!(bad_count.validate().is_err());

        Ok(())
    }

    #[test]
    fn ambisonics_projection() -> anyhow::Result<()> {
        let config = AmbisonicsProjectionConfig {
            output_channel_count: 4,
            substream_count: 2,
            coupled_substream_count: 2,
            demixing_matrix: (0..16).collect(),
        };
        assert_eq!(config.num_demixing_matrix_elements(), 16);

        let obu = AudioElementObu::new(
            4,
            0,
            vec![0, 1],
            AudioElementConfig::Ambisonics(AmbisonicsConfig::Projection(config.clone())),
        );
        let (_, read) = round_trip(&obu)?;
        assert_eq!(read, obu);

        let short = AmbisonicsProjectionConfig {
            demixing_matrix: vec![0; 15],
            ..config
        };
        assert!(short.validate(2).is_err());

        Ok(())
    }

    #[test]
    fn reserved_type_keeps_config_bytes() -> anyhow::Result<()> {
        let obu = AudioElementObu::new(
            8,
            0,
            vec![],
            AudioElementConfig::Extension {
                audio_element_type: 5,
                audio_element_config_bytes: b"future".to_vec(),
            },
        );
        let (_, read) = round_trip(&obu)?;
        assert_eq!(read, obu);
        assert_eq!(read.audio_element_type(), 5);

        Ok(())
    }
}
