//! Mix presentation OBU.
//!
//! A mix presentation describes how audio elements are mixed for playback: one or
//! more sub-mixes, each naming its elements with their gains and the layouts the
//! mix was measured on.

use std::collections::HashSet;

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::param_definitions::{ParamDefinition, ParamDefinitionType};
use crate::obu::{ObuBase, read_payload};
use crate::utils::bit_buffer::{ReadBitBuffer, WriteBitBuffer};
use crate::utils::errors::MixPresentationError;
use crate::utils::leb128::DecodedUleb128;

pub const CONTENT_LANGUAGE_TAG: &str = "content_language";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadphonesRenderingMode {
    Stereo,
    Binaural,
    Reserved(u8),
}

impl HeadphonesRenderingMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HeadphonesRenderingMode::Stereo,
            1 => HeadphonesRenderingMode::Binaural,
            other => HeadphonesRenderingMode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            HeadphonesRenderingMode::Stereo => 0,
            HeadphonesRenderingMode::Binaural => 1,
            HeadphonesRenderingMode::Reserved(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderingConfig {
    pub headphones_rendering_mode: HeadphonesRenderingMode,
    pub reserved: u8,
    /// Carried verbatim.
    pub rendering_config_extension_bytes: Vec<u8>,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            headphones_rendering_mode: HeadphonesRenderingMode::Stereo,
            reserved: 0,
            rendering_config_extension_bytes: Vec::new(),
        }
    }
}

impl RenderingConfig {
    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_unsigned_literal(self.headphones_rendering_mode.as_u8() as u64, 2)?;
        wb.write_unsigned_literal(self.reserved as u64, 6)?;
        wb.write_uleb128(self.rendering_config_extension_bytes.len() as u32)?;
        wb.write_bytes(&self.rendering_config_extension_bytes)
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let headphones_rendering_mode = HeadphonesRenderingMode::from_u8(rb.read_unsigned_literal(2)? as u8);
        let reserved = rb.read_unsigned_literal(6)? as u8;
        let size = rb.read_uleb128()?;

        Ok(Self {
            headphones_rendering_mode,
            reserved,
            rendering_config_extension_bytes: rb.read_bytes(size as usize)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMixAudioElement {
    pub audio_element_id: DecodedUleb128,
    /// One entry per `count_label`.
    pub localized_element_annotations: Vec<String>,
    pub rendering_config: RenderingConfig,
    pub element_mix_gain: ParamDefinition,
}

/// ITU-R BS.2051 sound systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundSystem {
    A0_2_0,
    B0_5_0,
    C2_5_0,
    D4_5_0,
    E4_5_1,
    F3_7_0,
    G4_9_0,
    H9_10_3,
    I0_7_0,
    J4_7_0,
    S10_2_7_0,
    S11_2_3_0,
    S12_0_1_0,
    S13_6_9_0,
    S14_5_7_4,
    Reserved(u8),
}

impl SoundSystem {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SoundSystem::A0_2_0,
            1 => SoundSystem::B0_5_0,
            2 => SoundSystem::C2_5_0,
            3 => SoundSystem::D4_5_0,
            4 => SoundSystem::E4_5_1,
            5 => SoundSystem::F3_7_0,
            6 => SoundSystem::G4_9_0,
            7 => SoundSystem::H9_10_3,
            8 => SoundSystem::I0_7_0,
            9 => SoundSystem::J4_7_0,
            10 => SoundSystem::S10_2_7_0,
            11 => SoundSystem::S11_2_3_0,
            12 => SoundSystem::S12_0_1_0,
            13 => SoundSystem::S13_6_9_0,
            14 => SoundSystem::S14_5_7_4,
            other => SoundSystem::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SoundSystem::A0_2_0 => 0,
            SoundSystem::B0_5_0 => 1,
            SoundSystem::C2_5_0 => 2,
            SoundSystem::D4_5_0 => 3,
            SoundSystem::E4_5_1 => 4,
            SoundSystem::F3_7_0 => 5,
            SoundSystem::G4_9_0 => 6,
            SoundSystem::H9_10_3 => 7,
            SoundSystem::I0_7_0 => 8,
            SoundSystem::J4_7_0 => 9,
            SoundSystem::S10_2_7_0 => 10,
            SoundSystem::S11_2_3_0 => 11,
            SoundSystem::S12_0_1_0 => 12,
            SoundSystem::S13_6_9_0 => 13,
            SoundSystem::S14_5_7_4 => 14,
            SoundSystem::Reserved(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutType {
    Reserved0,
    Reserved1,
    LoudspeakersSsConvention,
    Binaural,
}

/// A playback layout. The variant fixes the 2-bit `layout_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Reserved0 { reserved: u8 },
    Reserved1 { reserved: u8 },
    LoudspeakersSsConvention { sound_system: SoundSystem, reserved: u8 },
    Binaural { reserved: u8 },
}

impl Layout {
    pub fn stereo() -> Self {
        Layout::ss(SoundSystem::A0_2_0)
    }

    pub fn ss(sound_system: SoundSystem) -> Self {
        Layout::LoudspeakersSsConvention {
            sound_system,
            reserved: 0,
        }
    }

    pub fn binaural() -> Self {
        Layout::Binaural { reserved: 0 }
    }

    pub fn layout_type(&self) -> LayoutType {
        match self {
            Layout::Reserved0 { .. } => LayoutType::Reserved0,
            Layout::Reserved1 { .. } => LayoutType::Reserved1,
            Layout::LoudspeakersSsConvention { .. } => LayoutType::LoudspeakersSsConvention,
            Layout::Binaural { .. } => LayoutType::Binaural,
        }
    }

    pub fn is_stereo(&self) -> bool {
        matches!(
            self,
            Layout::LoudspeakersSsConvention {
                sound_system: SoundSystem::A0_2_0,
                ..
            }
        )
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        let layout_type = match self.layout_type() {
            LayoutType::Reserved0 => 0,
            LayoutType::Reserved1 => 1,
            LayoutType::LoudspeakersSsConvention => 2,
            LayoutType::Binaural => 3,
        };
        wb.write_unsigned_literal(layout_type, 2)?;

        match *self {
            Layout::LoudspeakersSsConvention {
                sound_system,
                reserved,
            } => {
                wb.write_unsigned_literal(sound_system.as_u8() as u64, 4)?;
                wb.write_unsigned_literal(reserved as u64, 2)
            }
            Layout::Reserved0 { reserved }
            | Layout::Reserved1 { reserved }
            | Layout::Binaural { reserved } => wb.write_unsigned_literal(reserved as u64, 6),
        }
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let layout_type = rb.read_unsigned_literal(2)?;
        if layout_type == 2 {
            let sound_system = SoundSystem::from_u8(rb.read_unsigned_literal(4)? as u8);
            let reserved = rb.read_unsigned_literal(2)? as u8;
            return Ok(Layout::LoudspeakersSsConvention {
                sound_system,
                reserved,
            });
        }

        // Reserved layouts share the binaural syntax.
        let reserved = rb.read_unsigned_literal(6)? as u8;
        Ok(match layout_type {
            0 => Layout::Reserved0 { reserved },
            1 => Layout::Reserved1 { reserved },
            _ => Layout::Binaural { reserved },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorElement {
    Unknown,
    Dialogue,
    Album,
    Reserved(u8),
}

impl AnchorElement {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AnchorElement::Unknown,
            1 => AnchorElement::Dialogue,
            2 => AnchorElement::Album,
            other => AnchorElement::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            AnchorElement::Unknown => 0,
            AnchorElement::Dialogue => 1,
            AnchorElement::Album => 2,
            AnchorElement::Reserved(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchoredLoudnessElement {
    pub anchor_element: AnchorElement,
    pub anchored_loudness: i16,
}

pub mod info_type {
    pub const TRUE_PEAK: u8 = 0x01;
    pub const ANCHORED_LOUDNESS: u8 = 0x02;
    /// Any of these bits announces a `layout_extension`.
    pub const ANY_LAYOUT_EXTENSION: u8 = 0xfc;
}

/// Loudness measured on one layout. All levels are Q7.8 dB.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoudnessInfo {
    pub info_type: u8,
    pub integrated_loudness: i16,
    pub digital_peak: i16,
    pub true_peak: i16,
    pub anchored_loudness: Vec<AnchoredLoudnessElement>,
    pub layout_extension: Vec<u8>,
}

impl LoudnessInfo {
    fn validate(&self) -> Result<()> {
        if self.info_type & info_type::ANCHORED_LOUDNESS != 0 {
            let mut seen = HashSet::new();
            for element in &self.anchored_loudness {
                if !seen.insert(element.anchor_element) {
                    bail!(MixPresentationError::DuplicateAnchor(element.anchor_element));
                }
            }
        }

        if !self.layout_extension.is_empty() && self.info_type & info_type::ANY_LAYOUT_EXTENSION == 0 {
            bail!(MixPresentationError::UnexpectedLayoutExtension(self.info_type));
        }

        Ok(())
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        wb.write_u8(self.info_type)?;
        wb.write_signed16(self.integrated_loudness)?;
        wb.write_signed16(self.digital_peak)?;

        if self.info_type & info_type::TRUE_PEAK != 0 {
            wb.write_signed16(self.true_peak)?;
        }

        if self.info_type & info_type::ANCHORED_LOUDNESS != 0 {
            let Ok(count) = u8::try_from(self.anchored_loudness.len()) else {
                bail!(MixPresentationError::CountLabelMismatch {
                    field: "anchored_loudness",
                    expected: u8::MAX as usize,
                    actual: self.anchored_loudness.len(),
                });
            };
            wb.write_u8(count)?;
            for element in &self.anchored_loudness {
                wb.write_u8(element.anchor_element.as_u8())?;
                wb.write_signed16(element.anchored_loudness)?;
            }
        }

        if self.info_type & info_type::ANY_LAYOUT_EXTENSION != 0 {
            wb.write_uleb128(self.layout_extension.len() as u32)?;
            wb.write_bytes(&self.layout_extension)?;
        }

        Ok(())
    }

    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let mut loudness = LoudnessInfo {
            info_type: rb.read_u8()?,
            integrated_loudness: rb.read_signed16()?,
            digital_peak: rb.read_signed16()?,
            ..Default::default()
        };

        if loudness.info_type & info_type::TRUE_PEAK != 0 {
            loudness.true_peak = rb.read_signed16()?;
        }

        if loudness.info_type & info_type::ANCHORED_LOUDNESS != 0 {
            let count = rb.read_u8()?;
            for _ in 0..count {
                loudness.anchored_loudness.push(AnchoredLoudnessElement {
                    anchor_element: AnchorElement::from_u8(rb.read_u8()?),
                    anchored_loudness: rb.read_signed16()?,
                });
            }
        }

        if loudness.info_type & info_type::ANY_LAYOUT_EXTENSION != 0 {
            let size = rb.read_uleb128()?;
            loudness.layout_extension = rb.read_bytes(size as usize)?;
        }

        loudness.validate()?;
        Ok(loudness)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentationLayout {
    pub loudness_layout: Layout,
    pub loudness: LoudnessInfo,
}

impl MixPresentationLayout {
    pub fn new(loudness_layout: Layout) -> Self {
        Self {
            loudness_layout,
            loudness: LoudnessInfo::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentationSubMix {
    pub audio_elements: Vec<SubMixAudioElement>,
    pub output_mix_gain: ParamDefinition,
    pub layouts: Vec<MixPresentationLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub tag_name: String,
    pub tag_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MixPresentationTags {
    pub tags: Vec<Tag>,
}

impl MixPresentationTags {
    pub fn validate(&self) -> Result<()> {
        if self.tags.len() > u8::MAX as usize {
            bail!(MixPresentationError::TooManyTags(self.tags.len()));
        }

        let mut content_language_seen = false;
        for tag in self.tags.iter().filter(|tag| tag.tag_name == CONTENT_LANGUAGE_TAG) {
            if tag.tag_value.chars().count() != 3 {
                bail!(MixPresentationError::InvalidContentLanguage(tag.tag_value.clone()));
            }
            if content_language_seen {
                bail!(MixPresentationError::DuplicateContentLanguage);
            }
            content_language_seen = true;
        }

        Ok(())
    }

    fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;
        wb.write_u8(self.tags.len() as u8)?;
        for tag in &self.tags {
            wb.write_string(&tag.tag_name)?;
            wb.write_string(&tag.tag_value)?;
        }

        Ok(())
    }

    /// Reads tags without validating them; duplicates are tolerated on input.
    fn read(rb: &mut ReadBitBuffer) -> Result<Self> {
        let num_tags = rb.read_u8()?;
        let mut tags = Vec::with_capacity(num_tags as usize);
        for _ in 0..num_tags {
            tags.push(Tag {
                tag_name: rb.read_string()?,
                tag_value: rb.read_string()?,
            });
        }

        Ok(Self { tags })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentationObu {
    pub header: ObuHeader,
    pub mix_presentation_id: DecodedUleb128,
    pub count_label: DecodedUleb128,
    pub annotations_language: Vec<String>,
    pub localized_presentation_annotations: Vec<String>,
    pub sub_mixes: Vec<MixPresentationSubMix>,
    pub mix_presentation_tags: Option<MixPresentationTags>,
    /// Trailing payload bytes this crate does not interpret, kept verbatim.
    pub footer: Vec<u8>,
}

impl MixPresentationObu {
    pub fn new(mix_presentation_id: DecodedUleb128, sub_mixes: Vec<MixPresentationSubMix>) -> Self {
        Self {
            header: ObuHeader::new(ObuType::MixPresentation),
            mix_presentation_id,
            count_label: 0,
            annotations_language: Vec::new(),
            localized_presentation_annotations: Vec::new(),
            sub_mixes,
            mix_presentation_tags: None,
            footer: Vec::new(),
        }
    }

    /// Element and output mix gain definitions of every sub-mix.
    pub fn param_definitions(&self) -> impl Iterator<Item = &ParamDefinition> {
        self.sub_mixes.iter().flat_map(|sub_mix| {
            sub_mix
                .audio_elements
                .iter()
                .map(|element| &element.element_mix_gain)
                .chain(std::iter::once(&sub_mix.output_mix_gain))
        })
    }

    pub fn audio_element_ids(&self) -> impl Iterator<Item = DecodedUleb128> + '_ {
        self.sub_mixes
            .iter()
            .flat_map(|sub_mix| sub_mix.audio_elements.iter().map(|element| element.audio_element_id))
    }

    fn check_count(&self, field: &'static str, actual: usize) -> Result<()> {
        if actual != self.count_label as usize {
            bail!(MixPresentationError::CountLabelMismatch {
                field,
                expected: self.count_label as usize,
                actual,
            });
        }

        Ok(())
    }

    /// Checks everything that is also enforced on input.
    fn validate_structure(&self) -> Result<()> {
        self.check_count("annotations_language", self.annotations_language.len())?;
        self.check_count(
            "localized_presentation_annotations",
            self.localized_presentation_annotations.len(),
        )?;

        let mut languages = HashSet::new();
        for language in &self.annotations_language {
            if !languages.insert(language) {
                bail!(MixPresentationError::DuplicateLanguage(language.clone()));
            }
        }

        if self.sub_mixes.is_empty() {
            bail!(MixPresentationError::NoSubMixes);
        }

        let mut audio_element_ids = HashSet::new();
        for (i, sub_mix) in self.sub_mixes.iter().enumerate() {
            if sub_mix.audio_elements.is_empty() {
                bail!(MixPresentationError::NoAudioElements(i));
            }

            for element in &sub_mix.audio_elements {
                if !audio_element_ids.insert(element.audio_element_id) {
                    bail!(MixPresentationError::DuplicateAudioElement(element.audio_element_id));
                }
                self.check_count(
                    "localized_element_annotations",
                    element.localized_element_annotations.len(),
                )?;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_structure()?;

        for (i, sub_mix) in self.sub_mixes.iter().enumerate() {
            if sub_mix.layouts.is_empty() {
                bail!(MixPresentationError::NoLayouts(i));
            }
            if !sub_mix.layouts.iter().any(|layout| layout.loudness_layout.is_stereo()) {
                bail!(MixPresentationError::MissingStereoLayout(i));
            }
            for layout in &sub_mix.layouts {
                layout.loudness.validate()?;
            }

            let gains = sub_mix
                .audio_elements
                .iter()
                .map(|element| &element.element_mix_gain)
                .chain(std::iter::once(&sub_mix.output_mix_gain));
            for gain in gains {
                if gain.param_type() != ParamDefinitionType::MixGain {
                    bail!(MixPresentationError::NotMixGain);
                }
            }
        }

        if let Some(tags) = &self.mix_presentation_tags {
            tags.validate()?;
        }

        Ok(())
    }

    fn read_sub_mix(count_label: u32, rb: &mut ReadBitBuffer) -> Result<MixPresentationSubMix> {
        let num_audio_elements = rb.read_uleb128()?;
        let mut audio_elements = Vec::new();
        for _ in 0..num_audio_elements {
            let audio_element_id = rb.read_uleb128()?;
            let mut localized_element_annotations = Vec::new();
            for _ in 0..count_label {
                localized_element_annotations.push(rb.read_string()?);
            }
            audio_elements.push(SubMixAudioElement {
                audio_element_id,
                localized_element_annotations,
                rendering_config: RenderingConfig::read(rb)?,
                element_mix_gain: ParamDefinition::read(ParamDefinitionType::MixGain, rb)?,
            });
        }

        let output_mix_gain = ParamDefinition::read(ParamDefinitionType::MixGain, rb)?;

        let num_layouts = rb.read_uleb128()?;
        let mut layouts = Vec::new();
        for _ in 0..num_layouts {
            layouts.push(MixPresentationLayout {
                loudness_layout: Layout::read(rb)?,
                loudness: LoudnessInfo::read(rb)?,
            });
        }

        Ok(MixPresentationSubMix {
            audio_elements,
            output_mix_gain,
            layouts,
        })
    }

    pub fn create_from_buffer(
        header: ObuHeader,
        payload_size: u64,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        read_payload(payload_size, rb, |rb| {
            let mix_presentation_id = rb.read_uleb128()?;
            let count_label = rb.read_uleb128()?;

            let mut annotations_language = Vec::new();
            for _ in 0..count_label {
                annotations_language.push(rb.read_string()?);
            }
            let mut localized_presentation_annotations = Vec::new();
            for _ in 0..count_label {
                localized_presentation_annotations.push(rb.read_string()?);
            }

            let num_sub_mixes = rb.read_uleb128()?;
            let mut sub_mixes = Vec::new();
            for _ in 0..num_sub_mixes {
                sub_mixes.push(Self::read_sub_mix(count_label, rb)?);
            }

            let mut mix_presentation_tags = None;
            if rb.num_bytes_available() > 0 {
                let position = rb.tell();
                match MixPresentationTags::read(rb) {
                    Ok(tags) => mix_presentation_tags = Some(tags),
                    Err(e) => {
                        warn!("Mix presentation {mix_presentation_id}: keeping trailing bytes as footer: {e}");
                        rb.seek(position)?;
                    }
                }
            }
            let footer = rb.read_bytes(rb.num_bytes_available())?;

            let obu = Self {
                header,
                mix_presentation_id,
                count_label,
                annotations_language,
                localized_presentation_annotations,
                sub_mixes,
                mix_presentation_tags,
                footer,
            };
            obu.validate_structure()?;

            debug!(
                "Mix presentation {}: sub_mixes={} elements={:?} tags={}",
                obu.mix_presentation_id,
                obu.sub_mixes.len(),
                obu.audio_element_ids().collect::<Vec<_>>(),
                obu.mix_presentation_tags.as_ref().map_or(0, |tags| tags.tags.len())
            );

            Ok(obu)
        })
    }
}

impl ObuBase for MixPresentationObu {
    fn header(&self) -> &ObuHeader {
        &self.header
    }

    fn validate_and_write_payload(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        wb.write_uleb128(self.mix_presentation_id)?;
        wb.write_uleb128(self.count_label)?;
        for language in &self.annotations_language {
            wb.write_string(language)?;
        }
        for annotation in &self.localized_presentation_annotations {
            wb.write_string(annotation)?;
        }

        wb.write_uleb128(self.sub_mixes.len() as u32)?;
        for sub_mix in &self.sub_mixes {
            wb.write_uleb128(sub_mix.audio_elements.len() as u32)?;
            for element in &sub_mix.audio_elements {
                wb.write_uleb128(element.audio_element_id)?;
                for annotation in &element.localized_element_annotations {
                    wb.write_string(annotation)?;
                }
                element.rendering_config.write(wb)?;
                element.element_mix_gain.write(wb)?;
            }

            sub_mix.output_mix_gain.write(wb)?;

            wb.write_uleb128(sub_mix.layouts.len() as u32)?;
            for layout in &sub_mix.layouts {
                layout.loudness_layout.write(wb)?;
                layout.loudness.write(wb)?;
            }
        }

        if let Some(tags) = &self.mix_presentation_tags {
            tags.write(wb)?;
        }
        wb.write_bytes(&self.footer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::param_definitions::ParamKind;

    fn mode_1_gain(parameter_id: u32, parameter_rate: u32, default_mix_gain: i16) -> ParamDefinition {
        let mut definition = ParamDefinition::new(
            parameter_id,
            parameter_rate,
            0,
            ParamKind::MixGain { default_mix_gain },
        );
        definition.param_definition_mode = true;
        definition.constant_subblock_duration = 0;
        definition
    }

    fn sample_obu() -> MixPresentationObu {
        let mut obu = MixPresentationObu::new(
            10,
            vec![MixPresentationSubMix {
                audio_elements: vec![SubMixAudioElement {
                    audio_element_id: 11,
                    localized_element_annotations: vec!["Submix 1".into()],
                    rendering_config: RenderingConfig::default(),
                    element_mix_gain: mode_1_gain(12, 13, 14),
                }],
                output_mix_gain: mode_1_gain(15, 16, 17),
                layouts: vec![MixPresentationLayout {
                    loudness_layout: Layout::stereo(),
                    loudness: LoudnessInfo {
                        info_type: info_type::TRUE_PEAK,
                        integrated_loudness: 18,
                        digital_peak: 19,
                        true_peak: 20,
                        ..Default::default()
                    },
                }],
            }],
        );
        obu.count_label = 1;
        obu.annotations_language = vec!["en-us".into()];
        obu.localized_presentation_annotations = vec!["Mix 1".into()];
        obu
    }

    fn write(obu: &MixPresentationObu) -> anyhow::Result<Vec<u8>> {
        let mut wb = WriteBitBuffer::default();
        obu.validate_and_write(&mut wb)?;
        wb.take_bytes()
    }

    fn read(bytes: &[u8]) -> anyhow::Result<MixPresentationObu> {
        let mut rb = ReadBitBuffer::from_slice(bytes);
        let (header, payload_size) = ObuHeader::read_and_validate(&mut rb)?;
        MixPresentationObu::create_from_buffer(header, payload_size, &mut rb)
    }

    #[test]
    fn layout_of_a_single_sub_mix() -> anyhow::Result<()> {
        let obu = sample_obu();
        let bytes = write(&obu)?;

        #[rustfmt::skip]
        let expected = [
            2 << 3, 47,
            10, 1, b'e', b'n', b'-', b'u', b's', 0, b'M', b'i', b'x', b' ', b'1', 0,
            1,
            1, 11, b'S', b'u', b'b', b'm', b'i', b'x', b' ', b'1', 0,
            0, 0,
            12, 13, 0x80, 0, 14,
            15, 16, 0x80, 0, 17,
            1,
            2 << 6,
            info_type::TRUE_PEAK, 0, 18, 0, 19, 0, 20,
        ];
        assert_eq!(bytes, expected);
        assert_eq!(read(&bytes)?, obu);

        Ok(())
    }

    #[test]
    fn layout_extension_is_kept() -> anyhow::Result<()> {
        let mut obu = sample_obu();
        let loudness = &mut obu.sub_mixes[0].layouts[0].loudness;
        loudness.info_type = 0x04;
        loudness.layout_extension = b"extra".to_vec();

        let bytes = write(&obu)?;
        assert_eq!(bytes[1], 51);
        assert_eq!(&bytes[bytes.len() - 6..], [5, b'e', b'x', b't', b'r', b'a']);
        assert_eq!(read(&bytes)?, obu);

        let mut stray = sample_obu();
        stray.sub_mixes[0].layouts[0].loudness.layout_extension = vec![1];
        assert!(write(&stray).is_err());

        Ok(())
    }

    #[test]
    fn anchored_loudness_must_be_unique() -> anyhow::Result<()> {
        let mut obu = sample_obu();
        let loudness = &mut obu.sub_mixes[0].layouts[0].loudness;
        loudness.info_type = info_type::ANCHORED_LOUDNESS;
        loudness.anchored_loudness = vec![
            AnchoredLoudnessElement {
                anchor_element: AnchorElement::Album,
                anchored_loudness: 20,
            },
            AnchoredLoudnessElement {
                anchor_element: AnchorElement::Dialogue,
                anchored_loudness: 21,
            },
        ];
        let bytes = write(&obu)?;
        assert_eq!(bytes[1], 52);
        assert_eq!(read(&bytes)?, obu);

        obu.sub_mixes[0].layouts[0].loudness.anchored_loudness[1].anchor_element = AnchorElement::Album;
        assert!(write(&obu).is_err());

        Ok(())
    }

    #[test]
    fn structural_requirements() {
        let mut no_stereo = sample_obu();
        no_stereo.sub_mixes[0].layouts[0].loudness_layout = Layout::ss(SoundSystem::B0_5_0);
        assert!(write(&no_stereo).is_err());

        let mut mismatched = sample_obu();
        mismatched.localized_presentation_annotations.clear();
        assert!(write(&mismatched).is_err());

        let mut duplicate_language = sample_obu();
        duplicate_language.count_label = 2;
        duplicate_language.annotations_language.push("en-us".into());
        duplicate_language.localized_presentation_annotations.push("Mix 2".into());
        duplicate_language.sub_mixes[0].audio_elements[0]
            .localized_element_annotations
            .push("Submix 2".into());
        assert!(write(&duplicate_language).is_err());

        let mut duplicate_element = sample_obu();
        let element = duplicate_element.sub_mixes[0].audio_elements[0].clone();
        duplicate_element.sub_mixes[0].audio_elements.push(element);
        assert!(write(&duplicate_element).is_err());

        let mut empty = sample_obu();
        empty.sub_mixes.clear();
        assert!(write(&empty).is_err());
    }

    #[test]
    fn tags_and_footer() -> anyhow::Result<()> {
        let mut obu = sample_obu();
        obu.mix_presentation_tags = Some(MixPresentationTags {
            tags: vec![
                Tag {
                    tag_name: CONTENT_LANGUAGE_TAG.into(),
                    tag_value: "eng".into(),
                },
                Tag {
                    tag_name: "genre".into(),
                    tag_value: "jazz".into(),
                },
                Tag {
                    tag_name: "genre".into(),
                    tag_value: "blues".into(),
                },
            ],
        });
        obu.footer = vec![0xde, 0xad];
        assert_eq!(read(&write(&obu)?)?, obu);

        let mut duplicate = obu.clone();
        if let Some(tags) = &mut duplicate.mix_presentation_tags {
            tags.tags.push(Tag {
                tag_name: CONTENT_LANGUAGE_TAG.into(),
                tag_value: "fra".into(),
            });
        }
        assert!(write(&duplicate).is_err());

        let mut long = obu;
        if let Some(tags) = &mut long.mix_presentation_tags {
            tags.tags[0].tag_value = "english".into();
        }
        assert!(write(&long).is_err());

        Ok(())
    }

    #[test]
    fn unparseable_trailing_bytes_become_footer() -> anyhow::Result<()> {
        let mut bytes = write(&sample_obu())?;
        // One tag whose name never terminates.
        bytes.extend_from_slice(&[1, b'x']);
        bytes[1] += 2;

        let read = read(&bytes)?;
        assert_eq!(read.mix_presentation_tags, None);
        assert_eq!(read.footer, [1, b'x']);

        Ok(())
    }
}
