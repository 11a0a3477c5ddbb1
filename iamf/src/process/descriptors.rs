//! The descriptor OBUs of one IA sequence.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail};

use crate::obu::ObuBase;
use crate::obu::arbitrary::{ArbitraryObu, InsertionHook};
use crate::obu::audio_element::AudioElementObu;
use crate::obu::codec_config::CodecConfigObu;
use crate::obu::ia_sequence_header::IaSequenceHeaderObu;
use crate::obu::mix_presentation::MixPresentationObu;
use crate::obu::param_definitions::{ParamDefinitionMap, insert_param_definition};
use crate::utils::bit_buffer::WriteBitBuffer;
use crate::utils::errors::{MixPresentationError, ProcessorError, SequencerError};
use crate::utils::leb128::{DecodedUleb128, LebGenerator};

/// Descriptors keyed by id. Serialization order is canonical: the sequence header,
/// then codec configs, audio elements and mix presentations, with arbitrary OBUs
/// at their hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorObus {
    pub ia_sequence_header: IaSequenceHeaderObu,
    pub codec_configs: BTreeMap<DecodedUleb128, CodecConfigObu>,
    pub audio_elements: BTreeMap<DecodedUleb128, AudioElementObu>,
    /// In stream order; the first one is the default presentation.
    pub mix_presentations: Vec<MixPresentationObu>,
    pub arbitrary_obus: Vec<ArbitraryObu>,
}

/// Properties shared by every codec config, gathered for sequencers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorStatistics {
    pub common_samples_per_frame: u32,
    pub common_sample_rate: u32,
    pub common_bit_depth: u8,
    pub num_channels: usize,
    /// Known once a temporal unit with untrimmed samples was seen.
    pub first_untrimmed_timestamp: Option<i64>,
}

impl DescriptorObus {
    pub fn new(ia_sequence_header: IaSequenceHeaderObu) -> Self {
        Self {
            ia_sequence_header,
            codec_configs: BTreeMap::new(),
            audio_elements: BTreeMap::new(),
            mix_presentations: Vec::new(),
            arbitrary_obus: Vec::new(),
        }
    }

    pub fn insert_codec_config(&mut self, obu: CodecConfigObu) -> Result<()> {
        let id = obu.codec_config_id;
        if self.codec_configs.insert(id, obu).is_some() {
            bail!(SequencerError::DuplicateId {
                kind: "codec_config",
                id
            });
        }

        Ok(())
    }

    pub fn insert_audio_element(&mut self, obu: AudioElementObu) -> Result<()> {
        let id = obu.audio_element_id;
        if self.audio_elements.insert(id, obu).is_some() {
            bail!(SequencerError::DuplicateId {
                kind: "audio_element",
                id
            });
        }

        Ok(())
    }

    pub fn insert_mix_presentation(&mut self, obu: MixPresentationObu) -> Result<()> {
        let id = obu.mix_presentation_id;
        if self
            .mix_presentations
            .iter()
            .any(|existing| existing.mix_presentation_id == id)
        {
            bail!(SequencerError::DuplicateId {
                kind: "mix_presentation",
                id
            });
        }
        self.mix_presentations.push(obu);

        Ok(())
    }

    pub fn mix_presentation(&self, id: DecodedUleb128) -> Option<&MixPresentationObu> {
        self.mix_presentations
            .iter()
            .find(|mix_presentation| mix_presentation.mix_presentation_id == id)
    }

    pub fn codec_config_for(&self, audio_element: &AudioElementObu) -> Result<&CodecConfigObu> {
        match self.codec_configs.get(&audio_element.codec_config_id) {
            Some(codec_config) => Ok(codec_config),
            None => bail!(ProcessorError::UnknownCodecConfig(audio_element.codec_config_id)),
        }
    }

    /// Owning audio element of every substream.
    pub fn substream_owners(&self) -> Result<HashMap<DecodedUleb128, DecodedUleb128>> {
        let mut owners = HashMap::new();
        for audio_element in self.audio_elements.values() {
            for &substream_id in &audio_element.audio_substream_ids {
                if owners.insert(substream_id, audio_element.audio_element_id).is_some() {
                    bail!(SequencerError::DuplicateId {
                        kind: "audio_substream",
                        id: substream_id
                    });
                }
            }
        }

        Ok(owners)
    }

    /// Every definition declared by audio elements and mix presentations.
    pub fn param_definitions(&self) -> Result<ParamDefinitionMap> {
        let mut map = ParamDefinitionMap::new();
        let element_definitions = self
            .audio_elements
            .values()
            .flat_map(|audio_element| audio_element.param_definitions());
        let mix_definitions = self
            .mix_presentations
            .iter()
            .flat_map(|mix_presentation| mix_presentation.param_definitions());

        for definition in element_definitions.chain(mix_definitions) {
            insert_param_definition(&mut map, definition)?;
        }

        Ok(map)
    }

    /// Checks that every id reference resolves.
    pub fn validate(&self) -> Result<()> {
        self.ia_sequence_header.validate()?;

        for audio_element in self.audio_elements.values() {
            self.codec_config_for(audio_element)?;
        }
        self.substream_owners()?;

        for mix_presentation in &self.mix_presentations {
            for id in mix_presentation.audio_element_ids() {
                if !self.audio_elements.contains_key(&id) {
                    bail!(MixPresentationError::UnknownAudioElement(id));
                }
            }
        }

        self.param_definitions()?;

        Ok(())
    }

    pub fn statistics(&self) -> Result<DescriptorStatistics> {
        let mut codec_configs = self.codec_configs.values();
        let Some(first) = codec_configs.next() else {
            bail!(ProcessorError::NoCodecConfigs);
        };

        let common_sample_rate = first.output_sample_rate()?;
        let common_bit_depth = first.bit_depth_to_measure_loudness()?;
        for codec_config in codec_configs {
            if codec_config.num_samples_per_frame != first.num_samples_per_frame {
                bail!(SequencerError::InconsistentCodecConfigs("num_samples_per_frame"));
            }
            if codec_config.output_sample_rate()? != common_sample_rate {
                bail!(SequencerError::InconsistentCodecConfigs("sample_rate"));
            }
            if codec_config.bit_depth_to_measure_loudness()? != common_bit_depth {
                bail!(SequencerError::InconsistentCodecConfigs("bit_depth"));
            }
        }

        Ok(DescriptorStatistics {
            common_samples_per_frame: first.num_samples_per_frame,
            common_sample_rate,
            common_bit_depth,
            num_channels: self
                .audio_elements
                .values()
                .map(|audio_element| audio_element.num_coded_channels())
                .sum(),
            first_untrimmed_timestamp: None,
        })
    }

    pub fn write(&self, wb: &mut WriteBitBuffer) -> Result<()> {
        let arbitrary = &self.arbitrary_obus;

        ArbitraryObu::write_obus_with_hook(InsertionHook::BeforeDescriptors, arbitrary, wb)?;
        self.ia_sequence_header.validate_and_write(wb)?;
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterIaSequenceHeader, arbitrary, wb)?;

        for codec_config in self.codec_configs.values() {
            codec_config.validate_and_write(wb)?;
        }
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterCodecConfigs, arbitrary, wb)?;

        for audio_element in self.audio_elements.values() {
            audio_element.validate_and_write(wb)?;
        }
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterAudioElements, arbitrary, wb)?;

        for mix_presentation in &self.mix_presentations {
            mix_presentation.validate_and_write(wb)?;
        }
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterMixPresentations, arbitrary, wb)?;
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterDescriptors, arbitrary, wb)
    }

    pub fn serialize(&self, leb_generator: LebGenerator) -> Result<Vec<u8>> {
        let mut wb = WriteBitBuffer::new(leb_generator);
        self.write(&mut wb)?;
        wb.take_bytes()
    }
}
