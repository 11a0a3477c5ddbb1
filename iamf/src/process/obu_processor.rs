//! Reading an IA sequence back into descriptors and temporal units.
//!
//! Descriptor OBUs are read first, either from a complete buffer or
//! incrementally as bytes arrive. After that [`ObuProcessor::process_temporal_unit`]
//! groups the following OBUs into [`TemporalUnit`]s. A unit ends when:
//!
//! - a second temporal delimiter arrives,
//! - a parameter block follows audio frames,
//! - an audio frame starts at a later timestamp or repeats a substream,
//! - a non-redundant IA sequence header starts the next sequence,
//! - or the stream ends.
//!
//! Whenever the buffer runs dry in the middle of an OBU the cursor is left at
//! the start of that OBU so the caller can push more bytes and retry.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::{debug, info, trace};

use crate::log_or_err;
use crate::obu::audio_element::AudioElementObu;
use crate::obu::audio_frame::AudioFrameObu;
use crate::obu::codec_config::CodecConfigObu;
use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::ia_sequence_header::IaSequenceHeaderObu;
use crate::obu::mix_presentation::{Layout, MixPresentationObu};
use crate::obu::param_definitions::ParamDefinitionMap;
use crate::obu::parameter_block::ParameterBlockObu;
use crate::obu::take_payload;
use crate::obu::temporal_delimiter::TemporalDelimiterObu;
use crate::process::codec::{SubstreamDecoder, SubstreamDecoderFactory, create_substream_decoder};
use crate::process::descriptors::DescriptorObus;
use crate::process::layout::{SelectedLayout, select_mix_presentation_and_layout};
use crate::process::render::{RendererFactory, RenderingMixer};
use crate::process::temporal_unit::TemporalUnit;
use crate::process::timing::GlobalTimingModule;
use crate::utils::bit_buffer::ReadBitBuffer;
use crate::utils::errors::{ErrorKind, ObuError, ProcessorError, error_kind, is_resource_exhausted};
use crate::utils::leb128::DecodedUleb128;

/// Codec configs with shorter payloads cannot carry a decoder config.
const MIN_CODEC_CONFIG_PAYLOAD_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// The buffer holds every descriptor OBU; running out of data ends them.
    pub is_exhaustive: bool,
    pub fail_level: log::Level,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            is_exhaustive: false,
            fail_level: log::Level::Error,
        }
    }
}

/// Optional codec and renderer plug-ins used for rendering.
#[derive(Default)]
pub struct RenderingFactories {
    pub substream_decoder: Option<SubstreamDecoderFactory>,
    pub renderer: Option<RendererFactory>,
}

/// Rendered PCM of one temporal unit, after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemporalUnit {
    pub start_timestamp: i64,
    /// Left-justified samples organised as `[sample][channel]`.
    pub samples: Vec<Vec<i32>>,
}

struct DescriptorReader {
    fail_level: log::Level,
    is_exhaustive: bool,
}

impl DescriptorReader {
    /// Reads descriptors, rewinding `rb` on failure.
    fn read(&self, rb: &mut ReadBitBuffer) -> Result<DescriptorObus> {
        let start = rb.tell();
        match self.read_inner(rb) {
            Ok(descriptors) => Ok(descriptors),
            Err(e) => {
                rb.seek(start)?;
                if is_resource_exhausted(&e) {
                    trace!("Descriptors incomplete: {e}");
                    bail!(ProcessorError::InsufficientData);
                }
                Err(e)
            }
        }
    }

    fn read_inner(&self, rb: &mut ReadBitBuffer) -> Result<DescriptorObus> {
        let mut ia_sequence_header: Option<IaSequenceHeaderObu> = None;
        let mut codec_configs = Vec::new();
        let mut audio_elements = Vec::new();
        let mut mix_presentations = Vec::new();

        loop {
            if rb.num_bits_available() == 0 {
                if self.is_exhaustive {
                    break;
                }
                bail!(ProcessorError::InsufficientData);
            }

            let obu_start = rb.tell();
            let (obu_type, total_size) = ObuHeader::peek_type_and_total_size(rb)?;
            if obu_type.is_temporal_unit_obu() {
                debug!("{obu_type:?} ends the descriptor OBUs");
                break;
            }
            if !rb.can_read_bytes(total_size as usize) {
                bail!(ProcessorError::InsufficientData);
            }

            let (header, payload_size) = ObuHeader::read_and_validate(rb)?;
            if ia_sequence_header.is_none() && !matches!(obu_type, ObuType::IaSequenceHeader | ObuType::Reserved(_)) {
                bail!(ProcessorError::MissingSequenceHeader);
            }
            let redundant = header.obu_redundant_copy;

            match obu_type {
                ObuType::IaSequenceHeader => {
                    if ia_sequence_header.is_some() {
                        if redundant {
                            rb.ignore_bytes(payload_size as usize)?;
                            continue;
                        }
                        rb.seek(obu_start)?;
                        info!("A new IA sequence starts before any temporal unit");
                        break;
                    }
                    ia_sequence_header = Some(IaSequenceHeaderObu::create_from_buffer(header, payload_size, rb)?);
                }
                ObuType::CodecConfig => {
                    if payload_size < MIN_CODEC_CONFIG_PAYLOAD_SIZE {
                        rb.ignore_bytes(payload_size as usize)?;
                        log_or_err!(self, Warn, anyhow!(ProcessorError::UndersizedCodecConfig(payload_size)));
                        continue;
                    }
                    let obu = CodecConfigObu::create_from_buffer(header, payload_size, rb)?;
                    let known = codec_configs
                        .iter()
                        .any(|c: &CodecConfigObu| c.codec_config_id == obu.codec_config_id);
                    if !(redundant && known) {
                        codec_configs.push(obu);
                    }
                }
                ObuType::AudioElement => {
                    let obu = AudioElementObu::create_from_buffer(header, payload_size, rb)?;
                    let known = audio_elements
                        .iter()
                        .any(|a: &AudioElementObu| a.audio_element_id == obu.audio_element_id);
                    if !(redundant && known) {
                        audio_elements.push(obu);
                    }
                }
                ObuType::MixPresentation => {
                    let obu = MixPresentationObu::create_from_buffer(header, payload_size, rb)?;
                    let known = mix_presentations
                        .iter()
                        .any(|m: &MixPresentationObu| m.mix_presentation_id == obu.mix_presentation_id);
                    if !(redundant && known) {
                        mix_presentations.push(obu);
                    }
                }
                ObuType::Reserved(code) => {
                    rb.ignore_bytes(payload_size as usize)?;
                    log_or_err!(self, Warn, anyhow!(ProcessorError::ReservedObu(code)));
                }
                other => bail!(ObuError::UnexpectedObu(other)),
            }
        }

        let Some(ia_sequence_header) = ia_sequence_header else {
            bail!(ProcessorError::MissingSequenceHeader);
        };

        let mut descriptors = DescriptorObus::new(ia_sequence_header);
        for obu in codec_configs {
            descriptors.insert_codec_config(obu)?;
        }
        for obu in audio_elements {
            descriptors.insert_audio_element(obu)?;
        }
        for obu in mix_presentations {
            descriptors.insert_mix_presentation(obu)?;
        }

        if descriptors.codec_configs.is_empty() {
            bail!(ProcessorError::NoCodecConfigs);
        }
        descriptors.validate()?;

        info!(
            "Read descriptors: {} codec configs, {} audio elements, {} mix presentations",
            descriptors.codec_configs.len(),
            descriptors.audio_elements.len(),
            descriptors.mix_presentations.len()
        );

        Ok(descriptors)
    }
}

struct RenderingPipeline {
    selected: SelectedLayout,
    mixer: RenderingMixer,
    decoders: HashMap<DecodedUleb128, Box<dyn SubstreamDecoder>>,
    /// Element id with its `(substream id, channel count)` pairs, in coded order.
    elements: Vec<(DecodedUleb128, Vec<(DecodedUleb128, usize)>)>,
}

pub struct ObuProcessor {
    descriptors: DescriptorObus,
    param_definitions: ParamDefinitionMap,
    frame_durations: HashMap<DecodedUleb128, u32>,
    timing: GlobalTimingModule,
    pending: Option<TemporalUnit>,
    end_of_sequence: bool,
    num_temporal_units: u64,
    rendering: Option<RenderingPipeline>,
    fail_level: log::Level,
}

impl ObuProcessor {
    /// Reads the descriptor OBUs at the cursor of `rb`.
    ///
    /// Fails with [`ProcessorError::InsufficientData`] and leaves the cursor
    /// untouched when `rb` does not yet hold all descriptors.
    pub fn create(settings: ProcessorSettings, rb: &mut ReadBitBuffer) -> Result<Self> {
        let reader = DescriptorReader {
            fail_level: settings.fail_level,
            is_exhaustive: settings.is_exhaustive,
        };
        let descriptors = reader.read(rb)?;

        let mut frame_durations = HashMap::new();
        for audio_element in descriptors.audio_elements.values() {
            let codec_config = descriptors.codec_config_for(audio_element)?;
            for &substream_id in &audio_element.audio_substream_ids {
                frame_durations.insert(substream_id, codec_config.num_samples_per_frame);
            }
        }

        Ok(Self {
            param_definitions: descriptors.param_definitions()?,
            timing: GlobalTimingModule::new(&descriptors)?,
            descriptors,
            frame_durations,
            pending: None,
            end_of_sequence: false,
            num_temporal_units: 0,
            rendering: None,
            fail_level: settings.fail_level,
        })
    }

    /// [`ObuProcessor::create`] followed by [`ObuProcessor::configure_rendering`].
    pub fn create_for_rendering(
        settings: ProcessorSettings,
        desired_mix_presentation_id: Option<DecodedUleb128>,
        desired_layout: Option<&Layout>,
        factories: &RenderingFactories,
        rb: &mut ReadBitBuffer,
    ) -> Result<Self> {
        let mut processor = Self::create(settings, rb)?;
        processor.configure_rendering(desired_mix_presentation_id, desired_layout, factories)?;
        Ok(processor)
    }

    pub fn descriptors(&self) -> &DescriptorObus {
        &self.descriptors
    }

    pub fn selected_layout(&self) -> Option<&SelectedLayout> {
        self.rendering.as_ref().map(|pipeline| &pipeline.selected)
    }

    /// True once a following IA sequence header was seen.
    pub fn is_end_of_sequence(&self) -> bool {
        self.end_of_sequence
    }

    pub fn num_temporal_units(&self) -> u64 {
        self.num_temporal_units
    }

    /// Sets the failure level for recoverable conditions.
    ///
    /// - `log::Level::Error`: skip reserved, misplaced and unknown OBUs with a warning (default)
    /// - `log::Level::Warn`: fail on them instead (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    /// Selects what to render and prepares decoders and renderers for it.
    ///
    /// The selected mix presentation gains the desired layout when it lacks it.
    pub fn configure_rendering(
        &mut self,
        desired_mix_presentation_id: Option<DecodedUleb128>,
        desired_layout: Option<&Layout>,
        factories: &RenderingFactories,
    ) -> Result<SelectedLayout> {
        let selected = select_mix_presentation_and_layout(
            &mut self.descriptors.mix_presentations,
            desired_mix_presentation_id,
            desired_layout,
        )?;
        let mixer = RenderingMixer::new(&self.descriptors, &selected, factories.renderer.as_ref())?;

        let mut decoders = HashMap::new();
        let mut elements = Vec::new();
        let sub_mix_elements = self
            .descriptors
            .mix_presentation(selected.mix_presentation_id)
            .and_then(|mix| mix.sub_mixes.get(selected.sub_mix_index))
            .map(|sub_mix| {
                sub_mix
                    .audio_elements
                    .iter()
                    .map(|element| element.audio_element_id)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for audio_element_id in sub_mix_elements {
            let Some(audio_element) = self.descriptors.audio_elements.get(&audio_element_id) else {
                continue;
            };
            let codec_config = self.descriptors.codec_config_for(audio_element)?;
            let substreams: Vec<_> = audio_element
                .audio_substream_ids
                .iter()
                .copied()
                .zip(audio_element.substream_channel_counts())
                .collect();

            for &(substream_id, num_channels) in &substreams {
                let decoder = create_substream_decoder(
                    factories.substream_decoder.as_ref(),
                    codec_config,
                    num_channels,
                )?;
                decoders.insert(substream_id, decoder);
            }
            elements.push((audio_element_id, substreams));
        }

        info!(
            "Rendering mix presentation {} to {:?} (sub-mix {}, layout {})",
            selected.mix_presentation_id, selected.layout, selected.sub_mix_index, selected.layout_index
        );

        self.rendering = Some(RenderingPipeline {
            selected,
            mixer,
            decoders,
            elements,
        });

        Ok(selected)
    }

    fn pending_unit(&mut self) -> &mut TemporalUnit {
        self.pending.get_or_insert_with(|| TemporalUnit::new(0, 0))
    }

    /// Reads OBUs until one temporal unit is complete.
    ///
    /// Returns `None` when more data is needed, or at the end of the stream
    /// once every unit was returned. With `eos_is_end_of_sequence` the data in
    /// `rb` is final and the last unit is returned without waiting for the next.
    pub fn process_temporal_unit(
        &mut self,
        rb: &mut ReadBitBuffer,
        eos_is_end_of_sequence: bool,
    ) -> Result<Option<TemporalUnit>> {
        loop {
            if self.end_of_sequence {
                return self.emit_pending();
            }

            if rb.num_bits_available() == 0 {
                return if eos_is_end_of_sequence {
                    self.emit_pending()
                } else {
                    Ok(None)
                };
            }

            let obu_start = rb.tell();
            let total_size = match ObuHeader::peek_type_and_total_size(rb) {
                Ok((_, total_size)) => total_size,
                Err(e) if is_resource_exhausted(&e) => return self.on_truncated(rb, eos_is_end_of_sequence),
                Err(e) => return Err(e),
            };
            if !rb.can_read_bytes(total_size as usize) {
                return self.on_truncated(rb, eos_is_end_of_sequence);
            }

            let (header, payload_size) = ObuHeader::read_and_validate(rb)?;
            match header.obu_type {
                ObuType::TemporalDelimiter => {
                    if self.pending.is_some() {
                        rb.seek(obu_start)?;
                        if let Some(unit) = self.emit_pending()? {
                            return Ok(Some(unit));
                        }
                        continue;
                    }
                    let obu = TemporalDelimiterObu::create_from_buffer(header, payload_size, rb)?;
                    self.pending_unit().temporal_delimiter = Some(obu);
                }
                ObuType::ParameterBlock => {
                    if self.pending.as_ref().is_some_and(|unit| !unit.audio_frames.is_empty()) {
                        rb.seek(obu_start)?;
                        if let Some(unit) = self.emit_pending()? {
                            return Ok(Some(unit));
                        }
                        continue;
                    }

                    let mut payload = take_payload(payload_size, rb)?;
                    match ParameterBlockObu::create_from_buffer(header, payload_size, &self.param_definitions, &mut payload) {
                        Ok(obu) => self.pending_unit().parameter_blocks.push(obu),
                        Err(e) if error_kind(&e) == ErrorKind::NotFound => log_or_err!(self, Warn, e),
                        Err(e) => return Err(e),
                    }
                }
                ObuType::AudioFrame | ObuType::AudioFrameId(_) => {
                    let frame = AudioFrameObu::create_from_buffer(header, payload_size, rb)?;
                    let substream_id = frame.audio_substream_id;
                    let Some(&duration) = self.frame_durations.get(&substream_id) else {
                        log_or_err!(self, Warn, anyhow!(ProcessorError::UnknownSubstream(substream_id)));
                        continue;
                    };

                    let (start, end) = self.timing.peek_audio_frame_timestamps(substream_id, duration)?;
                    let starts_next_unit = self.pending.as_ref().is_some_and(|unit| {
                        !unit.audio_frames.is_empty()
                            && (unit.start_timestamp != start
                                || unit.audio_frames.iter().any(|f| f.audio_substream_id == substream_id))
                    });
                    if starts_next_unit {
                        rb.seek(obu_start)?;
                        if let Some(unit) = self.emit_pending()? {
                            return Ok(Some(unit));
                        }
                        continue;
                    }

                    let unit = self.pending_unit();
                    if unit.audio_frames.is_empty() {
                        unit.start_timestamp = start;
                        unit.end_timestamp = end;
                    }
                    unit.audio_frames.push(frame);
                }
                ObuType::IaSequenceHeader if !header.obu_redundant_copy => {
                    rb.seek(obu_start)?;
                    self.end_of_sequence = true;
                    info!("IA sequence ends after {} temporal units", self.num_temporal_units);
                }
                obu_type @ (ObuType::IaSequenceHeader
                | ObuType::CodecConfig
                | ObuType::AudioElement
                | ObuType::MixPresentation) => {
                    rb.ignore_bytes(payload_size as usize)?;
                    if header.obu_redundant_copy {
                        trace!("Skipping redundant {obu_type:?}");
                    } else {
                        log_or_err!(self, Warn, anyhow!(ObuError::UnexpectedObu(obu_type)));
                    }
                }
                ObuType::Reserved(code) => {
                    rb.ignore_bytes(payload_size as usize)?;
                    log_or_err!(self, Warn, anyhow!(ProcessorError::ReservedObu(code)));
                }
            }
        }
    }

    fn on_truncated(&mut self, rb: &mut ReadBitBuffer, eos_is_end_of_sequence: bool) -> Result<Option<TemporalUnit>> {
        if !eos_is_end_of_sequence {
            return Ok(None);
        }

        let remaining = rb.num_bytes_available();
        rb.ignore_bytes(remaining)?;
        log_or_err!(self, Warn, anyhow!(ProcessorError::TruncatedObu(remaining)));

        self.emit_pending()
    }

    /// Stamps and returns the unit being assembled, if it has audio frames.
    fn emit_pending(&mut self) -> Result<Option<TemporalUnit>> {
        let Some(unit) = self.pending.take() else {
            return Ok(None);
        };
        if unit.audio_frames.is_empty() {
            log_or_err!(self, Warn, anyhow!(ProcessorError::EmptyTemporalUnit));
            return Ok(None);
        }

        let mut sample_rate = 1;
        for frame in &unit.audio_frames {
            let duration = self.frame_durations.get(&frame.audio_substream_id).copied().unwrap_or(0);
            self.timing.next_audio_frame_timestamps(frame.audio_substream_id, duration)?;
            sample_rate = self.timing.sample_rate(frame.audio_substream_id).unwrap_or(sample_rate);
        }
        for block in &unit.parameter_blocks {
            let rate = self.timing.parameter_rate(block.parameter_id).unwrap_or(sample_rate) as i64;
            let input_start = unit.start_timestamp * rate / sample_rate as i64;
            let (start, end) =
                self.timing
                    .next_parameter_block_timestamps(block.parameter_id, input_start, block.duration())?;
            trace!("Parameter block {} covers [{start}, {end})", block.parameter_id);
        }

        if let Err(e) = unit.validate() {
            log_or_err!(self, log::Level::Error, e);
        }

        self.num_temporal_units += 1;
        debug!(
            "Temporal unit {} at {}: {} parameter blocks, {} audio frames, trimming {:?}",
            self.num_temporal_units,
            unit.start_timestamp,
            unit.parameter_blocks.len(),
            unit.audio_frames.len(),
            unit.trimming()
        );

        Ok(Some(unit))
    }

    /// Decodes, renders and trims one temporal unit.
    pub fn render_temporal_unit(&mut self, unit: &TemporalUnit) -> Result<RenderedTemporalUnit> {
        let Some(pipeline) = self.rendering.as_mut() else {
            bail!(ProcessorError::RenderingNotConfigured);
        };
        let num_samples = unit.num_samples() as usize;

        let mut decoded_substreams = HashMap::new();
        for frame in &unit.audio_frames {
            if let Some(decoder) = pipeline.decoders.get_mut(&frame.audio_substream_id) {
                decoded_substreams.insert(frame.audio_substream_id, decoder.decode_frame(&frame.audio_frame)?);
            }
        }

        let mut decoded_elements = HashMap::new();
        for (audio_element_id, substreams) in &pipeline.elements {
            let mut samples = vec![Vec::new(); num_samples];
            for &(substream_id, num_channels) in substreams {
                let mut decoded = decoded_substreams.remove(&substream_id).unwrap_or_default();
                decoded.resize(num_samples, vec![0; num_channels]);
                for (tick, substream_tick) in samples.iter_mut().zip(decoded) {
                    tick.extend(substream_tick);
                }
            }
            decoded_elements.insert(*audio_element_id, samples);
        }

        let mut samples = pipeline
            .mixer
            .render(&decoded_elements, &unit.parameter_blocks, num_samples)?;

        let (trim_at_start, trim_at_end) = unit.trimming();
        samples.truncate(num_samples.saturating_sub(trim_at_end as usize));
        let trim_at_start = (trim_at_start as usize).min(samples.len());
        samples.drain(..trim_at_start);

        Ok(RenderedTemporalUnit {
            start_timestamp: unit.start_timestamp + trim_at_start as i64,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::ObuBase;
    use crate::process::fixtures::{MIX_PRESENTATION_ID, minimal_descriptors, silent_unit};
    use crate::utils::bit_buffer::WriteBitBuffer;
    use crate::utils::leb128::LebGenerator;

    fn sequence(units: &[TemporalUnit], include_temporal_delimiters: bool) -> Result<Vec<u8>> {
        let mut wb = WriteBitBuffer::default();
        minimal_descriptors().write(&mut wb)?;
        for unit in units {
            unit.write(include_temporal_delimiters, &mut wb)?;
        }
        wb.take_bytes()
    }

    fn drain(processor: &mut ObuProcessor, rb: &mut ReadBitBuffer) -> Result<Vec<TemporalUnit>> {
        let mut units = Vec::new();
        while let Some(unit) = processor.process_temporal_unit(rb, true)? {
            units.push(unit);
        }
        Ok(units)
    }

    #[test]
    fn descriptors_round_trip() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let bytes = descriptors.serialize(LebGenerator::default())?;

        let settings = ProcessorSettings {
            is_exhaustive: true,
            ..Default::default()
        };
        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let processor = ObuProcessor::create(settings, &mut rb)?;
        assert_eq!(processor.descriptors(), &descriptors);
        assert_eq!(rb.num_bits_available(), 0);

        Ok(())
    }

    #[test]
    fn partial_descriptors_rewind() -> anyhow::Result<()> {
        let bytes = sequence(&[silent_unit(0, 0)], false)?;

        let mut rb = ReadBitBuffer::from_slice(&bytes[..10]);
        let err = ObuProcessor::create(ProcessorSettings::default(), &mut rb).err();
        assert!(err.is_some_and(|e| is_resource_exhausted(&e)));
        assert_eq!(rb.tell(), 0);

        rb.push_bytes(&bytes[10..]);
        let processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;
        assert_eq!(processor.descriptors().mix_presentations[0].mix_presentation_id, MIX_PRESENTATION_ID);
        assert_eq!(rb.num_bytes_available(), 34);

        Ok(())
    }

    #[test]
    fn sequence_must_start_with_header() -> anyhow::Result<()> {
        let mut wb = WriteBitBuffer::default();
        minimal_descriptors().codec_configs[&0].validate_and_write(&mut wb)?;
        let mut rb = ReadBitBuffer::from_slice(&wb.take_bytes()?);
        let settings = ProcessorSettings {
            is_exhaustive: true,
            ..Default::default()
        };
        assert!(ObuProcessor::create(settings, &mut rb).is_err());

        Ok(())
    }

    #[test]
    fn reserved_obus_follow_fail_level() -> anyhow::Result<()> {
        let mut bytes = vec![24 << 3, 2, 0xaa, 0xbb];
        bytes.extend(sequence(&[silent_unit(0, 0)], false)?);

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;
        assert_eq!(processor.descriptors().codec_configs.len(), 1);

        let strict = ProcessorSettings {
            fail_level: log::Level::Warn,
            ..Default::default()
        };
        let mut rb = ReadBitBuffer::from_slice(&bytes);
        assert!(ObuProcessor::create(strict, &mut rb).is_err());

        Ok(())
    }

    #[test]
    fn oversized_trimming_is_an_error() -> anyhow::Result<()> {
        use crate::process::fixtures::SUBSTREAM_ID;

        for (trim_at_start, trim_at_end) in [(u32::MAX, 1), (5, 4)] {
            let mut wb = WriteBitBuffer::default();
            minimal_descriptors().write(&mut wb)?;
            let header = ObuHeader::new(ObuType::AudioFrame).with_trimming(trim_at_start, trim_at_end);
            AudioFrameObu::new(header, SUBSTREAM_ID, vec![0; 32]).validate_and_write(&mut wb)?;

            let bytes = wb.take_bytes()?;
            let mut rb = ReadBitBuffer::from_slice(&bytes);
            let mut processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;
            assert!(processor.process_temporal_unit(&mut rb, true).is_err());
        }

        Ok(())
    }

    #[test]
    fn units_are_grouped_by_timestamp() -> anyhow::Result<()> {
        let bytes = sequence(&[silent_unit(0, 0), silent_unit(8, 0), silent_unit(16, 0)], false)?;
        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let mut processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;

        // Without end of stream the last unit waits for its successor.
        let first = processor.process_temporal_unit(&mut rb, false)?;
        assert_eq!(first.map(|u| u.start_timestamp), Some(0));
        let second = processor.process_temporal_unit(&mut rb, false)?;
        assert_eq!(second.map(|u| u.start_timestamp), Some(8));
        assert_eq!(processor.process_temporal_unit(&mut rb, false)?, None);

        let last = processor.process_temporal_unit(&mut rb, true)?;
        assert_eq!(last.map(|u| (u.start_timestamp, u.end_timestamp)), Some((16, 24)));
        assert_eq!(processor.process_temporal_unit(&mut rb, true)?, None);
        assert_eq!(processor.num_temporal_units(), 3);

        Ok(())
    }

    #[test]
    fn delimiters_split_units() -> anyhow::Result<()> {
        let bytes = sequence(&[silent_unit(0, 0), silent_unit(8, 0)], true)?;
        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let mut processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;

        let units = drain(&mut processor, &mut rb)?;
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|unit| unit.temporal_delimiter.is_some()));

        Ok(())
    }

    #[test]
    fn next_sequence_ends_processing() -> anyhow::Result<()> {
        let mut bytes = sequence(&[silent_unit(0, 0)], false)?;
        let next = minimal_descriptors().serialize(LebGenerator::default())?;
        bytes.extend_from_slice(&next);

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let mut processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;
        assert_eq!(drain(&mut processor, &mut rb)?.len(), 1);
        assert!(processor.is_end_of_sequence());
        assert_eq!(rb.num_bytes_available(), next.len());

        Ok(())
    }

    #[test]
    fn unknown_substreams_are_bypassed() -> anyhow::Result<()> {
        let mut wb = WriteBitBuffer::default();
        minimal_descriptors().write(&mut wb)?;
        AudioFrameObu::new(ObuHeader::new(ObuType::AudioFrame), 40, vec![1, 2]).validate_and_write(&mut wb)?;
        silent_unit(0, 0).write(false, &mut wb)?;
        let bytes = wb.take_bytes()?;

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let mut processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;
        let units = drain(&mut processor, &mut rb)?;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].audio_frames[0].audio_substream_id, 0);

        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let mut processor = ObuProcessor::create(ProcessorSettings::default(), &mut rb)?;
        processor.set_fail_level(log::Level::Warn);
        assert!(processor.process_temporal_unit(&mut rb, true).is_err());

        Ok(())
    }

    #[test]
    fn trimmed_samples_are_not_rendered() -> anyhow::Result<()> {
        let bytes = sequence(&[silent_unit(0, 3)], false)?;
        let mut rb = ReadBitBuffer::from_slice(&bytes);
        let mut processor = ObuProcessor::create_for_rendering(
            ProcessorSettings::default(),
            None,
            None,
            &RenderingFactories::default(),
            &mut rb,
        )?;

        let units = drain(&mut processor, &mut rb)?;
        let rendered = processor.render_temporal_unit(&units[0])?;
        assert_eq!(rendered.start_timestamp, 3);
        assert_eq!(rendered.samples, vec![vec![0, 0]; 5]);

        Ok(())
    }
}
