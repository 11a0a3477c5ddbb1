//! Streaming IA sequence decoder.
//!
//! Bytes are pushed with [`IamfDecoder::decode`] in chunks of any size. Once
//! the descriptors are complete, each [`IamfDecoder::get_output_temporal_unit`]
//! call returns the rendered PCM of at most one temporal unit, interleaved
//! little-endian at the configured bit depth. [`IamfDecoder::flush`] marks the
//! end of the input and drains the rest.

use std::collections::VecDeque;

use anyhow::{Result, bail};
use log::{debug, info};

use crate::obu::mix_presentation::Layout;
use crate::process::descriptors::DescriptorObus;
use crate::process::layout::{SelectedLayout, layout_channel_count};
use crate::process::obu_processor::{ObuProcessor, ProcessorSettings, RenderingFactories};
use crate::process::temporal_unit::TemporalUnit;
use crate::utils::bit_buffer::ReadBitBuffer;
use crate::utils::errors::{DecoderError, is_resource_exhausted};
use crate::utils::leb128::DecodedUleb128;
use crate::utils::numeric::write_pcm_le;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderSettings {
    /// Falls back to the first mix presentation when unset or absent.
    pub mix_presentation_id: Option<DecodedUleb128>,
    /// Defaults to the first layout of the selected mix presentation.
    pub layout: Option<Layout>,
    /// 16, 24 or 32.
    pub bit_depth: u8,
    pub fail_level: log::Level,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            mix_presentation_id: None,
            layout: None,
            bit_depth: 16,
            fail_level: log::Level::Error,
        }
    }
}

fn validate_bit_depth(bit_depth: u8) -> Result<()> {
    if !matches!(bit_depth, 16 | 24 | 32) {
        bail!(DecoderError::UnsupportedBitDepth(bit_depth));
    }
    Ok(())
}

pub struct IamfDecoder {
    settings: DecoderSettings,
    factories: RenderingFactories,
    rb: ReadBitBuffer,
    processor: Option<ObuProcessor>,
    units: VecDeque<TemporalUnit>,
    flushed: bool,
}

impl IamfDecoder {
    pub fn create(settings: DecoderSettings, factories: RenderingFactories) -> Result<Self> {
        validate_bit_depth(settings.bit_depth)?;

        Ok(Self {
            settings,
            factories,
            rb: ReadBitBuffer::new(),
            processor: None,
            units: VecDeque::new(),
            flushed: false,
        })
    }

    /// Creates a decoder from a buffer holding exactly the descriptor OBUs.
    pub fn create_from_descriptors(
        settings: DecoderSettings,
        factories: RenderingFactories,
        descriptor_obus: &[u8],
    ) -> Result<Self> {
        let mut decoder = Self::create(settings, factories)?;
        decoder.rb.push_bytes(descriptor_obus);
        decoder.process_descriptors(true)?;

        if decoder.rb.num_bytes_available() != 0 {
            bail!(DecoderError::TrailingData);
        }
        decoder.rb.flush_consumed()?;

        Ok(decoder)
    }

    fn processor_settings(&self, is_exhaustive: bool) -> ProcessorSettings {
        ProcessorSettings {
            is_exhaustive,
            fail_level: self.settings.fail_level,
        }
    }

    fn process_descriptors(&mut self, is_exhaustive: bool) -> Result<()> {
        let processor = ObuProcessor::create_for_rendering(
            self.processor_settings(is_exhaustive),
            self.settings.mix_presentation_id,
            self.settings.layout.as_ref(),
            &self.factories,
            &mut self.rb,
        )?;

        let descriptors = processor.descriptors();
        info!(
            "Descriptors complete: {} codec configs, {} audio elements, {} mix presentations",
            descriptors.codec_configs.len(),
            descriptors.audio_elements.len(),
            descriptors.mix_presentations.len()
        );
        self.processor = Some(processor);

        Ok(())
    }

    fn processor(&self) -> Result<&ObuProcessor> {
        self.processor
            .as_ref()
            .ok_or_else(|| DecoderError::DescriptorsNotReady.into())
    }

    fn processor_mut(&mut self) -> Result<&mut ObuProcessor> {
        self.processor
            .as_mut()
            .ok_or_else(|| DecoderError::DescriptorsNotReady.into())
    }

    fn read_temporal_units(&mut self, eos_is_end_of_sequence: bool) -> Result<()> {
        let Some(processor) = self.processor.as_mut() else {
            return Ok(());
        };

        while let Some(unit) = processor.process_temporal_unit(&mut self.rb, eos_is_end_of_sequence)? {
            self.units.push_back(unit);
        }

        Ok(())
    }

    /// Appends `bytes`. Running out of data in the middle of the descriptors
    /// is not an error; they complete on a later call.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        if self.flushed {
            bail!(DecoderError::DecodeAfterFlush);
        }
        self.rb.push_bytes(bytes);

        if self.processor.is_none() {
            match self.process_descriptors(false) {
                Ok(()) => {}
                Err(e) if is_resource_exhausted(&e) => {
                    debug!("Waiting for more descriptor bytes ({} buffered)", self.rb.num_bytes_available());
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        self.read_temporal_units(false)?;
        self.rb.flush_consumed()
    }

    pub fn is_descriptor_processing_complete(&self) -> bool {
        self.processor.is_some()
    }

    pub fn is_temporal_unit_available(&self) -> bool {
        !self.units.is_empty()
    }

    /// Rendered PCM of the next temporal unit, or nothing when none is ready.
    pub fn get_output_temporal_unit(&mut self) -> Result<Vec<u8>> {
        let bit_depth = self.settings.bit_depth;
        let processor = self.processor.as_mut().ok_or(DecoderError::DescriptorsNotReady)?;
        let Some(unit) = self.units.pop_front() else {
            return Ok(Vec::new());
        };

        let rendered = processor.render_temporal_unit(&unit)?;
        let mut bytes = Vec::with_capacity(
            rendered.samples.len() * rendered.samples.first().map_or(0, Vec::len) * bit_depth as usize / 8,
        );
        for sample in rendered.samples.iter().flatten() {
            write_pcm_le(*sample, bit_depth, &mut bytes);
        }

        Ok(bytes)
    }

    /// Signals the end of input and returns the next temporal unit. The flag
    /// is true once nothing is left.
    pub fn flush(&mut self) -> Result<(Vec<u8>, bool)> {
        if !self.flushed {
            self.flushed = true;
            if self.processor.is_none() {
                self.process_descriptors(true)?;
            }
            self.read_temporal_units(true)?;
        }

        let bytes = self.get_output_temporal_unit()?;
        Ok((bytes, self.units.is_empty()))
    }

    fn reconfigure(&mut self) -> Result<()> {
        let mix_presentation_id = self.settings.mix_presentation_id;
        let layout = self.settings.layout;
        let processor = self.processor.as_mut().ok_or(DecoderError::DescriptorsNotReady)?;
        processor.configure_rendering(mix_presentation_id, layout.as_ref(), &self.factories)?;
        Ok(())
    }

    pub fn configure_mix_presentation_id(&mut self, id: DecodedUleb128) -> Result<()> {
        if self.processor()?.descriptors().mix_presentation(id).is_none() {
            bail!(DecoderError::UnknownMixPresentation(id));
        }
        self.settings.mix_presentation_id = Some(id);
        self.reconfigure()
    }

    pub fn configure_output_layout(&mut self, layout: Layout) -> Result<()> {
        self.processor()?;
        layout_channel_count(&layout)?;
        self.settings.layout = Some(layout);
        self.reconfigure()
    }

    pub fn configure_bit_depth(&mut self, bit_depth: u8) -> Result<()> {
        self.processor()?;
        validate_bit_depth(bit_depth)?;
        self.settings.bit_depth = bit_depth;
        Ok(())
    }

    /// Ids of every mix presentation, in stream order.
    pub fn get_mix_presentations(&self) -> Result<Vec<DecodedUleb128>> {
        Ok(self
            .processor()?
            .descriptors()
            .mix_presentations
            .iter()
            .map(|mix_presentation| mix_presentation.mix_presentation_id)
            .collect())
    }

    pub fn descriptors(&self) -> Result<&DescriptorObus> {
        Ok(self.processor()?.descriptors())
    }

    pub fn selected_layout(&self) -> Result<SelectedLayout> {
        self.processor()?
            .selected_layout()
            .copied()
            .ok_or_else(|| DecoderError::DescriptorsNotReady.into())
    }

    pub fn num_output_channels(&self) -> Result<usize> {
        layout_channel_count(&self.selected_layout()?.layout)
    }

    pub fn sample_rate(&self) -> Result<u32> {
        Ok(self.processor()?.descriptors().statistics()?.common_sample_rate)
    }

    pub fn bit_depth(&self) -> u8 {
        self.settings.bit_depth
    }

    /// Lowers the level at which recoverable stream problems become errors.
    pub fn set_fail_level(&mut self, level: log::Level) -> Result<()> {
        self.settings.fail_level = level;
        self.processor_mut()?.set_fail_level(level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fixtures::{MIX_PRESENTATION_ID, minimal_descriptors, silent_unit};
    use crate::utils::bit_buffer::WriteBitBuffer;
    use crate::utils::errors::{ErrorKind, error_kind};
    use crate::utils::leb128::LebGenerator;

    fn sequence() -> anyhow::Result<Vec<u8>> {
        let mut wb = WriteBitBuffer::default();
        minimal_descriptors().write(&mut wb)?;
        silent_unit(0, 0).write(false, &mut wb)?;
        silent_unit(8, 2).write(false, &mut wb)?;
        wb.take_bytes()
    }

    fn decoder() -> anyhow::Result<IamfDecoder> {
        IamfDecoder::create(DecoderSettings::default(), RenderingFactories::default())
    }

    #[test]
    fn descriptors_arrive_in_pieces() -> anyhow::Result<()> {
        let bytes = sequence()?;
        let mut decoder = decoder()?;

        decoder.decode(&bytes[..10])?;
        assert!(!decoder.is_descriptor_processing_complete());
        assert!(decoder.get_mix_presentations().is_err());
        assert!(decoder.get_output_temporal_unit().is_err());

        decoder.decode(&bytes[10..])?;
        assert!(decoder.is_descriptor_processing_complete());
        assert_eq!(decoder.get_mix_presentations()?, [MIX_PRESENTATION_ID]);
        assert_eq!(decoder.num_output_channels()?, 2);
        assert_eq!(decoder.sample_rate()?, 16000);

        // The first unit is complete; the second waits for more data.
        assert!(decoder.is_temporal_unit_available());
        assert_eq!(decoder.get_output_temporal_unit()?, vec![0; 32]);
        assert!(!decoder.is_temporal_unit_available());
        assert!(decoder.get_output_temporal_unit()?.is_empty());

        let (last, done) = decoder.flush()?;
        assert_eq!(last, vec![0; 24]);
        assert!(done);
        assert!(decoder.decode(&bytes).is_err());

        Ok(())
    }

    #[test]
    fn configuration_needs_descriptors() -> anyhow::Result<()> {
        let mut decoder = decoder()?;
        let err = decoder.configure_bit_depth(24).err();
        assert!(err.is_some());

        decoder.decode(&sequence()?)?;
        assert!(decoder.configure_bit_depth(8).is_err());
        decoder.configure_bit_depth(24)?;
        assert_eq!(decoder.get_output_temporal_unit()?.len(), 48);

        let err = decoder.configure_mix_presentation_id(7).err();
        assert_eq!(err.map(|e| error_kind(&e)), Some(ErrorKind::NotFound));
        decoder.configure_mix_presentation_id(MIX_PRESENTATION_ID)?;

        assert!(IamfDecoder::create(
            DecoderSettings {
                bit_depth: 20,
                ..Default::default()
            },
            RenderingFactories::default()
        )
        .is_err());

        Ok(())
    }

    #[test]
    fn descriptors_only() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors().serialize(LebGenerator::default())?;
        let mut decoder = IamfDecoder::create_from_descriptors(
            DecoderSettings::default(),
            RenderingFactories::default(),
            &descriptors,
        )?;
        assert!(decoder.is_descriptor_processing_complete());
        assert_eq!(decoder.descriptors()?, &minimal_descriptors());

        decoder.decode(&sequence()?[descriptors.len()..])?;
        let (first, done) = decoder.flush()?;
        assert_eq!(first.len(), 32);
        assert!(!done);
        assert_eq!(decoder.flush()?, (vec![0; 24], true));

        let with_unit = sequence()?;
        assert!(
            IamfDecoder::create_from_descriptors(
                DecoderSettings::default(),
                RenderingFactories::default(),
                &with_unit
            )
            .is_err()
        );

        Ok(())
    }

    #[test]
    fn stream_without_temporal_units() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors().serialize(LebGenerator::default())?;
        let mut decoder = decoder()?;
        decoder.decode(&descriptors)?;
        // A streaming parse cannot tell whether more descriptors follow.
        assert!(!decoder.is_descriptor_processing_complete());

        assert_eq!(decoder.flush()?, (Vec::new(), true));
        assert!(decoder.is_descriptor_processing_complete());

        Ok(())
    }
}
