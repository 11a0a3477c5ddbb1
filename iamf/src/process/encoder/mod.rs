//! Iterative IA sequence encoder.
//!
//! [`IamfEncoder`] takes complete descriptors, then one [`TemporalUnitData`]
//! per [`IamfEncoder::encode`] call. Every [`IamfEncoder::output_temporal_unit`]
//! call returns at most one serialized temporal unit, and forwards it to the
//! installed sequencers as well. After [`IamfEncoder::finalize_encode`] the
//! caller keeps pulling until [`IamfEncoder::generating_temporal_units`] turns
//! false; the last pull measures loudness and back-patches the descriptors.
//!
//! ```no_run
//! # fn run(mut encoder: iamf::process::encoder::IamfEncoder, data: Vec<iamf::process::encoder::TemporalUnitData>) -> anyhow::Result<()> {
//! for unit in data {
//!     encoder.encode(unit)?;
//!     let bytes = encoder.output_temporal_unit()?;
//!     // ...
//! }
//! encoder.finalize_encode()?;
//! while encoder.generating_temporal_units() {
//!     let bytes = encoder.output_temporal_unit()?;
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

mod audio_frames;
mod finalizer;
mod parameter_blocks;

pub use audio_frames::{AudioFrameGenerator, GeneratedAudio};
pub use finalizer::MixPresentationFinalizer;
pub use parameter_blocks::ParameterBlockGenerator;

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::{debug, info, warn};

use crate::obu::arbitrary::ArbitraryObu;
use crate::obu::parameter_block::ParameterBlockObu;
use crate::process::codec::SubstreamEncoderFactory;
use crate::process::descriptors::DescriptorObus;
use crate::process::render::{LoudnessCalculatorFactory, RendererFactory};
use crate::process::sequencer::{ObuSequencer, SequencerSettings, StreamingSequencer};
use crate::process::temporal_unit::TemporalUnit;
use crate::process::timing::GlobalTimingModule;
use crate::utils::errors::EncoderError;
use crate::utils::leb128::{DecodedUleb128, LebGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderSettings {
    pub leb_generator: LebGenerator,
    pub include_temporal_delimiters: bool,
    /// Applies to the sequencers built from [`EncoderSettings::sequencer_settings`].
    pub delay_descriptors_until_first_untrimmed_sample: bool,
    /// Fail instead of overwriting user-provided loudness that differs from the
    /// measured one.
    pub validate_user_loudness: bool,
}

impl EncoderSettings {
    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            leb_generator: self.leb_generator,
            include_temporal_delimiters: self.include_temporal_delimiters,
            delay_descriptors_until_first_untrimmed_sample: self.delay_descriptors_until_first_untrimmed_sample,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Arbitrary OBUs with a temporal unit hook are inserted at their tick;
    /// the rest stay with the descriptors.
    pub descriptors: DescriptorObus,
    pub num_samples_to_trim_at_start: u32,
}

/// Input for one [`IamfEncoder::encode`] call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemporalUnitData {
    /// Left-justified `[sample][channel]` samples per audio element. Every
    /// element receives the same number of samples.
    pub samples: HashMap<DecodedUleb128, Vec<Vec<i32>>>,
    /// Blocks starting with the first sample of this call.
    pub parameter_blocks: Vec<ParameterBlockObu>,
}

/// Optional collaborators. Without a loudness calculator the user-provided
/// loudness is kept.
#[derive(Default)]
pub struct EncoderPlugins {
    pub substream_encoder: Option<SubstreamEncoderFactory>,
    pub renderer: Option<RendererFactory>,
    pub loudness_calculator: Option<LoudnessCalculatorFactory>,
}

pub struct IamfEncoder {
    settings: EncoderSettings,
    descriptors: DescriptorObus,
    sample_rate: u32,
    timing: GlobalTimingModule,
    audio_frames: AudioFrameGenerator,
    parameter_blocks: ParameterBlockGenerator,
    finalizer: MixPresentationFinalizer,
    temporal_unit_arbitrary_obus: Vec<ArbitraryObu>,
    streaming: StreamingSequencer,
    sequencers: Vec<Box<dyn ObuSequencer>>,
    input_timestamp: i64,
    finalize_encode_called: bool,
    mix_presentation_obus_finalized: bool,
    sequencers_finalized: bool,
    first_temporal_unit_for_debugging: bool,
}

impl IamfEncoder {
    /// Validates the descriptors and pushes them to every sequencer.
    pub fn create(
        config: EncoderConfig,
        settings: EncoderSettings,
        plugins: EncoderPlugins,
        sequencers: Vec<Box<dyn ObuSequencer>>,
    ) -> Result<Self> {
        let EncoderConfig {
            mut descriptors,
            num_samples_to_trim_at_start,
        } = config;

        let (temporal_unit_arbitrary_obus, descriptor_arbitrary_obus): (Vec<_>, Vec<_>) = descriptors
            .arbitrary_obus
            .drain(..)
            .partition(|obu: &ArbitraryObu| obu.insertion_hook.is_temporal_unit_hook());
        descriptors.arbitrary_obus = descriptor_arbitrary_obus;

        descriptors.validate()?;
        let statistics = descriptors.statistics()?;
        let timing = GlobalTimingModule::new(&descriptors)?;
        let audio_frames = AudioFrameGenerator::new(
            &descriptors,
            plugins.substream_encoder.as_ref(),
            num_samples_to_trim_at_start,
        )?;
        let parameter_blocks = ParameterBlockGenerator::new(descriptors.param_definitions()?);
        let finalizer = MixPresentationFinalizer::new(
            &descriptors,
            plugins.renderer.as_ref(),
            plugins.loudness_calculator.as_ref(),
        )?;

        // The in-memory copy never delays; callers read every unit right away.
        let mut streaming = StreamingSequencer::new(SequencerSettings {
            delay_descriptors_until_first_untrimmed_sample: false,
            ..settings.sequencer_settings()
        });
        streaming.push_descriptors(&descriptors)?;

        let mut encoder = Self {
            settings,
            descriptors,
            sample_rate: statistics.common_sample_rate,
            timing,
            audio_frames,
            parameter_blocks,
            finalizer,
            temporal_unit_arbitrary_obus,
            streaming,
            sequencers,
            input_timestamp: 0,
            finalize_encode_called: false,
            mix_presentation_obus_finalized: false,
            sequencers_finalized: false,
            first_temporal_unit_for_debugging: true,
        };

        let descriptors = &encoder.descriptors;
        let pushed = encoder
            .sequencers
            .iter_mut()
            .try_for_each(|sequencer| sequencer.push_descriptors(descriptors));
        if let Err(e) = pushed {
            encoder.abort_sequencers();
            return Err(e);
        }

        info!(
            "Encoding {} audio elements and {} mix presentations at {} Hz",
            encoder.descriptors.audio_elements.len(),
            encoder.descriptors.mix_presentations.len(),
            encoder.sample_rate
        );

        Ok(encoder)
    }

    /// Queues samples and parameter blocks. Coded frames may lag behind the
    /// input when the codec has a delay.
    pub fn encode(&mut self, data: TemporalUnitData) -> Result<()> {
        if self.finalize_encode_called {
            bail!(EncoderError::EncodeAfterFinalize);
        }

        let TemporalUnitData {
            samples,
            parameter_blocks,
        } = data;
        for block in parameter_blocks {
            self.parameter_blocks
                .add(block, self.input_timestamp, self.sample_rate, &mut self.timing)?;
        }

        let num_samples = self.audio_frames.add_samples(&samples, &mut self.timing)?;
        self.input_timestamp += num_samples as i64;

        Ok(())
    }

    /// Serializes the next complete temporal unit, or returns an empty vector
    /// when none is ready. The call that drains the last unit after
    /// [`finalize_encode`](Self::finalize_encode) also finalizes the
    /// descriptors and closes the sequencers.
    pub fn output_temporal_unit(&mut self) -> Result<Vec<u8>> {
        let result = self.output_temporal_unit_inner();
        if result.is_err() {
            self.abort_sequencers();
        }
        result
    }

    fn output_temporal_unit_inner(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();

        if let Some(audio) = self.audio_frames.pop_temporal_unit() {
            let unit = self.assemble(audio)?;
            self.streaming.push_temporal_unit(&unit)?;
            bytes = self.streaming.previous_serialized_temporal_unit().to_vec();
            self.streaming.clear_previous_temporal_unit();

            for sequencer in &mut self.sequencers {
                sequencer.push_temporal_unit(&unit)?;
            }

            if self.first_temporal_unit_for_debugging {
                debug!(
                    "First temporal unit: {} audio frames, {} parameter blocks, {} bytes",
                    unit.audio_frames.len(),
                    unit.parameter_blocks.len(),
                    bytes.len()
                );
                self.first_temporal_unit_for_debugging = false;
            }
        }

        if self.finalize_encode_called && !self.audio_frames.has_pending() && !self.sequencers_finalized {
            self.finalize_sequencers()?;
        }

        Ok(bytes)
    }

    fn assemble(&mut self, audio: GeneratedAudio) -> Result<TemporalUnit> {
        let GeneratedAudio {
            start_timestamp,
            end_timestamp,
            trimming,
            audio_frames,
            samples,
        } = audio;

        let mut unit = TemporalUnit::new(start_timestamp, end_timestamp);
        unit.audio_frames = audio_frames;
        unit.parameter_blocks = self.parameter_blocks.take_for(start_timestamp, end_timestamp);
        let (current, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.temporal_unit_arbitrary_obus)
            .into_iter()
            .partition(|obu| (start_timestamp..end_timestamp).contains(&obu.insertion_tick.unwrap_or(0)));
        unit.arbitrary_obus = current;
        self.temporal_unit_arbitrary_obus = later;

        self.finalizer.push_temporal_unit(
            &samples,
            &unit.parameter_blocks,
            unit.num_samples() as usize,
            trimming,
        )?;

        Ok(unit)
    }

    fn finalize_sequencers(&mut self) -> Result<()> {
        if self.parameter_blocks.has_pending() {
            warn!("Parameter blocks past the last temporal unit are dropped");
        }
        if !self.temporal_unit_arbitrary_obus.is_empty() {
            warn!(
                "{} arbitrary OBUs outside every temporal unit are dropped",
                self.temporal_unit_arbitrary_obus.len()
            );
        }

        self.finalizer
            .finalize(&mut self.descriptors, self.settings.validate_user_loudness)?;
        self.mix_presentation_obus_finalized = true;

        self.streaming.update_descriptors_and_close(&self.descriptors)?;
        for sequencer in &mut self.sequencers {
            sequencer.update_descriptors_and_close(&self.descriptors)?;
        }
        self.sequencers_finalized = true;

        info!("Encoded {} samples", self.input_timestamp);
        Ok(())
    }

    fn abort_sequencers(&mut self) {
        self.streaming.abort();
        for sequencer in &mut self.sequencers {
            sequencer.abort();
        }
    }

    /// Whether more output is expected.
    pub fn generating_temporal_units(&self) -> bool {
        !self.sequencers_finalized
    }

    /// Pads the last frame and flushes the codecs. Later calls do nothing.
    pub fn finalize_encode(&mut self) -> Result<()> {
        if self.finalize_encode_called {
            return Ok(());
        }
        self.finalize_encode_called = true;

        let result = self.audio_frames.finalize(&mut self.timing);
        if result.is_err() {
            self.abort_sequencers();
        }
        result
    }

    /// Serialized descriptors and whether their loudness is final.
    pub fn get_descriptor_obus(&self, redundant_copy: bool) -> Result<(Vec<u8>, bool)> {
        if redundant_copy {
            bail!(EncoderError::RedundantCopyUnimplemented);
        }

        Ok((
            self.descriptors.serialize(self.settings.leb_generator)?,
            self.mix_presentation_obus_finalized,
        ))
    }

    pub fn descriptors(&self) -> &DescriptorObus {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::arbitrary::InsertionHook;
    use crate::obu::header::ObuType;
    use crate::process::fixtures::{AUDIO_ELEMENT_ID, minimal_descriptors};
    use crate::process::render::DigitalPeakCalculator;
    use crate::utils::errors::{ErrorKind, error_kind};

    fn silence(num_samples: usize) -> TemporalUnitData {
        TemporalUnitData {
            samples: HashMap::from([(AUDIO_ELEMENT_ID, vec![vec![0, 0]; num_samples])]),
            parameter_blocks: Vec::new(),
        }
    }

    fn encoder(descriptors: DescriptorObus, plugins: EncoderPlugins) -> anyhow::Result<IamfEncoder> {
        IamfEncoder::create(
            EncoderConfig {
                descriptors,
                num_samples_to_trim_at_start: 0,
            },
            EncoderSettings::default(),
            plugins,
            Vec::new(),
        )
    }

    #[test]
    fn one_frame_of_silence() -> anyhow::Result<()> {
        let mut encoder = encoder(minimal_descriptors(), EncoderPlugins::default())?;
        let (descriptors, finalized) = encoder.get_descriptor_obus(false)?;
        assert_eq!(descriptors, minimal_descriptors().serialize(LebGenerator::default())?);
        assert!(!finalized);

        encoder.encode(silence(8))?;
        let unit = encoder.output_temporal_unit()?;
        assert_eq!(unit.len(), 34);
        assert_eq!(&unit[..2], &[6 << 3, 32]);
        assert!(unit[2..].iter().all(|&b| b == 0));
        assert!(encoder.output_temporal_unit()?.is_empty());

        assert!(encoder.generating_temporal_units());
        encoder.finalize_encode()?;
        encoder.finalize_encode()?;
        assert!(encoder.output_temporal_unit()?.is_empty());
        assert!(!encoder.generating_temporal_units());
        assert!(encoder.get_descriptor_obus(false)?.1);
        assert!(encoder.encode(silence(8)).is_err());

        let err = encoder.get_descriptor_obus(true).err();
        assert_eq!(err.map(|e| error_kind(&e)), Some(ErrorKind::Unimplemented));

        Ok(())
    }

    #[test]
    fn partial_frame_is_trimmed_at_end() -> anyhow::Result<()> {
        let mut encoder = encoder(minimal_descriptors(), EncoderPlugins::default())?;
        encoder.encode(silence(3))?;
        assert!(encoder.output_temporal_unit()?.is_empty());

        encoder.finalize_encode()?;
        let unit = encoder.output_temporal_unit()?;
        // Trimming flag set: size, trim at end 5, trim at start 0.
        assert_eq!(&unit[..4], &[(6 << 3) | 0b10, 34, 5, 0]);
        assert!(!encoder.generating_temporal_units());

        Ok(())
    }

    #[test]
    fn arbitrary_obus_are_placed_at_their_tick() -> anyhow::Result<()> {
        let mut descriptors = minimal_descriptors();
        descriptors.arbitrary_obus.push(
            ArbitraryObu::new(ObuType::Reserved(24), vec![1], InsertionHook::AfterAudioFramesAtTick).at_tick(8),
        );
        descriptors.arbitrary_obus.push(ArbitraryObu::new(
            ObuType::Reserved(25),
            vec![],
            InsertionHook::AfterDescriptors,
        ));

        let mut encoder = encoder(descriptors, EncoderPlugins::default())?;
        let (descriptors, _) = encoder.get_descriptor_obus(false)?;
        assert_eq!(&descriptors[descriptors.len() - 2..], &[25 << 3, 0]);

        encoder.encode(silence(16))?;
        assert_eq!(encoder.output_temporal_unit()?.len(), 34);
        let second = encoder.output_temporal_unit()?;
        assert_eq!(&second[34..], &[24 << 3, 1, 1]);

        Ok(())
    }

    #[test]
    fn arbitrary_obus_past_the_end_are_not_emitted() -> anyhow::Result<()> {
        let mut descriptors = minimal_descriptors();
        descriptors.arbitrary_obus.push(
            ArbitraryObu::new(ObuType::Reserved(24), vec![1], InsertionHook::AfterAudioFramesAtTick).at_tick(64),
        );

        let mut encoder = encoder(descriptors, EncoderPlugins::default())?;
        encoder.encode(silence(8))?;
        assert_eq!(encoder.output_temporal_unit()?.len(), 34);
        encoder.finalize_encode()?;
        while encoder.generating_temporal_units() {
            assert!(encoder.output_temporal_unit()?.is_empty());
        }
        assert_eq!(encoder.temporal_unit_arbitrary_obus.len(), 1);

        Ok(())
    }

    #[test]
    fn loudness_is_measured_and_back_patched() -> anyhow::Result<()> {
        let plugins = EncoderPlugins {
            loudness_calculator: Some(Box::new(|layout, _| {
                Some(Box::new(DigitalPeakCalculator::new(layout)))
            })),
            ..Default::default()
        };
        let mut encoder = encoder(minimal_descriptors(), plugins)?;

        let mut data = silence(8);
        data.samples.insert(AUDIO_ELEMENT_ID, vec![vec![i32::MIN / 2, 0]; 8]);
        encoder.encode(data)?;
        encoder.finalize_encode()?;
        while encoder.generating_temporal_units() {
            encoder.output_temporal_unit()?;
        }

        let loudness = &encoder.descriptors().mix_presentations[0].sub_mixes[0].layouts[0].loudness;
        assert_eq!(loudness.digital_peak, -1541);

        Ok(())
    }
}
