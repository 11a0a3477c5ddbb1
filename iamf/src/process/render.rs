//! Rendering decoded audio elements to a playback layout.
//!
//! A [`RenderingMixer`] owns one [`Renderer`] per audio element of a sub-mix.
//! Each temporal unit it renders the elements, applies element mix gains, sums
//! them and applies the output mix gain. Gains come from the parameter blocks of
//! the unit or, when absent, from the definitions' defaults.

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::obu::audio_element::{AudioElementConfig, AudioElementObu};
use crate::obu::mix_presentation::{Layout, LoudnessInfo, MixPresentationLayout, RenderingConfig};
use crate::obu::param_definitions::{ParamDefinition, ParamKind};
use crate::obu::parameter_block::ParameterBlockObu;
use crate::process::descriptors::DescriptorObus;
use crate::process::layout::{SelectedLayout, layout_channel_count, layout_for_loudspeaker_layout};
use crate::utils::errors::{LayoutError, MixPresentationError, ParamError};
use crate::utils::leb128::DecodedUleb128;
use crate::utils::numeric::{f64_to_q7_8, i32_to_normalized, normalized_to_i32, q7_8_db_to_linear};

/// Renders one audio element to the playback layout.
pub trait Renderer {
    /// Maps `[sample][coded channel]` to normalized `[sample][output channel]`.
    fn render(&mut self, samples: &[Vec<i32>]) -> Result<Vec<Vec<f64>>>;
}

/// Builds a renderer for an element, or `None` when it cannot be rendered to
/// the layout.
pub type RendererFactory =
    Box<dyn Fn(&AudioElementObu, &RenderingConfig, &Layout) -> Option<Box<dyn Renderer>>>;

/// Measures one rendered layout.
pub trait LoudnessCalculator {
    fn accumulate(&mut self, samples: &[Vec<i32>]) -> Result<()>;

    /// Loudness measured so far, merged into the user-provided info.
    fn query(&self) -> Result<LoudnessInfo>;
}

pub type LoudnessCalculatorFactory =
    Box<dyn Fn(&MixPresentationLayout, u8) -> Option<Box<dyn LoudnessCalculator>>>;

/// Copies channels of a single-layer element whose layout is the playback layout.
#[derive(Debug, Clone, Copy)]
pub struct PassthroughRenderer {
    num_channels: usize,
}

impl PassthroughRenderer {
    /// Returns `None` unless `audio_element` already is `layout`.
    pub fn new(audio_element: &AudioElementObu, layout: &Layout) -> Option<Self> {
        let AudioElementConfig::ScalableChannel(config) = &audio_element.config else {
            return None;
        };
        let [layer] = config.channel_audio_layer_configs.as_slice() else {
            return None;
        };

        let native = layout_for_loudspeaker_layout(layer.loudspeaker_layout).ok()?;
        let num_channels = layout_channel_count(layout).ok()?;
        (native == *layout && audio_element.num_coded_channels() == num_channels)
            .then_some(Self { num_channels })
    }
}

impl Renderer for PassthroughRenderer {
    fn render(&mut self, samples: &[Vec<i32>]) -> Result<Vec<Vec<f64>>> {
        Ok(samples
            .iter()
            .map(|tick| {
                tick.iter()
                    .take(self.num_channels)
                    .map(|&sample| i32_to_normalized(sample))
                    .collect()
            })
            .collect())
    }
}

/// Tries `factory` first, then [`PassthroughRenderer`].
pub fn create_renderer(
    factory: Option<&RendererFactory>,
    audio_element: &AudioElementObu,
    rendering_config: &RenderingConfig,
    layout: &Layout,
) -> Option<Box<dyn Renderer>> {
    if let Some(renderer) = factory.and_then(|f| f(audio_element, rendering_config, layout)) {
        return Some(renderer);
    }

    PassthroughRenderer::new(audio_element, layout).map(|r| Box::new(r) as Box<dyn Renderer>)
}

/// Tracks the digital peak and keeps the remaining user-provided values.
#[derive(Debug, Clone)]
pub struct DigitalPeakCalculator {
    user_loudness: LoudnessInfo,
    peak: u32,
}

impl DigitalPeakCalculator {
    pub fn new(layout: &MixPresentationLayout) -> Self {
        Self {
            user_loudness: layout.loudness.clone(),
            peak: 0,
        }
    }
}

impl LoudnessCalculator for DigitalPeakCalculator {
    fn accumulate(&mut self, samples: &[Vec<i32>]) -> Result<()> {
        for sample in samples.iter().flatten() {
            self.peak = self.peak.max(sample.unsigned_abs());
        }
        Ok(())
    }

    fn query(&self) -> Result<LoudnessInfo> {
        let peak_dbfs = if self.peak == 0 {
            -128.0
        } else {
            (20.0 * (self.peak as f64 / 2_147_483_648.0).log10()).max(-128.0)
        };

        Ok(LoudnessInfo {
            digital_peak: f64_to_q7_8(peak_dbfs.min(0.0))?,
            ..self.user_loudness.clone()
        })
    }
}

/// Per-sample linear gains of a mix gain parameter over one temporal unit.
///
/// `block` is taken to start with the unit; samples it does not cover use the
/// default gain.
pub fn linear_mix_gains(
    definition: &ParamDefinition,
    block: Option<&ParameterBlockObu>,
    num_samples: usize,
    sample_rate: u32,
) -> Result<Vec<f64>> {
    let ParamKind::MixGain { default_mix_gain } = definition.kind else {
        bail!(MixPresentationError::NotMixGain);
    };
    let default = q7_8_db_to_linear(default_mix_gain);

    let Some(block) = block else {
        return Ok(vec![default; num_samples]);
    };
    if block.parameter_id != definition.parameter_id {
        bail!(ParamError::UnknownParameterId(block.parameter_id));
    }

    let duration = block.duration() as i64;
    let rate = definition.parameter_rate as i64;
    (0..num_samples)
        .map(|i| {
            let tick = i as i64 * rate / sample_rate.max(1) as i64;
            if tick < duration {
                block.linear_mix_gain(tick)
            } else {
                Ok(default)
            }
        })
        .collect()
}

struct ElementRendering {
    audio_element_id: DecodedUleb128,
    renderer: Box<dyn Renderer>,
    element_mix_gain: ParamDefinition,
}

/// Renders and mixes one sub-mix to one layout.
pub struct RenderingMixer {
    layout: Layout,
    num_channels: usize,
    sample_rate: u32,
    elements: Vec<ElementRendering>,
    num_skipped: usize,
    output_mix_gain: ParamDefinition,
}

impl RenderingMixer {
    /// Elements that cannot be rendered are skipped with a warning.
    pub fn new(
        descriptors: &DescriptorObus,
        selected: &SelectedLayout,
        factory: Option<&RendererFactory>,
    ) -> Result<Self> {
        let mix_presentation = descriptors
            .mix_presentation(selected.mix_presentation_id)
            .ok_or(LayoutError::NoMixPresentations)?;
        let sub_mix = mix_presentation
            .sub_mixes
            .get(selected.sub_mix_index)
            .ok_or(LayoutError::NoSubMixes(selected.mix_presentation_id))?;

        let mut elements = Vec::new();
        let mut sample_rate = 0;
        for element in &sub_mix.audio_elements {
            let audio_element = descriptors
                .audio_elements
                .get(&element.audio_element_id)
                .ok_or(MixPresentationError::UnknownAudioElement(element.audio_element_id))?;
            sample_rate = descriptors.codec_config_for(audio_element)?.output_sample_rate()?;

            match create_renderer(factory, audio_element, &element.rendering_config, &selected.layout) {
                Some(renderer) => elements.push(ElementRendering {
                    audio_element_id: element.audio_element_id,
                    renderer,
                    element_mix_gain: element.element_mix_gain.clone(),
                }),
                None => warn!(
                    "No renderer for audio element {} to {:?}; it is left out of the mix",
                    element.audio_element_id, selected.layout
                ),
            }
        }

        debug!(
            "Mixing {} of {} audio elements to {:?}",
            elements.len(),
            sub_mix.audio_elements.len(),
            selected.layout
        );

        Ok(Self {
            layout: selected.layout,
            num_channels: layout_channel_count(&selected.layout)?,
            sample_rate,
            num_skipped: sub_mix.audio_elements.len() - elements.len(),
            elements,
            output_mix_gain: sub_mix.output_mix_gain.clone(),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn renders_every_element(&self) -> bool {
        self.num_skipped == 0
    }

    /// Renders one temporal unit to left-justified `[sample][channel]` samples.
    ///
    /// `decoded` maps audio element ids to their `[sample][coded channel]` samples.
    pub fn render(
        &mut self,
        decoded: &HashMap<DecodedUleb128, Vec<Vec<i32>>>,
        parameter_blocks: &[ParameterBlockObu],
        num_samples: usize,
    ) -> Result<Vec<Vec<i32>>> {
        let find_block = |definition: &ParamDefinition| {
            parameter_blocks
                .iter()
                .find(|block| block.parameter_id == definition.parameter_id)
        };

        let mut mix = vec![vec![0f64; self.num_channels]; num_samples];
        for element in &mut self.elements {
            let Some(samples) = decoded.get(&element.audio_element_id) else {
                continue;
            };
            let rendered = element.renderer.render(samples)?;
            let gains = linear_mix_gains(
                &element.element_mix_gain,
                find_block(&element.element_mix_gain),
                num_samples,
                self.sample_rate,
            )?;

            for ((out, tick), gain) in mix.iter_mut().zip(&rendered).zip(gains) {
                for (acc, sample) in out.iter_mut().zip(tick) {
                    *acc += sample * gain;
                }
            }
        }

        let output_gains = linear_mix_gains(
            &self.output_mix_gain,
            find_block(&self.output_mix_gain),
            num_samples,
            self.sample_rate,
        )?;

        Ok(mix
            .into_iter()
            .zip(output_gains)
            .map(|(tick, gain)| tick.into_iter().map(|s| normalized_to_i32(s * gain)).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::mix_presentation::SoundSystem;
    use crate::obu::parameter_block::{MixGainAnimation, ParameterData};
    use crate::process::fixtures::{MIX_PRESENTATION_ID, SAMPLE_RATE, minimal_descriptors, stereo_audio_element};

    fn stereo_selection() -> SelectedLayout {
        SelectedLayout {
            mix_presentation_id: MIX_PRESENTATION_ID,
            layout: Layout::stereo(),
            sub_mix_index: 0,
            layout_index: 0,
        }
    }

    #[test]
    fn passthrough_requires_matching_layout() {
        let element = stereo_audio_element();
        assert!(PassthroughRenderer::new(&element, &Layout::stereo()).is_some());
        assert!(PassthroughRenderer::new(&element, &Layout::ss(SoundSystem::B0_5_0)).is_none());
        assert!(PassthroughRenderer::new(&element, &Layout::binaural()).is_none());
    }

    #[test]
    fn default_gains_pass_samples_through() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let mut mixer = RenderingMixer::new(&descriptors, &stereo_selection(), None)?;
        assert_eq!(mixer.num_channels(), 2);

        let samples = vec![vec![1 << 20, -(1 << 24)]; 4];
        let decoded = HashMap::from([(1, samples.clone())]);
        assert_eq!(mixer.render(&decoded, &[], 4)?, samples);

        // Elements missing from the unit render as silence.
        assert_eq!(mixer.render(&HashMap::new(), &[], 2)?, vec![vec![0, 0]; 2]);

        Ok(())
    }

    #[test]
    fn parameter_blocks_override_defaults() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let mut mixer = RenderingMixer::new(&descriptors, &stereo_selection(), None)?;
        let output_gain = &descriptors.mix_presentations[0].sub_mixes[0].output_mix_gain;

        // -6.0206 dB halves the amplitude.
        let block = ParameterBlockObu::new(
            output_gain,
            vec![ParameterData::MixGain(MixGainAnimation::Step {
                start_point_value: f64_to_q7_8(-6.0206)?,
            })],
        );
        let decoded = HashMap::from([(1, vec![vec![1 << 28, 1 << 28]; 8])]);
        let rendered = mixer.render(&decoded, &[block], 8)?;
        for sample in rendered.iter().flatten() {
            assert!((*sample - (1 << 27)).abs() < 1 << 16);
        }

        let gains = linear_mix_gains(output_gain, None, 3, SAMPLE_RATE)?;
        assert_eq!(gains, vec![1.0; 3]);

        Ok(())
    }

    #[test]
    fn peak_is_measured() -> anyhow::Result<()> {
        let layout = MixPresentationLayout::new(Layout::stereo());
        let mut calculator = DigitalPeakCalculator::new(&layout);
        assert_eq!(calculator.query()?.digital_peak, i16::MIN);

        calculator.accumulate(&[vec![0, i32::MIN / 2]])?;
        let info = calculator.query()?;
        assert_eq!(info.digital_peak, f64_to_q7_8(-6.0206)?);
        assert_eq!(info.integrated_loudness, layout.loudness.integrated_loudness);

        Ok(())
    }
}
