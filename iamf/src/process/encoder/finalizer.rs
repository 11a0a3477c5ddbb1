use std::collections::HashMap;

use anyhow::{Result, bail};
use log::{debug, info, warn};

use crate::obu::parameter_block::ParameterBlockObu;
use crate::process::descriptors::DescriptorObus;
use crate::process::layout::SelectedLayout;
use crate::process::render::{LoudnessCalculator, LoudnessCalculatorFactory, RendererFactory, RenderingMixer};
use crate::utils::errors::EncoderError;
use crate::utils::leb128::DecodedUleb128;

struct LayoutMeasurement {
    selected: SelectedLayout,
    mixer: RenderingMixer,
    calculator: Box<dyn LoudnessCalculator>,
}

/// Renders every layout of every mix presentation and measures its loudness.
///
/// Layouts without a calculator, or with an audio element that cannot be
/// rendered, keep their user-provided loudness.
pub struct MixPresentationFinalizer {
    measurements: Vec<LayoutMeasurement>,
    finalized: bool,
}

impl MixPresentationFinalizer {
    pub fn new(
        descriptors: &DescriptorObus,
        renderer_factory: Option<&RendererFactory>,
        loudness_factory: Option<&LoudnessCalculatorFactory>,
    ) -> Result<Self> {
        let mut measurements = Vec::new();
        let Some(loudness_factory) = loudness_factory else {
            debug!("No loudness calculator; user-provided loudness is kept");
            return Ok(Self {
                measurements,
                finalized: false,
            });
        };

        let bit_depth = descriptors.statistics()?.common_bit_depth;
        for mix_presentation in &descriptors.mix_presentations {
            for (sub_mix_index, sub_mix) in mix_presentation.sub_mixes.iter().enumerate() {
                for (layout_index, layout) in sub_mix.layouts.iter().enumerate() {
                    let selected = SelectedLayout {
                        mix_presentation_id: mix_presentation.mix_presentation_id,
                        layout: layout.loudness_layout,
                        sub_mix_index,
                        layout_index,
                    };

                    let Some(calculator) = loudness_factory(layout, bit_depth) else {
                        continue;
                    };
                    let mixer = RenderingMixer::new(descriptors, &selected, renderer_factory)?;
                    if !mixer.renders_every_element() {
                        warn!(
                            "Mix presentation {} cannot be fully rendered to {:?}; keeping its loudness",
                            selected.mix_presentation_id, selected.layout
                        );
                        continue;
                    }

                    measurements.push(LayoutMeasurement {
                        selected,
                        mixer,
                        calculator,
                    });
                }
            }
        }

        debug!("Measuring loudness of {} layouts", measurements.len());
        Ok(Self {
            measurements,
            finalized: false,
        })
    }

    /// Renders one temporal unit to every measured layout. Trimmed samples are
    /// rendered but not measured.
    pub fn push_temporal_unit(
        &mut self,
        samples: &HashMap<DecodedUleb128, Vec<Vec<i32>>>,
        parameter_blocks: &[ParameterBlockObu],
        num_samples: usize,
        (trim_at_start, trim_at_end): (u32, u32),
    ) -> Result<()> {
        let first = (trim_at_start as usize).min(num_samples);
        let last = num_samples.saturating_sub(trim_at_end as usize).max(first);

        for measurement in &mut self.measurements {
            let rendered = measurement.mixer.render(samples, parameter_blocks, num_samples)?;
            measurement.calculator.accumulate(&rendered[first..last])?;
        }

        Ok(())
    }

    /// Writes the measured loudness into `descriptors`.
    ///
    /// With `validate_user_loudness` the measured values must equal the
    /// user-provided ones instead.
    pub fn finalize(&mut self, descriptors: &mut DescriptorObus, validate_user_loudness: bool) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        for measurement in &self.measurements {
            let measured = measurement.calculator.query()?;
            let selected = &measurement.selected;
            let Some(layout) = descriptors
                .mix_presentations
                .iter_mut()
                .find(|mix_presentation| mix_presentation.mix_presentation_id == selected.mix_presentation_id)
                .and_then(|mix_presentation| mix_presentation.sub_mixes.get_mut(selected.sub_mix_index))
                .and_then(|sub_mix| sub_mix.layouts.get_mut(selected.layout_index))
            else {
                continue;
            };

            if validate_user_loudness && layout.loudness != measured {
                bail!(EncoderError::LoudnessMismatch {
                    mix_presentation_id: selected.mix_presentation_id,
                });
            }

            info!(
                "Mix presentation {} {:?}: integrated {} digital peak {} (Q7.8 dB)",
                selected.mix_presentation_id, selected.layout, measured.integrated_loudness, measured.digital_peak
            );
            layout.loudness = measured;
        }
        self.finalized = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fixtures::{AUDIO_ELEMENT_ID, minimal_descriptors};
    use crate::process::render::DigitalPeakCalculator;

    fn peak_factory() -> LoudnessCalculatorFactory {
        Box::new(|layout, _| Some(Box::new(DigitalPeakCalculator::new(layout))))
    }

    #[test]
    fn digital_peak_is_back_patched() -> anyhow::Result<()> {
        let mut descriptors = minimal_descriptors();
        let factory = peak_factory();
        let mut finalizer = MixPresentationFinalizer::new(&descriptors, None, Some(&factory))?;

        let mut samples = vec![vec![0, 0]; 8];
        // Trimmed, so it does not count.
        samples[0] = vec![i32::MAX, 0];
        samples[4] = vec![1 << 30, 0];
        let samples = HashMap::from([(AUDIO_ELEMENT_ID, samples)]);
        finalizer.push_temporal_unit(&samples, &[], 8, (1, 0))?;

        let mut strict = descriptors.clone();
        assert!(finalizer.finalize(&mut strict, true).is_err());

        finalizer.finalize(&mut descriptors, false)?;
        let loudness = &descriptors.mix_presentations[0].sub_mixes[0].layouts[0].loudness;
        // Half scale is about -6.02 dB.
        assert_eq!(loudness.digital_peak, -1541);
        assert_eq!(loudness.integrated_loudness, 0);

        Ok(())
    }

    #[test]
    fn no_calculator_keeps_user_loudness() -> anyhow::Result<()> {
        let mut descriptors = minimal_descriptors();
        let original = descriptors.clone();
        let mut finalizer = MixPresentationFinalizer::new(&descriptors, None, None)?;
        let samples = HashMap::from([(AUDIO_ELEMENT_ID, vec![vec![1 << 30, 0]; 8])]);
        finalizer.push_temporal_unit(&samples, &[], 8, (0, 0))?;
        finalizer.finalize(&mut descriptors, true)?;
        assert_eq!(descriptors, original);

        Ok(())
    }
}
