//! Playback layouts and mix presentation selection.

use anyhow::{Result, bail};
use log::{debug, info};

use crate::obu::audio_element::LoudspeakerLayout;
use crate::obu::mix_presentation::{Layout, MixPresentationLayout, MixPresentationObu, SoundSystem};
use crate::utils::errors::LayoutError;
use crate::utils::leb128::DecodedUleb128;

pub fn sound_system_channel_count(sound_system: SoundSystem) -> Result<usize> {
    Ok(match sound_system {
        SoundSystem::A0_2_0 => 2,
        SoundSystem::B0_5_0 => 6,
        SoundSystem::C2_5_0 => 8,
        SoundSystem::D4_5_0 => 10,
        SoundSystem::E4_5_1 => 11,
        SoundSystem::F3_7_0 => 12,
        SoundSystem::G4_9_0 => 14,
        SoundSystem::H9_10_3 => 24,
        SoundSystem::I0_7_0 => 8,
        SoundSystem::J4_7_0 => 12,
        SoundSystem::S10_2_7_0 => 10,
        SoundSystem::S11_2_3_0 => 6,
        SoundSystem::S12_0_1_0 => 1,
        SoundSystem::S13_6_9_0 => 16,
        SoundSystem::S14_5_7_4 => 17,
        SoundSystem::Reserved(value) => bail!(LayoutError::ReservedSoundSystem(value)),
    })
}

/// Number of output channels `layout` renders to.
pub fn layout_channel_count(layout: &Layout) -> Result<usize> {
    match *layout {
        Layout::LoudspeakersSsConvention { sound_system, .. } => sound_system_channel_count(sound_system),
        Layout::Binaural { .. } => Ok(2),
        Layout::Reserved0 { .. } | Layout::Reserved1 { .. } => {
            bail!(LayoutError::ReservedLayout(layout.layout_type()))
        }
    }
}

/// Playback layout that reproduces a channel-based layer without rendering.
pub fn layout_for_loudspeaker_layout(loudspeaker_layout: LoudspeakerLayout) -> Result<Layout> {
    Ok(match loudspeaker_layout {
        LoudspeakerLayout::Mono => Layout::ss(SoundSystem::S12_0_1_0),
        LoudspeakerLayout::Stereo => Layout::stereo(),
        LoudspeakerLayout::L5_1 => Layout::ss(SoundSystem::B0_5_0),
        LoudspeakerLayout::L5_1_2 => Layout::ss(SoundSystem::C2_5_0),
        LoudspeakerLayout::L5_1_4 => Layout::ss(SoundSystem::D4_5_0),
        LoudspeakerLayout::L7_1 => Layout::ss(SoundSystem::I0_7_0),
        LoudspeakerLayout::L7_1_2 => Layout::ss(SoundSystem::S10_2_7_0),
        LoudspeakerLayout::L7_1_4 => Layout::ss(SoundSystem::J4_7_0),
        LoudspeakerLayout::L3_1_2 => Layout::ss(SoundSystem::S11_2_3_0),
        LoudspeakerLayout::Binaural => Layout::binaural(),
        other => bail!(LayoutError::UnknownLoudspeakerLayout(other)),
    })
}

/// Result of [`select_mix_presentation_and_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedLayout {
    pub mix_presentation_id: DecodedUleb128,
    pub layout: Layout,
    pub sub_mix_index: usize,
    pub layout_index: usize,
}

fn contains_layout(mix_presentation: &MixPresentationObu, layout: &Layout) -> bool {
    mix_presentation
        .sub_mixes
        .iter()
        .flat_map(|sub_mix| &sub_mix.layouts)
        .any(|candidate| candidate.loudness_layout == *layout)
}

/// Picks the mix presentation and layout to render.
///
/// A presentation is chosen by `desired_id`, then by containing `desired_layout`,
/// then by position. When `desired_layout` is absent from the chosen presentation
/// it is appended to the first sub-mix, so the returned indices are always valid.
/// Nothing is modified when the layout already exists.
pub fn select_mix_presentation_and_layout(
    mix_presentations: &mut [MixPresentationObu],
    desired_id: Option<DecodedUleb128>,
    desired_layout: Option<&Layout>,
) -> Result<SelectedLayout> {
    if mix_presentations.is_empty() {
        bail!(LayoutError::NoMixPresentations);
    }

    let by_id = desired_id.and_then(|id| {
        mix_presentations
            .iter()
            .position(|mix_presentation| mix_presentation.mix_presentation_id == id)
    });
    let by_layout = || {
        desired_layout.and_then(|layout| {
            mix_presentations
                .iter()
                .position(|mix_presentation| contains_layout(mix_presentation, layout))
        })
    };
    let index = by_id.or_else(by_layout).unwrap_or(0);

    if let (Some(id), None) = (desired_id, by_id) {
        info!("Mix presentation {id} not found, falling back to presentation at index {index}");
    }

    let mix_presentation = &mut mix_presentations[index];
    let mix_presentation_id = mix_presentation.mix_presentation_id;
    if mix_presentation.sub_mixes.is_empty() {
        bail!(LayoutError::NoSubMixes(mix_presentation_id));
    }

    let Some(desired_layout) = desired_layout else {
        let Some(first) = mix_presentation.sub_mixes[0].layouts.first() else {
            bail!(LayoutError::NoLayouts(mix_presentation_id));
        };
        return Ok(SelectedLayout {
            mix_presentation_id,
            layout: first.loudness_layout,
            sub_mix_index: 0,
            layout_index: 0,
        });
    };

    for (sub_mix_index, sub_mix) in mix_presentation.sub_mixes.iter().enumerate() {
        if let Some(layout_index) = sub_mix
            .layouts
            .iter()
            .position(|layout| layout.loudness_layout == *desired_layout)
        {
            return Ok(SelectedLayout {
                mix_presentation_id,
                layout: *desired_layout,
                sub_mix_index,
                layout_index,
            });
        }
    }

    // Validate the layout before adopting it.
    layout_channel_count(desired_layout)?;

    debug!("Adding {desired_layout:?} to mix presentation {mix_presentation_id}");
    let layouts = &mut mix_presentation.sub_mixes[0].layouts;
    layouts.push(MixPresentationLayout::new(*desired_layout));

    Ok(SelectedLayout {
        mix_presentation_id,
        layout: *desired_layout,
        sub_mix_index: 0,
        layout_index: layouts.len() - 1,
    })
}

/// Copy of the selected presentation with only the selected sub-mix and layout.
pub fn simplify(mix_presentation: &MixPresentationObu, selected: &SelectedLayout) -> MixPresentationObu {
    let mut simplified = mix_presentation.clone();
    simplified.sub_mixes = mix_presentation
        .sub_mixes
        .get(selected.sub_mix_index)
        .cloned()
        .into_iter()
        .map(|mut sub_mix| {
            sub_mix.layouts = sub_mix
                .layouts
                .get(selected.layout_index)
                .cloned()
                .into_iter()
                .collect();
            sub_mix
        })
        .collect();

    simplified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::mix_presentation::{
        MixPresentationSubMix, RenderingConfig, SubMixAudioElement,
    };
    use crate::obu::param_definitions::ParamDefinition;

    fn mix_presentation(id: u32, layouts: &[Layout]) -> MixPresentationObu {
        MixPresentationObu::new(
            id,
            vec![MixPresentationSubMix {
                audio_elements: vec![SubMixAudioElement {
                    audio_element_id: id,
                    localized_element_annotations: vec![],
                    rendering_config: RenderingConfig::default(),
                    element_mix_gain: ParamDefinition::mix_gain(100 + id, 48000, 960),
                }],
                output_mix_gain: ParamDefinition::mix_gain(200 + id, 48000, 960),
                layouts: layouts.iter().copied().map(MixPresentationLayout::new).collect(),
            }],
        )
    }

    #[test]
    fn channel_counts() -> anyhow::Result<()> {
        assert_eq!(layout_channel_count(&Layout::stereo())?, 2);
        assert_eq!(layout_channel_count(&Layout::binaural())?, 2);
        assert_eq!(layout_channel_count(&Layout::ss(SoundSystem::J4_7_0))?, 12);
        assert_eq!(layout_channel_count(&Layout::ss(SoundSystem::S13_6_9_0))?, 16);
        assert!(layout_channel_count(&Layout::ss(SoundSystem::Reserved(15))).is_err());
        assert!(layout_channel_count(&Layout::Reserved0 { reserved: 0 }).is_err());

        assert_eq!(
            layout_for_loudspeaker_layout(LoudspeakerLayout::L7_1_4)?,
            Layout::ss(SoundSystem::J4_7_0)
        );
        assert!(layout_for_loudspeaker_layout(LoudspeakerLayout::Expanded).is_err());

        Ok(())
    }

    #[test]
    fn defaults_to_first_layout() -> anyhow::Result<()> {
        let mut mixes = vec![
            mix_presentation(1, &[Layout::stereo()]),
            mix_presentation(2, &[Layout::stereo()]),
        ];
        let selected = select_mix_presentation_and_layout(&mut mixes, None, None)?;
        assert_eq!(selected.mix_presentation_id, 1);
        assert_eq!((selected.sub_mix_index, selected.layout_index), (0, 0));

        let selected = select_mix_presentation_and_layout(&mut mixes, Some(2), None)?;
        assert_eq!(selected.mix_presentation_id, 2);

        // Unknown ids fall back to the first presentation.
        let selected = select_mix_presentation_and_layout(&mut mixes, Some(9), None)?;
        assert_eq!(selected.mix_presentation_id, 1);

        Ok(())
    }

    #[test]
    fn selects_by_layout_without_mutation() -> anyhow::Result<()> {
        let surround = Layout::ss(SoundSystem::B0_5_0);
        let mut mixes = vec![
            mix_presentation(1, &[Layout::stereo()]),
            mix_presentation(2, &[Layout::stereo(), surround]),
        ];
        let before = mixes.clone();

        let selected = select_mix_presentation_and_layout(&mut mixes, None, Some(&surround))?;
        assert_eq!(selected.mix_presentation_id, 2);
        assert_eq!(selected.layout_index, 1);
        assert_eq!(mixes, before);

        Ok(())
    }

    #[test]
    fn appends_missing_layout() -> anyhow::Result<()> {
        let surround = Layout::ss(SoundSystem::I0_7_0);
        let mut mixes = vec![mix_presentation(1, &[Layout::stereo()])];

        let selected = select_mix_presentation_and_layout(&mut mixes, Some(1), Some(&surround))?;
        assert_eq!((selected.sub_mix_index, selected.layout_index), (0, 1));
        assert_eq!(mixes[0].sub_mixes[0].layouts[1].loudness_layout, surround);

        // A second selection finds the appended layout.
        let again = select_mix_presentation_and_layout(&mut mixes, Some(1), Some(&surround))?;
        assert_eq!(again, selected);
        assert_eq!(mixes[0].sub_mixes[0].layouts.len(), 2);

        let simplified = simplify(&mixes[0], &selected);
        assert_eq!(simplified.sub_mixes[0].layouts.len(), 1);
        assert_eq!(simplified.sub_mixes[0].layouts[0].loudness_layout, surround);

        Ok(())
    }

    #[test]
    fn selection_failures() {
        assert!(select_mix_presentation_and_layout(&mut [], None, None).is_err());

        let mut no_layouts = vec![mix_presentation(1, &[])];
        assert!(select_mix_presentation_and_layout(&mut no_layouts, None, None).is_err());

        let mut no_sub_mixes = vec![MixPresentationObu::new(1, vec![])];
        assert!(
            select_mix_presentation_and_layout(&mut no_sub_mixes, None, Some(&Layout::stereo())).is_err()
        );
    }
}
