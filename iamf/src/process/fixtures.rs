//! Small IA sequences shared by unit tests.

use crate::obu::audio_element::{
    AudioElementConfig, AudioElementObu, ChannelAudioLayerConfig, LoudspeakerLayout,
    ScalableChannelLayoutConfig,
};
use crate::obu::audio_frame::AudioFrameObu;
use crate::obu::codec_config::CodecConfigObu;
use crate::obu::decoder_config::DecoderConfig;
use crate::obu::decoder_config::lpcm::{LpcmDecoderConfig, LpcmSampleFormat};
use crate::obu::header::{ObuHeader, ObuType};
use crate::obu::ia_sequence_header::{IaSequenceHeaderObu, ProfileVersion};
use crate::obu::mix_presentation::{
    Layout, MixPresentationLayout, MixPresentationObu, MixPresentationSubMix, RenderingConfig,
    SubMixAudioElement,
};
use crate::obu::param_definitions::ParamDefinition;
use crate::process::descriptors::DescriptorObus;
use crate::process::temporal_unit::TemporalUnit;

pub const SAMPLES_PER_FRAME: u32 = 8;
pub const SAMPLE_RATE: u32 = 16000;
pub const CODEC_CONFIG_ID: u32 = 0;
pub const AUDIO_ELEMENT_ID: u32 = 1;
pub const SUBSTREAM_ID: u32 = 0;
pub const MIX_PRESENTATION_ID: u32 = 42;

pub fn lpcm_codec_config() -> CodecConfigObu {
    let decoder_config = DecoderConfig::Lpcm(LpcmDecoderConfig {
        sample_format: LpcmSampleFormat::LittleEndian,
        sample_size: 16,
        sample_rate: SAMPLE_RATE,
    });
    match CodecConfigObu::new(CODEC_CONFIG_ID, SAMPLES_PER_FRAME, decoder_config) {
        Ok(obu) => obu,
        Err(e) => panic!("fixture codec config is invalid: {e}"),
    }
}

pub fn stereo_audio_element() -> AudioElementObu {
    AudioElementObu::new(
        AUDIO_ELEMENT_ID,
        CODEC_CONFIG_ID,
        vec![SUBSTREAM_ID],
        AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig::single_layer(
            ChannelAudioLayerConfig::new(LoudspeakerLayout::Stereo, 1, 1),
        )),
    )
}

pub fn stereo_mix_presentation() -> MixPresentationObu {
    MixPresentationObu::new(
        MIX_PRESENTATION_ID,
        vec![MixPresentationSubMix {
            audio_elements: vec![SubMixAudioElement {
                audio_element_id: AUDIO_ELEMENT_ID,
                localized_element_annotations: vec![],
                rendering_config: RenderingConfig::default(),
                element_mix_gain: ParamDefinition::mix_gain(100, SAMPLE_RATE, SAMPLES_PER_FRAME),
            }],
            output_mix_gain: ParamDefinition::mix_gain(101, SAMPLE_RATE, SAMPLES_PER_FRAME),
            layouts: vec![MixPresentationLayout::new(Layout::stereo())],
        }],
    )
}

pub fn minimal_descriptors() -> DescriptorObus {
    let mut descriptors = DescriptorObus::new(IaSequenceHeaderObu::new(
        ProfileVersion::Simple,
        ProfileVersion::Simple,
    ));
    descriptors.codec_configs.insert(CODEC_CONFIG_ID, lpcm_codec_config());
    descriptors
        .audio_elements
        .insert(AUDIO_ELEMENT_ID, stereo_audio_element());
    descriptors.mix_presentations.push(stereo_mix_presentation());
    descriptors
}

/// One unit of 8 silent stereo 16-bit samples.
pub fn silent_unit(start_timestamp: i64, trim_at_start: u32) -> TemporalUnit {
    let mut header = ObuHeader::new(ObuType::AudioFrame);
    if trim_at_start > 0 {
        header = header.with_trimming(trim_at_start, 0);
    }

    let mut unit = TemporalUnit::new(start_timestamp, start_timestamp + SAMPLES_PER_FRAME as i64);
    unit.audio_frames
        .push(AudioFrameObu::new(header, SUBSTREAM_ID, vec![0; 32]));
    unit
}
