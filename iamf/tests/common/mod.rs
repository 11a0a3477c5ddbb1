//! Builders shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::Result;
use iamf::obu::audio_element::{
    AudioElementConfig, AudioElementObu, ChannelAudioLayerConfig, LoudspeakerLayout,
    ScalableChannelLayoutConfig,
};
use iamf::obu::codec_config::CodecConfigObu;
use iamf::obu::decoder_config::DecoderConfig;
use iamf::obu::decoder_config::lpcm::{LpcmDecoderConfig, LpcmSampleFormat};
use iamf::obu::ia_sequence_header::{IaSequenceHeaderObu, ProfileVersion};
use iamf::obu::mix_presentation::{
    Layout, MixPresentationLayout, MixPresentationObu, MixPresentationSubMix, RenderingConfig,
    SubMixAudioElement,
};
use iamf::obu::param_definitions::ParamDefinition;
use iamf::process::decoder::{DecoderSettings, IamfDecoder};
use iamf::process::descriptors::DescriptorObus;
use iamf::process::encoder::{
    EncoderConfig, EncoderPlugins, EncoderSettings, IamfEncoder, TemporalUnitData,
};
use iamf::process::obu_processor::RenderingFactories;
use iamf::process::sequencer::ObuSequencer;

pub const SAMPLES_PER_FRAME: u32 = 8;
pub const SAMPLE_RATE: u32 = 16000;
pub const CODEC_CONFIG_ID: u32 = 0;
pub const AUDIO_ELEMENT_ID: u32 = 1;
pub const MIX_PRESENTATION_ID: u32 = 42;

/// Sequence header, 16-bit LPCM at 16 kHz with 8-sample frames, one stereo
/// element on `substream_id` and one mix presentation with a stereo layout.
pub fn stereo_descriptors(substream_id: u32) -> Result<DescriptorObus> {
    let mut descriptors = DescriptorObus::new(IaSequenceHeaderObu::new(
        ProfileVersion::Simple,
        ProfileVersion::Simple,
    ));

    let decoder_config = DecoderConfig::Lpcm(LpcmDecoderConfig {
        sample_format: LpcmSampleFormat::LittleEndian,
        sample_size: 16,
        sample_rate: SAMPLE_RATE,
    });
    descriptors.insert_codec_config(CodecConfigObu::new(
        CODEC_CONFIG_ID,
        SAMPLES_PER_FRAME,
        decoder_config,
    )?)?;

    descriptors.insert_audio_element(AudioElementObu::new(
        AUDIO_ELEMENT_ID,
        CODEC_CONFIG_ID,
        vec![substream_id],
        AudioElementConfig::ScalableChannel(ScalableChannelLayoutConfig::single_layer(
            ChannelAudioLayerConfig::new(LoudspeakerLayout::Stereo, 1, 1),
        )),
    ))?;

    descriptors.insert_mix_presentation(MixPresentationObu::new(
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
    ))?;

    Ok(descriptors)
}

/// Left-justified 16-bit stereo samples: a rising left channel and its
/// negation on the right.
pub fn stereo_ramp(start: usize, num_samples: usize) -> Vec<Vec<i32>> {
    (start..start + num_samples)
        .map(|i| {
            let value = (i as i32 * 97) % 30000;
            vec![value << 16, -value << 16]
        })
        .collect()
}

pub fn unit_data(samples: Vec<Vec<i32>>) -> TemporalUnitData {
    TemporalUnitData {
        samples: HashMap::from([(AUDIO_ELEMENT_ID, samples)]),
        parameter_blocks: Vec::new(),
    }
}

/// Little-endian 16-bit PCM, as the decoder writes it.
pub fn pcm16(samples: &[Vec<i32>]) -> Vec<u8> {
    samples
        .iter()
        .flatten()
        .flat_map(|&sample| ((sample >> 16) as i16).to_le_bytes())
        .collect()
}

/// Output of a complete encode.
pub struct Encoded {
    pub descriptors: Vec<u8>,
    pub temporal_units: Vec<Vec<u8>>,
}

impl Encoded {
    pub fn sequence(&self) -> Vec<u8> {
        let mut bytes = self.descriptors.clone();
        for unit in &self.temporal_units {
            bytes.extend_from_slice(unit);
        }
        bytes
    }
}

/// Encodes `chunks` with the LPCM encoder and collects every non-empty
/// temporal unit.
pub fn encode(
    descriptors: DescriptorObus,
    num_samples_to_trim_at_start: u32,
    settings: EncoderSettings,
    sequencers: Vec<Box<dyn ObuSequencer>>,
    chunks: Vec<TemporalUnitData>,
) -> Result<Encoded> {
    let mut encoder = IamfEncoder::create(
        EncoderConfig {
            descriptors,
            num_samples_to_trim_at_start,
        },
        settings,
        EncoderPlugins::default(),
        sequencers,
    )?;

    let mut temporal_units = Vec::new();
    for chunk in chunks {
        encoder.encode(chunk)?;
        let unit = encoder.output_temporal_unit()?;
        if !unit.is_empty() {
            temporal_units.push(unit);
        }
    }

    encoder.finalize_encode()?;
    while encoder.generating_temporal_units() {
        let unit = encoder.output_temporal_unit()?;
        if !unit.is_empty() {
            temporal_units.push(unit);
        }
    }

    let (descriptors, finalized) = encoder.get_descriptor_obus(false)?;
    assert!(finalized);

    Ok(Encoded {
        descriptors,
        temporal_units,
    })
}

/// Streams `bytes` through a decoder `chunk_size` bytes at a time and returns
/// all PCM it produced.
pub fn decode_in_chunks(bytes: &[u8], chunk_size: usize, settings: DecoderSettings) -> Result<Vec<u8>> {
    let mut decoder = IamfDecoder::create(settings, RenderingFactories::default())?;
    let mut pcm = Vec::new();

    for chunk in bytes.chunks(chunk_size) {
        decoder.decode(chunk)?;
        while decoder.is_temporal_unit_available() {
            pcm.extend(decoder.get_output_temporal_unit()?);
        }
    }

    loop {
        let (unit, done) = decoder.flush()?;
        pcm.extend(unit);
        if done {
            break;
        }
    }

    Ok(pcm)
}
