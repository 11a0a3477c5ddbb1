mod common;

use anyhow::Result;
use iamf::obu::mix_presentation::Layout;
use iamf::process::decoder::{DecoderSettings, IamfDecoder};
use iamf::process::encoder::EncoderSettings;
use iamf::process::obu_processor::RenderingFactories;
use iamf::process::sequencer::{FileSequencer, ObuSequencer, SequencerSettings};
use iamf::utils::errors::{ErrorKind, error_kind};
use iamf::utils::leb128::LebGenerator;

use common::{
    MIX_PRESENTATION_ID, SAMPLE_RATE, decode_in_chunks, encode, pcm16, stereo_descriptors,
    stereo_ramp, unit_data,
};

#[test]
fn descriptors_complete_across_calls() -> Result<()> {
    let encoded = encode(
        stereo_descriptors(0)?,
        0,
        EncoderSettings::default(),
        Vec::new(),
        vec![unit_data(stereo_ramp(0, 8))],
    )?;
    let bytes = encoded.sequence();

    let mut decoder = IamfDecoder::create(DecoderSettings::default(), RenderingFactories::default())?;
    decoder.decode(&bytes[..10])?;
    assert!(!decoder.is_descriptor_processing_complete());
    assert!(decoder.get_mix_presentations().is_err());

    decoder.decode(&bytes[10..])?;
    assert!(decoder.is_descriptor_processing_complete());
    assert_eq!(decoder.get_mix_presentations()?, vec![MIX_PRESENTATION_ID]);
    assert_eq!(decoder.selected_layout()?.layout, Layout::stereo());
    assert_eq!(decoder.num_output_channels()?, 2);
    assert_eq!(decoder.sample_rate()?, SAMPLE_RATE);

    Ok(())
}

#[test]
fn malformed_descriptors_are_reported() -> Result<()> {
    let encoded = encode(
        stereo_descriptors(0)?,
        0,
        EncoderSettings::default(),
        Vec::new(),
        vec![unit_data(stereo_ramp(0, 8))],
    )?;
    let mut bytes = encoded.sequence();
    // The sequence header claims five payload bytes but needs six.
    assert_eq!(bytes[1], 6);
    bytes[1] = 5;

    let mut decoder = IamfDecoder::create(DecoderSettings::default(), RenderingFactories::default())?;
    let err = decoder.decode(&bytes).unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::InvalidArgument);
    assert!(!decoder.is_descriptor_processing_complete());

    Ok(())
}

#[test]
fn lpcm_decodes_bit_exact() -> Result<()> {
    let input = stereo_ramp(0, 20);
    let encoded = encode(
        stereo_descriptors(0)?,
        0,
        EncoderSettings::default(),
        Vec::new(),
        vec![unit_data(input[..12].to_vec()), unit_data(input[12..].to_vec())],
    )?;
    let bytes = encoded.sequence();

    // Byte-at-a-time and all-at-once give the same output.
    for chunk_size in [1, 7, bytes.len()] {
        let pcm = decode_in_chunks(&bytes, chunk_size, DecoderSettings::default())?;
        assert_eq!(pcm, pcm16(&input), "chunk size {chunk_size}");
    }

    Ok(())
}

#[test]
fn trimmed_samples_are_not_output() -> Result<()> {
    let input = stereo_ramp(0, 19);
    let encoded = encode(
        stereo_descriptors(0)?,
        3,
        EncoderSettings::default(),
        Vec::new(),
        vec![unit_data(input.clone())],
    )?;

    let pcm = decode_in_chunks(&encoded.sequence(), 64, DecoderSettings::default())?;
    assert_eq!(pcm, pcm16(&input[3..]));

    Ok(())
}

#[test]
fn wider_output_keeps_the_sample_bits() -> Result<()> {
    let input = stereo_ramp(0, 8);
    let encoded = encode(
        stereo_descriptors(0)?,
        0,
        EncoderSettings::default(),
        Vec::new(),
        vec![unit_data(input.clone())],
    )?;

    let settings = DecoderSettings {
        bit_depth: 24,
        ..Default::default()
    };
    let pcm = decode_in_chunks(&encoded.sequence(), 16, settings)?;
    assert_eq!(pcm.len(), 8 * 2 * 3);

    // The low byte is zero and the upper two hold the 16-bit sample.
    for (bytes, sample) in pcm.chunks(3).zip(input.iter().flatten()) {
        assert_eq!(bytes[0], 0);
        assert_eq!(i16::from_le_bytes([bytes[1], bytes[2]]), (sample >> 16) as i16);
    }

    Ok(())
}

#[test]
fn settings_are_checked() -> Result<()> {
    let settings = DecoderSettings {
        bit_depth: 20,
        ..Default::default()
    };
    assert!(IamfDecoder::create(settings, RenderingFactories::default()).is_err());

    let descriptors = stereo_descriptors(0)?.serialize(LebGenerator::Minimum)?;
    let mut decoder = IamfDecoder::create_from_descriptors(
        DecoderSettings::default(),
        RenderingFactories::default(),
        &descriptors,
    )?;
    assert!(decoder.is_descriptor_processing_complete());
    assert!(decoder.configure_mix_presentation_id(7).is_err());
    assert!(decoder.configure_bit_depth(8).is_err());
    decoder.configure_bit_depth(32)?;
    assert_eq!(decoder.bit_depth(), 32);

    let (pcm, done) = decoder.flush()?;
    assert!(pcm.is_empty());
    assert!(done);
    assert!(decoder.decode(&[0]).is_err());

    Ok(())
}

#[test]
fn sequencer_output_decodes() -> Result<()> {
    let path = std::env::temp_dir().join(format!("iamf-decode-{}.iamf", std::process::id()));
    let settings = SequencerSettings {
        leb_generator: LebGenerator::fixed(2)?,
        include_temporal_delimiters: true,
        ..Default::default()
    };
    let sequencer: Box<dyn ObuSequencer> = Box::new(FileSequencer::new(&path, settings));

    let input = stereo_ramp(100, 24);
    encode(
        stereo_descriptors(0)?,
        0,
        EncoderSettings::default(),
        vec![sequencer],
        vec![unit_data(input.clone())],
    )?;

    let bytes = std::fs::read(&path)?;
    std::fs::remove_file(&path)?;

    let pcm = decode_in_chunks(&bytes, 5, DecoderSettings::default())?;
    assert_eq!(pcm, pcm16(&input));

    Ok(())
}
