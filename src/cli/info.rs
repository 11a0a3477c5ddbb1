use anyhow::Result;
use indicatif::MultiProgress;
use serde::Serialize;

use iamf::obu::audio_element::{AmbisonicsConfig, AudioElementConfig, AudioElementObu};
use iamf::obu::codec_config::CodecConfigObu;
use iamf::obu::mix_presentation::{MixPresentationObu, info_type};
use iamf::process::descriptors::DescriptorObus;
use iamf::process::temporal_unit::TemporalUnit;
use iamf::utils::numeric::q7_8_to_f64;

use super::command::{Cli, InfoArgs, InfoFormat, layout_name};
use super::progress::create_progress_bar;
use super::stream::ObuStream;
use crate::timestamp::time_str;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing IAMF stream: {}", args.input.display());

    let mut stream = ObuStream::open(&args.input, cli.fail_level())?;
    if let Some(multi) = multi {
        stream.attach_progress(create_progress_bar(multi, stream.input().total_bytes())?);
    }

    let mut processor = stream.read_descriptors()?;
    if let Some(pb) = stream.progress() {
        pb.set_message("counting temporal units");
    }

    let mut temporal_units = TemporalUnitSummary::default();
    while let Some(unit) = stream.next_temporal_unit(&mut processor)? {
        temporal_units.add(&unit);
    }
    if processor.is_end_of_sequence() {
        log::warn!("The input holds more than one IA sequence; only the first one is reported");
    }
    if let Some(pb) = stream.progress() {
        pb.finish_and_clear();
    }

    let descriptors = processor.descriptors();
    let sample_rate = descriptors.statistics().ok().map(|stats| stats.common_sample_rate);
    let report = StreamReport::new(descriptors, temporal_units, sample_rate);

    match args.format {
        InfoFormat::Text => report.print(),
        InfoFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&report)?),
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct StreamReport {
    primary_profile: String,
    additional_profile: String,
    codec_configs: Vec<CodecConfigReport>,
    audio_elements: Vec<AudioElementReport>,
    mix_presentations: Vec<MixPresentationReport>,
    num_arbitrary_obus: usize,
    temporal_units: TemporalUnitSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CodecConfigReport {
    codec_config_id: u32,
    codec: String,
    num_samples_per_frame: u32,
    audio_roll_distance: i16,
    sample_rate: Option<u32>,
    bit_depth_to_measure_loudness: Option<u8>,
}

#[derive(Debug, Serialize)]
struct AudioElementReport {
    audio_element_id: u32,
    codec_config_id: u32,
    kind: String,
    substream_ids: Vec<u32>,
    num_coded_channels: usize,
    /// Loudspeaker layout of each layer, or the ambisonics channel count.
    layers: Vec<String>,
    num_parameters: usize,
}

#[derive(Debug, Serialize)]
struct MixPresentationReport {
    mix_presentation_id: u32,
    annotations: Vec<String>,
    sub_mixes: Vec<SubMixReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
struct SubMixReport {
    audio_element_ids: Vec<u32>,
    layouts: Vec<LayoutReport>,
}

#[derive(Debug, Serialize)]
struct LayoutReport {
    layout: String,
    /// LKFS
    integrated_loudness: f64,
    /// dBFS
    digital_peak: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    true_peak: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
struct TemporalUnitSummary {
    count: u64,
    num_samples: u64,
    num_samples_trimmed_at_start: u64,
    num_samples_trimmed_at_end: u64,
    num_audio_frames: u64,
    num_parameter_blocks: u64,
    num_arbitrary_obus: u64,
    num_temporal_delimiters: u64,
}

impl TemporalUnitSummary {
    fn add(&mut self, unit: &TemporalUnit) {
        let (trim_at_start, trim_at_end) = unit.trimming();
        self.count += 1;
        self.num_samples += unit.num_samples() as u64;
        self.num_samples_trimmed_at_start += trim_at_start as u64;
        self.num_samples_trimmed_at_end += trim_at_end as u64;
        self.num_audio_frames += unit.audio_frames.len() as u64;
        self.num_parameter_blocks += unit.parameter_blocks.len() as u64;
        self.num_arbitrary_obus += unit.arbitrary_obus.len() as u64;
        self.num_temporal_delimiters += unit.temporal_delimiter.is_some() as u64;

        if self.count.is_multiple_of(1000) {
            log::debug!("{} temporal units read", self.count);
        }
    }

    fn num_untrimmed_samples(&self) -> u64 {
        self.num_samples
            .saturating_sub(self.num_samples_trimmed_at_start + self.num_samples_trimmed_at_end)
    }
}

impl CodecConfigReport {
    fn new(codec_config: &CodecConfigObu) -> Self {
        Self {
            codec_config_id: codec_config.codec_config_id,
            codec: codec_config.codec_id().to_string(),
            num_samples_per_frame: codec_config.num_samples_per_frame,
            audio_roll_distance: codec_config.audio_roll_distance,
            sample_rate: codec_config.output_sample_rate().ok(),
            bit_depth_to_measure_loudness: codec_config.bit_depth_to_measure_loudness().ok(),
        }
    }
}

impl AudioElementReport {
    fn new(audio_element: &AudioElementObu) -> Self {
        let (kind, layers) = match &audio_element.config {
            AudioElementConfig::ScalableChannel(config) => (
                "channel-based".to_string(),
                config
                    .channel_audio_layer_configs
                    .iter()
                    .map(|layer| match layer.expanded_loudspeaker_layout {
                        Some(expanded) => format!("{expanded:?}"),
                        None => format!("{:?}", layer.loudspeaker_layout),
                    })
                    .collect(),
            ),
            AudioElementConfig::Ambisonics(config) => {
                let mode = match config {
                    AmbisonicsConfig::Mono(_) => "mono".to_string(),
                    AmbisonicsConfig::Projection(_) => "projection".to_string(),
                    AmbisonicsConfig::Reserved(mode) => format!("reserved mode {mode}"),
                };
                let channels = config
                    .output_channel_count()
                    .map(|count| vec![format!("{count} channels")])
                    .unwrap_or_default();
                (format!("scene-based ({mode})"), channels)
            }
            AudioElementConfig::Extension {
                audio_element_type, ..
            } => (format!("reserved type {audio_element_type}"), Vec::new()),
        };

        Self {
            audio_element_id: audio_element.audio_element_id,
            codec_config_id: audio_element.codec_config_id,
            kind,
            substream_ids: audio_element.audio_substream_ids.clone(),
            num_coded_channels: audio_element.num_coded_channels(),
            layers,
            num_parameters: audio_element.audio_element_params.len(),
        }
    }
}

impl MixPresentationReport {
    fn new(mix_presentation: &MixPresentationObu) -> Self {
        let sub_mixes = mix_presentation
            .sub_mixes
            .iter()
            .map(|sub_mix| SubMixReport {
                audio_element_ids: sub_mix
                    .audio_elements
                    .iter()
                    .map(|element| element.audio_element_id)
                    .collect(),
                layouts: sub_mix
                    .layouts
                    .iter()
                    .map(|layout| LayoutReport {
                        layout: layout_name(&layout.loudness_layout),
                        integrated_loudness: q7_8_to_f64(layout.loudness.integrated_loudness),
                        digital_peak: q7_8_to_f64(layout.loudness.digital_peak),
                        true_peak: (layout.loudness.info_type & info_type::TRUE_PEAK != 0)
                            .then(|| q7_8_to_f64(layout.loudness.true_peak)),
                    })
                    .collect(),
            })
            .collect();

        let tags = mix_presentation
            .mix_presentation_tags
            .iter()
            .flat_map(|tags| &tags.tags)
            .map(|tag| (tag.tag_name.clone(), tag.tag_value.clone()))
            .collect();

        Self {
            mix_presentation_id: mix_presentation.mix_presentation_id,
            annotations: mix_presentation.localized_presentation_annotations.clone(),
            sub_mixes,
            tags,
        }
    }
}

impl StreamReport {
    fn new(descriptors: &DescriptorObus, temporal_units: TemporalUnitSummary, sample_rate: Option<u32>) -> Self {
        let duration_seconds = sample_rate
            .filter(|&rate| rate > 0)
            .map(|rate| temporal_units.num_untrimmed_samples() as f64 / rate as f64);

        Self {
            primary_profile: format!("{:?}", descriptors.ia_sequence_header.primary_profile),
            additional_profile: format!("{:?}", descriptors.ia_sequence_header.additional_profile),
            codec_configs: descriptors.codec_configs.values().map(CodecConfigReport::new).collect(),
            audio_elements: descriptors.audio_elements.values().map(AudioElementReport::new).collect(),
            mix_presentations: descriptors
                .mix_presentations
                .iter()
                .map(MixPresentationReport::new)
                .collect(),
            num_arbitrary_obus: descriptors.arbitrary_obus.len(),
            temporal_units,
            sample_rate,
            duration_seconds,
        }
    }

    fn print(&self) {
        println!();
        println!("IAMF Stream Information");
        println!("=======================");
        println!();
        println!("Primary profile             {}", self.primary_profile);
        println!("Additional profile          {}", self.additional_profile);
        if self.num_arbitrary_obus > 0 {
            println!("Arbitrary OBUs              {}", self.num_arbitrary_obus);
        }
        println!();

        for codec_config in &self.codec_configs {
            println!("Codec config {}", codec_config.codec_config_id);
            println!("  Codec                     {}", codec_config.codec);
            println!("  Samples per frame         {}", codec_config.num_samples_per_frame);
            println!("  Audio roll distance       {}", codec_config.audio_roll_distance);
            if let Some(rate) = codec_config.sample_rate {
                println!("  Sample rate               {rate} Hz");
            }
            if let Some(bit_depth) = codec_config.bit_depth_to_measure_loudness {
                println!("  Bit depth                 {bit_depth}");
            }
            println!();
        }

        for audio_element in &self.audio_elements {
            println!("Audio element {}", audio_element.audio_element_id);
            println!("  Type                      {}", audio_element.kind);
            println!("  Codec config              {}", audio_element.codec_config_id);
            println!("  Substreams                {:?}", audio_element.substream_ids);
            println!("  Coded channels            {}", audio_element.num_coded_channels);
            if !audio_element.layers.is_empty() {
                println!("  Layers                    {}", audio_element.layers.join(", "));
            }
            if audio_element.num_parameters > 0 {
                println!("  Parameters                {}", audio_element.num_parameters);
            }
            println!();
        }

        for mix_presentation in &self.mix_presentations {
            println!("Mix presentation {}", mix_presentation.mix_presentation_id);
            if !mix_presentation.annotations.is_empty() {
                println!("  Annotations               {}", mix_presentation.annotations.join(", "));
            }
            for (name, value) in &mix_presentation.tags {
                println!("  Tag                       {name}={value}");
            }
            for (index, sub_mix) in mix_presentation.sub_mixes.iter().enumerate() {
                println!("  Sub-mix {index}                 elements {:?}", sub_mix.audio_element_ids);
                for layout in &sub_mix.layouts {
                    print!(
                        "    {:<24}{:.2} LKFS, peak {:.2} dBFS",
                        layout.layout, layout.integrated_loudness, layout.digital_peak
                    );
                    match layout.true_peak {
                        Some(true_peak) => println!(", true peak {true_peak:.2} dBTP"),
                        None => println!(),
                    }
                }
            }
            println!();
        }

        let units = &self.temporal_units;
        println!("Temporal units              {}", units.count);
        println!("Audio frames                {}", units.num_audio_frames);
        println!("Parameter blocks            {}", units.num_parameter_blocks);
        if units.num_arbitrary_obus > 0 {
            println!("Arbitrary OBUs in units     {}", units.num_arbitrary_obus);
        }
        println!(
            "Samples                     {} ({} trimmed at start, {} at end)",
            units.num_samples, units.num_samples_trimmed_at_start, units.num_samples_trimmed_at_end
        );
        if let Some(rate) = self.sample_rate {
            println!(
                "Duration                    {}",
                time_str(units.num_untrimmed_samples(), rate)
            );
        }
        println!();
    }
}
