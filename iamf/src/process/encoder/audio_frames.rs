use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::obu::audio_frame::AudioFrameObu;
use crate::obu::header::{ObuHeader, ObuType};
use crate::process::codec::{SubstreamEncoder, SubstreamEncoderFactory, create_substream_encoder};
use crate::process::descriptors::DescriptorObus;
use crate::process::timing::GlobalTimingModule;
use crate::utils::errors::{EncoderError, MixPresentationError};
use crate::utils::leb128::DecodedUleb128;

struct SubstreamEncoding {
    substream_id: DecodedUleb128,
    channel_offset: usize,
    num_channels: usize,
    encoder: Box<dyn SubstreamEncoder>,
}

struct ElementFrames {
    audio_element_id: DecodedUleb128,
    num_channels: usize,
    buffered: Vec<Vec<i32>>,
    next_timestamp: i64,
    substreams: Vec<SubstreamEncoding>,
}

/// Audio of one temporal unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAudio {
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub trimming: (u32, u32),
    pub audio_frames: Vec<AudioFrameObu>,
    /// Input samples per audio element, including padding.
    pub samples: HashMap<DecodedUleb128, Vec<Vec<i32>>>,
}

/// Cuts input samples into frames and runs the substream encoders.
///
/// Samples are buffered per audio element until a full frame is available. The
/// last frame is padded with silence, and the padding is trimmed at the end.
/// Coded frames are stamped by the timing module as the encoders release them,
/// so codecs with a delay simply complete their temporal units later.
pub struct AudioFrameGenerator {
    samples_per_frame: usize,
    elements: Vec<ElementFrames>,
    pending: BTreeMap<i64, GeneratedAudio>,
    num_substreams: usize,
    samples_left_to_trim_at_start: u32,
    finalized: bool,
}

impl AudioFrameGenerator {
    pub fn new(
        descriptors: &DescriptorObus,
        factory: Option<&SubstreamEncoderFactory>,
        num_samples_to_trim_at_start: u32,
    ) -> Result<Self> {
        let statistics = descriptors.statistics()?;

        let mut elements = Vec::new();
        let mut num_substreams = 0;
        for audio_element in descriptors.audio_elements.values() {
            let codec_config = descriptors.codec_config_for(audio_element)?;

            let mut substreams = Vec::new();
            let mut channel_offset = 0;
            let channel_counts = audio_element.substream_channel_counts();
            for (&substream_id, &num_channels) in audio_element.audio_substream_ids.iter().zip(&channel_counts) {
                substreams.push(SubstreamEncoding {
                    substream_id,
                    channel_offset,
                    num_channels,
                    encoder: create_substream_encoder(factory, codec_config, num_channels)?,
                });
                channel_offset += num_channels;
            }

            debug!(
                "Audio element {}: {} substreams, {} channels, codec {}",
                audio_element.audio_element_id,
                substreams.len(),
                channel_offset,
                codec_config.codec_id()
            );

            num_substreams += substreams.len();
            elements.push(ElementFrames {
                audio_element_id: audio_element.audio_element_id,
                num_channels: channel_offset,
                buffered: Vec::new(),
                next_timestamp: 0,
                substreams,
            });
        }

        Ok(Self {
            samples_per_frame: statistics.common_samples_per_frame as usize,
            elements,
            pending: BTreeMap::new(),
            num_substreams,
            samples_left_to_trim_at_start: num_samples_to_trim_at_start,
            finalized: false,
        })
    }

    /// Buffers `[sample][channel]` input for every audio element and encodes
    /// the frames that became complete. Returns the number of samples taken per
    /// element.
    pub fn add_samples(
        &mut self,
        samples: &HashMap<DecodedUleb128, Vec<Vec<i32>>>,
        timing: &mut GlobalTimingModule,
    ) -> Result<usize> {
        if self.finalized {
            bail!(EncoderError::EncodeAfterFinalize);
        }

        if let Some(&id) = samples
            .keys()
            .find(|&&id| !self.elements.iter().any(|element| element.audio_element_id == id))
        {
            bail!(MixPresentationError::UnknownAudioElement(id));
        }

        let mut num_samples = None;
        for element in &self.elements {
            let Some(input) = samples.get(&element.audio_element_id) else {
                bail!(EncoderError::MissingSamples(element.audio_element_id));
            };

            let expected = *num_samples.get_or_insert(input.len());
            if input.len() != expected {
                bail!(EncoderError::SampleCountMismatch {
                    audio_element_id: element.audio_element_id,
                    expected,
                    actual: input.len(),
                });
            }

            if let Some((index, tick)) = input
                .iter()
                .enumerate()
                .find(|(_, tick)| tick.len() != element.num_channels)
            {
                bail!(EncoderError::RaggedFrame {
                    index,
                    expected: element.num_channels,
                    actual: tick.len(),
                });
            }
        }

        for index in 0..self.elements.len() {
            let element = &mut self.elements[index];
            if let Some(input) = samples.get(&element.audio_element_id) {
                element.buffered.extend(input.iter().cloned());
            }

            while self.elements[index].buffered.len() >= self.samples_per_frame {
                let frame: Vec<_> = self.elements[index]
                    .buffered
                    .drain(..self.samples_per_frame)
                    .collect();
                self.encode_frame(index, frame, 0, timing)?;
            }
        }

        Ok(num_samples.unwrap_or(0))
    }

    /// Pads and encodes the remaining samples and flushes the encoders.
    pub fn finalize(&mut self, timing: &mut GlobalTimingModule) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        for index in 0..self.elements.len() {
            let element = &mut self.elements[index];
            if element.buffered.is_empty() {
                continue;
            }

            let mut frame = std::mem::take(&mut element.buffered);
            let padding = self.samples_per_frame - frame.len();
            frame.resize(self.samples_per_frame, vec![0; element.num_channels]);
            self.encode_frame(index, frame, padding as u32, timing)?;
        }

        for element in &mut self.elements {
            for substream in &mut element.substreams {
                substream.encoder.finalize()?;
                drain(substream, self.samples_per_frame, &mut self.pending, timing)?;
            }
        }

        Ok(())
    }

    fn encode_frame(
        &mut self,
        index: usize,
        frame: Vec<Vec<i32>>,
        trim_at_end: u32,
        timing: &mut GlobalTimingModule,
    ) -> Result<()> {
        let samples_per_frame = self.samples_per_frame;
        let element = &mut self.elements[index];
        let start = element.next_timestamp;
        element.next_timestamp += samples_per_frame as i64;

        // Every element walks the same frame grid, so the first one to reach a
        // timestamp decides its trimming.
        let trim_at_start_left = &mut self.samples_left_to_trim_at_start;
        let unit = self.pending.entry(start).or_insert_with(|| {
            let room = samples_per_frame as u32 - trim_at_end;
            let trim_at_start = (*trim_at_start_left).min(room);
            *trim_at_start_left -= trim_at_start;
            GeneratedAudio {
                start_timestamp: start,
                end_timestamp: start + samples_per_frame as i64,
                trimming: (trim_at_start, trim_at_end),
                audio_frames: Vec::new(),
                samples: HashMap::new(),
            }
        });

        for substream in &mut element.substreams {
            let columns: Vec<Vec<i32>> = frame
                .iter()
                .map(|tick| tick[substream.channel_offset..substream.channel_offset + substream.num_channels].to_vec())
                .collect();
            substream.encoder.encode_frame(&columns)?;
        }
        unit.samples.insert(element.audio_element_id, frame);

        for substream in &mut element.substreams {
            drain(substream, samples_per_frame, &mut self.pending, timing)?;
        }

        Ok(())
    }

    /// Removes the earliest temporal unit once every substream has a frame for it.
    pub fn pop_temporal_unit(&mut self) -> Option<GeneratedAudio> {
        let entry = self.pending.first_entry()?;
        if entry.get().audio_frames.len() < self.num_substreams {
            return None;
        }

        let mut unit = entry.remove();
        unit.audio_frames.sort_by_key(|frame| frame.audio_substream_id);
        Some(unit)
    }

    /// Whether samples or frames are still waiting to be output.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.elements.iter().any(|element| !element.buffered.is_empty())
    }
}

fn drain(
    substream: &mut SubstreamEncoding,
    samples_per_frame: usize,
    pending: &mut BTreeMap<i64, GeneratedAudio>,
    timing: &mut GlobalTimingModule,
) -> Result<()> {
    while let Some(data) = substream.encoder.pop_frame() {
        let (start, _) = timing.next_audio_frame_timestamps(substream.substream_id, samples_per_frame as u32)?;
        let Some(unit) = pending.get_mut(&start) else {
            bail!(EncoderError::UnexpectedFrame(substream.substream_id));
        };

        let mut header = ObuHeader::new(ObuType::AudioFrame);
        let (trim_at_start, trim_at_end) = unit.trimming;
        if trim_at_start > 0 || trim_at_end > 0 {
            header = header.with_trimming(trim_at_start, trim_at_end);
        }

        trace!(
            "substream {}: {} bytes at {start}",
            substream.substream_id,
            data.len()
        );
        unit.audio_frames
            .push(AudioFrameObu::new(header, substream.substream_id, data));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::codec::SubstreamEncoder;
    use crate::process::fixtures::{AUDIO_ELEMENT_ID, SAMPLES_PER_FRAME, minimal_descriptors};

    fn stereo(num_samples: usize, value: i32) -> HashMap<DecodedUleb128, Vec<Vec<i32>>> {
        HashMap::from([(AUDIO_ELEMENT_ID, vec![vec![value, -value]; num_samples])])
    }

    #[test]
    fn frames_are_cut_and_padded() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let mut timing = GlobalTimingModule::new(&descriptors)?;
        let mut generator = AudioFrameGenerator::new(&descriptors, None, 10)?;

        assert_eq!(generator.add_samples(&stereo(5, 1 << 16), &mut timing)?, 5);
        assert!(generator.pop_temporal_unit().is_none());
        assert!(generator.has_pending());

        generator.add_samples(&stereo(7, 1 << 16), &mut timing)?;
        let first = generator.pop_temporal_unit().ok_or_else(|| anyhow::anyhow!("no unit"))?;
        assert_eq!((first.start_timestamp, first.end_timestamp), (0, 8));
        assert_eq!(first.trimming, (8, 0));
        assert_eq!(first.audio_frames.len(), 1);
        assert_eq!(first.audio_frames[0].audio_frame.len(), 32);
        assert_eq!(&first.audio_frames[0].audio_frame[..4], &[1, 0, 0xff, 0xff]);

        generator.finalize(&mut timing)?;
        let last = generator.pop_temporal_unit().ok_or_else(|| anyhow::anyhow!("no unit"))?;
        assert_eq!(last.start_timestamp, SAMPLES_PER_FRAME as i64);
        // 4 real samples, 2 of which are still trimmed at the start.
        assert_eq!(last.trimming, (2, 4));
        let header = &last.audio_frames[0].header;
        assert!(header.obu_trimming_status_flag);
        assert_eq!(header.num_samples_to_trim_at_end, 4);
        assert_eq!(last.samples[&AUDIO_ELEMENT_ID][7], vec![0, 0]);

        assert!(!generator.has_pending());
        assert!(generator.add_samples(&stereo(1, 0), &mut timing).is_err());

        Ok(())
    }

    #[test]
    fn input_is_checked() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let mut timing = GlobalTimingModule::new(&descriptors)?;
        let mut generator = AudioFrameGenerator::new(&descriptors, None, 0)?;

        assert!(generator.add_samples(&HashMap::new(), &mut timing).is_err());
        let mono = HashMap::from([(AUDIO_ELEMENT_ID, vec![vec![0]; 8])]);
        assert!(generator.add_samples(&mono, &mut timing).is_err());
        let mut unknown = stereo(8, 0);
        unknown.insert(99, vec![vec![0, 0]; 8]);
        assert!(generator.add_samples(&unknown, &mut timing).is_err());

        Ok(())
    }

    /// Holds every frame back by one.
    struct DelayedEncoder {
        held: Option<Vec<u8>>,
        ready: Vec<Vec<u8>>,
    }

    impl SubstreamEncoder for DelayedEncoder {
        fn encode_frame(&mut self, samples: &[Vec<i32>]) -> anyhow::Result<()> {
            if let Some(frame) = self.held.replace(vec![samples.len() as u8]) {
                self.ready.push(frame);
            }
            Ok(())
        }

        fn pop_frame(&mut self) -> Option<Vec<u8>> {
            (!self.ready.is_empty()).then(|| self.ready.remove(0))
        }

        fn finalize(&mut self) -> anyhow::Result<()> {
            self.ready.extend(self.held.take());
            Ok(())
        }
    }

    #[test]
    fn codec_delay_defers_units() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let mut timing = GlobalTimingModule::new(&descriptors)?;
        let factory: SubstreamEncoderFactory = Box::new(|_, _| {
            Some(Box::new(DelayedEncoder {
                held: None,
                ready: Vec::new(),
            }))
        });
        let mut generator = AudioFrameGenerator::new(&descriptors, Some(&factory), 0)?;

        generator.add_samples(&stereo(8, 0), &mut timing)?;
        assert!(generator.pop_temporal_unit().is_none());
        generator.add_samples(&stereo(8, 0), &mut timing)?;
        assert_eq!(generator.pop_temporal_unit().map(|unit| unit.start_timestamp), Some(0));
        assert!(generator.pop_temporal_unit().is_none());

        generator.finalize(&mut timing)?;
        assert_eq!(generator.pop_temporal_unit().map(|unit| unit.start_timestamp), Some(8));
        assert!(!generator.has_pending());

        Ok(())
    }
}
