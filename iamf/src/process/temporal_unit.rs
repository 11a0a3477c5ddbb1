use std::collections::HashSet;

use anyhow::{Result, bail};

use crate::obu::ObuBase;
use crate::obu::arbitrary::{ArbitraryObu, InsertionHook};
use crate::obu::audio_frame::AudioFrameObu;
use crate::obu::parameter_block::ParameterBlockObu;
use crate::obu::temporal_delimiter::TemporalDelimiterObu;
use crate::utils::bit_buffer::WriteBitBuffer;
use crate::utils::errors::SequencerError;

/// All OBUs that share one start timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalUnit {
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub temporal_delimiter: Option<TemporalDelimiterObu>,
    pub parameter_blocks: Vec<ParameterBlockObu>,
    pub audio_frames: Vec<AudioFrameObu>,
    pub arbitrary_obus: Vec<ArbitraryObu>,
}

impl TemporalUnit {
    pub fn new(start_timestamp: i64, end_timestamp: i64) -> Self {
        Self {
            start_timestamp,
            end_timestamp,
            temporal_delimiter: None,
            parameter_blocks: Vec::new(),
            audio_frames: Vec::new(),
            arbitrary_obus: Vec::new(),
        }
    }

    pub fn num_samples(&self) -> u32 {
        (self.end_timestamp - self.start_timestamp).max(0) as u32
    }

    /// Samples trimmed from the start and the end of the unit.
    pub fn trimming(&self) -> (u32, u32) {
        self.audio_frames.first().map_or((0, 0), |frame| {
            (
                frame.header.num_samples_to_trim_at_start,
                frame.header.num_samples_to_trim_at_end,
            )
        })
    }

    pub fn num_untrimmed_samples(&self) -> u32 {
        let (start, end) = self.trimming();
        self.num_samples().saturating_sub(start.saturating_add(end))
    }

    /// Timestamp of the first sample that survives trimming.
    pub fn first_untrimmed_timestamp(&self) -> Option<i64> {
        (self.num_untrimmed_samples() > 0).then(|| self.start_timestamp + self.trimming().0 as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio_frames.is_empty() {
            bail!(SequencerError::EmptyTemporalUnit);
        }

        let trimming = self.trimming();
        let mut substreams = HashSet::new();
        for frame in &self.audio_frames {
            let header = &frame.header;
            if (header.num_samples_to_trim_at_start, header.num_samples_to_trim_at_end) != trimming {
                bail!(SequencerError::InconsistentTemporalUnit("trimming"));
            }
            if !substreams.insert(frame.audio_substream_id) {
                bail!(SequencerError::DuplicateSubstream(frame.audio_substream_id));
            }
        }

        let trimmed = trimming.0 as u64 + trimming.1 as u64;
        if trimmed > self.num_samples() as u64 {
            bail!(SequencerError::TrimExceedsFrame {
                trimmed,
                frame: self.num_samples(),
            });
        }

        let mut parameters = HashSet::new();
        for block in &self.parameter_blocks {
            if !parameters.insert(block.parameter_id) {
                bail!(SequencerError::DuplicateParameter(block.parameter_id));
            }
        }

        Ok(())
    }

    /// Writes the unit: delimiter, parameter blocks, audio frames, with arbitrary
    /// OBUs at their hooks.
    pub fn write(&self, include_temporal_delimiter: bool, wb: &mut WriteBitBuffer) -> Result<()> {
        self.validate()?;

        if include_temporal_delimiter {
            self.temporal_delimiter
                .clone()
                .unwrap_or_default()
                .validate_and_write(wb)?;
        }

        let arbitrary = &self.arbitrary_obus;
        ArbitraryObu::write_obus_with_hook(InsertionHook::BeforeParameterBlocksAtTick, arbitrary, wb)?;
        for block in &self.parameter_blocks {
            block.validate_and_write(wb)?;
        }
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterParameterBlocksAtTick, arbitrary, wb)?;
        for frame in &self.audio_frames {
            frame.validate_and_write(wb)?;
        }
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterAudioFramesAtTick, arbitrary, wb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::header::{ObuHeader, ObuType};

    fn frame(substream_id: u32, trim_start: u32, trim_end: u32) -> AudioFrameObu {
        let header = ObuHeader::new(ObuType::AudioFrame).with_trimming(trim_start, trim_end);
        AudioFrameObu::new(header, substream_id, vec![0; 4])
    }

    #[test]
    fn trimming_must_agree() {
        let mut unit = TemporalUnit::new(0, 8);
        unit.audio_frames = vec![frame(0, 2, 0), frame(1, 2, 0)];
        assert!(unit.validate().is_ok());
        assert_eq!(unit.num_untrimmed_samples(), 6);
        assert_eq!(unit.first_untrimmed_timestamp(), Some(2));

        unit.audio_frames[1] = frame(1, 0, 0);
        assert!(unit.validate().is_err());

        unit.audio_frames = vec![frame(0, 6, 4)];
        assert!(unit.validate().is_err());

        unit.audio_frames = vec![frame(0, 8, 0)];
        assert!(unit.validate().is_ok());
        assert_eq!(unit.first_untrimmed_timestamp(), None);
    }

    #[test]
    fn trims_past_u32_are_rejected() {
        let mut unit = TemporalUnit::new(0, 8);
        unit.audio_frames = vec![frame(0, u32::MAX, 1)];
        assert_eq!(unit.num_untrimmed_samples(), 0);
        assert_eq!(unit.first_untrimmed_timestamp(), None);

        let err = unit.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SequencerError>(),
            Some(SequencerError::TrimExceedsFrame { trimmed, frame: 8 }) if *trimmed == u32::MAX as u64 + 1
        ));
    }

    #[test]
    fn duplicate_substreams_are_rejected() {
        let mut unit = TemporalUnit::new(0, 8);
        unit.audio_frames = vec![frame(3, 0, 0), frame(3, 0, 0)];
        assert!(unit.validate().is_err());

        assert!(TemporalUnit::new(0, 8).validate().is_err());
    }

    #[test]
    fn delimiter_and_hooks() -> anyhow::Result<()> {
        let mut unit = TemporalUnit::new(0, 8);
        unit.audio_frames = vec![AudioFrameObu::new(ObuHeader::new(ObuType::AudioFrame), 0, vec![7])];
        unit.arbitrary_obus = vec![ArbitraryObu::new(
            ObuType::Reserved(24),
            vec![9],
            InsertionHook::AfterAudioFramesAtTick,
        )];

        let mut wb = WriteBitBuffer::default();
        unit.write(true, &mut wb)?;
        assert_eq!(wb.take_bytes()?, [4 << 3, 0, 6 << 3, 1, 7, 24 << 3, 1, 9]);

        Ok(())
    }
}
