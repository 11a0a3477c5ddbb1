//! Timestamps for audio frames and parameter blocks.
//!
//! Every substream and every parameter id runs its own clock in ticks of its
//! sample rate or parameter rate. Both start at zero; the clocks only advance.

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::process::descriptors::DescriptorObus;
use crate::utils::errors::{ParamError, ProcessorError};
use crate::utils::leb128::DecodedUleb128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clock {
    rate: u32,
    next_timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalTimingModule {
    audio_frames: HashMap<DecodedUleb128, Clock>,
    parameter_blocks: HashMap<DecodedUleb128, Clock>,
}

impl GlobalTimingModule {
    pub fn new(descriptors: &DescriptorObus) -> Result<Self> {
        let mut audio_frames = HashMap::new();
        for audio_element in descriptors.audio_elements.values() {
            let codec_config = descriptors.codec_config_for(audio_element)?;
            let rate = codec_config.output_sample_rate()?;
            for &substream_id in &audio_element.audio_substream_ids {
                audio_frames.insert(
                    substream_id,
                    Clock {
                        rate,
                        next_timestamp: 0,
                    },
                );
            }
        }

        let parameter_blocks = descriptors
            .param_definitions()?
            .values()
            .map(|definition| {
                (
                    definition.parameter_id,
                    Clock {
                        rate: definition.parameter_rate,
                        next_timestamp: 0,
                    },
                )
            })
            .collect();

        Ok(Self {
            audio_frames,
            parameter_blocks,
        })
    }

    /// Start and end of the next frame of `substream_id` without advancing.
    pub fn peek_audio_frame_timestamps(&self, substream_id: DecodedUleb128, duration: u32) -> Result<(i64, i64)> {
        let Some(clock) = self.audio_frames.get(&substream_id) else {
            bail!(ProcessorError::UnknownSubstream(substream_id));
        };

        Ok((clock.next_timestamp, clock.next_timestamp + duration as i64))
    }

    pub fn next_audio_frame_timestamps(&mut self, substream_id: DecodedUleb128, duration: u32) -> Result<(i64, i64)> {
        let (start, end) = self.peek_audio_frame_timestamps(substream_id, duration)?;
        if let Some(clock) = self.audio_frames.get_mut(&substream_id) {
            clock.next_timestamp = end;
        }

        Ok((start, end))
    }

    /// Start the next block of `parameter_id` would get, without advancing.
    pub fn peek_parameter_block_start(&self, parameter_id: DecodedUleb128, input_start: i64) -> Result<i64> {
        let Some(clock) = self.parameter_blocks.get(&parameter_id) else {
            bail!(ParamError::UnknownParameterId(parameter_id));
        };

        Ok(if clock.next_timestamp == 0 {
            input_start
        } else {
            clock.next_timestamp
        })
    }

    /// Stamps the next block of `parameter_id`.
    ///
    /// A parameter id that was silent so far starts at `input_start`; later blocks
    /// continue where the previous one ended.
    pub fn next_parameter_block_timestamps(
        &mut self,
        parameter_id: DecodedUleb128,
        input_start: i64,
        duration: u32,
    ) -> Result<(i64, i64)> {
        let start = self.peek_parameter_block_start(parameter_id, input_start)?;
        let end = start + duration as i64;
        if let Some(clock) = self.parameter_blocks.get_mut(&parameter_id) {
            clock.next_timestamp = end;
        }

        Ok((start, end))
    }

    pub fn sample_rate(&self, substream_id: DecodedUleb128) -> Option<u32> {
        self.audio_frames.get(&substream_id).map(|clock| clock.rate)
    }

    pub fn parameter_rate(&self, parameter_id: DecodedUleb128) -> Option<u32> {
        self.parameter_blocks.get(&parameter_id).map(|clock| clock.rate)
    }
}
