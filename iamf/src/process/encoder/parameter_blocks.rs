use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::obu::param_definitions::ParamDefinitionMap;
use crate::obu::parameter_block::ParameterBlockObu;
use crate::process::timing::GlobalTimingModule;
use crate::utils::errors::{EncoderError, ParamError};

/// Checks user parameter blocks and holds them until their temporal unit is
/// output.
///
/// Blocks of one parameter id must be contiguous: each starts where the
/// previous one ended, measured in ticks of the parameter rate.
#[derive(Debug)]
pub struct ParameterBlockGenerator {
    param_definitions: ParamDefinitionMap,
    /// Keyed by the audio timestamp of the input they arrived with.
    queued: BTreeMap<i64, Vec<ParameterBlockObu>>,
}

impl ParameterBlockGenerator {
    pub fn new(param_definitions: ParamDefinitionMap) -> Self {
        Self {
            param_definitions,
            queued: BTreeMap::new(),
        }
    }

    /// Queues `block`, which starts with the input sample at `input_timestamp`.
    pub fn add(
        &mut self,
        block: ParameterBlockObu,
        input_timestamp: i64,
        sample_rate: u32,
        timing: &mut GlobalTimingModule,
    ) -> Result<()> {
        let id = block.parameter_id;
        let Some(definition) = self.param_definitions.get(&id) else {
            bail!(ParamError::UnknownParameterId(id));
        };
        if !definition.is_equivalent(&block.param_definition) {
            bail!(EncoderError::ParameterDefinitionMismatch(id));
        }
        block.validate()?;

        let expected = input_timestamp * definition.parameter_rate as i64 / sample_rate.max(1) as i64;
        let start = timing.peek_parameter_block_start(id, expected)?;
        if start != expected {
            bail!(EncoderError::ParameterBlockMisaligned {
                id,
                expected: start,
                actual: expected,
            });
        }
        let (start, end) = timing.next_parameter_block_timestamps(id, expected, block.duration())?;

        debug!("Parameter block {id}: [{start}, {end}) with input at {input_timestamp}");
        self.queued.entry(input_timestamp).or_default().push(block);

        Ok(())
    }

    /// Removes the blocks that belong to the unit spanning `[start, end)`.
    ///
    /// Blocks queued before `start` never found a unit and are dropped.
    pub fn take_for(&mut self, start: i64, end: i64) -> Vec<ParameterBlockObu> {
        let later = self.queued.split_off(&end);
        let current = std::mem::replace(&mut self.queued, later);

        let mut blocks = Vec::new();
        for (timestamp, queued) in current {
            if timestamp < start {
                warn!("Dropping {} parameter blocks queued at {timestamp}", queued.len());
                continue;
            }
            if timestamp != start {
                warn!("Parameter blocks at {timestamp} are moved to the unit starting at {start}");
            }
            blocks.extend(queued);
        }

        blocks
    }

    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obu::parameter_block::{MixGainAnimation, ParameterData};
    use crate::process::fixtures::minimal_descriptors;

    fn step(definition: &crate::obu::param_definitions::ParamDefinition, db: i16) -> ParameterBlockObu {
        ParameterBlockObu::new(
            definition,
            vec![ParameterData::MixGain(MixGainAnimation::Step { start_point_value: db })],
        )
    }

    #[test]
    fn blocks_follow_their_definitions() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let definitions = descriptors.param_definitions()?;
        let mut timing = GlobalTimingModule::new(&descriptors)?;
        let mut generator = ParameterBlockGenerator::new(definitions.clone());

        let output_gain = &definitions[&101];
        generator.add(step(output_gain, -256), 0, 16000, &mut timing)?;
        generator.add(step(output_gain, 0), 8, 16000, &mut timing)?;
        // Overlaps the previous block.
        assert!(generator.add(step(output_gain, 0), 8, 16000, &mut timing).is_err());

        let mut unknown = output_gain.clone();
        unknown.parameter_id = 7;
        assert!(generator.add(step(&unknown, 0), 16, 16000, &mut timing).is_err());

        let mut different = output_gain.clone();
        different.duration = 16;
        different.constant_subblock_duration = 16;
        assert!(generator.add(step(&different, 0), 16, 16000, &mut timing).is_err());

        assert_eq!(generator.take_for(0, 8).len(), 1);
        assert!(generator.has_pending());
        assert_eq!(generator.take_for(8, 16).len(), 1);
        assert!(!generator.has_pending());

        Ok(())
    }

    #[test]
    fn stale_blocks_are_dropped() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let definitions = descriptors.param_definitions()?;
        let mut timing = GlobalTimingModule::new(&descriptors)?;
        let mut generator = ParameterBlockGenerator::new(definitions.clone());

        generator.add(step(&definitions[&100], 0), 0, 16000, &mut timing)?;
        assert!(generator.take_for(8, 16).is_empty());
        assert!(!generator.has_pending());

        Ok(())
    }
}
