use anyhow::Result;
use log::debug;

use crate::process::descriptors::DescriptorStatistics;
use crate::process::sequencer::{ObuSequencer, SequencerCore, SequencerSettings};

/// Keeps the latest serialized descriptors and temporal unit in memory.
///
/// After `close` the descriptors stay readable; `abort` clears them.
#[derive(Debug)]
pub struct StreamingSequencer {
    core: SequencerCore,
    descriptor_obus: Vec<u8>,
    descriptors_finalized: bool,
    previous_temporal_unit: Vec<u8>,
    previous_timestamp: Option<i64>,
}

impl StreamingSequencer {
    pub fn new(settings: SequencerSettings) -> Self {
        Self {
            core: SequencerCore::new(settings),
            descriptor_obus: Vec::new(),
            descriptors_finalized: false,
            previous_temporal_unit: Vec::new(),
            previous_timestamp: None,
        }
    }

    pub fn descriptor_obus(&self) -> &[u8] {
        &self.descriptor_obus
    }

    pub fn descriptors_finalized(&self) -> bool {
        self.descriptors_finalized
    }

    /// Bytes of the most recent temporal unit.
    pub fn previous_serialized_temporal_unit(&self) -> &[u8] {
        &self.previous_temporal_unit
    }

    pub fn previous_timestamp(&self) -> Option<i64> {
        self.previous_timestamp
    }

    /// Drops the bytes of the most recent temporal unit.
    pub fn clear_previous_temporal_unit(&mut self) {
        self.previous_temporal_unit.clear();
    }
}

impl ObuSequencer for StreamingSequencer {
    fn core(&self) -> &SequencerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SequencerCore {
        &mut self.core
    }

    fn push_serialized_descriptor_obus(
        &mut self,
        statistics: &DescriptorStatistics,
        descriptors: &[u8],
    ) -> Result<()> {
        debug!(
            "Streaming descriptors: {} bytes, {} Hz, {} samples per frame",
            descriptors.len(),
            statistics.common_sample_rate,
            statistics.common_samples_per_frame
        );
        self.descriptor_obus = descriptors.to_vec();
        Ok(())
    }

    fn push_serialized_temporal_unit(&mut self, timestamp: i64, _num_samples: u32, bytes: &[u8]) -> Result<()> {
        self.previous_temporal_unit.clear();
        self.previous_temporal_unit.extend_from_slice(bytes);
        self.previous_timestamp = Some(timestamp);
        Ok(())
    }

    fn push_finalized_descriptor_obus(&mut self, descriptors: &[u8]) -> Result<()> {
        self.descriptor_obus = descriptors.to_vec();
        self.descriptors_finalized = true;
        Ok(())
    }

    fn close_derived(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort_derived(&mut self) {
        self.descriptor_obus.clear();
        self.previous_temporal_unit.clear();
        self.descriptors_finalized = false;
    }
}
