//! OBU sequencers.
//!
//! A sequencer receives the descriptors once, then temporal units in order, and
//! finally the descriptors again with measured loudness. Serialization and the
//! state machine are shared; concrete sequencers only decide where the bytes go:
//! [`StreamingSequencer`] keeps them in memory, [`FileSequencer`] writes a
//! standalone `.iamf` file.
//!
//! ```text
//! Initialized -> PushDescriptorObusCalled -> PushSerializedDescriptorsCalled -> Closed
//! ```
//!
//! `abort` is valid in every state and also moves to `Closed`.

mod file;
mod streaming;

pub use file::FileSequencer;
pub use streaming::StreamingSequencer;

use anyhow::{Result, bail};
use log::{debug, info};

use crate::process::descriptors::{DescriptorObus, DescriptorStatistics};
use crate::process::temporal_unit::TemporalUnit;
use crate::utils::bit_buffer::WriteBitBuffer;
use crate::utils::errors::SequencerError;
use crate::utils::leb128::LebGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Initialized,
    PushDescriptorObusCalled,
    PushSerializedDescriptorsCalled,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequencerSettings {
    pub leb_generator: LebGenerator,
    pub include_temporal_delimiters: bool,
    /// Hold the descriptors back until a temporal unit with untrimmed samples
    /// arrives, so that the first untrimmed timestamp is known when they are
    /// pushed.
    pub delay_descriptors_until_first_untrimmed_sample: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SerializedTemporalUnit {
    timestamp: i64,
    num_samples: u32,
    bytes: Vec<u8>,
}

/// State shared by every sequencer.
#[derive(Debug)]
pub struct SequencerCore {
    settings: SequencerSettings,
    state: SequencerState,
    statistics: Option<DescriptorStatistics>,
    delayed_descriptors: Option<Vec<u8>>,
    delayed_temporal_units: Vec<SerializedTemporalUnit>,
    num_temporal_units: u64,
    num_samples: u64,
}

impl SequencerCore {
    pub fn new(settings: SequencerSettings) -> Self {
        Self {
            settings,
            state: SequencerState::Initialized,
            statistics: None,
            delayed_descriptors: None,
            delayed_temporal_units: Vec::new(),
            num_temporal_units: 0,
            num_samples: 0,
        }
    }

    pub fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SequencerState]) -> Result<()> {
        if !allowed.contains(&self.state) {
            bail!(SequencerError::InvalidState {
                operation,
                state: self.state,
            });
        }

        Ok(())
    }
}

/// Sink for a serialized IA sequence.
///
/// Implementors provide the `push_serialized_*` hooks plus `close_derived` and
/// `abort_derived`; the provided methods enforce ordering and serialize OBUs.
pub trait ObuSequencer {
    fn core(&self) -> &SequencerCore;

    fn core_mut(&mut self) -> &mut SequencerCore;

    /// Receives the initial descriptors. Called exactly once.
    fn push_serialized_descriptor_obus(
        &mut self,
        statistics: &DescriptorStatistics,
        descriptors: &[u8],
    ) -> Result<()>;

    fn push_serialized_temporal_unit(&mut self, timestamp: i64, num_samples: u32, bytes: &[u8]) -> Result<()>;

    /// Receives the descriptors again once loudness has been measured.
    fn push_finalized_descriptor_obus(&mut self, descriptors: &[u8]) -> Result<()>;

    fn close_derived(&mut self) -> Result<()>;

    /// Discards side outputs.
    fn abort_derived(&mut self);

    fn state(&self) -> SequencerState {
        self.core().state()
    }

    fn push_descriptors(&mut self, descriptors: &DescriptorObus) -> Result<()> {
        self.core()
            .expect_state("push_descriptors", &[SequencerState::Initialized])?;

        descriptors.validate()?;
        let statistics = descriptors.statistics()?;
        let bytes = descriptors.serialize(self.core().settings().leb_generator)?;

        let core = self.core_mut();
        core.state = SequencerState::PushDescriptorObusCalled;
        core.statistics = Some(statistics);

        if core.settings.delay_descriptors_until_first_untrimmed_sample {
            debug!("Delaying {} descriptor bytes", bytes.len());
            core.delayed_descriptors = Some(bytes);
            return Ok(());
        }

        self.push_serialized_descriptor_obus(&statistics, &bytes)?;
        self.core_mut().state = SequencerState::PushSerializedDescriptorsCalled;

        Ok(())
    }

    /// Serializes and forwards one temporal unit.
    fn push_temporal_unit(&mut self, temporal_unit: &TemporalUnit) -> Result<()> {
        self.core().expect_state(
            "push_temporal_unit",
            &[
                SequencerState::PushDescriptorObusCalled,
                SequencerState::PushSerializedDescriptorsCalled,
            ],
        )?;

        let settings = *self.core().settings();
        let mut wb = WriteBitBuffer::new(settings.leb_generator);
        temporal_unit.write(settings.include_temporal_delimiters, &mut wb)?;
        let serialized = SerializedTemporalUnit {
            timestamp: temporal_unit.start_timestamp,
            num_samples: temporal_unit.num_untrimmed_samples(),
            bytes: wb.take_bytes()?,
        };

        let core = self.core_mut();
        core.num_temporal_units += 1;
        core.num_samples += serialized.num_samples as u64;

        if core.delayed_descriptors.is_some() {
            match temporal_unit.first_untrimmed_timestamp() {
                None => {
                    core.delayed_temporal_units.push(serialized);
                    return Ok(());
                }
                Some(timestamp) => {
                    if let Some(statistics) = core.statistics.as_mut() {
                        statistics.first_untrimmed_timestamp = Some(timestamp);
                    }
                    flush_delayed(self)?;
                }
            }
        }

        self.push_serialized_temporal_unit(serialized.timestamp, serialized.num_samples, &serialized.bytes)
    }

    /// Pushes the final descriptors, then closes.
    fn update_descriptors_and_close(&mut self, descriptors: &DescriptorObus) -> Result<()> {
        self.core().expect_state(
            "update_descriptors_and_close",
            &[
                SequencerState::PushDescriptorObusCalled,
                SequencerState::PushSerializedDescriptorsCalled,
            ],
        )?;
        flush_delayed(self)?;

        let bytes = descriptors.serialize(self.core().settings().leb_generator)?;
        self.push_finalized_descriptor_obus(&bytes)?;

        self.close()
    }

    fn close(&mut self) -> Result<()> {
        match self.state() {
            SequencerState::Closed => return Ok(()),
            SequencerState::Initialized => bail!(SequencerError::InvalidState {
                operation: "close",
                state: SequencerState::Initialized,
            }),
            _ => {}
        }
        flush_delayed(self)?;

        self.close_derived()?;
        let core = self.core_mut();
        core.state = SequencerState::Closed;
        info!(
            "Sequencer closed after {} temporal units, {} samples",
            core.num_temporal_units, core.num_samples
        );

        Ok(())
    }

    /// Discards partial output. A sequencer that already closed keeps what it
    /// wrote.
    fn abort(&mut self) {
        if self.state() == SequencerState::Closed {
            debug!("Abort after close leaves the output in place");
            return;
        }

        self.abort_derived();
        let core = self.core_mut();
        core.state = SequencerState::Closed;
        core.delayed_descriptors = None;
        core.delayed_temporal_units.clear();
    }
}

/// Emits held back descriptors and temporal units, if any.
fn flush_delayed<S: ObuSequencer + ?Sized>(sequencer: &mut S) -> Result<()> {
    let Some(descriptors) = sequencer.core_mut().delayed_descriptors.take() else {
        return Ok(());
    };

    let statistics = sequencer
        .core()
        .statistics
        .ok_or(SequencerError::InvalidState {
            operation: "flush_delayed",
            state: sequencer.core().state,
        })?;
    sequencer.push_serialized_descriptor_obus(&statistics, &descriptors)?;
    sequencer.core_mut().state = SequencerState::PushSerializedDescriptorsCalled;

    let units = std::mem::take(&mut sequencer.core_mut().delayed_temporal_units);
    for unit in units {
        sequencer.push_serialized_temporal_unit(unit.timestamp, unit.num_samples, &unit.bytes)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fixtures::{minimal_descriptors, silent_unit};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("iamf-sequencer-{}-{name}.iamf", std::process::id()))
    }

    #[test]
    fn streaming_state_machine() -> anyhow::Result<()> {
        let descriptors = minimal_descriptors();
        let mut sequencer = StreamingSequencer::new(SequencerSettings::default());
        assert_eq!(sequencer.state(), SequencerState::Initialized);
        assert!(sequencer.push_temporal_unit(&silent_unit(0, 0)).is_err());
        assert!(sequencer.close().is_err());

        sequencer.push_descriptors(&descriptors)?;
        assert_eq!(sequencer.state(), SequencerState::PushSerializedDescriptorsCalled);
        assert_eq!(
            sequencer.descriptor_obus(),
            descriptors.serialize(LebGenerator::default())?.as_slice()
        );
        assert!(sequencer.push_descriptors(&descriptors).is_err());

        sequencer.push_temporal_unit(&silent_unit(0, 0))?;
        // Implicit substream 0 header, size 32, then the samples.
        let unit = sequencer.previous_serialized_temporal_unit();
        assert_eq!(unit.len(), 34);
        assert_eq!(&unit[..2], &[6 << 3, 32]);
        assert_eq!(sequencer.previous_timestamp(), Some(0));

        sequencer.update_descriptors_and_close(&descriptors)?;
        assert_eq!(sequencer.state(), SequencerState::Closed);
        assert!(sequencer.descriptors_finalized());
        assert!(!sequencer.descriptor_obus().is_empty());
        assert!(sequencer.push_temporal_unit(&silent_unit(8, 0)).is_err());

        // Aborting a finished sequence keeps its output.
        sequencer.abort();
        assert!(!sequencer.descriptor_obus().is_empty());

        let mut sequencer = StreamingSequencer::new(SequencerSettings::default());
        sequencer.push_descriptors(&descriptors)?;
        sequencer.abort();
        assert!(sequencer.descriptor_obus().is_empty());
        assert_eq!(sequencer.state(), SequencerState::Closed);

        Ok(())
    }

    #[test]
    fn temporal_delimiters_are_optional() -> anyhow::Result<()> {
        let settings = SequencerSettings {
            include_temporal_delimiters: true,
            ..Default::default()
        };
        let mut sequencer = StreamingSequencer::new(settings);
        sequencer.push_descriptors(&minimal_descriptors())?;
        sequencer.push_temporal_unit(&silent_unit(0, 0))?;
        assert_eq!(&sequencer.previous_serialized_temporal_unit()[..4], &[4 << 3, 0, 6 << 3, 32]);

        Ok(())
    }

    #[test]
    fn descriptors_wait_for_untrimmed_samples() -> anyhow::Result<()> {
        let settings = SequencerSettings {
            delay_descriptors_until_first_untrimmed_sample: true,
            ..Default::default()
        };
        let mut sequencer = StreamingSequencer::new(settings);

        sequencer.push_descriptors(&minimal_descriptors())?;
        assert_eq!(sequencer.state(), SequencerState::PushDescriptorObusCalled);
        assert!(sequencer.descriptor_obus().is_empty());

        sequencer.push_temporal_unit(&silent_unit(0, 8))?;
        assert!(sequencer.descriptor_obus().is_empty());
        assert_eq!(sequencer.previous_timestamp(), None);

        sequencer.push_temporal_unit(&silent_unit(8, 3))?;
        assert_eq!(sequencer.state(), SequencerState::PushSerializedDescriptorsCalled);
        assert!(!sequencer.descriptor_obus().is_empty());
        assert_eq!(sequencer.previous_timestamp(), Some(8));

        sequencer.close()?;
        Ok(())
    }

    #[test]
    fn closing_flushes_delayed_descriptors() -> anyhow::Result<()> {
        let settings = SequencerSettings {
            delay_descriptors_until_first_untrimmed_sample: true,
            ..Default::default()
        };
        let mut sequencer = StreamingSequencer::new(settings);
        sequencer.push_descriptors(&minimal_descriptors())?;
        sequencer.push_temporal_unit(&silent_unit(0, 8))?;
        sequencer.close()?;

        assert!(!sequencer.descriptor_obus().is_empty());
        assert_eq!(sequencer.previous_timestamp(), Some(0));

        Ok(())
    }

    #[test]
    fn file_is_back_patched() -> anyhow::Result<()> {
        let path = temp_path("patch");
        let descriptors = minimal_descriptors();
        let serialized = descriptors.serialize(LebGenerator::default())?;

        let mut sequencer = FileSequencer::new(&path, SequencerSettings::default());
        sequencer.push_descriptors(&descriptors)?;
        sequencer.push_temporal_unit(&silent_unit(0, 0))?;
        sequencer.update_descriptors_and_close(&descriptors)?;

        let written = std::fs::read(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(written.len(), serialized.len() + 34);
        assert_eq!(&written[..serialized.len()], serialized.as_slice());

        Ok(())
    }

    #[test]
    fn resized_descriptors_are_rejected() -> anyhow::Result<()> {
        let path = temp_path("resize");
        let descriptors = minimal_descriptors();
        let mut sequencer = FileSequencer::new(&path, SequencerSettings::default());
        sequencer.push_descriptors(&descriptors)?;

        let mut measured = descriptors.clone();
        measured.mix_presentations[0].sub_mixes[0].layouts[0].loudness.integrated_loudness = -2000;
        assert!(sequencer.update_descriptors_and_close(&measured).is_ok());

        let mut tagged = descriptors;
        tagged.mix_presentations[0].footer = vec![0; 4];
        let mut sequencer = FileSequencer::new(&path, SequencerSettings::default());
        sequencer.push_descriptors(&minimal_descriptors())?;
        assert!(sequencer.update_descriptors_and_close(&tagged).is_err());

        sequencer.abort();
        assert!(!path.exists());

        Ok(())
    }

    #[test]
    fn abort_removes_the_file() -> anyhow::Result<()> {
        let path = temp_path("abort");
        let mut sequencer = FileSequencer::new(&path, SequencerSettings::default());
        sequencer.push_descriptors(&minimal_descriptors())?;
        sequencer.push_temporal_unit(&silent_unit(0, 0))?;
        assert!(path.exists());

        sequencer.abort();
        assert!(!path.exists());
        assert_eq!(sequencer.state(), SequencerState::Closed);

        Ok(())
    }

    #[test]
    fn abort_after_close_keeps_the_file() -> anyhow::Result<()> {
        let path = temp_path("closed");
        let descriptors = minimal_descriptors();
        let mut sequencer = FileSequencer::new(&path, SequencerSettings::default());
        sequencer.push_descriptors(&descriptors)?;
        sequencer.push_temporal_unit(&silent_unit(0, 0))?;
        sequencer.update_descriptors_and_close(&descriptors)?;

        sequencer.abort();
        let kept = path.exists();
        std::fs::remove_file(&path)?;
        assert!(kept);

        Ok(())
    }
}
