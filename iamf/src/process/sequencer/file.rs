use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};

use crate::process::descriptors::DescriptorStatistics;
use crate::process::sequencer::{ObuSequencer, SequencerCore, SequencerSettings};
use crate::utils::errors::SequencerError;

/// Writes a standalone `.iamf` file.
///
/// The file is created when the descriptors arrive. Finalized descriptors are
/// written over the initial ones, which requires their size to be unchanged.
/// Aborting removes the file.
#[derive(Debug)]
pub struct FileSequencer {
    core: SequencerCore,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    descriptor_size: usize,
    bytes_written: u64,
}

impl FileSequencer {
    pub fn new(path: impl AsRef<Path>, settings: SequencerSettings) -> Self {
        Self {
            core: SequencerCore::new(settings),
            path: path.as_ref().to_path_buf(),
            writer: None,
            descriptor_size: 0,
            bytes_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .with_context(|| format!("{} is not open", self.path.display()))
    }
}

impl ObuSequencer for FileSequencer {
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
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(descriptors)?;

        debug!(
            "{}: {} descriptor bytes, {} channels, first untrimmed sample at {:?}",
            self.path.display(),
            descriptors.len(),
            statistics.num_channels,
            statistics.first_untrimmed_timestamp
        );

        self.writer = Some(writer);
        self.descriptor_size = descriptors.len();
        self.bytes_written = descriptors.len() as u64;

        Ok(())
    }

    fn push_serialized_temporal_unit(&mut self, _timestamp: i64, _num_samples: u32, bytes: &[u8]) -> Result<()> {
        self.writer()?.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn push_finalized_descriptor_obus(&mut self, descriptors: &[u8]) -> Result<()> {
        if descriptors.len() != self.descriptor_size {
            bail!(SequencerError::DescriptorSizeChanged {
                expected: self.descriptor_size,
                actual: descriptors.len(),
            });
        }

        let writer = self.writer()?;
        let end = writer.stream_position()?;
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(descriptors)?;
        writer.seek(SeekFrom::Start(end))?;

        Ok(())
    }

    fn close_derived(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("Wrote {} bytes to {}", self.bytes_written, self.path.display());
        }

        Ok(())
    }

    fn abort_derived(&mut self) {
        // Close the handle before removing the file.
        self.writer = None;
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove {}: {e}", self.path.display());
            }
        }
    }
}
