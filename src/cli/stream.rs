use std::path::Path;

use anyhow::Result;
use indicatif::ProgressBar;
use log::debug;

use iamf::process::obu_processor::{ObuProcessor, ProcessorSettings};
use iamf::process::temporal_unit::TemporalUnit;
use iamf::utils::bit_buffer::ReadBitBuffer;
use iamf::utils::errors::is_resource_exhausted;

use crate::input::{CHUNK_SIZE, InputReader};

/// Reads an IA sequence from a file or pipe, refilling the bit buffer on demand.
pub struct ObuStream {
    input: InputReader,
    rb: ReadBitBuffer,
    chunk: Vec<u8>,
    eof: bool,
    fail_level: log::Level,
    pb: Option<ProgressBar>,
}

impl ObuStream {
    pub fn open(path: &Path, fail_level: log::Level) -> Result<Self> {
        Ok(Self {
            input: InputReader::new(path)?,
            rb: ReadBitBuffer::new(),
            chunk: vec![0u8; CHUNK_SIZE],
            eof: false,
            fail_level,
            pb: None,
        })
    }

    pub fn input(&self) -> &InputReader {
        &self.input
    }

    pub fn attach_progress(&mut self, pb: ProgressBar) {
        self.pb = Some(pb);
    }

    pub fn progress(&self) -> Option<&ProgressBar> {
        self.pb.as_ref()
    }

    fn fill(&mut self) -> Result<()> {
        self.rb.flush_consumed()?;
        let n = self.input.read_chunk(&mut self.chunk)?;
        if n == 0 {
            debug!("End of input after {} bytes", self.input.bytes_read());
            self.eof = true;
        } else {
            self.rb.push_bytes(&self.chunk[..n]);
        }

        if let Some(pb) = &self.pb {
            pb.set_position(self.input.bytes_read());
        }

        Ok(())
    }

    /// Reads until every descriptor OBU is available.
    pub fn read_descriptors(&mut self) -> Result<ObuProcessor> {
        loop {
            let settings = ProcessorSettings {
                is_exhaustive: self.eof,
                fail_level: self.fail_level,
            };
            match ObuProcessor::create(settings, &mut self.rb) {
                Ok(processor) => return Ok(processor),
                Err(e) if !self.eof && is_resource_exhausted(&e) => self.fill()?,
                Err(e) => return Err(e),
            }
        }
    }

    /// The next temporal unit, or `None` at the end of the sequence.
    pub fn next_temporal_unit(&mut self, processor: &mut ObuProcessor) -> Result<Option<TemporalUnit>> {
        loop {
            if let Some(unit) = processor.process_temporal_unit(&mut self.rb, self.eof)? {
                return Ok(Some(unit));
            }
            if self.eof || processor.is_end_of_sequence() {
                return Ok(None);
            }
            self.fill()?;
        }
    }
}
