use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

/// Size of each read from the input.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Unified input reader that handles both file and pipe input with buffered reading
pub struct InputReader {
    reader: Box<dyn Read>,
    total_bytes: Option<u64>,
    bytes_read: u64,
}

impl InputReader {
    /// Create a new InputReader from a path
    /// Use "-" for stdin pipe input
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();
        let is_pipe = path.to_string_lossy() == "-";

        let (reader, total_bytes): (Box<dyn Read>, _) = if is_pipe {
            (Box::new(io::stdin().lock()), None)
        } else {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            let total_bytes = file.metadata().ok().map(|metadata| metadata.len());
            (Box::new(BufReader::new(file)), total_bytes)
        };

        Ok(Self {
            reader,
            total_bytes,
            bytes_read: 0,
        })
    }

    /// Read a chunk of data into the provided buffer
    /// Returns the number of bytes read, 0 indicates EOF
    pub fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let bytes_read = loop {
            match self.reader.read(buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        self.bytes_read += bytes_read as u64;
        Ok(bytes_read)
    }

    /// File size, unknown for pipes
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
