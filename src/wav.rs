use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use iamfd_macros::{ToBytes, riff_chunk};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// KSDATAFORMAT_SUBTYPE_PCM
const PCM_SUBFORMAT_GUID: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// A RIFF chunk: four-byte id, 32-bit little-endian size, body and pad byte.
pub trait RiffChunk {
    fn chunk_id(&self) -> &[u8; 4];
    fn chunk_data(&self) -> Vec<u8>;

    fn write_all<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let data = self.chunk_data();
        writer.write_all(self.chunk_id())?;
        writer.write_all(&(data.len() as u32).to_le_bytes())?;
        writer.write_all(&data)?;
        if data.len() % 2 == 1 {
            writer.write_all(&[0])?;
        }

        Ok(())
    }
}

#[derive(Debug, ToBytes)]
#[riff_chunk(b"fmt ")]
pub struct PcmFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

/// WAVE_FORMAT_EXTENSIBLE, required for more than two channels or more
/// than 16 bits.
#[derive(Debug, ToBytes)]
#[riff_chunk(b"fmt ")]
pub struct ExtensibleFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extension_size: u16,
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: [u8; 16],
}

/// RIFF WAVE writer for interleaved little-endian PCM
pub struct WAVWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    riff_size_position: u64,
    data_size_position: u64,
    data_written: u64,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    channel_mask: u32,
}

impl<W: Write + Seek> WAVWriter<W> {
    pub fn new(writer: W, sample_rate: u32, channels: u16, bits_per_sample: u16, channel_mask: u32) -> Self {
        Self {
            writer: BufWriter::new(writer),
            riff_size_position: 0,
            data_size_position: 0,
            data_written: 0,
            sample_rate,
            channels,
            bits_per_sample,
            channel_mask,
        }
    }

    fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    /// Write the RIFF header, the format chunk and the data chunk header
    pub fn write_header(&mut self) -> io::Result<()> {
        if self.channels == 0 || !matches!(self.bits_per_sample, 16 | 24 | 32) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Unsupported format: {} channels, {} bits",
                    self.channels, self.bits_per_sample
                ),
            ));
        }

        self.writer.write_all(b"RIFF")?;
        self.riff_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?; // RIFF size (to be updated later)
        self.writer.write_all(b"WAVE")?;

        let block_align = self.block_align();
        let byte_rate = self.sample_rate * block_align as u32;
        if self.channels > 2 || self.bits_per_sample > 16 {
            ExtensibleFormat {
                format_tag: WAVE_FORMAT_EXTENSIBLE,
                channels: self.channels,
                sample_rate: self.sample_rate,
                byte_rate,
                block_align,
                bits_per_sample: self.bits_per_sample,
                extension_size: 22,
                valid_bits_per_sample: self.bits_per_sample,
                channel_mask: self.channel_mask,
                sub_format: PCM_SUBFORMAT_GUID,
            }
            .write_all(&mut self.writer)?;
        } else {
            PcmFormat {
                format_tag: WAVE_FORMAT_PCM,
                channels: self.channels,
                sample_rate: self.sample_rate,
                byte_rate,
                block_align,
                bits_per_sample: self.bits_per_sample,
            }
            .write_all(&mut self.writer)?;
        }

        self.writer.write_all(b"data")?;
        self.data_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?; // Data size (to be updated later)

        Ok(())
    }

    /// Write interleaved samples already packed at the configured bit depth
    pub fn write_interleaved(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.len() % self.block_align() as usize != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} bytes is not a whole number of {}-byte sample frames",
                    bytes.len(),
                    self.block_align()
                ),
            ));
        }

        self.writer.write_all(bytes)?;
        self.data_written += bytes.len() as u64;
        Ok(())
    }

    /// Finish writing and update the size fields. Files past 4 GiB keep
    /// saturated sizes.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.data_written % 2 == 1 {
            self.writer.write_all(&[0])?;
        }
        self.writer.flush()?;

        let current_pos = self.writer.stream_position()?;
        if current_pos > u32::MAX as u64 {
            log::warn!("WAV output exceeds 4 GiB; size fields are saturated");
        }
        let saturate = |size: u64| size.min(u32::MAX as u64) as u32;

        self.writer.seek(SeekFrom::Start(self.data_size_position))?;
        self.writer.write_all(&saturate(self.data_written).to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(self.riff_size_position))?;
        self.writer.write_all(&saturate(current_pos - 8).to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(current_pos))?;
        self.writer.flush()?;

        Ok(())
    }

    /// Get the underlying writer
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    /// Get statistics about written data
    pub fn stats(&self) -> WAVStats {
        WAVStats {
            data_written: self.data_written,
            num_frames: self.data_written / self.block_align().max(1) as u64,
            sample_rate: self.sample_rate,
        }
    }
}

/// Statistics about WAV file writing
#[derive(Debug, Clone)]
pub struct WAVStats {
    pub data_written: u64,
    pub num_frames: u64,
    pub sample_rate: u32,
}
