use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use indicatif::{MultiProgress, ProgressBar};

use iamf::obu::mix_presentation::Layout;
use iamf::process::decoder::{DecoderSettings, IamfDecoder};
use iamf::process::obu_processor::RenderingFactories;

use super::command::{Cli, DecodeArgs, OutputLayout, layout_name};
use super::progress::create_progress_bar;
use crate::input::{CHUNK_SIZE, InputReader};
use crate::timestamp::time_str;
use crate::wav::WAVWriter;

/// Chunks in flight between the reader thread and the decoder.
const CHANNEL_DEPTH: usize = 16;

fn create_path_with_extension(base_path: &Path, expected_ext: &str) -> PathBuf {
    match base_path.extension() {
        Some(existing_ext) if existing_ext == expected_ext => base_path.to_path_buf(),
        Some(_) => {
            let mut name = base_path.as_os_str().to_os_string();
            name.push(".");
            name.push(expected_ext);
            PathBuf::from(name)
        }
        None => base_path.with_extension(expected_ext),
    }
}

/// WAVE_FORMAT_EXTENSIBLE speaker mask for layouts whose channel order
/// matches the WAV order; zero leaves the assignment unspecified.
fn channel_mask(layout: &Layout) -> u32 {
    const FRONT: u32 = 0x3;
    const CENTER_LFE: u32 = 0x4 | 0x8;
    const SIDE: u32 = 0x200 | 0x400;
    const TOP_FRONT: u32 = 0x1000 | 0x4000;
    const TOP_BACK: u32 = 0x8000 | 0x20000;

    match OutputLayout::from_layout(layout) {
        Some(OutputLayout::Mono) => 0x4,
        Some(OutputLayout::Stereo) => FRONT,
        Some(OutputLayout::Surround5_1) => FRONT | CENTER_LFE | SIDE,
        Some(OutputLayout::Surround5_1_2) => FRONT | CENTER_LFE | SIDE | TOP_FRONT,
        Some(OutputLayout::Surround5_1_4) => FRONT | CENTER_LFE | SIDE | TOP_FRONT | TOP_BACK,
        Some(OutputLayout::Surround3_1_2) => FRONT | CENTER_LFE | TOP_FRONT,
        _ => 0,
    }
}

fn spawn_reader_thread(input_path: PathBuf, tx: SyncSender<Result<Vec<u8>>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut input_reader = match InputReader::new(&input_path) {
            Ok(reader) => reader,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            match input_reader.read_chunk(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    // The receiver hung up after an error.
                    if tx.send(Ok(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
        log::debug!("Reader finished after {} bytes", input_reader.bytes_read());
    })
}

struct WavOutput {
    path: PathBuf,
    writer: Option<WAVWriter<File>>,
}

impl WavOutput {
    /// Opens the file once the decoder knows the output format.
    fn writer(&mut self, decoder: &IamfDecoder) -> Result<&mut WAVWriter<File>> {
        if self.writer.is_none() {
            let selected = decoder.selected_layout()?;
            let channels = decoder.num_output_channels()?;
            let sample_rate = decoder.sample_rate()?;
            log::info!(
                "Mix presentation {} to {}: {channels} channels, {sample_rate} Hz, {} bit",
                selected.mix_presentation_id,
                layout_name(&selected.layout),
                decoder.bit_depth()
            );

            let file = File::create(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
            let mut writer = WAVWriter::new(
                file,
                sample_rate,
                u16::try_from(channels)?,
                decoder.bit_depth() as u16,
                channel_mask(&selected.layout),
            );
            writer.write_header()?;
            log::info!("Writing {}", self.path.display());
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| anyhow!("{} is not open", self.path.display()))
    }

    fn write_available(&mut self, decoder: &mut IamfDecoder) -> Result<()> {
        if !decoder.is_descriptor_processing_complete() {
            return Ok(());
        }

        let writer = self.writer(decoder)?;
        while decoder.is_temporal_unit_available() {
            let pcm = decoder.get_output_temporal_unit()?;
            writer.write_interleaved(&pcm)?;
        }

        Ok(())
    }
}

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let settings = DecoderSettings {
        mix_presentation_id: args.mix_presentation_id,
        layout: args.layout.map(OutputLayout::to_layout),
        bit_depth: args.bit_depth,
        fail_level: cli.fail_level(),
    };
    let mut decoder = IamfDecoder::create(settings, RenderingFactories::default())?;

    let is_pipe = args.input.to_string_lossy() == "-";
    let total_bytes = if is_pipe {
        None
    } else {
        std::fs::metadata(&args.input).ok().map(|metadata| metadata.len())
    };
    let pb = multi
        .map(|multi| create_progress_bar(multi, total_bytes))
        .transpose()?;

    let mut output = WavOutput {
        path: create_path_with_extension(&args.output_path, "wav"),
        writer: None,
    };

    log::info!("Decoding {}", args.input.display());
    let start_time = Instant::now();
    let result = decode_stream(&args.input, &mut decoder, &mut output, pb.as_ref());

    if let Err(e) = result {
        if let Some(pb) = &pb {
            pb.finish_with_message("decode failed");
        }
        return Err(e);
    }

    let writer = output.writer(&decoder)?;
    writer.finish()?;
    let stats = writer.stats();

    let audio_duration_secs = stats.num_frames as f64 / stats.sample_rate.max(1) as f64;
    let realtime_multiplier = audio_duration_secs / start_time.elapsed().as_secs_f64().max(1e-9);
    let timestamp = time_str(stats.num_frames, stats.sample_rate);
    if let Some(pb) = &pb {
        pb.finish_with_message(format!(
            "speed: {realtime_multiplier:.1}x | timestamp: {timestamp}"
        ));
    }
    log::info!(
        "Decoded {} samples ({timestamp}) at {realtime_multiplier:.1}x",
        stats.num_frames
    );

    Ok(())
}

fn decode_stream(
    input_path: &Path,
    decoder: &mut IamfDecoder,
    output: &mut WavOutput,
    pb: Option<&ProgressBar>,
) -> Result<()> {
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    let reader_thread = spawn_reader_thread(input_path.to_path_buf(), tx);

    let mut bytes_read = 0u64;
    for chunk in &rx {
        let chunk = chunk?;
        bytes_read += chunk.len() as u64;

        decoder.decode(&chunk)?;
        output.write_available(decoder)?;

        if let Some(pb) = pb {
            pb.set_position(bytes_read);
            if decoder.is_descriptor_processing_complete() {
                pb.set_message("decoding");
            }
        }
    }

    reader_thread
        .join()
        .map_err(|_| anyhow!("Reader thread panicked"))?;

    output.write_available(decoder)?;
    loop {
        let (pcm, done) = decoder.flush()?;
        output.writer(decoder)?.write_interleaved(&pcm)?;
        if done {
            break;
        }
    }

    Ok(())
}
