use anyhow::Result;
use indicatif::MultiProgress;

use iamf::process::sequencer::{FileSequencer, ObuSequencer, SequencerSettings};
use iamf::utils::leb128::LebGenerator;

use super::command::{Cli, RemuxArgs};
use super::progress::create_progress_bar;
use super::stream::ObuStream;

pub fn cmd_remux(args: &RemuxArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let leb_generator = match args.leb_size {
        Some(size) => LebGenerator::fixed(size)?,
        None => LebGenerator::Minimum,
    };
    let settings = SequencerSettings {
        leb_generator,
        include_temporal_delimiters: args.temporal_delimiters,
        ..Default::default()
    };

    let mut stream = ObuStream::open(&args.input, cli.fail_level())?;
    if let Some(multi) = multi {
        stream.attach_progress(create_progress_bar(multi, stream.input().total_bytes())?);
    }

    log::info!("Remuxing {} to {}", args.input.display(), args.output_path.display());
    let mut sequencer = FileSequencer::new(&args.output_path, settings);
    if let Err(e) = remux(&mut stream, &mut sequencer) {
        sequencer.abort();
        if let Some(pb) = stream.progress() {
            pb.finish_with_message("remux failed");
        }
        return Err(e);
    }

    if let Some(pb) = stream.progress() {
        pb.finish_with_message("done");
    }

    Ok(())
}

fn remux(stream: &mut ObuStream, sequencer: &mut FileSequencer) -> Result<()> {
    let mut processor = stream.read_descriptors()?;
    sequencer.push_descriptors(processor.descriptors())?;
    if let Some(pb) = stream.progress() {
        pb.set_message("remuxing");
    }

    while let Some(unit) = stream.next_temporal_unit(&mut processor)? {
        sequencer.push_temporal_unit(&unit)?;
    }
    if processor.is_end_of_sequence() {
        log::warn!("The input holds more than one IA sequence; only the first one is remuxed");
    }

    sequencer.update_descriptors_and_close(processor.descriptors())
}
