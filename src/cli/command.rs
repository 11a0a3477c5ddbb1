use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use iamf::obu::mix_presentation::{Layout, SoundSystem};

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        "\ngit ", env!("VERGEN_GIT_DESCRIBE"),
        "\niamf ", env!("IAMF_VERSION"),
        "\nbuilt ", env!("BUILD_TIMESTAMP"),
    ),
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for inspecting, decoding and remuxing IAMF bitstreams",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level at which recoverable stream problems become errors.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decode the specified IAMF stream into a WAV file.
    Decode(DecodeArgs),

    /// Print stream information
    Info(InfoArgs),

    /// Re-sequence an IAMF stream into a standalone file.
    Remux(RemuxArgs),
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Input IAMF bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output WAV file.
    #[arg(long, value_name = "PATH")]
    pub output_path: PathBuf,

    /// Mix presentation to render. Defaults to the first one in the stream.
    #[arg(long, value_name = "ID")]
    pub mix_presentation_id: Option<u32>,

    /// Playback layout. Defaults to the first layout of the mix presentation.
    #[arg(long, value_enum)]
    pub layout: Option<OutputLayout>,

    /// Output bit depth.
    #[arg(long, value_parser = parse_bit_depth, default_value_t = 16)]
    pub bit_depth: u8,
}

fn parse_bit_depth(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(bit_depth @ (16 | 24 | 32)) => Ok(bit_depth),
        _ => Err(format!("expected 16, 24 or 32, got {value}")),
    }
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input IAMF bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Report format.
    #[arg(long, value_enum, default_value_t = InfoFormat::Text)]
    pub format: InfoFormat,
}

#[derive(Debug, Args)]
pub struct RemuxArgs {
    /// Input IAMF bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output .iamf file.
    #[arg(long, value_name = "PATH")]
    pub output_path: PathBuf,

    /// Write a temporal delimiter before every temporal unit.
    #[arg(long)]
    pub temporal_delimiters: bool,

    /// Write every LEB128 field with exactly this many bytes (1-8).
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub leb_size: Option<u8>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum InfoFormat {
    /// Human-readable report.
    Text,
    /// YAML document.
    Yaml,
}

/// Loudspeaker layouts and binaural output, named after their channel counts.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputLayout {
    #[value(name = "stereo")]
    Stereo,
    #[value(name = "5.1")]
    Surround5_1,
    #[value(name = "5.1.2")]
    Surround5_1_2,
    #[value(name = "5.1.4")]
    Surround5_1_4,
    #[value(name = "7.1")]
    Surround7_1,
    #[value(name = "7.1.2")]
    Surround7_1_2,
    #[value(name = "7.1.4")]
    Surround7_1_4,
    #[value(name = "3.1.2")]
    Surround3_1_2,
    #[value(name = "9.1.6")]
    Surround9_1_6,
    #[value(name = "mono")]
    Mono,
    #[value(name = "binaural")]
    Binaural,
}

impl OutputLayout {
    pub fn to_layout(self) -> Layout {
        match self {
            OutputLayout::Stereo => Layout::stereo(),
            OutputLayout::Surround5_1 => Layout::ss(SoundSystem::B0_5_0),
            OutputLayout::Surround5_1_2 => Layout::ss(SoundSystem::C2_5_0),
            OutputLayout::Surround5_1_4 => Layout::ss(SoundSystem::D4_5_0),
            OutputLayout::Surround7_1 => Layout::ss(SoundSystem::I0_7_0),
            OutputLayout::Surround7_1_2 => Layout::ss(SoundSystem::S10_2_7_0),
            OutputLayout::Surround7_1_4 => Layout::ss(SoundSystem::J4_7_0),
            OutputLayout::Surround3_1_2 => Layout::ss(SoundSystem::S11_2_3_0),
            OutputLayout::Surround9_1_6 => Layout::ss(SoundSystem::S13_6_9_0),
            OutputLayout::Mono => Layout::ss(SoundSystem::S12_0_1_0),
            OutputLayout::Binaural => Layout::binaural(),
        }
    }

    pub fn from_layout(layout: &Layout) -> Option<Self> {
        Self::value_variants()
            .iter()
            .copied()
            .find(|candidate| candidate.to_layout() == *layout)
    }
}

/// Short layout name such as `5.1.4`, or the raw layout when it has none.
pub fn layout_name(layout: &Layout) -> String {
    OutputLayout::from_layout(layout)
        .and_then(|known| known.to_possible_value())
        .map(|value| value.get_name().to_string())
        .unwrap_or_else(|| format!("{layout:?}"))
}
