#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Coarse classification shared by every error in the crate.
///
/// Callers branch on the kind rather than on the concrete error type, e.g. the
/// streaming decoder treats [`ErrorKind::ResourceExhausted`] as "push more bytes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    ResourceExhausted,
    OutOfRange,
    NotFound,
    Internal,
    Unimplemented,
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

macro_rules! classify_chain {
    ($cause:expr, $($t:ty),+ $(,)?) => {
        $(
            if let Some(e) = $cause.downcast_ref::<$t>() {
                return e.kind();
            }
        )+
    };
}

/// Returns the kind of the first classified error in the chain.
///
/// Plain I/O errors map to [`ErrorKind::Internal`], except `UnexpectedEof`
/// which means the source ran dry.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        classify_chain!(
            cause,
            LebError,
            BitBufferError,
            ObuError,
            CodecConfigError,
            AudioElementError,
            ParamError,
            MixPresentationError,
            LayoutError,
            NumericError,
            SequencerError,
            ProcessorError,
            EncoderError,
            DecoderError,
        );

        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            return match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ErrorKind::ResourceExhausted,
                _ => ErrorKind::Internal,
            };
        }
    }

    ErrorKind::Internal
}

pub fn is_resource_exhausted(err: &anyhow::Error) -> bool {
    error_kind(err) == ErrorKind::ResourceExhausted
}

#[derive(thiserror::Error, Debug)]
pub enum LebError {
    #[error("Invalid fixed LEB128 size: {0} (expected 1..=8)")]
    InvalidFixedSize(u8),

    #[error("{value} requires {required} bytes but a fixed size of {fixed} was requested")]
    ValueTooLarge {
        value: i64,
        required: usize,
        fixed: usize,
    },

    #[error("LEB128 exceeds the maximum of 8 bytes")]
    TooManyBytes,

    #[error("Decoded LEB128 overflows 32 bits")]
    Overflow,

    #[error("Expanded size uses more than 5 bytes")]
    ExpandedSizeTooLong,
}

impl Classify for LebError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BitBufferError {
    #[error("Requested {requested} bits but only {available} are available")]
    NotEnoughData { requested: u64, available: u64 },

    #[error("Value {value:#X} does not fit in {bits} bits")]
    ValueTooWide { value: u64, bits: u32 },

    #[error("Cannot read or write more than 64 bits at once: {0}")]
    TooManyBits(u32),

    #[error("String exceeds {0} bytes including the terminator")]
    StringTooLong(usize),

    #[error("String contains an interior NUL byte")]
    StringInteriorNul,

    #[error("String is not terminated within {0} bytes")]
    StringMissingTerminator(usize),

    #[error("String is not valid UTF-8")]
    StringNotUtf8,

    #[error("Buffer is not byte aligned (bit offset {0})")]
    NotByteAligned(u64),

    #[error("Seek to bit {position} is outside of the buffer ({len} bits)")]
    SeekOutOfRange { position: u64, len: u64 },
}

impl Classify for BitBufferError {
    fn kind(&self) -> ErrorKind {
        match self {
            BitBufferError::NotEnoughData { .. } => ErrorKind::ResourceExhausted,
            BitBufferError::SeekOutOfRange { .. } => ErrorKind::OutOfRange,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ObuError {
    #[error("obu_redundant_copy is not permitted for {0:?}")]
    IllegalRedundantCopy(crate::obu::header::ObuType),

    #[error("obu_trimming_status_flag is not permitted for {0:?}")]
    IllegalTrimming(crate::obu::header::ObuType),

    #[error("OBU declares {declared} payload bytes but {consumed} were consumed")]
    PayloadSizeMismatch { declared: u64, consumed: u64 },

    #[error("OBU payload of {declared} bytes ends inside a field: {cause}")]
    PayloadOverrun { declared: u64, cause: String },

    #[error("OBU size {size} leaves no room for {header} header bytes")]
    HeaderExceedsSize { size: u64, header: u64 },

    #[error("OBU of {0} bytes exceeds the 2 MB limit")]
    ObuTooLarge(u64),

    #[error("Extension header declares {declared} bytes but carries {actual}")]
    ExtensionSizeMismatch { declared: u32, actual: usize },

    #[error("Invalid ia_code {0:#010X}, expected \"iamf\"")]
    InvalidIaCode(u32),

    #[error("Unknown primary profile {0}")]
    UnknownPrimaryProfile(u8),

    #[error("Audio frame substream id {id} does not match obu type {obu_type:?}")]
    SubstreamIdMismatch {
        id: u32,
        obu_type: crate::obu::header::ObuType,
    },

    #[error("Temporal delimiter carries {0} payload bytes")]
    NonEmptyTemporalDelimiter(u64),

    #[error("Unexpected {0:?} while reading descriptors")]
    UnexpectedObu(crate::obu::header::ObuType),
}

impl Classify for ObuError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CodecConfigError {
    #[error("Unknown codec id {0:#010X}")]
    UnknownCodecId(u32),

    #[error("num_samples_per_frame must be in 1..=96000, got {0}")]
    InvalidFrameSize(u32),

    #[error("audio_roll_distance must be {expected} for this codec, got {actual}")]
    InvalidRollDistance { expected: i16, actual: i16 },

    #[error("Unsupported LPCM sample size {0}")]
    InvalidLpcmSampleSize(u8),

    #[error("Unsupported LPCM sample rate {0}")]
    InvalidLpcmSampleRate(u32),

    #[error("Unknown LPCM sample format flags {0}")]
    InvalidLpcmFormatFlags(u8),

    #[error("Opus {field} must be {expected}, got {actual}")]
    InvalidOpusField {
        field: &'static str,
        expected: i64,
        actual: i64,
    },

    #[error("AAC {field} must be {expected}, got {actual}")]
    InvalidAacField {
        field: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("AAC sampling frequency index {0} is reserved")]
    ReservedAacFrequencyIndex(u8),

    #[error("FLAC metadata must start with STREAMINFO")]
    FlacMissingStreamInfo,

    #[error("Only the final FLAC metadata block may set last_metadata_block_flag")]
    FlacMisplacedLastFlag,

    #[error("FLAC STREAMINFO {field} is out of range: {value}")]
    InvalidFlacStreamInfo { field: &'static str, value: u64 },

    #[error("FLAC block size {block} does not match num_samples_per_frame {frame}")]
    FlacBlockSizeMismatch { block: u16, frame: u32 },
}

impl Classify for CodecConfigError {
    fn kind(&self) -> ErrorKind {
        match self {
            CodecConfigError::ReservedAacFrequencyIndex(_) => ErrorKind::Unimplemented,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AudioElementError {
    #[error("num_layers must be in 1..=6, got {0}")]
    InvalidNumLayers(u8),

    #[error("Layers reference {referenced} substreams but the element has {declared}")]
    SubstreamCountMismatch { referenced: u32, declared: u32 },

    #[error("Substream id {0} is listed more than once")]
    DuplicateSubstreamId(u32),

    #[error("A binaural layout must be the only layer")]
    BinauralWithMultipleLayers,

    #[error("Ambisonics output_channel_count {0} is not (n+1)^2 for n in 0..=14")]
    InvalidAmbisonicsChannelCount(u8),

    #[error("Ambisonics substream_count {substreams} exceeds output_channel_count {channels}")]
    TooManyAmbisonicsSubstreams { substreams: u8, channels: u8 },

    #[error("coupled_substream_count {coupled} exceeds substream_count {substreams}")]
    TooManyCoupledSubstreams { coupled: u8, substreams: u8 },

    #[error("Ambisonics channel mapping does not reference substream {0}")]
    UnmappedSubstream(u8),

    #[error("Ambisonics channel mapping refers to substream {index} but only {count} exist")]
    MappingOutOfRange { index: u8, count: u8 },

    #[error("Demixing matrix has {actual} entries, expected {expected}")]
    DemixingMatrixSize { expected: usize, actual: usize },

    #[error("Parameter type {0:?} is not permitted in an audio element")]
    IllegalParamType(crate::obu::param_definitions::ParamDefinitionType),

    #[error("Parameter type {0:?} appears more than once")]
    DuplicateParamType(crate::obu::param_definitions::ParamDefinitionType),

    #[error("Expanded loudspeaker layout is required when loudspeaker_layout is Expanded")]
    MissingExpandedLayout,

    #[error("Recon gain flags do not match the layers of audio element {0}")]
    ReconGainFlagsMismatch(u32),
}

impl Classify for AudioElementError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParamError {
    #[error("parameter_rate must be non-zero")]
    ZeroParameterRate,

    #[error("duration must be non-zero")]
    ZeroDuration,

    #[error("Subblock durations sum to {sum}, expected {duration}")]
    SubblockDurationMismatch { sum: u64, duration: u32 },

    #[error("Subblock duration must be non-zero")]
    ZeroSubblockDuration,

    #[error("{0:?} requires param_definition_mode 0 and one constant subblock")]
    RequiresSingleConstantSubblock(crate::obu::param_definitions::ParamDefinitionType),

    #[error("No parameter definition for parameter_id {0}")]
    UnknownParameterId(u32),

    #[error("Unknown animation type {0}")]
    UnknownAnimationType(u32),

    #[error("Parameter block carries {actual} subblocks, expected {expected}")]
    SubblockCountMismatch { expected: usize, actual: usize },

    #[error("Parameter data does not match {0:?}")]
    DataTypeMismatch(crate::obu::param_definitions::ParamDefinitionType),

    #[error("Recon gain carries {actual} layers, expected {expected}")]
    ReconGainLayerMismatch { expected: usize, actual: usize },

    #[error("parameter_id {0} is defined more than once with different contents")]
    InconsistentDefinition(u32),

    #[error("Cannot interpolate at {target} within subblock [{start}, {end}]")]
    InterpolationOutOfRange { start: i64, end: i64, target: i64 },

    #[error("Mode 1 parameter block fields are only valid with a mode 1 definition")]
    UnexpectedBlockTiming,

    #[error("dmixp_mode {0} is reserved")]
    ReservedDmixpMode(u8),
}

impl Classify for ParamError {
    fn kind(&self) -> ErrorKind {
        match self {
            ParamError::UnknownParameterId(_) => ErrorKind::NotFound,
            ParamError::UnknownAnimationType(_) | ParamError::ReservedDmixpMode(_) => {
                ErrorKind::Unimplemented
            }
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MixPresentationError {
    #[error("{field} has {actual} entries, expected count_label = {expected}")]
    CountLabelMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate annotations_language {0:?}")]
    DuplicateLanguage(String),

    #[error("A mix presentation requires at least one sub-mix")]
    NoSubMixes,

    #[error("Sub-mix {0} has no audio elements")]
    NoAudioElements(usize),

    #[error("Sub-mix {0} has no layouts")]
    NoLayouts(usize),

    #[error("Audio element {0} appears more than once in the mix presentation")]
    DuplicateAudioElement(u32),

    #[error("Sub-mix {0} has no stereo loudspeaker layout")]
    MissingStereoLayout(usize),

    #[error("Anchor element {0:?} appears more than once")]
    DuplicateAnchor(crate::obu::mix_presentation::AnchorElement),

    #[error("Layout extension is present but info_type {0:#04X} has no extension bits")]
    UnexpectedLayoutExtension(u8),

    #[error("content_language tag value {0:?} is not a 3-character code")]
    InvalidContentLanguage(String),

    #[error("content_language tag appears more than once")]
    DuplicateContentLanguage,

    #[error("Too many tags: {0}")]
    TooManyTags(usize),

    #[error("Mix gain parameter definition is not a MixGain")]
    NotMixGain,

    #[error("Mix presentation references unknown audio element {0}")]
    UnknownAudioElement(u32),
}

impl Classify for MixPresentationError {
    fn kind(&self) -> ErrorKind {
        match self {
            MixPresentationError::UnknownAudioElement(_) => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    #[error("Layout type {0:?} has no channel count")]
    ReservedLayout(crate::obu::mix_presentation::LayoutType),

    #[error("Sound system {0} is reserved")]
    ReservedSoundSystem(u8),

    #[error("No mix presentations to select from")]
    NoMixPresentations,

    #[error("Mix presentation {0} has no sub-mixes")]
    NoSubMixes(u32),

    #[error("Mix presentation {0} has no layouts in its first sub-mix")]
    NoLayouts(u32),

    #[error("Unknown loudspeaker layout {0:?}")]
    UnknownLoudspeakerLayout(crate::obu::audio_element::LoudspeakerLayout),
}

impl Classify for LayoutError {
    fn kind(&self) -> ErrorKind {
        match self {
            LayoutError::NoMixPresentations => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum NumericError {
    #[error("{value} does not fit in Q7.8")]
    Q7_8OutOfRange { value: f64 },

    #[error("{value} does not fit in {target}")]
    CastOutOfRange { value: i64, target: &'static str },
}

impl Classify for NumericError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::OutOfRange
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SequencerError {
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::process::sequencer::SequencerState,
    },

    #[error("Duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: u32 },

    #[error("Audio frames in one temporal unit disagree on {0}")]
    InconsistentTemporalUnit(&'static str),

    #[error("Substream {0} appears more than once in a temporal unit")]
    DuplicateSubstream(u32),

    #[error("Parameter {0} appears more than once in a temporal unit")]
    DuplicateParameter(u32),

    #[error("Trimming {trimmed} samples exceeds the frame size {frame}")]
    TrimExceedsFrame { trimmed: u64, frame: u32 },

    #[error("Temporal unit has no audio frames")]
    EmptyTemporalUnit,

    #[error("Finalized descriptors are {actual} bytes but {expected} were written")]
    DescriptorSizeChanged { expected: usize, actual: usize },

    #[error("Codec configs disagree on {0}")]
    InconsistentCodecConfigs(&'static str),
}

impl Classify for SequencerError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    #[error("Descriptor OBUs did not start with an IA sequence header")]
    MissingSequenceHeader,

    #[error("Descriptors are incomplete; more data is required")]
    InsufficientData,

    #[error("No codec config with id {0}")]
    UnknownCodecConfig(u32),

    #[error("No audio element owns substream {0}")]
    UnknownSubstream(u32),

    #[error("No codec config OBUs were found")]
    NoCodecConfigs,

    #[error("Skipping codec config with a {0}-byte payload")]
    UndersizedCodecConfig(u64),

    #[error("Skipping OBU with reserved type {0}")]
    ReservedObu(u8),

    #[error("Discarding {0} bytes of a truncated OBU at the end of the stream")]
    TruncatedObu(usize),

    #[error("Dropping a temporal unit without audio frames")]
    EmptyTemporalUnit,

    #[error("Rendering has not been configured")]
    RenderingNotConfigured,
}

impl Classify for ProcessorError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProcessorError::InsufficientData => ErrorKind::ResourceExhausted,
            ProcessorError::UnknownCodecConfig(_) | ProcessorError::UnknownSubstream(_) => {
                ErrorKind::NotFound
            }
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("No substream encoder available for codec {0:?}")]
    NoSubstreamEncoder(crate::obu::codec_config::CodecId),

    #[error("No samples for audio element {0}")]
    MissingSamples(u32),

    #[error("Sample {index} has {actual} channels, expected {expected}")]
    RaggedFrame {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Substream {0} produced more frames than it was given")]
    UnexpectedFrame(u32),

    #[error("Redundant descriptor copies are not implemented")]
    RedundantCopyUnimplemented,

    #[error("encode called after finalize_encode")]
    EncodeAfterFinalize,

    #[error("Parameter block for {id} starts at {actual}, expected {expected}")]
    ParameterBlockMisaligned { id: u32, expected: i64, actual: i64 },

    #[error("Audio element {audio_element_id} received {actual} samples, expected {expected}")]
    SampleCountMismatch {
        audio_element_id: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Parameter block {0} does not match its definition")]
    ParameterDefinitionMismatch(u32),

    #[error("Measured loudness of mix presentation {mix_presentation_id} differs from the user-provided value")]
    LoudnessMismatch { mix_presentation_id: u32 },
}

impl Classify for EncoderError {
    fn kind(&self) -> ErrorKind {
        match self {
            EncoderError::NoSubstreamEncoder(_) | EncoderError::RedundantCopyUnimplemented => {
                ErrorKind::Unimplemented
            }
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("Descriptor OBUs have not been processed yet")]
    DescriptorsNotReady,

    #[error("decode called after flush")]
    DecodeAfterFlush,

    #[error("Unsupported output bit depth {0}")]
    UnsupportedBitDepth(u8),

    #[error("No substream decoder available for codec {0:?}")]
    NoSubstreamDecoder(crate::obu::codec_config::CodecId),

    #[error("Requested mix presentation {0} does not exist")]
    UnknownMixPresentation(u32),

    #[error("Descriptor bytes contained trailing temporal unit data")]
    TrailingData,

    #[error("Frame of {len} bytes is not a whole number of {unit}-byte sample groups")]
    FrameSizeMismatch { len: usize, unit: usize },
}

impl Classify for DecoderError {
    fn kind(&self) -> ErrorKind {
        match self {
            DecoderError::NoSubstreamDecoder(_) => ErrorKind::Unimplemented,
            DecoderError::UnknownMixPresentation(_) => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn classify_through_context() {
        let err = anyhow!(BitBufferError::NotEnoughData {
            requested: 8,
            available: 0
        });
        let err = Err::<(), _>(err).context("reading obu header").unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::ResourceExhausted);
        assert!(is_resource_exhausted(&err));
    }

    #[test]
    fn classify_by_variant() {
        assert_eq!(
            error_kind(&anyhow!(ParamError::UnknownParameterId(3))),
            ErrorKind::NotFound
        );
        assert_eq!(
            error_kind(&anyhow!(LebError::InvalidFixedSize(9))),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            error_kind(&anyhow!(NumericError::Q7_8OutOfRange { value: 200.0 })),
            ErrorKind::OutOfRange
        );
        assert_eq!(error_kind(&anyhow!("opaque")), ErrorKind::Internal);
    }
}
