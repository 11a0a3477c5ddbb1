#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! An IA sequence is a flat series of OBUs (open bitstream units). Each OBU
//! starts with a 5-bit type and a LEB128 payload size.
//!
//! ### Sequence Organization
//!
//! **Descriptors**: an IA sequence header, then codec configs, audio elements
//! and mix presentations, emitted once per sequence.
//! **Temporal units**: per frame, an optional temporal delimiter, parameter
//! blocks and one audio frame per substream.
//!
//! ### Loudness
//!
//! Mix presentations carry per-layout loudness. The encoder writes the
//! descriptors before any audio and back-patches them once the loudness of the
//! rendered mixes is known, so the serialized size of the descriptors must not
//! change in between.
//!
//! ## Quick Start
//!
//! 1. Push bytes into a [`process::decoder::IamfDecoder`]
//! 2. Pull rendered PCM with [`process::decoder::IamfDecoder::get_output_temporal_unit`]
//! 3. Call [`process::decoder::IamfDecoder::flush`] after the last chunk
//!
//! ```rust,no_run
//! use iamf::process::decoder::{DecoderSettings, IamfDecoder};
//! use iamf::process::obu_processor::RenderingFactories;
//!
//! let mut decoder = IamfDecoder::create(DecoderSettings::default(), RenderingFactories::default())?;
//! let data = std::fs::read("input.iamf")?;
//!
//! for chunk in data.chunks(4096) {
//!     decoder.decode(chunk)?;
//!     while decoder.is_temporal_unit_available() {
//!         let pcm = decoder.get_output_temporal_unit()?;
//!         // 16-bit little-endian, interleaved
//!     }
//! }
//!
//! loop {
//!     let (pcm, done) = decoder.flush()?;
//!     if done {
//!         break;
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Data structures and wire formats of every OBU type.
///
/// - **Header** ([`obu::header`]): Type, flags, size, trimming and extension
/// - **Descriptors** ([`obu::ia_sequence_header`], [`obu::codec_config`],
///   [`obu::audio_element`], [`obu::mix_presentation`])
/// - **Decoder Configs** ([`obu::decoder_config`]): LPCM, Opus, AAC-LC, FLAC
/// - **Parameters** ([`obu::param_definitions`], [`obu::parameter_block`])
/// - **Temporal Units** ([`obu::temporal_delimiter`], [`obu::audio_frame`])
/// - **Arbitrary OBUs** ([`obu::arbitrary`]): Verbatim user OBUs at insertion hooks
pub mod obu;

/// Processing of complete IA sequences.
///
/// 1. **Sequencing** ([`process::sequencer`]): Serializes descriptors and
///    temporal units to memory or to a file.
///
/// 2. **Reading** ([`process::obu_processor`]): Parses descriptors and groups
///    temporal units.
///
/// 3. **Encoding** ([`process::encoder`]) and **Decoding** ([`process::decoder`]).
pub mod process;

/// Utility functions and supporting infrastructure.
///
/// - **LEB128** ([`utils::leb128`]): Minimum and fixed-size coding
/// - **Bit Buffers** ([`utils::bit_buffer`]): Bit-level reading and writing
/// - **Error Handling** ([`utils::errors`]): Error types and kinds
/// - **Numerics** ([`utils::numeric`]): Q7.8 and sample conversions
pub mod utils;
