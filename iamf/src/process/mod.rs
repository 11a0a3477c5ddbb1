//! Sequencing, reading, encoding and decoding of IA sequences.

/// The descriptor OBUs of one sequence and the statistics derived from them.
pub mod descriptors;

/// Channel counts and mix presentation / layout selection.
pub mod layout;

/// Per-substream and per-parameter clocks.
pub mod timing;

/// Grouping of the OBUs that share a start timestamp.
pub mod temporal_unit;

/// Sinks for serialized sequences.
///
/// Provides the [`ObuSequencer`](sequencer::ObuSequencer) trait with an
/// in-memory and a file implementation.
pub mod sequencer;

/// Substream encoder and decoder traits with the built-in LPCM codec.
pub mod codec;

/// Renderers, loudness calculators and the sub-mix mixer.
pub mod render;

/// Reading descriptors and temporal units from a bit buffer.
///
/// Provides the [`ObuProcessor`](obu_processor::ObuProcessor), used by the
/// decoder and by tools that inspect a stream without rendering it.
pub mod obu_processor;

/// Iterative encoder that emits descriptors once and then one temporal unit
/// per call.
pub mod encoder;

/// Streaming decoder producing interleaved PCM.
pub mod decoder;

#[cfg(test)]
pub(crate) mod fixtures;
