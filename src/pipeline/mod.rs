//! Streaming voice pipeline.
//!
//! Each run pulls generated tokens through the sentence segmenter, starts a
//! synthesis task per sentence as soon as it is emitted and hands finished
//! audio to the sink in the configured playback order.

pub mod orchestrator;
pub mod playback;
pub mod sink;

pub use orchestrator::{Pipeline, PipelineBuilder, PipelineState, RunOutcome};
pub use playback::{PlaybackOrder, PlaybackQueue};
pub use sink::{AudioSink, CollectorSink, NullAudioSink, PlayedAudio};
