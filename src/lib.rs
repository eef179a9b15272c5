//! voxflow - Streaming low-latency voice pipeline
//!
//! Turns generated text into speech sentence by sentence while the text is
//! still arriving, with every stage recorded on an event bus.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod resilience;
pub mod segmenter;
pub mod stt;
pub mod tts;

// Capabilities (transcribe → generate → synthesize → play)
pub use llm::{ConversationHistory, Generator, MockGenerator, TokenStream};
pub use pipeline::sink::{AudioSink, CollectorSink, NullAudioSink};
pub use stt::{MockTranscriber, Transcriber};
pub use tts::{MockSynthesizer, Synthesizer};

// Pipeline
pub use pipeline::{Pipeline, PipelineBuilder, PipelineState, PlaybackOrder, RunOutcome};
pub use segmenter::SentenceSegmenter;

// Building blocks
pub use audio::{AudioBuffer, AudioFormat, AudioNormalizer, detect_silence};
pub use events::{EventBus, EventKind, EventSink, PipelineEvent};
pub use resilience::{RateLimiter, RetryExecutor, RetryPolicy};

// Error handling
pub use error::{ErrorKind, Result, Stage, VoxflowError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
