//! Observability events: kinds, the event record, and the sink trait
//! every stage publishes through.

pub mod bus;
pub mod latency;

pub use bus::{EventBus, EventListener, EventSummary};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordered key/value payload attached to an event.
pub type Payload = Map<String, Value>;

/// Every stage transition the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Capture kinds are published by audio sources feeding the pipeline.
    AudioCaptureStart,
    AudioCaptureComplete,
    SttStart,
    SttComplete,
    SttError,
    LlmQueryStart,
    /// First fragment of a generation only.
    LlmTokenReceived,
    LlmComplete,
    LlmError,
    SentenceReady,
    TtsStart,
    TtsComplete,
    TtsError,
    PlaybackComplete,
    PipelineStart,
    PipelineComplete,
    PipelineError,
    PipelineCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AudioCaptureStart => "audio_capture_start",
            EventKind::AudioCaptureComplete => "audio_capture_complete",
            EventKind::SttStart => "stt_start",
            EventKind::SttComplete => "stt_complete",
            EventKind::SttError => "stt_error",
            EventKind::LlmQueryStart => "llm_query_start",
            EventKind::LlmTokenReceived => "llm_token_received",
            EventKind::LlmComplete => "llm_complete",
            EventKind::LlmError => "llm_error",
            EventKind::SentenceReady => "sentence_ready",
            EventKind::TtsStart => "tts_start",
            EventKind::TtsComplete => "tts_complete",
            EventKind::TtsError => "tts_error",
            EventKind::PlaybackComplete => "playback_complete",
            EventKind::PipelineStart => "pipeline_start",
            EventKind::PipelineComplete => "pipeline_complete",
            EventKind::PipelineError => "pipeline_error",
            EventKind::PipelineCancelled => "pipeline_cancelled",
        }
    }

    /// True for the kinds that report a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EventKind::SttError
                | EventKind::LlmError
                | EventKind::TtsError
                | EventKind::PipelineError
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single timestamped observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Unix time in seconds.
    pub timestamp: f64,
    pub kind: EventKind,
    pub payload: Payload,
}

impl PipelineEvent {
    pub fn new(kind: EventKind, payload: Payload) -> Self {
        Self {
            timestamp: unix_now(),
            kind,
            payload,
        }
    }

    /// The `latency_ms` payload entry, if the emitter attached one.
    pub fn latency_ms(&self) -> Option<f64> {
        self.payload.get("latency_ms").and_then(Value::as_f64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Anything that accepts pipeline events.
///
/// Emitting never blocks and never fails from the caller's point of view.
pub trait EventSink: Send + Sync {
    fn emit(&self, kind: EventKind, payload: Payload);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _kind: EventKind, _payload: Payload) {}
}

/// Builds a payload from key/value pairs, preserving their order.
pub fn payload<const N: usize>(entries: [(&str, Value); N]) -> Payload {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// First `max_chars` characters of `text`, for event previews.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
