//! Default configuration constants for voxflow.
//!
//! Shared by the config sections and the component constructors so that
//! a component built directly and one built from `Config::default()` agree.

/// Minimum sentence length, in characters, before the segmenter emits.
///
/// Short fragments such as "Ok." are held back and merged with what follows
/// so that synthesis is not dispatched for a single word.
pub const MIN_SENTENCE_LENGTH: usize = 10;

/// Number of characters of a sentence included in `sentence_ready` previews.
pub const SENTENCE_PREVIEW_CHARS: usize = 100;

/// Total attempts a retried capability call gets, including the first.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Backoff before the first retry, in milliseconds.
pub const RETRY_INITIAL_DELAY_MS: u64 = 100;

/// Upper bound on a single backoff delay, in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Multiplier applied to the delay after each failed attempt.
pub const RETRY_EXPONENTIAL_BASE: f64 = 2.0;

/// Token bucket refill rate.
pub const RATE_LIMIT_TOKENS_PER_SECOND: f64 = 50.0;

/// Token bucket capacity (maximum burst).
pub const RATE_LIMIT_BUCKET_CAPACITY: f64 = 50.0;

/// Tokens taken from the bucket by each transcription or synthesis call.
pub const RATE_LIMIT_TOKENS_PER_CALL: f64 = 1.0;

/// Audio shorter than this is rejected before transcription.
pub const MIN_AUDIO_DURATION_MS: f64 = 100.0;

/// Audio larger than this is rejected before transcription.
pub const MAX_AUDIO_SIZE_MB: f64 = 25.0;

/// Canonical sample rate for transcription input.
///
/// 16kHz is the standard for speech recognition.
pub const SAMPLE_RATE: u32 = 16000;

/// Canonical channel count for transcription input.
pub const CHANNELS: u16 = 1;

/// RMS level below which a buffer counts as silence.
pub const SILENCE_THRESHOLD: f32 = 0.01;

/// Turns kept in conversation history; oldest are dropped first.
pub const HISTORY_MAX_TURNS: usize = 50;
