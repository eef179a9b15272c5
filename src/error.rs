//! Error types for voxflow.

use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Normalization,
    Transcription,
    Generation,
    Segmentation,
    Synthesis,
    Playback,
}

impl Stage {
    /// Stable lowercase name used in event payloads and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalization => "normalization",
            Stage::Transcription => "transcription",
            Stage::Generation => "generation",
            Stage::Segmentation => "segmentation",
            Stage::Synthesis => "synthesis",
            Stage::Playback => "playback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification that decides retry and propagation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input (audio too short/large, unsupported format, bad config). Never retried.
    Validation,
    /// Network failure, timeout, upstream rate limiting. Retried per policy.
    Transient,
    /// Caller cancelled the run. Never retried, never reported as a failure.
    Cancellation,
    /// Any other stage failure.
    Stage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Stage => "stage",
        }
    }
}

#[derive(Error, Debug)]
pub enum VoxflowError {
    // Audio validation errors
    #[error("Audio too short: {duration_ms}ms (minimum: {minimum_ms}ms)")]
    AudioTooShort { duration_ms: f64, minimum_ms: f64 },

    #[error("Audio too large: {size_mb:.1}MB (maximum: {maximum_mb}MB)")]
    AudioTooLarge { size_mb: f64, maximum_mb: f64 },

    #[error("Unsupported audio format: {message}")]
    AudioFormat { message: String },

    #[error("Invalid audio buffer: {message}")]
    InvalidAudio { message: String },

    #[error("Audio normalization failed: {message}")]
    AudioNormalization { message: String },

    // Capability errors
    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Transcription produced an empty transcript")]
    EmptyTranscript,

    #[error("Generation error: {message}")]
    Generation { message: String },

    #[error("Synthesis error: {message}")]
    Synthesis { message: String },

    #[error("Playback error: {message}")]
    Playback { message: String },

    // Transient upstream errors
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{service} rate limit exceeded")]
    RateLimited {
        service: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Pipeline run cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VoxflowError {
    /// Classifies this error into the retry/propagation taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoxflowError::AudioTooShort { .. }
            | VoxflowError::AudioTooLarge { .. }
            | VoxflowError::AudioFormat { .. }
            | VoxflowError::InvalidAudio { .. }
            | VoxflowError::ConfigParse { .. }
            | VoxflowError::ConfigInvalidValue { .. }
            | VoxflowError::Config(_) => ErrorKind::Validation,
            VoxflowError::Unavailable { .. }
            | VoxflowError::Timeout { .. }
            | VoxflowError::RateLimited { .. } => ErrorKind::Transient,
            VoxflowError::Cancelled => ErrorKind::Cancellation,
            VoxflowError::AudioNormalization { .. }
            | VoxflowError::Transcription { .. }
            | VoxflowError::EmptyTranscript
            | VoxflowError::Generation { .. }
            | VoxflowError::Synthesis { .. }
            | VoxflowError::Playback { .. }
            | VoxflowError::Io(_)
            | VoxflowError::Other(_) => ErrorKind::Stage,
        }
    }

    /// True only for transient failures.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }

    /// Variant name used as `error_kind` in failure events.
    pub fn name(&self) -> &'static str {
        match self {
            VoxflowError::AudioTooShort { .. } => "AudioTooShort",
            VoxflowError::AudioTooLarge { .. } => "AudioTooLarge",
            VoxflowError::AudioFormat { .. } => "AudioFormat",
            VoxflowError::InvalidAudio { .. } => "InvalidAudio",
            VoxflowError::AudioNormalization { .. } => "AudioNormalization",
            VoxflowError::Transcription { .. } => "Transcription",
            VoxflowError::EmptyTranscript => "EmptyTranscript",
            VoxflowError::Generation { .. } => "Generation",
            VoxflowError::Synthesis { .. } => "Synthesis",
            VoxflowError::Playback { .. } => "Playback",
            VoxflowError::Unavailable { .. } => "Unavailable",
            VoxflowError::Timeout { .. } => "Timeout",
            VoxflowError::RateLimited { .. } => "RateLimited",
            VoxflowError::Cancelled => "Cancelled",
            VoxflowError::ConfigParse { .. } => "ConfigParse",
            VoxflowError::ConfigInvalidValue { .. } => "ConfigInvalidValue",
            VoxflowError::Config(_) => "Config",
            VoxflowError::Io(_) => "Io",
            VoxflowError::Other(_) => "Other",
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxflowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_audio_too_short_display() {
        let error = VoxflowError::AudioTooShort {
            duration_ms: 50.0,
            minimum_ms: 100.0,
        };
        assert_eq!(error.to_string(), "Audio too short: 50ms (minimum: 100ms)");
    }

    #[test]
    fn test_audio_too_large_display() {
        let error = VoxflowError::AudioTooLarge {
            size_mb: 26.0,
            maximum_mb: 25.0,
        };
        assert_eq!(error.to_string(), "Audio too large: 26.0MB (maximum: 25MB)");
    }

    #[test]
    fn test_timeout_display() {
        let error = VoxflowError::Timeout {
            operation: "generation".to_string(),
            timeout_ms: 1500,
        };
        assert_eq!(error.to_string(), "generation timed out after 1500ms");
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxflowError::ConfigInvalidValue {
            key: "retry.max_attempts".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for retry.max_attempts: must be at least 1"
        );
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let errors = [
            VoxflowError::AudioTooShort {
                duration_ms: 1.0,
                minimum_ms: 100.0,
            },
            VoxflowError::AudioTooLarge {
                size_mb: 30.0,
                maximum_mb: 25.0,
            },
            VoxflowError::AudioFormat {
                message: "pcm".to_string(),
            },
        ];
        for error in errors {
            assert_eq!(error.kind(), ErrorKind::Validation);
            assert!(!error.is_retryable());
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let errors = [
            VoxflowError::Unavailable {
                service: "tts".to_string(),
                message: "connection reset".to_string(),
            },
            VoxflowError::Timeout {
                operation: "stt".to_string(),
                timeout_ms: 10,
            },
            VoxflowError::RateLimited {
                service: "tts".to_string(),
                retry_after_ms: Some(500),
            },
        ];
        for error in errors {
            assert_eq!(error.kind(), ErrorKind::Transient);
            assert!(error.is_retryable());
        }
    }

    #[test]
    fn test_cancelled_is_distinct() {
        let error = VoxflowError::Cancelled;
        assert_eq!(error.kind(), ErrorKind::Cancellation);
        assert!(error.is_cancelled());
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_stage_errors() {
        let error = VoxflowError::Synthesis {
            message: "voice missing".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::Stage);
        assert_eq!(error.name(), "Synthesis");
        assert_eq!(VoxflowError::EmptyTranscript.kind(), ErrorKind::Stage);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Transcription.as_str(), "transcription");
        assert_eq!(Stage::Synthesis.to_string(), "synthesis");
        assert_eq!(ErrorKind::Transient.as_str(), "transient");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxflowError = io_error.into();
        assert!(error.to_string().contains("file not found"));
        assert_eq!(error.kind(), ErrorKind::Stage);
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxflowError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: VoxflowError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxflowError>();
        assert_sync::<VoxflowError>();
    }
}
