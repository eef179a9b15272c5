use crate::audio::normalize::AudioNormalizer;
use crate::defaults;
use crate::error::{Result, VoxflowError};
use crate::pipeline::playback::PlaybackOrder;
use crate::resilience::rate_limit::RateLimiter;
use crate::resilience::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub segmenter: SegmenterConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
}

/// Sentence segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub min_sentence_length: usize,
    pub preview_chars: usize,
}

/// Retry-with-backoff configuration for capability calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

/// Token bucket configuration for synthesis/transcription calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub tokens_per_second: f64,
    pub bucket_capacity: f64,
}

/// Audio validation and normalization configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub min_duration_ms: f64,
    pub max_size_mb: f64,
    pub target_sample_rate_hz: u32,
    pub target_channels: u16,
    pub silence_threshold: f32,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub playback_order: PlaybackOrder,
    pub history_max_turns: usize,
    /// Maximum wait for the next generated fragment.
    pub token_timeout_ms: Option<u64>,
    /// Maximum wall-clock time for a whole run; expiry cancels the run.
    pub run_timeout_ms: Option<u64>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_sentence_length: defaults::MIN_SENTENCE_LENGTH,
            preview_chars: defaults::SENTENCE_PREVIEW_CHARS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay_ms: defaults::RETRY_INITIAL_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            exponential_base: defaults::RETRY_EXPONENTIAL_BASE,
            jitter: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tokens_per_second: defaults::RATE_LIMIT_TOKENS_PER_SECOND,
            bucket_capacity: defaults::RATE_LIMIT_BUCKET_CAPACITY,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: defaults::MIN_AUDIO_DURATION_MS,
            max_size_mb: defaults::MAX_AUDIO_SIZE_MB,
            target_sample_rate_hz: defaults::SAMPLE_RATE,
            target_channels: defaults::CHANNELS,
            silence_threshold: defaults::SILENCE_THRESHOLD,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            playback_order: PlaybackOrder::default(),
            history_max_turns: defaults::HISTORY_MAX_TURNS,
            token_timeout_ms: None,
            run_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Builds a validated [`RetryPolicy`] from this section.
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.exponential_base,
            self.jitter,
        )
    }
}

impl RateLimitConfig {
    /// Builds a limiter when rate limiting is enabled, `None` otherwise.
    pub fn build(&self) -> Result<Option<RateLimiter>> {
        if !self.enabled {
            return Ok(None);
        }
        RateLimiter::new(self.bucket_capacity, self.tokens_per_second).map(Some)
    }
}

impl AudioConfig {
    pub fn normalizer(&self) -> Result<AudioNormalizer> {
        AudioNormalizer::new(
            self.target_sample_rate_hz,
            self.target_channels,
            self.min_duration_ms,
            self.max_size_mb,
        )
    }
}

impl PipelineConfig {
    pub fn token_timeout(&self) -> Option<Duration> {
        self.token_timeout_ms.map(Duration::from_millis)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML and unreadable files.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXFLOW_MIN_SENTENCE_LENGTH → segmenter.min_sentence_length
    /// - VOXFLOW_RETRY_MAX_ATTEMPTS → retry.max_attempts
    /// - VOXFLOW_RATE_LIMIT_TOKENS_PER_SECOND → rate_limit.tokens_per_second (also enables it)
    /// - VOXFLOW_TARGET_SAMPLE_RATE → audio.target_sample_rate_hz
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(length) = env_value::<usize>("VOXFLOW_MIN_SENTENCE_LENGTH") {
            self.segmenter.min_sentence_length = length;
        }

        if let Some(attempts) = env_value::<u32>("VOXFLOW_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts;
        }

        if let Some(rate) = env_value::<f64>("VOXFLOW_RATE_LIMIT_TOKENS_PER_SECOND") {
            self.rate_limit.tokens_per_second = rate;
            self.rate_limit.enabled = true;
        }

        if let Some(rate) = env_value::<u32>("VOXFLOW_TARGET_SAMPLE_RATE") {
            self.audio.target_sample_rate_hz = rate;
        }

        self
    }

    /// Checks every section against the invariants its component enforces.
    pub fn validate(&self) -> Result<()> {
        if self.segmenter.min_sentence_length == 0 {
            return Err(invalid("segmenter.min_sentence_length", "must be at least 1"));
        }
        self.retry.to_policy()?;
        if self.rate_limit.tokens_per_second <= 0.0 {
            return Err(invalid("rate_limit.tokens_per_second", "must be positive"));
        }
        if self.rate_limit.bucket_capacity <= 0.0 {
            return Err(invalid("rate_limit.bucket_capacity", "must be positive"));
        }
        if self.rate_limit.enabled
            && self.rate_limit.bucket_capacity < defaults::RATE_LIMIT_TOKENS_PER_CALL
        {
            return Err(invalid(
                "rate_limit.bucket_capacity",
                "must hold at least one token per call when rate limiting is enabled",
            ));
        }
        self.audio.normalizer()?;
        if !(0.0..=1.0).contains(&self.audio.silence_threshold) {
            return Err(invalid(
                "audio.silence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.pipeline.history_max_turns == 0 {
            return Err(invalid("pipeline.history_max_turns", "must be at least 1"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxflow/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxflow").join("config.toml"))
    }
}

fn invalid(key: &str, message: &str) -> VoxflowError {
    VoxflowError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok().filter(|v| !v.is_empty())?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
