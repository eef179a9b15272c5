use crate::audio::AudioBuffer;
use crate::error::{Result, VoxflowError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (a hosted API vs mock).
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a normalized audio buffer to text.
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String>;
}

/// Implement Transcriber for Arc<T> to allow sharing across runs.
#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String> {
        (**self).transcribe(audio).await
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    response: String,
    should_fail: bool,
    latency: Duration,
    transient_failures: Arc<AtomicU32>,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            response: "This is a test transcription".to_string(),
            should_fail: false,
            latency: Duration::ZERO,
            transient_failures: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// The first `count` calls fail with a retryable `Unavailable` error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Simulated API latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of transcribe calls so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &AudioBuffer) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(VoxflowError::Unavailable {
                service: "stt".to_string(),
                message: "mock connection reset".to_string(),
            });
        }

        if self.should_fail {
            Err(VoxflowError::Transcription {
                message: "mock transcription failure".to_string(),
            })
        } else {
            Ok(self.response.clone())
        }
    }
}
