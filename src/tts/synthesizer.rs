use crate::audio::AudioBuffer;
use crate::error::{Result, VoxflowError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for text-to-speech synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one sentence into audio.
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer>;
}

#[async_trait]
impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        (**self).synthesize(text).await
    }
}

const MOCK_SAMPLE_RATE: u32 = 22050;
/// Speaking rate used to size the silent output (150 words per minute).
const WORDS_PER_SECOND: f64 = 2.5;

/// Mock synthesizer that records what it was asked to speak and returns
/// silence of a plausible length.
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    latency: Duration,
    /// (substring, latency) overrides, first match wins.
    text_latencies: Vec<(String, Duration)>,
    fail_on: Option<String>,
    transient_failures: Arc<AtomicU32>,
    spoken: Arc<Mutex<Vec<String>>>,
    completed: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Simulated latency for texts containing `pattern`.
    pub fn with_text_latency(mut self, pattern: &str, latency: Duration) -> Self {
        self.text_latencies.push((pattern.to_string(), latency));
        self
    }

    /// Fails with a `Synthesis` error for texts containing `pattern`.
    pub fn with_failure_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    /// The first `count` calls fail with a retryable `Unavailable` error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Texts in the order synthesis was requested, retries included.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Texts in the order synthesis finished successfully.
    pub fn completed(&self) -> Vec<String> {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn last_spoken(&self) -> Option<String> {
        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn reset(&self) {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn latency_for(&self, text: &str) -> Duration {
        self.text_latencies
            .iter()
            .find(|(pattern, _)| text.contains(pattern.as_str()))
            .map(|(_, latency)| *latency)
            .unwrap_or(self.latency)
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());

        let latency = self.latency_for(text);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(VoxflowError::Unavailable {
                service: "tts".to_string(),
                message: "mock connection reset".to_string(),
            });
        }
        if let Some(pattern) = &self.fail_on
            && text.contains(pattern.as_str())
        {
            return Err(VoxflowError::Synthesis {
                message: format!("mock synthesis failure for \"{}\"", text),
            });
        }

        let words = text.split_whitespace().count().max(1);
        let seconds = words as f64 / WORDS_PER_SECOND;
        let samples = vec![0.0f32; (seconds * MOCK_SAMPLE_RATE as f64) as usize];
        let audio = AudioBuffer::from_samples(&samples, MOCK_SAMPLE_RATE, 1)?;

        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_and_returns_silence() {
        let synth = MockSynthesizer::new();
        let audio = synth.synthesize("Hello there friend.").await.unwrap();

        assert_eq!(synth.spoken(), vec!["Hello there friend."]);
        assert_eq!(synth.last_spoken().as_deref(), Some("Hello there friend."));
        assert_eq!(audio.sample_rate_hz(), MOCK_SAMPLE_RATE);
        assert_eq!(audio.channels(), 1);
        // 3 words at 2.5 words/s
        let duration = audio.duration_ms().unwrap();
        assert!((duration - 1200.0).abs() < 1.0, "duration {}", duration);
    }

    #[tokio::test]
    async fn test_failure_on_pattern() {
        let synth = MockSynthesizer::new().with_failure_on("boom");
        assert!(synth.synthesize("fine").await.is_ok());
        let err = synth.synthesize("it went boom").await.unwrap_err();
        assert!(matches!(err, VoxflowError::Synthesis { .. }));
        assert!(!err.is_retryable());
        assert_eq!(synth.completed(), vec!["fine"]);
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let synth = MockSynthesizer::new().with_transient_failures(1);
        assert!(synth.synthesize("a").await.unwrap_err().is_retryable());
        assert!(synth.synthesize("a").await.is_ok());
        assert_eq!(synth.call_count(), 2);
    }

    #[tokio::test]
    async fn test_text_latency_override() {
        let synth = MockSynthesizer::new()
            .with_latency(Duration::from_millis(1))
            .with_text_latency("slow", Duration::from_millis(60));

        let start = std::time::Instant::now();
        synth.synthesize("the slow one").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_reset_clears_tracking() {
        let synth = MockSynthesizer::new();
        synth.synthesize("x").await.unwrap();
        synth.reset();
        assert_eq!(synth.call_count(), 0);
        assert!(synth.completed().is_empty());
    }
}
