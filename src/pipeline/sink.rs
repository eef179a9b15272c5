use crate::audio::AudioBuffer;
use crate::error::{Result, VoxflowError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Pluggable audio output handler for the pipeline.
/// Receives synthesized sentences in the order the playback policy releases them.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play (or store) the audio for sentence `index`.
    async fn play(&self, index: usize, sentence: &str, audio: &AudioBuffer) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

#[async_trait]
impl<T: AudioSink + ?Sized> AudioSink for Arc<T> {
    async fn play(&self, index: usize, sentence: &str, audio: &AudioBuffer) -> Result<()> {
        (**self).play(index, sentence, audio).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// One buffer handed to a [`CollectorSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedAudio {
    pub index: usize,
    pub sentence: String,
    pub audio: AudioBuffer,
}

/// Collects played audio for tests and library use.
#[derive(Debug, Default)]
pub struct CollectorSink {
    played: Mutex<Vec<PlayedAudio>>,
    fail_at: Option<usize>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with a `Playback` error when asked to play sentence `index`.
    pub fn with_failure_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn played(&self) -> Vec<PlayedAudio> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sentence indices in play order.
    pub fn indices(&self) -> Vec<usize> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|p| p.index)
            .collect()
    }

    pub fn sentences(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|p| p.sentence.clone())
            .collect()
    }

    /// Everything played so far joined with spaces, or None if nothing was.
    pub fn text(&self) -> Option<String> {
        let sentences = self.sentences();
        if sentences.is_empty() {
            None
        } else {
            Some(sentences.join(" "))
        }
    }
}

#[async_trait]
impl AudioSink for CollectorSink {
    async fn play(&self, index: usize, sentence: &str, audio: &AudioBuffer) -> Result<()> {
        if self.fail_at == Some(index) {
            return Err(VoxflowError::Playback {
                message: format!("collector refused sentence {}", index),
            });
        }
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PlayedAudio {
                index,
                sentence: sentence.to_string(),
                audio: audio.clone(),
            });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Discards all audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudioSink;

#[async_trait]
impl AudioSink for NullAudioSink {
    async fn play(&self, _index: usize, _sentence: &str, _audio: &AudioBuffer) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio() -> AudioBuffer {
        AudioBuffer::from_samples(&[0.0; 160], 16000, 1).unwrap()
    }

    #[test]
    fn audio_sink_is_object_safe() {
        let _sink: Box<dyn AudioSink> = Box::new(CollectorSink::new());
    }

    #[tokio::test]
    async fn collector_sink_collects_in_play_order() {
        let sink = CollectorSink::new();

        sink.play(1, "World.", &audio()).await.unwrap();
        sink.play(0, "Hello.", &audio()).await.unwrap();

        assert_eq!(sink.indices(), vec![1, 0]);
        assert_eq!(sink.text(), Some("World. Hello.".to_string()));
    }

    #[tokio::test]
    async fn collector_sink_empty_returns_none() {
        let sink = CollectorSink::new();
        assert_eq!(sink.text(), None);
        assert!(sink.played().is_empty());
    }

    #[tokio::test]
    async fn collector_sink_failure_at_index() {
        let sink = CollectorSink::new().with_failure_at(1);
        assert!(sink.play(0, "a", &audio()).await.is_ok());
        let err = sink.play(1, "b", &audio()).await.unwrap_err();
        assert!(matches!(err, VoxflowError::Playback { .. }));
        assert_eq!(sink.sentences(), vec!["a"]);
    }

    #[tokio::test]
    async fn arc_sink_delegates_name_and_play() {
        let inner = Arc::new(CollectorSink::new());
        let sink: Arc<dyn AudioSink> = inner.clone();
        assert_eq!(sink.name(), "collector");
        sink.play(0, "x", &audio()).await.unwrap();
        assert_eq!(inner.indices(), vec![0]);
    }

    #[tokio::test]
    async fn null_sink_accepts_everything() {
        let sink = NullAudioSink;
        assert!(sink.play(7, "x", &audio()).await.is_ok());
        assert_eq!(sink.name(), "null");
    }
}
