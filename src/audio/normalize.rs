//! Validation and conversion of incoming audio to the canonical
//! transcription format (16-bit WAV at the target rate and channel count).

use crate::audio::buffer::{AudioBuffer, AudioFormat};
use crate::audio::wav;
use crate::defaults;
use crate::error::{Result, VoxflowError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioNormalizer {
    target_sample_rate_hz: u32,
    target_channels: u16,
    min_duration_ms: f64,
    max_size_mb: f64,
}

impl Default for AudioNormalizer {
    fn default() -> Self {
        Self {
            target_sample_rate_hz: defaults::SAMPLE_RATE,
            target_channels: defaults::CHANNELS,
            min_duration_ms: defaults::MIN_AUDIO_DURATION_MS,
            max_size_mb: defaults::MAX_AUDIO_SIZE_MB,
        }
    }
}

impl AudioNormalizer {
    pub fn new(
        target_sample_rate_hz: u32,
        target_channels: u16,
        min_duration_ms: f64,
        max_size_mb: f64,
    ) -> Result<Self> {
        if target_sample_rate_hz == 0 {
            return Err(invalid("audio.target_sample_rate_hz", "must be positive"));
        }
        if target_channels == 0 {
            return Err(invalid("audio.target_channels", "must be positive"));
        }
        if min_duration_ms < 0.0 {
            return Err(invalid("audio.min_duration_ms", "must not be negative"));
        }
        if max_size_mb <= 0.0 {
            return Err(invalid("audio.max_size_mb", "must be positive"));
        }
        Ok(Self {
            target_sample_rate_hz,
            target_channels,
            min_duration_ms,
            max_size_mb,
        })
    }

    pub fn target_sample_rate_hz(&self) -> u32 {
        self.target_sample_rate_hz
    }

    pub fn target_channels(&self) -> u16 {
        self.target_channels
    }

    /// Checks duration, then size, then container format.
    ///
    /// Duration is only checked when it is known (declared, or derivable
    /// from a WAV header or PCM byte count).
    pub fn validate(&self, buffer: &AudioBuffer) -> Result<()> {
        self.check_limits(buffer)?;
        if !buffer.format().is_container() {
            return Err(VoxflowError::AudioFormat {
                message: format!(
                    "{} is not an accepted container (expected wav, mp3 or flac)",
                    buffer.format()
                ),
            });
        }
        Ok(())
    }

    fn check_limits(&self, buffer: &AudioBuffer) -> Result<()> {
        if let Some(duration_ms) = buffer.effective_duration_ms()
            && duration_ms < self.min_duration_ms
        {
            return Err(VoxflowError::AudioTooShort {
                duration_ms,
                minimum_ms: self.min_duration_ms,
            });
        }
        let size_mb = buffer.size_mb();
        if size_mb > self.max_size_mb {
            return Err(VoxflowError::AudioTooLarge {
                size_mb,
                maximum_mb: self.max_size_mb,
            });
        }
        Ok(())
    }

    fn is_canonical(&self, buffer: &AudioBuffer) -> bool {
        buffer.format() == AudioFormat::Wav
            && buffer.sample_rate_hz() == self.target_sample_rate_hz
            && buffer.channels() == self.target_channels
    }

    /// Converts a buffer to the canonical format.
    ///
    /// A buffer already in canonical form is validated and returned as is.
    /// Validation failures surface unchanged; anything else that goes wrong
    /// during conversion becomes [`VoxflowError::AudioNormalization`].
    pub fn normalize(&self, buffer: AudioBuffer) -> Result<AudioBuffer> {
        if self.is_canonical(&buffer) {
            self.validate(&buffer)?;
            return Ok(buffer);
        }

        self.check_limits(&buffer)?;
        let normalized = self.convert(&buffer).map_err(|e| match e {
            VoxflowError::AudioFormat { .. }
            | VoxflowError::AudioTooShort { .. }
            | VoxflowError::AudioTooLarge { .. } => e,
            other => VoxflowError::AudioNormalization {
                message: other.to_string(),
            },
        })?;
        self.validate(&normalized)?;

        debug!(
            from_rate = buffer.sample_rate_hz(),
            from_channels = buffer.channels(),
            from_format = %buffer.format(),
            to_rate = normalized.sample_rate_hz(),
            size_bytes = normalized.size_bytes(),
            "normalized audio"
        );
        Ok(normalized)
    }

    fn convert(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        let decoded = wav::decode(buffer)?;

        let samples = if self.target_channels == 1 && decoded.channels > 1 {
            wav::downmix(&decoded.samples, decoded.channels)
        } else if decoded.channels != self.target_channels {
            return Err(VoxflowError::AudioNormalization {
                message: format!(
                    "cannot convert {} channels to {}",
                    decoded.channels, self.target_channels
                ),
            });
        } else {
            decoded.samples
        };

        let samples = if self.target_channels == 1 {
            wav::resample(&samples, decoded.sample_rate, self.target_sample_rate_hz)
        } else {
            resample_interleaved(
                &samples,
                self.target_channels,
                decoded.sample_rate,
                self.target_sample_rate_hz,
            )
        };

        AudioBuffer::from_samples(&samples, self.target_sample_rate_hz, self.target_channels)
    }

    /// True when the buffer's RMS level is below `threshold`.
    ///
    /// Undecodable or empty audio is reported as not silent.
    pub fn detect_silence(&self, buffer: &AudioBuffer, threshold: f32) -> bool {
        detect_silence(buffer, threshold)
    }
}

/// True when the buffer's RMS level is below `threshold`.
///
/// Undecodable or empty audio is reported as not silent.
pub fn detect_silence(buffer: &AudioBuffer, threshold: f32) -> bool {
    match wav::decode(buffer) {
        Ok(decoded) if !decoded.samples.is_empty() => wav::rms(&decoded.samples) < threshold,
        Ok(_) => false,
        Err(e) => {
            debug!(error = %e, "silence detection could not decode audio");
            false
        }
    }
}

fn resample_interleaved(samples: &[f32], channels: u16, from: u32, to: u32) -> Vec<f32> {
    let channels = channels as usize;
    let per_channel: Vec<Vec<f32>> = (0..channels)
        .map(|c| {
            let channel: Vec<f32> = samples.iter().skip(c).step_by(channels).copied().collect();
            wav::resample(&channel, from, to)
        })
        .collect();
    let frames = per_channel.iter().map(Vec::len).min().unwrap_or(0);
    let per_channel = &per_channel;
    (0..frames)
        .flat_map(move |i| per_channel.iter().map(move |channel| channel[i]))
        .collect()
}

fn invalid(key: &str, message: &str) -> VoxflowError {
    VoxflowError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_too_short_carries_actual_and_minimum() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::new(vec![0; 1600], 16000, 1, AudioFormat::Wav)
            .unwrap()
            .with_duration_ms(50.0);

        match normalizer.validate(&buffer) {
            Err(VoxflowError::AudioTooShort {
                duration_ms,
                minimum_ms,
            }) => {
                assert_eq!(duration_ms, 50.0);
                assert_eq!(minimum_ms, 100.0);
            }
            other => panic!("Expected AudioTooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_too_large_carries_sizes_in_mb() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::new(vec![0; 26 * 1024 * 1024], 16000, 1, AudioFormat::Wav)
            .unwrap()
            .with_duration_ms(5000.0);

        match normalizer.validate(&buffer) {
            Err(VoxflowError::AudioTooLarge {
                size_mb,
                maximum_mb,
            }) => {
                assert_eq!(size_mb, 26.0);
                assert_eq!(maximum_mb, 25.0);
            }
            other => panic!("Expected AudioTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_duration_checked_before_size() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::new(vec![0; 26 * 1024 * 1024], 16000, 1, AudioFormat::Wav)
            .unwrap()
            .with_duration_ms(10.0);
        assert!(matches!(
            normalizer.validate(&buffer),
            Err(VoxflowError::AudioTooShort { .. })
        ));
    }

    #[test]
    fn test_pcm_is_not_an_accepted_container() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::pcm16(vec![0; 16000], 16000, 1).unwrap();
        assert!(matches!(
            normalizer.validate(&buffer),
            Err(VoxflowError::AudioFormat { .. })
        ));
    }

    #[test]
    fn test_canonical_buffer_returned_unchanged() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::from_samples(&vec![0.1; 3200], 16000, 1).unwrap();
        let normalized = normalizer.normalize(buffer.clone()).unwrap();
        assert_eq!(normalized, buffer);
    }

    #[test]
    fn test_resample_48k_stereo_to_16k_mono() {
        let normalizer = AudioNormalizer::default();
        // 2 seconds of 48kHz stereo
        let buffer = AudioBuffer::from_samples(&vec![0.2; 48000 * 2 * 2], 48000, 2).unwrap();

        let normalized = normalizer.normalize(buffer).unwrap();

        assert_eq!(normalized.channels(), 1);
        assert_eq!(normalized.sample_rate_hz(), 16000);
        assert_eq!(normalized.format(), AudioFormat::Wav);
        let duration = normalized.effective_duration_ms().unwrap();
        let sample_period_ms = 1000.0 / 16000.0;
        assert!((duration - 2000.0).abs() <= sample_period_ms);
    }

    #[test]
    fn test_pcm_input_is_wrapped_as_wav() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::pcm16(pcm_bytes(&vec![1000i16; 8000]), 8000, 1).unwrap();

        let normalized = normalizer.normalize(buffer).unwrap();

        assert_eq!(normalized.format(), AudioFormat::Wav);
        assert_eq!(normalized.sample_rate_hz(), 16000);
        let duration = normalized.effective_duration_ms().unwrap();
        assert!((duration - 1000.0).abs() < 0.1);
    }

    #[test]
    fn test_normalize_rejects_short_input_before_decoding() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::pcm16(pcm_bytes(&[0i16; 160]), 16000, 1).unwrap();
        assert!(matches!(
            normalizer.normalize(buffer),
            Err(VoxflowError::AudioTooShort { .. })
        ));
    }

    #[test]
    fn test_normalize_compressed_is_format_error() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::new(vec![0xFF; 4096], 44100, 2, AudioFormat::Mp3)
            .unwrap()
            .with_duration_ms(1000.0);
        let err = normalizer.normalize(buffer).unwrap_err();
        assert!(matches!(err, VoxflowError::AudioFormat { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_normalize_corrupt_wav_is_normalization_error() {
        let normalizer = AudioNormalizer::default();
        let buffer = AudioBuffer::new(vec![7; 4096], 44100, 1, AudioFormat::Wav)
            .unwrap()
            .with_duration_ms(1000.0);
        assert!(matches!(
            normalizer.normalize(buffer),
            Err(VoxflowError::AudioNormalization { .. })
        ));
    }

    #[test]
    fn test_stereo_target_resamples_each_channel() {
        let normalizer = AudioNormalizer::new(8000, 2, 100.0, 25.0).unwrap();
        let mut samples = Vec::new();
        for _ in 0..16000 {
            samples.push(0.5);
            samples.push(-0.5);
        }
        let buffer = AudioBuffer::from_samples(&samples, 16000, 2).unwrap();

        let normalized = normalizer.normalize(buffer).unwrap();
        let decoded = wav::decode(&normalized).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frames(), 8000);
        assert!(decoded.samples[0] > 0.49);
        assert!(decoded.samples[1] < -0.49);
    }

    #[test]
    fn test_silence_all_zero_is_silent() {
        let buffer = AudioBuffer::pcm16(vec![0; 32000], 16000, 1).unwrap();
        assert!(detect_silence(&buffer, 0.01));
    }

    #[test]
    fn test_silence_alternating_signal_is_not_silent() {
        let samples: Vec<i16> = (0..16000)
            .map(|i| if i % 2 == 0 { 1000 } else { -1000 })
            .collect();
        let buffer = AudioBuffer::pcm16(pcm_bytes(&samples), 16000, 1).unwrap();
        // RMS = 1000/32768 ~= 0.0305
        assert!(!detect_silence(&buffer, 0.01));
    }

    #[test]
    fn test_silence_undecodable_is_not_silent() {
        let buffer = AudioBuffer::new(vec![0; 64], 16000, 1, AudioFormat::Mp3).unwrap();
        assert!(!AudioNormalizer::default().detect_silence(&buffer, 0.01));
    }

    #[test]
    fn test_new_rejects_invalid_targets() {
        assert!(AudioNormalizer::new(0, 1, 100.0, 25.0).is_err());
        assert!(AudioNormalizer::new(16000, 0, 100.0, 25.0).is_err());
        assert!(AudioNormalizer::new(16000, 1, -1.0, 25.0).is_err());
        assert!(AudioNormalizer::new(16000, 1, 100.0, 0.0).is_err());
    }
}
