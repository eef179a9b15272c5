use crate::audio::wav;
use crate::error::{Result, VoxflowError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::io::Cursor;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Container format of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    /// Raw 16-bit little-endian samples, no header.
    Pcm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Pcm => "pcm",
        }
    }

    /// Containers accepted by upstream transcription services.
    pub fn is_container(&self) -> bool {
        matches!(self, AudioFormat::Wav | AudioFormat::Mp3 | AudioFormat::Flac)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded audio plus the parameters needed to interpret it.
///
/// Bytes are never empty and rate/channels are strictly positive;
/// [`AudioBuffer::new`] rejects anything else.
#[derive(Clone, PartialEq)]
pub struct AudioBuffer {
    bytes: Vec<u8>,
    sample_rate_hz: u32,
    channels: u16,
    format: AudioFormat,
    duration_ms: Option<f64>,
}

impl AudioBuffer {
    pub fn new(
        bytes: Vec<u8>,
        sample_rate_hz: u32,
        channels: u16,
        format: AudioFormat,
    ) -> Result<Self> {
        if bytes.is_empty() {
            return Err(invalid("audio data is empty"));
        }
        if sample_rate_hz == 0 {
            return Err(invalid("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(invalid("channel count must be positive"));
        }
        Ok(Self {
            bytes,
            sample_rate_hz,
            channels,
            format,
            duration_ms: None,
        })
    }

    /// A WAV buffer whose rate and channels are read from its header.
    pub fn wav(bytes: Vec<u8>) -> Result<Self> {
        let spec = hound::WavReader::new(Cursor::new(&bytes))
            .map_err(|e| invalid(&format!("failed to parse WAV header: {}", e)))?
            .spec();
        Self::new(bytes, spec.sample_rate, spec.channels, AudioFormat::Wav)
    }

    /// Raw 16-bit little-endian PCM.
    pub fn pcm16(bytes: Vec<u8>, sample_rate_hz: u32, channels: u16) -> Result<Self> {
        Self::new(bytes, sample_rate_hz, channels, AudioFormat::Pcm)
    }

    /// Encodes interleaved samples in [-1.0, 1.0] as a 16-bit WAV buffer.
    pub fn from_samples(samples: &[f32], sample_rate_hz: u32, channels: u16) -> Result<Self> {
        let bytes = wav::encode_wav16(samples, sample_rate_hz, channels)?;
        let frames = samples.len() / channels.max(1) as usize;
        let duration_ms = frames as f64 * 1000.0 / sample_rate_hz.max(1) as f64;
        Ok(Self::new(bytes, sample_rate_hz, channels, AudioFormat::Wav)?.with_duration_ms(duration_ms))
    }

    /// Attaches a known duration, which takes precedence over computed ones.
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Declared duration only.
    pub fn duration_ms(&self) -> Option<f64> {
        self.duration_ms
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn size_kb(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0
    }

    pub fn size_mb(&self) -> f64 {
        self.bytes.len() as f64 / BYTES_PER_MB
    }

    /// Duration implied by the raw byte count at the given sample width.
    pub fn calculate_duration_ms(&self, bits_per_sample: u16) -> f64 {
        let bytes_per_frame = (bits_per_sample as f64 / 8.0) * self.channels as f64;
        if bytes_per_frame <= 0.0 {
            return 0.0;
        }
        let frames = self.bytes.len() as f64 / bytes_per_frame;
        frames * 1000.0 / self.sample_rate_hz as f64
    }

    /// Declared duration, else the WAV header duration, else the PCM byte count.
    /// Compressed formats without a declared duration return `None`.
    pub fn effective_duration_ms(&self) -> Option<f64> {
        if let Some(ms) = self.duration_ms {
            return Some(ms);
        }
        match self.format {
            AudioFormat::Wav => {
                let reader = hound::WavReader::new(Cursor::new(&self.bytes)).ok()?;
                let rate = reader.spec().sample_rate;
                if rate == 0 {
                    return None;
                }
                Some(reader.duration() as f64 * 1000.0 / rate as f64)
            }
            AudioFormat::Pcm => Some(self.calculate_duration_ms(16)),
            AudioFormat::Mp3 | AudioFormat::Flac => None,
        }
    }

    /// Descriptive fields without the raw bytes, for events and logs.
    pub fn metadata(&self) -> Value {
        json!({
            "format": self.format.as_str(),
            "sample_rate_hz": self.sample_rate_hz,
            "channels": self.channels,
            "size_bytes": self.bytes.len(),
            "duration_ms": self.effective_duration_ms(),
        })
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("format", &self.format)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("channels", &self.channels)
            .field("size_bytes", &self.bytes.len())
            .field("duration_ms", &self.duration_ms)
            .finish()
    }
}

fn invalid(message: &str) -> VoxflowError {
    VoxflowError::InvalidAudio {
        message: message.to_string(),
    }
}
