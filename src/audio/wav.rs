//! Sample-level codec work: decoding to f32, downmixing, resampling, and
//! re-encoding as 16-bit WAV.

use crate::audio::buffer::{AudioBuffer, AudioFormat};
use crate::error::{Result, VoxflowError};
use std::io::Cursor;

/// Interleaved samples normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Decodes a buffer to normalized samples.
///
/// WAV and raw PCM16 are supported. MP3 and FLAC are recognized containers
/// but there is no decoder for them, so they fail with a format error.
pub fn decode(buffer: &AudioBuffer) -> Result<DecodedAudio> {
    match buffer.format() {
        AudioFormat::Wav => decode_wav(buffer.bytes()),
        AudioFormat::Pcm => Ok(decode_pcm16(
            buffer.bytes(),
            buffer.sample_rate_hz(),
            buffer.channels(),
        )),
        format @ (AudioFormat::Mp3 | AudioFormat::Flac) => Err(VoxflowError::AudioFormat {
            message: format!("no decoder available for {}", format),
        }),
    }
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| {
        VoxflowError::InvalidAudio {
            message: format!("Failed to parse WAV file: {}", e),
        }
    })?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| VoxflowError::InvalidAudio {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Decodes raw 16-bit little-endian PCM. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> DecodedAudio {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    DecodedAudio {
        samples,
        sample_rate,
        channels,
    }
}

/// Averages every frame's channels into a single mono sample.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
///
/// Output length is `floor(len * to / from)`. Output sample `i` reads source
/// position `i * from / to` and interpolates between the neighbouring source
/// samples. Lower fidelity than a windowed-sinc resampler, but cheap and
/// deterministic.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let output_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * step;
            let lower = (source_pos.floor() as usize).min(last);
            let upper = (source_pos.ceil() as usize).min(last);
            let fraction = (source_pos - lower as f64) as f32;

            let left = samples[lower];
            let right = samples[upper];
            left + (right - left) * fraction
        })
        .collect()
}

/// Encodes interleaved samples as a 16-bit PCM WAV file.
pub fn encode_wav16(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
    for &sample in samples {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .map_err(encode_error)?;
    }
    writer.finalize().map_err(encode_error)?;
    Ok(cursor.into_inner())
}

/// Root-mean-square level of a sample sequence; 0.0 when empty.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

fn encode_error(e: hound::Error) -> VoxflowError {
    VoxflowError::AudioNormalization {
        message: format!("Failed to encode WAV: {}", e),
    }
}
