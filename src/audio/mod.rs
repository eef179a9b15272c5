//! Audio buffers, WAV codec helpers, and normalization to the canonical
//! transcription format.

pub mod buffer;
pub mod normalize;
pub mod wav;

pub use buffer::{AudioBuffer, AudioFormat};
pub use normalize::{AudioNormalizer, detect_silence};
