//! Text-to-speech capability.

pub mod synthesizer;

pub use synthesizer::{MockSynthesizer, Synthesizer};
