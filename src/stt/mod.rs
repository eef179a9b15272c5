//! Speech-to-text capability.

pub mod transcriber;

pub use transcriber::{MockTranscriber, Transcriber};
