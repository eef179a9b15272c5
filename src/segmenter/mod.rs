//! Sentence segmentation for streamed LLM output.

pub mod rules;
pub mod sentence;

pub use sentence::SentenceSegmenter;
