//! Streaming text generation capability and conversation state.

pub mod generator;
pub mod history;

pub use generator::{Generator, MockGenerator, TokenStream, tokenize_words};
pub use history::{ConversationHistory, Role, Turn};
