use super::history::ConversationHistory;
use crate::error::{Result, VoxflowError};
use async_stream::stream;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Text fragments of one generation, in arrival order.
///
/// A fragment may take arbitrarily long to arrive; callers that cannot wait
/// forever bound each `next()` themselves.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for streaming text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Starts generating a reply to `prompt` given the prior conversation.
    ///
    /// Errors returned here mean the request itself failed; errors inside
    /// the stream mean it failed midway.
    async fn generate(&self, prompt: &str, history: &ConversationHistory) -> Result<TokenStream>;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate(&self, prompt: &str, history: &ConversationHistory) -> Result<TokenStream> {
        (**self).generate(prompt, history).await
    }
}

/// Splits text into word tokens with a separate `" "` token between words,
/// the way a streaming API delivers them.
pub fn tokenize_words(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            tokens.push(" ".to_string());
        }
        tokens.push(word.to_string());
    }
    tokens
}

/// Mock generator that streams predefined responses.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    response: String,
    /// (case-insensitive substring of the prompt, response), first match wins.
    responses: Vec<(String, String)>,
    token_delay: Duration,
    stall_after: Option<usize>,
    fail_after: Option<usize>,
    transient_failures: Arc<AtomicU32>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
    history_lens: Arc<Mutex<Vec<usize>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            response: "Hello! I'm your voice assistant. How can I help you today?".to_string(),
            responses: Vec::new(),
            token_delay: Duration::ZERO,
            stall_after: None,
            fail_after: None,
            transient_failures: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            history_lens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Response used when no prompt pattern matches.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Answers prompts containing `pattern` (case-insensitive) with `response`.
    pub fn with_prompt_response(mut self, pattern: &str, response: &str) -> Self {
        self.responses
            .push((pattern.to_lowercase(), response.to_string()));
        self
    }

    /// Delay before each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Stops producing tokens after `tokens` without ending the stream.
    pub fn with_stall_after(mut self, tokens: usize) -> Self {
        self.stall_after = Some(tokens);
        self
    }

    /// Yields a `Generation` error after `tokens` tokens.
    pub fn with_failure_after(mut self, tokens: usize) -> Self {
        self.fail_after = Some(tokens);
        self
    }

    /// The first `count` generate calls fail with a retryable `Unavailable` error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// History length seen by each call.
    pub fn history_lens(&self) -> Vec<usize> {
        self.history_lens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn response_for(&self, prompt: &str) -> &str {
        let prompt = prompt.to_lowercase();
        self.responses
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, response)| response.as_str())
            .unwrap_or(&self.response)
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str, history: &ConversationHistory) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.history_lens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(history.len());

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(VoxflowError::Unavailable {
                service: "llm".to_string(),
                message: "mock connection reset".to_string(),
            });
        }

        let tokens = tokenize_words(self.response_for(prompt));
        let delay = self.token_delay;
        let stall_after = self.stall_after;
        let fail_after = self.fail_after;

        Ok(Box::pin(stream! {
            for (i, token) in tokens.into_iter().enumerate() {
                if stall_after == Some(i) {
                    std::future::pending::<()>().await;
                }
                if fail_after == Some(i) {
                    yield Err(VoxflowError::Generation {
                        message: "mock stream interrupted".to_string(),
                    });
                    return;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(token);
            }
        }))
    }
}
