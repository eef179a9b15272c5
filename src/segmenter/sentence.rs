//! Incremental sentence segmentation over a token stream.

use super::rules::{self, CLOSERS, Candidate, TERMINATORS};
use crate::config::SegmenterConfig;
use crate::defaults;
use crate::error::{Result, VoxflowError};
use crate::events::{EventKind, EventSink, payload, preview};
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Turns a growing text buffer into complete sentences as early as possible.
///
/// One instance serves one token stream. Text that has not yet formed a
/// sentence stays buffered until more tokens arrive or [`finish`] flushes it.
///
/// [`finish`]: SentenceSegmenter::finish
pub struct SentenceSegmenter {
    buffer: String,
    min_emit_length: usize,
    preview_chars: usize,
    emitted: usize,
    events: Option<Arc<dyn EventSink>>,
}

impl SentenceSegmenter {
    /// Sentences shorter than `min_emit_length` characters are merged with
    /// what follows instead of being emitted on their own.
    pub fn new(min_emit_length: usize) -> Result<Self> {
        if min_emit_length == 0 {
            return Err(VoxflowError::ConfigInvalidValue {
                key: "segmenter.min_sentence_length".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            buffer: String::new(),
            min_emit_length,
            preview_chars: defaults::SENTENCE_PREVIEW_CHARS,
            emitted: 0,
            events: None,
        })
    }

    pub fn from_config(config: &SegmenterConfig) -> Result<Self> {
        Ok(Self::new(config.min_sentence_length)?.with_preview_chars(config.preview_chars))
    }

    /// Publishes a `sentence_ready` event for every emission.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    pub fn min_emit_length(&self) -> usize {
        self.min_emit_length
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Appends a token and returns every sentence it completed, in order.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut sentences = Vec::new();
        while let Some(end) = self.next_boundary() {
            let sentence = self.buffer[..end].trim().to_string();
            let rest_start = end + (self.buffer[end..].len() - self.buffer[end..].trim_start().len());
            self.buffer.replace_range(..rest_start, "");
            self.announce(&sentence, false);
            sentences.push(sentence);
        }
        sentences
    }

    /// Flushes whatever is left as a final sentence, regardless of length,
    /// and resets the buffer.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let sentence = rest.trim();
        if sentence.is_empty() {
            return None;
        }
        let sentence = sentence.to_string();
        self.announce(&sentence, true);
        Some(sentence)
    }

    /// Segments a complete text in one go.
    pub fn segment_text(&mut self, text: &str) -> Vec<String> {
        let mut sentences = self.push(text);
        sentences.extend(self.finish());
        sentences
    }

    /// Lazily segments a token stream. Consumes the segmenter; a failed
    /// token ends the sentence stream with that error.
    pub fn segment<S>(mut self, tokens: S) -> impl Stream<Item = Result<String>>
    where
        S: Stream<Item = Result<String>>,
    {
        try_stream! {
            let mut tokens = std::pin::pin!(tokens);
            while let Some(token) = tokens.next().await {
                let token = token?;
                for sentence in self.push(&token) {
                    yield sentence;
                }
            }
            if let Some(sentence) = self.finish() {
                yield sentence;
            }
        }
    }

    /// End offset of the first acceptable sentence in the buffer.
    fn next_boundary(&self) -> Option<usize> {
        let buffer = self.buffer.as_str();
        let mut pos = 0;

        while let Some(offset) = buffer[pos..].find(TERMINATORS) {
            let run_start = pos + offset;
            let run_end = run_start
                + buffer[run_start..]
                    .chars()
                    .take_while(|c| TERMINATORS.contains(c))
                    .map(char::len_utf8)
                    .sum::<usize>();
            let end = run_end
                + buffer[run_end..]
                    .chars()
                    .take_while(|c| CLOSERS.contains(c))
                    .map(char::len_utf8)
                    .sum::<usize>();
            let candidate = Candidate {
                buffer,
                run_start,
                run_end,
                end,
            };

            if followed_by_boundary(buffer, end) {
                match rules::suppressing_rule(&candidate) {
                    Some(rule) => {
                        trace!(rule = rule.name, at = run_start, "boundary suppressed");
                    }
                    None if candidate.prefix().trim().chars().count() >= self.min_emit_length => {
                        return Some(end);
                    }
                    None => {}
                }
            }
            pos = end;
        }
        None
    }

    fn announce(&mut self, sentence: &str, is_final: bool) {
        let index = self.emitted;
        self.emitted += 1;
        if let Some(events) = &self.events {
            events.emit(
                EventKind::SentenceReady,
                payload([
                    ("sentence", Value::from(preview(sentence, self.preview_chars))),
                    ("length", Value::from(sentence.chars().count())),
                    ("index", Value::from(index)),
                    ("final", Value::from(is_final)),
                ]),
            );
        }
    }
}

impl std::fmt::Debug for SentenceSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceSegmenter")
            .field("buffer", &self.buffer)
            .field("min_emit_length", &self.min_emit_length)
            .field("emitted", &self.emitted)
            .finish()
    }
}

/// End of buffer, or whitespace followed by an uppercase letter.
fn followed_by_boundary(buffer: &str, end: usize) -> bool {
    let rest = &buffer[end..];
    if rest.is_empty() {
        return true;
    }
    let trimmed = rest.trim_start();
    trimmed.len() < rest.len() && trimmed.chars().next().is_some_and(char::is_uppercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use futures_util::stream;

    fn segmenter(min: usize) -> SentenceSegmenter {
        SentenceSegmenter::new(min).unwrap()
    }

    fn char_by_char(min: usize, text: &str) -> Vec<String> {
        let mut s = segmenter(min);
        let mut out = Vec::new();
        for c in text.chars() {
            out.extend(s.push(&c.to_string()));
        }
        out.extend(s.finish());
        out
    }

    #[test]
    fn test_zero_min_length_rejected() {
        assert!(SentenceSegmenter::new(0).is_err());
    }

    #[test]
    fn test_basic_split() {
        let sentences = segmenter(5).segment_text("Hello! How are you? Fine.");
        assert_eq!(sentences, vec!["Hello!", "How are you?", "Fine."]);
    }

    #[test]
    fn test_basic_split_char_by_char() {
        assert_eq!(
            char_by_char(5, "Hello! How are you? Fine."),
            vec!["Hello!", "How are you?", "Fine."]
        );
    }

    #[test]
    fn test_emits_as_soon_as_boundary_is_visible() {
        let mut s = segmenter(5);
        assert!(s.push("Hello there").is_empty());
        assert_eq!(s.push("! How"), vec!["Hello there!"]);
        assert_eq!(s.pending(), "How");
    }

    #[test]
    fn test_short_sentences_merge_forward() {
        let sentences = segmenter(10).segment_text("Ok. Now we are going home. Bye.");
        assert_eq!(sentences, vec!["Ok. Now we are going home.", "Bye."]);
    }

    #[test]
    fn test_lowercase_after_terminator_is_not_boundary() {
        let sentences = segmenter(3).segment_text("It costs 5 p.m. tomorrow and more.");
        assert_eq!(sentences, vec!["It costs 5 p.m. tomorrow and more."]);
    }

    #[test]
    fn test_decimal_not_split() {
        assert_eq!(
            char_by_char(5, "The value is 3.14. Next sentence."),
            vec!["The value is 3.14.", "Next sentence."]
        );
    }

    #[test]
    fn test_url_not_split_inside() {
        assert_eq!(
            char_by_char(5, "Visit www.example.com. Done."),
            vec!["Visit www.example.com.", "Done."]
        );
    }

    #[test]
    fn test_abbreviation_not_split() {
        assert_eq!(
            char_by_char(5, "Dr. Smith arrived."),
            vec!["Dr. Smith arrived."]
        );
    }

    #[test]
    fn test_ellipsis_not_split_early() {
        assert_eq!(
            char_by_char(5, "Wait... then go."),
            vec!["Wait... then go."]
        );
    }

    #[test]
    fn test_quoted_speech_kept_whole() {
        let sentences =
            char_by_char(5, "He said \"Stop. Now.\" Then he left. Everyone stared.");
        assert_eq!(
            sentences,
            vec![
                "He said \"Stop. Now.\"",
                "Then he left.",
                "Everyone stared."
            ]
        );
    }

    #[test]
    fn test_multiple_punctuation_kept_together() {
        let sentences = segmenter(5).segment_text("Really?! Yes, really.");
        assert_eq!(sentences, vec!["Really?!", "Yes, really."]);
    }

    #[test]
    fn test_finish_flushes_short_remainder() {
        let mut s = segmenter(50);
        assert!(s.push("Hi.").is_empty());
        assert_eq!(s.finish(), Some("Hi.".to_string()));
        assert_eq!(s.pending(), "");
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn test_whitespace_only_remainder_is_dropped() {
        let mut s = segmenter(5);
        s.push("   \n ");
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn test_multibyte_text() {
        let sentences = segmenter(3).segment_text("Ça va? Très bien. Über alles!");
        assert_eq!(sentences, vec!["Ça va?", "Très bien.", "Über alles!"]);
    }

    #[test]
    fn test_sentence_ready_events() {
        let bus = Arc::new(EventBus::new());
        let mut s = segmenter(5)
            .with_events(bus.clone())
            .with_preview_chars(4);

        s.push("Hello there! How");
        s.finish();

        let events = bus.events_of_kind(EventKind::SentenceReady);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("sentence"), Some(&Value::from("Hell")));
        assert_eq!(events[0].get("length"), Some(&Value::from(12)));
        assert_eq!(events[0].get("index"), Some(&Value::from(0)));
        assert_eq!(events[0].get("final"), Some(&Value::from(false)));
        assert_eq!(events[1].get("sentence"), Some(&Value::from("How")));
        assert_eq!(events[1].get("final"), Some(&Value::from(true)));
    }

    #[tokio::test]
    async fn test_segment_stream() {
        let tokens = stream::iter(
            ["Hel", "lo! How ", "are you", "? Fi", "ne."]
                .into_iter()
                .map(|t| Ok(t.to_string())),
        );
        let sentences: Vec<String> = segmenter(5)
            .segment(tokens)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(sentences, vec!["Hello!", "How are you?", "Fine."]);
    }

    #[tokio::test]
    async fn test_segment_stream_propagates_error() {
        let tokens = stream::iter(vec![
            Ok("First sentence here. Sec".to_string()),
            Err(VoxflowError::Generation {
                message: "stream dropped".to_string(),
            }),
            Ok("never seen.".to_string()),
        ]);
        let results: Vec<Result<String>> = segmenter(5).segment(tokens).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "First sentence here.");
        assert!(matches!(results[1], Err(VoxflowError::Generation { .. })));
    }

    #[tokio::test]
    async fn test_segment_empty_stream() {
        let tokens = stream::iter(Vec::<Result<String>>::new());
        let sentences: Vec<Result<String>> = segmenter(5).segment(tokens).collect().await;
        assert!(sentences.is_empty());
    }
}
