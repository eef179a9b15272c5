//! One coordinated run: transcription, generation, segmentation, concurrent
//! synthesis and ordered playback.

use super::playback::PlaybackQueue;
use super::sink::{AudioSink, NullAudioSink};
use crate::audio::{AudioBuffer, AudioNormalizer};
use crate::config::{Config, PipelineConfig, SegmenterConfig};
use crate::defaults;
use crate::error::{Result, Stage, VoxflowError};
use crate::events::latency::{self, LatencyBreakdown, format_duration};
use crate::events::{EventBus, EventKind, PipelineEvent, payload, preview};
use crate::llm::{ConversationHistory, Generator, TokenStream};
use crate::resilience::{RateLimiter, RetryExecutor};
use crate::segmenter::SentenceSegmenter;
use crate::stt::Transcriber;
use crate::tts::Synthesizer;
use async_stream::try_stream;
use futures_util::future::{BoxFuture, FutureExt, OptionFuture};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Characters of a token kept in the first-token event.
const TOKEN_PREVIEW_CHARS: usize = 50;

/// Lifecycle of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Complete,
    Failed,
    Cancelled,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Every emitted sentence, in emission order.
    pub sentences: Vec<String>,
    /// Set for runs that started from audio.
    pub transcript: Option<String>,
    /// Sentences whose synthesis completed.
    pub synthesized: usize,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// The generated reply reassembled from its sentences.
    pub fn response(&self) -> String {
        self.sentences.join(" ")
    }
}

/// A failure tagged with the stage it left.
#[derive(Debug)]
struct StageError {
    stage: Stage,
    error: VoxflowError,
}

impl StageError {
    fn new(stage: Stage, error: VoxflowError) -> Self {
        Self { stage, error }
    }
}

type StageResult<T> = std::result::Result<T, StageError>;

enum Interrupt {
    Cancelled(&'static str),
    Failed(StageError),
}

enum Input {
    Text(String),
    Audio(AudioBuffer),
}

struct Synthesized {
    index: usize,
    sentence: String,
    audio: AudioBuffer,
}

/// Wires the capabilities together. Build with [`Pipeline::builder`].
///
/// A pipeline may serve many runs; only the conversation history carries
/// over from one run to the next.
pub struct Pipeline {
    transcriber: Option<Arc<dyn Transcriber>>,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    events: Arc<EventBus>,
    history: Arc<Mutex<ConversationHistory>>,
    retry: RetryExecutor,
    rate_limiter: Option<Arc<RateLimiter>>,
    normalizer: AudioNormalizer,
    silence_threshold: f32,
    segmenter: SegmenterConfig,
    config: PipelineConfig,
    state: std::sync::Mutex<PipelineState>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Speaks a reply to `text`.
    pub async fn run_text(&self, text: &str) -> Result<RunOutcome> {
        self.run_text_with_cancel(text, CancellationToken::new())
            .await
    }

    pub async fn run_text_with_cancel(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        self.run(Input::Text(text.to_string()), cancel).await
    }

    /// Transcribes `audio`, speaks a reply to the transcript and returns
    /// the transcript.
    pub async fn run_audio(&self, audio: AudioBuffer) -> Result<String> {
        self.run_audio_with_cancel(audio, CancellationToken::new())
            .await
    }

    pub async fn run_audio_with_cancel(
        &self,
        audio: AudioBuffer,
        cancel: CancellationToken,
    ) -> Result<String> {
        let outcome = self.run(Input::Audio(audio), cancel).await?;
        Ok(outcome.transcript.unwrap_or_default())
    }

    /// All events recorded so far, in emission order.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.snapshot()
    }

    pub fn latency_breakdown(&self) -> LatencyBreakdown {
        self.events.latency_breakdown()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the conversation so far.
    pub async fn history(&self) -> ConversationHistory {
        self.history.lock().await.clone()
    }

    /// Starts a new session.
    pub async fn reset_history(&self) {
        self.history.lock().await.clear();
    }

    /// True when `audio` is quieter than the configured silence threshold.
    pub fn is_silent(&self, audio: &AudioBuffer) -> bool {
        self.normalizer.detect_silence(audio, self.silence_threshold)
    }

    async fn run(&self, input: Input, cancel: CancellationToken) -> Result<RunOutcome> {
        self.set_state(PipelineState::Running);
        let started = Instant::now();

        let (mode, summary) = match &input {
            Input::Text(text) => ("text", Value::from(self.preview(text))),
            Input::Audio(audio) => ("audio", audio.metadata()),
        };
        self.events.publish(
            EventKind::PipelineStart,
            payload([("mode", Value::from(mode)), ("input", summary)]),
        );
        debug!(mode, "pipeline run started");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled("cancelled")),
            _ = deadline(self.config.run_timeout()) => Err(Interrupt::Cancelled("timeout")),
            outcome = self.drive(input, started) => outcome.map_err(Interrupt::Failed),
        };

        let elapsed = started.elapsed();
        match result {
            Ok(outcome) => {
                self.events.publish(
                    EventKind::PipelineComplete,
                    payload([
                        ("latency_ms", Value::from(millis(elapsed))),
                        ("sentences", Value::from(outcome.sentences.len())),
                        ("synthesized", Value::from(outcome.synthesized)),
                    ]),
                );
                self.set_state(PipelineState::Complete);
                info!(
                    sentences = outcome.sentences.len(),
                    elapsed = %format_duration(elapsed),
                    "pipeline run complete"
                );
                latency::log_summary(&self.events.latency_breakdown());
                Ok(RunOutcome { elapsed, ..outcome })
            }
            Err(Interrupt::Failed(failure)) if failure.error.is_cancelled() => {
                self.cancelled("cancelled", elapsed)
            }
            Err(Interrupt::Cancelled(reason)) => self.cancelled(reason, elapsed),
            Err(Interrupt::Failed(StageError { stage, error })) => {
                self.events.publish(
                    EventKind::PipelineError,
                    payload([
                        ("stage", Value::from(stage.as_str())),
                        ("error_kind", Value::from(error.name())),
                        ("category", Value::from(error.kind().as_str())),
                        ("error", Value::from(error.to_string())),
                        ("latency_ms", Value::from(millis(elapsed))),
                    ]),
                );
                self.set_state(PipelineState::Failed);
                warn!(stage = %stage, error = %error, "pipeline run failed");
                Err(error)
            }
        }
    }

    fn cancelled(&self, reason: &'static str, elapsed: Duration) -> Result<RunOutcome> {
        self.events.publish(
            EventKind::PipelineCancelled,
            payload([
                ("reason", Value::from(reason)),
                ("latency_ms", Value::from(millis(elapsed))),
            ]),
        );
        self.set_state(PipelineState::Cancelled);
        info!(reason, "pipeline run cancelled");
        Err(VoxflowError::Cancelled)
    }

    async fn drive(&self, input: Input, started: Instant) -> StageResult<RunOutcome> {
        let (prompt, transcript) = match input {
            Input::Text(text) => (text, None),
            Input::Audio(audio) => {
                let transcript = self.transcribe(audio).await?;
                (transcript.clone(), Some(transcript))
            }
        };

        // Generation reads a snapshot; the lock is not held while streaming.
        let history = self.history.lock().await.clone();
        let query_started = Instant::now();
        let tokens = self.request_generation(&prompt, &history).await?;

        let segmenter = SentenceSegmenter::from_config(&self.segmenter)
            .map_err(|e| StageError::new(Stage::Segmentation, e))?
            .with_events(self.events.clone());
        let sentences = segmenter.segment(self.instrument(tokens, query_started));

        let mut tasks = JoinSet::new();
        let result = self.dispatch_and_play(sentences, &mut tasks).await;
        if result.is_err() && !tasks.is_empty() {
            debug!(outstanding = tasks.len(), "aborting outstanding synthesis tasks");
            tasks.abort_all();
        }
        let (sentences, synthesized) = result?;

        self.history
            .lock()
            .await
            .record_exchange(prompt, sentences.join(" "));

        Ok(RunOutcome {
            sentences,
            transcript,
            synthesized,
            elapsed: started.elapsed(),
        })
    }

    async fn transcribe(&self, audio: AudioBuffer) -> StageResult<String> {
        let transcriber = self.transcriber.as_ref().ok_or_else(|| {
            self.stt_failed(
                Stage::Transcription,
                VoxflowError::Transcription {
                    message: "no transcriber configured".to_string(),
                },
                None,
            )
        })?;
        let audio = self
            .normalizer
            .normalize(audio)
            .map_err(|e| self.stt_failed(Stage::Normalization, e, None))?;

        self.events.publish(
            EventKind::SttStart,
            payload([
                ("audio_duration_ms", Value::from(audio.effective_duration_ms())),
                ("audio_size_kb", Value::from(audio.size_kb())),
                ("format", Value::from(audio.format().as_str())),
            ]),
        );

        let started = Instant::now();
        let limiter = self.rate_limiter.as_deref();
        let audio = &audio;
        let result = self
            .retry
            .execute(
                move || async move {
                    if let Some(limiter) = limiter {
                        limiter.acquire(defaults::RATE_LIMIT_TOKENS_PER_CALL).await?;
                    }
                    transcriber.transcribe(audio).await
                },
                VoxflowError::is_retryable,
            )
            .await
            .and_then(|text| {
                let text = text.trim();
                if text.is_empty() {
                    Err(VoxflowError::EmptyTranscript)
                } else {
                    Ok(text.to_string())
                }
            });

        let latency_ms = millis(started.elapsed());
        match result {
            Ok(text) => {
                self.events.publish(
                    EventKind::SttComplete,
                    payload([
                        ("text", Value::from(self.preview(&text))),
                        ("text_length", Value::from(text.chars().count())),
                        ("latency_ms", Value::from(latency_ms)),
                    ]),
                );
                Ok(text)
            }
            Err(error) => Err(self.stt_failed(Stage::Transcription, error, Some(latency_ms))),
        }
    }

    /// Reports a failure on the way to a transcript. Audio rejected before
    /// the transcriber is called carries no latency.
    fn stt_failed(&self, stage: Stage, error: VoxflowError, latency_ms: Option<f64>) -> StageError {
        self.events.publish(
            EventKind::SttError,
            payload([
                ("stage", Value::from(stage.as_str())),
                ("error_kind", Value::from(error.name())),
                ("error", Value::from(error.to_string())),
                ("latency_ms", Value::from(latency_ms)),
            ]),
        );
        StageError::new(stage, error)
    }

    async fn request_generation(
        &self,
        prompt: &str,
        history: &ConversationHistory,
    ) -> StageResult<TokenStream> {
        self.events.publish(
            EventKind::LlmQueryStart,
            payload([
                ("query", Value::from(self.preview(prompt))),
                ("history_turns", Value::from(history.len())),
            ]),
        );

        let generator = &self.generator;
        self.retry
            .execute(
                move || generator.generate(prompt, history),
                VoxflowError::is_retryable,
            )
            .await
            .map_err(|error| {
                self.events.publish(
                    EventKind::LlmError,
                    payload([
                        ("error_kind", Value::from(error.name())),
                        ("error", Value::from(error.to_string())),
                    ]),
                );
                StageError::new(Stage::Generation, error)
            })
    }

    /// Bounds each fragment by the token timeout and reports the first
    /// token, the end of generation and mid-stream failures.
    fn instrument(
        &self,
        tokens: TokenStream,
        started: Instant,
    ) -> impl Stream<Item = Result<String>> + Send + 'static {
        let events = Arc::clone(&self.events);
        let token_timeout = self.config.token_timeout();

        try_stream! {
            let mut tokens = tokens;
            let mut count = 0usize;
            loop {
                let next = match token_timeout {
                    Some(limit) => tokio::time::timeout(limit, tokens.next())
                        .await
                        .unwrap_or_else(|_| {
                            Some(Err(VoxflowError::Timeout {
                                operation: "llm token".to_string(),
                                timeout_ms: limit.as_millis() as u64,
                            }))
                        }),
                    None => tokens.next().await,
                };
                let token = match next {
                    Some(Ok(token)) => token,
                    Some(Err(error)) => {
                        events.publish(
                            EventKind::LlmError,
                            payload([
                                ("error_kind", Value::from(error.name())),
                                ("error", Value::from(error.to_string())),
                                ("tokens_received", Value::from(count)),
                            ]),
                        );
                        Err::<String, VoxflowError>(error)?
                    }
                    None => break,
                };
                if count == 0 {
                    events.publish(
                        EventKind::LlmTokenReceived,
                        payload([
                            ("token", Value::from(preview(&token, TOKEN_PREVIEW_CHARS))),
                            ("latency_ms", Value::from(millis(started.elapsed()))),
                        ]),
                    );
                }
                count += 1;
                yield token;
            }
            events.publish(
                EventKind::LlmComplete,
                payload([
                    ("total_tokens", Value::from(count)),
                    ("latency_ms", Value::from(millis(started.elapsed()))),
                ]),
            );
        }
    }

    /// Pulls sentences and launches one synthesis task per sentence without
    /// waiting for earlier ones. Released audio plays one buffer at a time
    /// on its own branch, so a sentence that is still playing never holds
    /// back token consumption or the next dispatch. Returns once the sentence
    /// stream is exhausted, every task has been joined and playback drained.
    async fn dispatch_and_play<S>(
        &self,
        sentences: S,
        tasks: &mut JoinSet<StageResult<Synthesized>>,
    ) -> StageResult<(Vec<String>, usize)>
    where
        S: Stream<Item = Result<String>>,
    {
        let mut sentences = std::pin::pin!(sentences);
        let mut queue = PlaybackQueue::new(self.config.playback_order);
        let mut ready: VecDeque<Synthesized> = VecDeque::new();
        let mut playing: Option<BoxFuture<'_, StageResult<()>>> = None;
        let mut emitted = Vec::new();
        let mut synthesized = 0usize;
        let mut exhausted = false;

        loop {
            if playing.is_none()
                && let Some(item) = ready.pop_front()
            {
                playing = Some(self.play(item).boxed());
            }

            tokio::select! {
                next = sentences.next(), if !exhausted => match next {
                    Some(Ok(sentence)) => {
                        self.dispatch(tasks, emitted.len(), sentence.clone());
                        emitted.push(sentence);
                    }
                    Some(Err(error)) => return Err(StageError::new(Stage::Generation, error)),
                    None => exhausted = true,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let done = joined.map_err(|e| {
                        StageError::new(
                            Stage::Synthesis,
                            VoxflowError::Synthesis {
                                message: format!("synthesis task failed: {}", e),
                            },
                        )
                    })??;
                    synthesized += 1;
                    ready.extend(queue.push(done.index, done).into_iter().map(|(_, item)| item));
                }
                Some(played) = OptionFuture::from(playing.as_mut()), if playing.is_some() => {
                    playing = None;
                    played?;
                }
                else => break,
            }
        }

        if !queue.is_drained() {
            warn!(held = queue.pending_len(), "playback queue not drained at end of run");
        }
        Ok((emitted, synthesized))
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<StageResult<Synthesized>>,
        index: usize,
        sentence: String,
    ) {
        self.events.publish(
            EventKind::TtsStart,
            payload([
                ("index", Value::from(index)),
                ("text", Value::from(self.preview(&sentence))),
                ("text_length", Value::from(sentence.chars().count())),
            ]),
        );
        debug!(index, "dispatching synthesis");

        let synthesizer = Arc::clone(&self.synthesizer);
        let limiter = self.rate_limiter.clone();
        let retry = self.retry.clone();
        let events = Arc::clone(&self.events);

        tasks.spawn(async move {
            let started = Instant::now();
            let result = {
                let synthesizer = &synthesizer;
                let limiter = limiter.as_deref();
                let text = sentence.as_str();
                retry
                    .execute(
                        move || async move {
                            if let Some(limiter) = limiter {
                                limiter.acquire(defaults::RATE_LIMIT_TOKENS_PER_CALL).await?;
                            }
                            synthesizer.synthesize(text).await
                        },
                        VoxflowError::is_retryable,
                    )
                    .await
            };

            let latency_ms = millis(started.elapsed());
            match result {
                Ok(audio) => {
                    events.publish(
                        EventKind::TtsComplete,
                        payload([
                            ("index", Value::from(index)),
                            ("latency_ms", Value::from(latency_ms)),
                            ("audio_size_kb", Value::from(audio.size_kb())),
                            ("audio_duration_ms", Value::from(audio.effective_duration_ms())),
                        ]),
                    );
                    Ok(Synthesized {
                        index,
                        sentence,
                        audio,
                    })
                }
                Err(error) => {
                    events.publish(
                        EventKind::TtsError,
                        payload([
                            ("index", Value::from(index)),
                            ("error_kind", Value::from(error.name())),
                            ("error", Value::from(error.to_string())),
                            ("latency_ms", Value::from(latency_ms)),
                        ]),
                    );
                    Err(StageError::new(Stage::Synthesis, error))
                }
            }
        });
    }

    async fn play(&self, item: Synthesized) -> StageResult<()> {
        let started = Instant::now();
        self.sink
            .play(item.index, &item.sentence, &item.audio)
            .await
            .map_err(|e| StageError::new(Stage::Playback, e))?;
        self.events.publish(
            EventKind::PlaybackComplete,
            payload([
                ("index", Value::from(item.index)),
                ("sink", Value::from(self.sink.name())),
                ("latency_ms", Value::from(millis(started.elapsed()))),
            ]),
        );
        Ok(())
    }

    fn preview(&self, text: &str) -> String {
        preview(text, self.segmenter.preview_chars)
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("sink", &self.sink.name())
            .field("rate_limited", &self.rate_limiter.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`Pipeline`]. A generator and a synthesizer are required.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Config,
    transcriber: Option<Arc<dyn Transcriber>>,
    generator: Option<Arc<dyn Generator>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    sink: Option<Arc<dyn AudioSink>>,
    events: Option<Arc<EventBus>>,
    history: Option<Arc<Mutex<ConversationHistory>>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn transcriber<T: Transcriber + 'static>(mut self, transcriber: T) -> Self {
        self.transcriber = Some(Arc::new(transcriber));
        self
    }

    pub fn generator<G: Generator + 'static>(mut self, generator: G) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn synthesizer<S: Synthesizer + 'static>(mut self, synthesizer: S) -> Self {
        self.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    /// Defaults to discarding audio.
    pub fn sink<K: AudioSink + 'static>(mut self, sink: K) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Publishes into an existing bus instead of a fresh one.
    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Shares one conversation between pipelines.
    pub fn history(mut self, history: Arc<Mutex<ConversationHistory>>) -> Self {
        self.history = Some(history);
        self
    }

    /// Shares one limiter between pipelines; overrides `[rate_limit]`.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let PipelineBuilder {
            config,
            transcriber,
            generator,
            synthesizer,
            sink,
            events,
            history,
            rate_limiter,
        } = self;

        config.validate()?;
        let generator = generator.ok_or_else(|| missing("generator"))?;
        let synthesizer = synthesizer.ok_or_else(|| missing("synthesizer"))?;
        let rate_limiter = match rate_limiter {
            Some(limiter) => Some(limiter),
            None => config.rate_limit.build()?.map(Arc::new),
        };
        if let Some(limiter) = &rate_limiter
            && limiter.capacity() < defaults::RATE_LIMIT_TOKENS_PER_CALL
        {
            return Err(VoxflowError::ConfigInvalidValue {
                key: "rate_limiter".to_string(),
                message: format!(
                    "capacity {} cannot cover one call ({} token)",
                    limiter.capacity(),
                    defaults::RATE_LIMIT_TOKENS_PER_CALL
                ),
            });
        }
        let history = history.unwrap_or_else(|| {
            Arc::new(Mutex::new(ConversationHistory::new(
                config.pipeline.history_max_turns,
            )))
        });

        Ok(Pipeline {
            transcriber,
            generator,
            synthesizer,
            sink: sink.unwrap_or_else(|| Arc::new(NullAudioSink)),
            events: events.unwrap_or_default(),
            history,
            retry: RetryExecutor::new(config.retry.to_policy()?),
            rate_limiter,
            normalizer: config.audio.normalizer()?,
            silence_threshold: config.audio.silence_threshold,
            segmenter: config.segmenter,
            config: config.pipeline,
            state: std::sync::Mutex::new(PipelineState::Idle),
        })
    }
}

fn missing(component: &str) -> VoxflowError {
    VoxflowError::ConfigInvalidValue {
        key: component.to_string(),
        message: format!("a {} is required", component),
    }
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
