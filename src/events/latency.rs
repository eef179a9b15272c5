//! Latency reconstruction from the event log.

use super::{EventKind, PipelineEvent};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Stage name to milliseconds.
pub type LatencyBreakdown = BTreeMap<&'static str, f64>;

/// A named stage measured from a start kind to a completion kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePair {
    pub name: &'static str,
    pub start: EventKind,
    pub end: EventKind,
}

/// Every stage the breakdown knows how to measure.
pub const STAGES: &[StagePair] = &[
    StagePair {
        name: "audio_capture",
        start: EventKind::AudioCaptureStart,
        end: EventKind::AudioCaptureComplete,
    },
    StagePair {
        name: "stt",
        start: EventKind::SttStart,
        end: EventKind::SttComplete,
    },
    StagePair {
        name: "llm_first_token",
        start: EventKind::LlmQueryStart,
        end: EventKind::LlmTokenReceived,
    },
    StagePair {
        name: "llm_total",
        start: EventKind::LlmQueryStart,
        end: EventKind::LlmComplete,
    },
    StagePair {
        name: "tts",
        start: EventKind::TtsStart,
        end: EventKind::TtsComplete,
    },
    StagePair {
        name: "pipeline_total",
        start: EventKind::PipelineStart,
        end: EventKind::PipelineComplete,
    },
];

/// Pairs the most recent completion of each stage with the latest start
/// recorded before it.
///
/// When the completion carries an `index` payload entry (one per sentence
/// for synthesis), only a start with the same index matches.
pub fn breakdown(events: &[PipelineEvent]) -> LatencyBreakdown {
    let mut result = LatencyBreakdown::new();
    for stage in STAGES {
        if let Some(ms) = stage_latency_ms(events, stage) {
            result.insert(stage.name, ms);
        }
    }
    result
}

fn stage_latency_ms(events: &[PipelineEvent], stage: &StagePair) -> Option<f64> {
    let end_pos = events.iter().rposition(|e| e.kind == stage.end)?;
    let end = &events[end_pos];
    let index = end.get("index");

    let start = events[..end_pos].iter().rev().find(|e| {
        e.kind == stage.start && (index.is_none() || e.get("index").is_none_or(|i| Some(i) == index))
    })?;

    Some(((end.timestamp - start.timestamp) * 1000.0).max(0.0))
}

/// Formats a duration as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Formats a millisecond value the same way as [`format_duration`].
pub fn format_ms(ms: f64) -> String {
    format_duration(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
}

/// Logs a one-line-per-stage summary of a breakdown.
pub fn log_summary(breakdown: &LatencyBreakdown) {
    if breakdown.is_empty() {
        debug!("no completed stages to report");
        return;
    }
    for stage in STAGES {
        if let Some(&ms) = breakdown.get(stage.name) {
            debug!(stage = stage.name, latency = %format_ms(ms), "stage latency");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Payload, payload};
    use serde_json::json;

    fn event_at(kind: EventKind, timestamp: f64) -> PipelineEvent {
        PipelineEvent {
            timestamp,
            kind,
            payload: Payload::new(),
        }
    }

    fn indexed_at(kind: EventKind, timestamp: f64, index: usize) -> PipelineEvent {
        PipelineEvent {
            timestamp,
            kind,
            payload: payload([("index", json!(index))]),
        }
    }

    #[test]
    fn test_empty_log_has_no_stages() {
        assert!(breakdown(&[]).is_empty());
    }

    #[test]
    fn test_full_run_breakdown() {
        let events = vec![
            event_at(EventKind::PipelineStart, 100.000),
            event_at(EventKind::SttStart, 100.010),
            event_at(EventKind::SttComplete, 100.210),
            event_at(EventKind::LlmQueryStart, 100.220),
            event_at(EventKind::LlmTokenReceived, 100.320),
            event_at(EventKind::LlmComplete, 100.720),
            event_at(EventKind::PipelineComplete, 101.000),
        ];

        let result = breakdown(&events);
        assert!((result["stt"] - 200.0).abs() < 0.01);
        assert!((result["llm_first_token"] - 100.0).abs() < 0.01);
        assert!((result["llm_total"] - 500.0).abs() < 0.01);
        assert!((result["pipeline_total"] - 1000.0).abs() < 0.01);
        assert!(!result.contains_key("tts"));
        assert!(!result.contains_key("audio_capture"));
    }

    #[test]
    fn test_capture_stage_from_external_source() {
        let events = vec![
            event_at(EventKind::AudioCaptureStart, 50.0),
            event_at(EventKind::AudioCaptureComplete, 52.5),
        ];
        let result = breakdown(&events);
        assert!((result["audio_capture"] - 2500.0).abs() < 0.01);
    }

    #[test]
    fn test_most_recent_pair_wins() {
        let events = vec![
            event_at(EventKind::SttStart, 10.0),
            event_at(EventKind::SttComplete, 10.5),
            event_at(EventKind::SttStart, 20.0),
            event_at(EventKind::SttComplete, 20.1),
        ];
        let result = breakdown(&events);
        assert!((result["stt"] - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_start_without_completion_is_omitted() {
        let events = vec![
            event_at(EventKind::PipelineStart, 1.0),
            event_at(EventKind::LlmQueryStart, 1.1),
        ];
        assert!(breakdown(&events).is_empty());
    }

    #[test]
    fn test_completion_before_any_start_is_omitted() {
        let events = vec![
            event_at(EventKind::TtsComplete, 1.0),
            event_at(EventKind::TtsStart, 2.0),
        ];
        assert!(!breakdown(&events).contains_key("tts"));
    }

    #[test]
    fn test_tts_pairs_by_sentence_index() {
        let events = vec![
            indexed_at(EventKind::TtsStart, 1.0, 0),
            indexed_at(EventKind::TtsStart, 1.1, 1),
            indexed_at(EventKind::TtsComplete, 1.3, 1),
            indexed_at(EventKind::TtsComplete, 1.5, 0),
        ];
        let result = breakdown(&events);
        assert!((result["tts"] - 500.0).abs() < 0.01);
    }

    #[test]
    fn test_format_duration_millis() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(Duration::from_millis(450)), "450ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.0s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(3750)), "3.8s");
    }

    #[test]
    fn test_format_ms_clamps_negative() {
        assert_eq!(format_ms(-5.0), "0ms");
        assert_eq!(format_ms(250.0), "250ms");
    }

    #[test]
    fn test_log_summary_doesnt_panic() {
        log_summary(&LatencyBreakdown::new());
        let events = vec![
            event_at(EventKind::PipelineStart, 1.0),
            event_at(EventKind::PipelineComplete, 2.5),
        ];
        log_summary(&breakdown(&events));
    }
}
