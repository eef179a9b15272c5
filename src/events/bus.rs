//! In-process append-only event log with synchronous listeners.

use super::latency::{self, LatencyBreakdown};
use super::{EventKind, EventSink, Payload, PipelineEvent};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Callback invoked for every recorded event.
///
/// A returned error is logged and otherwise ignored; it never stops the
/// event from being recorded or other listeners from running.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PipelineEvent) -> anyhow::Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Per-kind counts plus the latency breakdown of one bus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSummary {
    pub total: usize,
    pub counts: BTreeMap<EventKind, usize>,
    pub latency: LatencyBreakdown,
}

impl EventSummary {
    pub fn count(&self, kind: EventKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn error_count(&self) -> usize {
        self.counts
            .iter()
            .filter(|(kind, _)| kind.is_error())
            .map(|(_, count)| count)
            .sum()
    }
}

/// Append-only publish/subscribe log of pipeline events.
///
/// Cloning is not supported; share it behind an `Arc`.
#[derive(Default)]
pub struct EventBus {
    events: Mutex<Vec<PipelineEvent>>,
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Listeners run in subscription order.
    pub fn subscribe<L>(&self, listener: L)
    where
        L: EventListener + 'static,
    {
        lock(&self.listeners).push(Arc::new(listener));
    }

    /// Records an event and notifies listeners. Returns the recorded event.
    pub fn publish(&self, kind: EventKind, payload: Payload) -> PipelineEvent {
        let event = PipelineEvent::new(kind, payload);
        lock(&self.events).push(event.clone());

        // Listeners run outside both locks so they may read the bus.
        let listeners: Vec<Arc<dyn EventListener>> = lock(&self.listeners).clone();
        for (position, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = position, kind = %event.kind, error = %e, "event listener failed");
                }
                Err(_) => {
                    warn!(listener = position, kind = %event.kind, "event listener panicked");
                }
            }
        }
        event
    }

    /// Copy of every recorded event in emission order.
    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        lock(&self.events).clone()
    }

    pub fn events_of_kind(&self, kind: EventKind) -> Vec<PipelineEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Drops all recorded events. Listeners stay subscribed.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Milliseconds per named stage; stages without a matched pair are omitted.
    pub fn latency_breakdown(&self) -> LatencyBreakdown {
        latency::breakdown(&lock(&self.events))
    }

    pub fn summary(&self) -> EventSummary {
        let events = lock(&self.events);
        let mut counts = BTreeMap::new();
        for event in events.iter() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        EventSummary {
            total: events.len(),
            counts,
            latency: latency::breakdown(&events),
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, kind: EventKind, payload: Payload) {
        self.publish(kind, payload);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.len())
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

// A panicking listener runs outside the lock, so poisoning only follows a
// panic inside this module; the data is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
