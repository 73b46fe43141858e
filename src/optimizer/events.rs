//! Structured change tracking for the pipeline.
//!
//! Passes record what they did into an [`EventLog`]; the driver and the
//! tests read the derived statistics. This is the pipeline's observability
//! surface - there is no logging facade, events are data.
//!
//! # Examples
//!
//! ```rust
//! use shrike::optimizer::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::PhiSimplified).message("3 phis -> const 42");
//! assert_eq!(log.count(EventKind::PhiSimplified), 1);
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use strum::IntoStaticStr;

use crate::model::MethodId;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    /// An effectively-trivial phi (chain) was replaced by a single value.
    PhiSimplified,
    /// A dead instruction or phi was removed.
    DeadCodeRemoved,
    /// An always-throwing invoke was rewritten to a throw helper.
    InvokeRewritten,
    /// The cycle eliminator removed a call edge.
    CallEdgeRemoved,
    /// A group of classes was merged into one survivor.
    ClassesMerged,
    /// An instance method was staticized.
    MethodStaticized,
    /// A call site received an explicit null check.
    NullCheckInserted,
    /// An enum class was disqualified from unboxing.
    EnumCandidatePoisoned,
    /// Field access bits were recorded for a field.
    FieldBitsRecorded,
    /// A shared throw helper was synthesized.
    HelperSynthesized,
    /// A method was lowered to output code.
    MethodLowered,
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The method it happened in, if method-scoped.
    pub method: Option<MethodId>,
    /// Free-form detail.
    pub detail: Option<String>,
}

/// Builder returned by [`EventLog::record`]; commits on drop.
pub struct EventRecorder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl EventRecorder<'_> {
    /// Attributes the event to a method.
    #[must_use]
    pub fn at(mut self, method: MethodId) -> Self {
        if let Some(event) = &mut self.event {
            event.method = Some(method);
        }
        self
    }

    /// Attaches a free-form detail message.
    pub fn message(mut self, detail: impl Into<String>) {
        if let Some(event) = &mut self.event {
            event.detail = Some(detail.into());
        }
    }
}

impl Drop for EventRecorder<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            if let Ok(mut events) = self.log.events.lock() {
                events.push(event);
            }
        }
    }
}

/// Thread-safe append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event; chain [`EventRecorder::at`] and
    /// [`EventRecorder::message`] for context.
    pub fn record(&self, kind: EventKind) -> EventRecorder<'_> {
        EventRecorder {
            log: self,
            event: Some(Event {
                kind,
                method: None,
                detail: None,
            }),
        }
    }

    /// Number of events of a kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.kind == kind).count())
            .unwrap_or(0)
    }

    /// Total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Per-kind counts.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        let mut counts = HashMap::new();
        if let Ok(events) = self.events.lock() {
            for event in events.iter() {
                *counts.entry(event.kind).or_insert(0) += 1;
            }
        }
        DerivedStats { counts }
    }
}

/// Aggregated event counts.
#[derive(Debug, Clone)]
pub struct DerivedStats {
    counts: HashMap<EventKind, usize>,
}

impl DerivedStats {
    /// Count for one kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// All nonzero kinds, with counts.
    #[must_use]
    pub fn nonzero(&self) -> Vec<(EventKind, usize)> {
        let mut out: Vec<_> = self
            .counts
            .iter()
            .map(|(&k, &c)| (k, c))
            .filter(|&(_, c)| c > 0)
            .collect();
        out.sort_by_key(|&(k, _)| <&'static str>::from(k));
        out
    }
}
