//! Score events and the performance attributes renderers attach to them.

use serde::{Deserialize, Serialize};

/// What kind of score object an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// A sounding note with a pitch in MIDI note numbers (fractional
    /// pitches allowed).
    Note { pitch: f64 },
    /// A rest. Carries dates through the pipeline but no velocity.
    Rest,
    /// A structural marker such as a section boundary.
    Marker,
}

/// Millisecond-domain articulation modifiers that wait for the second
/// articulation pass, after tempo rendering has produced millisecond dates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PendingArticulation {
    pub delay_ms: f64,
    pub duration_ms: Option<f64>,
    pub duration_change_ms: f64,
}

impl PendingArticulation {
    pub fn is_empty(&self) -> bool {
        self.delay_ms == 0.0 && self.duration_ms.is_none() && self.duration_change_ms == 0.0
    }
}

/// One event of the score timeline.
///
/// `date` and `duration` are the immutable symbolic values in ticks.
/// Renderers only ever write the performance attributes: `perf_date`,
/// `perf_duration` and `perf_date_end` stay in the (warped) tick domain,
/// `ms_date` and `ms_date_end` are physical milliseconds, `velocity` is
/// MIDI-range loudness, `tuning_offset` / `detune_cents` / `detune_hz`
/// shift the pitch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub id: Option<String>,
    pub date: f64,
    pub duration: Option<f64>,

    pub perf_date: f64,
    pub perf_duration: Option<f64>,
    pub perf_date_end: Option<f64>,
    pub ms_date: Option<f64>,
    pub ms_date_end: Option<f64>,
    pub velocity: Option<f64>,
    pub tuning_offset: Option<f64>,
    pub detune_cents: f64,
    pub detune_hz: f64,
    pub pending_articulation: PendingArticulation,
}

impl Event {
    pub fn new(kind: EventKind, date: f64, duration: Option<f64>) -> Self {
        Self {
            kind,
            id: None,
            date,
            duration,
            perf_date: date,
            perf_duration: duration,
            perf_date_end: None,
            ms_date: None,
            ms_date_end: None,
            velocity: None,
            tuning_offset: None,
            detune_cents: 0.0,
            detune_hz: 0.0,
            pending_articulation: PendingArticulation::default(),
        }
    }

    /// A note event with a pitch in MIDI note numbers.
    pub fn note(date: f64, duration: f64, pitch: f64) -> Self {
        Self::new(EventKind::Note { pitch }, date, Some(duration))
    }

    pub fn rest(date: f64, duration: f64) -> Self {
        Self::new(EventKind::Rest, date, Some(duration))
    }

    pub fn marker(date: f64) -> Self {
        Self::new(EventKind::Marker, date, None)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_note(&self) -> bool {
        matches!(self.kind, EventKind::Note { .. })
    }

    pub fn pitch(&self) -> Option<f64> {
        match self.kind {
            EventKind::Note { pitch } => Some(pitch),
            _ => None,
        }
    }
}
