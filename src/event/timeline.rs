//! Sorted event storage for a single performed part.
//!
//! Events are kept sorted by their performance date in ticks. Renderers
//! mutate dates in place (rubato warping, articulation delays) and call
//! [`Timeline::resort`] afterward; lookups use binary search with endpoint
//! fast paths, like the instruction maps do.

use super::types::Event;

/// A sorted timeline of score events.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<Event>,
}

impl Timeline {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Build a timeline from unordered events.
    pub fn from_events(mut events: Vec<Event>) -> Self {
        events.sort_by(|a, b| a.perf_date.total_cmp(&b.perf_date));
        Self { events }
    }

    /// Insert a single event, maintaining sorted order. Lands behind all
    /// events sharing its date.
    pub fn insert(&mut self, event: Event) {
        let pos = self
            .events
            .partition_point(|e| e.perf_date <= event.perf_date);
        self.events.insert(pos, event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Event> {
        self.events.get_mut(index)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Mutable access to all events. Callers that change `perf_date` must
    /// call [`Timeline::resort`] before the next lookup.
    pub fn events_mut(&mut self) -> &mut [Event] {
        &mut self.events
    }

    /// Index of the first event dated at or after `date` (performance
    /// dates).
    pub fn index_at_after(&self, date: f64) -> Option<usize> {
        let last = self.events.last()?;
        if date <= self.events[0].perf_date {
            return Some(0);
        }
        if date > last.perf_date {
            return None;
        }
        Some(self.events.partition_point(|e| e.perf_date < date))
    }

    /// Index range of all events dated exactly `date`.
    pub fn indices_at(&self, date: f64) -> std::ops::Range<usize> {
        let start = self.events.partition_point(|e| e.perf_date < date);
        let end = self.events.partition_point(|e| e.perf_date <= date);
        start..end
    }

    /// Index of the event carrying the given id, if present.
    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.events
            .iter()
            .position(|e| e.id.as_deref() == Some(id))
    }

    /// Restore sorted order after performance dates were edited in place.
    pub fn resort(&mut self) {
        for i in 1..self.events.len() {
            let mut j = i;
            while j > 0 && self.events[j].perf_date < self.events[j - 1].perf_date {
                self.events.swap(j, j - 1);
                j -= 1;
            }
        }
    }
}
