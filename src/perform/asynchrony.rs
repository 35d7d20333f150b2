//! Asynchrony rendering: constant millisecond offsets per map segment.
//!
//! Each instruction shifts the millisecond onsets of all events whose
//! (warped) tick date lies in its scope, which runs to the next
//! instruction. An event's millisecond end moves along only when its tick
//! end lies in the same scope; when the shifted onset would reach or pass
//! the event's end, the end is resolved to the midpoint of the shifted
//! onset and the old end plus one millisecond, so no event collapses or
//! inverts.

use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::map::{Dated, TimedMap};

pub type AsynchronyMap = TimedMap<AsynchronyInstruction>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsynchronyInstruction {
    pub date: f64,
    pub milliseconds_offset: f64,
}

impl AsynchronyInstruction {
    pub fn new(date: f64, milliseconds_offset: f64) -> Self {
        Self {
            date,
            milliseconds_offset,
        }
    }
}

impl Dated for AsynchronyInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

/// The offset applying at a tick date, and the end of its scope.
fn offset_and_scope(map: &AsynchronyMap, date: f64) -> Option<(f64, f64)> {
    let idx = map.index_before_at(date)?;
    let inst = map.records()[..=idx]
        .iter()
        .rev()
        .find_map(|r| r.instruction())?;
    let scope_end = map
        .index_after(date)
        .and_then(|i| map.records()[i..].iter().find_map(|r| r.instruction()))
        .map_or(f64::MAX, |next| next.date);
    Some((inst.milliseconds_offset, scope_end))
}

/// The plain offset at a tick date, 0.0 outside all scopes. Used for
/// secondary streams that carry no end dates.
pub fn offset_at(map: &AsynchronyMap, date: f64) -> f64 {
    offset_and_scope(map, date).map_or(0.0, |(offset, _)| offset)
}

/// Shift millisecond dates of all events covered by asynchrony scopes.
pub fn render_asynchrony(timeline: &mut Timeline, map: Option<&AsynchronyMap>) {
    let map = match map {
        Some(map) if !map.is_empty() => map,
        _ => return,
    };

    for event in timeline.events_mut() {
        let (offset, scope_end) = match offset_and_scope(map, event.perf_date) {
            Some(found) => found,
            None => continue,
        };
        if offset == 0.0 {
            continue;
        }
        let ms = match event.ms_date {
            Some(ms) => ms,
            None => continue,
        };
        let new_start = ms + offset;
        event.ms_date = Some(new_start);

        let old_end = match event.ms_date_end {
            Some(end) => end,
            None => continue,
        };
        if new_start >= old_end {
            // the offset swallowed the whole event; keep a minimal sliver
            let new_end = ((new_start + old_end + 1.0) / 2.0).max(new_start + 1.0);
            event.ms_date_end = Some(new_end);
            continue;
        }
        let end_in_scope = event.perf_date_end.is_some_and(|end| end < scope_end);
        if end_in_scope {
            event.ms_date_end = Some(old_end + offset);
        }
    }
}
