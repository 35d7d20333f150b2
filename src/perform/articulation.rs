//! Articulation rendering in two passes.
//!
//! The tick-domain pass runs before the timing renderers and rewrites
//! symbolic durations, velocities and onsets. Millisecond-domain modifiers
//! cannot be applied at that point, so they are parked on the event and
//! consolidated by the second pass once tempo and asynchrony have produced
//! millisecond dates.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::event::{Event, Timeline};
use crate::map::{Dated, Record, TimedMap};
use crate::style::{ArticulationDef, ArticulationModifiers, StyleResolver};

pub type ArticulationMap = TimedMap<ArticulationInstruction>;

/// An articulation instruction. With a `note_id` it addresses that one
/// note, otherwise every event at its date. A `name_ref` pulls the
/// modifiers of a definition from the active articulation style; the
/// instruction's own modifiers are applied on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticulationInstruction {
    pub date: f64,
    pub note_id: Option<String>,
    pub name_ref: Option<String>,
    pub modifiers: ArticulationModifiers,
}

impl ArticulationInstruction {
    pub fn at_date(date: f64, modifiers: ArticulationModifiers) -> Self {
        Self {
            date,
            note_id: None,
            name_ref: None,
            modifiers,
        }
    }

    pub fn on_note(date: f64, note_id: impl Into<String>, modifiers: ArticulationModifiers) -> Self {
        Self {
            date,
            note_id: Some(note_id.into()),
            name_ref: None,
            modifiers,
        }
    }

    pub fn from_def(date: f64, name_ref: impl Into<String>) -> Self {
        Self {
            date,
            note_id: None,
            name_ref: Some(name_ref.into()),
            modifiers: ArticulationModifiers::default(),
        }
    }
}

impl Dated for ArticulationInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

/// Apply one modifier set to an event. Returns true when the performance
/// date moved, in which case the caller has to re-sort the timeline.
///
/// Duration modifiers only touch events that carry a duration, velocity
/// modifiers only events that already have a velocity. A set with
/// `absolute_duration_ms` leaves the symbolic duration alone since the
/// millisecond value replaces it in the second pass anyway.
fn apply_modifiers(mods: &ArticulationModifiers, event: &mut Event) -> bool {
    let mut date_changed = false;

    if let Some(mut dur) = event.perf_duration {
        if mods.absolute_duration_ms.is_some() {
            event.pending_articulation.duration_ms = mods.absolute_duration_ms;
        } else {
            if let Some(abs) = mods.absolute_duration {
                dur = abs;
            }
            if let Some(rel) = mods.relative_duration {
                dur *= rel;
            }
            if let Some(change) = mods.absolute_duration_change {
                if change != 0.0 {
                    let mut change = change;
                    if dur > 0.0 {
                        // a change must never remove the whole duration
                        while dur + change <= 0.0 {
                            change /= 2.0;
                        }
                    }
                    dur += change;
                }
            }
            event.perf_duration = Some(dur);
        }
        if let Some(change_ms) = mods.absolute_duration_change_ms {
            if change_ms != 0.0 {
                event.pending_articulation.duration_change_ms = change_ms;
            }
        }
    }

    if let Some(delay) = mods.absolute_delay {
        if delay != 0.0 {
            event.perf_date += delay;
            date_changed = true;
        }
    }
    if let Some(delay_ms) = mods.absolute_delay_ms {
        event.pending_articulation.delay_ms = delay_ms;
    }

    if let Some(mut vel) = event.velocity {
        if let Some(abs) = mods.absolute_velocity {
            vel = abs;
        }
        if let Some(rel) = mods.relative_velocity {
            vel *= rel;
        }
        if let Some(change) = mods.absolute_velocity_change {
            vel += change;
        }
        event.velocity = Some(vel);
    }

    if let Some(cents) = mods.detune_cents {
        event.detune_cents += cents;
    }
    if let Some(hz) = mods.detune_hz {
        event.detune_hz += hz;
    }

    date_changed
}

/// The tick-domain articulation pass.
///
/// Each event collects the instructions addressed to it; events without
/// any fall back to the default articulation named by the most recent
/// style switch. A referenced definition is applied before the
/// instruction's own modifiers. The timeline is re-sorted when a delay
/// moved an onset.
pub fn render_articulation(
    timeline: &mut Timeline,
    map: Option<&ArticulationMap>,
    styles: &StyleResolver,
) {
    let map = match map {
        Some(map) if !map.is_empty() => map,
        _ => return,
    };

    let mut pending: Vec<Vec<(Option<&ArticulationDef>, &ArticulationModifiers)>> =
        vec![Vec::new(); timeline.len()];
    let mut defaults: Vec<(f64, Option<&ArticulationDef>)> = Vec::new();

    let mut style = None;
    for record in map.records() {
        match record {
            Record::StyleSwitch(sw) => {
                style = styles.articulation_style(&sw.name_ref);
                if style.is_none() {
                    warn!("cannot resolve articulation style \"{}\"", sw.name_ref);
                }
                if let Some(name) = &sw.default_articulation {
                    let def = style.and_then(|s| s.get(name.as_str()));
                    if def.is_none() {
                        warn!("cannot resolve default articulation \"{name}\"");
                    }
                    defaults.push((sw.date, def));
                }
            }
            Record::Instruction(inst) => {
                let def = inst.name_ref.as_ref().and_then(|name| {
                    let def = style.and_then(|s| s.get(name.as_str()));
                    if def.is_none() {
                        warn!("cannot resolve articulation definition \"{name}\"");
                    }
                    def
                });
                match &inst.note_id {
                    Some(id) => {
                        let id = id.strip_prefix('#').unwrap_or(id);
                        match timeline.index_of_id(id) {
                            Some(idx) => {
                                let date = timeline.events()[idx].perf_date;
                                if date != inst.date {
                                    warn!(
                                        "articulation at date {} addresses note \"{id}\" at date {date}",
                                        inst.date
                                    );
                                }
                                pending[idx].push((def, &inst.modifiers));
                            }
                            None => warn!(
                                "articulation at date {} addresses unknown note \"{id}\"",
                                inst.date
                            ),
                        }
                    }
                    None => {
                        for idx in timeline.indices_at(inst.date) {
                            pending[idx].push((def, &inst.modifiers));
                        }
                    }
                }
            }
        }
    }

    let mut date_changed = false;
    let mut cursor = 0;
    for (idx, event) in timeline.events_mut().iter_mut().enumerate() {
        if !pending[idx].is_empty() {
            for (def, mods) in &pending[idx] {
                if let Some(def) = def {
                    date_changed |= apply_modifiers(&def.modifiers, event);
                }
                date_changed |= apply_modifiers(mods, event);
            }
            continue;
        }

        while cursor + 1 < defaults.len() && defaults[cursor + 1].0 <= event.perf_date {
            cursor += 1;
        }
        // a default only applies from its switch's date onward
        if let Some((date, Some(def))) = defaults.get(cursor) {
            if *date <= event.perf_date {
                date_changed |= apply_modifiers(&def.modifiers, event);
            }
        }
    }

    if date_changed {
        timeline.resort();
    }
}

/// The millisecond-domain articulation pass.
///
/// Consolidates the pending modifiers parked by the tick-domain pass once
/// events have millisecond dates. Both duration modifiers are computed
/// against the pre-delay onset, so a delayed note keeps its written
/// millisecond length.
pub fn render_articulation_ms(timeline: &mut Timeline) {
    for event in timeline.events_mut() {
        let pending = std::mem::take(&mut event.pending_articulation);
        if pending.is_empty() {
            continue;
        }
        let onset = match event.ms_date {
            Some(onset) => onset,
            None => continue,
        };

        if pending.delay_ms != 0.0 {
            let mut delay = pending.delay_ms;
            if let Some(end) = event.ms_date_end {
                if onset + delay >= end {
                    delay = (end - onset) / 2.0;
                    warn!(
                        "articulation delay of {} ms would pass the note end, reduced to {delay} ms",
                        pending.delay_ms
                    );
                }
            }
            event.ms_date = Some(onset + delay);
        }

        if event.ms_date_end.is_none() {
            continue;
        }
        if let Some(duration) = pending.duration_ms {
            event.ms_date_end = Some(onset + duration);
        }
        if pending.duration_change_ms != 0.0 {
            if let Some(end) = event.ms_date_end {
                let mut change = pending.duration_change_ms;
                let mut halvings = 0;
                // halving terminates for any positive span; the counter
                // stops degenerate spans from spinning
                while end + change <= onset && halvings < 64 {
                    change /= 2.0;
                    halvings += 1;
                }
                event.ms_date_end = Some(end + change);
            }
        }
    }
}
