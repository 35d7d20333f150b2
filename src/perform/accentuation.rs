//! Metrical accentuation: per-beat velocity shaping from accentuation
//! patterns.
//!
//! A pattern describes an accentuation curve over the beats of a measure
//! (or over its own length when it is longer or shorter than one). Each
//! note's beat position is derived from the active time signature, the
//! pattern value at that position is scaled and added to the velocity
//! written by the dynamics renderer.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::map::{Dated, Record, TimedMap};
use crate::style::{AccentuationPatternDef, StyleResolver};

pub type TimeSignatureMap = TimedMap<TimeSignature>;
pub type AccentuationMap = TimedMap<AccentuationInstruction>;

/// A time signature change. Before the first one, 4/4 is assumed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub date: f64,
    pub numerator: f64,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(date: f64, numerator: f64, denominator: u32) -> Self {
        Self {
            date,
            numerator,
            denominator,
        }
    }
}

impl Dated for TimeSignature {
    fn date(&self) -> f64 {
        self.date
    }
}

/// An accentuation instruction referencing a pattern definition in the
/// active accentuation style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccentuationInstruction {
    pub date: f64,
    pub name_ref: String,
    pub scale: f64,
    /// Repeat the pattern until the next instruction; otherwise it runs
    /// only once.
    pub repeat: bool,
    /// Restart the pattern on every measure instead of chaining pattern
    /// lengths back to back.
    pub stick_to_measures: bool,
}

impl AccentuationInstruction {
    pub fn new(date: f64, name_ref: impl Into<String>, scale: f64) -> Self {
        Self {
            date,
            name_ref: name_ref.into(),
            scale,
            repeat: true,
            stick_to_measures: true,
        }
    }
}

impl Dated for AccentuationInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

struct Pattern<'a> {
    start: f64,
    scope_end: f64,
    def: &'a AccentuationPatternDef,
    scale: f64,
    repeat: bool,
    stick_to_measures: bool,
}

/// Add the accentuations of all patterns to the velocities of the
/// timeline's events. Events without a velocity (rests, markers) are
/// skipped, so this has to run after dynamics rendering.
pub fn render_accentuation(
    timeline: &mut Timeline,
    map: Option<&AccentuationMap>,
    time_signatures: Option<&TimeSignatureMap>,
    ppq: u32,
    styles: &StyleResolver,
) {
    let map = match map {
        Some(map) if !map.is_empty() => map,
        _ => return,
    };
    let ppq4 = 4.0 * f64::from(ppq);

    let mut patterns: Vec<Pattern> = Vec::new();
    let mut style = None;
    let records = map.records();
    for (i, record) in records.iter().enumerate() {
        match record {
            Record::StyleSwitch(sw) => {
                style = styles.accentuation_style(&sw.name_ref);
                if style.is_none() {
                    warn!("cannot resolve accentuation style \"{}\"", sw.name_ref);
                }
            }
            Record::Instruction(inst) => {
                let def = match style.and_then(|s| s.get(inst.name_ref.as_str())) {
                    Some(def) => def,
                    None => {
                        warn!(
                            "cannot resolve accentuation pattern \"{}\", skipping it",
                            inst.name_ref
                        );
                        continue;
                    }
                };
                let scope_end = records[i + 1..]
                    .iter()
                    .find(|r| !r.is_style_switch())
                    .map_or(f64::MAX, Record::date);
                patterns.push(Pattern {
                    start: inst.date,
                    scope_end,
                    def,
                    scale: inst.scale,
                    repeat: inst.repeat,
                    stick_to_measures: inst.stick_to_measures,
                });
            }
        }
    }

    let signatures: Vec<TimeSignature> = time_signatures
        .map(|map| {
            map.records()
                .iter()
                .filter_map(|r| r.instruction().copied())
                .collect()
        })
        .unwrap_or_default();

    let mut sig_index: Option<usize> = None;
    let mut sig_date = 0.0;
    let mut denominator = 4.0;
    let mut ticks_per_beat = ppq4 / denominator;
    let mut measure_ticks = ticks_per_beat * 4.0;

    let events = timeline.events_mut();
    let mut i = 0;
    for pat in &patterns {
        let mut pattern_ticks = pat.def.length * ppq4 / denominator;

        while i < events.len() {
            let date = events[i].perf_date;
            if date < pat.start || events[i].velocity.is_none() {
                i += 1;
                continue;
            }

            // keep the time signature current
            let next = sig_index.map_or(0, |k| k + 1);
            let mut advanced = false;
            for (k, sig) in signatures.iter().enumerate().skip(next) {
                if sig.date > date {
                    break;
                }
                sig_index = Some(k);
                advanced = true;
            }
            if advanced {
                if let Some(sig) = sig_index.and_then(|k| signatures.get(k)) {
                    sig_date = sig.date;
                    denominator = f64::from(sig.denominator);
                    ticks_per_beat = ppq4 / denominator;
                    measure_ticks = ticks_per_beat * sig.numerator;
                    pattern_ticks = pat.def.length * ppq4 / denominator;
                }
            }

            if date >= pat.scope_end
                || (!pat.repeat && date >= pat.start + pattern_ticks)
            {
                break;
            }

            let frame = if pat.stick_to_measures {
                measure_ticks
            } else {
                pattern_ticks
            };
            let beat = 1.0 + ((date - sig_date) % frame) / ticks_per_beat;
            if let Some(velocity) = events[i].velocity {
                events[i].velocity = Some(velocity + pat.def.accentuation_at(beat) * pat.scale);
            }
            i += 1;
        }
    }
}
