//! Performance style definitions and name resolution.
//!
//! Instructions refer to values by name ("forte", "andante") or give them
//! literally. Names resolve through the style that a map's latest style
//! switch put in effect: a [`Style`] is a named collection of definitions,
//! a [`StyleLibrary`] holds the styles of one scope, and a
//! [`StyleResolver`] chains a part-local library over a global one.
//! Unresolvable references degrade to a numeric parse of the name, then to
//! a documented default, with a warning.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Neutral fallback for tempo (bpm) and dynamics (volume) references that
/// resolve to nothing.
pub const DEFAULT_NUMERIC_VALUE: f64 = 100.0;

/// A literal number or a named reference into the active style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueRef {
    Number(f64),
    Named(String),
}

impl ValueRef {
    pub fn name(s: impl Into<String>) -> Self {
        ValueRef::Named(s.into())
    }

    /// Resolve against a definition lookup. Falls back to parsing the name
    /// as a number and finally to [`DEFAULT_NUMERIC_VALUE`].
    pub fn resolve(&self, lookup: impl FnOnce(&str) -> Option<f64>) -> f64 {
        match self {
            ValueRef::Number(n) if n.is_finite() => *n,
            ValueRef::Number(n) => {
                warn!("non-finite literal {n}, falling back to {DEFAULT_NUMERIC_VALUE}");
                DEFAULT_NUMERIC_VALUE
            }
            ValueRef::Named(name) => {
                if let Some(value) = lookup(name) {
                    return value;
                }
                match name.parse::<f64>() {
                    Ok(value) if value.is_finite() => value,
                    _ => {
                        warn!(
                            "cannot resolve \"{name}\", falling back to {DEFAULT_NUMERIC_VALUE}"
                        );
                        DEFAULT_NUMERIC_VALUE
                    }
                }
            }
        }
    }
}

impl From<f64> for ValueRef {
    fn from(n: f64) -> Self {
        ValueRef::Number(n)
    }
}

/// A named tempo, e.g. "allegro" at 130 bpm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoDef {
    pub name: String,
    pub bpm: f64,
}

/// A named loudness, e.g. "forte" at volume 90.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsDef {
    pub name: String,
    pub volume: f64,
}

/// A named rubato frame shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubatoDef {
    pub name: String,
    pub frame_length: f64,
    pub intensity: f64,
    pub late_start: f64,
    pub early_end: f64,
}

/// The modifier set of an articulation. Every field is optional; an unset
/// field leaves the note attribute untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ArticulationModifiers {
    pub absolute_duration: Option<f64>,
    pub absolute_duration_change: Option<f64>,
    pub relative_duration: Option<f64>,
    pub absolute_duration_ms: Option<f64>,
    pub absolute_duration_change_ms: Option<f64>,
    pub absolute_velocity: Option<f64>,
    pub absolute_velocity_change: Option<f64>,
    pub relative_velocity: Option<f64>,
    pub absolute_delay: Option<f64>,
    pub absolute_delay_ms: Option<f64>,
    pub detune_cents: Option<f64>,
    pub detune_hz: Option<f64>,
}

/// A named articulation, e.g. "staccato" halving the duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticulationDef {
    pub name: String,
    pub modifiers: ArticulationModifiers,
}

/// One sample of an accentuation pattern: an accentuation `value` at a
/// beat position, transitioning from `transition_from` to `transition_to`
/// until the next sample (or the pattern end).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccentuationSample {
    pub beat: f64,
    pub value: f64,
    pub transition_from: f64,
    pub transition_to: f64,
}

/// A named metrical accentuation pattern over `length` beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccentuationPatternDef {
    pub name: String,
    pub length: f64,
    samples: Vec<AccentuationSample>,
}

impl AccentuationPatternDef {
    pub fn new(name: impl Into<String>, length: f64) -> Self {
        Self {
            name: name.into(),
            length,
            samples: Vec::new(),
        }
    }

    /// Add a sample, keeping the pattern sorted by beat position.
    pub fn add_sample(&mut self, sample: AccentuationSample) {
        let pos = self.samples.partition_point(|s| s.beat <= sample.beat);
        self.samples.insert(pos, sample);
    }

    pub fn samples(&self) -> &[AccentuationSample] {
        &self.samples
    }

    /// Accentuation at a beat position within the pattern.
    ///
    /// Positions before the first sample yield 0. On a sample's beat the
    /// sample's value applies; between samples the transition interpolates
    /// linearly, running out at the next sample or one beat past the
    /// pattern length.
    pub fn accentuation_at(&self, beat: f64) -> f64 {
        let idx = match self.samples.partition_point(|s| s.beat <= beat) {
            0 => return 0.0,
            n => n - 1,
        };
        let sample = &self.samples[idx];
        if beat == sample.beat {
            return sample.value;
        }
        let segment_end = match self.samples.get(idx + 1) {
            Some(next) => next.beat,
            None => self.length + 1.0,
        };
        if segment_end <= sample.beat {
            return sample.transition_to;
        }
        let t = ((beat - sample.beat) / (segment_end - sample.beat)).clamp(0.0, 1.0);
        sample.transition_from + t * (sample.transition_to - sample.transition_from)
    }
}

/// A named collection of definitions of one kind, e.g. the dynamics style
/// "romantic" mapping "forte" to 90.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style<D> {
    pub name: String,
    defs: HashMap<String, D>,
}

impl<D> Style<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, def_name: impl Into<String>, def: D) {
        self.defs.insert(def_name.into(), def);
    }

    pub fn get(&self, def_name: &str) -> Option<&D> {
        self.defs.get(def_name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// All styles of one scope (a part, or the whole performance).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleLibrary {
    tempo: HashMap<String, Style<TempoDef>>,
    dynamics: HashMap<String, Style<DynamicsDef>>,
    rubato: HashMap<String, Style<RubatoDef>>,
    articulation: HashMap<String, Style<ArticulationDef>>,
    accentuation: HashMap<String, Style<AccentuationPatternDef>>,
}

impl StyleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tempo_style(&mut self, style: Style<TempoDef>) {
        self.tempo.insert(style.name.clone(), style);
    }

    pub fn add_dynamics_style(&mut self, style: Style<DynamicsDef>) {
        self.dynamics.insert(style.name.clone(), style);
    }

    pub fn add_rubato_style(&mut self, style: Style<RubatoDef>) {
        self.rubato.insert(style.name.clone(), style);
    }

    pub fn add_articulation_style(&mut self, style: Style<ArticulationDef>) {
        self.articulation.insert(style.name.clone(), style);
    }

    pub fn add_accentuation_style(&mut self, style: Style<AccentuationPatternDef>) {
        self.accentuation.insert(style.name.clone(), style);
    }
}

/// Chained lookup: a part-local [`StyleLibrary`] shadows the global one.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleResolver<'a> {
    local: Option<&'a StyleLibrary>,
    global: Option<&'a StyleLibrary>,
}

impl<'a> StyleResolver<'a> {
    pub fn new(local: Option<&'a StyleLibrary>, global: Option<&'a StyleLibrary>) -> Self {
        Self { local, global }
    }

    fn chain<D>(
        &self,
        pick: impl Fn(&'a StyleLibrary) -> &'a HashMap<String, Style<D>>,
        name: &str,
    ) -> Option<&'a Style<D>> {
        self.local
            .and_then(|lib| pick(lib).get(name))
            .or_else(|| self.global.and_then(|lib| pick(lib).get(name)))
    }

    pub fn tempo_style(&self, name: &str) -> Option<&'a Style<TempoDef>> {
        self.chain(|lib| &lib.tempo, name)
    }

    pub fn dynamics_style(&self, name: &str) -> Option<&'a Style<DynamicsDef>> {
        self.chain(|lib| &lib.dynamics, name)
    }

    pub fn rubato_style(&self, name: &str) -> Option<&'a Style<RubatoDef>> {
        self.chain(|lib| &lib.rubato, name)
    }

    pub fn articulation_style(&self, name: &str) -> Option<&'a Style<ArticulationDef>> {
        self.chain(|lib| &lib.articulation, name)
    }

    pub fn accentuation_style(&self, name: &str) -> Option<&'a Style<AccentuationPatternDef>> {
        self.chain(|lib| &lib.accentuation, name)
    }

    /// Resolve a bpm reference through a tempo style.
    pub fn bpm(&self, style_name: Option<&str>, value: &ValueRef) -> f64 {
        let style = style_name.and_then(|n| self.tempo_style(n));
        value.resolve(|name| style.and_then(|s| s.get(name)).map(|d| d.bpm))
    }

    /// Resolve a volume reference through a dynamics style.
    pub fn volume(&self, style_name: Option<&str>, value: &ValueRef) -> f64 {
        let style = style_name.and_then(|n| self.dynamics_style(n));
        value.resolve(|name| style.and_then(|s| s.get(name)).map(|d| d.volume))
    }
}
