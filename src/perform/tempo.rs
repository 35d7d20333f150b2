//! Tempo rendering: symbolic tick dates become physical milliseconds.
//!
//! A tempo map is resolved into a [`TempoCurve`], a sequence of segments
//! with precomputed start milliseconds. Constant segments convert in
//! closed form; continuous transitions follow a power curve whose timing
//! integral has no closed form, so it is approximated with Simpson's rule
//! on a sixteenth-note grid.

use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::map::{Dated, Record, TimedMap};
use crate::style::{StyleResolver, ValueRef};

pub type TempoMap = TimedMap<TempoInstruction>;

/// Fallback conversion when no tempo instruction applies: 100 bpm on
/// quarter beats, i.e. `t` ticks take `600 * t / ppq` milliseconds.
fn no_tempo_ms(date: f64, ppq: f64) -> f64 {
    600.0 * date / ppq
}

/// A tempo instruction: constant bpm from its date onward, or a continuous
/// transition toward `transition_to` that ends at the next instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoInstruction {
    pub date: f64,
    pub bpm: ValueRef,
    pub transition_to: Option<ValueRef>,
    /// Length of the beat that `bpm` counts, in fractions of a whole note
    /// (0.25 = quarter note).
    pub beat_length: f64,
    /// Relative position in the transition at which the mean of start and
    /// target tempo is reached. Defaults to 0.5.
    pub mean_tempo_at: Option<f64>,
}

impl TempoInstruction {
    pub fn constant(date: f64, bpm: impl Into<ValueRef>) -> Self {
        Self {
            date,
            bpm: bpm.into(),
            transition_to: None,
            beat_length: 0.25,
            mean_tempo_at: None,
        }
    }

    pub fn transition(date: f64, bpm: impl Into<ValueRef>, to: impl Into<ValueRef>) -> Self {
        Self {
            date,
            bpm: bpm.into(),
            transition_to: Some(to.into()),
            beat_length: 0.25,
            mean_tempo_at: Some(0.5),
        }
    }
}

impl Dated for TempoInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

#[derive(Debug, Clone)]
struct Segment {
    start: f64,
    end: f64,
    start_ms: f64,
    bpm: f64,
    transition_to: f64,
    beat_length: f64,
    exponent: f64,
    constant: bool,
}

/// A tempo map resolved against its styles, ready for date conversion.
#[derive(Debug, Clone)]
pub struct TempoCurve {
    ppq: f64,
    segments: Vec<Segment>,
}

impl TempoCurve {
    pub fn new(map: Option<&TempoMap>, ppq: u32, styles: &StyleResolver) -> Self {
        let ppq = f64::from(ppq);
        let mut segments: Vec<Segment> = Vec::new();

        if let Some(map) = map {
            let mut style_name: Option<&str> = None;
            for record in map.records() {
                match record {
                    Record::StyleSwitch(sw) => style_name = Some(&sw.name_ref),
                    Record::Instruction(inst) => {
                        segments.push(resolve(inst, style_name, styles));
                    }
                }
            }
        }

        for i in 0..segments.len() {
            segments[i].end = match segments.get(i + 1) {
                Some(next) => next.start,
                None => f64::MAX,
            };
        }
        for i in 0..segments.len() {
            segments[i].start_ms = if i == 0 {
                no_tempo_ms(segments[0].start, ppq)
            } else {
                let prev = &segments[i - 1];
                prev.start_ms + segment_ms(prev, segments[i].start, ppq)
            };
        }

        Self { ppq, segments }
    }

    /// Convert a symbolic date in ticks to milliseconds.
    pub fn ms_at(&self, date: f64) -> f64 {
        let idx = self.segments.partition_point(|s| s.start <= date);
        if idx == 0 {
            return no_tempo_ms(date, self.ppq);
        }
        let seg = &self.segments[idx - 1];
        seg.start_ms + segment_ms(seg, date, self.ppq)
    }
}

fn resolve(inst: &TempoInstruction, style_name: Option<&str>, styles: &StyleResolver) -> Segment {
    let mut bpm = styles.bpm(style_name, &inst.bpm);
    let mut transition_to = bpm;
    let mut exponent = 1.0;
    let mut constant = true;

    if let Some(to) = &inst.transition_to {
        let to = styles.bpm(style_name, to);
        if to != bpm {
            match inst.mean_tempo_at.unwrap_or(0.5) {
                mean if mean <= 0.0 => bpm = to,
                mean if mean >= 1.0 => {}
                mean => {
                    transition_to = to;
                    exponent = 0.5_f64.ln() / mean.ln();
                    constant = false;
                }
            }
        }
    }

    let beat_length = if inst.beat_length > 0.0 {
        inst.beat_length
    } else {
        log::warn!(
            "invalid beat length {} at date {}, falling back to 0.25",
            inst.beat_length,
            inst.date
        );
        0.25
    };

    Segment {
        start: inst.date,
        end: f64::MAX,
        start_ms: 0.0,
        bpm,
        transition_to,
        beat_length,
        exponent,
        constant,
    }
}

/// Milliseconds from a segment's start to `date`, which must lie at or
/// after the start.
fn segment_ms(seg: &Segment, date: f64, ppq: f64) -> f64 {
    if seg.constant {
        return 15000.0 * (date - seg.start) / (seg.bpm * seg.beat_length * ppq);
    }
    transition_ms(seg, date, ppq)
}

fn tempo_at(seg: &Segment, date: f64) -> f64 {
    let p = (date - seg.start) / (seg.end - seg.start);
    seg.bpm + p.powf(seg.exponent) * (seg.transition_to - seg.bpm)
}

/// Simpson's rule over 1/tempo, one subinterval per thirty-second note,
/// at least two so the rule applies.
fn transition_ms(seg: &Segment, date: f64, ppq: f64) -> f64 {
    let span = date - seg.start;
    if span <= 0.0 {
        return 0.0;
    }
    let n = (2.0 * (span / (ppq / 4.0)).floor()).max(2.0);
    let step = span / n;
    let mut sum = 1.0 / tempo_at(seg, seg.start) + 1.0 / tempo_at(seg, date);
    for i in 1..(n as u64) {
        let coefficient = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += coefficient / tempo_at(seg, seg.start + i as f64 * step);
    }
    sum * span * 5000.0 / (n * seg.beat_length * ppq)
}

/// Attach millisecond dates (and end dates, where a duration is known) to
/// every event. End dates not yet synthesized by the rubato pass are
/// derived from the performance duration first.
pub fn render_tempo(timeline: &mut Timeline, curve: &TempoCurve) {
    for event in timeline.events_mut() {
        event.ms_date = Some(curve.ms_at(event.perf_date));
        let end = event
            .perf_date_end
            .or_else(|| event.perf_duration.map(|d| event.perf_date + d));
        if let Some(end) = end {
            event.perf_date_end = Some(end);
            event.ms_date_end = Some(curve.ms_at(end));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::map::StyleSwitch;
    use crate::style::{Style, StyleLibrary, TempoDef};
    use assert_approx_eq::assert_approx_eq;

    const PPQ: u32 = 720;

    fn curve_of(instructions: Vec<TempoInstruction>) -> TempoCurve {
        let mut map = TempoMap::new();
        for inst in instructions {
            map.insert(Record::Instruction(inst)).unwrap();
        }
        TempoCurve::new(Some(&map), PPQ, &StyleResolver::default())
    }

    #[test]
    fn no_map_uses_hundred_bpm_quarters() {
        let curve = TempoCurve::new(None, PPQ, &StyleResolver::default());
        assert_approx_eq!(curve.ms_at(0.0), 0.0);
        assert_approx_eq!(curve.ms_at(720.0), 600.0);
        assert_approx_eq!(curve.ms_at(1440.0), 1200.0);
    }

    #[test]
    fn empty_map_behaves_like_no_map() {
        let map = TempoMap::new();
        let curve = TempoCurve::new(Some(&map), PPQ, &StyleResolver::default());
        assert_approx_eq!(curve.ms_at(720.0), 600.0);
    }

    #[test]
    fn constant_tempo_closed_form() {
        let curve = curve_of(vec![TempoInstruction::constant(0.0, 120.0)]);
        // a quarter note at 120 bpm lasts half a second
        assert_approx_eq!(curve.ms_at(720.0), 500.0);
        assert_approx_eq!(curve.ms_at(2880.0), 2000.0);
    }

    #[test]
    fn dates_before_first_instruction_use_fallback() {
        let curve = curve_of(vec![TempoInstruction::constant(720.0, 120.0)]);
        assert_approx_eq!(curve.ms_at(360.0), 300.0);
        // segment starts where the fallback left off
        assert_approx_eq!(curve.ms_at(720.0), 600.0);
        assert_approx_eq!(curve.ms_at(1440.0), 1100.0);
    }

    #[test]
    fn segments_accumulate_milliseconds() {
        let curve = curve_of(vec![
            TempoInstruction::constant(0.0, 120.0),
            TempoInstruction::constant(720.0, 60.0),
        ]);
        assert_approx_eq!(curve.ms_at(720.0), 500.0);
        assert_approx_eq!(curve.ms_at(1440.0), 1500.0);
    }

    #[test]
    fn linear_transition_matches_exact_integral() {
        // mean_tempo_at 0.5 gives exponent 1, so tempo rises linearly from
        // 100 to 200 and the exact duration is 60000 * ln 2 / 100
        let mut inst = TempoInstruction::transition(0.0, 100.0, 200.0);
        inst.mean_tempo_at = Some(0.5);
        let curve = curve_of(vec![inst, TempoInstruction::constant(720.0, 200.0)]);
        let exact = 60000.0 * 2.0_f64.ln() / 100.0;
        assert_approx_eq!(curve.ms_at(720.0), exact, 0.2);
    }

    #[test]
    fn transition_is_monotonic() {
        let curve = curve_of(vec![
            TempoInstruction::transition(0.0, 60.0, 180.0),
            TempoInstruction::constant(2880.0, 180.0),
        ]);
        let mut prev = curve.ms_at(0.0);
        for i in 1..=96 {
            let ms = curve.ms_at(f64::from(i) * 30.0);
            assert!(ms > prev, "tempo curve must advance strictly");
            prev = ms;
        }
    }

    #[test]
    fn transition_lies_between_the_constant_extremes() {
        let curve = curve_of(vec![
            TempoInstruction::transition(0.0, 100.0, 200.0),
            TempoInstruction::constant(720.0, 200.0),
        ]);
        let slow = curve_of(vec![TempoInstruction::constant(0.0, 100.0)]);
        let fast = curve_of(vec![TempoInstruction::constant(0.0, 200.0)]);
        let ms = curve.ms_at(720.0);
        assert!(ms < slow.ms_at(720.0));
        assert!(ms > fast.ms_at(720.0));
    }

    #[test]
    fn mean_tempo_at_zero_collapses_to_target() {
        let mut inst = TempoInstruction::transition(0.0, 100.0, 200.0);
        inst.mean_tempo_at = Some(0.0);
        let curve = curve_of(vec![inst]);
        let target = curve_of(vec![TempoInstruction::constant(0.0, 200.0)]);
        assert_approx_eq!(curve.ms_at(720.0), target.ms_at(720.0));
    }

    #[test]
    fn mean_tempo_at_one_collapses_to_start() {
        let mut inst = TempoInstruction::transition(0.0, 100.0, 200.0);
        inst.mean_tempo_at = Some(1.0);
        let curve = curve_of(vec![inst]);
        let start = curve_of(vec![TempoInstruction::constant(0.0, 100.0)]);
        assert_approx_eq!(curve.ms_at(720.0), start.ms_at(720.0));
    }

    #[test]
    fn bpm_resolves_through_style_switch() {
        let mut style = Style::new("classic");
        style.insert(
            "allegro",
            TempoDef {
                name: "allegro".into(),
                bpm: 120.0,
            },
        );
        let mut lib = StyleLibrary::new();
        lib.add_tempo_style(style);

        let mut map = TempoMap::new();
        map.insert_first_at_date(Record::StyleSwitch(StyleSwitch::new(0.0, "classic")))
            .unwrap();
        map.insert(Record::Instruction(TempoInstruction::constant(
            0.0,
            ValueRef::name("allegro"),
        )))
        .unwrap();

        let resolver = StyleResolver::new(None, Some(&lib));
        let curve = TempoCurve::new(Some(&map), PPQ, &resolver);
        assert_approx_eq!(curve.ms_at(720.0), 500.0);
    }

    #[test]
    fn render_sets_ms_dates_and_ends() {
        let mut timeline = Timeline::from_events(vec![Event::note(0.0, 720.0, 60.0)]);
        let curve = curve_of(vec![TempoInstruction::constant(0.0, 120.0)]);
        render_tempo(&mut timeline, &curve);
        let event = timeline.get(0).unwrap();
        assert_approx_eq!(event.ms_date.unwrap(), 0.0);
        assert_approx_eq!(event.perf_date_end.unwrap(), 720.0);
        assert_approx_eq!(event.ms_date_end.unwrap(), 500.0);
    }

    #[test]
    fn render_respects_existing_end_dates() {
        let mut event = Event::note(0.0, 720.0, 60.0);
        event.perf_date_end = Some(360.0);
        let mut timeline = Timeline::from_events(vec![event]);
        let curve = curve_of(vec![TempoInstruction::constant(0.0, 120.0)]);
        render_tempo(&mut timeline, &curve);
        assert_approx_eq!(timeline.get(0).unwrap().ms_date_end.unwrap(), 250.0);
    }

    #[test]
    fn marker_without_duration_gets_no_end() {
        let mut timeline = Timeline::from_events(vec![Event::marker(720.0)]);
        let curve = curve_of(vec![TempoInstruction::constant(0.0, 120.0)]);
        render_tempo(&mut timeline, &curve);
        let event = timeline.get(0).unwrap();
        assert_approx_eq!(event.ms_date.unwrap(), 500.0);
        assert!(event.ms_date_end.is_none());
    }
}
