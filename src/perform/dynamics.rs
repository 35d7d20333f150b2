//! Dynamics rendering: velocities and sub-note volume curves.
//!
//! A dynamics instruction sets a constant volume or a continuous
//! transition toward a target, shaped by a cubic Bézier curve whose inner
//! control points derive from `curvature` and `protraction`. Continuous
//! instructions marked for sub-note dynamics do not touch note velocities;
//! they emit a secondary stream of volume controller events instead, so
//! loudness can change while a note sounds.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::map::{Dated, Record, TimedMap};
use crate::style::{StyleResolver, ValueRef};

pub type DynamicsMap = TimedMap<DynamicsInstruction>;

/// Velocity applied to notes that no dynamics instruction covers.
pub const DEFAULT_VELOCITY: f64 = 100.0;

/// Maximum volume difference between two adjacent sub-note samples.
const MAX_VOLUME_STEP: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsInstruction {
    pub date: f64,
    pub volume: ValueRef,
    pub transition_to: Option<ValueRef>,
    pub curvature: Option<f64>,
    pub protraction: Option<f64>,
    pub sub_note_dynamics: bool,
}

impl DynamicsInstruction {
    pub fn constant(date: f64, volume: impl Into<ValueRef>) -> Self {
        Self {
            date,
            volume: volume.into(),
            transition_to: None,
            curvature: None,
            protraction: None,
            sub_note_dynamics: false,
        }
    }

    pub fn transition(date: f64, volume: impl Into<ValueRef>, to: impl Into<ValueRef>) -> Self {
        Self {
            date,
            volume: volume.into(),
            transition_to: Some(to.into()),
            curvature: None,
            protraction: None,
            sub_note_dynamics: false,
        }
    }
}

impl Dated for DynamicsInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

/// One event of the sub-note volume stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEvent {
    pub date: f64,
    pub volume: f64,
    /// Mandatory events survive controller-density thinning on export.
    pub mandatory: bool,
    pub ms_date: Option<f64>,
}

/// The secondary controller stream produced by sub-note dynamics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeStream {
    events: Vec<VolumeEvent>,
}

impl VolumeStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, date: f64, volume: f64, mandatory: bool) {
        self.events.push(VolumeEvent {
            date,
            volume,
            mandatory,
            ms_date: None,
        });
    }

    pub fn events(&self) -> &[VolumeEvent] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut [VolumeEvent] {
        &mut self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn last_volume(&self) -> Option<f64> {
        self.events.last().map(|e| e.volume)
    }
}

#[derive(Debug, Clone)]
struct Segment {
    start: f64,
    end: f64,
    volume: f64,
    transition_to: f64,
    sub_note: bool,
    x1: f64,
    x2: f64,
}

impl Segment {
    fn is_constant(&self) -> bool {
        self.transition_to == self.volume
    }

    /// The volume at a tick date per the Bézier-shaped transition.
    fn volume_at(&self, date: f64) -> f64 {
        if date < self.start || self.is_constant() {
            return self.volume;
        }
        if date >= self.end {
            return self.transition_to;
        }
        let t = self.t_for_date(date);
        (3.0 - 2.0 * t) * t * t * (self.transition_to - self.volume) + self.volume
    }

    /// Find the curve parameter whose x lands on `date`, by halving search
    /// until the difference in the time domain drops below one tick.
    fn t_for_date(&self, date: f64) -> f64 {
        if date == self.start {
            return 0.0;
        }
        if date == self.end {
            return 1.0;
        }

        let s = self.end - self.start;
        let date = date - self.start;
        let u = 3.0 * self.x1 - 3.0 * self.x2 + 1.0;
        let v = -6.0 * self.x1 + 3.0 * self.x2;
        let w = 3.0 * self.x1;

        let mut t: f64 = 0.5;
        let mut diff = ((u * t + v) * t + w) * t * s - date;
        let mut tt = 0.25;
        for _ in 0..100 {
            if diff.abs() < 1.0 {
                break;
            }
            if diff > 0.0 {
                t -= tt;
            } else {
                t += tt;
            }
            diff = ((u * t + v) * t + w) * t * s - date;
            tt *= 0.5;
        }
        t
    }

    /// A point on the curve: (date, volume) for parameter `t`.
    fn date_volume(&self, t: f64) -> (f64, f64) {
        let x1_3 = 3.0 * self.x1;
        let x2_3 = 3.0 * self.x2;
        let u = x1_3 - x2_3 + 1.0;
        let v = -6.0 * self.x1 + x2_3;
        let date = ((u * t + v) * t + x1_3) * t * (self.end - self.start) + self.start;
        let volume = (3.0 - 2.0 * t) * t * t * (self.transition_to - self.volume) + self.volume;
        (date, volume)
    }

    /// Sample the transition densely enough that adjacent volumes differ
    /// by at most `max_step`. Depth-first midpoint subdivision.
    fn sub_note_samples(&self, max_step: f64) -> Vec<(f64, f64)> {
        let mut ts = vec![0.0, 1.0];
        let mut series = vec![self.date_volume(0.0), self.date_volume(1.0)];

        let mut i = 0;
        while i < ts.len() - 1 {
            while (series[i + 1].1 - series[i].1).abs() > max_step {
                let t = (ts[i] + ts[i + 1]) * 0.5;
                ts.insert(i + 1, t);
                series.insert(i + 1, self.date_volume(t));
            }
            i += 1;
        }
        series
    }
}

fn clamp_curvature(curvature: f64) -> f64 {
    if !(0.0..=1.0).contains(&curvature) {
        let clamped = curvature.clamp(0.0, 1.0);
        warn!("invalid curvature {curvature}, setting it to {clamped}");
        return clamped;
    }
    curvature
}

fn clamp_protraction(protraction: f64) -> f64 {
    if !(-1.0..=1.0).contains(&protraction) {
        let clamped = protraction.clamp(-1.0, 1.0);
        warn!("invalid protraction {protraction}, setting it to {clamped}");
        return clamped;
    }
    protraction
}

fn resolve(
    inst: &DynamicsInstruction,
    style_name: Option<&str>,
    styles: &StyleResolver,
) -> Segment {
    let volume = styles.volume(style_name, &inst.volume);
    // constant instructions behave like a degenerate transition so that
    // sub-note dynamics still yields a (flat) stream
    let transition_to = match &inst.transition_to {
        Some(to) => styles.volume(style_name, to),
        None => volume,
    };
    let curvature = clamp_curvature(inst.curvature.unwrap_or(0.0));
    let protraction = clamp_protraction(inst.protraction.unwrap_or(0.0));

    let (x1, x2) = if protraction == 0.0 {
        (curvature, 1.0 - curvature)
    } else if protraction > 0.0 {
        (
            curvature + (1.0 - curvature) * protraction,
            1.0 - curvature + curvature * protraction,
        )
    } else {
        (
            curvature + curvature * protraction,
            1.0 - curvature + (1.0 - curvature) * protraction,
        )
    };

    Segment {
        start: inst.date,
        end: f64::MAX,
        volume,
        transition_to,
        sub_note: inst.sub_note_dynamics,
        x1,
        x2,
    }
}

/// Attach velocities to all notes and collect the sub-note volume stream.
///
/// Notes before the first instruction, and all notes when there is no
/// map, get the neutral default velocity. Notes under a sub-note segment
/// get the default as well; their loudness lives in the returned stream.
pub fn render_dynamics(
    timeline: &mut Timeline,
    map: Option<&DynamicsMap>,
    styles: &StyleResolver,
) -> VolumeStream {
    let mut stream = VolumeStream::new();

    let map = match map {
        Some(map) if !map.is_empty() => map,
        _ => {
            for event in timeline.events_mut() {
                if event.is_note() {
                    event.velocity = Some(DEFAULT_VELOCITY);
                }
            }
            return stream;
        }
    };

    let mut segments: Vec<Segment> = Vec::new();
    let mut style_name: Option<&str> = None;
    for record in map.records() {
        match record {
            Record::StyleSwitch(sw) => style_name = Some(&sw.name_ref),
            Record::Instruction(inst) => segments.push(resolve(inst, style_name, styles)),
        }
    }
    for i in 0..segments.len() {
        segments[i].end = match segments.get(i + 1) {
            Some(next) => next.start,
            None => f64::MAX,
        };
    }

    let last_index = segments.len().saturating_sub(1);
    let events = timeline.events_mut();
    let mut cursor = 0;
    for (seg_index, seg) in segments.iter().enumerate() {
        // sub-note dynamics until eternity makes no sense, so the last
        // instruction always renders into plain velocities
        if seg.sub_note && seg_index < last_index {
            for (date, volume) in seg.sub_note_samples(MAX_VOLUME_STEP) {
                let mandatory = stream.is_empty() || date == seg.start;
                stream.push(date, volume, mandatory);
            }

            while cursor < events.len() {
                let event = &mut events[cursor];
                if !event.is_note() {
                    cursor += 1;
                    continue;
                }
                if event.perf_date >= seg.end {
                    break;
                }
                // notes before the first segment get the neutral velocity too
                event.velocity = Some(DEFAULT_VELOCITY);
                cursor += 1;
            }
            continue;
        }

        // returning from sub-note rendering, pull the controller back to
        // its neutral position
        if stream.is_empty() || stream.last_volume() != Some(DEFAULT_VELOCITY) {
            stream.push(seg.start, DEFAULT_VELOCITY, true);
        }

        while cursor < events.len() {
            let event = &mut events[cursor];
            if !event.is_note() {
                cursor += 1;
                continue;
            }
            if event.perf_date < seg.start {
                event.velocity = Some(DEFAULT_VELOCITY);
                cursor += 1;
                continue;
            }
            if event.perf_date >= seg.end {
                break;
            }
            event.velocity = Some(seg.volume_at(event.perf_date));
            cursor += 1;
        }
    }

    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::map::StyleSwitch;
    use crate::style::{DynamicsDef, Style, StyleLibrary};
    use assert_approx_eq::assert_approx_eq;

    fn map_of(instructions: Vec<DynamicsInstruction>) -> DynamicsMap {
        let mut map = DynamicsMap::new();
        for inst in instructions {
            map.insert(Record::Instruction(inst)).unwrap();
        }
        map
    }

    fn notes(dates: &[f64]) -> Timeline {
        Timeline::from_events(dates.iter().map(|&d| Event::note(d, 480.0, 60.0)).collect())
    }

    fn velocity(tl: &Timeline, index: usize) -> f64 {
        tl.get(index).unwrap().velocity.unwrap()
    }

    #[test]
    fn no_map_sets_default_velocity() {
        let mut tl = notes(&[0.0, 480.0]);
        let stream = render_dynamics(&mut tl, None, &StyleResolver::default());
        assert_approx_eq!(velocity(&tl, 0), 100.0);
        assert_approx_eq!(velocity(&tl, 1), 100.0);
        assert!(stream.is_empty());
    }

    #[test]
    fn rests_get_no_velocity() {
        let mut tl = Timeline::from_events(vec![Event::rest(0.0, 480.0)]);
        render_dynamics(&mut tl, None, &StyleResolver::default());
        assert!(tl.get(0).unwrap().velocity.is_none());
    }

    #[test]
    fn constant_segments_apply_per_scope() {
        let map = map_of(vec![
            DynamicsInstruction::constant(480.0, 60.0),
            DynamicsInstruction::constant(960.0, 90.0),
        ]);
        let mut tl = notes(&[0.0, 480.0, 960.0, 1440.0]);
        render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        assert_approx_eq!(velocity(&tl, 0), 100.0);
        assert_approx_eq!(velocity(&tl, 1), 60.0);
        assert_approx_eq!(velocity(&tl, 2), 90.0);
        assert_approx_eq!(velocity(&tl, 3), 90.0);
    }

    #[test]
    fn neutral_curvature_gives_linear_transition() {
        let map = map_of(vec![
            DynamicsInstruction::transition(0.0, 0.0, 100.0),
            DynamicsInstruction::constant(1000.0, 100.0),
        ]);
        let mut tl = notes(&[250.0, 500.0, 750.0]);
        render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        assert_approx_eq!(velocity(&tl, 0), 25.0, 1.0);
        assert_approx_eq!(velocity(&tl, 1), 50.0, 1.0);
        assert_approx_eq!(velocity(&tl, 2), 75.0, 1.0);
    }

    #[test]
    fn transition_hits_its_endpoints() {
        let map = map_of(vec![
            DynamicsInstruction::transition(0.0, 20.0, 80.0),
            DynamicsInstruction::constant(960.0, 80.0),
        ]);
        let mut tl = notes(&[0.0, 960.0]);
        render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        assert_approx_eq!(velocity(&tl, 0), 20.0);
        assert_approx_eq!(velocity(&tl, 1), 80.0);
    }

    #[test]
    fn curvature_bends_the_transition() {
        let mut inst = DynamicsInstruction::transition(0.0, 0.0, 100.0);
        inst.curvature = Some(1.0);
        let map = map_of(vec![inst, DynamicsInstruction::constant(1000.0, 100.0)]);
        let mut tl = notes(&[250.0, 750.0]);
        render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        // full curvature keeps the start flat and the end steep
        assert!(velocity(&tl, 0) < 25.0);
        assert!(velocity(&tl, 1) > 25.0);
    }

    #[test]
    fn out_of_range_curvature_is_clamped() {
        let mut inst = DynamicsInstruction::transition(0.0, 0.0, 100.0);
        inst.curvature = Some(7.0);
        inst.protraction = Some(-3.0);
        let map = map_of(vec![inst, DynamicsInstruction::constant(1000.0, 100.0)]);
        let mut tl = notes(&[500.0]);
        render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        let v = velocity(&tl, 0);
        assert!((0.0..=100.0).contains(&v));
    }

    #[test]
    fn volume_resolves_through_style() {
        let mut style = Style::new("romantic");
        style.insert(
            "forte",
            DynamicsDef {
                name: "forte".into(),
                volume: 90.0,
            },
        );
        let mut lib = StyleLibrary::new();
        lib.add_dynamics_style(style);

        let mut map = DynamicsMap::new();
        map.insert_first_at_date(Record::StyleSwitch(StyleSwitch::new(0.0, "romantic")))
            .unwrap();
        map.insert(Record::Instruction(DynamicsInstruction::constant(
            0.0,
            ValueRef::name("forte"),
        )))
        .unwrap();

        let resolver = StyleResolver::new(None, Some(&lib));
        let mut tl = notes(&[0.0]);
        render_dynamics(&mut tl, Some(&map), &resolver);
        assert_approx_eq!(velocity(&tl, 0), 90.0);
    }

    #[test]
    fn plain_map_emits_one_neutral_stream_event() {
        let map = map_of(vec![DynamicsInstruction::constant(480.0, 70.0)]);
        let mut tl = notes(&[480.0]);
        let stream = render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        assert_eq!(stream.len(), 1);
        let event = &stream.events()[0];
        assert_approx_eq!(event.date, 480.0);
        assert_approx_eq!(event.volume, 100.0);
        assert!(event.mandatory);
    }

    #[test]
    fn sub_note_stream_steps_are_bounded() {
        let mut inst = DynamicsInstruction::transition(0.0, 20.0, 96.0);
        inst.sub_note_dynamics = true;
        let map = map_of(vec![inst, DynamicsInstruction::constant(960.0, 96.0)]);
        let mut tl = notes(&[0.0, 480.0]);
        let stream = render_dynamics(&mut tl, Some(&map), &StyleResolver::default());

        // notes under the sub-note segment get the neutral velocity
        assert_approx_eq!(velocity(&tl, 0), 100.0);
        assert_approx_eq!(velocity(&tl, 1), 100.0);

        let events = stream.events();
        assert!(events.len() > 2);
        assert!(events[0].mandatory);
        assert_approx_eq!(events[0].date, 0.0);
        assert_approx_eq!(events[0].volume, 20.0);
        let curve_events = &events[..events.len() - 1];
        for pair in curve_events.windows(2) {
            assert!((pair[1].volume - pair[0].volume).abs() <= MAX_VOLUME_STEP + 1e-9);
            assert!(pair[1].date >= pair[0].date);
        }
    }

    #[test]
    fn stream_resets_after_sub_note_segment() {
        let mut inst = DynamicsInstruction::transition(0.0, 20.0, 96.0);
        inst.sub_note_dynamics = true;
        let map = map_of(vec![inst, DynamicsInstruction::constant(960.0, 64.0)]);
        let mut tl = notes(&[0.0, 960.0]);
        let stream = render_dynamics(&mut tl, Some(&map), &StyleResolver::default());

        let last = stream.events().last().unwrap();
        assert_approx_eq!(last.date, 960.0);
        assert_approx_eq!(last.volume, 100.0);
        assert!(last.mandatory);
        // the note after the sub-note segment gets a plain velocity again
        assert_approx_eq!(velocity(&tl, 1), 64.0);
    }

    #[test]
    fn notes_before_a_leading_sub_note_segment_keep_defaults() {
        let mut inst = DynamicsInstruction::transition(480.0, 20.0, 96.0);
        inst.sub_note_dynamics = true;
        let map = map_of(vec![inst, DynamicsInstruction::constant(1440.0, 64.0)]);
        let mut tl = notes(&[0.0, 480.0]);
        render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        assert_approx_eq!(velocity(&tl, 0), 100.0);
        assert_approx_eq!(velocity(&tl, 1), 100.0);
    }

    #[test]
    fn sub_note_on_last_instruction_renders_plain_velocities() {
        let mut inst = DynamicsInstruction::transition(0.0, 20.0, 96.0);
        inst.sub_note_dynamics = true;
        let map = map_of(vec![inst]);
        let mut tl = notes(&[0.0]);
        let stream = render_dynamics(&mut tl, Some(&map), &StyleResolver::default());
        assert_approx_eq!(velocity(&tl, 0), 20.0);
        assert_eq!(stream.len(), 1);
    }
}
