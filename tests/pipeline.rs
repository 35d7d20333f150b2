//! End-to-end pipeline tests: whole performances rendered onto small
//! timelines, checked against hand-computed values.

use assert_approx_eq::assert_approx_eq;
use espressivo::event::{Event, Timeline};
use espressivo::map::Record;
use espressivo::perform::{
    ArticulationInstruction, ArticulationMap, AsynchronyInstruction, AsynchronyMap,
    DistributionInstruction, DynamicsInstruction, DynamicsMap, ImprecisionDomain, ImprecisionMap,
    Performance, TempoInstruction, TempoMap,
};
use espressivo::random::Distribution;
use espressivo::style::{ArticulationModifiers, StyleResolver};

fn quarter_note_timeline() -> Timeline {
    Timeline::from_events(vec![Event::note(0.0, 720.0, 60.0)])
}

/// A dynamics instruction alone: velocity comes from the map, timing from
/// the no-tempo fallback of 100 bpm quarters.
#[test]
fn dynamics_only_performance() {
    let mut performance = Performance::new(720);
    let mut dynamics = DynamicsMap::new();
    dynamics
        .insert(Record::Instruction(DynamicsInstruction::constant(
            0.0, 80.0,
        )))
        .unwrap();
    performance.dynamics = Some(dynamics);
    performance.tempo = Some(TempoMap::new());

    let mut tl = quarter_note_timeline();
    performance.render(&mut tl, &StyleResolver::default());

    let note = tl.get(0).unwrap();
    assert_approx_eq!(note.velocity.unwrap(), 80.0);
    assert_approx_eq!(note.ms_date.unwrap(), 0.0);
    assert_approx_eq!(note.ms_date_end.unwrap(), 600.0);
}

/// Tempo and asynchrony together: a 120 bpm quarter lasts 500 ms and the
/// whole note is shifted by the 20 ms offset.
#[test]
fn tempo_and_asynchrony_shift_the_note() {
    let mut performance = Performance::new(720);
    let mut tempo = TempoMap::new();
    tempo
        .insert(Record::Instruction(TempoInstruction::constant(0.0, 120.0)))
        .unwrap();
    performance.tempo = Some(tempo);
    let mut asynchrony = AsynchronyMap::new();
    asynchrony
        .insert(Record::Instruction(AsynchronyInstruction::new(0.0, 20.0)))
        .unwrap();
    performance.asynchrony = Some(asynchrony);

    let mut tl = quarter_note_timeline();
    performance.render(&mut tl, &StyleResolver::default());

    let note = tl.get(0).unwrap();
    assert_approx_eq!(note.ms_date.unwrap(), 20.0);
    assert_approx_eq!(note.ms_date_end.unwrap(), 520.0);
    assert_approx_eq!(note.velocity.unwrap(), 100.0);
}

/// Without any maps every note still gets a velocity and millisecond
/// dates from the documented fallbacks.
#[test]
fn empty_performance_uses_neutral_fallbacks() {
    let performance = Performance::new(480);
    let mut tl = Timeline::from_events(vec![
        Event::note(0.0, 480.0, 60.0),
        Event::note(480.0, 480.0, 62.0),
    ]);
    performance.render(&mut tl, &StyleResolver::default());

    for note in tl.events() {
        assert_approx_eq!(note.velocity.unwrap(), 100.0);
    }
    assert_approx_eq!(tl.get(1).unwrap().ms_date.unwrap(), 600.0);
    assert_approx_eq!(tl.get(1).unwrap().ms_date_end.unwrap(), 1200.0);
}

/// Symbolic articulation happens before tempo rendering, so a halved
/// duration also halves the millisecond length.
#[test]
fn articulation_shortens_the_millisecond_note() {
    let mut performance = Performance::new(720);
    let mut tempo = TempoMap::new();
    tempo
        .insert(Record::Instruction(TempoInstruction::constant(0.0, 120.0)))
        .unwrap();
    performance.tempo = Some(tempo);
    let mut articulation = ArticulationMap::new();
    articulation
        .insert(Record::Instruction(ArticulationInstruction::at_date(
            0.0,
            ArticulationModifiers {
                relative_duration: Some(0.5),
                ..Default::default()
            },
        )))
        .unwrap();
    performance.articulation = Some(articulation);

    let mut tl = quarter_note_timeline();
    performance.render(&mut tl, &StyleResolver::default());

    let note = tl.get(0).unwrap();
    assert_approx_eq!(note.ms_date.unwrap(), 0.0);
    assert_approx_eq!(note.ms_date_end.unwrap(), 250.0);
}

/// A pending millisecond delay survives tempo and asynchrony and lands in
/// the final dates.
#[test]
fn millisecond_delay_is_applied_after_asynchrony() {
    let mut performance = Performance::new(720);
    let mut asynchrony = AsynchronyMap::new();
    asynchrony
        .insert(Record::Instruction(AsynchronyInstruction::new(0.0, 100.0)))
        .unwrap();
    performance.asynchrony = Some(asynchrony);
    let mut articulation = ArticulationMap::new();
    articulation
        .insert(Record::Instruction(ArticulationInstruction::at_date(
            0.0,
            ArticulationModifiers {
                absolute_delay_ms: Some(30.0),
                ..Default::default()
            },
        )))
        .unwrap();
    performance.articulation = Some(articulation);

    let mut tl = quarter_note_timeline();
    performance.render(&mut tl, &StyleResolver::default());

    let note = tl.get(0).unwrap();
    // fallback tempo puts the onset at 100 ms after asynchrony, then the
    // pending delay adds 30 ms
    assert_approx_eq!(note.ms_date.unwrap(), 130.0);
    assert_approx_eq!(note.ms_date_end.unwrap(), 700.0);
}

/// Sub-note dynamics produce a volume stream whose events follow the
/// tempo into the millisecond domain.
#[test]
fn volume_stream_is_carried_into_milliseconds() {
    let mut performance = Performance::new(720);
    let mut dynamics = DynamicsMap::new();
    let mut swell = DynamicsInstruction::transition(0.0, 20.0, 100.0);
    swell.sub_note_dynamics = true;
    dynamics.insert(Record::Instruction(swell)).unwrap();
    dynamics
        .insert(Record::Instruction(DynamicsInstruction::constant(
            1440.0, 60.0,
        )))
        .unwrap();
    performance.dynamics = Some(dynamics);

    let mut tl = quarter_note_timeline();
    let result = performance.render(&mut tl, &StyleResolver::default());

    let stream = result.volume_stream;
    assert!(!stream.is_empty());
    assert!(stream.events()[0].mandatory);
    assert_approx_eq!(stream.events()[0].volume, 20.0);
    for event in stream.events() {
        // fallback tempo: 600 ms per 720 ticks
        assert_approx_eq!(event.ms_date.unwrap(), event.date * 600.0 / 720.0);
    }
    // the note under the sub-note segment carries the neutral velocity
    assert_approx_eq!(tl.get(0).unwrap().velocity.unwrap(), 100.0);
}

/// A seeded performance renders identically every time.
#[test]
fn seeded_imprecision_is_reproducible() {
    let mut performance = Performance::new(720);
    let mut timing = ImprecisionMap::new(ImprecisionDomain::Timing);
    timing
        .map
        .insert(Record::Instruction(DistributionInstruction::new(
            0.0,
            Distribution::Gaussian {
                standard_deviation: 10.0,
                lower: -20.0,
                upper: 20.0,
            },
        )))
        .unwrap();
    performance.imprecision.push(timing);
    performance.options.seed = Some(42);
    performance.options.shake_polyphony = true;

    let mut first = Timeline::from_events(vec![
        Event::note(0.0, 720.0, 60.0),
        Event::note(0.0, 720.0, 64.0),
        Event::note(720.0, 720.0, 67.0),
    ]);
    let mut second = first.clone();
    performance.render(&mut first, &StyleResolver::default());
    performance.render(&mut second, &StyleResolver::default());

    for (a, b) in first.events().iter().zip(second.events()) {
        assert_eq!(a.ms_date, b.ms_date);
        assert_eq!(a.ms_date_end, b.ms_date_end);
    }
    // the offsets actually moved something
    assert!(first
        .events()
        .iter()
        .any(|e| e.ms_date != Some(e.perf_date * 600.0 / 720.0)));
}
