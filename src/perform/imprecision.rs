//! Imprecision rendering: humanizing random offsets on timing, dynamics,
//! tone duration and tuning.
//!
//! Imprecision is always milliseconds based and therefore runs last in the
//! pipeline. Each instruction selects a distribution that is sampled on a
//! millisecond grid (the timing basis); events read the series at their
//! millisecond date, so close events get similar offsets from correlated
//! distributions. When a correlated segment follows another one, its
//! series is seeded with the predecessor's value at the segment start to
//! avoid a jump.

use std::collections::HashMap;

use log::warn;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::map::{Dated, Record, TimedMap};
use crate::random::{triangular, Distribution, RandomSeries};

pub type DistributionMap = TimedMap<DistributionInstruction>;

/// Which event attribute an imprecision map offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImprecisionDomain {
    /// Offsets `ms_date` and `ms_date_end`.
    Timing,
    /// Offsets `velocity`.
    Dynamics,
    /// Offsets `ms_date_end` only.
    ToneDuration,
    /// Offsets `tuning_offset`, creating it at 0.0 where absent.
    Tuning,
}

/// The unit of `tuning_offset` values written by a tuning-domain map.
/// Carried as metadata for whoever turns the timeline into sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetuneUnit {
    #[default]
    Cents,
    Hertz,
}

/// One distribution segment, in effect from its date until the next
/// instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionInstruction {
    pub date: f64,
    pub distribution: Distribution,
    /// Explicit seed for reproducible offsets.
    pub seed: Option<u64>,
    /// Sampling grid in milliseconds. Unset, it defaults to the
    /// distribution's value span in the timing domain and 100 ms
    /// elsewhere.
    pub milliseconds_timing_basis: Option<f64>,
}

impl DistributionInstruction {
    pub fn new(date: f64, distribution: Distribution) -> Self {
        Self {
            date,
            distribution,
            seed: None,
            milliseconds_timing_basis: None,
        }
    }
}

impl Dated for DistributionInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

/// An imprecision map: distribution segments bound to one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprecisionMap {
    pub domain: ImprecisionDomain,
    pub detune_unit: DetuneUnit,
    pub map: DistributionMap,
}

impl ImprecisionMap {
    pub fn new(domain: ImprecisionDomain) -> Self {
        Self {
            domain,
            detune_unit: DetuneUnit::default(),
            map: DistributionMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    MsDate,
    MsDateEnd,
    Velocity,
    Tuning,
}

#[derive(Debug, Clone, Copy)]
struct Offset {
    event: usize,
    target: Target,
    value: f64,
}

fn push_offset(offsets: &mut HashMap<u64, Vec<Offset>>, ms_date: f64, offset: Offset) {
    offsets.entry(ms_date.to_bits()).or_default().push(offset);
}

/// The millisecond date a new segment starts at: that of the first
/// millisecond-dated event in its scope.
fn segment_start_ms(timeline: &Timeline, start: f64, scope_end: f64) -> Option<f64> {
    let idx = timeline.index_at_after(start)?;
    timeline.events()[idx..]
        .iter()
        .take_while(|e| e.perf_date < scope_end)
        .find_map(|e| e.ms_date)
}

/// Reduce an offset by a triangular draw between its half and itself,
/// keeping its direction.
fn shake(offset: f64, rng: &mut ChaCha8Rng) -> f64 {
    let half = offset * 0.5;
    if offset < 0.0 {
        triangular(rng, offset, half, offset)
    } else {
        triangular(rng, half, offset, offset)
    }
}

/// Group dates in ascending order. Shaking draws from a shared generator,
/// so groups must be visited in a reproducible order for a seed to
/// reproduce the render.
fn sorted_dates(offsets: &HashMap<u64, Vec<Offset>>) -> Vec<u64> {
    let mut dates: Vec<u64> = offsets.keys().copied().collect();
    dates.sort_by(|a, b| f64::from_bits(*a).total_cmp(&f64::from_bits(*b)));
    dates
}

/// Decorrelate simultaneous offsets: one randomly chosen event per date
/// keeps its offset, the others are shaken.
fn shake_offsets(offsets: &mut HashMap<u64, Vec<Offset>>, rng: &mut ChaCha8Rng) {
    for date in sorted_dates(offsets) {
        let group = match offsets.get_mut(&date) {
            Some(group) if group.len() >= 2 => group,
            _ => continue,
        };
        let keeper = rng.gen_range(0..group.len());
        for (i, offset) in group.iter_mut().enumerate() {
            if i != keeper {
                offset.value = shake(offset.value, rng);
            }
        }
    }
}

/// Timing-domain shaking. Onsets and ends of equal pitch at the same
/// millisecond date must keep a common offset, otherwise note boundaries
/// that belong together drift apart.
fn shake_timing_offsets(
    offsets: &mut HashMap<u64, Vec<Offset>>,
    timeline: &Timeline,
    rng: &mut ChaCha8Rng,
) {
    for date in sorted_dates(offsets) {
        let group = match offsets.get_mut(&date) {
            Some(group) if group.len() >= 2 => group,
            _ => continue,
        };
        let keeper = rng.gen_range(0..group.len());

        let mut pitch_offsets: HashMap<u64, f64> = HashMap::new();
        if let Some(pitch) = timeline.events()[group[keeper].event].pitch() {
            pitch_offsets.insert(pitch.to_bits(), group[keeper].value);
        }

        for (i, offset) in group.iter_mut().enumerate() {
            if i == keeper {
                continue;
            }
            let pitch = timeline.events()[offset.event].pitch();
            if let Some(shared) = pitch.and_then(|p| pitch_offsets.get(&p.to_bits())) {
                offset.value = *shared;
                continue;
            }
            offset.value = shake(offset.value, rng);
            if let Some(pitch) = pitch {
                pitch_offsets.insert(pitch.to_bits(), offset.value);
            }
        }
    }
}

/// Apply one imprecision map to the timeline.
///
/// `shake_polyphony` decorrelates simultaneous events; without it all
/// voices of a polyphonic part would deviate in lockstep. `fallback_seed`
/// seeds instructions that carry no seed of their own (plus the shaking
/// draws); without it those draw from entropy.
pub fn render_imprecision(
    timeline: &mut Timeline,
    imprecision: &ImprecisionMap,
    shake_polyphony: bool,
    fallback_seed: Option<u64>,
) {
    if imprecision.map.is_empty() || timeline.is_empty() {
        return;
    }
    let domain = imprecision.domain;

    let mut rng = match fallback_seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed ^ 0x9e37_79b9_7f4a_7c15),
        None => ChaCha8Rng::from_entropy(),
    };

    let records = imprecision.map.records();
    let mut segments: Vec<(&DistributionInstruction, f64)> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if let Record::Instruction(inst) = record {
            let scope_end = records[i + 1..]
                .iter()
                .find(|r| !r.is_style_switch())
                .map_or(f64::MAX, Record::date);
            segments.push((inst, scope_end));
        }
    }

    let mut offsets: HashMap<u64, Vec<Offset>> = HashMap::new();
    // note ends reach beyond their segment; they are offset by the segment
    // their tick end falls into
    let mut pending_ends: Vec<(f64, f64, usize)> = Vec::new();

    let mut prev_series: Option<RandomSeries> = None;
    let mut prev_basis = 100.0;
    let mut event_index = 0;

    for (segment_index, &(inst, scope_end)) in segments.iter().enumerate() {
        let basis = inst
            .milliseconds_timing_basis
            .filter(|b| *b > 0.0)
            .or_else(|| {
                (domain == ImprecisionDomain::Timing)
                    .then(|| inst.distribution.span())
                    .flatten()
                    .filter(|span| *span > 0.0)
            })
            .unwrap_or(100.0);

        let mut series = match (inst.seed, fallback_seed) {
            (Some(seed), _) => RandomSeries::seeded(inst.distribution.clone(), seed),
            (None, Some(master)) => RandomSeries::seeded(
                inst.distribution.clone(),
                master.wrapping_add(segment_index as u64),
            ),
            (None, None) => RandomSeries::new(inst.distribution.clone()),
        };

        if inst.distribution.is_correlated() {
            let handover = prev_series.as_mut().and_then(|prev| {
                segment_start_ms(timeline, inst.date, scope_end)
                    .map(|ms| prev.value_at(ms / prev_basis))
            });
            match handover {
                Some(value) => series.set_initial_value(value),
                None => {
                    // start away from the extremes, in the middle half of
                    // the limit range
                    if let Some((lower, upper)) = inst.distribution.limits() {
                        let half = (upper - lower) * 0.5;
                        series.set_initial_value(lower + half * 0.5 + rng.gen::<f64>() * half);
                    }
                }
            }
        }

        while event_index < timeline.len() {
            let event = &timeline.events()[event_index];
            if event.perf_date < inst.date {
                event_index += 1;
                continue;
            }
            if event.perf_date >= scope_end {
                break;
            }
            let ms_date = match event.ms_date {
                Some(ms) => ms,
                None => {
                    event_index += 1;
                    continue;
                }
            };

            match domain {
                ImprecisionDomain::Timing => {
                    let value = series.value_at(ms_date / basis);
                    push_offset(
                        &mut offsets,
                        ms_date,
                        Offset {
                            event: event_index,
                            target: Target::MsDate,
                            value,
                        },
                    );
                    if let Some(ms_end) = event.ms_date_end {
                        let tick_end = event.perf_date_end.unwrap_or(event.perf_date);
                        pending_ends.push((tick_end, ms_end, event_index));
                    }
                }
                ImprecisionDomain::ToneDuration => {
                    if let Some(ms_end) = event.ms_date_end {
                        let value = series.value_at(ms_end / basis);
                        push_offset(
                            &mut offsets,
                            ms_end,
                            Offset {
                                event: event_index,
                                target: Target::MsDateEnd,
                                value,
                            },
                        );
                    }
                }
                ImprecisionDomain::Dynamics => {
                    if event.velocity.is_some() {
                        let value = series.value_at(ms_date / basis);
                        push_offset(
                            &mut offsets,
                            ms_date,
                            Offset {
                                event: event_index,
                                target: Target::Velocity,
                                value,
                            },
                        );
                    }
                }
                ImprecisionDomain::Tuning => {
                    let value = series.value_at(ms_date / basis);
                    push_offset(
                        &mut offsets,
                        ms_date,
                        Offset {
                            event: event_index,
                            target: Target::Tuning,
                            value,
                        },
                    );
                }
            }
            event_index += 1;
        }

        pending_ends.retain(|&(tick_end, ms_end, event)| {
            if tick_end >= scope_end {
                return true;
            }
            let value = series.value_at(ms_end / basis);
            push_offset(
                &mut offsets,
                ms_end,
                Offset {
                    event,
                    target: Target::MsDateEnd,
                    value,
                },
            );
            false
        });

        prev_series = Some(series);
        prev_basis = basis;
    }

    if shake_polyphony {
        if domain == ImprecisionDomain::Timing {
            shake_timing_offsets(&mut offsets, timeline, &mut rng);
        } else {
            shake_offsets(&mut offsets, &mut rng);
        }
    }

    let events = timeline.events_mut();
    for group in offsets.values() {
        for offset in group {
            let event = match events.get_mut(offset.event) {
                Some(event) => event,
                None => {
                    warn!("imprecision offset lost its event, skipping it");
                    continue;
                }
            };
            match offset.target {
                Target::MsDate => {
                    if let Some(ms) = event.ms_date {
                        event.ms_date = Some(ms + offset.value);
                    }
                }
                Target::MsDateEnd => {
                    if let Some(ms) = event.ms_date_end {
                        event.ms_date_end = Some(ms + offset.value);
                    }
                }
                Target::Velocity => {
                    if let Some(velocity) = event.velocity {
                        event.velocity = Some(velocity + offset.value);
                    }
                }
                Target::Tuning => {
                    event.tuning_offset = Some(event.tuning_offset.unwrap_or(0.0) + offset.value);
                }
            }
        }
    }
}
