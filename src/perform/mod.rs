//! The performance rendering pipeline.
//!
//! Each submodule renders one performance aspect onto the event timeline.
//! [`Performance`] bundles the maps of a part and runs the renderers in
//! their dependency order: dynamics and accentuation need symbolic dates
//! untouched, rubato warps them, tempo turns them into milliseconds,
//! asynchrony shifts those, the articulation millisecond pass consolidates
//! pending modifiers, and imprecision comes last because it works on the
//! final millisecond values.

pub mod accentuation;
pub mod articulation;
pub mod asynchrony;
pub mod dynamics;
pub mod imprecision;
pub mod rubato;
pub mod tempo;

pub use accentuation::{AccentuationInstruction, AccentuationMap, TimeSignature, TimeSignatureMap};
pub use articulation::{ArticulationInstruction, ArticulationMap};
pub use asynchrony::{AsynchronyInstruction, AsynchronyMap};
pub use dynamics::{DynamicsInstruction, DynamicsMap, VolumeEvent, VolumeStream, DEFAULT_VELOCITY};
pub use imprecision::{
    DetuneUnit, DistributionInstruction, DistributionMap, ImprecisionDomain, ImprecisionMap,
};
pub use rubato::{RubatoInstruction, RubatoMap};
pub use tempo::{TempoCurve, TempoInstruction, TempoMap};

use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::style::StyleResolver;

/// Rendering options that are not part of any map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Decorrelate the imprecision offsets of simultaneous events.
    pub shake_polyphony: bool,
    /// Seed for imprecision instructions that carry none of their own.
    /// Without it, unseeded instructions draw from entropy.
    pub seed: Option<u64>,
}

/// Everything the pipeline produces besides the mutated timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    /// The sub-note volume stream collected by the dynamics renderer,
    /// already carried into the millisecond domain.
    pub volume_stream: VolumeStream,
}

/// The performance description of one part: all maps plus options.
///
/// Any map may be absent; each renderer then falls back to its documented
/// neutral behavior. A `Performance` is read-only during rendering and
/// can be shared across timelines; the timelines themselves must be
/// rendered one at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub ppq: u32,
    pub tempo: Option<TempoMap>,
    pub rubato: Option<RubatoMap>,
    pub asynchrony: Option<AsynchronyMap>,
    pub dynamics: Option<DynamicsMap>,
    pub accentuation: Option<AccentuationMap>,
    pub articulation: Option<ArticulationMap>,
    pub time_signatures: Option<TimeSignatureMap>,
    pub imprecision: Vec<ImprecisionMap>,
    pub options: RenderOptions,
}

impl Performance {
    pub fn new(ppq: u32) -> Self {
        Self {
            ppq,
            ..Self::default()
        }
    }

    /// Render all maps onto the timeline in dependency order.
    pub fn render(&self, timeline: &mut Timeline, styles: &StyleResolver) -> RenderResult {
        let mut volume_stream = dynamics::render_dynamics(timeline, self.dynamics.as_ref(), styles);
        accentuation::render_accentuation(
            timeline,
            self.accentuation.as_ref(),
            self.time_signatures.as_ref(),
            self.ppq,
            styles,
        );
        articulation::render_articulation(timeline, self.articulation.as_ref(), styles);
        rubato::render_rubato(timeline, self.rubato.as_ref(), styles);

        let curve = TempoCurve::new(self.tempo.as_ref(), self.ppq, styles);
        tempo::render_tempo(timeline, &curve);
        asynchrony::render_asynchrony(timeline, self.asynchrony.as_ref());
        articulation::render_articulation_ms(timeline);

        for domain in [
            ImprecisionDomain::Timing,
            ImprecisionDomain::Dynamics,
            ImprecisionDomain::ToneDuration,
            ImprecisionDomain::Tuning,
        ] {
            for map in self.imprecision.iter().filter(|m| m.domain == domain) {
                imprecision::render_imprecision(
                    timeline,
                    map,
                    self.options.shake_polyphony,
                    self.options.seed,
                );
            }
        }

        // the volume stream keeps its unwarped dates (rubato does not
        // apply) but follows tempo and asynchrony into the ms domain
        for event in volume_stream.events_mut() {
            let mut ms = curve.ms_at(event.date);
            if let Some(map) = self.asynchrony.as_ref().filter(|m| !m.is_empty()) {
                ms += asynchrony::offset_at(map, event.date);
            }
            event.ms_date = Some(ms);
        }

        RenderResult { volume_stream }
    }
}
