//! Rubato rendering: warping symbolic dates within repeating frames.
//!
//! A rubato instruction divides time from its date onward into frames of
//! `frame_length` ticks. Within each frame, positions are redistributed by
//! a power function and squeezed into the window `[late_start, early_end]`
//! of the frame, which models expressive pushing and dragging without
//! changing the frame grid itself.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::event::Timeline;
use crate::map::{Dated, Record, TimedMap};
use crate::style::StyleResolver;

pub type RubatoMap = TimedMap<RubatoInstruction>;

/// A rubato instruction. Frame parameters left unset fall back to the
/// referenced definition in the active rubato style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubatoInstruction {
    pub date: f64,
    pub name_ref: Option<String>,
    pub frame_length: Option<f64>,
    pub intensity: Option<f64>,
    pub late_start: Option<f64>,
    pub early_end: Option<f64>,
    /// Repeat the frame until the next instruction; otherwise only the
    /// first frame is affected.
    pub repeat: bool,
}

impl RubatoInstruction {
    pub fn frame(date: f64, frame_length: f64, intensity: f64) -> Self {
        Self {
            date,
            name_ref: None,
            frame_length: Some(frame_length),
            intensity: Some(intensity),
            late_start: None,
            early_end: None,
            repeat: true,
        }
    }

    pub fn from_def(date: f64, name_ref: impl Into<String>) -> Self {
        Self {
            date,
            name_ref: Some(name_ref.into()),
            frame_length: None,
            intensity: None,
            late_start: None,
            early_end: None,
            repeat: true,
        }
    }
}

impl Dated for RubatoInstruction {
    fn date(&self) -> f64 {
        self.date
    }
}

#[derive(Debug, Clone)]
struct Frame {
    start: f64,
    scope_end: f64,
    frame_length: f64,
    intensity: f64,
    late_start: f64,
    early_end: f64,
    repeat: bool,
}

impl Frame {
    /// Whether `date` falls into the transformed region of this frame.
    fn covers(&self, date: f64) -> bool {
        date >= self.start
            && date < self.scope_end
            && (self.repeat || date < self.start + self.frame_length)
    }

    fn warp(&self, date: f64) -> f64 {
        let local = (date - self.start) % self.frame_length;
        let d = ((local / self.frame_length).powf(self.intensity)
            * (self.early_end - self.late_start)
            + self.late_start)
            * self.frame_length;
        date + d - local
    }
}

fn resolve(
    inst: &RubatoInstruction,
    style_name: Option<&str>,
    styles: &StyleResolver,
) -> Option<Frame> {
    let def = inst.name_ref.as_ref().and_then(|name| {
        let def = style_name
            .and_then(|s| styles.rubato_style(s))
            .and_then(|style| style.get(name));
        if def.is_none() {
            warn!("cannot resolve rubato definition \"{name}\"");
        }
        def
    });

    let frame_length = match inst.frame_length.or_else(|| def.map(|d| d.frame_length)) {
        Some(len) if len > 0.0 => len,
        _ => {
            warn!(
                "rubato instruction at date {} has no valid frame length, skipping it",
                inst.date
            );
            return None;
        }
    };

    let mut intensity = inst
        .intensity
        .or_else(|| def.map(|d| d.intensity))
        .unwrap_or(1.0);
    if intensity == 0.0 {
        warn!("invalid rubato intensity 0.0 is set to 0.01");
        intensity = 0.01;
    } else if intensity < 0.0 {
        warn!("invalid rubato intensity {intensity} is inverted");
        intensity = -intensity;
    }

    let mut late_start = inst
        .late_start
        .or_else(|| def.map(|d| d.late_start))
        .unwrap_or(0.0);
    let mut early_end = inst
        .early_end
        .or_else(|| def.map(|d| d.early_end))
        .unwrap_or(1.0);
    if late_start < 0.0 {
        warn!("invalid rubato lateStart {late_start} is set to 0.0");
        late_start = 0.0;
    }
    if early_end > 1.0 {
        warn!("invalid rubato earlyEnd {early_end} is set to 1.0");
        early_end = 1.0;
    }
    if late_start >= early_end {
        warn!("invalid rubato lateStart >= earlyEnd, resetting to 0.0 and 1.0");
        late_start = 0.0;
        early_end = 1.0;
    }

    Some(Frame {
        start: inst.date,
        scope_end: f64::MAX,
        frame_length,
        intensity,
        late_start,
        early_end,
        repeat: inst.repeat,
    })
}

/// Warp the performance dates of all events covered by rubato frames.
///
/// End dates are synthesized from the unwarped date plus duration before
/// warping; an end landing in another frame is warped by that frame, an
/// end covered by no frame stays as it is. The timeline is re-sorted when
/// any date moved.
pub fn render_rubato(timeline: &mut Timeline, map: Option<&RubatoMap>, styles: &StyleResolver) {
    let map = match map {
        Some(map) if !map.is_empty() => map,
        _ => return,
    };

    let mut frames: Vec<Frame> = Vec::new();
    let mut style_name: Option<&str> = None;
    for record in map.records() {
        match record {
            Record::StyleSwitch(sw) => style_name = Some(&sw.name_ref),
            Record::Instruction(inst) => {
                if let Some(frame) = resolve(inst, style_name, styles) {
                    frames.push(frame);
                }
            }
        }
    }
    for i in 0..frames.len() {
        frames[i].scope_end = match frames.get(i + 1) {
            Some(next) => next.start,
            None => f64::MAX,
        };
    }

    let frame_at = |date: f64| -> Option<&Frame> {
        let idx = frames.partition_point(|f| f.start <= date);
        if idx == 0 {
            return None;
        }
        let frame = &frames[idx - 1];
        frame.covers(date).then_some(frame)
    };

    let mut changed = false;
    for event in timeline.events_mut() {
        let frame = match frame_at(event.perf_date) {
            Some(frame) => frame,
            None => continue,
        };
        let old_date = event.perf_date;
        event.perf_date = frame.warp(old_date);
        changed = true;

        let end = event
            .perf_date_end
            .or_else(|| event.perf_duration.map(|d| old_date + d));
        if let Some(end) = end {
            event.perf_date_end = Some(match frame_at(end) {
                Some(end_frame) => end_frame.warp(end),
                None => end,
            });
        }
    }

    if changed {
        timeline.resort();
    }
}
