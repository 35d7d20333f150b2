//! Espressivo, a performance-map rendering engine for expressive music
//! playback.
//!
//! Performance maps describe how to play, not what to play: tempo, rubato,
//! asynchrony, dynamics, metrical accentuation, articulation and
//! imprecision instructions, all indexed by symbolic time. The [`perform`]
//! module applies them in dependency order to an event [`Timeline`],
//! turning tick dates into millisecond-accurate timing, loudness and
//! tuning values ready for MIDI or audio rendering.
//!
//! [`Timeline`]: event::Timeline

pub mod event;
pub mod map;
pub mod perform;
pub mod random;
pub mod style;
