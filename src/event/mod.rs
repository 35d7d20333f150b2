//! Score events and the sorted timeline they live on.
//!
//! The timeline is the mutable side of the rendering process: instruction
//! maps stay read-only while the renderers attach performance attributes
//! (tick dates, millisecond dates, velocities, tuning offsets) to the
//! events here.

pub mod timeline;
pub mod types;

pub use timeline::Timeline;
pub use types::{Event, EventKind, PendingArticulation};
