//! Core value types for the timing engine.
//!
//! The data model follows the detection-to-lap pipeline:
//! - [`Channel`] is a frequency slot; channels sharing a frequency interfere.
//! - [`Pilot`] / [`PilotChannel`] bind a competitor to a channel per race.
//! - [`Detection`] is one raw crossing event, ordered within a race by its
//!   [`race_sector`] key rather than arrival order.
//! - [`Lap`] is the scored interval between qualifying detections, with
//!   [`best_consecutive`] providing the sliding-window record primitive.
//! - [`RaceResult`] is the recomputed ranking artifact.

mod channel;
mod detection;
mod lap;
mod pilot;
mod result;

pub use channel::{Band, Channel, channel_groups};
pub use detection::{Detection, DetectionId, ValidityKind, race_sector};
pub use lap::{Lap, LapId, RaceId, best_consecutive, total_time};
pub use pilot::{Pilot, PilotChannel, PilotId};
pub use result::RaceResult;
