//! Event configuration.
//!
//! Configuration is constructed explicitly and passed in; nothing in the core
//! reads global state. Consumers that persist configuration do so through
//! their own storage layer.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Where the primary timing system sits on the course.
///
/// With a `Holeshot` primary, the first crossing is the lap-0 start-line
/// trigger and is tracked as its own record category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryTimingLocation {
    Start,
    Holeshot,
}

/// Settings that shape lap scoring and record tracking for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Target lap count for races.
    pub target_laps: u32,
    /// Lap count used for the personal-best record category.
    pub pb_laps: u32,
    pub primary_timing_location: PrimaryTimingLocation,
    /// Crossings closing a lap shorter than this are recorded but
    /// auto-disqualified as false reads.
    pub min_lap_time_secs: f64,
    /// Whether a holeshot reorders the live position display, or position is
    /// held until a genuine lap boundary.
    pub react_to_holeshot: bool,
    /// Points awarded by finishing position (1st first). Positions past the
    /// end of the table score zero.
    pub position_points: Vec<u32>,
}

impl EventConfig {
    pub fn min_lap_time(&self) -> Duration {
        Duration::milliseconds((self.min_lap_time_secs * 1000.0) as i64)
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            target_laps: 4,
            pb_laps: 3,
            primary_timing_location: PrimaryTimingLocation::Holeshot,
            min_lap_time_secs: 5.0,
            react_to_holeshot: false,
            position_points: vec![10, 8, 6, 4, 2, 1],
        }
    }
}
