//! Derived race results.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::pilot::Pilot;

/// Ranking artifact for one pilot in one race.
///
/// Results are recomputed from laps, never hand-edited; corrective edits go
/// through the disqualification path which re-triggers computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub pilot: Pilot,
    /// 1-based finishing position.
    pub position: u32,
    pub points: u32,
    pub dnf: bool,
    pub laps_completed: u32,
    /// Total elapsed time over scored laps, absent for DNF.
    #[serde(skip)]
    pub total_time: Option<Duration>,
}

impl fmt::Display for RaceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dnf {
            return write!(f, "{} DNF", self.pilot.name);
        }
        write!(f, "{} P{} {}pts", self.pilot.name, self.position, self.points)
    }
}
