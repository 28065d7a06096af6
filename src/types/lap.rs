//! Scored laps and consecutive-lap windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::detection::DetectionId;
use super::pilot::PilotId;

/// Identity of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RaceId(Uuid);

impl RaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LapId(Uuid);

impl LapId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LapId {
    fn default() -> Self {
        Self::new()
    }
}

/// The interval between two qualifying detections for one pilot.
///
/// Lap 0 is the holeshot. Validity lives on the closing detection, looked up
/// through `detection_id`; a disqualified lap stays in history but is excluded
/// from time calculations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub id: LapId,
    pub detection_id: DetectionId,
    pub race_id: RaceId,
    pub pilot_id: PilotId,
    pub number: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Lap {
    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for Lap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lap {} {:.3}s", self.number, self.length().num_milliseconds() as f64 / 1000.0)
    }
}

/// Sum of lap lengths. Empty input sums to zero.
pub fn total_time(laps: &[Lap]) -> Duration {
    laps.iter().fold(Duration::zero(), |acc, lap| acc + lap.length())
}

/// The minimum-total-time contiguous window of `count` laps.
///
/// Input must be one pilot's scored laps ordered by number. Windows must be
/// contiguous in lap number, so a disqualified lap removed from the input
/// breaks any window spanning it. Returns an empty vector when no window of
/// the requested size exists.
pub fn best_consecutive(laps: &[Lap], count: usize) -> Vec<Lap> {
    if count == 0 || laps.len() < count {
        return Vec::new();
    }

    let mut best: Option<&[Lap]> = None;
    for window in laps.windows(count) {
        let contiguous =
            window.windows(2).all(|pair| pair[1].number == pair[0].number + 1);
        if !contiguous {
            continue;
        }

        match best {
            Some(current) if total_time(current) <= total_time(window) => {}
            _ => best = Some(window),
        }
    }

    best.map(|w| w.to_vec()).unwrap_or_default()
}
