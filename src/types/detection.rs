//! Raw crossing events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::channel::Channel;
use super::pilot::PilotId;
use crate::timing::TimingSystemKind;

/// Identity of a recorded detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectionId(Uuid);

impl DetectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DetectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a detection's validity was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidityKind {
    /// Set by the intake heuristics.
    Auto,
    /// Set by an explicit disqualify/requalify operation.
    ManualOverride,
}

/// One raw crossing event, attributed to a pilot and a timing system.
///
/// Detections are immutable facts apart from the validity flag, which the
/// disqualification path may flip after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub timing_system_index: usize,
    pub system_kind: TimingSystemKind,
    pub pilot_id: PilotId,
    pub channel: Channel,
    pub time: DateTime<Utc>,
    pub peak: u16,
    /// The lap this detection closes (0 is the holeshot).
    pub lap_number: u32,
    /// True when this crossing marks a lap boundary (primary timing point).
    pub is_lap_end: bool,
    pub valid: bool,
    pub validity: ValidityKind,
}

impl Detection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        system_kind: TimingSystemKind,
        timing_system_index: usize,
        pilot_id: PilotId,
        channel: Channel,
        time: DateTime<Utc>,
        lap_number: u32,
        is_lap_end: bool,
        peak: u16,
    ) -> Self {
        Self {
            id: DetectionId::new(),
            timing_system_index,
            system_kind,
            pilot_id,
            channel,
            time,
            peak,
            lap_number,
            is_lap_end,
            valid: true,
            validity: ValidityKind::Auto,
        }
    }

    /// Total order of detections within a race across sectors.
    ///
    /// Same-lap detections from multiple timing points sort by timing system
    /// index; later laps always sort after earlier ones.
    pub fn race_sector(&self) -> u32 {
        race_sector(self.lap_number, self.timing_system_index)
    }

    /// 1-based sector number along the course.
    pub fn sector_number(&self) -> usize {
        self.timing_system_index + 1
    }

    /// A valid start-line trigger that is not a scored lap.
    pub fn is_holeshot(&self) -> bool {
        self.valid && self.is_lap_end && self.lap_number == 0
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detection {} L{} I{} RS{} T{}",
            self.pilot_id,
            self.lap_number,
            self.timing_system_index,
            self.race_sector(),
            self.time.format("%H:%M:%S%.3f"),
        )
    }
}

/// Sequencing key for a crossing: `lap_number * 100 + timing_system_index`.
pub fn race_sector(lap_number: u32, timing_system_index: usize) -> u32 {
    lap_number * 100 + timing_system_index as u32
}
