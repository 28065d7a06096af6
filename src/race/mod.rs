//! The race aggregate and its lifecycle.

pub mod manager;
pub mod results;

pub use manager::RaceManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, TimingError};
use crate::types::{
    Detection, DetectionId, Lap, LapId, Pilot, PilotChannel, PilotId, RaceId, RaceResult,
};

/// What kind of session a race is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceKind {
    Race,
    TimeTrial,
    Practice,
    Freestyle,
    AggregateLaps,
    CasualPractice,
}

impl RaceKind {
    /// Practice sessions are excluded from the record index.
    pub fn counts_for_records(self) -> bool {
        self != RaceKind::Practice
    }

    /// Whether the target lap count caps scoring and triggers auto-end.
    pub fn respects_target(self) -> bool {
        matches!(self, RaceKind::Race)
    }
}

/// Lifecycle state.
///
/// Forward transitions only (`Idle → Armed → Running → Ended`, with
/// `Running ⇄ Paused`), plus reset/clear back to `Idle` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RacePhase {
    Idle,
    Armed,
    Running,
    Paused,
    Ended,
}

/// One race: competitor assignments, the detections received, and the laps
/// built from them.
///
/// The race exclusively owns its laps and assignments. Once ended it is
/// immutable except for corrective edits (disqualification, recalculation),
/// which re-trigger downstream recomputation.
#[derive(Debug, Clone)]
pub struct Race {
    pub id: RaceId,
    pub kind: RaceKind,
    pub target_laps: u32,
    pub phase: RacePhase,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    assignments: Vec<PilotChannel>,
    detections: Vec<Detection>,
    laps: Vec<Lap>,
    results: Vec<RaceResult>,
}

impl Race {
    pub fn new(kind: RaceKind, target_laps: u32) -> Self {
        Self {
            id: RaceId::new(),
            kind,
            target_laps,
            phase: RacePhase::Idle,
            start_time: None,
            end_time: None,
            assignments: Vec::new(),
            detections: Vec::new(),
            laps: Vec::new(),
            results: Vec::new(),
        }
    }

    // --- assignments -----------------------------------------------------

    pub fn assignments(&self) -> &[PilotChannel] {
        &self.assignments
    }

    pub fn pilots(&self) -> impl Iterator<Item = &Pilot> {
        self.assignments.iter().map(|a| &a.pilot)
    }

    pub fn has_pilot(&self, pilot: PilotId) -> bool {
        self.assignments.iter().any(|a| a.pilot.id == pilot)
    }

    pub fn pilot(&self, pilot: PilotId) -> Option<&Pilot> {
        self.assignments.iter().find(|a| a.pilot.id == pilot).map(|a| &a.pilot)
    }

    /// Add a pilot-channel assignment. A pilot may hold only one channel, and
    /// a channel group carries at most one pilot.
    pub fn add_assignment(&mut self, assignment: PilotChannel) -> Result<()> {
        if self.has_pilot(assignment.pilot.id) {
            return Err(TimingError::PilotAlreadyAssigned { name: assignment.pilot.name });
        }
        if assignment
            .channel
            .interferes_with_any(self.assignments.iter().map(|a| &a.channel))
        {
            return Err(TimingError::ChannelInUse { channel: assignment.channel });
        }
        self.assignments.push(assignment);
        Ok(())
    }

    pub fn remove_pilot(&mut self, pilot: PilotId) -> Option<PilotChannel> {
        let index = self.assignments.iter().position(|a| a.pilot.id == pilot)?;
        Some(self.assignments.remove(index))
    }

    /// Resolve a reported frequency to the assigned pilot.
    pub fn assignment_for_frequency(&self, frequency_mhz: u32) -> Option<&PilotChannel> {
        self.assignments.iter().find(|a| a.channel.frequency_mhz == frequency_mhz)
    }

    // --- detections ------------------------------------------------------

    /// Insert keeping detections ordered by `(race_sector, time)`, the
    /// authoritative sequencing, not arrival order.
    pub fn insert_detection(&mut self, detection: Detection) {
        let key = (detection.race_sector(), detection.time);
        let position = self
            .detections
            .partition_point(|d| (d.race_sector(), d.time) <= key);
        trace!(%detection, position, "recording detection");
        self.detections.insert(position, detection);
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn detection(&self, id: DetectionId) -> Option<&Detection> {
        self.detections.iter().find(|d| d.id == id)
    }

    pub fn detection_mut(&mut self, id: DetectionId) -> Option<&mut Detection> {
        self.detections.iter_mut().find(|d| d.id == id)
    }

    /// Count of valid lap boundaries crossed by a pilot, holeshot included.
    pub fn valid_boundary_count(&self, pilot: PilotId) -> usize {
        self.detections
            .iter()
            .filter(|d| d.pilot_id == pilot && d.is_lap_end && d.valid)
            .count()
    }

    /// Order pilots for the live position display.
    ///
    /// Ranks by valid boundary crossings, most first; ties break by who
    /// reached that crossing earliest, then by name. `count_holeshot`
    /// decides whether a lap-0 crossing moves a pilot up immediately or
    /// position holds until a genuine lap boundary.
    pub fn live_order(&self, count_holeshot: bool) -> Vec<Pilot> {
        let mut order: Vec<(&Pilot, usize, Option<DateTime<Utc>>)> = self
            .assignments
            .iter()
            .map(|a| {
                let mut crossings = 0usize;
                let mut latest: Option<DateTime<Utc>> = None;
                for d in self.detections.iter().filter(|d| {
                    d.pilot_id == a.pilot.id
                        && d.is_lap_end
                        && d.valid
                        && (count_holeshot || d.lap_number >= 1)
                }) {
                    crossings += 1;
                    latest = Some(latest.map_or(d.time, |t| t.max(d.time)));
                }
                (&a.pilot, crossings, latest)
            })
            .collect();

        order.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| match (a.2, b.2) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.0.name.cmp(&b.0.name))
        });
        order.into_iter().map(|(pilot, _, _)| pilot.clone()).collect()
    }

    /// Time of the latest valid lap boundary for a pilot.
    pub fn last_valid_boundary(&self, pilot: PilotId) -> Option<DateTime<Utc>> {
        self.detections
            .iter()
            .filter(|d| d.pilot_id == pilot && d.is_lap_end && d.valid)
            .map(|d| d.time)
            .max()
    }

    // --- laps ------------------------------------------------------------

    pub fn push_lap(&mut self, lap: Lap) {
        self.laps.push(lap);
    }

    pub fn lap(&self, id: LapId) -> Option<&Lap> {
        self.laps.iter().find(|l| l.id == id)
    }

    /// All laps for a pilot, disqualified ones included, ordered by number.
    pub fn laps_for(&self, pilot: PilotId) -> Vec<Lap> {
        let mut laps: Vec<Lap> =
            self.laps.iter().filter(|l| l.pilot_id == pilot).cloned().collect();
        laps.sort_by_key(|l| (l.number, l.end));
        laps
    }

    /// Scored laps (number ≥ 1) whose detection is currently valid.
    pub fn valid_laps(&self, pilot: PilotId) -> Vec<Lap> {
        let mut laps: Vec<Lap> = self
            .laps
            .iter()
            .filter(|l| l.pilot_id == pilot && l.number >= 1 && self.lap_valid(l))
            .cloned()
            .collect();
        laps.sort_by_key(|l| l.number);
        laps
    }

    /// The pilot's holeshot lap, if they have a valid one.
    pub fn holeshot_for(&self, pilot: PilotId) -> Option<Lap> {
        self.laps
            .iter()
            .find(|l| l.pilot_id == pilot && l.number == 0 && self.lap_valid(l))
            .cloned()
    }

    /// Validity of a lap, through its closing detection.
    pub fn lap_valid(&self, lap: &Lap) -> bool {
        self.detection(lap.detection_id).map(|d| d.valid).unwrap_or(false)
    }

    /// Total elapsed time over valid scored laps, `None` when there are none.
    pub fn total_time_for(&self, pilot: PilotId) -> Option<chrono::Duration> {
        let laps = self.valid_laps(pilot);
        if laps.is_empty() {
            return None;
        }
        Some(crate::types::total_time(&laps))
    }

    pub fn finished(&self, pilot: PilotId) -> bool {
        self.valid_laps(pilot).len() as u32 >= self.target_laps
    }

    // --- results ---------------------------------------------------------

    pub fn results(&self) -> &[RaceResult] {
        &self.results
    }

    pub(crate) fn set_results(&mut self, results: Vec<RaceResult>) {
        self.results = results;
    }

    /// Drop all scoring state (detections, laps, results) but keep
    /// assignments. Used by reset.
    pub(crate) fn clear_scoring(&mut self) {
        self.detections.clear();
        self.laps.clear();
        self.results.clear();
        self.start_time = None;
        self.end_time = None;
    }

    pub(crate) fn clear_assignments(&mut self) -> Vec<PilotChannel> {
        std::mem::take(&mut self.assignments)
    }
}
