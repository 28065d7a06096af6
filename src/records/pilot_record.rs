//! Per-pilot record storage.

use std::collections::HashMap;

use chrono::Duration;

use crate::types::{Lap, Pilot, total_time};

/// One pilot's best runs, keyed by lap count.
///
/// Lap count 0 holds the holeshot record as a single-lap run. Entries are
/// recomputed from the race store, never patched, so a stored run is always
/// backed by currently valid laps.
#[derive(Debug, Clone)]
pub struct PilotRecord {
    pub pilot: Pilot,
    best: HashMap<u32, Vec<Lap>>,
}

impl PilotRecord {
    pub fn new(pilot: Pilot) -> Self {
        Self { pilot, best: HashMap::new() }
    }

    pub fn record(&self, lap_count: u32) -> Option<&[Lap]> {
        self.best.get(&lap_count).map(Vec::as_slice)
    }

    pub fn record_time(&self, lap_count: u32) -> Option<Duration> {
        self.record(lap_count).map(total_time)
    }

    /// Replace the stored run for `lap_count` with the recomputed candidate.
    ///
    /// Returns true when this is an improvement worth announcing: the pilot
    /// had no run before, or the new one is strictly faster. A slower
    /// replacement still happens (the old run's laps may no longer be valid)
    /// but is not an improvement.
    pub fn set_best(&mut self, lap_count: u32, laps: Vec<Lap>) -> bool {
        if laps.is_empty() {
            self.best.remove(&lap_count);
            return false;
        }

        let improved = match self.best.get(&lap_count) {
            Some(previous) => total_time(&laps) < total_time(previous),
            None => true,
        };
        self.best.insert(lap_count, laps);
        improved
    }

    pub fn clear(&mut self) {
        self.best.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }
}
