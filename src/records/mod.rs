//! The lap record index.
//!
//! `LapRecordManager` derives per-pilot and overall records from the race
//! store. It never owns lap data: every update recomputes the affected
//! entries from the races themselves, so validity edits are self-healing
//! rather than patched in place. It reacts to engine events through
//! [`attach`](LapRecordManager::attach) and publishes record announcements
//! back on the same bus.

pub mod pilot_record;

pub use pilot_record::PilotRecord;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{EventConfig, PrimaryTimingLocation};
use crate::events::TimingEvent;
use crate::race::RaceManager;
use crate::types::{Lap, LapId, Pilot, PilotId, best_consecutive, total_time};

/// The current overall best run for one lap count.
#[derive(Debug, Clone)]
pub struct OverallRecord {
    pub pilot: Pilot,
    pub laps: Vec<Lap>,
}

impl OverallRecord {
    pub fn time(&self) -> Duration {
        total_time(&self.laps)
    }

    fn contains(&self, lap: LapId) -> bool {
        self.laps.iter().any(|l| l.id == lap)
    }
}

/// A pilot's standing in one record category.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPosition {
    /// 1-based.
    pub position: usize,
    /// The pilot directly ahead, absent for the leader.
    pub behind: Option<Pilot>,
    /// Time to the pilot directly ahead.
    pub gap: Option<Duration>,
}

#[derive(Default)]
struct RecordState {
    pilots: HashMap<PilotId, PilotRecord>,
    overall: HashMap<u32, OverallRecord>,
}

/// Derived record index over the race store.
pub struct LapRecordManager {
    races: Arc<RaceManager>,
    state: Mutex<RecordState>,
}

/// Lap counts worth a record category: the holeshot (with a holeshot-located
/// primary gate), the single fastest lap, the consecutive-lap window, and the
/// full race distance.
pub fn tracked_lap_counts(config: &EventConfig) -> Vec<u32> {
    let mut counts = BTreeSet::new();
    if config.primary_timing_location == PrimaryTimingLocation::Holeshot {
        counts.insert(0);
    }
    counts.insert(1);
    counts.insert(config.pb_laps);
    counts.insert(config.target_laps);
    counts.into_iter().collect()
}

impl LapRecordManager {
    pub fn new(races: Arc<RaceManager>) -> Self {
        Self { races, state: Mutex::new(RecordState::default()) }
    }

    // --- queries ---------------------------------------------------------

    pub fn record_for(&self, pilot: PilotId, lap_count: u32) -> Option<Vec<Lap>> {
        self.state.lock().unwrap().pilots.get(&pilot)?.record(lap_count).map(<[Lap]>::to_vec)
    }

    pub fn record_time(&self, pilot: PilotId, lap_count: u32) -> Option<Duration> {
        self.state.lock().unwrap().pilots.get(&pilot)?.record_time(lap_count)
    }

    pub fn overall_best(&self, lap_count: u32) -> Option<OverallRecord> {
        self.state.lock().unwrap().overall.get(&lap_count).cloned()
    }

    /// Standing of a pilot among everyone holding a record for `lap_count`,
    /// ordered by record time ascending with name as the tie-break.
    pub fn position(&self, pilot: PilotId, lap_count: u32) -> Option<RecordPosition> {
        let state = self.state.lock().unwrap();
        let mut standings: Vec<(&PilotRecord, Duration)> = state
            .pilots
            .values()
            .filter_map(|record| record.record_time(lap_count).map(|time| (record, time)))
            .collect();
        standings.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.pilot.name.cmp(&b.0.pilot.name)));

        let index = standings.iter().position(|(record, _)| record.pilot.id == pilot)?;
        let ahead = index.checked_sub(1).map(|i| &standings[i]);
        Some(RecordPosition {
            position: index + 1,
            behind: ahead.map(|(record, _)| record.pilot.clone()),
            gap: ahead.map(|(_, time)| standings[index].1 - *time),
        })
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.pilots.clear();
        state.overall.clear();
    }

    /// Drop one pilot from the index. Any overall record they held passes to
    /// the next-best holder, or disappears with them.
    pub fn clear_pilot(&self, pilot: PilotId) {
        let config = self.races.config();
        let counts = tracked_lap_counts(&config);
        let events = {
            let mut state = self.state.lock().unwrap();
            state.pilots.remove(&pilot);
            state.overall.retain(|_, record| record.pilot.id != pilot);
            let mut events = Vec::new();
            for &count in &counts {
                if let Some(event) = refresh_overall(&mut state, count) {
                    events.push(event);
                }
            }
            events
        };
        for event in events {
            self.races.bus().publish(event);
        }
    }

    /// CSV export of personal bests: a header naming each tracked lap count,
    /// then one row per non-practice pilot ordered by name. Times are in
    /// seconds to the millisecond; missing records leave the cell empty.
    pub fn export_pbs_csv(&self) -> String {
        let config = self.races.config();
        let counts = tracked_lap_counts(&config);

        let mut out = String::from("Pilot");
        for &count in &counts {
            match count {
                0 => out.push_str(",Holeshot"),
                1 => out.push_str(",1 Lap"),
                n => out.push_str(&format!(",{n} Laps")),
            }
        }
        out.push('\n');

        let state = self.state.lock().unwrap();
        let mut rows: Vec<&PilotRecord> =
            state.pilots.values().filter(|record| !record.pilot.practice).collect();
        rows.sort_by(|a, b| a.pilot.name.cmp(&b.pilot.name));

        for record in rows {
            out.push_str(&record.pilot.name);
            for &count in &counts {
                out.push(',');
                if let Some(time) = record.record_time(count) {
                    out.push_str(&format!(
                        "{:.3}",
                        time.num_milliseconds() as f64 / 1000.0
                    ));
                }
            }
            out.push('\n');
        }
        out
    }

    // --- updates ---------------------------------------------------------

    /// Recompute one pilot's records from every race that counts, then
    /// refresh the overall records they may affect.
    pub fn update_pilot(&self, pilot: PilotId) {
        let config = self.races.config();
        let counts = tracked_lap_counts(&config);
        let races =
            self.races.races_matching(|race| race.kind.counts_for_records() && race.has_pilot(pilot));

        let Some(info) = races.iter().find_map(|race| race.pilot(pilot)).cloned() else {
            debug!(%pilot, "no counting races for pilot, skipping record update");
            return;
        };
        if info.practice {
            self.clear_pilot(pilot);
            return;
        }

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let record =
                state.pilots.entry(pilot).or_insert_with(|| PilotRecord::new(info.clone()));

            for &count in &counts {
                let candidate = best_run(&races, pilot, count);
                let improved = record.set_best(count, candidate.clone());
                if improved && !candidate.is_empty() {
                    events.push(TimingEvent::NewPersonalBest {
                        pilot,
                        lap_count: count,
                        laps: candidate,
                    });
                }
            }
            if state.pilots.get(&pilot).is_some_and(PilotRecord::is_empty) {
                state.pilots.remove(&pilot);
            }

            for &count in &counts {
                if let Some(event) = refresh_overall(&mut state, count) {
                    events.push(event);
                }
            }
        }
        for event in events {
            self.races.bus().publish(event);
        }
    }

    /// Rebuild the whole index from scratch.
    pub fn update_all(&self) {
        let races = self.races.races_matching(|race| race.kind.counts_for_records());
        let mut pilots: BTreeSet<PilotId> = BTreeSet::new();
        for race in &races {
            pilots.extend(race.pilots().map(|p| p.id));
        }
        info!(pilots = pilots.len(), races = races.len(), "rebuilding record index");
        for pilot in pilots {
            self.update_pilot(pilot);
        }
    }

    /// A lap was disqualified. When it backed an overall record the whole
    /// index is rebuilt, because the next-best run may belong to anyone.
    pub fn on_lap_disqualified(&self, lap: &Lap) {
        let in_overall = {
            let state = self.state.lock().unwrap();
            state.overall.values().any(|record| record.contains(lap.id))
        };
        if in_overall {
            info!(pilot = %lap.pilot_id, lap = lap.number, "overall record lost a lap, rebuilding");
            self.clear();
            self.update_all();
        } else {
            self.update_pilot(lap.pilot_id);
        }
    }

    /// Follow the engine's bus, keeping the index current. Runs until the
    /// bus closes.
    pub fn attach(self: &Arc<Self>) -> JoinHandle<()> {
        let records = Arc::clone(self);
        let mut events = self.races.bus().subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TimingEvent::LapDetected { lap }) => records.update_pilot(lap.pilot_id),
                    Ok(TimingEvent::LapDisqualified { lap }) => records.on_lap_disqualified(&lap),
                    Ok(TimingEvent::LapsRecalculated { pilot, .. }) => records.update_pilot(pilot),
                    Ok(TimingEvent::RaceEnd { .. }) => records.update_all(),
                    // A race disappearing may have backed any record; rebuild.
                    Ok(
                        TimingEvent::RaceClear { .. }
                        | TimingEvent::RaceReset { .. }
                        | TimingEvent::RaceRemoved { .. },
                    ) => {
                        records.clear();
                        records.update_all();
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "record index lagged, rebuilding");
                        records.update_all();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// The pilot's best run of `count` laps across the given races. Count 0 is
/// the fastest holeshot.
fn best_run(races: &[crate::race::Race], pilot: PilotId, count: u32) -> Vec<Lap> {
    let mut best: Vec<Lap> = Vec::new();
    for race in races {
        let candidate = if count == 0 {
            race.holeshot_for(pilot).map(|lap| vec![lap]).unwrap_or_default()
        } else {
            best_consecutive(&race.valid_laps(pilot), count as usize)
        };
        if candidate.is_empty() {
            continue;
        }
        if best.is_empty() || total_time(&candidate) < total_time(&best) {
            best = candidate;
        }
    }
    best
}

/// Recompute the overall record for one lap count from the pilot records.
///
/// The holder is replaced silently when the incumbent run was merely
/// recomputed (same leading lap); an announcement goes out only when a
/// strictly faster run takes the record.
fn refresh_overall(state: &mut RecordState, count: u32) -> Option<TimingEvent> {
    let best = state
        .pilots
        .values()
        .filter_map(|record| {
            record.record(count).map(|laps| OverallRecord {
                pilot: record.pilot.clone(),
                laps: laps.to_vec(),
            })
        })
        .min_by(|a, b| a.time().cmp(&b.time()).then_with(|| a.pilot.name.cmp(&b.pilot.name)))?;

    let previous = state.overall.get(&count);
    let announce = match previous {
        None => true,
        Some(old) => {
            let same_run = old.laps.first().map(|l| l.id) == best.laps.first().map(|l| l.id);
            best.time() < old.time() && !same_run
        }
    };

    let event = announce.then(|| TimingEvent::NewOverallBest {
        pilot: best.pilot.id,
        lap_count: count,
        laps: best.laps.clone(),
    });
    state.overall.insert(count, best);
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::RaceKind;
    use crate::timing::{DetectionEvent, TimingSystemKind, TimingSystemRole};
    use crate::types::{Band, Channel, PilotChannel};
    use chrono::{DateTime, Duration, Utc};

    fn crossing(frequency_mhz: u32, time: DateTime<Utc>) -> DetectionEvent {
        DetectionEvent {
            system_index: 0,
            kind: TimingSystemKind::Simulated,
            role: TimingSystemRole::Primary,
            frequency_mhz,
            time,
            peak: 800,
        }
    }

    fn run_race(manager: &RaceManager, laps: &[(u32, &[i64])]) {
        manager.start().unwrap();
        let start = manager.current_race().unwrap().start_time.unwrap();
        for &(freq, lengths) in laps {
            let mut at = start;
            manager.handle_detection_event(crossing(freq, at + Duration::seconds(1)));
            at += Duration::seconds(1);
            for &secs in lengths {
                at += Duration::seconds(secs);
                manager.handle_detection_event(crossing(freq, at));
            }
        }
        // Races at the target distance end themselves on the last crossing.
        if manager.current_race().unwrap().phase == crate::race::RacePhase::Running {
            manager.end().unwrap();
        }
    }

    fn setup(names: &[&str]) -> (Arc<RaceManager>, LapRecordManager, Vec<PilotId>) {
        let manager = Arc::new(RaceManager::new(EventConfig {
            target_laps: 3,
            pb_laps: 2,
            ..Default::default()
        }));
        manager.begin_race(RaceKind::Race);
        let mut pilots = Vec::new();
        for (index, name) in names.iter().enumerate() {
            let channel = Channel::new(Band::Raceband, index as u8 + 1, 5658 + index as u32 * 37);
            let assignment = PilotChannel::new(Pilot::new(*name), channel);
            pilots.push(assignment.pilot.id);
            manager.add_pilot(assignment).unwrap();
        }
        let records = LapRecordManager::new(Arc::clone(&manager));
        (manager, records, pilots)
    }

    #[test]
    fn tracked_counts_cover_all_categories() {
        let config =
            EventConfig { target_laps: 4, pb_laps: 3, ..Default::default() };
        assert_eq!(tracked_lap_counts(&config), vec![0, 1, 3, 4]);

        let start_gate = EventConfig {
            primary_timing_location: PrimaryTimingLocation::Start,
            ..config
        };
        assert_eq!(tracked_lap_counts(&start_gate), vec![1, 3, 4]);
    }

    #[test]
    fn records_derive_from_race_laps() {
        let (manager, records, pilots) = setup(&["A"]);
        run_race(&manager, &[(5658, &[10, 9, 11])]);
        records.update_pilot(pilots[0]);

        assert_eq!(records.record_time(pilots[0], 1), Some(Duration::seconds(9)));
        assert_eq!(records.record_time(pilots[0], 2), Some(Duration::seconds(19)));
        assert_eq!(records.record_time(pilots[0], 3), Some(Duration::seconds(30)));
        assert_eq!(records.record_time(pilots[0], 0), Some(Duration::seconds(1)));
    }

    #[test]
    fn overall_best_goes_to_the_fastest_pilot() {
        let (manager, records, pilots) = setup(&["A", "B"]);
        run_race(&manager, &[(5658, &[10, 10, 10]), (5695, &[9, 9, 20])]);
        records.update_all();

        // B has the fastest consecutive pair, A the fastest full race.
        assert_eq!(records.overall_best(2).unwrap().pilot.id, pilots[1]);
        assert_eq!(records.overall_best(3).unwrap().pilot.id, pilots[0]);
    }

    #[test]
    fn position_orders_by_time_then_name() {
        let (manager, records, pilots) = setup(&["B", "A", "C"]);
        // B and A share a best-pair time of 24s, C is faster at 23s.
        run_race(
            &manager,
            &[(5658, &[12, 12, 12]), (5695, &[12, 12, 12]), (5732, &[12, 11, 12])],
        );
        records.update_all();

        let c = records.position(pilots[2], 2).unwrap();
        assert_eq!(c.position, 1);
        assert!(c.behind.is_none());
        assert!(c.gap.is_none());

        let a = records.position(pilots[1], 2).unwrap();
        assert_eq!(a.position, 2);
        assert_eq!(a.behind.unwrap().name, "C");
        assert_eq!(a.gap, Some(Duration::seconds(1)));

        let b = records.position(pilots[0], 2).unwrap();
        assert_eq!(b.position, 3);
        assert_eq!(b.behind.unwrap().name, "A");
        assert_eq!(b.gap, Some(Duration::zero()));
    }

    #[test]
    fn disqualifying_a_record_lap_self_heals() {
        let (manager, records, pilots) = setup(&["A"]);
        run_race(&manager, &[(5658, &[9, 10, 11])]);
        records.update_all();
        assert_eq!(records.record_time(pilots[0], 1), Some(Duration::seconds(9)));

        let race = manager.current_race().unwrap();
        let fastest = race
            .valid_laps(pilots[0])
            .into_iter()
            .min_by_key(|lap| lap.length())
            .unwrap();
        manager.disqualify_lap(race.id, fastest.id).unwrap();
        records.on_lap_disqualified(&fastest);

        // The single-lap record falls back to the next-fastest valid lap, and
        // the consecutive window can no longer span the gap.
        assert_eq!(records.record_time(pilots[0], 1), Some(Duration::seconds(10)));
        assert_eq!(records.record_time(pilots[0], 2), Some(Duration::seconds(21)));
    }

    #[test]
    fn practice_races_do_not_count() {
        let manager = Arc::new(RaceManager::new(EventConfig {
            target_laps: 3,
            pb_laps: 2,
            ..Default::default()
        }));
        manager.begin_race(RaceKind::Practice);
        let assignment =
            PilotChannel::new(Pilot::new("A"), Channel::new(Band::Raceband, 1, 5658));
        let pilot = assignment.pilot.id;
        manager.add_pilot(assignment).unwrap();
        run_race(&manager, &[(5658, &[10, 10, 10])]);

        let records = LapRecordManager::new(Arc::clone(&manager));
        records.update_all();
        assert!(records.record_time(pilot, 1).is_none());
        assert!(records.overall_best(1).is_none());
    }

    #[test]
    fn clear_pilot_hands_overall_to_the_next_holder() {
        let (manager, records, pilots) = setup(&["A", "B"]);
        run_race(&manager, &[(5658, &[9, 10, 11]), (5695, &[10, 11, 12])]);
        records.update_all();
        assert_eq!(records.overall_best(1).unwrap().pilot.id, pilots[0]);

        records.clear_pilot(pilots[0]);
        assert!(records.record_time(pilots[0], 1).is_none());
        assert_eq!(records.overall_best(1).unwrap().pilot.id, pilots[1]);
        assert_eq!(records.overall_best(1).unwrap().time(), Duration::seconds(10));
    }

    #[test]
    fn practice_flag_clears_overall_records_too() {
        let manager = Arc::new(RaceManager::new(EventConfig {
            target_laps: 3,
            pb_laps: 2,
            ..Default::default()
        }));
        manager.begin_race(RaceKind::Race);
        let assignment =
            PilotChannel::new(Pilot::practice("A"), Channel::new(Band::Raceband, 1, 5658));
        let pilot_info = assignment.pilot.clone();
        let pilot = pilot_info.id;
        manager.add_pilot(assignment).unwrap();
        run_race(&manager, &[(5658, &[10, 10, 10])]);

        let records = LapRecordManager::new(Arc::clone(&manager));
        // Seed entries as if the pilot had raced before being flagged
        // practice.
        let lap = manager.current_race().unwrap().valid_laps(pilot)[0].clone();
        {
            let mut state = records.state.lock().unwrap();
            let mut record = PilotRecord::new(pilot_info.clone());
            record.set_best(1, vec![lap.clone()]);
            state.pilots.insert(pilot, record);
            state.overall.insert(1, OverallRecord { pilot: pilot_info, laps: vec![lap] });
        }

        records.update_pilot(pilot);
        assert!(records.record_time(pilot, 1).is_none());
        assert!(records.overall_best(1).is_none());
    }

    #[test]
    fn csv_export_has_one_column_per_tracked_count() {
        let (manager, records, _pilots) = setup(&["B", "A"]);
        run_race(&manager, &[(5658, &[12, 12, 12]), (5695, &[10, 9, 11])]);
        records.update_all();

        let csv = records.export_pbs_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Pilot,Holeshot,1 Lap,2 Laps,3 Laps");
        assert_eq!(lines.len(), 3);

        // Rows come out name-ordered regardless of entry order.
        assert_eq!(lines[1], "A,1.000,9.000,19.000,30.000");
        assert_eq!(lines[2], "B,1.000,12.000,24.000,36.000");
    }

    #[test]
    fn csv_export_leaves_missing_records_empty() {
        let (manager, records, _pilots) = setup(&["A"]);
        // Two laps only, so the 3-lap column stays empty.
        run_race(&manager, &[(5658, &[10, 9])]);
        records.update_all();

        let csv = records.export_pbs_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "A,1.000,9.000,19.000,");
    }

    #[tokio::test]
    async fn attach_keeps_the_index_current() {
        let (manager, records, pilots) = setup(&["A"]);
        let records = Arc::new(records);
        let _task = records.attach();

        run_race(&manager, &[(5658, &[10, 9, 11])]);

        // Let the follower drain the bus.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if records.record_time(pilots[0], 1).is_some() {
                break;
            }
        }
        assert_eq!(records.record_time(pilots[0], 1), Some(Duration::seconds(9)));
    }
}
