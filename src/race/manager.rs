//! Race orchestration: lifecycle, pilot assignment, and detection intake.
//!
//! `RaceManager` is the single writer over all race state. Detection intake
//! runs on the one funnel task the [`TimingSystemManager`] provides, so every
//! mutation of a race happens under the state lock in event order. Lifecycle
//! events are collected while the lock is held and published after it is
//! released; a subscriber can call back into the manager without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::results::compute_results;
use super::{Race, RaceKind, RacePhase};
use crate::config::{EventConfig, PrimaryTimingLocation};
use crate::error::{Result, TimingError};
use crate::events::{EventBus, TimingEvent};
use crate::timing::{
    DetectionEvent, ListeningFrequency, TimingSystemManager, TimingSystemRole,
};
use crate::types::{Detection, Lap, LapId, PilotChannel, PilotId, RaceId};

#[derive(Default)]
struct State {
    races: HashMap<RaceId, Race>,
    current: Option<RaceId>,
}

/// Owner of all races and the detection intake path.
pub struct RaceManager {
    config: RwLock<EventConfig>,
    bus: EventBus,
    state: Mutex<State>,
}

impl RaceManager {
    pub fn new(config: EventConfig) -> Self {
        Self {
            config: RwLock::new(config),
            bus: EventBus::default(),
            state: Mutex::new(State::default()),
        }
        .validate_config()
    }

    fn validate_config(self) -> Self {
        {
            let config = self.config.read().unwrap();
            if config.pb_laps > config.target_laps {
                warn!(
                    pb_laps = config.pb_laps,
                    target_laps = config.target_laps,
                    "consecutive-lap record window exceeds the race target"
                );
            }
        }
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> EventConfig {
        self.config.read().unwrap().clone()
    }

    pub fn set_config(&self, config: EventConfig) {
        *self.config.write().unwrap() = config;
    }

    // --- race lookup -----------------------------------------------------

    /// Create a new race and make it current.
    pub fn begin_race(&self, kind: RaceKind) -> RaceId {
        let target_laps = self.config.read().unwrap().target_laps;
        let race = Race::new(kind, target_laps);
        let id = race.id;

        let mut state = self.state.lock().unwrap();
        state.races.insert(id, race);
        state.current = Some(id);
        info!(race = %id, ?kind, target_laps, "race created");
        id
    }

    pub fn current_race_id(&self) -> Option<RaceId> {
        self.state.lock().unwrap().current
    }

    /// Snapshot of the current race.
    pub fn current_race(&self) -> Option<Race> {
        let state = self.state.lock().unwrap();
        state.current.and_then(|id| state.races.get(&id).cloned())
    }

    /// Snapshot of a race by id.
    pub fn race(&self, id: RaceId) -> Result<Race> {
        self.state
            .lock()
            .unwrap()
            .races
            .get(&id)
            .cloned()
            .ok_or(TimingError::UnknownRace { id })
    }

    /// Snapshots of every race matching the predicate.
    pub fn races_matching(&self, predicate: impl Fn(&Race) -> bool) -> Vec<Race> {
        self.state.lock().unwrap().races.values().filter(|r| predicate(r)).cloned().collect()
    }

    /// Find which races a pilot is assigned to.
    pub fn races_with_pilot(&self, pilot: PilotId) -> Vec<RaceId> {
        self.races_matching(|race| race.has_pilot(pilot)).into_iter().map(|r| r.id).collect()
    }

    pub fn remove_race(&self, id: RaceId) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.races.remove(&id).is_none() {
                return Err(TimingError::UnknownRace { id });
            }
            if state.current == Some(id) {
                state.current = None;
            }
        }
        self.bus.publish(TimingEvent::RaceRemoved { race: id });
        Ok(())
    }

    // --- assignments -----------------------------------------------------

    /// Assign a pilot to the current race. Only possible before the start.
    pub fn add_pilot(&self, assignment: PilotChannel) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            if !matches!(race.phase, RacePhase::Idle | RacePhase::Armed) {
                return Err(TimingError::InvalidTransition {
                    from: race.phase,
                    action: "add pilot",
                });
            }
            race.add_assignment(assignment.clone())?;
            TimingEvent::PilotAdded { race: race.id, assignment }
        };
        self.bus.publish(event);
        Ok(())
    }

    pub fn remove_pilot(&self, pilot: PilotId) -> Result<PilotChannel> {
        let (event, assignment) = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            let assignment =
                race.remove_pilot(pilot).ok_or(TimingError::UnknownPilot { id: pilot })?;
            (
                TimingEvent::PilotRemoved { race: race.id, assignment: assignment.clone() },
                assignment,
            )
        };
        self.bus.publish(event);
        Ok(assignment)
    }

    /// Live position display order for the current race.
    ///
    /// A holeshot crossing reorders the display only when
    /// `react_to_holeshot` is set; otherwise positions hold until a genuine
    /// lap boundary.
    pub fn live_positions(&self) -> Result<Vec<crate::types::Pilot>> {
        let react = self.config.read().unwrap().react_to_holeshot;
        let state = self.state.lock().unwrap();
        let race = current_ref(&state)?;
        Ok(race.live_order(react))
    }

    /// Frequencies the timing systems should listen on for the current race.
    pub fn listening_frequencies(&self) -> Result<Vec<ListeningFrequency>> {
        let state = self.state.lock().unwrap();
        let race = current_ref(&state)?;
        Ok(race
            .assignments()
            .iter()
            .map(|a| ListeningFrequency::new(a.channel.frequency_mhz, 1.0))
            .collect())
    }

    // --- lifecycle -------------------------------------------------------

    /// Push the current race's frequencies to the hardware and start
    /// detection everywhere. `Idle → Armed`.
    pub async fn arm(&self, timing: &mut TimingSystemManager) -> Result<()> {
        let frequencies = {
            let state = self.state.lock().unwrap();
            let race = current_ref(&state)?;
            if race.phase != RacePhase::Idle {
                return Err(TimingError::InvalidTransition { from: race.phase, action: "arm" });
            }
            race.assignments()
                .iter()
                .map(|a| ListeningFrequency::new(a.channel.frequency_mhz, 1.0))
                .collect::<Vec<_>>()
        };

        // The state lock is not held across the await; the phase check
        // repeats afterwards in case the race changed underneath.
        timing.arm(&frequencies).await?;

        let mut state = self.state.lock().unwrap();
        let race = current_mut(&mut state)?;
        if race.phase != RacePhase::Idle {
            return Err(TimingError::InvalidTransition { from: race.phase, action: "arm" });
        }
        race.phase = RacePhase::Armed;
        info!(race = %race.id, "armed");
        Ok(())
    }

    /// Start the clock. `Idle | Armed → Running`.
    pub fn start(&self) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            if !matches!(race.phase, RacePhase::Idle | RacePhase::Armed) {
                return Err(TimingError::InvalidTransition { from: race.phase, action: "start" });
            }
            race.phase = RacePhase::Running;
            race.start_time = Some(Utc::now());
            info!(race = %race.id, "race started");
            TimingEvent::RaceStart { race: race.id }
        };
        self.bus.publish(event);
        Ok(())
    }

    /// Suspend detection intake without losing state. `Running → Paused`.
    pub fn pause(&self) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            if race.phase != RacePhase::Running {
                return Err(TimingError::InvalidTransition { from: race.phase, action: "pause" });
            }
            race.phase = RacePhase::Paused;
            TimingEvent::RaceChanged { race: race.id }
        };
        self.bus.publish(event);
        Ok(())
    }

    /// `Paused → Running`.
    pub fn resume(&self) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            if race.phase != RacePhase::Paused {
                return Err(TimingError::InvalidTransition { from: race.phase, action: "resume" });
            }
            race.phase = RacePhase::Running;
            TimingEvent::RaceResumed { race: race.id }
        };
        self.bus.publish(event);
        Ok(())
    }

    /// Stop the race and compute results. `Running | Paused → Ended`.
    pub fn end(&self) -> Result<()> {
        let config = self.config();
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            if !matches!(race.phase, RacePhase::Running | RacePhase::Paused) {
                return Err(TimingError::InvalidTransition { from: race.phase, action: "end" });
            }
            end_race(race, &config)
        };
        self.bus.publish(event);
        Ok(())
    }

    /// Drop all scoring but keep the assignments. Any phase back to `Idle`.
    pub fn reset(&self) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            race.clear_scoring();
            race.phase = RacePhase::Idle;
            info!(race = %race.id, "race reset");
            TimingEvent::RaceReset { race: race.id }
        };
        self.bus.publish(event);
        Ok(())
    }

    /// Drop scoring and assignments both. Any phase back to `Idle`.
    pub fn clear(&self) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            race.clear_scoring();
            race.clear_assignments();
            race.phase = RacePhase::Idle;
            TimingEvent::RaceClear { race: race.id }
        };
        self.bus.publish(event);
        Ok(())
    }

    pub fn set_target_laps(&self, target_laps: u32) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let race = current_mut(&mut state)?;
            race.target_laps = target_laps;
            TimingEvent::RaceChanged { race: race.id }
        };
        self.bus.publish(event);
        Ok(())
    }

    // --- lap edits -------------------------------------------------------

    /// Mark a lap invalid by operator decision.
    pub fn disqualify_lap(&self, race_id: RaceId, lap: LapId) -> Result<()> {
        self.set_lap_validity(race_id, lap, false)
    }

    /// Restore a previously disqualified lap.
    pub fn requalify_lap(&self, race_id: RaceId, lap: LapId) -> Result<()> {
        self.set_lap_validity(race_id, lap, true)
    }

    fn set_lap_validity(&self, race_id: RaceId, lap_id: LapId, valid: bool) -> Result<()> {
        let config = self.config();
        let events = {
            let mut state = self.state.lock().unwrap();
            let race =
                state.races.get_mut(&race_id).ok_or(TimingError::UnknownRace { id: race_id })?;
            let lap = race.lap(lap_id).cloned().ok_or(TimingError::UnknownLap { id: lap_id })?;

            let detection = race
                .detection_mut(lap.detection_id)
                .ok_or(TimingError::UnknownLap { id: lap_id })?;
            detection.valid = valid;
            detection.validity = crate::types::ValidityKind::ManualOverride;
            info!(race = %race_id, lap = lap.number, pilot = %lap.pilot_id, valid, "lap validity edited");

            let mut events = vec![
                TimingEvent::LapDisqualified { lap: lap.clone() },
                TimingEvent::LapsRecalculated { race: race_id, pilot: lap.pilot_id },
            ];
            if valid {
                // Requalification is still a recalculation trigger, just not
                // a disqualification announcement.
                events.remove(0);
            }
            if race.phase == RacePhase::Ended {
                let results = compute_results(race, &config);
                race.set_results(results);
            }
            events
        };
        for event in events {
            self.bus.publish(event);
        }
        Ok(())
    }

    // --- detection intake ------------------------------------------------

    /// Wire this manager into the timing funnel. The returned task runs until
    /// the funnel is cancelled or every sink is dropped.
    pub fn attach(self: &Arc<Self>, timing: &mut TimingSystemManager) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        timing.attach(move |event| manager.handle_detection_event(event))
    }

    /// The intake hot path: attribute a raw crossing to a pilot and score it.
    ///
    /// Crossings outside a running race, or on frequencies with no assigned
    /// pilot, are dropped. A boundary crossing closing a lap shorter than the
    /// configured minimum is recorded but auto-disqualified, and does not
    /// advance the lap count or the next lap's start.
    pub fn handle_detection_event(&self, event: DetectionEvent) {
        let config = self.config();
        let events = {
            let mut state = self.state.lock().unwrap();
            let Some(race) = state.current.and_then(|id| state.races.get_mut(&id)) else {
                debug!(?event, "crossing without a current race, dropped");
                return;
            };
            if race.phase != RacePhase::Running {
                debug!(phase = ?race.phase, "crossing outside a running race, dropped");
                return;
            }
            let Some(assignment) = race.assignment_for_frequency(event.frequency_mhz) else {
                debug!(frequency = event.frequency_mhz, "crossing on unassigned frequency, dropped");
                return;
            };
            let pilot = assignment.pilot.id;
            let channel = assignment.channel;

            match event.role {
                TimingSystemRole::Primary => {
                    score_boundary(race, &config, pilot, channel, &event)
                }
                TimingSystemRole::Split => {
                    let lap_number = pending_lap_number(race, &config, pilot);
                    let detection = Detection::new(
                        event.kind,
                        event.system_index,
                        pilot,
                        channel,
                        event.time,
                        lap_number,
                        false,
                        event.peak,
                    );
                    race.insert_detection(detection);
                    vec![TimingEvent::LapSplit { pilot, laps: race.laps_for(pilot) }]
                }
            }
        };
        for event in events {
            self.bus.publish(event);
        }
    }
}

fn current_ref<'a>(state: &'a State) -> Result<&'a Race> {
    let id = state.current.ok_or(TimingError::NoCurrentRace)?;
    state.races.get(&id).ok_or(TimingError::UnknownRace { id })
}

fn current_mut<'a>(state: &'a mut State) -> Result<&'a mut Race> {
    let id = state.current.ok_or(TimingError::NoCurrentRace)?;
    state.races.get_mut(&id).ok_or(TimingError::UnknownRace { id })
}

/// Lap number the pilot's next boundary crossing would close.
fn pending_lap_number(race: &Race, config: &EventConfig, pilot: PilotId) -> u32 {
    let boundaries = race.valid_boundary_count(pilot) as u32;
    match config.primary_timing_location {
        PrimaryTimingLocation::Holeshot => boundaries,
        PrimaryTimingLocation::Start => boundaries + 1,
    }
}

/// Score a primary-gate crossing: build the detection and lap, decide
/// validity, and end the race when everyone has finished.
fn score_boundary(
    race: &mut Race,
    config: &EventConfig,
    pilot: PilotId,
    channel: crate::types::Channel,
    event: &DetectionEvent,
) -> Vec<TimingEvent> {
    let lap_number = pending_lap_number(race, config, pilot);

    if race.kind.respects_target() && lap_number > race.target_laps {
        debug!(%pilot, lap_number, "crossing past the target lap, dropped");
        return Vec::new();
    }

    let lap_start = race
        .last_valid_boundary(pilot)
        .or(race.start_time)
        .unwrap_or(event.time);
    let valid = lap_number == 0 || event.time - lap_start >= config.min_lap_time();

    let mut detection = Detection::new(
        event.kind,
        event.system_index,
        pilot,
        channel,
        event.time,
        lap_number,
        true,
        event.peak,
    );
    detection.valid = valid;
    let detection_id = detection.id;
    race.insert_detection(detection);

    let lap = Lap {
        id: LapId::new(),
        detection_id,
        race_id: race.id,
        pilot_id: pilot,
        number: lap_number,
        start: lap_start,
        end: event.time,
    };
    race.push_lap(lap.clone());

    let mut events = if valid {
        debug!(%pilot, lap = lap_number, length = %lap.length(), "lap scored");
        vec![TimingEvent::LapDetected { lap }]
    } else {
        debug!(%pilot, lap = lap_number, "crossing under the minimum lap time, disqualified");
        vec![TimingEvent::LapDisqualified { lap }]
    };

    if race.kind.respects_target() {
        let all_finished = race.pilots().map(|p| p.id).collect::<Vec<_>>();
        if !all_finished.is_empty() && all_finished.iter().all(|&p| race.finished(p)) {
            events.push(end_race(race, config));
        }
    }
    events
}

fn end_race(race: &mut Race, config: &EventConfig) -> TimingEvent {
    race.phase = RacePhase::Ended;
    race.end_time = Some(Utc::now());
    let results = compute_results(race, config);
    race.set_results(results);
    info!(race = %race.id, "race ended");
    TimingEvent::RaceEnd { race: race.id }
}
