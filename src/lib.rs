//! Live race timing engine for multi-competitor events.
//!
//! Lapline turns raw gate crossings into attributed laps, race standings and
//! lap records, for events where several competitors fly or drive at once on
//! separate video frequencies.
//!
//! # Architecture
//!
//! - [`timing`] owns the detectors: every [`TimingSystem`] pushes raw
//!   [`DetectionEvent`]s into one funnel serialized by the
//!   [`TimingSystemManager`].
//! - [`race`] scores them: the [`RaceManager`] attributes each crossing to a
//!   pilot, builds laps, enforces the lifecycle and computes results.
//! - [`records`] derives personal and overall bests from the race store.
//! - Everything external observes the engine through the broadcast
//!   [`EventBus`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lapline::{EventConfig, Lapline, RaceKind, SimulatedSettings, SimulatedTimingSystem};
//! use lapline::types::{Band, Channel, Pilot, PilotChannel};
//!
//! #[tokio::main]
//! async fn main() -> lapline::Result<()> {
//!     let mut engine = Lapline::new(EventConfig::default());
//!     engine.add_system(Box::new(SimulatedTimingSystem::new(SimulatedSettings::default())));
//!     engine.connect().await;
//!
//!     engine.races.begin_race(RaceKind::Race);
//!     engine.races.add_pilot(PilotChannel::new(
//!         Pilot::new("Alex"),
//!         Channel::new(Band::Raceband, 7, 5880),
//!     ))?;
//!
//!     engine.spawn_followers();
//!     engine.arm().await?;
//!     engine.races.start()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod race;
pub mod records;
pub mod settings;
pub mod timing;
pub mod types;

pub use config::{EventConfig, PrimaryTimingLocation};
pub use error::{Result, TimingError};
pub use events::{EventBus, TimingEvent};
pub use race::{Race, RaceKind, RaceManager, RacePhase};
pub use records::{LapRecordManager, OverallRecord, RecordPosition};
pub use settings::SettingsStore;
pub use timing::{
    DetectionEvent, DetectionSink, FramedPort, ListeningFrequency, SerialTimingSystem,
    SimulatedSettings, SimulatedTimingSystem, StatusItem, TimingSystem, TimingSystemKind,
    TimingSystemManager, TimingSystemRole, TimingSystemSettings,
};
pub use types::*;

use std::sync::Arc;

use tokio::task::JoinHandle;

/// Pre-wired engine: detectors, race scoring and the record index sharing
/// one event bus.
///
/// Components remain individually usable; this is the assembly most
/// applications want.
pub struct Lapline {
    pub races: Arc<RaceManager>,
    pub records: Arc<LapRecordManager>,
    pub timing: TimingSystemManager,
}

impl Lapline {
    pub fn new(config: EventConfig) -> Self {
        let races = Arc::new(RaceManager::new(config));
        let records = Arc::new(LapRecordManager::new(Arc::clone(&races)));
        Self { races, records, timing: TimingSystemManager::new() }
    }

    /// Register a detector. Its registration order is its sector number.
    pub fn add_system(&mut self, system: Box<dyn TimingSystem>) -> usize {
        self.timing.add_system(system)
    }

    /// Bring up every detector link. Returns how many connected.
    pub async fn connect(&mut self) -> usize {
        self.timing.connect_all().await
    }

    /// Spawn the detection intake task and the record follower. Call once,
    /// before arming.
    pub fn spawn_followers(&mut self) -> (JoinHandle<()>, JoinHandle<()>) {
        let intake = self.races.attach(&mut self.timing);
        let records = self.records.attach();
        (intake, records)
    }

    /// Arm the current race: push its frequencies and start detection.
    pub async fn arm(&mut self) -> Result<()> {
        self.races.arm(&mut self.timing).await
    }

    /// Subscribe to everything the engine publishes.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TimingEvent> {
        self.races.bus().subscribe()
    }

    /// Stop detection and tear down the detector links.
    pub async fn shutdown(&mut self) {
        self.timing.shutdown().await;
    }
}
