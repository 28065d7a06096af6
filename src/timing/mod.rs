//! The timing-system abstraction and its implementations.
//!
//! A [`TimingSystem`] is one physical or simulated detector. Each variant
//! runs its detection-producing workers on its own execution context and
//! pushes [`DetectionEvent`]s through a [`DetectionSink`]; the
//! [`TimingSystemManager`](manager::TimingSystemManager) funnels every sink
//! into one serialized handling point for the race engine.
//!
//! Hardware faults never cross this boundary as panics or errors: the
//! contract methods report `bool`, failures are logged, and `connected()`
//! flips false so the caller can retry an explicit reconnect.

pub mod manager;
pub mod protocol;
pub mod serial;
pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

pub use manager::TimingSystemManager;
pub use serial::{FramedPort, SerialTimingSystem};
pub use simulated::{SimulatedSettings, SimulatedTimingSystem};

/// What kind of detector a system is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimingSystemKind {
    Simulated,
    Serial,
    Network,
    Manual,
}

/// Whether a system marks lap boundaries or intermediate sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimingSystemRole {
    #[default]
    Primary,
    Split,
}

/// A frequency the system should listen on, with per-frequency sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListeningFrequency {
    /// Absolute MHz value, e.g. 5880 for Raceband 7.
    pub frequency_mhz: u32,
    /// 1.0 is nominal sensitivity.
    pub sensitivity: f32,
}

impl ListeningFrequency {
    pub fn new(frequency_mhz: u32, sensitivity: f32) -> Self {
        Self { frequency_mhz, sensitivity }
    }
}

impl fmt::Display for ListeningFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mhz({}%)", self.frequency_mhz, self.sensitivity * 100.0)
    }
}

/// Settings common to every timing system variant.
///
/// Gettable/settable so an external settings layer can persist them; see
/// [`crate::settings`] for the durable read/write surface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimingSystemSettings {
    pub role: TimingSystemRole,
    /// Sector length in meters, used for speed calculation. 0 disables it.
    pub sector_length_meters: f32,
}

/// One diagnostic reading, e.g. gate voltage or temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusItem {
    pub value: String,
    pub ok: bool,
}

/// One detection as reported by a system, before race attribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    pub system_index: usize,
    pub kind: TimingSystemKind,
    pub role: TimingSystemRole,
    /// Absolute MHz value, not a channel index.
    pub frequency_mhz: u32,
    pub time: DateTime<Utc>,
    pub peak: u16,
}

/// Per-system handle for raising detection events.
///
/// Cheap to clone into workers; stamps the owning system's identity on every
/// event. Events from one sink preserve their send order end to end.
#[derive(Debug, Clone)]
pub struct DetectionSink {
    system_index: usize,
    kind: TimingSystemKind,
    role: TimingSystemRole,
    tx: mpsc::UnboundedSender<DetectionEvent>,
}

impl DetectionSink {
    pub fn new(
        system_index: usize,
        kind: TimingSystemKind,
        role: TimingSystemRole,
        tx: mpsc::UnboundedSender<DetectionEvent>,
    ) -> Self {
        Self { system_index, kind, role, tx }
    }

    /// Raise one detection. Returns false when the consumer is gone.
    pub fn emit(&self, frequency_mhz: u32, time: DateTime<Utc>, peak: u16) -> bool {
        let event = DetectionEvent {
            system_index: self.system_index,
            kind: self.kind,
            role: self.role,
            frequency_mhz,
            time,
            peak,
        };
        if self.tx.send(event).is_err() {
            warn!(system = self.system_index, "detection consumer dropped");
            return false;
        }
        true
    }

    pub fn system_index(&self) -> usize {
        self.system_index
    }
}

/// One physical or simulated detector.
///
/// `set_listening_frequencies` is called before every race start; returning
/// false makes the caller treat the system as failed and attempt a reconnect
/// instead of starting the race. `start_detection` returning false aborts
/// race start for this system.
#[async_trait]
pub trait TimingSystem: Send + Sync {
    fn kind(&self) -> TimingSystemKind;

    /// Human-readable name for arm-failure reporting.
    fn name(&self) -> String {
        format!("{:?}", self.kind())
    }

    fn connected(&self) -> bool;

    /// Establish the link. Safe to call while connected (reconnects).
    /// Returns false on failure, never panics.
    async fn connect(&mut self) -> bool;

    /// Graceful teardown. Never panics.
    async fn disconnect(&mut self) -> bool;

    async fn set_listening_frequencies(&mut self, frequencies: &[ListeningFrequency]) -> bool;

    /// Begin the concurrent detection-producing activity, emitting into
    /// `sink` from the system's own workers.
    async fn start_detection(&mut self, sink: DetectionSink) -> bool;

    /// Stop and join all detection workers. Returns false (and performs no
    /// joins) when none are running.
    async fn end_detection(&mut self) -> bool;

    fn max_pilots(&self) -> usize;

    fn settings(&self) -> TimingSystemSettings;

    fn set_settings(&mut self, settings: TimingSystemSettings);

    /// Lazily computed diagnostics; monitoring only, not correctness.
    fn status(&self) -> Vec<StatusItem>;
}
