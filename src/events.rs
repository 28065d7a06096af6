//! Lifecycle event publishing.
//!
//! The engine publishes its external surface through one broadcast bus:
//! many independent subscribers, fire-and-forget. UI, persistence and audio
//! layers observe the core exclusively through these events. Unsubscribing is
//! dropping the receiver; a subscriber that falls behind loses the oldest
//! events rather than stalling the hot path.

use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::types::{Lap, PilotChannel, PilotId, RaceId};

/// Default bus capacity; laggards past this many undelivered events skip.
const DEFAULT_CAPACITY: usize = 256;

/// Everything external consumers may observe about the core.
#[derive(Debug, Clone)]
pub enum TimingEvent {
    LapDetected { lap: Lap },
    LapDisqualified { lap: Lap },
    /// A split (non-primary sector) crossing; carries the pilot's laps so far.
    LapSplit { pilot: PilotId, laps: Vec<Lap> },
    RaceStart { race: RaceId },
    RaceEnd { race: RaceId },
    RaceClear { race: RaceId },
    RaceReset { race: RaceId },
    RaceResumed { race: RaceId },
    RaceChanged { race: RaceId },
    RaceRemoved { race: RaceId },
    /// Lap validity was edited; downstream state for this pilot must be
    /// recomputed rather than patched.
    LapsRecalculated { race: RaceId, pilot: PilotId },
    PilotAdded { race: RaceId, assignment: PilotChannel },
    PilotRemoved { race: RaceId, assignment: PilotChannel },
    NewPersonalBest { pilot: PilotId, lap_count: u32, laps: Vec<Lap> },
    NewOverallBest { pilot: PilotId, lap_count: u32, laps: Vec<Lap> },
}

/// Broadcast bus for [`TimingEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers. No subscribers is not an error.
    pub fn publish(&self, event: TimingEvent) {
        trace!(?event, "publish");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimingEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`, silently skipping lagged gaps.
    pub fn stream(&self) -> impl futures::Stream<Item = TimingEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| item.ok())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
