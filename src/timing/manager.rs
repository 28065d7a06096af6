//! Supervision of a set of timing systems.
//!
//! `TimingSystemManager` owns every configured [`TimingSystem`], starts and
//! stops them together, and funnels their concurrently produced events into a
//! single queue consumed by one forwarding task: the serialized handling
//! point the race engine requires. Events from the same system arrive in the
//! order generated (per-system FIFO through one channel); ordering across
//! systems is the race engine's job via the race-sector key.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DetectionEvent, DetectionSink, ListeningFrequency, StatusItem, TimingSystem};
use crate::error::{Result, TimingError};

/// Coordinator for all configured detectors.
pub struct TimingSystemManager {
    systems: Vec<Box<dyn TimingSystem>>,
    tx: mpsc::UnboundedSender<DetectionEvent>,
    rx: Option<mpsc::UnboundedReceiver<DetectionEvent>>,
    cancel: CancellationToken,
    detecting: bool,
}

impl TimingSystemManager {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { systems: Vec::new(), tx, rx: Some(rx), cancel: CancellationToken::new(), detecting: false }
    }

    /// Register a system; its index is its position and its sector number.
    pub fn add_system(&mut self, system: Box<dyn TimingSystem>) -> usize {
        self.systems.push(system);
        self.systems.len() - 1
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    /// The smallest pilot capacity across systems bounds the event.
    pub fn max_pilots(&self) -> usize {
        self.systems.iter().map(|s| s.max_pilots()).min().unwrap_or(0)
    }

    /// Connect every system; returns how many links came up.
    pub async fn connect_all(&mut self) -> usize {
        let mut connected = 0;
        for system in &mut self.systems {
            if system.connect().await {
                connected += 1;
            } else {
                warn!(system = %system.name(), "connect failed");
            }
        }
        info!(connected, total = self.systems.len(), "timing systems connected");
        connected
    }

    /// Arm every system for a race start: push the listening frequencies,
    /// then start detection on all of them.
    ///
    /// Any failure aborts the whole arm (systems already started are stopped
    /// again so no partial-armed state remains) and the error names each
    /// failed system. Systems that refused their frequencies get a reconnect
    /// attempt so the next arm can succeed.
    pub async fn arm(&mut self, frequencies: &[ListeningFrequency]) -> Result<()> {
        let mut failed: Vec<String> = Vec::new();

        for system in &mut self.systems {
            if !system.set_listening_frequencies(frequencies).await {
                warn!(system = %system.name(), "rejected listening frequencies, reconnecting");
                failed.push(system.name());
                system.connect().await;
            }
        }
        if !failed.is_empty() {
            return Err(TimingError::arm_failed(failed));
        }

        let mut started: Vec<usize> = Vec::new();
        for (index, system) in self.systems.iter_mut().enumerate() {
            let sink =
                DetectionSink::new(index, system.kind(), system.settings().role, self.tx.clone());
            if system.start_detection(sink).await {
                started.push(index);
            } else {
                warn!(system = %system.name(), "start_detection failed");
                failed.push(system.name());
            }
        }

        if !failed.is_empty() {
            for index in started {
                self.systems[index].end_detection().await;
            }
            for system in &mut self.systems {
                if !system.connected() {
                    system.connect().await;
                }
            }
            return Err(TimingError::arm_failed(failed));
        }

        self.detecting = true;
        info!(systems = self.systems.len(), "armed");
        Ok(())
    }

    /// Stop detection everywhere. Returns false when nothing was running.
    pub async fn end_detection(&mut self) -> bool {
        if !self.detecting {
            return false;
        }
        self.detecting = false;

        let mut any = false;
        for system in &mut self.systems {
            any |= system.end_detection().await;
        }
        info!("detection ended");
        any
    }

    /// Take ownership of the raw event queue, for consumers that want to run
    /// their own loop instead of [`attach`](Self::attach).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<DetectionEvent>> {
        self.rx.take()
    }

    /// Spawn the forwarding task: one consumer draining the funnel in order
    /// and handing each event to `handler`.
    ///
    /// Panics if the receiver was already taken.
    pub fn attach<F>(&mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(DetectionEvent) + Send + 'static,
    {
        let mut rx = self.rx.take().expect("event receiver already taken");
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("detection funnel cancelled");
                        break;
                    }
                    event = rx.recv() => match event {
                        Some(event) => handler(event),
                        None => {
                            debug!("all detection sinks dropped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Diagnostics for every system, by name.
    pub fn status(&self) -> Vec<(String, Vec<StatusItem>)> {
        self.systems.iter().map(|s| (s.name(), s.status())).collect()
    }

    /// Stop everything and tear down the links.
    pub async fn shutdown(&mut self) {
        self.end_detection().await;
        for system in &mut self.systems {
            system.disconnect().await;
        }
        self.cancel.cancel();
    }
}

impl Default for TimingSystemManager {
    fn default() -> Self {
        Self::new()
    }
}
