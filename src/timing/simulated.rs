//! Simulated detection generator.
//!
//! Produces synthetic crossings for each configured frequency on its own
//! worker. Legitimate crossings advance a lap clock with gaps drawn uniformly
//! from `[typical - range/2, typical + range/2]`; false reads fire at a
//! random offset within the current lap without advancing the clock, so noise
//! never corrupts the legitimate cadence. Start-up offset and a configurable
//! `start_detection` failure rate exercise the race-abort paths.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::{SmallRng, StdRng};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{
    DetectionSink, ListeningFrequency, StatusItem, TimingSystem, TimingSystemKind,
    TimingSystemSettings,
};

const SIMULATED_PEAK: u16 = 800;

/// Generator tuning, including the failure-injection knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSettings {
    pub typical_lap_time_secs: f64,
    /// Width of the uniform gap distribution around the typical lap time.
    pub range_secs: f64,
    /// Delay before the first detection after starting.
    pub offset_secs: f64,
    /// Probability (percent) that `start_detection` fails outright.
    pub fake_failure_percent: f64,
    /// Probability (percent) that a trigger is a false read.
    pub false_read_percent: f64,
    /// Seed for reproducible runs; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            typical_lap_time_secs: 15.0,
            range_secs: 5.0,
            offset_secs: 5.0,
            fake_failure_percent: 0.0,
            false_read_percent: 10.0,
            seed: None,
        }
    }
}

impl SimulatedSettings {
    pub fn typical_lap_time(&self) -> Duration {
        Duration::from_secs_f64(self.typical_lap_time_secs)
    }
}

/// A timing system that fabricates detections.
pub struct SimulatedTimingSystem {
    settings: TimingSystemSettings,
    sim: SimulatedSettings,
    connected: bool,
    frequencies: Vec<u32>,
    rng: StdRng,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl SimulatedTimingSystem {
    pub fn new(sim: SimulatedSettings) -> Self {
        let rng = match sim.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings: TimingSystemSettings::default(),
            sim,
            connected: false,
            frequencies: Vec::new(),
            rng,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    pub fn simulated_settings(&self) -> &SimulatedSettings {
        &self.sim
    }

    /// Detection worker for one frequency.
    async fn run_frequency(
        frequency_mhz: u32,
        sim: SimulatedSettings,
        mut rng: SmallRng,
        sink: DetectionSink,
        cancel: CancellationToken,
    ) {
        let offset = Duration::from_secs_f64(sim.offset_secs.max(0.0));
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(offset) => {}
        }

        let min_gap = (sim.typical_lap_time_secs - sim.range_secs / 2.0).max(0.0);
        let mut current = Utc::now();

        loop {
            let false_read = rng.gen_range(0.0..100.0) < sim.false_read_percent;
            let target: DateTime<Utc> = if false_read {
                // False reads use the current time base and do not advance it.
                current + secs(rng.r#gen::<f64>() * sim.typical_lap_time_secs)
            } else {
                current + secs(min_gap + rng.r#gen::<f64>() * sim.range_secs)
            };

            let wait =
                (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            trace!(frequency_mhz, false_read, "simulated detection");
            if !sink.emit(frequency_mhz, Utc::now(), SIMULATED_PEAK) {
                break;
            }

            if !false_read {
                current = target;
            }
        }
    }
}

fn secs(value: f64) -> ChronoDuration {
    ChronoDuration::from_std(Duration::from_secs_f64(value.max(0.0)))
        .unwrap_or_else(|_| ChronoDuration::zero())
}

#[async_trait]
impl TimingSystem for SimulatedTimingSystem {
    fn kind(&self) -> TimingSystemKind {
        TimingSystemKind::Simulated
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> bool {
        self.connected = true;
        true
    }

    async fn disconnect(&mut self) -> bool {
        self.connected = false;
        true
    }

    async fn set_listening_frequencies(&mut self, frequencies: &[ListeningFrequency]) -> bool {
        self.frequencies = frequencies.iter().map(|f| f.frequency_mhz).collect();
        true
    }

    async fn start_detection(&mut self, sink: DetectionSink) -> bool {
        let roll: f64 = self.rng.gen_range(0.0..100.0);
        if roll < self.sim.fake_failure_percent {
            debug!(roll, "simulated start_detection failure");
            return false;
        }

        if !self.workers.is_empty() {
            self.end_detection().await;
            return false;
        }

        self.cancel = CancellationToken::new();
        for &frequency_mhz in &self.frequencies {
            let worker_rng = SmallRng::seed_from_u64(self.rng.r#gen());
            let handle = tokio::spawn(Self::run_frequency(
                frequency_mhz,
                self.sim.clone(),
                worker_rng,
                sink.clone(),
                self.cancel.clone(),
            ));
            self.workers.push(handle);
        }

        info!(workers = self.workers.len(), "simulated detection started");
        true
    }

    async fn end_detection(&mut self) -> bool {
        if self.workers.is_empty() {
            return false;
        }

        self.cancel.cancel();
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }

        info!("simulated detection stopped");
        true
    }

    fn max_pilots(&self) -> usize {
        256
    }

    fn settings(&self) -> TimingSystemSettings {
        self.settings
    }

    fn set_settings(&mut self, settings: TimingSystemSettings) {
        self.settings = settings;
    }

    fn status(&self) -> Vec<StatusItem> {
        let mut rng = SmallRng::from_entropy();
        let voltage = rng.gen_range(120..180) as f32 / 10.0;
        let temperature = rng.gen_range(10..60);

        vec![
            StatusItem { value: format!("{voltage}v"), ok: voltage > 14.0 },
            StatusItem { value: format!("{temperature}c"), ok: temperature < 50 },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::timing::TimingSystemRole;

    fn sink() -> (DetectionSink, mpsc::UnboundedReceiver<super::super::DetectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DetectionSink::new(0, TimingSystemKind::Simulated, TimingSystemRole::Primary, tx), rx)
    }

    fn system(sim: SimulatedSettings) -> SimulatedTimingSystem {
        SimulatedTimingSystem::new(SimulatedSettings { seed: Some(42), ..sim })
    }

    #[tokio::test]
    async fn start_detection_always_fails_at_hundred_percent() {
        let mut sys =
            system(SimulatedSettings { fake_failure_percent: 100.0, ..Default::default() });
        sys.connect().await;
        for _ in 0..20 {
            let (s, _rx) = sink();
            assert!(!sys.start_detection(s).await);
        }
    }

    #[tokio::test]
    async fn start_detection_always_succeeds_at_zero_percent() {
        let mut sys = system(SimulatedSettings {
            fake_failure_percent: 0.0,
            offset_secs: 0.0,
            ..Default::default()
        });
        sys.connect().await;
        sys.set_listening_frequencies(&[ListeningFrequency::new(5880, 1.0)]).await;

        for _ in 0..5 {
            let (s, _rx) = sink();
            assert!(sys.start_detection(s).await);
            assert!(sys.end_detection().await);
        }
    }

    #[tokio::test]
    async fn end_detection_without_workers_is_a_noop_false() {
        let mut sys = system(SimulatedSettings::default());
        assert!(!sys.end_detection().await);
        assert!(!sys.end_detection().await);
    }

    #[tokio::test]
    async fn starting_twice_stops_and_reports_failure() {
        let mut sys = system(SimulatedSettings {
            fake_failure_percent: 0.0,
            offset_secs: 0.0,
            ..Default::default()
        });
        sys.connect().await;
        sys.set_listening_frequencies(&[ListeningFrequency::new(5880, 1.0)]).await;

        let (s1, _rx1) = sink();
        assert!(sys.start_detection(s1).await);
        let (s2, _rx2) = sink();
        assert!(!sys.start_detection(s2).await);
        // The double start tore the workers down.
        assert!(!sys.end_detection().await);
    }

    #[tokio::test(start_paused = true)]
    async fn workers_emit_detections_per_frequency() {
        let mut sys = SimulatedTimingSystem::new(SimulatedSettings {
            typical_lap_time_secs: 2.0,
            range_secs: 0.5,
            offset_secs: 0.0,
            fake_failure_percent: 0.0,
            false_read_percent: 0.0,
            seed: Some(7),
        });
        sys.connect().await;
        sys.set_listening_frequencies(&[
            ListeningFrequency::new(5880, 1.0),
            ListeningFrequency::new(5658, 1.0),
        ])
        .await;

        let (s, mut rx) = sink();
        assert!(sys.start_detection(s).await);

        // Paused time auto-advances through the worker sleeps.
        let mut seen = Vec::new();
        for _ in 0..4 {
            let event = rx.recv().await.expect("worker emitted");
            seen.push(event.frequency_mhz);
        }
        assert!(seen.contains(&5880));
        assert!(seen.contains(&5658));

        assert!(sys.end_detection().await);
    }

    #[tokio::test]
    async fn seeded_failure_rolls_are_reproducible() {
        let make = || {
            SimulatedTimingSystem::new(SimulatedSettings {
                fake_failure_percent: 50.0,
                seed: Some(1234),
                ..Default::default()
            })
        };

        let mut a = make();
        let mut b = make();
        for _ in 0..10 {
            let (sa, _ra) = sink();
            let (sb, _rb) = sink();
            let result_a = a.start_detection(sa).await;
            let result_b = b.start_detection(sb).await;
            assert_eq!(result_a, result_b);
            a.end_detection().await;
            b.end_detection().await;
        }
    }

    #[test]
    fn status_reports_voltage_and_temperature() {
        let sys = system(SimulatedSettings::default());
        let status = sys.status();
        assert_eq!(status.len(), 2);
        assert!(status[0].value.ends_with('v'));
        assert!(status[1].value.ends_with('c'));
    }
}
