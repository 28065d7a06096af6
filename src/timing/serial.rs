//! Serial/USB hardware timing client.
//!
//! Owns a framed serial link to a physical gate. The transport contract is
//! fixed by the hardware: 115200 baud with RTS/DTR asserted, a 6 second read
//! timeout, a 12 second write timeout, and a 400ms settle delay after every
//! write before the next one may be issued. The settle delay is a hardware
//! quirk, not a performance choice.
//!
//! Reads run on a dedicated blocking thread so hardware I/O never shares a
//! thread with race-state mutation. Any I/O error or timeout demotes
//! `connected` to false and is logged; it never propagates as a crash, and a
//! race in progress simply loses this sector's detections.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{FrameDecoder, Record, encode};
use super::{
    DetectionSink, ListeningFrequency, StatusItem, TimingSystem, TimingSystemKind,
    TimingSystemSettings,
};

pub const BAUD_RATE: u32 = 115_200;
pub const READ_TIMEOUT: Duration = Duration::from_secs(6);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(12);
/// Required idle time after every write before the hardware accepts more.
pub const WRITE_SETTLE: Duration = Duration::from_millis(400);

/// Blocking byte transport to the gate hardware.
///
/// Implementations must honor [`READ_TIMEOUT`] and [`WRITE_TIMEOUT`]; a
/// timeout surfaces as `io::ErrorKind::TimedOut` (or `WouldBlock`). The seam
/// exists so tests can substitute a scripted port for real hardware.
pub trait FramedPort: Send + 'static {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Blocking read of up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens the port on demand so `connect` can re-establish a dropped link.
pub type PortOpener = Box<dyn Fn() -> io::Result<Box<dyn FramedPort>> + Send + Sync>;

#[derive(Debug)]
struct LinkState {
    connected: AtomicBool,
    /// Watermark of the last successful read, for liveness monitoring.
    last_data: Mutex<DateTime<Utc>>,
    last_status: Mutex<Option<(u16, u8)>>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            last_data: Mutex::new(Utc::now()),
            last_status: Mutex::new(None),
        }
    }

    fn mark_data(&self) {
        if let Ok(mut guard) = self.last_data.lock() {
            *guard = Utc::now();
        }
    }
}

/// Timing system backed by serial gate hardware.
pub struct SerialTimingSystem {
    name: String,
    settings: TimingSystemSettings,
    opener: PortOpener,
    port: Arc<Mutex<Option<Box<dyn FramedPort>>>>,
    link: Arc<LinkState>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl SerialTimingSystem {
    pub fn new(name: impl Into<String>, opener: PortOpener) -> Self {
        Self {
            name: name.into(),
            settings: TimingSystemSettings::default(),
            opener,
            port: Arc::new(Mutex::new(None)),
            link: Arc::new(LinkState::new()),
            cancel: CancellationToken::new(),
            reader: None,
        }
    }

    /// Write one framed record, observing the hardware settle delay.
    ///
    /// The write and the settle sleep run on the blocking pool so the async
    /// workers keep making progress through the 400ms quirk. Returns false on
    /// any failure after demoting `connected`.
    async fn send(&self, record: &Record) -> bool {
        let name = self.name.clone();
        let port = Arc::clone(&self.port);
        let link = Arc::clone(&self.link);
        let bytes = encode(record);

        let written = tokio::task::spawn_blocking(move || {
            let mut guard = match port.lock() {
                Ok(guard) => guard,
                Err(_) => return false,
            };
            let Some(port) = guard.as_mut() else {
                return false;
            };

            match port.write(&bytes) {
                Ok(()) => {
                    // The gate needs idle time after every write.
                    std::thread::sleep(WRITE_SETTLE);
                    true
                }
                Err(e) => {
                    warn!(system = %name, error = %e, "serial write failed");
                    link.connected.store(false, Ordering::SeqCst);
                    false
                }
            }
        })
        .await;

        written.unwrap_or(false)
    }

    fn reader_loop(
        name: String,
        port: Arc<Mutex<Option<Box<dyn FramedPort>>>>,
        link: Arc<LinkState>,
        sink: DetectionSink,
        cancel: CancellationToken,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 512];

        while !cancel.is_cancelled() {
            let read = {
                let mut guard = match port.lock() {
                    Ok(guard) => guard,
                    Err(_) => break,
                };
                match guard.as_mut() {
                    Some(port) => port.read(&mut buf),
                    None => break,
                }
            };

            match read {
                Ok(0) => {
                    // Port closed under us.
                    warn!(system = %name, "serial port closed");
                    link.connected.store(false, Ordering::SeqCst);
                    break;
                }
                Ok(n) => {
                    link.mark_data();
                    for record in decoder.push(&buf[..n]) {
                        match record {
                            Record::Passing { frequency_mhz, peak, timestamp_micros } => {
                                let time = Utc
                                    .timestamp_micros(timestamp_micros as i64)
                                    .single()
                                    .unwrap_or_else(Utc::now);
                                if !sink.emit(u32::from(frequency_mhz), time, peak) {
                                    return;
                                }
                            }
                            Record::Status { millivolts, temperature_c } => {
                                if let Ok(mut status) = link.last_status.lock() {
                                    *status = Some((millivolts, temperature_c));
                                }
                            }
                            other => {
                                debug!(system = %name, ?other, "ignoring unexpected record");
                            }
                        }
                    }
                }
                Err(e) => {
                    // Timeouts and I/O faults both mean the link is gone; the
                    // race carries on without this sector until an explicit
                    // reconnect.
                    warn!(system = %name, error = %e, "serial read failed, leaving detection loop");
                    link.connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl TimingSystem for SerialTimingSystem {
    fn kind(&self) -> TimingSystemKind {
        TimingSystemKind::Serial
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    async fn connect(&mut self) -> bool {
        if self.connected() {
            self.disconnect().await;
        }

        match (self.opener)() {
            Ok(port) => {
                if let Ok(mut guard) = self.port.lock() {
                    *guard = Some(port);
                } else {
                    return false;
                }
                self.link.connected.store(true, Ordering::SeqCst);
                self.link.mark_data();
                info!(system = %self.name, "serial link established");
                true
            }
            Err(e) => {
                warn!(system = %self.name, error = %e, "serial connect failed");
                false
            }
        }
    }

    async fn disconnect(&mut self) -> bool {
        self.end_detection().await;
        self.link.connected.store(false, Ordering::SeqCst);

        match self.port.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        }
    }

    async fn set_listening_frequencies(&mut self, frequencies: &[ListeningFrequency]) -> bool {
        if !self.connected() {
            return false;
        }
        let record = Record::SetFrequencies {
            frequencies_mhz: frequencies.iter().map(|f| f.frequency_mhz as u16).collect(),
        };
        self.send(&record).await
    }

    async fn start_detection(&mut self, sink: DetectionSink) -> bool {
        if !self.connected() || self.reader.is_some() {
            return false;
        }
        if !self.send(&Record::StartDetection).await {
            return false;
        }

        self.cancel = CancellationToken::new();
        let name = self.name.clone();
        let port = Arc::clone(&self.port);
        let link = Arc::clone(&self.link);
        let cancel = self.cancel.clone();

        self.reader = Some(std::thread::spawn(move || {
            Self::reader_loop(name, port, link, sink, cancel);
        }));

        info!(system = %self.name, "serial detection started");
        true
    }

    async fn end_detection(&mut self) -> bool {
        let Some(handle) = self.reader.take() else {
            return false;
        };

        self.cancel.cancel();
        self.send(&Record::StopDetection).await;

        // The reader may be parked in a blocking read for up to the read
        // timeout; join off the async threads.
        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        if joined.is_err() {
            warn!(system = %self.name, "reader join interrupted");
        }

        info!(system = %self.name, "serial detection stopped");
        true
    }

    fn max_pilots(&self) -> usize {
        8
    }

    fn settings(&self) -> TimingSystemSettings {
        self.settings
    }

    fn set_settings(&mut self, settings: TimingSystemSettings) {
        self.settings = settings;
    }

    fn status(&self) -> Vec<StatusItem> {
        let mut items = Vec::new();

        let connected = self.connected();
        items.push(StatusItem {
            value: if connected { "connected".into() } else { "disconnected".into() },
            ok: connected,
        });

        if let Ok(guard) = self.link.last_data.lock() {
            let age = Utc::now() - *guard;
            let secs = age.num_milliseconds() as f64 / 1000.0;
            items.push(StatusItem {
                value: format!("{secs:.1}s since data"),
                ok: age < chrono::Duration::from_std(READ_TIMEOUT).unwrap_or_default(),
            });
        }

        if let Ok(guard) = self.link.last_status.lock()
            && let Some((millivolts, temperature_c)) = *guard
        {
            let volts = millivolts as f32 / 1000.0;
            items.push(StatusItem { value: format!("{volts:.1}v"), ok: volts > 14.0 });
            items.push(StatusItem {
                value: format!("{temperature_c}c"),
                ok: temperature_c < 50,
            });
        }

        items
    }
}
