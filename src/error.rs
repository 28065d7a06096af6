//! Error types for the timing engine.
//!
//! Hardware faults are deliberately *not* errors at the `TimingSystem`
//! boundary: connect/start/stop report plain `bool` and the race degrades
//! gracefully when a system drops. `TimingError` covers the operations where
//! the caller made a request that cannot be honored (arming, lifecycle
//! transitions, lookups) or where I/O outside the detection path failed
//! (settings files, ports during configuration).

use std::path::PathBuf;
use thiserror::Error;

use crate::race::RacePhase;
use crate::types::{LapId, PilotId, RaceId};

/// Result type alias for timing operations.
pub type Result<T, E = TimingError> = std::result::Result<T, E>;

/// Main error type for timing operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TimingError {
    /// Race arming aborted; names every system that failed so the operator
    /// knows what to power-cycle. No partial-armed state remains.
    #[error("failed to arm timing systems: {}", failed_systems.join(", "))]
    Arm { failed_systems: Vec<String> },

    #[error("cannot {action} while race is {from:?}")]
    InvalidTransition { from: RacePhase, action: &'static str },

    #[error("no current race")]
    NoCurrentRace,

    #[error("unknown race {id}")]
    UnknownRace { id: RaceId },

    #[error("pilot {id} is not in the race")]
    UnknownPilot { id: PilotId },

    #[error("pilot '{name}' is already assigned a channel")]
    PilotAlreadyAssigned { name: String },

    #[error("channel {channel} interferes with an existing assignment")]
    ChannelInUse { channel: crate::types::Channel },

    #[error("unknown lap {id:?}")]
    UnknownLap { id: LapId },

    #[error("settings file error: {path}")]
    Settings {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("port error during {operation}")]
    Port {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl TimingError {
    /// Whether retrying the operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TimingError::Arm { .. } => true,
            TimingError::Port { .. } => true,
            TimingError::InvalidTransition { .. } => false,
            TimingError::NoCurrentRace => false,
            TimingError::UnknownRace { .. } => false,
            TimingError::UnknownPilot { .. } => false,
            TimingError::PilotAlreadyAssigned { .. } => false,
            TimingError::ChannelInUse { .. } => false,
            TimingError::UnknownLap { .. } => false,
            TimingError::Settings { .. } => false,
        }
    }

    pub fn arm_failed(failed_systems: Vec<String>) -> Self {
        TimingError::Arm { failed_systems }
    }

    pub fn settings_error(
        path: PathBuf,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        TimingError::Settings { path, source: Box::new(source) }
    }

    pub fn port_error(operation: impl Into<String>, source: std::io::Error) -> Self {
        TimingError::Port { operation: operation.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_error_names_failed_systems() {
        let err = TimingError::arm_failed(vec!["serial gate 1".into(), "sim 2".into()]);
        let message = err.to_string();
        assert!(message.contains("serial gate 1"));
        assert!(message.contains("sim 2"));
        assert!(err.is_retryable());
    }

    #[test]
    fn transition_errors_are_not_retryable() {
        let err = TimingError::InvalidTransition { from: RacePhase::Ended, action: "start" };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Ended"));
    }

    #[test]
    fn error_is_send_sync_static() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TimingError>();
    }
}
