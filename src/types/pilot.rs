//! Pilots and their channel assignments.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::channel::Channel;

/// Stable pilot identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PilotId(Uuid);

impl PilotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PilotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PilotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A competitor.
///
/// Practice pilots participate normally but are excluded from records and
/// exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pilot {
    pub id: PilotId,
    pub name: String,
    pub practice: bool,
}

impl Pilot {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: PilotId::new(), name: name.into(), practice: false }
    }

    pub fn practice(name: impl Into<String>) -> Self {
        Self { id: PilotId::new(), name: name.into(), practice: true }
    }
}

impl fmt::Display for Pilot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Associates one pilot with one channel for the scope of a race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotChannel {
    pub pilot: Pilot,
    pub channel: Channel,
}

impl PilotChannel {
    pub fn new(pilot: Pilot, channel: Channel) -> Self {
        Self { pilot, channel }
    }
}

impl fmt::Display for PilotChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.pilot, self.channel)
    }
}
