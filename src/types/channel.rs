//! Channels and frequency interference.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video/transponder band a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    Raceband,
    Fatshark,
    Boscam,
    LowBand,
    DjiFpvHd,
    HdZero,
}

/// A frequency slot a pilot can be assigned to.
///
/// Channels from different bands can sit on the same frequency; those channels
/// interfere with each other and form a shared-frequency group. Interference is
/// transitive within a group, but two channels in the same group are not equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub band: Band,
    pub number: u8,
    pub frequency_mhz: u32,
}

impl Channel {
    pub const fn new(band: Band, number: u8, frequency_mhz: u32) -> Self {
        Self { band, number, frequency_mhz }
    }

    /// Two channels interfere when they share a frequency.
    pub fn interferes_with(&self, other: &Channel) -> bool {
        self.frequency_mhz == other.frequency_mhz
    }

    /// True if this channel interferes with any channel in `others`.
    pub fn interferes_with_any<'a, I>(&self, others: I) -> bool
    where
        I: IntoIterator<Item = &'a Channel>,
    {
        others.into_iter().any(|c| self.interferes_with(c))
    }

    /// The standard eight Raceband channels (R1..R8).
    pub fn raceband() -> Vec<Channel> {
        const FREQS: [u32; 8] = [5658, 5695, 5732, 5769, 5806, 5843, 5880, 5917];
        FREQS
            .iter()
            .enumerate()
            .map(|(i, &f)| Channel::new(Band::Raceband, (i + 1) as u8, f))
            .collect()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{} ({}MHz)", self.band, self.number, self.frequency_mhz)
    }
}

/// Group channels into shared-frequency groups.
///
/// Each inner vector holds channels that mutually interfere; groups are
/// disjoint and ordered by frequency.
pub fn channel_groups(channels: &[Channel]) -> Vec<Vec<Channel>> {
    let mut sorted: Vec<Channel> = channels.to_vec();
    sorted.sort_by_key(|c| (c.frequency_mhz, c.band, c.number));

    let mut groups: Vec<Vec<Channel>> = Vec::new();
    for channel in sorted {
        match groups.last_mut() {
            Some(group) if group[0].interferes_with(&channel) => group.push(channel),
            _ => groups.push(vec![channel]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raceband_has_eight_channels() {
        let channels = Channel::raceband();
        assert_eq!(channels.len(), 8);
        assert_eq!(channels[6].frequency_mhz, 5880); // R7
    }

    #[test]
    fn interference_is_shared_frequency() {
        let r7 = Channel::new(Band::Raceband, 7, 5880);
        let other = Channel::new(Band::Fatshark, 4, 5880);
        let r1 = Channel::new(Band::Raceband, 1, 5658);

        assert!(r7.interferes_with(&other));
        assert!(other.interferes_with(&r7));
        assert!(!r7.interferes_with(&r1));
        assert_ne!(r7, other);
    }

    #[test]
    fn interference_is_transitive_within_group() {
        let a = Channel::new(Band::Raceband, 7, 5880);
        let b = Channel::new(Band::Fatshark, 4, 5880);
        let c = Channel::new(Band::Boscam, 3, 5880);

        assert!(a.interferes_with(&b));
        assert!(b.interferes_with(&c));
        assert!(a.interferes_with(&c));
    }

    #[test]
    fn groups_are_disjoint_and_cover_all() {
        let mut channels = Channel::raceband();
        channels.push(Channel::new(Band::Fatshark, 4, 5880));

        let groups = channel_groups(&channels);
        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, channels.len());

        // 5880 appears twice, so one group of two and seven singletons.
        assert_eq!(groups.len(), 8);
        assert!(groups.iter().any(|g| g.len() == 2));
    }
}
