//! Race result computation.

use tracing::debug;

use super::Race;
use crate::config::EventConfig;
use crate::types::RaceResult;

/// Compute finishing order for a race.
///
/// Pilots with more scored laps rank ahead; among equal lap counts, total
/// elapsed time ascending, with exactly-equal times broken by pilot name
/// ascending. A pilot with no valid laps is a DNF. Points come from the
/// configured position table; positions past its end score zero.
pub fn compute_results(race: &Race, config: &EventConfig) -> Vec<RaceResult> {
    let mut ranked: Vec<_> = race
        .pilots()
        .map(|pilot| {
            let laps = race.valid_laps(pilot.id);
            let capped: Vec<_> = if race.kind.respects_target() {
                laps.into_iter().take(race.target_laps as usize).collect()
            } else {
                laps
            };
            let total =
                (!capped.is_empty()).then(|| crate::types::total_time(&capped));
            (pilot.clone(), capped.len() as u32, total)
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| match (a.2, b.2) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.0.name.cmp(&b.0.name))
    });

    let results: Vec<RaceResult> = ranked
        .into_iter()
        .enumerate()
        .map(|(index, (pilot, laps_completed, total_time))| {
            let position = index as u32 + 1;
            let dnf = laps_completed == 0;
            let points = if dnf {
                0
            } else {
                config.position_points.get(index).copied().unwrap_or(0)
            };
            RaceResult { pilot, position, points, dnf, laps_completed, total_time }
        })
        .collect();

    debug!(race = %race.id, results = results.len(), "results computed");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::RaceKind;
    use crate::timing::TimingSystemKind;
    use crate::types::{Band, Channel, Detection, Lap, LapId, Pilot, PilotChannel};
    use chrono::{Duration, TimeZone, Utc};

    fn race_with_laps(lap_lengths: &[(&str, &[i64])]) -> Race {
        let mut race = Race::new(RaceKind::Race, 3);
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        race.start_time = Some(base);

        for (index, (name, lengths)) in lap_lengths.iter().enumerate() {
            let channel = Channel::new(Band::Raceband, index as u8 + 1, 5658 + index as u32 * 37);
            let pilot = Pilot::new(*name);
            let pilot_id = pilot.id;
            race.add_assignment(PilotChannel::new(pilot, channel)).unwrap();

            let mut start = base;
            for (lap_index, &secs) in lengths.iter().enumerate() {
                let end = start + Duration::seconds(secs);
                let detection = Detection::new(
                    TimingSystemKind::Simulated,
                    0,
                    pilot_id,
                    channel,
                    end,
                    lap_index as u32 + 1,
                    true,
                    800,
                );
                let detection_id = detection.id;
                race.insert_detection(detection);
                race.push_lap(Lap {
                    id: LapId::new(),
                    detection_id,
                    race_id: race.id,
                    pilot_id,
                    number: lap_index as u32 + 1,
                    start,
                    end,
                });
                start = end;
            }
        }
        race
    }

    #[test]
    fn faster_total_time_wins() {
        let race = race_with_laps(&[("A", &[10, 10, 10]), ("B", &[10, 10, 14])]);
        let results = compute_results(&race, &EventConfig::default());

        assert_eq!(results[0].pilot.name, "A");
        assert_eq!(results[0].position, 1);
        assert_eq!(results[0].total_time, Some(Duration::seconds(30)));
        assert_eq!(results[1].pilot.name, "B");
        assert_eq!(results[1].total_time, Some(Duration::seconds(33)));
    }

    #[test]
    fn equal_times_break_by_name_ascending() {
        let race = race_with_laps(&[("B", &[12, 12, 12]), ("A", &[12, 12, 12])]);
        let results = compute_results(&race, &EventConfig::default());
        assert_eq!(results[0].pilot.name, "A");
        assert_eq!(results[1].pilot.name, "B");
    }

    #[test]
    fn no_laps_is_dnf_with_zero_points() {
        let race = race_with_laps(&[("A", &[10, 10, 10]), ("B", &[])]);
        let results = compute_results(&race, &EventConfig::default());

        let b = results.iter().find(|r| r.pilot.name == "B").unwrap();
        assert!(b.dnf);
        assert_eq!(b.points, 0);
        assert_eq!(b.position, 2);
    }

    #[test]
    fn more_laps_beat_faster_partial_runs() {
        let race = race_with_laps(&[("A", &[8, 8]), ("B", &[10, 10, 10])]);
        let results = compute_results(&race, &EventConfig::default());
        assert_eq!(results[0].pilot.name, "B");
        assert_eq!(results[0].laps_completed, 3);
    }

    #[test]
    fn points_follow_position_table() {
        let race = race_with_laps(&[("A", &[10, 10, 10]), ("B", &[11, 11, 11])]);
        let config = EventConfig { position_points: vec![10, 8], ..Default::default() };
        let results = compute_results(&race, &config);
        assert_eq!(results[0].points, 10);
        assert_eq!(results[1].points, 8);
    }
}
