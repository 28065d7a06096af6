//! Durable settings storage.
//!
//! Settings live as YAML files in one directory, one file per concern. A
//! missing file is not an error: the default value is written back so the
//! operator has a file to edit, and the first run behaves the same as every
//! later one.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::EventConfig;
use crate::error::{Result, TimingError};
use crate::timing::TimingSystemSettings;

const EVENT_FILE: &str = "event.yaml";
const TIMING_FILE: &str = "timing_systems.yaml";

/// YAML-backed settings directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_event_config(&self) -> Result<EventConfig> {
        self.load(EVENT_FILE)
    }

    pub fn save_event_config(&self, config: &EventConfig) -> Result<()> {
        self.save(EVENT_FILE, config)
    }

    /// Per-system settings, index-aligned with the timing system manager.
    pub fn load_timing_settings(&self) -> Result<Vec<TimingSystemSettings>> {
        self.load(TIMING_FILE)
    }

    pub fn save_timing_settings(&self, settings: &[TimingSystemSettings]) -> Result<()> {
        self.save(TIMING_FILE, &settings.to_vec())
    }

    fn load<T>(&self, file: &str) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let path = self.dir.join(file);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let value = serde_yaml_ng::from_str(&text)
                    .map_err(|e| TimingError::settings_error(path.clone(), e))?;
                debug!(path = %path.display(), "settings loaded");
                Ok(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "settings file missing, writing defaults");
                let value = T::default();
                self.save(file, &value)?;
                Ok(value)
            }
            Err(e) => Err(TimingError::settings_error(path, e)),
        }
    }

    fn save<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        fs::create_dir_all(&self.dir).map_err(|e| TimingError::settings_error(path.clone(), e))?;
        let text = serde_yaml_ng::to_string(value)
            .map_err(|e| TimingError::settings_error(path.clone(), e))?;
        fs::write(&path, text).map_err(|e| TimingError::settings_error(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingSystemRole;

    #[test]
    fn missing_files_yield_defaults_and_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path());

        let config = store.load_event_config().unwrap();
        assert_eq!(config, EventConfig::default());
        assert!(dir.path().join(EVENT_FILE).exists());

        let timing = store.load_timing_settings().unwrap();
        assert!(timing.is_empty());
        assert!(dir.path().join(TIMING_FILE).exists());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path());

        let settings = vec![
            TimingSystemSettings::default(),
            TimingSystemSettings { role: TimingSystemRole::Split, sector_length_meters: 120.0 },
        ];
        store.save_timing_settings(&settings).unwrap();
        assert_eq!(store.load_timing_settings().unwrap(), settings);

        let config = EventConfig { target_laps: 7, ..Default::default() };
        store.save_event_config(&config).unwrap();
        assert_eq!(store.load_event_config().unwrap(), config);
    }

    #[test]
    fn malformed_yaml_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(EVENT_FILE), ": not yaml [").unwrap();

        let store = SettingsStore::new(dir.path());
        let err = store.load_event_config().unwrap_err();
        assert!(matches!(err, TimingError::Settings { .. }));
        assert!(!err.is_retryable());
    }
}
