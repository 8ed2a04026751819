use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Session length used when the caller does not pass one, in minutes.
    pub default_session_mins: u64,
    pub tick_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Hard cap on one foreground probe call.
    pub probe_timeout_ms: u64,
    /// Consecutive probe failures before the status line reports degraded
    /// monitoring.
    pub degraded_after_failures: u32,
    /// Session progress is written to the database every this many ticks.
    pub heartbeat_every_ticks: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_session_mins: 25,
            tick_interval_ms: 1_000,
            poll_interval_ms: 2_000,
            probe_timeout_ms: 1_500,
            degraded_after_failures: 5,
            heartbeat_every_ticks: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct UserSettings {
    engine: EngineSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineSettings {
        self.data.read().unwrap().engine.clone()
    }

    pub fn update_engine(&self, settings: EngineSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            guard.engine = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
