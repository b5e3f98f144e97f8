//! Optional TOML settings file.
//!
//! Everything here is an override: CLI flags win over the file, the file
//! wins over built-in defaults. Loaded once at startup.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use tessera_core::PhysicsParams;
use tessera_networking::server::ServerConfig;

/// Settings-file failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File unreadable.
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    /// File readable but not valid TOML for this schema.
    #[error("settings parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parsed settings file. Every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Tick rate override, Hz.
    pub tick_rate: Option<u32>,
    /// Empty-realm unload window override, seconds.
    pub realm_idle_seconds: Option<u64>,
    /// Dormancy grace override, seconds.
    pub dormancy_seconds: Option<u64>,
    /// Default world name override.
    pub default_world: Option<String>,
    /// Dirty-chunk flush cadence override, ticks.
    pub autosave_ticks: Option<u64>,
    /// Physics CVars. Partial tables override only what they name.
    pub physics: Option<PhysicsParams>,
}

impl FileSettings {
    /// Loads a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Applies the overrides onto a config.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(seconds) = self.realm_idle_seconds {
            config.realm_idle_ms = seconds * 1000;
        }
        if let Some(seconds) = self.dormancy_seconds {
            config.dormancy_ms = seconds * 1000;
        }
        if let Some(ref name) = self.default_world {
            config.default_world_name.clone_from(name);
        }
        if let Some(ticks) = self.autosave_ticks {
            config.autosave_ticks = ticks;
        }
        if let Some(physics) = self.physics {
            config.physics = physics;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_apply() {
        let parsed: FileSettings = toml::from_str(
            r#"
            tick_rate = 60
            dormancy_seconds = 5

            [physics]
            gravity = 400.0
            "#,
        )
        .unwrap();

        let mut config = ServerConfig::default();
        parsed.apply(&mut config);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.dormancy_ms, 5_000);
        assert_eq!(config.physics.gravity, 400.0);
        // Unnamed physics fields keep their defaults.
        assert_eq!(config.physics.friction, PhysicsParams::default().friction);
        // Untouched settings keep their defaults.
        assert_eq!(config.autosave_ticks, ServerConfig::default().autosave_ticks);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let parsed: FileSettings = toml::from_str("").unwrap();
        let mut config = ServerConfig::default();
        let before = config.clone();
        parsed.apply(&mut config);
        assert_eq!(config.tick_rate, before.tick_rate);
    }
}
