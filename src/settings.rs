//! Output settings with persistence.
//!
//! This module provides:
//! - `OutputSettings` struct holding the start code, frame rate and last port
//! - Persistence to a JSON file in the app data directory
//! - Conversion into the engine's `OutputConfig`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dmx::{DmxError, DmxResult, InterpacketPeriod, OutputConfig};

/// User-facing output settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    /// Start code sent before the slot data. 0x00 for dimmer data.
    #[serde(default)]
    pub start_code: u8,

    /// Gap between frames; one of the presets or a raw duration.
    #[serde(default)]
    pub interpacket_period: InterpacketPeriod,

    /// Port used the last time output was opened.
    #[serde(default)]
    pub last_port: Option<String>,
}

impl OutputSettings {
    /// Engine configuration for these settings.
    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            start_code: self.start_code,
            interpacket_period: self.interpacket_period,
        }
    }

    /// Check if these settings differ from defaults.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Settings file name stored in app data directory.
const SETTINGS_FILENAME: &str = "output_settings.json";

/// Manages persistence of output settings to JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager for the given app data directory.
    pub fn new(app_data_dir: &Path) -> Self {
        let settings_file_path = app_data_dir.join(SETTINGS_FILENAME);
        Self { settings_file_path }
    }

    /// Load settings from disk, returning defaults if file doesn't exist.
    pub fn load(&self) -> DmxResult<OutputSettings> {
        if !self.settings_file_path.exists() {
            return Ok(OutputSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path).map_err(|e| {
            DmxError::Settings {
                reason: format!("Failed to read settings file: {}", e),
            }
        })?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(OutputSettings::default());
        }

        serde_json::from_str(&contents).map_err(|e| DmxError::Settings {
            reason: format!("Failed to parse settings JSON: {}", e),
        })
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &OutputSettings) -> DmxResult<()> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| DmxError::Settings {
                reason: format!("Failed to create settings directory: {}", e),
            })?;
        }

        let contents = serde_json::to_string_pretty(settings).map_err(|e| DmxError::Settings {
            reason: format!("Failed to serialize settings: {}", e),
        })?;

        fs::write(&self.settings_file_path, contents).map_err(|e| DmxError::Settings {
            reason: format!("Failed to write settings file: {}", e),
        })?;

        tracing::debug!("Saved output settings to {}", self.settings_file_path.display());
        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::temp::TestContext;

    #[test]
    fn test_default_settings() {
        let settings = OutputSettings::default();
        assert_eq!(settings.start_code, 0);
        assert_eq!(settings.interpacket_period, InterpacketPeriod::Mid);
        assert!(settings.last_port.is_none());
        assert_eq!(settings.output_config(), OutputConfig::default());
    }

    #[test]
    fn test_settings_persistence() {
        let ctx = TestContext::new();
        let manager = SettingsManager::new(ctx.root());

        // Initially returns defaults
        let loaded = manager.load().unwrap();
        assert_eq!(loaded, OutputSettings::default());

        let settings = OutputSettings {
            start_code: 0x17,
            interpacket_period: InterpacketPeriod::Custom(2_000_000),
            last_port: Some("/dev/ttyUSB0".to_string()),
        };
        manager.save(&settings).unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded, settings);
        assert!(manager.settings_path().ends_with(SETTINGS_FILENAME));
    }

    #[test]
    fn test_empty_file_loads_defaults() {
        let ctx = TestContext::new();
        ctx.create_file(SETTINGS_FILENAME, "  \n");
        let manager = SettingsManager::new(ctx.root());
        assert_eq!(manager.load().unwrap(), OutputSettings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let ctx = TestContext::new();
        ctx.create_file(SETTINGS_FILENAME, r#"{"interpacketPeriod":{"kind":"high"}}"#);
        let manager = SettingsManager::new(ctx.root());

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.interpacket_period, InterpacketPeriod::High);
        assert_eq!(loaded.start_code, 0);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let ctx = TestContext::new();
        ctx.create_file(SETTINGS_FILENAME, "{not json");
        let manager = SettingsManager::new(ctx.root());
        assert!(matches!(manager.load(), Err(DmxError::Settings { .. })));
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let ctx = TestContext::new();
        let manager = SettingsManager::new(&ctx.path("nested/app"));
        manager.save(&OutputSettings::default()).unwrap();
        assert!(ctx.exists(&format!("nested/app/{}", SETTINGS_FILENAME)));
    }

    #[test]
    fn test_has_non_default_settings() {
        assert!(!OutputSettings::default().has_non_default_settings());

        let custom = OutputSettings {
            interpacket_period: InterpacketPeriod::Low,
            ..Default::default()
        };
        assert!(custom.has_non_default_settings());
    }

    #[test]
    fn test_serde_camel_case() {
        let settings = OutputSettings {
            start_code: 1,
            interpacket_period: InterpacketPeriod::Custom(5),
            last_port: None,
        };
        let json = serde_json::to_string(&settings).unwrap();

        assert!(json.contains("startCode"));
        assert!(json.contains("interpacketPeriod"));
        assert!(json.contains(r#"{"kind":"custom","nanos":5}"#));
        assert!(!json.contains("start_code"));
    }
}
