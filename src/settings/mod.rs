use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CARD_TITLE: &str = "HassBeam Connect";

/// Configuration surface accepted from the dashboard.
///
/// The title override is the only recognized option. Options that appear in
/// older documentation but were never implemented (`show_recent`,
/// `max_recent`) are rejected instead of silently accepted, so a dashboard
/// author finds out immediately that they have no effect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct CardConfig {
    pub title: Option<String>,
}

impl CardConfig {
    pub fn from_value(value: Value) -> Result<Self, SettingsError> {
        serde_json::from_value(value).map_err(SettingsError::InvalidCardConfig)
    }

    pub fn resolved_title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_CARD_TITLE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardSettings {
    pub card: CardConfig,
    pub diagnostics_opt_in: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            card: CardConfig::default(),
            diagnostics_opt_in: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Read(std::io::Error),
    #[error("failed to write settings file: {0}")]
    Write(std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Parse(serde_json::Error),
    #[error("unsupported card configuration: {0}")]
    InvalidCardConfig(serde_json::Error),
    #[error("cannot resolve app data directory")]
    AppData,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Result<Self, SettingsError> {
        let proj_dirs =
            ProjectDirs::from("com", "hassbeam", "connect").ok_or(SettingsError::AppData)?;
        let path = proj_dirs.config_dir().join("settings.json");
        Ok(Self { path })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<DashboardSettings, SettingsError> {
        if !self.path.exists() {
            return Ok(DashboardSettings::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(SettingsError::Read)?;
        serde_json::from_str(&raw).map_err(SettingsError::Parse)
    }

    pub fn save(&self, settings: &DashboardSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Write)?;
        }
        let raw = serde_json::to_string_pretty(settings).map_err(SettingsError::Parse)?;
        fs::write(&self.path, raw).map_err(SettingsError::Write)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_settings_path() -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be valid")
            .as_nanos();
        std::env::temp_dir().join(format!("hassbeam-settings-{ts}.json"))
    }

    #[test]
    fn load_returns_default_if_missing() {
        let path = temp_settings_path();
        let store = SettingsStore::from_path(path);
        let loaded = store.load().expect("load should succeed");
        assert_eq!(loaded.card.resolved_title(), DEFAULT_CARD_TITLE);
        assert!(!loaded.diagnostics_opt_in);
    }

    #[test]
    fn save_then_load_round_trip() {
        let path = temp_settings_path();
        let store = SettingsStore::from_path(path.clone());
        let settings = DashboardSettings {
            card: CardConfig {
                title: Some("Living Room IR".to_string()),
            },
            diagnostics_opt_in: true,
        };

        store.save(&settings).expect("save should succeed");
        let loaded = store.load().expect("load should succeed");

        assert_eq!(loaded.card.resolved_title(), "Living Room IR");
        assert!(loaded.diagnostics_opt_in);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn card_config_accepts_title_only() {
        let config =
            CardConfig::from_value(json!({"title": "IR Capture"})).expect("title is supported");
        assert_eq!(config.resolved_title(), "IR Capture");

        let config = CardConfig::from_value(json!({})).expect("empty config is supported");
        assert_eq!(config.resolved_title(), DEFAULT_CARD_TITLE);
    }

    #[test]
    fn card_config_rejects_documented_but_unsupported_options() {
        let err = CardConfig::from_value(json!({"title": "IR", "showRecent": true}))
            .expect_err("unknown keys must be rejected");
        assert!(err.to_string().contains("showRecent"));

        let err = CardConfig::from_value(json!({"maxRecent": 5}))
            .expect_err("unknown keys must be rejected");
        assert!(matches!(err, SettingsError::InvalidCardConfig(_)));
    }
}
