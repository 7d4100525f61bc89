use crate::settings::DashboardSettings;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureOutcome {
    Saved,
    SaveFailed,
    CallFailed,
    Cleared,
}

/// One capture attempt as observed by the dashboard controller: how long the
/// card waited between dispatching start-listening and reaching a terminal
/// state, and which terminal state that was.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetricRecord {
    pub session_id: u64,
    pub timestamp_utc_ms: u64,
    pub device: String,
    pub action: String,
    pub wait_ms: u64,
    pub outcome: CaptureOutcome,
    pub correlated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsStatus {
    pub opt_in: bool,
    pub record_count: usize,
    pub last_export_path: Option<String>,
    pub last_exported_at_utc_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsExportResult {
    pub file_path: String,
    pub exported_at_utc_ms: u64,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DiagnosticsStore {
    records: Vec<CaptureMetricRecord>,
    last_export_path: Option<String>,
    last_exported_at_utc_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticsBundle {
    version: u8,
    app_version: String,
    exported_at_utc_ms: u64,
    settings_snapshot: DiagnosticsSettingsSnapshot,
    aggregate: DiagnosticsAggregate,
    recent_records: Vec<CaptureMetricRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticsSettingsSnapshot {
    card_title: String,
    diagnostics_opt_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticsAggregate {
    total_attempts: usize,
    saved_attempts: usize,
    save_rate_percent: f32,
    p50_wait_ms: u64,
    p95_wait_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("failed to read diagnostics store: {0}")]
    Read(std::io::Error),
    #[error("failed to write diagnostics store: {0}")]
    Write(std::io::Error),
    #[error("failed to parse diagnostics JSON: {0}")]
    Parse(serde_json::Error),
    #[error("cannot resolve app data directory")]
    AppData,
    #[error("diagnostics export requires opt-in to be enabled")]
    OptInRequired,
}

pub struct DiagnosticsManager {
    store_path: PathBuf,
    export_dir: PathBuf,
    store: DiagnosticsStore,
}

impl DiagnosticsManager {
    const MAX_RECORDS: usize = 5_000;
    const EXPORT_RECENT_LIMIT: usize = 500;

    pub fn new() -> Result<Self, DiagnosticsError> {
        let proj_dirs =
            ProjectDirs::from("com", "hassbeam", "connect").ok_or(DiagnosticsError::AppData)?;
        let store_path = proj_dirs.config_dir().join("diagnostics.json");
        let export_dir = proj_dirs.data_dir().join("diagnostics-exports");
        Self::from_paths(store_path, export_dir)
    }

    pub fn from_paths(
        store_path: impl Into<PathBuf>,
        export_dir: impl Into<PathBuf>,
    ) -> Result<Self, DiagnosticsError> {
        let mut manager = Self {
            store_path: store_path.into(),
            export_dir: export_dir.into(),
            store: DiagnosticsStore::default(),
        };
        manager.load()?;
        Ok(manager)
    }

    pub fn record_capture(&mut self, record: CaptureMetricRecord) -> Result<(), DiagnosticsError> {
        self.store.records.push(record);
        if self.store.records.len() > Self::MAX_RECORDS {
            let drop_count = self.store.records.len() - Self::MAX_RECORDS;
            self.store.records.drain(0..drop_count);
        }
        self.persist()
    }

    pub fn status(&self, opt_in: bool) -> DiagnosticsStatus {
        DiagnosticsStatus {
            opt_in,
            record_count: self.store.records.len(),
            last_export_path: self.store.last_export_path.clone(),
            last_exported_at_utc_ms: self.store.last_exported_at_utc_ms,
        }
    }

    pub fn export_bundle(
        &mut self,
        opt_in: bool,
        app_version: &str,
        settings: &DashboardSettings,
    ) -> Result<DiagnosticsExportResult, DiagnosticsError> {
        if !opt_in {
            return Err(DiagnosticsError::OptInRequired);
        }

        fs::create_dir_all(&self.export_dir).map_err(DiagnosticsError::Write)?;
        let exported_at = now_utc_ms();
        let filename = format!("hassbeam-diagnostics-{exported_at}.json");
        let file_path = self.export_dir.join(filename);

        let bundle = DiagnosticsBundle {
            version: 1,
            app_version: app_version.to_string(),
            exported_at_utc_ms: exported_at,
            settings_snapshot: DiagnosticsSettingsSnapshot {
                card_title: settings.card.resolved_title().to_string(),
                diagnostics_opt_in: settings.diagnostics_opt_in,
            },
            aggregate: aggregate_metrics(&self.store.records),
            recent_records: self
                .store
                .records
                .iter()
                .rev()
                .take(Self::EXPORT_RECENT_LIMIT)
                .cloned()
                .collect(),
        };
        let encoded = serde_json::to_string_pretty(&bundle).map_err(DiagnosticsError::Parse)?;
        fs::write(&file_path, encoded).map_err(DiagnosticsError::Write)?;

        self.store.last_export_path = Some(file_path.to_string_lossy().to_string());
        self.store.last_exported_at_utc_ms = Some(exported_at);
        self.persist()?;

        Ok(DiagnosticsExportResult {
            file_path: file_path.to_string_lossy().to_string(),
            exported_at_utc_ms: exported_at,
            record_count: self.store.records.len(),
        })
    }

    fn load(&mut self) -> Result<(), DiagnosticsError> {
        if !self.store_path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(&self.store_path).map_err(DiagnosticsError::Read)?;
        self.store = serde_json::from_str(&raw).map_err(DiagnosticsError::Parse)?;
        Ok(())
    }

    fn persist(&self) -> Result<(), DiagnosticsError> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent).map_err(DiagnosticsError::Write)?;
        }
        let encoded = serde_json::to_string_pretty(&self.store).map_err(DiagnosticsError::Parse)?;
        fs::write(&self.store_path, encoded).map_err(DiagnosticsError::Write)?;
        Ok(())
    }
}

fn aggregate_metrics(records: &[CaptureMetricRecord]) -> DiagnosticsAggregate {
    let mut wait_values = records.iter().map(|row| row.wait_ms).collect::<Vec<_>>();
    wait_values.sort_unstable();

    let saved_attempts = records
        .iter()
        .filter(|row| row.outcome == CaptureOutcome::Saved)
        .count();
    let save_rate_percent = if records.is_empty() {
        0.0
    } else {
        (saved_attempts as f32 / records.len() as f32) * 100.0
    };

    DiagnosticsAggregate {
        total_attempts: records.len(),
        saved_attempts,
        save_rate_percent,
        p50_wait_ms: percentile_u64(&wait_values, 0.50),
        p95_wait_ms: percentile_u64(&wait_values, 0.95),
    }
}

fn percentile_u64(values: &[u64], percentile: f32) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let clamped = percentile.clamp(0.0, 1.0);
    let idx = ((values.len() - 1) as f32 * clamped).round() as usize;
    values[idx]
}

fn now_utc_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
