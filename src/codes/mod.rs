use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IrCodeRecord {
    pub id: u64,
    pub device: String,
    pub action: String,
    pub event_data: Value,
    pub created_at_utc_ms: u64,
}

/// Filter for [`CodeStore::query`]. Device and action filters are expected
/// to be sanitized before lookup; the limit is clamped to 1..=100 and
/// defaults to 10.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeQuery {
    pub device: Option<String>,
    pub action: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum CodesError {
    #[error("failed to read code store: {0}")]
    Read(std::io::Error),
    #[error("failed to write code store: {0}")]
    Write(std::io::Error),
    #[error("failed to parse code store JSON: {0}")]
    Parse(serde_json::Error),
    #[error("cannot resolve app data directory")]
    AppData,
    #[error("IR code for {device}.{action} already exists")]
    Duplicate { device: String, action: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CodeStoreFile {
    next_id: u64,
    records: Vec<IrCodeRecord>,
}

/// Persisted store of captured IR codes keyed by sanitized device/action
/// labels, newest record last on disk.
pub struct CodeStore {
    path: PathBuf,
    store: CodeStoreFile,
}

impl CodeStore {
    pub const DEFAULT_QUERY_LIMIT: usize = 10;
    pub const MAX_QUERY_LIMIT: usize = 100;
    const MAX_RECORDS: usize = 1_000;

    pub fn new() -> Result<Self, CodesError> {
        let proj_dirs =
            ProjectDirs::from("com", "hassbeam", "connect").ok_or(CodesError::AppData)?;
        let path = proj_dirs.data_dir().join("codes.json");
        Self::from_path(path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CodesError> {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            store: CodeStoreFile {
                next_id: 1,
                records: Vec::new(),
            },
        };
        store.load()?;
        Ok(store)
    }

    pub fn exists(&self, device: &str, action: &str) -> bool {
        self.store
            .records
            .iter()
            .any(|row| row.device == device && row.action == action)
    }

    /// Stores a code under sanitized labels. The same device/action pair may
    /// only be captured once; callers delete the old code first to re-capture.
    pub fn save(
        &mut self,
        device: &str,
        action: &str,
        event_data: Value,
    ) -> Result<IrCodeRecord, CodesError> {
        if self.exists(device, action) {
            return Err(CodesError::Duplicate {
                device: device.to_string(),
                action: action.to_string(),
            });
        }

        let record = IrCodeRecord {
            id: self.next_record_id(),
            device: device.to_string(),
            action: action.to_string(),
            event_data,
            created_at_utc_ms: now_utc_ms(),
        };
        self.store.records.push(record.clone());
        if self.store.records.len() > Self::MAX_RECORDS {
            let keep_from = self.store.records.len() - Self::MAX_RECORDS;
            self.store.records = self.store.records.split_off(keep_from);
        }
        self.persist()?;
        Ok(record)
    }

    /// Newest-first lookup with optional sanitized device/action filters.
    pub fn query(&self, query: &CodeQuery) -> Vec<IrCodeRecord> {
        let limit = query
            .limit
            .unwrap_or(Self::DEFAULT_QUERY_LIMIT)
            .clamp(1, Self::MAX_QUERY_LIMIT);

        self.store
            .records
            .iter()
            .rev()
            .filter(|row| {
                query
                    .device
                    .as_deref()
                    .map(|device| row.device == device)
                    .unwrap_or(true)
            })
            .filter(|row| {
                query
                    .action
                    .as_deref()
                    .map(|action| row.action == action)
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Removes a code by id. Returns false when no record matched.
    pub fn delete(&mut self, id: u64) -> Result<bool, CodesError> {
        let before = self.store.records.len();
        self.store.records.retain(|row| row.id != id);
        if self.store.records.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.store.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.records.is_empty()
    }

    fn next_record_id(&mut self) -> u64 {
        let id = self.store.next_id;
        self.store.next_id += 1;
        id
    }

    fn load(&mut self) -> Result<(), CodesError> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(&self.path).map_err(CodesError::Read)?;
        self.store = serde_json::from_str(&raw).map_err(CodesError::Parse)?;
        if self.store.next_id == 0 {
            self.store.next_id = 1;
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), CodesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(CodesError::Write)?;
        }
        let raw = serde_json::to_string_pretty(&self.store).map_err(CodesError::Parse)?;
        fs::write(&self.path, raw).map_err(CodesError::Write)?;
        Ok(())
    }
}

fn now_utc_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
