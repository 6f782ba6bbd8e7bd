//! Provider configuration store
//!
//! Persisted per-provider configuration records: credentials, base
//! path/bucket, and the enabled flag. Records are kept in a JSON file and
//! decoded into typed settings variants at this boundary, so the rest of
//! the system never handles untyped config maps.
//!
//! The store is keyed by provider id, which makes the id globally unique
//! among stored configs by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use crate::errors::{Result, StorageError};

/// Identifies a backing store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Sandboxed local filesystem
    Local,
    /// OAuth2 drive (Google Drive API)
    Drive,
    /// Amazon S3 (region-addressed)
    S3,
    /// S3-compatible object store with a custom endpoint (Backblaze B2, MinIO)
    B2,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderId::Local => "local",
            ProviderId::Drive => "drive",
            ProviderId::S3 => "s3",
            ProviderId::B2 => "b2",
        };
        f.write_str(name)
    }
}

impl FromStr for ProviderId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ProviderId::Local),
            "drive" | "gdrive" => Ok(ProviderId::Drive),
            "s3" | "aws" => Ok(ProviderId::S3),
            "b2" | "backblaze" => Ok(ProviderId::B2),
            other => Err(StorageError::Configuration(format!(
                "Unknown provider id: {}",
                other
            ))),
        }
    }
}

/// How the drive backend exposes uploaded files to browsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriveStorageMode {
    /// Files readable by anyone with the link; direct view URLs
    Public,
    /// Files stay private; served through the internal proxy
    #[default]
    Private,
}

/// Provider-specific settings, decoded from the stored record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderSettings {
    /// Local filesystem rooted at `base_path`
    Local { base_path: PathBuf },

    /// OAuth2 drive credentials and target folder
    Drive {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        folder_id: String,
        #[serde(default)]
        storage_mode: DriveStorageMode,
    },

    /// Amazon S3 bucket with static keys
    S3 {
        access_key_id: String,
        secret_access_key: String,
        region: String,
        bucket: String,
    },

    /// Endpoint-addressed S3-compatible bucket with static keys
    B2 {
        access_key_id: String,
        secret_access_key: String,
        endpoint: String,
        bucket: String,
    },
}

impl ProviderSettings {
    /// The provider id this settings variant belongs to
    pub fn provider_id(&self) -> ProviderId {
        match self {
            ProviderSettings::Local { .. } => ProviderId::Local,
            ProviderSettings::Drive { .. } => ProviderId::Drive,
            ProviderSettings::S3 { .. } => ProviderId::S3,
            ProviderSettings::B2 { .. } => ProviderId::B2,
        }
    }
}

/// A stored provider configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider_id: ProviderId,
    pub name: String,
    pub is_enabled: bool,
    pub settings: ProviderSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderRecord {
    /// Build a new record stamped with the current time
    pub fn new(name: impl Into<String>, is_enabled: bool, settings: ProviderSettings) -> Self {
        let now = Utc::now();
        Self {
            provider_id: settings.provider_id(),
            name: name.into(),
            is_enabled,
            settings,
            created_at: now,
            updated_at: now,
        }
    }
}

/// File-backed store of provider records
///
/// Reads happen on every provider construction; writes only through the
/// admin surface. Local file IO is treated as fast and non-cancellable,
/// so the store uses synchronous fs calls under a std RwLock.
pub struct ConfigStore {
    path: PathBuf,
    records: RwLock<HashMap<ProviderId, ProviderRecord>>,
}

impl ConfigStore {
    /// Open the store, loading existing records if the file is present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let list: Vec<ProviderRecord> = serde_json::from_str(&content)?;
            list.into_iter().map(|r| (r.provider_id, r)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// All stored records, ordered by provider id name for stable output
    pub fn list(&self) -> Vec<ProviderRecord> {
        let records = self.records.read().expect("config store lock poisoned");
        let mut list: Vec<_> = records.values().cloned().collect();
        list.sort_by_key(|r| r.provider_id.to_string());
        list
    }

    /// Fetch a record by provider id
    pub fn get(&self, id: ProviderId) -> Option<ProviderRecord> {
        self.records
            .read()
            .expect("config store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Create or replace a record and persist the store.
    ///
    /// On update the original `created_at` is preserved and `updated_at`
    /// bumped; the caller is responsible for invalidating any cached
    /// provider instance afterwards.
    pub fn upsert(&self, mut record: ProviderRecord) -> Result<ProviderRecord> {
        let mut records = self.records.write().expect("config store lock poisoned");
        record.updated_at = Utc::now();
        if let Some(existing) = records.get(&record.provider_id) {
            record.created_at = existing.created_at;
        }
        records.insert(record.provider_id, record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    fn persist(&self, records: &HashMap<ProviderId, ProviderRecord>) -> Result<()> {
        let mut list: Vec<_> = records.values().cloned().collect();
        list.sort_by_key(|r| r.provider_id.to_string());
        let content = serde_json::to_string_pretty(&list)?;

        // Write-then-rename so a crash mid-write never truncates the store.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_record(dir: &Path) -> ProviderRecord {
        ProviderRecord::new(
            "Local disk",
            true,
            ProviderSettings::Local {
                base_path: dir.to_path_buf(),
            },
        )
    }

    #[test]
    fn test_provider_id_parsing() {
        assert_eq!(ProviderId::from_str("local").unwrap(), ProviderId::Local);
        assert_eq!(ProviderId::from_str("gdrive").unwrap(), ProviderId::Drive);
        assert_eq!(ProviderId::from_str("b2").unwrap(), ProviderId::B2);
        assert!(ProviderId::from_str("ftp").is_err());
    }

    #[test]
    fn test_open_missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("providers.json")).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");

        let store = ConfigStore::open(&path).unwrap();
        store.upsert(local_record(dir.path())).unwrap();

        let reloaded = ConfigStore::open(&path).unwrap();
        let record = reloaded.get(ProviderId::Local).expect("record survives reload");
        assert_eq!(record.name, "Local disk");
        assert!(record.is_enabled);
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("providers.json")).unwrap();

        let first = store.upsert(local_record(dir.path())).unwrap();
        let mut second = local_record(dir.path());
        second.name = "Renamed".to_string();
        let second = store.upsert(second).unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_settings_round_trip_tagged() {
        let settings = ProviderSettings::B2 {
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            endpoint: "https://s3.us-west-004.backblazeb2.com".into(),
            bucket: "gallery".into(),
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"type\":\"b2\""));
        let back: ProviderSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider_id(), ProviderId::B2);
    }
}
