//! Persistence for the mapping cache, user mappings, and fingerprint history.

use super::error::{IdentityError, Result};
use super::fingerprint::FingerprintTable;
use super::mapping::MappingTable;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REMOTE_CACHE_FILE: &str = "channel_mappings_cache.json";
pub const USER_MAPPINGS_FILE: &str = "user_channel_mappings.json";
pub const FINGERPRINTS_FILE: &str = "channel_fingerprints.json";

/// Cached copy of the remote dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCache {
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mappings: MappingTable,
}

impl RemoteCache {
    pub fn new(mappings: MappingTable) -> Self {
        Self {
            fetched_at: Some(Utc::now()),
            mappings,
        }
    }

    /// Whether the cache is missing a timestamp or older than `ttl`.
    pub fn is_stale(&self, ttl: chrono::Duration) -> bool {
        match self.fetched_at {
            Some(at) => Utc::now() - at > ttl,
            None => true,
        }
    }
}

/// Storage for the resolver's three tables.
///
/// Called on every mutation, from blocking context.
pub trait MappingStore: Send + Sync {
    fn load_remote_cache(&self) -> Result<Option<RemoteCache>>;
    fn save_remote_cache(&self, cache: &RemoteCache) -> Result<()>;
    fn load_user_mappings(&self) -> Result<MappingTable>;
    fn save_user_mappings(&self, mappings: &MappingTable) -> Result<()>;
    fn load_fingerprints(&self) -> Result<FingerprintTable>;
    fn save_fingerprints(&self, fingerprints: &FingerprintTable) -> Result<()>;
}

/// JSON files in one directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IdentityError::store(path, e)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write through a temp file and rename so readers never see a partial
    /// table. Each write gets its own temp file; concurrent writers race
    /// only on the final rename.
    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| IdentityError::store(&self.dir, e))?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_string_pretty(value)?;
        if let Err(e) = std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, &path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(IdentityError::store(&path, e));
        }
        Ok(())
    }
}

impl MappingStore for JsonFileStore {
    fn load_remote_cache(&self) -> Result<Option<RemoteCache>> {
        self.read(REMOTE_CACHE_FILE)
    }

    fn save_remote_cache(&self, cache: &RemoteCache) -> Result<()> {
        self.write(REMOTE_CACHE_FILE, cache)
    }

    fn load_user_mappings(&self) -> Result<MappingTable> {
        Ok(self.read(USER_MAPPINGS_FILE)?.unwrap_or_default())
    }

    fn save_user_mappings(&self, mappings: &MappingTable) -> Result<()> {
        self.write(USER_MAPPINGS_FILE, mappings)
    }

    fn load_fingerprints(&self) -> Result<FingerprintTable> {
        Ok(self.read(FINGERPRINTS_FILE)?.unwrap_or_default())
    }

    fn save_fingerprints(&self, fingerprints: &FingerprintTable) -> Result<()> {
        self.write(FINGERPRINTS_FILE, fingerprints)
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    remote: Option<RemoteCache>,
    user: MappingTable,
    fingerprints: FingerprintTable,
    saves: usize,
}

/// In-process store, for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a remote cache and user mappings.
    pub fn with_tables(remote: Option<RemoteCache>, user: MappingTable) -> Self {
        Self {
            tables: Mutex::new(MemoryTables {
                remote,
                user,
                ..Default::default()
            }),
        }
    }

    /// Number of save calls received.
    pub fn save_count(&self) -> usize {
        self.tables.lock().saves
    }

    pub fn fingerprints(&self) -> FingerprintTable {
        self.tables.lock().fingerprints.clone()
    }

    pub fn user_mappings(&self) -> MappingTable {
        self.tables.lock().user.clone()
    }
}

impl MappingStore for MemoryStore {
    fn load_remote_cache(&self) -> Result<Option<RemoteCache>> {
        Ok(self.tables.lock().remote.clone())
    }

    fn save_remote_cache(&self, cache: &RemoteCache) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.remote = Some(cache.clone());
        tables.saves += 1;
        Ok(())
    }

    fn load_user_mappings(&self) -> Result<MappingTable> {
        Ok(self.tables.lock().user.clone())
    }

    fn save_user_mappings(&self, mappings: &MappingTable) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.user = mappings.clone();
        tables.saves += 1;
        Ok(())
    }

    fn load_fingerprints(&self) -> Result<FingerprintTable> {
        Ok(self.tables.lock().fingerprints.clone())
    }

    fn save_fingerprints(&self, fingerprints: &FingerprintTable) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.fingerprints = fingerprints.clone();
        tables.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::fingerprint::FingerprintRecord;
    use crate::identity::mapping::MappingEntry;

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data"));

        assert!(store.load_remote_cache().unwrap().is_none());
        assert!(store.load_user_mappings().unwrap().is_empty());

        let mut user = MappingTable::new();
        user.insert(
            "News 24".into(),
            MappingEntry {
                raw_names: vec!["NEWS24 HD".into()],
                group: Some("News".into()),
                ..Default::default()
            },
        );
        store.save_user_mappings(&user).unwrap();
        assert_eq!(store.load_user_mappings().unwrap(), user);

        let mut prints = FingerprintTable::new();
        prints.insert(
            "abc".into(),
            FingerprintRecord::new("http://h/1", "raw", "Std", Utc::now()),
        );
        store.save_fingerprints(&prints).unwrap();
        assert_eq!(store.load_fingerprints().unwrap(), prints);

        let cache = RemoteCache::new(user.clone());
        store.save_remote_cache(&cache).unwrap();
        assert_eq!(store.load_remote_cache().unwrap(), Some(cache));
        assert!(dir.path().join("data").join(REMOTE_CACHE_FILE).exists());
    }

    #[test]
    fn test_concurrent_writes_leave_a_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path()));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut mappings = MappingTable::new();
                    for n in 0..200 {
                        mappings.insert(
                            format!("Channel {i}-{n}"),
                            MappingEntry {
                                raw_names: vec![format!("CH{i}{n}")],
                                ..Default::default()
                            },
                        );
                    }
                    for _ in 0..10 {
                        store.save_remote_cache(&RemoteCache::new(mappings.clone())).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let cache = store.load_remote_cache().unwrap().unwrap();
        assert_eq!(cache.mappings.len(), 200);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USER_MAPPINGS_FILE), "{not json").unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(matches!(store.load_user_mappings(), Err(IdentityError::Json(_))));
    }

    #[test]
    fn test_cache_staleness() {
        let mut cache = RemoteCache::default();
        assert!(cache.is_stale(chrono::Duration::hours(24)));
        cache.fetched_at = Some(Utc::now() - chrono::Duration::hours(25));
        assert!(cache.is_stale(chrono::Duration::hours(24)));
        cache.fetched_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(!cache.is_stale(chrono::Duration::hours(24)));
    }
}
