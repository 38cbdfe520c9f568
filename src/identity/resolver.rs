//! Name resolution against mapping tables and fingerprint history.

use super::error::{IdentityError, Result};
use super::fingerprint::{self, FingerprintRecord, FingerprintTable, UnstableMapping};
use super::mapping::{normalize_name, MappingEntry, MappingTable, ReverseIndex};
use super::remote::MappingSource;
use super::store::{MappingStore, RemoteCache};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use streamsweep_common::{ResolvedIdentity, TechMetadata};

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Cached remote data older than this is refetched on load.
    pub cache_ttl: chrono::Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cache_ttl: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Default)]
struct MappingState {
    remote: MappingTable,
    user: MappingTable,
    index: ReverseIndex,
}

impl MappingState {
    fn reindex(&mut self) {
        self.index = ReverseIndex::build(&self.remote, &self.user);
    }

    fn entry(&self, standard_name: &str) -> Option<&MappingEntry> {
        self.user
            .get(standard_name)
            .or_else(|| self.remote.get(standard_name))
    }

    /// Exact (normalized) match of a raw name.
    fn identity_for(&self, raw_name: &str) -> Option<ResolvedIdentity> {
        let standard = self.index.standard_for(raw_name)?;
        Some(match self.entry(standard) {
            Some(entry) => entry.identity(standard),
            None => ResolvedIdentity::unresolved(standard),
        })
    }
}

/// Maps raw stream names to standard identities and learns from what it sees.
///
/// Mapping tables sit behind a read-mostly `RwLock`; fingerprint history has
/// its own `Mutex`. Every mutation is written through to the [`MappingStore`].
pub struct IdentityResolver {
    store: Arc<dyn MappingStore>,
    source: Arc<dyn MappingSource>,
    mappings: RwLock<MappingState>,
    fingerprints: Mutex<FingerprintTable>,
}

impl IdentityResolver {
    /// Load persisted tables, fetching the remote dataset when the cache is
    /// missing or stale.
    ///
    /// A failed fetch is logged and the stale cache (or nothing) is used.
    ///
    /// # Errors
    ///
    /// Returns an error when the user mappings or fingerprint history exist
    /// but cannot be read, rather than starting over and overwriting them.
    pub async fn load(
        store: Arc<dyn MappingStore>,
        source: Arc<dyn MappingSource>,
        settings: ResolverSettings,
    ) -> Result<Self> {
        let user = store.load_user_mappings()?;
        let fingerprints = store.load_fingerprints()?;

        let cache = store.load_remote_cache().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring unreadable remote mapping cache");
            None
        });

        let remote = match cache {
            Some(cache) if !cache.is_stale(settings.cache_ttl) => cache.mappings,
            stale => match source.fetch().await {
                Ok(table) => {
                    if let Err(e) = store.save_remote_cache(&RemoteCache::new(table.clone())) {
                        tracing::warn!(error = %e, "Failed to cache remote mappings");
                    }
                    table
                }
                Err(e) => {
                    tracing::warn!(source = %source.describe(), error = %e, "Remote mappings unavailable, using local mappings");
                    stale.map(|c| c.mappings).unwrap_or_default()
                }
            },
        };

        let mut state = MappingState {
            remote,
            user,
            index: ReverseIndex::default(),
        };
        state.reindex();

        tracing::info!(
            remote = state.remote.len(),
            user = state.user.len(),
            fingerprints = fingerprints.len(),
            "Identity resolver loaded"
        );

        Ok(Self {
            store,
            source,
            mappings: RwLock::new(state),
            fingerprints: Mutex::new(fingerprints),
        })
    }

    /// Resolve a raw name observed at `address` with the given metadata.
    ///
    /// Order: exact mapping match, then a stable fingerprint's previous
    /// resolution, then the raw name itself. The observation is recorded in
    /// fingerprint history either way.
    pub fn resolve(&self, raw_name: &str, address: &str, metadata: &TechMetadata) -> ResolvedIdentity {
        if raw_name.trim().is_empty() {
            return ResolvedIdentity::unresolved(raw_name);
        }

        let fp = fingerprint::fingerprint(address, metadata);
        let exact = self.mappings.read().identity_for(raw_name);

        let identity = match exact {
            Some(identity) => identity,
            None => {
                let fallback = self
                    .fingerprints
                    .lock()
                    .get(&fp)
                    .and_then(|record| record.fallback_for(raw_name).map(str::to_string));

                match fallback {
                    Some(name) => {
                        tracing::debug!(raw = %raw_name, resolved = %name, "Resolved through fingerprint history");
                        let mappings = self.mappings.read();
                        match mappings.entry(&name) {
                            Some(entry) => entry.identity(&name),
                            None => mappings
                                .identity_for(&name)
                                .unwrap_or_else(|| ResolvedIdentity::unresolved(name)),
                        }
                    }
                    None => ResolvedIdentity::unresolved(raw_name),
                }
            }
        };

        self.observe(&fp, address, raw_name, &identity.standard_name);
        identity
    }

    /// Exact mapping lookup; records nothing.
    pub fn lookup(&self, raw_name: &str) -> Option<ResolvedIdentity> {
        self.mappings.read().identity_for(raw_name)
    }

    /// Add `raw_name` as an alias of `standard_name` in the user table.
    /// Logo and group replace the stored values when given.
    pub fn add_user_mapping(
        &self,
        raw_name: &str,
        standard_name: &str,
        logo: Option<&str>,
        group: Option<&str>,
    ) -> Result<()> {
        let raw_name = raw_name.trim();
        let standard_name = standard_name.trim();
        if raw_name.is_empty() || standard_name.is_empty() {
            return Err(IdentityError::InvalidMapping(
                "raw and standard names must not be empty".to_string(),
            ));
        }

        let mut mappings = self.mappings.write();
        let entry = mappings.user.entry(standard_name.to_string()).or_default();
        if let Some(logo) = logo {
            entry.logo = Some(logo.to_string());
        }
        if let Some(group) = group {
            entry.group = Some(group.to_string());
        }
        let key = normalize_name(raw_name);
        if !entry.raw_names.iter().any(|r| normalize_name(r) == key) {
            entry.raw_names.push(raw_name.to_string());
        }
        mappings.reindex();
        self.store.save_user_mappings(&mappings.user)?;

        tracing::info!(raw = %raw_name, standard = %standard_name, "Added user mapping");
        Ok(())
    }

    /// Drop a user mapping. Returns whether it existed.
    pub fn remove_user_mapping(&self, standard_name: &str) -> Result<bool> {
        let mut mappings = self.mappings.write();
        if mappings.user.remove(standard_name).is_none() {
            return Ok(false);
        }
        mappings.reindex();
        self.store.save_user_mappings(&mappings.user)?;

        tracing::info!(standard = %standard_name, "Removed user mapping");
        Ok(true)
    }

    /// Fetch the remote dataset now, replacing the cached copy on success.
    /// Returns the number of remote mappings.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Remote`] on fetch failure; current mappings stay in place.
    pub async fn refresh_remote_mappings(&self) -> Result<usize> {
        let table = self.source.fetch().await?;
        if let Err(e) = self.store.save_remote_cache(&RemoteCache::new(table.clone())) {
            tracing::warn!(error = %e, "Failed to cache remote mappings");
        }

        let count = table.len();
        let mut mappings = self.mappings.write();
        mappings.remote = table;
        mappings.reindex();
        tracing::info!(mappings = count, "Remote mapping cache refreshed");
        Ok(count)
    }

    /// Fingerprints that resolved to conflicting names.
    pub fn unstable_mappings(&self) -> Vec<UnstableMapping> {
        self.fingerprints
            .lock()
            .iter()
            .filter(|(_, record)| record.unstable)
            .map(|(fp, record)| UnstableMapping::from_record(fp, record))
            .collect()
    }

    /// Standard names fingerprint history has associated with `raw_name`.
    pub fn mapping_suggestions(&self, raw_name: &str) -> Vec<String> {
        let key = normalize_name(raw_name);
        let suggestions: BTreeSet<String> = self
            .fingerprints
            .lock()
            .values()
            .filter(|record| record.raw_names.iter().any(|r| normalize_name(r) == key))
            .flat_map(|record| record.resolved_names.iter())
            .filter(|name| normalize_name(name) != key)
            .cloned()
            .collect();
        suggestions.into_iter().collect()
    }

    /// Fingerprint for an address and its metadata.
    pub fn fingerprint(&self, address: &str, metadata: &TechMetadata) -> String {
        fingerprint::fingerprint(address, metadata)
    }

    pub fn user_mappings(&self) -> MappingTable {
        self.mappings.read().user.clone()
    }

    /// Remote plus user mapping counts.
    pub fn mapping_counts(&self) -> (usize, usize) {
        let mappings = self.mappings.read();
        (mappings.remote.len(), mappings.user.len())
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.lock().len()
    }

    fn observe(&self, fp: &str, address: &str, raw_name: &str, resolved_name: &str) {
        let now = Utc::now();
        let mut fingerprints = self.fingerprints.lock();

        match fingerprints.get_mut(fp) {
            Some(record) => {
                if record.observe(raw_name, resolved_name, now) {
                    tracing::warn!(
                        fingerprint = %fp,
                        address = %address,
                        names = ?record.resolved_names,
                        "Unstable channel mapping"
                    );
                }
            }
            None => {
                fingerprints.insert(
                    fp.to_string(),
                    FingerprintRecord::new(address, raw_name, resolved_name, now),
                );
            }
        }

        if let Err(e) = self.store.save_fingerprints(&fingerprints) {
            tracing::warn!(error = %e, "Failed to persist fingerprint history");
        }
    }
}
