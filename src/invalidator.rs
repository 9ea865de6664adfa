//! Best-effort purge of client-held caches ahead of a reload.
//!
//! [`CacheInvalidator::invalidate`] spawns the purge and returns immediately;
//! the caller issues the reload right after. Effects are not awaited: a reload
//! refetches everything regardless of how far the purge got, and a slow disk
//! must never hold the user on a stale build.

use crate::platform::{CacheStorage, KeyStore};
use std::sync::Arc;

/// What a purge managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub caches_deleted: Vec<String>,
    pub keys_removed: Vec<String>,
    /// Individual failures. Never surfaced to the user.
    pub failures: usize,
}

#[derive(Clone)]
pub struct CacheInvalidator {
    caches: Arc<dyn CacheStorage>,
    keys: Arc<dyn KeyStore>,
    persisted_keys: Arc<[String]>,
}

impl std::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("persisted_keys", &self.persisted_keys)
            .finish_non_exhaustive()
    }
}

impl CacheInvalidator {
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        keys: Arc<dyn KeyStore>,
        persisted_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            caches,
            keys,
            persisted_keys: persisted_keys.into_iter().collect(),
        }
    }

    pub fn persisted_keys(&self) -> &[String] {
        &self.persisted_keys
    }

    /// Spawn the purge on the blocking pool without a join point.
    ///
    /// Must be called from within a tokio runtime.
    pub fn invalidate(&self) {
        let this = self.clone();
        // Dropping the handle detaches the task.
        drop(tokio::task::spawn_blocking(move || {
            let report = this.purge();
            log::info!(
                "Purged {} cache(s) and {} key(s) ({} failure(s))",
                report.caches_deleted.len(),
                report.keys_removed.len(),
                report.failures
            );
        }));
    }

    /// Delete every named cache and every allow-listed key, synchronously.
    ///
    /// Failures are counted and logged; nothing is propagated.
    pub fn purge(&self) -> PurgeReport {
        let mut report = PurgeReport::default();

        match self.caches.cache_names() {
            Ok(names) => {
                for name in names {
                    match self.caches.delete_cache(&name) {
                        Ok(true) => report.caches_deleted.push(name),
                        Ok(false) => {}
                        Err(e) => {
                            log::debug!("Failed to delete cache '{}': {}", name, e);
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                log::debug!("Failed to enumerate caches: {}", e);
                report.failures += 1;
            }
        }

        for key in self.persisted_keys.iter() {
            match self.keys.remove(key) {
                Ok(true) => report.keys_removed.push(key.clone()),
                Ok(false) => {}
                Err(e) => {
                    log::debug!("Failed to remove persisted key '{}': {}", key, e);
                    report.failures += 1;
                }
            }
        }

        report
    }
}
