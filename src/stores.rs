//! Native implementations of the platform stores.
//!
//! - [`DirCacheStorage`]: each named cache is a subdirectory of a root
//! - [`FileKeyStore`]: a flat JSON object persisted with an atomic rewrite

use crate::platform::{CacheStorage, KeyStore, PlatformError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Cache storage backed by a directory of directories.
#[derive(Debug, Clone)]
pub struct DirCacheStorage {
    root: PathBuf,
}

impl DirCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_path(&self, name: &str) -> Result<PathBuf, PlatformError> {
        // A name is a single path component; anything else could escape the root.
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if !valid {
            return Err(PlatformError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl CacheStorage for DirCacheStorage {
    fn cache_names(&self) -> Result<Vec<String>, PlatformError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => log::debug!("Skipping non-UTF-8 cache directory {:?}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete_cache(&self, name: &str) -> Result<bool, PlatformError> {
        let path = self.cache_path(name)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Key/value store persisted as a JSON object.
///
/// The file is re-read on every call so external writers are not clobbered
/// by a stale in-memory copy; the mutex only serializes writers in-process.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, PlatformError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temp file first, then rename over the target.
    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), PlatformError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(map)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.read_map()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), PlatformError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    pub fn keys(&self) -> Result<Vec<String>, PlatformError> {
        Ok(self.read_map()?.into_keys().collect())
    }
}

impl KeyStore for FileKeyStore {
    fn remove(&self, key: &str) -> Result<bool, PlatformError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.write_map(&map)?;
        Ok(true)
    }
}
