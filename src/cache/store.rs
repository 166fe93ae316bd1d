//! File-backed result store
//!
//! Provides a `ResultCache` that records query responses as JSON files inside
//! named cache folders and replays them by key. Entries are written once and
//! never changed; there is no expiry and no eviction.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CacheError, CacheKey};
use crate::config::default_cache_root;
use crate::query::QueryResponse;

/// Version of the on-disk entry layout
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// Prefix of in-flight temporary files; never picked up as entries
const TEMP_PREFIX: &str = ".kqlcache-";

/// A recorded response together with the request it answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub format_version: u32,
    /// Fingerprint of the request, also embedded in the file name
    pub fingerprint: String,
    /// Normalized query text
    pub query: String,
    pub database: String,
    pub cluster: String,
    /// Keyed request properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    /// When the response was recorded
    pub cached_at: DateTime<Utc>,
    pub response: QueryResponse,
}

impl CacheEntry {
    fn new(key: &CacheKey, response: QueryResponse) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            fingerprint: key.fingerprint().to_string(),
            query: key.query().to_string(),
            database: key.target().database.trim().to_string(),
            cluster: key.target().cluster_name().to_string(),
            properties: key.properties().clone(),
            cached_at: Utc::now(),
            response,
        }
    }

    /// First identifier of the query, e.g. `StormEvents` in `StormEvents | count`
    pub fn source_table(&self) -> Option<&str> {
        let token = self
            .query
            .split(|c: char| c.is_whitespace() || c == '|' || c == ';')
            .next()?;
        (!token.is_empty() && !token.starts_with('.')).then_some(token)
    }
}

/// An entry read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEntry {
    pub path: PathBuf,
    pub entry: CacheEntry,
}

impl LoadedEntry {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether the entry is addressed by a `cache://<folder>/<selector>` selector
    ///
    /// Matches, case-insensitively, the exact file name, the `<database>_at_<cluster>`
    /// slug, the database name, a `<cluster>/<database>` pair, the query's source
    /// table, or the name of any returned table.
    pub fn matches_selector(&self, selector: &str) -> bool {
        let selector = selector.trim().to_lowercase();
        let file_name = self.file_name().to_lowercase();
        let slug = file_name.split("__").next().unwrap_or_default();
        let entry = &self.entry;

        if file_name == selector || slug == selector {
            return true;
        }
        if entry.database.to_lowercase() == selector {
            return true;
        }
        if let Some((cluster, database)) = selector.split_once('/') {
            if entry.cluster.to_lowercase() == cluster && entry.database.to_lowercase() == database {
                return true;
            }
        }
        if entry
            .source_table()
            .is_some_and(|t| t.to_lowercase() == selector)
        {
            return true;
        }
        entry
            .response
            .tables
            .iter()
            .any(|t| t.name.to_lowercase() == selector)
    }
}

/// A resolved cache folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFolder {
    /// Name as given by the user
    pub name: String,
    /// Directory the entries live in
    pub path: PathBuf,
}

impl CacheFolder {
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }
}

/// Result of `ResultCache::store`
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// A new entry was written
    Written { path: PathBuf, entry: CacheEntry },
    /// An entry for the key already existed and was left untouched
    AlreadyCached { path: PathBuf },
}

impl StoreOutcome {
    pub fn path(&self) -> &Path {
        match self {
            StoreOutcome::Written { path, .. } | StoreOutcome::AlreadyCached { path } => path,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, StoreOutcome::Written { .. })
    }
}

/// Manages cache folders and the entries inside them
///
/// Folder names are resolved under a cache root (`~/.cache/kqlcache/cache_files/`
/// on Linux); absolute paths are used as given. Each entry is one JSON file
/// named `<database>_at_<cluster>__<fingerprint>.json`.
#[derive(Debug, Clone)]
pub struct ResultCache {
    /// Directory holding all cache folders
    root: PathBuf,
}

impl ResultCache {
    /// Creates a ResultCache rooted at the default cache root
    ///
    /// Returns `None` if the root cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        default_cache_root().map(Self::with_root)
    }

    /// Creates a ResultCache with a custom root directory
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a folder name to its directory
    ///
    /// Relative names must stay inside the cache root; absolute paths are
    /// accepted as a user-designated location.
    pub fn folder(&self, name: &str) -> Result<CacheFolder, CacheError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CacheError::InvalidFolder(name.to_string()));
        }

        let as_path = Path::new(name);
        let path = if as_path.is_absolute() {
            as_path.to_path_buf()
        } else if as_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            self.root.join(as_path)
        } else {
            return Err(CacheError::InvalidFolder(name.to_string()));
        };

        Ok(CacheFolder {
            name: name.to_string(),
            path,
        })
    }

    /// Looks up the entry for a key
    ///
    /// # Returns
    /// * `Ok(Some(CacheEntry))` if a matching entry exists
    /// * `Ok(None)` if the folder does not exist or holds no entry for the key
    /// * `Err(CacheError::Corrupt)` if the matching file cannot be used
    /// * `Err(CacheError::Read)` if the matching file cannot be read
    pub fn try_load(
        &self,
        folder: &CacheFolder,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let path = match find_entry_path(folder, key) {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(None),
            Err(source) => {
                return Err(CacheError::Read {
                    path: folder.path.clone(),
                    source,
                })
            }
        };

        let entry = match read_entry(&path) {
            Ok(entry) => entry,
            // Removed between lookup and read
            Err(CacheError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        if entry.fingerprint != key.fingerprint() {
            return Err(CacheError::Corrupt {
                path,
                reason: format!(
                    "fingerprint mismatch: file holds {}, expected {}",
                    entry.fingerprint,
                    key.fingerprint()
                ),
            });
        }

        debug!(path = %path.display(), "cache hit");
        Ok(Some(entry))
    }

    /// Records a response for a key
    ///
    /// The entry is written to a temporary file in the same folder and then
    /// linked into place without replacing an existing file, so readers never
    /// see a partial entry and the first recorded response for a key wins.
    ///
    /// # Returns
    /// * `Ok(StoreOutcome::Written)` if a new entry was created
    /// * `Ok(StoreOutcome::AlreadyCached)` if an entry for the key already existed
    /// * `Err(CacheError::Write)` on filesystem failure
    pub fn store(
        &self,
        folder: &CacheFolder,
        key: &CacheKey,
        response: &QueryResponse,
    ) -> Result<StoreOutcome, CacheError> {
        let path = folder.path.join(key.file_name());
        let write_err = |source: io::Error| CacheError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&folder.path).map_err(write_err)?;
        if let Some(existing) = find_entry_path(folder, key).map_err(write_err)? {
            debug!(path = %existing.display(), "entry already cached, keeping first write");
            return Ok(StoreOutcome::AlreadyCached { path: existing });
        }

        write_new_entry(folder, path, CacheEntry::new(key, response.clone()))
    }

    /// Creates a cache folder under the root
    ///
    /// Returns `true` if the folder was created, `false` if it already existed.
    pub fn create_or_attach(&self, name: &str) -> Result<bool, CacheError> {
        let folder = self.folder(name)?;
        if folder.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&folder.path).map_err(|source| CacheError::Write {
            path: folder.path.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Deletes a cache folder and every entry in it
    ///
    /// Only folders under the cache root can be removed. Returns `false` if the
    /// folder did not exist.
    pub fn remove(&self, name: &str) -> Result<bool, CacheError> {
        if Path::new(name.trim()).is_absolute() {
            return Err(CacheError::InvalidFolder(name.to_string()));
        }
        let folder = self.folder(name)?;
        if !folder.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&folder.path).map_err(|source| CacheError::Write {
            path: folder.path.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Names of the cache folders under the root, sorted
    pub fn list(&self) -> Result<Vec<String>, CacheError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let read_err = |source: io::Error| CacheError::Read {
            path: self.root.clone(),
            source,
        };

        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&self.root).map_err(read_err)? {
            let dir_entry = dir_entry.map_err(read_err)?;
            if dir_entry.file_type().map_err(read_err)?.is_dir() {
                names.push(dir_entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Reads every entry in a folder, optionally filtered by a selector
    ///
    /// Unreadable entries are skipped with a warning. Entries are sorted by
    /// file name.
    pub fn entries(
        &self,
        folder: &CacheFolder,
        selector: Option<&str>,
    ) -> Result<Vec<LoadedEntry>, CacheError> {
        if !folder.exists() {
            return Ok(Vec::new());
        }
        let read_err = |source: io::Error| CacheError::Read {
            path: folder.path.clone(),
            source,
        };

        let mut paths = Vec::new();
        for dir_entry in fs::read_dir(&folder.path).map_err(read_err)? {
            let path = dir_entry.map_err(read_err)?.path();
            if is_entry_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::new();
        for path in paths {
            match read_entry(&path) {
                Ok(entry) => entries.push(LoadedEntry { path, entry }),
                Err(e) => warn!(error = %e, "skipping unreadable cache entry"),
            }
        }

        if let Some(selector) = selector {
            entries.retain(|e| e.matches_selector(selector));
        }
        Ok(entries)
    }
}

/// Path of the file holding `key` in `folder`, if any
///
/// Falls back to a scan for the fingerprint suffix so that an entry is found
/// even if its slug was produced from a differently spelled target.
fn find_entry_path(folder: &CacheFolder, key: &CacheKey) -> io::Result<Option<PathBuf>> {
    let exact = folder.path.join(key.file_name());
    if exact.is_file() {
        return Ok(Some(exact));
    }
    if !folder.exists() {
        return Ok(None);
    }

    let suffix = key.file_suffix();
    for dir_entry in fs::read_dir(&folder.path)? {
        let path = dir_entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&suffix) && !n.starts_with('.'));
        if matches && path.is_file() {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn is_entry_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && name.ends_with(".json") && path.is_file()
}

fn read_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let content = fs::read_to_string(path).map_err(|source| CacheError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let entry: CacheEntry = serde_json::from_str(&content).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if entry.format_version != ENTRY_FORMAT_VERSION {
        return Err(CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", entry.format_version),
        });
    }
    Ok(entry)
}

/// Writes `entry` to `path` unless a file is already there
fn write_new_entry(
    folder: &CacheFolder,
    path: PathBuf,
    entry: CacheEntry,
) -> Result<StoreOutcome, CacheError> {
    let write_err = |source: io::Error| CacheError::Write {
        path: path.clone(),
        source,
    };

    let json = serde_json::to_string_pretty(&entry)
        .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(&folder.path)
        .map_err(write_err)?;
    temp.write_all(json.as_bytes()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    // On failure the temp file is handed back inside the error and removed on drop
    match temp.persist_noclobber(&path) {
        Ok(_) => {
            debug!(path = %path.display(), "cache entry written");
            Ok(StoreOutcome::Written { path, entry })
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "lost write race, keeping first write");
            Ok(StoreOutcome::AlreadyCached { path })
        }
        Err(e) => Err(write_err(e.error)),
    }
}
