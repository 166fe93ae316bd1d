//! Cache configuration
//!
//! The read and write folders are carried in an explicit `CacheSettings`
//! value passed to every query, rather than held as process-wide state, so
//! two sessions in one process never see each other's folders.

use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;

/// Environment variable naming the write ("cache") folder
pub const ENV_CACHE: &str = "KQLCACHE_CACHE";

/// Environment variable naming the read ("use_cache") folder
pub const ENV_USE_CACHE: &str = "KQLCACHE_USE_CACHE";

/// Environment variable overriding the cache root directory
pub const ENV_CACHE_ROOT: &str = "KQLCACHE_ROOT";

/// Directory under the platform cache dir that holds all cache folders
const CACHE_FILES_DIR: &str = "cache_files";

/// Which cache folders a query reads from and records into
///
/// Both are disabled by default: every query goes to the live service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// Folder new responses are recorded into
    pub write_folder: Option<String>,
    /// Folder responses are replayed from
    pub read_folder: Option<String>,
}

impl CacheSettings {
    /// Creates settings from optional folder names
    ///
    /// Empty or whitespace-only names disable the corresponding role.
    pub fn new(write_folder: Option<String>, read_folder: Option<String>) -> Self {
        Self {
            write_folder: non_empty(write_folder),
            read_folder: non_empty(read_folder),
        }
    }

    /// Reads `KQLCACHE_CACHE` and `KQLCACHE_USE_CACHE`
    pub fn from_env() -> Self {
        Self::new(env::var(ENV_CACHE).ok(), env::var(ENV_USE_CACHE).ok())
    }

    /// Records into and replays from the same folder
    pub fn record_replay(folder: impl Into<String>) -> Self {
        let folder = folder.into();
        Self::new(Some(folder.clone()), Some(folder))
    }

    /// Whether neither reading nor writing is enabled
    pub fn is_disabled(&self) -> bool {
        self.write_folder.is_none() && self.read_folder.is_none()
    }
}

/// Returns the cache root directory
///
/// Uses `KQLCACHE_ROOT` when set, otherwise `<platform cache dir>/cache_files`
/// (`~/.cache/kqlcache/cache_files/` on Linux). Returns `None` if neither is
/// available (e.g., no home directory).
pub fn default_cache_root() -> Option<PathBuf> {
    if let Some(root) = non_empty(env::var(ENV_CACHE_ROOT).ok()) {
        return Some(PathBuf::from(root));
    }
    let project_dirs = ProjectDirs::from("", "", "kqlcache")?;
    Some(project_dirs.cache_dir().join(CACHE_FILES_DIR))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
