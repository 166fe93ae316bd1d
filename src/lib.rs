//! kqlcache library
//!
//! Records Kusto query responses into local cache folders and replays them,
//! so a query answered once can be answered again without the live service.

pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod query;
pub mod runner;

pub use cache::{compute_key, resolve_pseudo_uri, CacheError, CacheKey, CacheUri, ResultCache};
pub use config::CacheSettings;
pub use runner::{CachedQueryRunner, QueryOutcome, ResponseSource, RunError};
