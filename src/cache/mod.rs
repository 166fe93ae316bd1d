//! Record/replay cache for query responses
//!
//! This module stores query responses on disk, keyed by a fingerprint of the
//! request, inside user-named cache folders. A "cache" here records and
//! replays: once a response is recorded for a request it is returned
//! unchanged on every later lookup. There is no expiry and no eviction.

mod error;
mod key;
mod store;
mod uri;

pub use error::CacheError;
pub use key::{compute_key, normalize_property_name, normalize_query, CacheKey, KEYED_PROPERTIES};
pub use store::{CacheEntry, CacheFolder, LoadedEntry, ResultCache, StoreOutcome, ENTRY_FORMAT_VERSION};
pub use uri::{resolve_pseudo_uri, CacheUri};
