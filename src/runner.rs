//! Cache-aware query execution
//!
//! `CachedQueryRunner` sits between the command front-end and a `QueryClient`.
//! It replays recorded responses from the read folder, falls back to a live
//! call, and records live responses into the write folder. Cache failures
//! never fail a query that the live service can answer: they are logged and
//! returned as warnings alongside the response.

use tracing::{debug, info, warn};
use thiserror::Error;

use crate::cache::{
    compute_key, normalize_query, CacheError, CacheKey, CacheUri, LoadedEntry, ResultCache,
};
use crate::config::CacheSettings;
use crate::query::{ClientError, QueryClient, QueryRequest, QueryResponse, QueryTarget, Target};

/// Errors that fail a query outright
#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid request, or a `cache://` target whose folder cannot be read
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The live call failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A `cache://` target holds no entry for the query
    #[error("No cached result for this query in cache folder '{folder}'")]
    NotCached { folder: String },

    /// A `cache://` target holds several entries for the query
    #[error("{count} cached results in folder '{folder}' match this query; narrow the selector or query by entry file name")]
    Ambiguous { folder: String, count: usize },
}

/// Where a response came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// Issued against the live service
    Live,
    /// Replayed from the named cache folder
    Cache { folder: String },
}

/// A response plus how it was obtained
#[derive(Debug)]
pub struct QueryOutcome {
    pub response: QueryResponse,
    pub source: ResponseSource,
    /// Cache failures that were recovered from
    pub warnings: Vec<CacheError>,
}

impl QueryOutcome {
    pub fn is_cached(&self) -> bool {
        matches!(self.source, ResponseSource::Cache { .. })
    }
}

/// Runs queries through the result cache
#[derive(Debug)]
pub struct CachedQueryRunner<C> {
    client: C,
    cache: ResultCache,
}

impl<C: QueryClient> CachedQueryRunner<C> {
    pub fn new(client: C, cache: ResultCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Runs a request with the given cache settings
    ///
    /// # Returns
    /// * `Ok(QueryOutcome)` with the replayed or live response
    /// * `Err(RunError)` if the request is invalid, the live call fails, or a
    ///   `cache://` target has no single matching entry
    pub async fn run(
        &self,
        request: &QueryRequest,
        settings: &CacheSettings,
    ) -> Result<QueryOutcome, RunError> {
        match &request.target {
            QueryTarget::Cache(uri) => self.replay(&request.query, uri),
            QueryTarget::Kusto(target) => self.run_against(request, target, settings).await,
        }
    }

    async fn run_against(
        &self,
        request: &QueryRequest,
        target: &Target,
        settings: &CacheSettings,
    ) -> Result<QueryOutcome, RunError> {
        let mut warnings = Vec::new();
        let key = if settings.is_disabled() {
            None
        } else {
            Some(compute_key(&request.query, target, &request.properties)?)
        };

        if let (Some(key), Some(read_folder)) = (&key, &settings.read_folder) {
            match self.lookup(read_folder, key) {
                Ok(Some(response)) => {
                    info!(folder = %read_folder, fingerprint = key.fingerprint(), "serving query from cache");
                    if let Some(write_folder) = &settings.write_folder {
                        if write_folder != read_folder {
                            self.record(write_folder, key, &response, &mut warnings);
                        }
                    }
                    return Ok(QueryOutcome {
                        response,
                        source: ResponseSource::Cache {
                            folder: read_folder.clone(),
                        },
                        warnings,
                    });
                }
                Ok(None) => debug!(folder = %read_folder, "cache miss"),
                Err(e) => {
                    warn!(error = %e, "cache lookup failed, querying live service");
                    warnings.push(e);
                }
            }
        }

        let response = self
            .client
            .execute(target, &request.query, &request.properties)
            .await?;

        if let (Some(key), Some(write_folder)) = (&key, &settings.write_folder) {
            self.record(write_folder, key, &response, &mut warnings);
        }

        Ok(QueryOutcome {
            response,
            source: ResponseSource::Live,
            warnings,
        })
    }

    fn lookup(&self, folder: &str, key: &CacheKey) -> Result<Option<QueryResponse>, CacheError> {
        let folder = self.cache.folder(folder)?;
        Ok(self.cache.try_load(&folder, key)?.map(|entry| entry.response))
    }

    fn record(
        &self,
        folder: &str,
        key: &CacheKey,
        response: &QueryResponse,
        warnings: &mut Vec<CacheError>,
    ) {
        let result = self
            .cache
            .folder(folder)
            .and_then(|folder| self.cache.store(&folder, key, response));
        match result {
            Ok(outcome) if outcome.was_written() => {
                info!(path = %outcome.path().display(), "recorded query result")
            }
            Ok(outcome) => {
                debug!(path = %outcome.path().display(), "query result already recorded")
            }
            Err(e) => {
                warn!(error = %e, "failed to record query result");
                warnings.push(e);
            }
        }
    }

    /// Answers a query addressed to a `cache://` target
    ///
    /// A query ending in `.json` names an entry file directly; any other query
    /// is matched against the normalized query text of the selected entries.
    fn replay(&self, query: &str, uri: &CacheUri) -> Result<QueryOutcome, RunError> {
        let folder = self.cache.folder(&uri.folder)?;
        let entries = self.cache.entries(&folder, uri.selector.as_deref())?;

        let query = query.trim();
        let mut matches: Vec<LoadedEntry> = if query.ends_with(".json") {
            entries
                .into_iter()
                .filter(|e| e.file_name() == query)
                .collect()
        } else {
            let normalized = normalize_query(query);
            if normalized.is_empty() {
                return Err(CacheError::InvalidRequest("query text is empty".to_string()).into());
            }
            entries
                .into_iter()
                .filter(|e| e.entry.query == normalized)
                .collect()
        };

        match matches.len() {
            0 => Err(RunError::NotCached {
                folder: uri.folder.clone(),
            }),
            1 => {
                let loaded = matches.remove(0);
                info!(path = %loaded.path.display(), "replaying cached query result");
                Ok(QueryOutcome {
                    response: loaded.entry.response,
                    source: ResponseSource::Cache {
                        folder: uri.folder.clone(),
                    },
                    warnings: Vec::new(),
                })
            }
            count => Err(RunError::Ambiguous {
                folder: uri.folder.clone(),
                count,
            }),
        }
    }
}
