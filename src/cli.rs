//! Command-line interface parsing for kqlcache
//!
//! This module handles parsing of CLI arguments using clap. Folder flags fall
//! back to environment variables and are folded into an explicit
//! `CacheSettings` value for each query.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::config::{CacheSettings, ENV_CACHE, ENV_CACHE_ROOT, ENV_USE_CACHE};
use crate::query::{parse_property_arg, EndpointVersion, QueryRequest, QueryTarget, TargetError};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A `--property` argument is not `name=value`
    #[error("Invalid property: '{0}'. Expected <name>=<value>")]
    InvalidProperty(String),

    /// The `--target` argument is malformed
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
}

/// kqlcache - record and replay Kusto query results
#[derive(Parser, Debug)]
#[command(name = "kqlcache")]
#[command(about = "Record and replay Kusto (KQL) query results through a local folder cache")]
#[command(version)]
pub struct Cli {
    /// Directory holding all cache folders
    #[arg(long, global = true, value_name = "PATH", env = ENV_CACHE_ROOT)]
    pub cache_root: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", env = "KQLCACHE_LOG", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a query, replaying from and recording into cache folders
    Query(QueryArgs),

    /// Manage cache folders
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// KQL query text, or an entry file name when the target is cache://
    pub query: String,

    /// <database>@<cluster>, or cache://<folder>[/<selector>]
    ///
    /// Examples:
    ///   --target Samples@help
    ///   --target cache://c1
    ///   --target cache://c1/StormEvents
    #[arg(long, short)]
    pub target: String,

    /// Record live results into this folder
    #[arg(long, value_name = "FOLDER", env = ENV_CACHE)]
    pub cache: Option<String>,

    /// Replay results from this folder when present
    #[arg(long, value_name = "FOLDER", env = ENV_USE_CACHE)]
    pub use_cache: Option<String>,

    /// Request property, repeatable (e.g. -p query_take_max_records=100)
    #[arg(long = "property", short = 'p', value_name = "NAME=VALUE")]
    pub properties: Vec<String>,

    /// Bearer token for the cluster
    #[arg(long, env = "KQLCACHE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// REST endpoint version
    #[arg(long, value_enum, default_value_t = Endpoint::V1)]
    pub endpoint: Endpoint,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Create a cache folder (or attach to an existing one)
    Create { name: String },
    /// Remove a cache folder and all of its entries
    Remove { name: String },
    /// List cache folders
    List,
    /// List the entries addressed by cache://<folder>[/<selector>]
    Show { uri: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    V1,
    V2,
}

impl From<Endpoint> for EndpointVersion {
    fn from(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::V1 => EndpointVersion::V1,
            Endpoint::V2 => EndpointVersion::V2,
        }
    }
}

impl QueryArgs {
    /// Builds the request from the query, target and properties
    ///
    /// # Returns
    /// * `Ok(QueryRequest)` if the target and every property parse
    /// * `Err(CliError)` otherwise
    pub fn to_request(&self) -> Result<QueryRequest, CliError> {
        let target = QueryTarget::parse(&self.target)?;
        let mut request = QueryRequest::new(self.query.clone(), target);
        for arg in &self.properties {
            let (name, value) =
                parse_property_arg(arg).ok_or_else(|| CliError::InvalidProperty(arg.clone()))?;
            request.properties.insert(name, value);
        }
        Ok(request)
    }

    /// Cache folders for this query
    pub fn settings(&self) -> CacheSettings {
        CacheSettings::new(self.cache.clone(), self.use_cache.clone())
    }
}
