//! Query requests, responses and the REST client
//!
//! This module contains the request types the cache keys on, the tabular
//! response shape shared by live and cached results, and the client that
//! talks to Kusto's REST query endpoint.

pub mod client;
pub mod response;

pub use client::{ClientError, KustoClient, QueryClient};
pub use response::{Column, EndpointVersion, QueryResponse, ResponseError, ResultTable};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cache::{resolve_pseudo_uri, CacheError, CacheUri};

/// Request properties (`servertimeout`, `query_datascope`, ...) by name
pub type QueryProperties = BTreeMap<String, Value>;

/// Errors for malformed query targets
#[derive(Debug, Error)]
pub enum TargetError {
    /// Neither a `database@cluster` pair nor a `cache://` URI
    #[error("Invalid target: '{0}'. Expected <database>@<cluster> or cache://<folder>[/<selector>]")]
    Invalid(String),

    /// A `cache://` target that failed to parse
    #[error(transparent)]
    Uri(#[from] CacheError),
}

/// A Kusto database on a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Database name
    pub database: String,
    /// Cluster name (`help`) or URL (`https://help.kusto.windows.net`)
    pub cluster: String,
}

impl Target {
    pub fn new(database: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            cluster: cluster.into(),
        }
    }

    /// Parses `database@cluster`
    pub fn parse(s: &str) -> Option<Self> {
        let (database, cluster) = s.trim().split_once('@')?;
        let (database, cluster) = (database.trim(), cluster.trim());
        if database.is_empty() || cluster.is_empty() {
            return None;
        }
        Some(Self::new(database, cluster))
    }

    /// Cluster host without scheme or trailing slash
    pub fn cluster_name(&self) -> &str {
        let cluster = self.cluster.trim();
        let cluster = cluster
            .strip_prefix("https://")
            .or_else(|| cluster.strip_prefix("http://"))
            .unwrap_or(cluster);
        cluster.trim_end_matches('/')
    }

    /// Base URL of the cluster's REST endpoint
    ///
    /// A bare name such as `help` expands to `https://help.kusto.windows.net`.
    pub fn cluster_url(&self) -> String {
        let cluster = self.cluster.trim().trim_end_matches('/');
        if cluster.contains("://") {
            cluster.to_string()
        } else if cluster.contains('.') {
            format!("https://{}", cluster)
        } else {
            format!("https://{}.kusto.windows.net", cluster)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.database, self.cluster)
    }
}

/// Where a query is sent: a live cluster or a cache folder
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    Kusto(Target),
    Cache(CacheUri),
}

impl QueryTarget {
    /// Parses `database@cluster` or `cache://<folder>[/<selector>]`
    pub fn parse(s: &str) -> Result<Self, TargetError> {
        let trimmed = s.trim();
        let is_cache_uri = trimmed
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("cache://"));
        if is_cache_uri {
            return Ok(QueryTarget::Cache(resolve_pseudo_uri(trimmed)?));
        }
        Target::parse(trimmed)
            .map(QueryTarget::Kusto)
            .ok_or_else(|| TargetError::Invalid(s.to_string()))
    }
}

/// A query as handed over by the command front-end
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// KQL text, or an entry file name when the target is a cache folder
    pub query: String,
    pub target: QueryTarget,
    pub properties: QueryProperties,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, target: QueryTarget) -> Self {
        Self {
            query: query.into(),
            target,
            properties: QueryProperties::new(),
        }
    }

    /// Adds a request property
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// Parses a `name=value` property argument
///
/// The value is read as JSON when it parses (`100`, `true`, `"x"`), otherwise
/// it is kept as a plain string.
pub fn parse_property_arg(s: &str) -> Option<(String, Value)> {
    let (name, value) = s.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Some((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_parse() {
        let target = Target::parse("db1@cluster1").unwrap();
        assert_eq!(target.database, "db1");
        assert_eq!(target.cluster, "cluster1");
        assert_eq!(target.to_string(), "db1@cluster1");
    }

    #[test]
    fn test_target_parse_rejects_incomplete() {
        assert!(Target::parse("db1").is_none());
        assert!(Target::parse("@cluster1").is_none());
        assert!(Target::parse("db1@").is_none());
    }

    #[test]
    fn test_cluster_url_expansion() {
        assert_eq!(
            Target::new("db", "help").cluster_url(),
            "https://help.kusto.windows.net"
        );
        assert_eq!(
            Target::new("db", "mycluster.westus.kusto.windows.net").cluster_url(),
            "https://mycluster.westus.kusto.windows.net"
        );
        assert_eq!(
            Target::new("db", "http://localhost:8080/").cluster_url(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_cluster_name_strips_scheme() {
        let target = Target::new("db", "https://help.kusto.windows.net/");
        assert_eq!(target.cluster_name(), "help.kusto.windows.net");
    }

    #[test]
    fn test_query_target_parse_kusto() {
        let target = QueryTarget::parse("db1@cluster1").unwrap();
        assert_eq!(target, QueryTarget::Kusto(Target::new("db1", "cluster1")));
    }

    #[test]
    fn test_query_target_parse_cache_uri() {
        let target = QueryTarget::parse("CACHE://c1/mytable").unwrap();
        match target {
            QueryTarget::Cache(uri) => {
                assert_eq!(uri.folder, "c1");
                assert_eq!(uri.selector.as_deref(), Some("mytable"));
            }
            other => panic!("expected cache target, got {:?}", other),
        }
    }

    #[test]
    fn test_query_target_parse_invalid() {
        assert!(matches!(
            QueryTarget::parse("not-a-target"),
            Err(TargetError::Invalid(_))
        ));
        assert!(matches!(
            QueryTarget::parse("cache://"),
            Err(TargetError::Uri(CacheError::InvalidUri { .. }))
        ));
    }

    #[test]
    fn test_parse_property_arg() {
        assert_eq!(
            parse_property_arg("query_take_max_records=100"),
            Some(("query_take_max_records".to_string(), json!(100)))
        );
        assert_eq!(
            parse_property_arg("query_datascope=hotcache"),
            Some(("query_datascope".to_string(), json!("hotcache")))
        );
        assert_eq!(
            parse_property_arg("notruncation=true"),
            Some(("notruncation".to_string(), json!(true)))
        );
        assert!(parse_property_arg("novalue").is_none());
        assert!(parse_property_arg("=1").is_none());
    }

    #[test]
    fn test_request_with_property() {
        let request = QueryRequest::new("T", QueryTarget::Kusto(Target::new("db", "c")))
            .with_property("servertimeout", json!("00:05:00"));
        assert_eq!(request.properties.len(), 1);
    }
}
