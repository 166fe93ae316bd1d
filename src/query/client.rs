//! Kusto REST query client
//!
//! This module provides the `QueryClient` seam the cache sits in front of, and
//! a `reqwest` implementation that posts KQL to a cluster's query endpoint.

use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::response::{EndpointVersion, QueryResponse, ResponseError};
use super::{QueryProperties, Target};

/// Value of the `x-ms-app` header sent with every request
const APP_NAME: &str = "kqlcache";

/// Errors that can occur when executing a query
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Failed to parse the response body
    #[error(transparent)]
    ParseError(#[from] ResponseError),

    /// The service answered with a non-success status
    #[error("Query failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Executes queries against a live data source
#[allow(async_fn_in_trait)]
pub trait QueryClient {
    /// Runs `query` against `target` and returns the parsed response
    async fn execute(
        &self,
        target: &Target,
        query: &str,
        properties: &QueryProperties,
    ) -> Result<QueryResponse, ClientError>;
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    db: &'a str,
    csl: &'a str,
    properties: RequestProperties<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestProperties<'a> {
    options: &'a QueryProperties,
}

/// Client for Kusto's `/v1/rest/query` and `/v2/rest/query` endpoints
#[derive(Debug, Clone)]
pub struct KustoClient {
    client: Client,
    token: Option<String>,
    endpoint_version: EndpointVersion,
}

impl Default for KustoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KustoClient {
    /// Create a new KustoClient using the v1 endpoint and no credentials
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            token: None,
            endpoint_version: EndpointVersion::V1,
        }
    }

    /// Create a new KustoClient with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            ..Self::new()
        }
    }

    /// Sends `Authorization: Bearer <token>` with every request
    ///
    /// Acquiring the token is up to the caller.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_endpoint_version(mut self, version: EndpointVersion) -> Self {
        self.endpoint_version = version;
        self
    }

    /// Full URL of the query endpoint for a target
    pub fn query_url(&self, target: &Target) -> String {
        format!(
            "{}/{}",
            target.cluster_url(),
            self.endpoint_version.query_path()
        )
    }
}

impl QueryClient for KustoClient {
    async fn execute(
        &self,
        target: &Target,
        query: &str,
        properties: &QueryProperties,
    ) -> Result<QueryResponse, ClientError> {
        let url = self.query_url(target);
        let body = QueryBody {
            db: &target.database,
            csl: query,
            properties: RequestProperties {
                options: properties,
            },
        };

        debug!(%url, database = %target.database, "executing live query");
        let mut request = self
            .client
            .post(&url)
            .header("x-ms-app", APP_NAME)
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status { status, body: text });
        }

        Ok(match self.endpoint_version {
            EndpointVersion::V1 => QueryResponse::from_v1_json(&text)?,
            EndpointVersion::V2 => QueryResponse::from_v2_json(&text)?,
        })
    }
}
