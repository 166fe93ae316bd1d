//! Tabular query responses
//!
//! Parses the two JSON layouts of Kusto's REST query endpoint into a single
//! `QueryResponse` shape. The same shape is persisted by the cache, so a
//! replayed response is indistinguishable from a live one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of the table holding the query's main result in v2 responses
const PRIMARY_RESULT_KIND: &str = "PrimaryResult";

/// Kind of the table carrying query properties such as the cursor
const QUERY_PROPERTIES_KIND: &str = "QueryProperties";

/// Name of the properties table in v1 responses
const EXTENDED_PROPERTIES_NAME: &str = "@ExtendedProperties";

/// Errors that can occur when parsing a response body
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Body is not valid JSON or does not match the expected layout
    #[error("Failed to parse query response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Body is JSON but neither a v1 object nor a v2 frame array
    #[error("Unrecognized query response layout: {0}")]
    UnrecognizedLayout(String),
}

/// REST endpoint version that produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointVersion {
    V1,
    V2,
}

impl EndpointVersion {
    /// Path of the query endpoint for this version
    pub fn query_path(&self) -> &'static str {
        match self {
            EndpointVersion::V1 => "v1/rest/query",
            EndpointVersion::V2 => "v2/rest/query",
        }
    }
}

/// A result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Kusto scalar type (`long`, `string`, `datetime`, ...)
    pub column_type: String,
}

/// One table of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub name: String,
    /// Table role (`PrimaryResult`, `QueryProperties`, ...) when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of the column with the given name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// A complete query response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub endpoint_version: EndpointVersion,
    pub tables: Vec<ResultTable>,
    /// Database cursor returned with the result, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl QueryResponse {
    /// Parses a response body, detecting the endpoint version from its layout
    pub fn from_json(body: &str) -> Result<Self, ResponseError> {
        let value: Value = serde_json::from_str(body)?;
        match value {
            Value::Object(_) => Self::from_v1_value(value),
            Value::Array(_) => Self::from_v2_value(value),
            other => Err(ResponseError::UnrecognizedLayout(type_name(&other).to_string())),
        }
    }

    /// Parses a v1 body: `{"Tables": [{"TableName", "Columns", "Rows"}]}`
    pub fn from_v1_json(body: &str) -> Result<Self, ResponseError> {
        Self::from_v1_value(serde_json::from_str(body)?)
    }

    /// Parses a v2 body: an array of frames, of which `DataTable` frames hold tables
    pub fn from_v2_json(body: &str) -> Result<Self, ResponseError> {
        Self::from_v2_value(serde_json::from_str(body)?)
    }

    fn from_v1_value(value: Value) -> Result<Self, ResponseError> {
        let raw: V1Response = serde_json::from_value(value)?;
        let mut tables: Vec<ResultTable> = raw.tables.into_iter().map(ResultTable::from).collect();
        apply_table_of_contents(&mut tables);

        let cursor = find_cursor(&tables);
        Ok(Self {
            endpoint_version: EndpointVersion::V1,
            tables,
            cursor,
        })
    }

    fn from_v2_value(value: Value) -> Result<Self, ResponseError> {
        let frames: Vec<Value> = serde_json::from_value(value)?;
        let mut tables = Vec::new();
        for frame in frames {
            if frame.get("FrameType").and_then(Value::as_str) != Some("DataTable") {
                continue;
            }
            let raw: V2Table = serde_json::from_value(frame)?;
            tables.push(ResultTable::from(raw));
        }

        let cursor = find_cursor(&tables);
        Ok(Self {
            endpoint_version: EndpointVersion::V2,
            tables,
            cursor,
        })
    }

    /// The table holding the query's main result
    pub fn primary_table(&self) -> Option<&ResultTable> {
        self.tables
            .iter()
            .find(|t| t.kind.as_deref() == Some(PRIMARY_RESULT_KIND))
            .or_else(|| self.tables.first())
    }

    /// First cell of the primary table, e.g. the result of `T | count`
    pub fn scalar(&self) -> Option<&Value> {
        self.primary_table()?.rows.first()?.first()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct V1Response {
    tables: Vec<V1Table>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct V1Table {
    table_name: String,
    columns: Vec<RawColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct V2Table {
    table_name: String,
    #[serde(default)]
    table_kind: Option<String>,
    columns: Vec<RawColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawColumn {
    column_name: String,
    #[serde(default)]
    column_type: Option<String>,
    #[serde(default)]
    data_type: Option<String>,
}

impl From<RawColumn> for Column {
    fn from(raw: RawColumn) -> Self {
        Column {
            name: raw.column_name,
            column_type: raw
                .column_type
                .or(raw.data_type)
                .unwrap_or_else(|| "dynamic".to_string())
                .to_lowercase(),
        }
    }
}

impl From<V1Table> for ResultTable {
    fn from(raw: V1Table) -> Self {
        ResultTable {
            name: raw.table_name,
            kind: None,
            columns: raw.columns.into_iter().map(Column::from).collect(),
            rows: raw.rows,
        }
    }
}

impl From<V2Table> for ResultTable {
    fn from(raw: V2Table) -> Self {
        ResultTable {
            name: raw.table_name,
            kind: raw.table_kind,
            columns: raw.columns.into_iter().map(Column::from).collect(),
            rows: raw.rows,
        }
    }
}

/// Names and kinds v1 tables from the trailing table of contents, if present
///
/// A v1 response with more than one table ends with a table whose rows are
/// `(Ordinal, Kind, Name, Id, PrettyName)`, one per preceding table.
fn apply_table_of_contents(tables: &mut [ResultTable]) {
    let Some((toc, rest)) = tables.split_last_mut() else {
        return;
    };
    if rest.is_empty() {
        return;
    }
    let (Some(ordinal), Some(kind), Some(name)) = (
        toc.column_index("Ordinal"),
        toc.column_index("Kind"),
        toc.column_index("Name"),
    ) else {
        return;
    };

    for row in &toc.rows {
        let Some(index) = row.get(ordinal).and_then(Value::as_u64) else {
            continue;
        };
        let Some(table) = rest.get_mut(index as usize) else {
            continue;
        };
        if let Some(k) = row.get(kind).and_then(Value::as_str) {
            table.kind = Some(k.to_string());
        }
        if let Some(n) = row.get(name).and_then(Value::as_str) {
            table.name = n.to_string();
        }
    }
    toc.kind = Some("TableOfContents".to_string());
}

/// Extracts the `Cursor` value from the query properties table
fn find_cursor(tables: &[ResultTable]) -> Option<String> {
    let table = tables.iter().find(|t| {
        t.kind.as_deref() == Some(QUERY_PROPERTIES_KIND) || t.name == EXTENDED_PROPERTIES_NAME
    })?;
    let key_idx = table.column_index("Key")?;
    let value_idx = table.column_index("Value")?;

    let row = table
        .rows
        .iter()
        .find(|row| row.get(key_idx).and_then(Value::as_str) == Some("Cursor"))?;

    match row.get(value_idx)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("Cursor").and_then(Value::as_str).map(str::to_string),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
