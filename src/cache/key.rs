//! Cache key fingerprinting
//!
//! A `CacheKey` identifies a request by its normalized query text, its target
//! database/cluster and the subset of request properties that can change the
//! result. Keys are stable across processes and across property orderings.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::CacheError;
use crate::query::{QueryProperties, Target};

/// Prefix mixed into every digest; bump when the key material changes
const KEY_VERSION: &str = "kqlcache-key-v1";

/// Longest slug embedded in an entry file name
const MAX_SLUG_LEN: usize = 80;

/// Request properties that participate in the fingerprint
///
/// Names are in normalized form (lower-case, no `_` or `-`). Properties that
/// only affect transport (timeouts, client request ids, the service-side
/// results cache age) are not listed, so two requests differing only in those
/// share an entry. Cursor properties change which rows come back.
///
/// The REST endpoint version is not part of the key either: a response
/// recorded through `/v1` is replayed for a `/v2` request and vice versa. The
/// entry keeps the `endpoint_version` it was recorded with.
pub const KEYED_PROPERTIES: &[&str] = &[
    "querydatascope",
    "querydatetimescopecolumn",
    "querydatetimescopefrom",
    "querydatetimescopeto",
    "querylanguage",
    "querynow",
    "querytakemaxrecords",
    "truncationmaxrecords",
    "truncationmaxsize",
    "notruncation",
    "querycursorafterdefault",
    "querycursorbeforeoratdefault",
    "querycursorcurrent",
    "querycursordisabled",
    "querycursorscopedtables",
];

/// Deterministic identity of a query request
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    fingerprint: String,
    slug: String,
    query: String,
    target: Target,
    properties: BTreeMap<String, Value>,
}

impl CacheKey {
    /// Hex-encoded SHA-256 digest of the key material
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Human-readable `<database>_at_<cluster>` fragment, filesystem safe
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// The normalized query text the key was computed from
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The keyed properties, by normalized name
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// File name of the entry for this key
    pub fn file_name(&self) -> String {
        format!("{}__{}.json", self.slug, self.fingerprint)
    }

    /// Suffix shared by every file holding this key, whatever its slug
    pub(crate) fn file_suffix(&self) -> String {
        format!("__{}.json", self.fingerprint)
    }
}

/// Computes the cache key for a request
///
/// # Arguments
/// * `query` - Raw query text, normalized before hashing
/// * `target` - Database and cluster the query runs against
/// * `properties` - Request properties; only `KEYED_PROPERTIES` are used
///
/// # Returns
/// * `Ok(CacheKey)` for a well-formed request
/// * `Err(CacheError::InvalidRequest)` if the query or target is empty
pub fn compute_key(
    query: &str,
    target: &Target,
    properties: &QueryProperties,
) -> Result<CacheKey, CacheError> {
    let query = normalize_query(query);
    if query.is_empty() {
        return Err(CacheError::InvalidRequest("query text is empty".to_string()));
    }

    let database = target.database.trim().to_lowercase();
    let cluster = target.cluster_name().to_lowercase();
    if database.is_empty() || cluster.is_empty() {
        return Err(CacheError::InvalidRequest(format!(
            "target '{}' must name both a database and a cluster",
            target
        )));
    }

    let properties = keyed_properties(properties);
    // BTreeMap and serde_json's default object map both serialize sorted
    let properties_json = serde_json::to_string(&properties)
        .map_err(|e| CacheError::InvalidRequest(format!("unserializable properties: {}", e)))?;

    let mut hasher = Sha256::new();
    for part in [
        KEY_VERSION,
        query.as_str(),
        database.as_str(),
        cluster.as_str(),
        properties_json.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let fingerprint = hex::encode(hasher.finalize());

    Ok(CacheKey {
        fingerprint,
        slug: slugify(&format!("{}_at_{}", database, cluster)),
        query,
        target: target.clone(),
        properties,
    })
}

/// Normalizes KQL text so that formatting and comments do not affect the key
///
/// Carriage returns are removed, tabs become spaces, `//` comments outside
/// string literals are dropped, and the remaining non-empty lines are trimmed
/// and joined with a single space. Literal contents are kept as written.
pub fn normalize_query(query: &str) -> String {
    query
        .split('\n')
        .map(|line| line.replace('\r', "").replace('\t', " "))
        .filter_map(|line| {
            let line = line.trim();
            let line = match comment_start(line) {
                Some(idx) => line[..idx].trim_end(),
                None => line,
            };
            (!line.is_empty()).then(|| line.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Byte offset of the first `//` that is not inside a string literal
///
/// Handles `"..."` and `'...'` with backslash escapes, and verbatim `@"..."`
/// literals where the quote is doubled instead. `h"..."` is an ordinary
/// literal with a prefix.
fn comment_start(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    // (quote byte, verbatim)
    let mut literal: Option<(u8, bool)> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match literal {
            Some((quote, verbatim)) => {
                if !verbatim && b == b'\\' {
                    i += 1;
                } else if b == quote {
                    literal = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    let verbatim = i > 0 && bytes[i - 1] == b'@';
                    literal = Some((b, verbatim));
                } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

/// Normalizes a property name: lower-case, `_` and `-` removed
pub fn normalize_property_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn keyed_properties(properties: &QueryProperties) -> BTreeMap<String, Value> {
    properties
        .iter()
        .map(|(name, value)| (normalize_property_name(name), value))
        .filter(|(name, _)| KEYED_PROPERTIES.contains(&name.as_str()))
        .map(|(name, value)| (name, value.clone()))
        .collect()
}

/// Reduces arbitrary text to `[A-Za-z0-9._-]`, for use in file names
pub(crate) fn slugify(text: &str) -> String {
    let slug: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = slug.trim_start_matches('.');
    if slug.is_empty() {
        "query".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> Target {
        Target::new("db1", "cluster1")
    }

    fn props(pairs: &[(&str, Value)]) -> QueryProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_same_request_same_key() {
        let a = compute_key("T | count", &target(), &QueryProperties::new()).unwrap();
        let b = compute_key("T | count", &target(), &QueryProperties::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_property_order_does_not_matter() {
        let forward = props(&[
            ("query_take_max_records", json!(100)),
            ("query_datascope", json!("all")),
            ("truncation_max_size", json!(1024)),
        ]);
        let backward = props(&[
            ("truncation_max_size", json!(1024)),
            ("query_datascope", json!("all")),
            ("query_take_max_records", json!(100)),
        ]);

        let a = compute_key("T | take 5", &target(), &forward).unwrap();
        let b = compute_key("T | take 5", &target(), &backward).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_nested_property_values_are_order_independent() {
        let a = props(&[("query_cursor_scoped_tables", json!({"a": 1, "b": 2}))]);
        let b: QueryProperties = serde_json::from_str(
            r#"{"query_cursor_scoped_tables": {"b": 2, "a": 1}}"#,
        )
        .unwrap();

        let ka = compute_key("T", &target(), &a).unwrap();
        let kb = compute_key("T", &target(), &b).unwrap();
        assert_eq!(ka.fingerprint(), kb.fingerprint());
    }

    #[test]
    fn test_property_name_spelling_is_normalized() {
        let a = props(&[("query_datascope", json!("hotcache"))]);
        let b = props(&[("QueryDataScope", json!("hotcache"))]);
        let c = props(&[("query-datascope", json!("hotcache"))]);

        let ka = compute_key("T", &target(), &a).unwrap();
        assert_eq!(ka, compute_key("T", &target(), &b).unwrap());
        assert_eq!(ka, compute_key("T", &target(), &c).unwrap());
    }

    #[test]
    fn test_included_property_changes_key() {
        let base = compute_key("T", &target(), &QueryProperties::new()).unwrap();
        let with_cursor = compute_key(
            "T",
            &target(),
            &props(&[("query_cursor_after_default", json!("636789"))]),
        )
        .unwrap();
        assert_ne!(base.fingerprint(), with_cursor.fingerprint());
    }

    #[test]
    fn test_excluded_property_does_not_change_key() {
        let base = compute_key("T", &target(), &QueryProperties::new()).unwrap();
        let with_timeout = compute_key(
            "T",
            &target(),
            &props(&[
                ("servertimeout", json!("00:10:00")),
                ("query_results_cache_max_age", json!("1h")),
            ]),
        )
        .unwrap();
        assert_eq!(base, with_timeout);
    }

    #[test]
    fn test_target_changes_key() {
        let a = compute_key("T", &Target::new("db1", "cluster1"), &QueryProperties::new()).unwrap();
        let b = compute_key("T", &Target::new("db2", "cluster1"), &QueryProperties::new()).unwrap();
        let c = compute_key("T", &Target::new("db1", "cluster2"), &QueryProperties::new()).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(b.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_target_case_does_not_change_key() {
        let a = compute_key("T", &Target::new("DB1", "Cluster1"), &QueryProperties::new()).unwrap();
        let b = compute_key("T", &Target::new("db1", "cluster1"), &QueryProperties::new()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_distinct_queries_do_not_collide() {
        let corpus = [
            "T | count",
            "T | take 10",
            "T | take 100",
            "T | where x > 1",
            "T | where x > 10",
            "T | summarize count() by bin(Timestamp, 1h)",
            "T | summarize count() by bin(Timestamp, 1d)",
            "StormEvents | count",
            "StormEvents | project State",
            "print 1",
            "print 2",
            "range x from 1 to 10 step 1",
            ".show tables",
            ".show databases",
            "let n = 5; T | take n",
        ];

        let mut fingerprints: Vec<String> = corpus
            .iter()
            .map(|q| {
                compute_key(q, &target(), &QueryProperties::new())
                    .unwrap()
                    .fingerprint()
                    .to_string()
            })
            .collect();
        fingerprints.sort();
        fingerprints.dedup();
        assert_eq!(fingerprints.len(), corpus.len());
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let result = compute_key("", &target(), &QueryProperties::new());
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));

        let result = compute_key("  \n// only a comment\n\t", &target(), &QueryProperties::new());
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_empty_target_is_rejected() {
        let result = compute_key("T", &Target::new("", "cluster1"), &QueryProperties::new());
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_normalize_query_strips_comments_and_whitespace() {
        let raw = "// header comment\r\n  T\t| where x > 1 // filter\r\n\n  | count  ";
        assert_eq!(normalize_query(raw), "T | where x > 1 | count");
    }

    #[test]
    fn test_comment_markers_inside_literals_are_kept() {
        assert_eq!(
            normalize_query("T | where Url == \"https://x\" // note"),
            "T | where Url == \"https://x\""
        );
        assert_eq!(
            normalize_query("T | where Path == 'a //b'"),
            "T | where Path == 'a //b'"
        );
        assert_eq!(
            normalize_query("T | where Path == @\"C:\\\" //d\""),
            "T | where Path == @\"C:\\\""
        );
        assert_eq!(
            normalize_query("T | where Path == \"a\\\" //b\""),
            "T | where Path == \"a\\\" //b\""
        );
    }

    #[test]
    fn test_literals_differing_after_comment_marker_get_distinct_keys() {
        let a = compute_key("T | where Path == \"a //b\"", &target(), &QueryProperties::new())
            .unwrap();
        let b = compute_key("T | where Path == \"a //c\"", &target(), &QueryProperties::new())
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());

        let a = compute_key("T | where Path == h'a //b'", &target(), &QueryProperties::new())
            .unwrap();
        let b = compute_key("T | where Path == h'a //c'", &target(), &QueryProperties::new())
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_formatting_does_not_change_key() {
        let a = compute_key("T | count", &target(), &QueryProperties::new()).unwrap();
        let b = compute_key("  T | count  \r\n// trailing note", &target(), &QueryProperties::new())
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_file_name_embeds_slug_and_fingerprint() {
        let key = compute_key("T | count", &target(), &QueryProperties::new()).unwrap();
        assert_eq!(key.slug(), "db1_at_cluster1");
        assert_eq!(
            key.file_name(),
            format!("db1_at_cluster1__{}.json", key.fingerprint())
        );
        assert!(key.file_name().ends_with(&key.file_suffix()));
    }

    #[test]
    fn test_slug_uses_cluster_host() {
        let key = compute_key(
            "T",
            &Target::new("Samples", "https://help.kusto.windows.net/"),
            &QueryProperties::new(),
        )
        .unwrap();
        assert_eq!(key.slug(), "samples_at_help.kusto.windows.net");
    }

    #[test]
    fn test_slugify_replaces_unsafe_characters() {
        assert_eq!(slugify("my db/at:cluster"), "my_db_at_cluster");
        assert_eq!(slugify("..hidden"), "hidden");
        assert_eq!(slugify(""), "query");
        assert_eq!(slugify(&"x".repeat(200)).len(), MAX_SLUG_LEN);
    }
}
