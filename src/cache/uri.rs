//! `cache://` pseudo-URIs
//!
//! A pseudo-URI addresses a cache folder through the same target syntax as a
//! live cluster, so recorded results can be queried directly:
//!
//! ```text
//! cache://<folder>
//! cache://<folder>/<selector>
//! cache://folder='<folder>'
//! ```

use super::CacheError;

const SCHEME: &str = "cache://";

/// A parsed `cache://` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUri {
    /// Cache folder name, resolved under the cache root
    pub folder: String,
    /// Optional entry selector (database, table or file name fragment)
    pub selector: Option<String>,
}

/// Parses a `cache://<folder>[/<selector>]` address
///
/// # Returns
/// * `Ok(CacheUri)` with the folder and optional selector
/// * `Err(CacheError::InvalidUri)` if the scheme is missing or a part is malformed
pub fn resolve_pseudo_uri(uri: &str) -> Result<CacheUri, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = uri.trim();
    let rest = match trimmed.get(..SCHEME.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => &trimmed[SCHEME.len()..],
        _ => return Err(invalid("expected scheme 'cache://'")),
    };
    let rest = rest.trim_end_matches('/');

    let (folder, selector) = match strip_folder_key(rest) {
        Some(value) => (unquote(value).ok_or_else(|| invalid("unterminated quote"))?, None),
        None => match rest.split_once('/') {
            Some((folder, selector)) => (folder, Some(selector)),
            None => (rest, None),
        },
    };

    let folder = folder.trim();
    if folder.is_empty() {
        return Err(invalid("folder name is empty"));
    }
    if !folder.split('/').all(is_valid_segment) {
        return Err(invalid("folder name contains an empty, '.' or '..' segment"));
    }

    let selector = match selector.map(str::trim) {
        None | Some("") => None,
        Some(selector) => {
            if !selector.split('/').all(is_valid_segment) {
                return Err(invalid("selector contains an empty, '.' or '..' segment"));
            }
            Some(selector.to_string())
        }
    };

    Ok(CacheUri {
        folder: folder.to_string(),
        selector,
    })
}

/// Returns the value of a `folder=<value>` connection-string body
fn strip_folder_key(rest: &str) -> Option<&str> {
    let (key, value) = rest.split_once('=')?;
    key.trim().eq_ignore_ascii_case("folder").then_some(value.trim())
}

fn unquote(value: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if let Some(inner) = value.strip_prefix(quote) {
            return inner.strip_suffix(quote);
        }
    }
    Some(value)
}

fn is_valid_segment(segment: &str) -> bool {
    let segment = segment.trim();
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_only() {
        let uri = resolve_pseudo_uri("cache://c1").unwrap();
        assert_eq!(uri.folder, "c1");
        assert!(uri.selector.is_none());
    }

    #[test]
    fn test_folder_with_selector() {
        let uri = resolve_pseudo_uri("cache://c1/mytable").unwrap();
        assert_eq!(uri.folder, "c1");
        assert_eq!(uri.selector.as_deref(), Some("mytable"));
    }

    #[test]
    fn test_not_a_cache_uri() {
        let result = resolve_pseudo_uri("not-a-cache-uri");
        assert!(matches!(result, Err(CacheError::InvalidUri { .. })));
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let uri = resolve_pseudo_uri("cache://c1/").unwrap();
        assert_eq!(uri.folder, "c1");
        assert!(uri.selector.is_none());
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let uri = resolve_pseudo_uri("  Cache://c1/db1  ").unwrap();
        assert_eq!(uri.folder, "c1");
        assert_eq!(uri.selector.as_deref(), Some("db1"));
    }

    #[test]
    fn test_multi_segment_selector() {
        let uri = resolve_pseudo_uri("cache://c1/cluster1/db1").unwrap();
        assert_eq!(uri.selector.as_deref(), Some("cluster1/db1"));
    }

    #[test]
    fn test_connection_string_form() {
        let uri = resolve_pseudo_uri("cache://folder='c1'").unwrap();
        assert_eq!(uri.folder, "c1");
        assert!(uri.selector.is_none());

        let uri = resolve_pseudo_uri("cache://Folder=\"my cache\"").unwrap();
        assert_eq!(uri.folder, "my cache");

        let uri = resolve_pseudo_uri("cache://folder='team/c1'").unwrap();
        assert_eq!(uri.folder, "team/c1");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "cache://",
            "cache:///sel",
            "cache://../etc",
            "cache://./x",
            "cache://c1/../x",
            "cache://c1//x",
            "cache://folder='c1",
            "cache://folder='../x'",
            "cache://folder='x/..'",
            "cache://folder=\"/abs\"",
            "http://c1",
            "cache:/c1",
        ] {
            assert!(
                matches!(resolve_pseudo_uri(bad), Err(CacheError::InvalidUri { .. })),
                "expected InvalidUri for {:?}",
                bad
            );
        }
    }
}
