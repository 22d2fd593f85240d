//! Nested `include` query parameter expansion
//!
//! Resource endpoints accept `?include=author.comments,tags` to eagerly load
//! related data. Loading `author.comments` requires `author` first, so every
//! dotted path is expanded into all of its prefixes.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use tracing::debug;

/// Expand a comma separated include string into its prefix paths
///
/// An absent value behaves like an empty string. Empty segments produced by
/// leading, trailing or repeated commas are ignored.
pub fn parse_includes(raw: Option<&str>) -> Vec<String> {
    let raw = raw.unwrap_or("");
    expand_include_paths(raw.split(',').filter(|s| !s.is_empty()))
}

/// Expand already-split include specifiers into their prefix paths
///
/// `["a.b", "x"]` becomes `["a", "a.b", "x"]`. The result keeps the order in
/// which each path was first produced and contains no duplicates.
pub fn expand_include_paths<I, S>(specifiers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut parsed = Vec::new();

    for specifier in specifiers {
        let specifier = specifier.as_ref();
        if specifier.is_empty() {
            continue;
        }

        let mut segments = specifier.split('.');
        // split always yields at least one segment
        let mut part = segments.next().unwrap_or_default().to_string();
        push_unique(&mut parsed, &mut seen, &part);

        for segment in segments {
            part.push('.');
            part.push_str(segment);
            push_unique(&mut parsed, &mut seen, &part);
        }
    }

    parsed
}

fn push_unique(parsed: &mut Vec<String>, seen: &mut HashSet<String>, path: &str) {
    if seen.insert(path.to_string()) {
        parsed.push(path.to_string());
    }
}

/// Whether a query key names the include parameter (`include`, `include[]`,
/// `include[0]`, ...)
fn is_include_key(key: &str) -> bool {
    match key.strip_prefix("include") {
        Some("") => true,
        Some(rest) => rest.starts_with('[') && rest.ends_with(']'),
        None => false,
    }
}

/// Collect include specifiers from decoded query pairs
///
/// Every include key contributes; comma separated values are split, so
/// `include=a.b,c` and `include=a.b&include=c` are equivalent.
pub fn includes_from_query<'a, I>(pairs: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let specifiers = pairs
        .into_iter()
        .filter(|(key, _)| is_include_key(key))
        .flat_map(|(_, value)| value.split(','))
        .filter(|s| !s.is_empty());

    expand_include_paths(specifiers)
}

/// Extractor for the expanded `include` query parameter
///
/// Accepts a comma separated value, repeated keys, or both. A missing or
/// unparseable query string yields an empty list rather than rejecting the
/// request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Includes(pub Vec<String>);

impl Includes {
    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|p| p == path)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl<S> FromRequestParts<S> for Includes
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let pairs = match Query::<Vec<(String, String)>>::from_request_parts(parts, state).await {
            Ok(Query(pairs)) => pairs,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable query string");
                Vec::new()
            }
        };

        Ok(Includes(includes_from_query(
            pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_parse_includes_empty() {
        assert!(parse_includes(Some("")).is_empty());
        assert!(parse_includes(None).is_empty());
    }

    #[test]
    fn test_parse_includes_nested_path() {
        assert_eq!(parse_includes(Some("a.b.c")), vec!["a", "a.b", "a.b.c"]);
    }

    #[test]
    fn test_parse_includes_multiple_specifiers() {
        assert_eq!(
            parse_includes(Some("a.b,x.y.z")),
            vec!["a", "a.b", "x", "x.y", "x.y.z"]
        );
    }

    #[test]
    fn test_parse_includes_deduplicates() {
        assert_eq!(parse_includes(Some("a.b,a.b")), vec!["a", "a.b"]);
        assert_eq!(
            parse_includes(Some("author.comments,author,tags")),
            vec!["author", "author.comments", "tags"]
        );
    }

    #[test]
    fn test_parse_includes_ignores_empty_segments() {
        assert_eq!(parse_includes(Some(",a,,b,")), vec!["a", "b"]);
    }

    #[test]
    fn test_expand_include_paths_from_sequence() {
        let specifiers = vec!["user.profile".to_string(), String::new(), "tags".to_string()];
        assert_eq!(
            expand_include_paths(&specifiers),
            vec!["user", "user.profile", "tags"]
        );
    }

    #[tokio::test]
    async fn test_includes_extractor_reads_query() {
        let (mut parts, _) = Request::builder()
            .uri("/posts?include=author.comments,tags")
            .body(())
            .unwrap()
            .into_parts();

        let Includes(paths) = Includes::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(paths, vec!["author", "author.comments", "tags"]);
    }

    #[tokio::test]
    async fn test_includes_extractor_repeated_keys() {
        for uri in [
            "/posts?include=author.comments&include=tags",
            "/posts?include[]=author.comments&include[]=tags",
            "/posts?include%5B%5D=author.comments&include%5B%5D=tags",
            "/posts?include=author.comments,tags&include=author",
        ] {
            let (mut parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();

            let Includes(paths) = Includes::from_request_parts(&mut parts, &()).await.unwrap();
            assert_eq!(paths, vec!["author", "author.comments", "tags"], "{uri}");
        }
    }

    #[test]
    fn test_includes_from_query_ignores_other_keys() {
        let pairs = [
            ("include", "a.b"),
            ("included", "x"),
            ("page", "2"),
            ("include[1]", "c"),
        ];
        assert_eq!(includes_from_query(pairs), vec!["a", "a.b", "c"]);
    }

    #[tokio::test]
    async fn test_includes_extractor_missing_param() {
        let (mut parts, _) = Request::builder()
            .uri("/posts?page=2")
            .body(())
            .unwrap()
            .into_parts();

        let includes = Includes::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(includes, Includes::default());
        assert!(!includes.contains("author"));
    }
}
