//! Type URI grammar.
//!
//! Types are addressable as `/<file>#/<Name>`, where the file part may span
//! several path segments (`/energy/limits#/ExternalLimits`). The fragment is
//! a JSON pointer from the type file's document root.

use std::sync::OnceLock;

use regex::Regex;

/// Allowed format of a type URI: `/type_file#/TypeName`.
pub const TYPE_URI_PATTERN: &str = r"^((?:/[A-Za-z0-9_-]+)+#/[A-Za-z0-9_-]+)$";

fn type_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TYPE_URI_PATTERN).expect("type URI pattern is valid"))
}

/// Returns true if `value` is a well-formed type URI.
pub fn is_type_uri(value: &str) -> bool {
    type_uri_regex().is_match(value)
}

/// Splits a well-formed type URI into its file part (`/energy/limits`) and
/// type name (`ExternalLimits`). Returns `None` for malformed input.
pub fn split_type_uri(value: &str) -> Option<(&str, &str)> {
    if !is_type_uri(value) {
        return None;
    }
    let (file, fragment) = value.split_once("#/")?;
    Some((file, fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_single_segment_uri() {
        assert!(is_type_uri("/test_type#/SomeType"));
    }

    #[test]
    fn accepts_nested_file_path() {
        assert!(is_type_uri("/energy/limits#/ExternalLimits"));
    }

    #[test]
    fn rejects_missing_fragment() {
        assert!(!is_type_uri("/test_type"));
        assert!(!is_type_uri("/test_type#"));
    }

    #[test]
    fn rejects_relative_and_nested_pointers() {
        assert!(!is_type_uri("test_type#/SomeType"));
        assert!(!is_type_uri("/test_type#/a/b"));
        assert!(!is_type_uri("http://example.com/schema#/Type"));
    }

    #[test]
    fn splits_into_file_and_name() {
        assert_eq!(
            split_type_uri("/energy/limits#/ExternalLimits"),
            Some(("/energy/limits", "ExternalLimits"))
        );
        assert_eq!(split_type_uri("not-a-uri"), None);
    }
}
