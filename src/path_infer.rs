//! Path parameterization and pagination-style detection. Pure
//! string/slice manipulation, no I/O.

use std::sync::LazyLock;

use regex::Regex;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").expect("valid regex")
});
static LONG_DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{8,}").expect("valid regex"));

/// Replace path segments with parameter placeholders:
/// pure numeric or UUID → `:id`; a segment containing an 8+ digit run
/// → `:slug`; a segment with 12+ alphanumerics mixing letters and
/// digits (after stripping `-`/`_`) → `:hash`; otherwise unchanged.
/// Idempotent: `parameterize_path(parameterize_path(p)) == parameterize_path(p)`.
pub fn parameterize_path(path: &str) -> String {
    let segments: Vec<String> = path.split('/').map(classify_segment).collect();
    segments.join("/")
}

fn classify_segment(segment: &str) -> String {
    if segment.is_empty() || segment.starts_with(':') {
        return segment.to_string();
    }

    if segment.chars().all(|c| c.is_ascii_digit()) && !segment.is_empty() {
        return ":id".to_string();
    }

    if UUID_RE.is_match(segment) {
        return ":id".to_string();
    }

    // Checked before the hash rule: a long digit run (e.g. a Unix
    // timestamp suffix) should classify as :slug even when the segment
    // also has 12+ mixed alphanumerics.
    if LONG_DIGIT_RUN_RE.is_match(segment) {
        return ":slug".to_string();
    }

    let stripped: String = segment.chars().filter(|&c| c != '-' && c != '_').collect();
    let has_letter = stripped.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = stripped.chars().any(|c| c.is_ascii_digit());
    if stripped.chars().all(|c| c.is_ascii_alphanumeric()) && stripped.len() >= 12 && has_letter && has_digit {
        return ":hash".to_string();
    }

    segment.to_string()
}

static NEXT_DATA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/_next/data/[^/]+/").expect("valid regex"));

/// Strip a leading `/_next/data/<hash>/` and a trailing `.json`,
/// defaulting to `/` when nothing remains.
pub fn clean_framework_path(path: &str) -> String {
    let stripped = NEXT_DATA_RE.replace(path, "/");
    let stripped = stripped.strip_suffix(".json").unwrap_or(&stripped);
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

/// Which style of pagination a query-parameter set expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationKind {
    Offset,
    Cursor,
    Page,
}

/// Result of [`detect_pagination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationMatch {
    pub kind: PaginationKind,
    pub param_name: String,
    pub limit_param: Option<String>,
}

const OFFSET_NAMES: &[&str] = &["offset", "skip"];
const CURSOR_NAMES: &[&str] = &["cursor", "after", "before", "next_cursor", "starting_after"];
const PAGE_NAMES: &[&str] = &["page", "p", "page_number"];
const LIMIT_NAMES: &[&str] = &["limit", "per_page", "page_size", "count", "size"];

/// Inspect query-parameter names (case-insensitively) and classify the
/// pagination style. Offset takes precedence over cursor over page.
pub fn detect_pagination(query_params: &[String]) -> Option<PaginationMatch> {
    let lower: Vec<String> = query_params.iter().map(|p| p.to_lowercase()).collect();

    let find = |names: &[&str]| -> Option<String> {
        query_params
            .iter()
            .zip(lower.iter())
            .find(|(_, l)| names.contains(&l.as_str()))
            .map(|(original, _)| original.clone())
    };

    let limit_param = find(LIMIT_NAMES);

    if let Some(name) = find(OFFSET_NAMES) {
        return Some(PaginationMatch { kind: PaginationKind::Offset, param_name: name, limit_param });
    }
    if let Some(name) = find(CURSOR_NAMES) {
        return Some(PaginationMatch { kind: PaginationKind::Cursor, param_name: name, limit_param });
    }
    if let Some(name) = find(PAGE_NAMES) {
        return Some(PaginationMatch { kind: PaginationKind::Page, param_name: name, limit_param });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameterizes_numeric_and_uuid_segments() {
        assert_eq!(
            parameterize_path("/users/550e8400-e29b-41d4-a716-446655440000/posts/99"),
            "/users/:id/posts/:id"
        );
    }

    #[test]
    fn long_digit_run_takes_precedence_over_hash() {
        assert_eq!(parameterize_path("/prices/btc-updown-15m-1770254100"), "/prices/:slug");
    }

    #[test]
    fn mixed_alphanumeric_classifies_as_hash() {
        assert_eq!(parameterize_path("/files/a1b2c3d4e5f6g7h8"), "/files/:hash");
    }

    #[test]
    fn unrelated_segments_are_unchanged() {
        assert_eq!(parameterize_path("/api/v1/items"), "/api/v1/items");
    }

    #[test]
    fn parameterize_path_is_idempotent() {
        let once = parameterize_path("/users/550e8400-e29b-41d4-a716-446655440000/posts/99");
        let twice = parameterize_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_framework_path_strips_next_data_prefix_and_json_suffix() {
        assert_eq!(clean_framework_path("/_next/data/abc123/items.json"), "/items");
        assert_eq!(clean_framework_path("/_next/data/abc123/"), "/");
    }

    #[test]
    fn pagination_precedence_offset_over_cursor_over_page() {
        let params = vec!["page".to_string(), "cursor".to_string(), "offset".to_string()];
        let matched = detect_pagination(&params).unwrap();
        assert_eq!(matched.kind, PaginationKind::Offset);
    }

    #[test]
    fn pagination_captures_limit_param() {
        let params = vec!["cursor".to_string(), "per_page".to_string()];
        let matched = detect_pagination(&params).unwrap();
        assert_eq!(matched.kind, PaginationKind::Cursor);
        assert_eq!(matched.limit_param, Some("per_page".to_string()));
    }

    #[test]
    fn no_pagination_params_yields_none() {
        assert!(detect_pagination(&["q".to_string()]).is_none());
    }
}
