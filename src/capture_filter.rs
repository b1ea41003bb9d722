//! Decide whether a captured exchange is genuine JSON API traffic worth
//! keeping.

use url::Url;

/// Content types treated as JSON API traffic.
const ALLOWED_CONTENT_TYPES: &[&str] = &["application/json", "application/vnd.api+json", "text/json"];

/// Analytics, ads, monitoring, and customer-engagement domains that are
/// never genuine application API traffic, even when they return JSON.
const BLOCKED_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "segment.io",
    "mixpanel.com",
    "amplitude.com",
    "hotjar.com",
    "fullstory.com",
    "sentry.io",
    "bugsnag.com",
    "intercom.io",
    "zendesk.com",
    "drift.com",
    "datadoghq.com",
    "newrelic.com",
];

/// Noise paths that are never useful endpoints even when well-formed.
const NOISE_PATHS: &[&str] = &["/monitoring", "/telemetry", "/track", "/manifest.json"];

/// Inputs to the capture decision.
pub struct CaptureCandidate<'a> {
    pub url: &'a str,
    pub status: u16,
    pub content_type: Option<&'a str>,
}

/// Whether a captured exchange should be retained as a candidate API
/// endpoint.
pub fn should_capture(candidate: &CaptureCandidate<'_>) -> bool {
    if !(200..300).contains(&candidate.status) {
        return false;
    }

    let Some(content_type) = candidate.content_type else {
        return false;
    };
    let first_token = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
    if !ALLOWED_CONTENT_TYPES.contains(&first_token.as_str()) {
        return false;
    }

    let Ok(url) = Url::parse(candidate.url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    if BLOCKED_DOMAINS.iter().any(|blocked| is_domain_match(host, blocked)) {
        return false;
    }

    let path = url.path();
    if NOISE_PATHS.contains(&path) || path.starts_with("/_next/static/") {
        return false;
    }

    true
}

/// Whether `host` equals `target` or is a subdomain of it (dot-suffix
/// match): `api.x.com` matches `x.com`, `evil-x.com` does not. A
/// leading `www.` is stripped from `target` before comparing.
pub fn is_domain_match(host: &str, target: &str) -> bool {
    let target = target.strip_prefix("www.").unwrap_or(target);
    let host = host.to_lowercase();
    let target = target.to_lowercase();

    host == target || host.ends_with(&format!(".{target}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate<'a>(url: &'a str, status: u16, content_type: Option<&'a str>) -> CaptureCandidate<'a> {
        CaptureCandidate { url, status, content_type }
    }

    #[test]
    fn accepts_json_in_2xx_range() {
        let c = candidate("https://api.example.com/items", 200, Some("application/json; charset=utf-8"));
        assert!(should_capture(&c));
    }

    #[test]
    fn rejects_non_2xx_status() {
        let c = candidate("https://api.example.com/items", 404, Some("application/json"));
        assert!(!should_capture(&c));
    }

    #[test]
    fn rejects_non_json_content_type() {
        let c = candidate("https://api.example.com/items", 200, Some("text/html"));
        assert!(!should_capture(&c));
    }

    #[test]
    fn rejects_blocked_analytics_domain() {
        let c = candidate("https://www.google-analytics.com/collect", 200, Some("application/json"));
        assert!(!should_capture(&c));
    }

    #[test]
    fn rejects_noise_path() {
        let c = candidate("https://api.example.com/telemetry", 200, Some("application/json"));
        assert!(!should_capture(&c));
        let c = candidate("https://api.example.com/_next/static/chunk.json", 200, Some("application/json"));
        assert!(!should_capture(&c));
    }

    #[test]
    fn domain_match_is_suffix_not_substring() {
        assert!(is_domain_match("api.x.com", "x.com"));
        assert!(is_domain_match("x.com", "www.x.com"));
        assert!(!is_domain_match("evil-x.com", "x.com"));
    }
}
