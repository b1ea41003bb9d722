//! SSRF classification of URLs and resolved hostnames, and the
//! one-hop redirect policy.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

/// Verdict from [`validate`] or [`resolve_and_validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub safe: bool,
    pub reason: Option<String>,
}

impl Verdict {
    fn safe() -> Self {
        Self {
            safe: true,
            reason: None,
        }
    }

    fn unsafe_(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
        }
    }
}

/// Verdict from [`resolve_and_validate`], including DNS-resolution detail.
#[derive(Debug, Clone)]
pub struct ResolvedVerdict {
    pub safe: bool,
    pub reason: Option<String>,
    pub original_host: String,
    /// `None` when the URL was already unsafe on syntax alone (DNS
    /// resolution was never attempted).
    pub resolved_ip: Option<IpAddr>,
    /// Diagnostic only, callers must still fetch using the original
    /// hostname so that TLS SNI and virtual hosting work.
    pub resolved_url: Option<String>,
}

/// Classify a URL string without touching the network.
///
/// Unsafe when: scheme is not `http`/`https`; host is `localhost`; host
/// ends in `.local` or `.internal`; host is the IPv6 loopback or an
/// IPv4-mapped loopback; an IPv4 host falls in a private/loopback/
/// link-local/unspecified range; an IPv6 host is unique-local or
/// link-local.
pub fn validate(url_str: &str) -> Verdict {
    let url = match Url::parse(url_str) {
        Ok(url) => url,
        Err(err) => return Verdict::unsafe_(format!("unparseable URL: {err}")),
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return Verdict::unsafe_(format!("scheme '{}' is not http/https", url.scheme()));
    }

    let host = match url.host_str() {
        Some(host) => host,
        None => return Verdict::unsafe_("URL has no host"),
    };

    classify_host(host)
}

/// Classify a bare hostname or IP literal string.
fn classify_host(host: &str) -> Verdict {
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if bare.eq_ignore_ascii_case("localhost") {
        return Verdict::unsafe_("host is localhost");
    }
    if bare.ends_with(".local") || bare.ends_with(".internal") {
        return Verdict::unsafe_("host is in a reserved local TLD");
    }

    if let Ok(ip) = bare.parse::<IpAddr>() {
        return classify_ip(ip);
    }

    Verdict::safe()
}

/// Classify a resolved or literal IP address against the enumerated
/// private/loopback/link-local ranges.
fn classify_ip(ip: IpAddr) -> Verdict {
    match ip {
        IpAddr::V4(v4) => classify_ipv4(v4),
        IpAddr::V6(v6) => classify_ipv6(v6),
    }
}

fn classify_ipv4(ip: Ipv4Addr) -> Verdict {
    let octets = ip.octets();
    let unsafe_ranges: [(&str, bool); 6] = [
        ("127/8 (loopback)", octets[0] == 127),
        ("10/8 (private)", octets[0] == 10),
        (
            "172.16/12 (private)",
            octets[0] == 172 && (16..=31).contains(&octets[1]),
        ),
        ("192.168/16 (private)", octets[0] == 192 && octets[1] == 168),
        ("169.254/16 (link-local)", octets[0] == 169 && octets[1] == 254),
        ("0/8 (this network)", octets[0] == 0),
    ];

    for (reason, matched) in unsafe_ranges {
        if matched {
            return Verdict::unsafe_(format!("IPv4 address is in {reason}"));
        }
    }

    Verdict::safe()
}

fn classify_ipv6(ip: Ipv6Addr) -> Verdict {
    if ip.is_loopback() {
        return Verdict::unsafe_("IPv6 address is the loopback address");
    }

    // IPv4-mapped loopback (::ffff:127.0.0.1).
    if let Some(v4) = ip.to_ipv4_mapped() {
        return classify_ipv4(v4);
    }

    let segments = ip.segments();
    // fc00::/7 unique-local: top 7 bits are 1111 110.
    if (segments[0] & 0xfe00) == 0xfc00 {
        return Verdict::unsafe_("IPv6 address is in fc00::/7 (unique-local)");
    }
    // fe80::/10 link-local: top 10 bits are 1111 1110 10.
    if (segments[0] & 0xffc0) == 0xfe80 {
        return Verdict::unsafe_("IPv6 address is in fe80::/10 (link-local)");
    }

    Verdict::safe()
}

/// Resolve `url`'s host via DNS and classify both the hostname and the
/// resolved address. The security guarantee: no fetch should proceed
/// unless `safe` is true here.
pub async fn resolve_and_validate(url_str: &str) -> ResolvedVerdict {
    let syntax_verdict = validate(url_str);

    let url = match Url::parse(url_str) {
        Ok(url) => url,
        Err(_) => {
            return ResolvedVerdict {
                safe: false,
                reason: syntax_verdict.reason,
                original_host: String::new(),
                resolved_ip: None,
                resolved_url: None,
            };
        }
    };
    let host = url.host_str().unwrap_or_default().to_string();

    if !syntax_verdict.safe {
        return ResolvedVerdict {
            safe: false,
            reason: syntax_verdict.reason,
            original_host: host,
            resolved_ip: None,
            resolved_url: None,
        };
    }

    // An IP literal needs no DNS lookup; it was already classified.
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return ResolvedVerdict {
            safe: true,
            reason: None,
            original_host: host.clone(),
            resolved_ip: Some(ip),
            resolved_url: Some(url_str.to_string()),
        };
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let lookup_target = format!("{host}:{port}");

    let resolved_ip = match tokio::net::lookup_host(&lookup_target).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
        Err(err) => {
            return ResolvedVerdict {
                safe: false,
                reason: Some(format!("DNS resolution failed: {err}")),
                original_host: host,
                resolved_ip: None,
                resolved_url: None,
            };
        }
    };

    let Some(resolved_ip) = resolved_ip else {
        return ResolvedVerdict {
            safe: false,
            reason: Some("DNS resolution returned no addresses".to_string()),
            original_host: host,
            resolved_ip: None,
            resolved_url: None,
        };
    };

    let ip_verdict = classify_ip(resolved_ip);
    let mut resolved_url = url.clone();
    let _ = resolved_url.set_host(Some(&resolved_ip.to_string()));

    ResolvedVerdict {
        safe: ip_verdict.safe,
        reason: ip_verdict.reason,
        original_host: host,
        resolved_ip: Some(resolved_ip),
        resolved_url: Some(resolved_url.to_string()),
    }
}

/// Apply the same classification to a redirect `Location` target. Callers
/// must additionally enforce the one-hop cap themselves.
pub async fn validate_redirect(target_url: &str) -> ResolvedVerdict {
    resolve_and_validate(target_url).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        assert!(!validate("ftp://example.com").safe);
    }

    #[test]
    fn rejects_localhost() {
        assert!(!validate("http://localhost/x").safe);
        assert!(!validate("http://LOCALHOST/x").safe);
    }

    #[test]
    fn rejects_reserved_tlds() {
        assert!(!validate("http://foo.local/x").safe);
        assert!(!validate("http://foo.internal/x").safe);
    }

    #[test]
    fn rejects_private_ipv4_ranges() {
        for ip in [
            "127.0.0.1", "10.0.0.5", "172.16.0.1", "172.31.255.255", "192.168.1.1", "169.254.1.1",
            "0.0.0.1",
        ] {
            let url = format!("http://{ip}/");
            assert!(!validate(&url).safe, "expected {ip} to be unsafe");
        }
    }

    #[test]
    fn accepts_public_ipv4() {
        assert!(validate("http://172.32.0.1/").safe);
        assert!(validate("https://93.184.216.34/").safe);
    }

    #[test]
    fn rejects_ipv6_loopback_and_local() {
        assert!(!validate("http://[::1]/").safe);
        assert!(!validate("http://[fc00::1]/").safe);
        assert!(!validate("http://[fe80::1]/").safe);
    }

    #[test]
    fn accepts_public_https_hostname() {
        let verdict = validate("https://api.example.com/v1/items");
        assert!(verdict.safe);
    }

    #[tokio::test]
    async fn resolve_and_validate_accepts_ip_literal() {
        let verdict = resolve_and_validate("https://93.184.216.34/").await;
        assert!(verdict.safe);
        assert_eq!(verdict.resolved_ip, Some("93.184.216.34".parse().unwrap()));
    }

    #[tokio::test]
    async fn resolve_and_validate_rejects_private_ip_literal_without_dns() {
        let verdict = resolve_and_validate("http://127.0.0.1/").await;
        assert!(!verdict.safe);
    }
}
