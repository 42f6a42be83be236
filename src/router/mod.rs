//! Host Multiplexer & Upstream Router (component C7): selects an upstream
//! by `Host` header, first by exact match then by regex in configuration
//! order, and applies whatever rewrite/forwarding rules that upstream
//! carries.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::config::{RouteKind, UpstreamConfig};

/// A route that matched, plus the concrete target URL (already rewritten
/// if the route is `RouteKind::Rewrite`).
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub upstream: Arc<UpstreamConfig>,
    pub target_base: String,
}

struct RegexRoute {
    pattern: Regex,
    upstream: Arc<UpstreamConfig>,
}

/// Built once at startup from `UpstreamConfig` entries and never mutated
/// afterward (spec's immutable-post-startup routing table).
pub struct HostRouter {
    exact: HashMap<String, Arc<UpstreamConfig>>,
    regexes: Vec<RegexRoute>,
}

impl HostRouter {
    pub fn new(upstreams: Vec<UpstreamConfig>) -> Result<Self, String> {
        let mut exact = HashMap::new();
        let mut regexes = Vec::new();

        for upstream in upstreams {
            let upstream = Arc::new(upstream);
            if upstream.from_host_is_regex {
                let pattern = Regex::new(&upstream.from_host)
                    .map_err(|e| format!("invalid host pattern {:?}: {e}", upstream.from_host))?;
                regexes.push(RegexRoute { pattern, upstream });
            } else {
                exact.insert(upstream.from_host.clone(), upstream);
            }
        }

        Ok(Self { exact, regexes })
    }

    /// `host` should already have any port suffix stripped by the caller.
    pub fn route(&self, host: &str) -> Option<MatchedRoute> {
        if let Some(upstream) = self.exact.get(host) {
            return Some(MatchedRoute {
                upstream: upstream.clone(),
                target_base: upstream.to_url.clone(),
            });
        }

        for candidate in &self.regexes {
            if let Some(captures) = candidate.pattern.captures(host) {
                let target_base = match candidate.upstream.route_kind {
                    RouteKind::Rewrite => expand_template(&candidate.upstream.to_url, &captures),
                    RouteKind::Simple => candidate.upstream.to_url.clone(),
                };
                return Some(MatchedRoute {
                    upstream: candidate.upstream.clone(),
                    target_base,
                });
            }
        }

        None
    }
}

/// Strips an optional `:port` suffix from a `Host` header value. IPv6
/// literals (`[::1]:8080`) keep their brackets.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split(']').next().map(|h| &host[..h.len() + 1]).unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

fn expand_template(template: &str, captures: &regex::Captures) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            let mut digits = String::new();
            while let Some(d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                out.push('$');
            } else {
                let idx: usize = digits.parse().unwrap_or(0);
                if let Some(m) = captures.get(idx) {
                    out.push_str(m.as_str());
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamOptions;

    fn simple_upstream(from: &str, to: &str) -> UpstreamConfig {
        UpstreamConfig {
            from_host: from.to_string(),
            from_host_is_regex: false,
            to_url: to.to_string(),
            route_kind: RouteKind::Simple,
            options: UpstreamOptions::default(),
        }
    }

    #[test]
    fn exact_match_wins_over_regex() {
        let router = HostRouter::new(vec![
            simple_upstream("app.corp.com", "http://app-exact:8080"),
        ])
        .unwrap();
        let matched = router.route("app.corp.com").unwrap();
        assert_eq!(matched.target_base, "http://app-exact:8080");
    }

    #[test]
    fn regex_route_matches_in_configuration_order() {
        let mut tenant_a = simple_upstream(r"^(\w+)\.tenants\.corp\.com$", "http://tenant-a:8080");
        tenant_a.from_host_is_regex = true;
        tenant_a.route_kind = RouteKind::Rewrite;
        tenant_a.to_url = "http://$1-backend:8080".to_string();

        let router = HostRouter::new(vec![tenant_a]).unwrap();
        let matched = router.route("acme.tenants.corp.com").unwrap();
        assert_eq!(matched.target_base, "http://acme-backend:8080");
    }

    #[test]
    fn unmatched_host_returns_none() {
        let router = HostRouter::new(vec![simple_upstream("app.corp.com", "http://app:8080")]).unwrap();
        assert!(router.route("unknown.corp.com").is_none());
    }

    #[test]
    fn strip_port_leaves_ipv6_brackets_intact() {
        assert_eq!(strip_port("app.corp.com:8080"), "app.corp.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("app.corp.com"), "app.corp.com");
    }
}
