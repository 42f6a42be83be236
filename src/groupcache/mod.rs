//! Group Cache (component C3): memoizes group lookups per-user with TTL,
//! single-flight coalescing for concurrent lookups of the same user, and an
//! optional periodic refill for providers that can enumerate all groups.
//!
//! Two modes mirror the two providers: `OnDemand` for Okta (no enumeration,
//! so every miss does a real lookup) and `Fill` for Google (a background
//! task owns the snapshot; lookups only ever read it).

pub mod fill;
pub mod ondemand;

use std::collections::HashSet;

pub use fill::FillCache;
pub use ondemand::OnDemandCache;

/// Result of a group lookup: the groups, whether they came from a stale
/// (grace-period) entry, and how recently they were fetched.
#[derive(Debug, Clone)]
pub struct GroupLookup {
    pub groups: HashSet<String>,
    pub stale: bool,
}

/// The capability set C8 (the proxy) actually needs, independent of mode.
pub enum GroupCache {
    OnDemand(OnDemandCache),
    Fill(FillCache),
}

impl GroupCache {
    /// Returns the groups for `email`, or `None` if no usable answer exists
    /// (on-demand: lookup failed outside grace; fill: the snapshot hasn't
    /// published yet).
    pub async fn lookup(&self, email: &str, access_token: Option<&str>) -> Option<GroupLookup> {
        match self {
            GroupCache::OnDemand(cache) => cache.lookup(email, access_token).await,
            GroupCache::Fill(cache) => cache.lookup(email),
        }
    }
}

/// `allowed` empty means "any authenticated user" per spec's §4.8 rule.
pub fn is_authorized(groups: &HashSet<String>, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|g| groups.contains(g))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowed_list_authorizes_any_groups() {
        let groups: HashSet<String> = HashSet::new();
        assert!(is_authorized(&groups, &[]));
    }

    #[test]
    fn nonempty_allowed_list_requires_intersection() {
        let mut groups = HashSet::new();
        groups.insert("eng".to_string());
        assert!(is_authorized(&groups, &["eng".to_string(), "sre".to_string()]));
        assert!(!is_authorized(&groups, &["finance".to_string()]));
    }
}
