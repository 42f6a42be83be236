//! On-demand group cache (Okta mode): `Lookup(email) → groups`, TTL'd,
//! single-flight per email, with a grace period that serves a stale entry
//! rather than failing outright if the provider is briefly unreachable.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::provider::singleflight::SingleFlight;

use super::GroupLookup;

type FetchFuture = Pin<Box<dyn Future<Output = Result<HashSet<String>, String>> + Send>>;
type Fetcher = Box<dyn Fn(String, Option<String>) -> FetchFuture + Send + Sync>;

struct Entry {
    groups: HashSet<String>,
    fetched_at: DateTime<Utc>,
}

/// `fetch` performs the actual provider round-trip (e.g. Okta `/userinfo`)
/// for one email. The caller passes the bearer token belonging to that
/// email's current session, since Okta's group claim lives behind
/// `/userinfo` and isn't addressable by email alone (spec.md §4.2).
pub struct OnDemandCache {
    entries: Mutex<HashMap<String, Entry>>,
    flight: SingleFlight<HashSet<String>, String>,
    fetch: Fetcher,
    ttl: chrono::Duration,
    grace: chrono::Duration,
}

impl OnDemandCache {
    pub fn new<F, Fut>(ttl: Duration, grace: Duration, fetch: F) -> Self
    where
        F: Fn(String, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashSet<String>, String>> + Send + 'static,
    {
        Self {
            entries: Mutex::new(HashMap::new()),
            flight: SingleFlight::new(),
            fetch: Box::new(move |email, token| Box::pin(fetch(email, token))),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(10)),
            grace: chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::hours(4)),
        }
    }

    pub async fn lookup(&self, email: &str, access_token: Option<&str>) -> Option<GroupLookup> {
        let now = Utc::now();
        let cached = {
            let guard = self.entries.lock().expect("group cache mutex poisoned");
            guard.get(email).map(|e| (e.groups.clone(), e.fetched_at))
        };

        if let Some((groups, fetched_at)) = &cached {
            if now - *fetched_at <= self.ttl {
                return Some(GroupLookup {
                    groups: groups.clone(),
                    stale: false,
                });
            }
        }

        let key = email.to_string();
        let fetch = &self.fetch;
        let email_owned = email.to_string();
        let token_owned = access_token.map(|t| t.to_string());
        let fut = fetch(email_owned, token_owned);
        match self.flight.run(&key, fut).await {
            Ok(groups) => {
                let mut guard = self.entries.lock().expect("group cache mutex poisoned");
                guard.insert(
                    email.to_string(),
                    Entry {
                        groups: groups.clone(),
                        fetched_at: now,
                    },
                );
                Some(GroupLookup {
                    groups,
                    stale: false,
                })
            }
            Err(_) => match cached {
                Some((groups, fetched_at)) if now - fetched_at <= self.ttl + self.grace => {
                    Some(GroupLookup {
                        groups,
                        stale: true,
                    })
                }
                _ => None,
            },
        }
    }
}
