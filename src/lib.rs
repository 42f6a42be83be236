//! Shared library for the `authenticator` and `proxy` binaries: the
//! session/cookie/provider/cache/signing/router code that must not drift
//! between the two processes lives here once (spec.md §1, §2).

pub mod authenticator;
pub mod config;
pub mod crypto;
pub mod error;
pub mod groupcache;
pub mod metrics;
pub mod provider;
pub mod proxy;
pub mod router;
pub mod session;
pub mod signer;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use config::{Config, ProviderKind};
use error::SsoError;
use groupcache::{FillCache, GroupCache, OnDemandCache};
use provider::google::GoogleProvider;
use provider::okta::OktaProvider;
use provider::{IdentityProvider, SingleFlightProvider};

/// Builds the configured identity provider binding, already wrapped in the
/// single-flight decorator (spec.md §4.2) so every caller shares coalesced
/// refresh/validate/group calls.
pub fn build_provider(cfg: &Config) -> Result<Arc<SingleFlightProvider>, SsoError> {
    let inner: Arc<dyn IdentityProvider> = match cfg.provider {
        ProviderKind::Google => Arc::new(GoogleProvider::new(
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.oauth_callback_url.clone(),
        )?),
        ProviderKind::Okta => {
            let org_url = cfg
                .okta_org_url
                .clone()
                .ok_or_else(|| SsoError::Config("OKTA_ORG_URL is required when PROVIDER=okta".to_string()))?;
            Arc::new(OktaProvider::new(
                org_url,
                cfg.okta_authorization_server_id.clone(),
                cfg.client_id.clone(),
                cfg.client_secret.clone(),
                cfg.oauth_callback_url.clone(),
            )?)
        }
    };
    Ok(Arc::new(SingleFlightProvider::new(inner, cfg.request_timeout())))
}

/// Builds the group cache appropriate to the configured provider (spec.md
/// §4.3): `Fill` for providers that can enumerate all groups (Google, via
/// an admin-impersonating service account), `OnDemand` otherwise (Okta).
/// Returns `None` when the provider is enumeration-capable but no admin
/// credential is configured, in which case the proxy falls back to the
/// groups snapshotted in the session cookie at login (see
/// `proxy::handlers::validate_authorization`).
pub fn build_group_cache(cfg: &Config, provider: Arc<SingleFlightProvider>) -> Option<Arc<GroupCache>> {
    match cfg.provider {
        ProviderKind::Google => {
            let admin_token = cfg.google_admin_access_token.clone()?;
            let refresh_every = Duration::from_secs(cfg.groups_cache_refresh_ttl_secs);
            let http = reqwest::Client::new();
            let cache = FillCache::spawn(refresh_every, move || {
                let http = http.clone();
                let admin_token = admin_token.clone();
                async move { enumerate_google_groups(&http, &admin_token).await }
            });
            Some(Arc::new(GroupCache::Fill(cache)))
        }
        ProviderKind::Okta => {
            let ttl = Duration::from_secs(cfg.groups_cache_ttl_secs);
            let grace = cfg.grace_period();
            let cache = OnDemandCache::new(ttl, grace, move |email, access_token| {
                let provider = provider.clone();
                async move {
                    let Some(access_token) = access_token else {
                        return Err("no access token available for group lookup".to_string());
                    };
                    provider
                        .get_groups(&email, Some(&access_token))
                        .await
                        .map(|groups| groups.into_iter().collect::<HashSet<String>>())
                        .map_err(|e| e.to_string())
                }
            });
            Some(Arc::new(GroupCache::OnDemand(cache)))
        }
    }
}

/// One enumeration sweep of the Google Admin Directory API: every group in
/// the domain, and that group's member emails. Requires a bearer token for
/// an admin-impersonating service account (`GOOGLE_ADMIN_ACCESS_TOKEN`);
/// spec.md §4.2 leaves the exact admin-auth mechanism to the binding, so
/// this accepts a pre-minted token rather than performing the JWT-bearer
/// exchange itself (see DESIGN.md).
async fn enumerate_google_groups(
    http: &reqwest::Client,
    admin_token: &str,
) -> Result<groupcache::fill::GroupMembership, String> {
    #[derive(serde::Deserialize)]
    struct GroupsResponse {
        groups: Option<Vec<GroupEntry>>,
    }
    #[derive(serde::Deserialize)]
    struct GroupEntry {
        email: String,
    }
    #[derive(serde::Deserialize)]
    struct MembersResponse {
        members: Option<Vec<MemberEntry>>,
    }
    #[derive(serde::Deserialize)]
    struct MemberEntry {
        email: Option<String>,
    }

    let groups_resp: GroupsResponse = http
        .get("https://admin.googleapis.com/admin/directory/v1/groups")
        .query(&[("customer", "my_customer")])
        .bearer_auth(admin_token)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .json()
        .await
        .map_err(|e| e.to_string())?;

    let mut membership = groupcache::fill::GroupMembership::new();
    for group in groups_resp.groups.unwrap_or_default() {
        let members_resp: Result<MembersResponse, _> = http
            .get(format!(
                "https://admin.googleapis.com/admin/directory/v1/groups/{}/members",
                group.email
            ))
            .bearer_auth(admin_token)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await;
        let members = match members_resp {
            Ok(resp) => resp
                .members
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.email)
                .collect(),
            Err(err) => {
                warn!(group = %group.email, error = %err, "failed to list group members, skipping");
                HashSet::new()
            }
        };
        membership.insert(group.email, members);
    }
    Ok(membership)
}
