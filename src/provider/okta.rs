//! Okta OAuth2 binding. Unlike Google, Okta has no admin-impersonation
//! shortcut here, so group membership is always resolved per-user through
//! `/userinfo`'s `groups` claim — `crate::groupcache`'s on-demand cache is
//! the expected caller for `get_groups`, not the fill-mode snapshot.

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicTokenType};
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, RevocationUrl, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SsoError;
use crate::provider::{AuthorizeRequest, IdentityProvider, Profile, TokenSet};

#[derive(Debug, Clone, Deserialize, Serialize)]
struct OktaTokenField {
    #[serde(rename = "id_token")]
    id_token: Option<String>,
}
impl ExtraTokenFields for OktaTokenField {}

type OktaTokenResponse = StandardTokenResponse<OktaTokenField, BasicTokenType>;
type OktaOauth2Client<
    HasAuthUrl = EndpointSet,
    HasDeviceAuthUrl = EndpointNotSet,
    HasIntrospectionUrl = EndpointNotSet,
    HasRevocationUrl = EndpointSet,
    HasTokenUrl = EndpointSet,
> = OAuth2Client<
    oauth2::basic::BasicErrorResponse,
    OktaTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

pub struct OktaProvider {
    client: OktaOauth2Client,
    http: reqwest::Client,
    org_url: String,
    auth_server_id: Option<String>,
}

impl OktaProvider {
    pub fn new(
        org_url: impl Into<String>,
        auth_server_id: Option<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, SsoError> {
        let org_url = org_url.into();
        let issuer_base = match &auth_server_id {
            Some(id) => format!("{org_url}/oauth2/{id}"),
            None => format!("{org_url}/oauth2/default"),
        };

        let client: OktaOauth2Client = BasicClient::new(ClientId::new(client_id.into()))
            .set_client_secret(ClientSecret::new(client_secret.into()))
            .set_auth_uri(AuthUrl::new(format!("{issuer_base}/v1/authorize"))?)
            .set_token_uri(TokenUrl::new(format!("{issuer_base}/v1/token"))?)
            .set_revocation_url(RevocationUrl::new(format!("{issuer_base}/v1/revoke"))?)
            .set_redirect_uri(RedirectUrl::new(redirect_uri.into())?);

        Ok(Self {
            client,
            http: reqwest::Client::new(),
            org_url,
            auth_server_id,
        })
    }

    fn issuer_base(&self) -> String {
        match &self.auth_server_id {
            Some(id) => format!("{}/oauth2/{id}", self.org_url),
            None => format!("{}/oauth2/default", self.org_url),
        }
    }
}

#[async_trait]
impl IdentityProvider for OktaProvider {
    fn build_authorize_url(&self) -> AuthorizeRequest {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(challenge)
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("groups".to_string()))
            .add_scope(Scope::new("offline_access".to_string()))
            .url();
        AuthorizeRequest {
            auth_url,
            csrf_token: csrf_token.secret().to_string(),
            pkce_verifier: verifier.secret().to_string(),
        }
    }

    async fn redeem(&self, code: &str, pkce_verifier: &str) -> Result<(TokenSet, Profile), SsoError> {
        let token_result: OktaTokenResponse = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| SsoError::Oauth2Token(e.to_string()))?;

        let tokens = to_token_set(&token_result);
        let profile = self.get_user_profile(&tokens.access_token).await?;
        Ok((tokens, profile))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, SsoError> {
        let token_result: OktaTokenResponse = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                oauth2::RequestTokenError::ServerResponse(_) => {
                    SsoError::ProviderPermanent("refresh token rejected".to_string())
                }
                other => SsoError::ProviderTransient(other.to_string()),
            })?;
        Ok(to_token_set(&token_result))
    }

    async fn revoke(&self, access_token: &str) -> Result<(), SsoError> {
        self.http
            .post(format!("{}/v1/revoke", self.issuer_base()))
            .form(&[("token", access_token), ("token_type_hint", "access_token")])
            .send()
            .await?;
        Ok(())
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool, SsoError> {
        let resp = self
            .http
            .get(format!("{}/v1/userinfo", self.issuer_base()))
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    async fn get_user_profile(&self, access_token: &str) -> Result<Profile, SsoError> {
        let resp: Value = self
            .http
            .get(format!("{}/v1/userinfo", self.issuer_base()))
            .bearer_auth(access_token)
            .send()
            .await?
            .json()
            .await?;
        let email = resp
            .get("email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SsoError::ProviderPermanent("userinfo missing email".to_string()))?
            .to_string();
        let user = resp
            .get("sub")
            .and_then(|v| v.as_str())
            .unwrap_or(&email)
            .to_string();
        Ok(Profile { email, user })
    }

    async fn get_groups(&self, email: &str, access_token: Option<&str>) -> Result<Vec<String>, SsoError> {
        // Okta's `groups` claim is bound to whichever token made the
        // /userinfo call, not addressable by email alone, so the caller
        // must supply the session's own access token (see
        // `crate::groupcache::ondemand`).
        let access_token = access_token.ok_or_else(|| {
            SsoError::ProviderPermanent(
                "okta group lookup requires an access token, not an email alone".to_string(),
            )
        })?;
        let resp: Value = self
            .http
            .get(format!("{}/v1/userinfo", self.issuer_base()))
            .bearer_auth(access_token)
            .send()
            .await?
            .json()
            .await?;

        let claimed_email = resp.get("email").and_then(|v| v.as_str()).unwrap_or("");
        if !claimed_email.eq_ignore_ascii_case(email) {
            return Err(SsoError::ProviderPermanent(
                "access token does not belong to the requested email".to_string(),
            ));
        }

        Ok(resp
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|g| g.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn supports_group_enumeration(&self) -> bool {
        false
    }
}

fn to_token_set(token_result: &OktaTokenResponse) -> TokenSet {
    use oauth2::TokenResponse;
    TokenSet {
        access_token: token_result.access_token().secret().to_string(),
        refresh_token: token_result.refresh_token().map(|t| t.secret().to_string()),
        id_token: token_result.extra_fields().id_token.clone(),
        expires_in: token_result.expires_in(),
    }
}
