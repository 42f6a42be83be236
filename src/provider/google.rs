//! Google OAuth2 binding (spec.md §4.2). Offline access for refresh tokens;
//! group membership is resolved out-of-band by `crate::groupcache`'s
//! fill-mode cache (Google supports enumerating all groups in an org via
//! an admin-impersonating service account, so per-user lookups here are
//! not the primary path — `get_groups` is kept for completeness/testing).

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

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct GoogleTokenField {
    #[serde(rename = "id_token")]
    id_token: Option<String>,
}
impl ExtraTokenFields for GoogleTokenField {}

type GoogleTokenResponse = StandardTokenResponse<GoogleTokenField, BasicTokenType>;
type GoogleOauth2Client<
    HasAuthUrl = EndpointSet,
    HasDeviceAuthUrl = EndpointNotSet,
    HasIntrospectionUrl = EndpointNotSet,
    HasRevocationUrl = EndpointSet,
    HasTokenUrl = EndpointSet,
> = OAuth2Client<
    oauth2::basic::BasicErrorResponse,
    GoogleTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

pub struct GoogleProvider {
    client: GoogleOauth2Client,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, SsoError> {
        let client: GoogleOauth2Client = BasicClient::new(ClientId::new(client_id.into()))
            .set_client_secret(ClientSecret::new(client_secret.into()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string())?)
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?)
            .set_revocation_url(RevocationUrl::new(GOOGLE_REVOKE_URL.to_string())?)
            .set_redirect_uri(RedirectUrl::new(redirect_uri.into())?);
        Ok(Self {
            client,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn build_authorize_url(&self) -> AuthorizeRequest {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .add_scope(Scope::new(
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
            ))
            .add_scope(Scope::new(
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
            ))
            .add_scope(Scope::new(
                "https://www.googleapis.com/auth/admin.directory.group.readonly".to_string(),
            ))
            .add_scope(Scope::new("openid".to_string()))
            .url();
        AuthorizeRequest {
            auth_url,
            csrf_token: csrf_token.secret().to_string(),
            pkce_verifier: verifier.secret().to_string(),
        }
    }

    async fn redeem(&self, code: &str, pkce_verifier: &str) -> Result<(TokenSet, Profile), SsoError> {
        let token_result: GoogleTokenResponse = self
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
        let token_result: GoogleTokenResponse = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(classify_token_error)?;
        Ok(to_token_set(&token_result))
    }

    async fn revoke(&self, access_token: &str) -> Result<(), SsoError> {
        self.http
            .post(GOOGLE_REVOKE_URL)
            .form(&[("token", access_token)])
            .send()
            .await?;
        Ok(())
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool, SsoError> {
        let resp = self
            .http
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("access_token", access_token)])
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    async fn get_user_profile(&self, access_token: &str) -> Result<Profile, SsoError> {
        let resp: Value = self
            .http
            .get(GOOGLE_USERINFO_URL)
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

    async fn get_groups(&self, _email: &str, _access_token: Option<&str>) -> Result<Vec<String>, SsoError> {
        // Per-user lookup is not the normal path for Google (see module
        // doc); callers should prefer the fill-mode group cache snapshot.
        Ok(Vec::new())
    }

    fn supports_group_enumeration(&self) -> bool {
        true
    }
}

fn to_token_set(token_result: &GoogleTokenResponse) -> TokenSet {
    use oauth2::TokenResponse;
    TokenSet {
        access_token: token_result.access_token().secret().to_string(),
        refresh_token: token_result.refresh_token().map(|t| t.secret().to_string()),
        id_token: token_result.extra_fields().id_token.clone(),
        expires_in: token_result.expires_in(),
    }
}

fn classify_token_error<E>(
    e: oauth2::RequestTokenError<E, oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>>,
) -> SsoError
where
    E: std::error::Error + 'static,
{
    use oauth2::basic::BasicErrorResponseType;
    use oauth2::ErrorResponse;
    use oauth2::RequestTokenError;
    match e {
        RequestTokenError::ServerResponse(resp) => match resp.error() {
            BasicErrorResponseType::InvalidGrant => {
                SsoError::ProviderPermanent("invalid_grant".to_string())
            }
            other => SsoError::ProviderPermanent(format!("{other:?}")),
        },
        RequestTokenError::Request(err) => SsoError::ProviderTransient(err.to_string()),
        RequestTokenError::Parse(err, _) => SsoError::ProviderTransient(err.to_string()),
        RequestTokenError::Other(s) => SsoError::ProviderTransient(s),
    }
}
