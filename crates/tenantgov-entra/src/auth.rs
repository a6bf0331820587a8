//! Access tokens for Microsoft Graph and SharePoint.
//!
//! A run resolves its `AuthMode` once into a `TokenCache`. The cache keeps
//! one token per resource (Graph, each SharePoint origin) and refreshes it
//! shortly before it expires.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::config::{normalize_thumbprint, ManagedIdentityEndpoint};
use crate::{AuthMode, EntraError, EntraResult};

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of a signed client assertion.
const ASSERTION_LIFETIME_MINUTES: i64 = 10;

/// OAuth2 token response from Entra ID.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Claims of the certificate client assertion.
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    aud: String,
    iss: String,
    sub: String,
    jti: String,
    nbf: i64,
    iat: i64,
    exp: i64,
}

/// Cached access token.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Token cache for one authenticated identity.
#[derive(Debug)]
pub struct TokenCache {
    mode: AuthMode,
    login_endpoint: String,
    managed_identity: ManagedIdentityEndpoint,
    http_client: reqwest::Client,
    tokens: RwLock<HashMap<String, CachedToken>>,
    /// Grace period before expiry to trigger refresh (default: 5 minutes).
    grace_period: Duration,
}

impl TokenCache {
    /// Creates a token cache for `mode`.
    ///
    /// # Errors
    ///
    /// Returns `EntraError::Config` when the mode fails validation.
    pub fn new(
        mode: AuthMode,
        login_endpoint: impl Into<String>,
        managed_identity: ManagedIdentityEndpoint,
        http_client: reqwest::Client,
    ) -> EntraResult<Self> {
        mode.validate()?;
        Ok(Self {
            mode,
            login_endpoint: login_endpoint.into(),
            managed_identity,
            http_client,
            tokens: RwLock::new(HashMap::new()),
            grace_period: Duration::minutes(5),
        })
    }

    /// The authentication mode this cache was built from.
    #[must_use]
    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Gets a valid access token for `resource`, refreshing if necessary.
    ///
    /// `resource` is the resource root such as `https://graph.microsoft.com`
    /// or `https://contoso.sharepoint.com`.
    #[instrument(skip(self), fields(mode = self.mode.kind()))]
    pub async fn get_token(&self, resource: &str) -> EntraResult<String> {
        let key = resource.trim_end_matches('/').to_string();

        {
            let cache = self.tokens.read().await;
            if let Some(token) = cache.get(&key) {
                if !token.is_expired(self.grace_period) {
                    debug!("Using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Acquiring access token");
        let token = match &self.mode {
            AuthMode::SystemIdentity => self.acquire_managed_identity(&key, None).await?,
            AuthMode::UserIdentity { client_id } => {
                self.acquire_managed_identity(&key, Some(client_id)).await?
            }
            AuthMode::AppCertificate { .. } => self.acquire_with_certificate(&key).await?,
        };

        let access_token = token.access_token.clone();
        self.tokens.write().await.insert(key, token);
        Ok(access_token)
    }

    /// Invalidates all cached tokens.
    pub async fn invalidate(&self) {
        self.tokens.write().await.clear();
    }

    async fn acquire_managed_identity(
        &self,
        resource: &str,
        client_id: Option<&str>,
    ) -> EntraResult<CachedToken> {
        let endpoint = &self.managed_identity;
        let mut query = vec![
            ("api-version", endpoint.api_version),
            ("resource", resource),
        ];
        if let Some(id) = client_id {
            query.push(("client_id", id));
        }

        let mut request = self
            .http_client
            .get(&endpoint.url)
            .query(&query)
            .header("Metadata", "true");
        if let Some(header) = &endpoint.identity_header {
            request = request.header("X-IDENTITY-HEADER", header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EntraError::Auth(format!("Managed identity request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EntraError::Auth(format!(
                "Managed identity endpoint returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            EntraError::Auth(format!("Failed to parse managed identity response: {e}"))
        })?;
        parse_managed_identity_token(&body)
    }

    async fn acquire_with_certificate(&self, resource: &str) -> EntraResult<CachedToken> {
        let AuthMode::AppCertificate {
            tenant_id,
            client_id,
            thumbprint,
            private_key,
        } = &self.mode
        else {
            return Err(EntraError::Auth("Certificate credentials not configured".into()));
        };

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint.trim_end_matches('/'),
            tenant_id
        );
        let assertion =
            build_client_assertion(&token_url, client_id, thumbprint, private_key.expose_secret())?;
        let scope = format!("{resource}/.default");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("scope", scope.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| EntraError::Auth(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EntraError::Auth(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| EntraError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        debug!(
            "Acquired new token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }
}

/// Signs the RS256 client assertion for the certificate credential.
fn build_client_assertion(
    token_url: &str,
    client_id: &str,
    thumbprint: &str,
    private_key_pem: &str,
) -> EntraResult<String> {
    let thumbprint_bytes = hex::decode(normalize_thumbprint(thumbprint))
        .map_err(|e| EntraError::Config(format!("Invalid certificate thumbprint: {e}")))?;

    let mut header = Header::new(Algorithm::RS256);
    header.x5t = Some(URL_SAFE_NO_PAD.encode(thumbprint_bytes));

    let now = Utc::now();
    let claims = AssertionClaims {
        aud: token_url.to_string(),
        iss: client_id.to_string(),
        sub: client_id.to_string(),
        jti: uuid::Uuid::new_v4().to_string(),
        nbf: now.timestamp(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(ASSERTION_LIFETIME_MINUTES)).timestamp(),
    };

    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| EntraError::Config(format!("Invalid certificate private key: {e}")))?;

    encode(&header, &claims, &key)
        .map_err(|e| EntraError::Auth(format!("Failed to sign client assertion: {e}")))
}

/// Managed identity endpoints return expiry as strings on some hosts.
fn parse_managed_identity_token(body: &serde_json::Value) -> EntraResult<CachedToken> {
    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EntraError::Auth("Managed identity response has no access_token".into()))?
        .to_string();

    let as_i64 = |name: &str| {
        body.get(name).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
        })
    };

    let expires_at = if let Some(epoch) = as_i64("expires_on") {
        DateTime::<Utc>::from_timestamp(epoch, 0)
            .ok_or_else(|| EntraError::Auth(format!("Invalid expires_on value {epoch}")))?
    } else if let Some(secs) = as_i64("expires_in") {
        Utc::now() + Duration::seconds(secs)
    } else {
        return Err(EntraError::Auth(
            "Managed identity response has no expiry".into(),
        ));
    };

    Ok(CachedToken {
        access_token,
        expires_at,
    })
}
