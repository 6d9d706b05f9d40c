//! Service principal token exchange
//!
//! Client-credentials grant against the Microsoft identity platform. One
//! token (audience: Azure Resource Manager) is used for the management API
//! and the workspace data-plane APIs alike.

use std::fmt;
use std::sync::Mutex;

use amlreg_state::AzureCredentials;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{AzureError, Result};

/// Public cloud identity provider.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Scope requested for every token.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Tokens are renewed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(deserialize_with = "deserialize_seconds")]
    expires_in: i64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// `expires_in` is a number on v2 endpoints and a string on v1.
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

struct AccessToken {
    secret: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Render a token endpoint error without anything the caller sent.
fn describe_token_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => {
            // AAD descriptions carry a trace/correlation trailer on new lines
            let description = err
                .error_description
                .as_deref()
                .and_then(|d| d.lines().next())
                .unwrap_or("");
            if description.is_empty() {
                err.error
            } else {
                format!("{}: {}", err.error, description)
            }
        }
        Err(_) => format!("identity provider returned status {}", status),
    }
}

/// Client-credentials token source with a single cached token.
pub struct ServicePrincipalToken {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<AccessToken>>,
}

impl ServicePrincipalToken {
    pub fn new(http: reqwest::Client, authority_host: &str, credentials: &AzureCredentials) -> Self {
        Self {
            http,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            tenant_id: credentials.tenant_id.clone(),
            client_id: credentials.client_id.clone(),
            client_secret: SecretString::from(
                credentials.client_secret.expose_secret().to_string(),
            ),
            cached: Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, self.tenant_id)
    }

    fn cached_is_fresh(&self) -> bool {
        self.cached
            .lock()
            .map(|cached| cached.as_ref().is_some_and(|t| t.is_fresh(Utc::now())))
            .unwrap_or(false)
    }

    /// Fetch a token unless the cached one is still fresh.
    pub async fn ensure_token(&self) -> Result<()> {
        if self.cached_is_fresh() {
            return Ok(());
        }

        debug!("Requesting access token for service principal");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", MANAGEMENT_SCOPE),
        ];
        let response = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| AzureError::Token(e.without_url().to_string()))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AzureError::Token(describe_token_error(status.as_u16(), &body)));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| AzureError::Token("identity provider returned no access token".to_string()))?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        debug!(expires_at = %expires_at, "Access token acquired");

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(AccessToken {
                secret: SecretString::from(token.access_token),
                expires_at,
            });
        }
        Ok(())
    }

    /// Attach the bearer token to `request`, refreshing it when needed.
    pub async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        self.ensure_token().await?;
        let cached = self
            .cached
            .lock()
            .map_err(|_| AzureError::Token("token cache poisoned".to_string()))?;
        match cached.as_ref() {
            Some(token) => Ok(request.bearer_auth(token.secret.expose_secret())),
            None => Err(AzureError::Token("no access token available".to_string())),
        }
    }
}

impl fmt::Debug for ServicePrincipalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalToken")
            .field("authority_host", &self.authority_host)
            .field("has_token", &self.cached_is_fresh())
            .finish_non_exhaustive()
    }
}
