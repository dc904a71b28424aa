use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use shared::error::RemoteApiError;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this close to expiry so an in-flight call never carries a token
/// that lapses mid-request.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Subset of a Google service-account credentials file the station needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Missing or malformed credentials are a permanent access failure,
    /// never a retryable one.
    pub fn load(path: &Path) -> Result<Self, RemoteApiError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            RemoteApiError::Access(format!(
                "cannot read credentials file '{}': {err}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            RemoteApiError::Access(format!(
                "credentials file '{}' is not a service-account key: {err}",
                path.display()
            ))
        })
    }
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

fn build_claims(key: &ServiceAccountKey, audience: &str, now: DateTime<Utc>) -> Claims {
    let exp = now + ChronoDuration::seconds(ASSERTION_LIFETIME_SECS);
    Claims {
        iss: key.client_email.clone(),
        scope: SHEETS_SCOPE.to_string(),
        aud: audience.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    }
}

fn mint_assertion(
    key: &ServiceAccountKey,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<String, RemoteApiError> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|err| {
        RemoteApiError::Access(format!("service-account private key is invalid: {err}"))
    })?;
    encode(
        &Header::new(Algorithm::RS256),
        &build_claims(key, audience, now),
        &encoding_key,
    )
    .map_err(|err| RemoteApiError::Access(format!("failed to sign token assertion: {err}")))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges signed assertions for bearer tokens and caches the result
/// until shortly before expiry.
pub(crate) struct TokenProvider {
    http: Client,
    key: ServiceAccountKey,
    token_url: Url,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub(crate) fn new(http: Client, key: ServiceAccountKey, token_url: Url) -> Self {
        Self {
            http,
            key,
            token_url,
            cached: Mutex::new(None),
        }
    }

    /// A provider pre-seeded with a long-lived token, so session tests can
    /// run without signing real assertions.
    #[cfg(test)]
    pub(crate) fn preauthorized(http: Client, access_token: &str) -> Self {
        Self {
            http,
            key: ServiceAccountKey {
                client_email: "station@example.test".to_string(),
                private_key: String::new(),
                token_uri: "https://example.test/token".to_string(),
            },
            token_url: Url::parse("https://example.test/token").expect("static url parses"),
            cached: Mutex::new(Some(CachedToken {
                access_token: access_token.to_string(),
                expires_at: Utc::now() + ChronoDuration::seconds(ASSERTION_LIFETIME_SECS),
            })),
        }
    }

    pub(crate) async fn bearer(&self) -> Result<String, RemoteApiError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > now {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch(now).await?;
        let bearer = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(bearer)
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<CachedToken, RemoteApiError> {
        let assertion = mint_assertion(&self.key, self.token_url.as_str(), now)?;
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|err| RemoteApiError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The token endpoint only rejects us for credential problems;
            // treat every status it returns as an access failure.
            return Err(RemoteApiError::Access(format!(
                "token endpoint rejected service account ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| RemoteApiError::Transport(err.to_string()))?;
        debug!(expires_in = token.expires_in, "obtained sheets bearer token");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + ChronoDuration::seconds(token.expires_in),
        })
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
