use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::CloudError;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// The fields of a Google service-account key file that the JWT-bearer
/// flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

impl ServiceAccount {
    pub fn from_file(path: &Path) -> Result<Self, CloudError> {
        let text = std::fs::read_to_string(path).map_err(|e| CloudError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, CloudError> {
        serde_json::from_str(text).map_err(|e| CloudError::Credentials(e.to_string()))
    }

    /// Signed RS256 assertion for the given scope, valid for one hour.
    pub fn assertion(&self, scope: &str, now: DateTime<Utc>) -> Result<String, CloudError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }

    /// Exchange a signed assertion for an access token at `token_uri`.
    pub async fn access_token(&self, http: &Client, scope: &str) -> Result<AccessToken, CloudError> {
        let now = Utc::now();
        let assertion = self.assertion(scope, now)?;

        let response = http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CloudError::from_response("oauth2", response).await);
        }

        let body: TokenResponse = response.json().await?;
        tracing::debug!(account = %self.client_email, expires_in = body.expires_in, "Obtained access token");
        Ok(AccessToken {
            token: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }
}

/// Where bearer tokens come from.
#[derive(Debug, Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccount),
    /// A token obtained elsewhere (e.g. `gcloud auth print-access-token`).
    Bearer(String),
}

/// Hands out a cached bearer token for the cloud-platform scope.
#[derive(Debug)]
pub struct GoogleAuth {
    http: Client,
    credentials: Credentials,
    cached: Mutex<Option<AccessToken>>,
}

impl GoogleAuth {
    pub fn new(http: Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::ServiceAccount(sa) => sa.project_id.as_deref(),
            Credentials::Bearer(_) => None,
        }
    }

    pub async fn token(&self) -> Result<String, CloudError> {
        let sa = match &self.credentials {
            Credentials::Bearer(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(sa) => sa,
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }
        let fresh = sa.access_token(&self.http, CLOUD_PLATFORM_SCOPE).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
