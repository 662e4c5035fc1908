use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KVError;

/// OAuth scope granting read/write access to Cloud Datastore.
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens are refreshed this long before they actually expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account JSON key that are needed to mint tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Read a service-account key file. Any problem with the file is an
    /// authentication failure: the remote store cannot be used without it.
    pub fn from_file(path: &Path) -> Result<Self, KVError> {
        let data = fs::read(path).map_err(|e| {
            KVError::AuthFailed(format!("cannot read credentials {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            KVError::AuthFailed(format!("invalid credentials {}: {}", path.display(), e))
        })
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// TokenSource exchanges a signed service-account assertion for an OAuth2
/// access token and caches it until shortly before it expires.
pub struct TokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey, client: Client) -> Result<Self, KVError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| KVError::AuthFailed(format!("invalid private key: {}", e)))?;
        Ok(Self {
            key,
            encoding_key,
            client,
            cached: Mutex::new(None),
        })
    }

    pub fn from_file(path: &Path, client: Client) -> Result<Self, KVError> {
        Self::new(ServiceAccountKey::from_file(path)?, client)
    }

    /// Service account this source authenticates as.
    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Return a valid access token, minting a new one when the cached token
    /// is missing or about to expire.
    pub fn token(&self) -> Result<String, KVError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| KVError::AuthFailed(e.to_string()))?;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch()?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    fn assertion(&self) -> Result<String, KVError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| KVError::AuthFailed(e.to_string()))?
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME.as_secs(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| KVError::AuthFailed(format!("cannot sign assertion: {}", e)))
    }

    fn fetch(&self) -> Result<CachedToken, KVError> {
        let assertion = self.assertion()?;
        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .map_err(|e| KVError::TransientNetwork(format!("token request failed: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(KVError::Unavailable(format!("token endpoint returned {}", status)));
        }
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(KVError::AuthFailed(format!(
                "token endpoint rejected {} ({}): {}",
                self.key.client_email, status, text
            )));
        }

        let body: TokenResponse = resp
            .json()
            .map_err(|e| KVError::Serialization(format!("token response: {}", e)))?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(ASSERTION_LIFETIME);

        debug!(
            "TokenSource: minted token for {}, valid for {}s",
            self.key.client_email,
            lifetime.as_secs()
        );
        Ok(CachedToken {
            access_token: body.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}
