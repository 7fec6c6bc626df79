//! Credentials attached to every call as a bearer token.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Clone, Default)]
pub enum Credentials {
    /// No authorization header, e.g. for local emulators.
    #[default]
    Anonymous,
    AccessToken(String),
    ServiceAccount(Arc<ServiceAccountCredentials>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::AccessToken(_) => f.write_str("AccessToken(..)"),
            Self::ServiceAccount(sa) => f
                .debug_tuple("ServiceAccount")
                .field(&sa.key.client_email)
                .finish(),
        }
    }
}

impl Credentials {
    pub async fn from_service_account_file(path: impl AsRef<Path>) -> Result<Self> {
        let key = ServiceAccountKey::from_file(path).await?;
        Ok(Self::ServiceAccount(Arc::new(ServiceAccountCredentials::new(key))))
    }

    pub fn from_service_account_json(json: &str) -> Result<Self> {
        let key = ServiceAccountKey::from_json(json)?;
        Ok(Self::ServiceAccount(Arc::new(ServiceAccountCredentials::new(key))))
    }

    /// Loads the key file named by `GOOGLE_APPLICATION_CREDENTIALS`.
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var_os(CREDENTIALS_ENV)
            .ok_or_else(|| Error::Credentials("could not find default credentials".to_string()))?;
        info!("loading credentials from {}", Path::new(&path).display());
        Self::from_service_account_file(path).await
    }

    /// The bearer token for calls against `audience`, if any.
    pub fn bearer_token(&self, audience: &str) -> Result<Option<String>> {
        match self {
            Self::Anonymous => Ok(None),
            Self::AccessToken(token) => Ok(Some(token.clone())),
            Self::ServiceAccount(sa) => sa.token(audience).map(Some),
        }
    }
}

/// The JSON key file downloaded for a service account.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            Error::Credentials(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| Error::Credentials(format!("malformed service account key: {e}")))?;
        if key.key_type != "service_account" {
            return Err(Error::Credentials(format!(
                "unsupported credentials type: {}",
                key.key_type
            )));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    audience: String,
    token: String,
    expires_at: SystemTime,
}

/// Signs short-lived self-signed JWTs for a service account.
pub struct ServiceAccountCredentials {
    key: ServiceAccountKey,
    scopes: Vec<String>,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

impl ServiceAccountCredentials {
    #[must_use]
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            scopes: vec![DEFAULT_SCOPE.to_string()],
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub const fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    fn token(&self, audience: &str) -> Result<String> {
        let now = SystemTime::now();
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| Error::Credentials("token cache poisoned".to_string()))?;
        if let Some(token) = cached.as_ref() {
            let fresh = token
                .expires_at
                .duration_since(now)
                .is_ok_and(|left| left > REFRESH_MARGIN);
            if fresh && token.audience == audience {
                return Ok(token.token.clone());
            }
        }

        debug!("signing new token for {}", &self.key.client_email);
        let token = self.sign(audience, now)?;
        cached.replace(CachedToken {
            audience: audience.to_string(),
            token: token.clone(),
            expires_at: now + TOKEN_LIFETIME,
        });
        Ok(token)
    }

    fn sign(&self, audience: &str, now: SystemTime) -> Result<String> {
        let iat = now
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::Credentials("system clock before unix epoch".to_string()))?
            .as_secs();
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
            kid: self.key.private_key_id.as_deref(),
        };
        let claims = JwtClaims {
            iss: self.key.client_email.clone(),
            sub: self.key.client_email.clone(),
            aud: audience.to_string(),
            iat,
            exp: iat + TOKEN_LIFETIME.as_secs(),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );

        let pkey = PKey::private_key_from_pem(self.key.private_key.as_bytes())?;
        let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
        signer.update(signing_input.as_bytes())?;
        let signature = signer.sign_to_vec()?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}
