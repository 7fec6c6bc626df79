use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where to load the client certificate for mutual TLS from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientCertSource {
    Files { cert: PathBuf, key: PathBuf },
    #[serde(skip)]
    Pem { cert: Vec<u8>, key: Vec<u8> },
}

impl ClientCertSource {
    /// Returns `(cert, key)` in PEM encoding.
    pub async fn load(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        match self {
            Self::Files { cert, key } => {
                let cert = tokio::fs::read(cert).await?;
                let key = tokio::fs::read(key).await?;
                Ok((cert, key))
            }
            Self::Pem { cert, key } => Ok((cert.clone(), key.clone())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientOptions {
    /// Overrides the endpoint picked from `GOOGLE_API_USE_MTLS`.
    pub api_endpoint: Option<String>,
    pub client_cert_source: Option<ClientCertSource>,
    pub credentials_file: Option<PathBuf>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub quota_project_id: Option<String>,
}

impl ClientOptions {
    #[must_use]
    pub fn with_api_endpoint(mut self, api_endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(api_endpoint.into());
        self
    }

    #[must_use]
    pub fn with_client_cert_source(mut self, source: ClientCertSource) -> Self {
        self.client_cert_source = Some(source);
        self
    }

    #[must_use]
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_quota_project_id(mut self, project: impl Into<String>) -> Self {
        self.quota_project_id = Some(project.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn loads_cert_source_from_files() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(b"CERT").unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        key.write_all(b"KEY").unwrap();

        let source = ClientCertSource::Files {
            cert: cert.path().to_path_buf(),
            key: key.path().to_path_buf(),
        };
        let (cert, key) = source.load().await.unwrap();
        assert_eq!(cert, b"CERT");
        assert_eq!(key, b"KEY");
    }

    #[test]
    fn deserializes_with_defaults() {
        let options: ClientOptions = serde_json::from_str(
            r#"{ "api_endpoint": "localhost:8080", "client_cert_source": { "cert": "/c.pem", "key": "/k.pem" } }"#,
        )
        .unwrap();
        assert_eq!(options.api_endpoint.as_deref(), Some("localhost:8080"));
        assert!(options.scopes.is_empty());
        assert_eq!(
            options.client_cert_source,
            Some(ClientCertSource::Files {
                cert: "/c.pem".into(),
                key: "/k.pem".into()
            })
        );

        assert!(serde_json::from_str::<ClientOptions>(r#"{ "bogus": 1 }"#).is_err());
    }
}
