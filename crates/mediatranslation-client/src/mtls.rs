//! Endpoint selection and client certificate discovery for mutual TLS.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "mediatranslation.googleapis.com";
pub const DEFAULT_MTLS_ENDPOINT: &str = "mediatranslation.mtls.googleapis.com";

pub const USE_MTLS_ENV: &str = "GOOGLE_API_USE_MTLS";

const GOOGLE_DOMAIN: &str = ".googleapis.com";
const SANDBOX_DOMAIN: &str = "sandbox.googleapis.com";

/// Converts an API endpoint into its mTLS counterpart.
///
/// `foo.googleapis.com` becomes `foo.mtls.googleapis.com` and
/// `foo.sandbox.googleapis.com` becomes `foo.mtls.sandbox.googleapis.com`.
/// Endpoints that are already mTLS or live outside `googleapis.com` are
/// returned as is.
#[must_use]
pub fn default_mtls_endpoint(api_endpoint: &str) -> String {
    let Some(dot) = api_endpoint.find('.') else {
        return api_endpoint.to_string();
    };
    let mut rest = &api_endpoint[dot..];

    let is_mtls = rest.starts_with(".mtls");
    if let Some(stripped) = rest.strip_prefix(".mtls") {
        rest = stripped;
    }
    let is_sandbox = rest.starts_with(".sandbox");
    if let Some(stripped) = rest.strip_prefix(".sandbox") {
        rest = stripped;
    }
    let is_google_domain = rest.starts_with(GOOGLE_DOMAIN);

    if is_mtls || !is_google_domain {
        return api_endpoint.to_string();
    }
    if is_sandbox {
        return api_endpoint.replacen(SANDBOX_DOMAIN, "mtls.sandbox.googleapis.com", 1);
    }
    api_endpoint.replacen(GOOGLE_DOMAIN, ".mtls.googleapis.com", 1)
}

/// Value of the `GOOGLE_API_USE_MTLS` environment variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UseMtls {
    #[default]
    Never,
    Always,
    Auto,
}

impl FromStr for UseMtls {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "auto" => Ok(Self::Auto),
            _ => Err(Error::MutualTls(
                "Unsupported GOOGLE_API_USE_MTLS value. Accepted values: never, auto, always"
                    .to_string(),
            )),
        }
    }
}

impl UseMtls {
    pub fn from_env() -> Result<Self> {
        match std::env::var(USE_MTLS_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Picks the endpoint to talk to when none was configured explicitly.
#[must_use]
pub fn select_endpoint(use_mtls: UseMtls, has_client_cert_source: bool) -> &'static str {
    match use_mtls {
        UseMtls::Never => DEFAULT_ENDPOINT,
        UseMtls::Always => DEFAULT_MTLS_ENDPOINT,
        UseMtls::Auto if has_client_cert_source => DEFAULT_MTLS_ENDPOINT,
        UseMtls::Auto => DEFAULT_ENDPOINT,
    }
}

#[derive(Debug, Deserialize)]
struct ContextAwareMetadata {
    cert_provider_command: Option<Vec<String>>,
}

fn context_aware_metadata_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let mut path = PathBuf::from(home);
    path.push(".secureConnect");
    path.push("context_aware_metadata.json");
    Some(path)
}

/// Whether the machine provides a default client certificate.
#[must_use]
pub fn has_default_client_cert_source() -> bool {
    context_aware_metadata_path().is_some_and(|path| path.exists())
}

/// Runs the configured certificate provider and returns `(cert, key)` in PEM.
pub async fn default_client_cert_source() -> Result<(Vec<u8>, Vec<u8>)> {
    let path = context_aware_metadata_path()
        .filter(|path| path.exists())
        .ok_or_else(|| Error::MutualTls("no default client certificate source".to_string()))?;
    client_cert_from_metadata(&path).await
}

/// Runs the `cert_provider_command` named in the metadata file at `path`.
pub(crate) async fn client_cert_from_metadata(path: &Path) -> Result<(Vec<u8>, Vec<u8>)> {
    let data = tokio::fs::read_to_string(path).await?;
    let metadata: ContextAwareMetadata = serde_json::from_str(&data)?;
    let command = metadata
        .cert_provider_command
        .filter(|command| !command.is_empty())
        .ok_or_else(|| Error::MutualTls("cert_provider_command is missing".to_string()))?;

    debug!("running cert provider: {:?}", &command);
    let output = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::MutualTls(format!(
            "cert provider exited with status: {}",
            output.status
        )));
    }
    info!("loaded default client certificate");
    split_cert_and_key(&output.stdout)
}

/// Extracts the first certificate and private key PEM blocks from `pem`.
pub(crate) fn split_cert_and_key(pem: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let text = String::from_utf8_lossy(pem);
    let cert = pem_block(&text, "-----BEGIN CERTIFICATE-----", "-----END CERTIFICATE-----")
        .ok_or_else(|| Error::MutualTls("client certificate is missing".to_string()))?;
    let key = private_key_block(&text)
        .ok_or_else(|| Error::MutualTls("client private key is missing".to_string()))?;
    Ok((cert.into_bytes(), key.into_bytes()))
}

fn pem_block(text: &str, begin: &str, end: &str) -> Option<String> {
    let start = text.find(begin)?;
    let stop = text[start..].find(end)? + start + end.len();
    Some(format!("{}\n", &text[start..stop]))
}

fn private_key_block(text: &str) -> Option<String> {
    // Matches PRIVATE KEY, RSA PRIVATE KEY and EC PRIVATE KEY blocks.
    for (from, _) in text.match_indices("-----BEGIN ") {
        let line_end = text[from..].find('\n').map_or(text.len(), |i| from + i);
        let header = text[from..line_end].trim_end();
        if !header.ends_with("PRIVATE KEY-----") {
            continue;
        }
        let label = &header["-----BEGIN ".len()..header.len() - "-----".len()];
        let end = format!("-----END {label}-----");
        return pem_block(&text[from..], header, &end);
    }
    None
}
