use tonic::metadata::{AsciiMetadataValue, MetadataMap};

use crate::error::{Error, Result};

pub const API_CLIENT_HEADER: &str = "x-goog-api-client";

/// Identifies this library to the service in request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub rust_version: String,
    pub grpc_version: String,
    pub gapic_version: String,
    pub client_library_version: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            grpc_version: "tonic".to_string(),
            gapic_version: env!("CARGO_PKG_VERSION").to_string(),
            client_library_version: None,
            user_agent: None,
        }
    }
}

impl ClientInfo {
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// The `x-goog-api-client` header value.
    #[must_use]
    pub fn to_user_agent(&self) -> String {
        let mut parts = Vec::new();
        if let Some(user_agent) = self.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
            parts.push(user_agent.to_string());
        }
        if !self.rust_version.is_empty() {
            parts.push(format!("gl-rust/{}", self.rust_version));
        }
        if !self.grpc_version.is_empty() {
            parts.push(format!("grpc/{}", self.grpc_version));
        }
        if !self.gapic_version.is_empty() {
            parts.push(format!("gapic/{}", self.gapic_version));
        }
        if let Some(version) = self.client_library_version.as_deref().filter(|v| !v.is_empty()) {
            parts.push(format!("gccl/{version}"));
        }
        parts.join(" ")
    }

    pub fn apply(&self, metadata: &mut MetadataMap) -> Result<()> {
        let value = AsciiMetadataValue::try_from(self.to_user_agent())
            .map_err(|_| Error::InvalidMetadata(API_CLIENT_HEADER.to_string()))?;
        metadata.insert(API_CLIENT_HEADER, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_mentions_library_versions() {
        let header = ClientInfo::default().to_user_agent();
        assert!(header.contains("grpc/tonic"));
        assert!(header.contains(&format!("gapic/{}", env!("CARGO_PKG_VERSION"))));
        assert!(!header.starts_with(' '));
    }

    #[test]
    fn empty_parts_are_skipped() {
        let info = ClientInfo {
            rust_version: String::new(),
            grpc_version: String::new(),
            gapic_version: "1.2.3".to_string(),
            client_library_version: Some("0.4.0".to_string()),
            user_agent: Some("my-app/1.0".to_string()),
        };
        assert_eq!(info.to_user_agent(), "my-app/1.0 gapic/1.2.3 gccl/0.4.0");
    }

    #[test]
    fn header_is_written_into_metadata() {
        let mut metadata = MetadataMap::new();
        ClientInfo::default()
            .with_user_agent("tester")
            .apply(&mut metadata)
            .unwrap();
        let value = metadata.get(API_CLIENT_HEADER).unwrap().to_str().unwrap();
        assert!(value.starts_with("tester gl-rust/"));
    }
}
