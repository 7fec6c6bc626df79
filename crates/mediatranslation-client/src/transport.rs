use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use tonic::codegen::http::uri::Authority;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::client_info::ClientInfo;
use crate::client_options::ClientCertSource;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::grpc::{
    SpeechTranslationServiceStub, StreamingTranslateSpeechRequest,
    StreamingTranslateSpeechResponse,
};
use crate::mtls;

pub type RequestStream = Pin<Box<dyn Stream<Item = StreamingTranslateSpeechRequest> + Send>>;

/// Audience of self-signed service account tokens.
pub const AUDIENCE: &str = "https://mediatranslation.googleapis.com/";

const AUTHORIZATION: &str = "authorization";
const USER_PROJECT_HEADER: &str = "x-goog-user-project";
const DEFAULT_PORT: u16 = 443;

/// Carries calls of the speech translation service.
#[tonic::async_trait]
pub trait SpeechTranslationServiceTransport: Send + Sync + fmt::Debug {
    fn host(&self) -> &str;

    async fn streaming_translate_speech(
        &self,
        request: Request<RequestStream>,
    ) -> Result<Response<Streaming<StreamingTranslateSpeechResponse>>, Status>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Grpc,
}

/// Transport labels in lookup order; the first one is the default.
const TRANSPORT_REGISTRY: &[(&str, TransportKind)] = &[
    ("grpc_asyncio", TransportKind::Grpc),
    ("grpc", TransportKind::Grpc),
];

pub const DEFAULT_TRANSPORT: &str = TRANSPORT_REGISTRY[0].0;

/// Resolves a transport label, or the default one when `label` is `None`.
pub fn get_transport_class(label: Option<&str>) -> Result<TransportKind> {
    let Some(label) = label else {
        return Ok(TRANSPORT_REGISTRY[0].1);
    };
    TRANSPORT_REGISTRY
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| Error::UnknownTransport(label.to_string()))
}

impl TransportKind {
    pub async fn build(
        self,
        config: TransportConfig,
    ) -> Result<Arc<dyn SpeechTranslationServiceTransport>> {
        match self {
            Self::Grpc => Ok(Arc::new(GrpcTransport::new(config).await?)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub credentials: Credentials,
    pub client_cert_source: Option<ClientCertSource>,
    pub quota_project_id: Option<String>,
    pub client_info: ClientInfo,
}

impl TransportConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            credentials: Credentials::Anonymous,
            client_cert_source: None,
            quota_project_id: None,
            client_info: ClientInfo::default(),
        }
    }
}

/// Where and how to dial an endpoint given as `host`, `host:port` or a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub uri: String,
    pub domain: String,
    pub tls: bool,
}

impl Target {
    pub(crate) fn parse(endpoint: &str) -> Result<Self> {
        let (tls, rest) = match endpoint.strip_prefix("http://") {
            Some(rest) => (false, rest),
            None => (true, endpoint.strip_prefix("https://").unwrap_or(endpoint)),
        };
        let authority: Authority = rest
            .split('/')
            .next()
            .unwrap_or(rest)
            .parse()
            .map_err(|e| Error::InvalidArgument(format!("invalid endpoint `{endpoint}`: {e}")))?;
        // IPv6 literals keep their brackets in the authority but not in SNI.
        let domain = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let uri = if !tls {
            endpoint.to_string()
        } else if authority.port_u16().is_some() {
            format!("https://{authority}")
        } else {
            format!("https://{authority}:{DEFAULT_PORT}")
        };
        Ok(Self { uri, domain, tls })
    }
}

/// The gRPC transport backed by a lazily connected tonic channel.
#[derive(Clone)]
pub struct GrpcTransport {
    host: String,
    stub: SpeechTranslationServiceStub<Channel>,
    credentials: Credentials,
    quota_project_id: Option<String>,
}

impl fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("host", &self.host)
            .field("credentials", &self.credentials)
            .field("quota_project_id", &self.quota_project_id)
            .finish_non_exhaustive()
    }
}

impl GrpcTransport {
    pub async fn new(config: TransportConfig) -> Result<Self> {
        let target = Target::parse(&config.host)?;

        let mut endpoint = Endpoint::from_shared(target.uri.clone())?
            .user_agent(config.client_info.to_user_agent())?;

        if target.tls {
            let mut tls = ClientTlsConfig::new()
                .with_native_roots()
                .domain_name(target.domain.clone());
            if let Some((cert, key)) = client_identity(&config, &target).await? {
                tls = tls.identity(Identity::from_pem(cert, key));
            }
            endpoint = endpoint.tls_config(tls)?;
        }

        info!("speech translation transport for {}", &target.uri);
        Ok(Self {
            host: target.uri,
            stub: SpeechTranslationServiceStub::new(endpoint.connect_lazy()),
            credentials: config.credentials,
            quota_project_id: config.quota_project_id,
        })
    }

    /// Uses a caller-built channel. No credentials are attached to calls.
    #[must_use]
    pub fn from_channel(channel: Channel, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stub: SpeechTranslationServiceStub::new(channel),
            credentials: Credentials::Anonymous,
            quota_project_id: None,
        }
    }

    fn authorize<T>(&self, request: &mut Request<T>) -> Result<(), Status> {
        let token = self
            .credentials
            .bearer_token(AUDIENCE)
            .map_err(|e| Status::unauthenticated(e.to_string()))?;
        let metadata = request.metadata_mut();
        if let Some(token) = token {
            let value = AsciiMetadataValue::try_from(format!("Bearer {token}"))
                .map_err(|_| Status::unauthenticated("invalid header value for `authorization`"))?;
            metadata.insert(AUTHORIZATION, value);
        }
        if let Some(project) = &self.quota_project_id {
            let value = AsciiMetadataValue::try_from(project.as_str()).map_err(|_| {
                Status::invalid_argument(format!("invalid header value for `{USER_PROJECT_HEADER}`"))
            })?;
            metadata.insert(USER_PROJECT_HEADER, value);
        }
        Ok(())
    }
}

async fn client_identity(
    config: &TransportConfig,
    target: &Target,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    if let Some(source) = &config.client_cert_source {
        debug!("using configured client certificate");
        return source.load().await.map(Some);
    }
    if target.domain.contains(".mtls.") && mtls::has_default_client_cert_source() {
        debug!("using default client certificate");
        return mtls::default_client_cert_source().await.map(Some);
    }
    Ok(None)
}

#[tonic::async_trait]
impl SpeechTranslationServiceTransport for GrpcTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn streaming_translate_speech(
        &self,
        mut request: Request<RequestStream>,
    ) -> Result<Response<Streaming<StreamingTranslateSpeechResponse>>, Status> {
        self.authorize(&mut request)?;
        let mut stub = self.stub.clone();
        stub.streaming_translate_speech(request.map(ConcreteRequestStream))
            .await
    }
}

/// Names the boxed request stream as a concrete type. Passing the
/// `dyn Stream` straight to the generated stub trips a rustc
/// higher-ranked lifetime error when proving the call future `Send`.
struct ConcreteRequestStream(RequestStream);

impl Stream for ConcreteRequestStream {
    type Item = StreamingTranslateSpeechRequest;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.0.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}
