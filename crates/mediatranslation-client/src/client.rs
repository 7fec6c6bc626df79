use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError};

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::client_info::ClientInfo;
use crate::client_options::ClientOptions;
use crate::credentials::{CREDENTIALS_ENV, Credentials, ServiceAccountCredentials, ServiceAccountKey};
use crate::error::{Error, Result};
use crate::grpc::StreamingTranslateSpeechRequest;
use crate::method::{CallOptions, MethodDefaults, wrap_method};
use crate::mtls::{self, UseMtls};
use crate::transport::{
    self, DEFAULT_TRANSPORT, RequestStream, SpeechTranslationServiceTransport, TransportConfig,
    TransportKind,
};
use crate::translate_stream::{TranslateSpeechStream, ViolationSlot};

/// Which transport the client should use.
#[derive(Clone)]
pub enum TransportChoice {
    /// A registered transport label; `None` picks the default.
    Named(Option<String>),
    /// A ready transport. Credentials and scopes must then be configured on it.
    Instance(Arc<dyn SpeechTranslationServiceTransport>),
}

impl Default for TransportChoice {
    fn default() -> Self {
        Self::Named(Some(DEFAULT_TRANSPORT.to_string()))
    }
}

impl fmt::Debug for TransportChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(label) => f.debug_tuple("Named").field(label).finish(),
            Self::Instance(transport) => f.debug_tuple("Instance").field(transport).finish(),
        }
    }
}

impl From<&str> for TransportChoice {
    fn from(label: &str) -> Self {
        Self::Named(Some(label.to_string()))
    }
}

impl From<Arc<dyn SpeechTranslationServiceTransport>> for TransportChoice {
    fn from(transport: Arc<dyn SpeechTranslationServiceTransport>) -> Self {
        Self::Instance(transport)
    }
}

/// Provides translation from/to media types.
#[derive(Debug, Clone)]
pub struct SpeechTranslationServiceAsyncClient {
    transport: Arc<dyn SpeechTranslationServiceTransport>,
    client_info: ClientInfo,
}

impl SpeechTranslationServiceAsyncClient {
    pub const DEFAULT_ENDPOINT: &'static str = mtls::DEFAULT_ENDPOINT;
    pub const DEFAULT_MTLS_ENDPOINT: &'static str = mtls::DEFAULT_MTLS_ENDPOINT;

    /// Instantiates the speech translation service client.
    ///
    /// Without `client_options.api_endpoint` the endpoint is chosen from the
    /// `GOOGLE_API_USE_MTLS` environment variable: `never` (default) picks
    /// the regular endpoint, `always` the mTLS one, and `auto` the mTLS one
    /// only when a client certificate is available.
    ///
    /// Without explicit credentials, `client_options.credentials_file` or the
    /// file named by `GOOGLE_APPLICATION_CREDENTIALS` is used. Plaintext
    /// `http://` endpoints fall back to anonymous calls.
    pub async fn new(
        credentials: Option<Credentials>,
        transport: TransportChoice,
        client_options: Option<ClientOptions>,
    ) -> Result<Self> {
        let options = client_options.unwrap_or_default();
        let client_info = ClientInfo::default();

        let api_endpoint = match &options.api_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let use_mtls = UseMtls::from_env()?;
                let has_client_cert = use_mtls == UseMtls::Auto
                    && (options.client_cert_source.is_some()
                        || mtls::has_default_client_cert_source());
                mtls::select_endpoint(use_mtls, has_client_cert).to_string()
            }
        };

        let transport = match transport {
            TransportChoice::Instance(transport) => {
                if credentials.is_some() || options.credentials_file.is_some() {
                    return Err(Error::InvalidArgument(
                        "When providing a transport instance, provide its credentials directly."
                            .to_string(),
                    ));
                }
                if !options.scopes.is_empty() {
                    return Err(Error::InvalidArgument(
                        "When providing a transport instance, provide its scopes directly."
                            .to_string(),
                    ));
                }
                transport
            }
            TransportChoice::Named(label) => {
                let kind = Self::get_transport_class(label.as_deref())?;
                let credentials =
                    resolve_credentials(credentials, &options, &api_endpoint).await?;
                info!("using endpoint {api_endpoint} with {credentials:?}");
                kind.build(TransportConfig {
                    host: api_endpoint,
                    credentials,
                    client_cert_source: options.client_cert_source,
                    quota_project_id: options.quota_project_id,
                    client_info: client_info.clone(),
                })
                .await?
            }
        };

        Ok(Self {
            transport,
            client_info,
        })
    }

    /// Creates a client authenticated with a service account key file.
    pub async fn from_service_account_file(
        filename: impl AsRef<Path>,
        transport: TransportChoice,
        client_options: Option<ClientOptions>,
    ) -> Result<Self> {
        let credentials = Credentials::from_service_account_file(filename).await?;
        Self::new(Some(credentials), transport, client_options).await
    }

    /// Alias of [`Self::from_service_account_file`].
    pub async fn from_service_account_json(
        filename: impl AsRef<Path>,
        transport: TransportChoice,
        client_options: Option<ClientOptions>,
    ) -> Result<Self> {
        Self::from_service_account_file(filename, transport, client_options).await
    }

    pub fn get_transport_class(label: Option<&str>) -> Result<TransportKind> {
        transport::get_transport_class(label)
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn SpeechTranslationServiceTransport> {
        &self.transport
    }

    #[must_use]
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    /// Performs bidirectional streaming speech translation: receive results
    /// while sending audio.
    ///
    /// The first request must carry a `streaming_config` and no audio; every
    /// following request must carry `audio_content` only.
    pub async fn streaming_translate_speech<S>(
        &self,
        requests: S,
        options: CallOptions,
    ) -> Result<TranslateSpeechStream>
    where
        S: Stream<Item = StreamingTranslateSpeechRequest> + Send + 'static,
    {
        let mut requests: RequestStream = Box::pin(requests);
        let first = requests
            .next()
            .await
            .ok_or_else(|| Error::InvalidRequest("request stream is empty".to_string()))?;
        if !first.is_config() {
            return Err(Error::InvalidRequest(
                "the first request must carry streaming_config and no audio_content".to_string(),
            ));
        }

        let violation = ViolationSlot::default();
        let outbound = enforce_request_order(first, requests, violation.clone());

        let rpc = wrap_method(
            MethodDefaults {
                retry: None,
                timeout: None,
            },
            self.client_info.clone(),
        );
        let inbound = rpc
            .call_streaming(self.transport.as_ref(), outbound, &options)
            .await?;
        debug!("streaming_translate_speech established");

        Ok(TranslateSpeechStream::new(Box::pin(inbound), violation))
    }
}

async fn resolve_credentials(
    credentials: Option<Credentials>,
    options: &ClientOptions,
    api_endpoint: &str,
) -> Result<Credentials> {
    let load = |key: ServiceAccountKey| {
        let sa = ServiceAccountCredentials::new(key).with_scopes(options.scopes.clone());
        Credentials::ServiceAccount(Arc::new(sa))
    };
    match (credentials, &options.credentials_file) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument(
            "'credentials_file' and 'credentials' are mutually exclusive".to_string(),
        )),
        (Some(credentials), None) => Ok(credentials),
        (None, Some(path)) => Ok(load(ServiceAccountKey::from_file(path).await?)),
        (None, None) => match std::env::var_os(CREDENTIALS_ENV) {
            Some(path) => Ok(load(ServiceAccountKey::from_file(path).await?)),
            None if api_endpoint.starts_with("http://") => Ok(Credentials::Anonymous),
            None => Err(Error::Credentials(
                "could not find default credentials".to_string(),
            )),
        },
    }
}

/// Forwards `rest` after `first` until a request other than audio shows up.
fn enforce_request_order(
    first: StreamingTranslateSpeechRequest,
    mut rest: RequestStream,
    violation: ViolationSlot,
) -> RequestStream {
    Box::pin(stream! {
        yield first;
        let mut index = 1_usize;
        while let Some(request) = rest.next().await {
            if !request.is_audio() {
                let message = format!("request {index} must carry audio_content and no streaming_config");
                error!("{message}");
                violation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(message);
                break;
            }
            index += 1;
            yield request;
        }
    })
}
