use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A status returned by the transport or the remote service.
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// An error embedded in a response message by the service.
    #[error("service error {code}: {message}")]
    Service { code: i32, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("unknown transport `{0}`")]
    UnknownTransport(String),

    #[error("mutual TLS channel error: {0}")]
    MutualTls(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid metadata `{0}`")]
    InvalidMetadata(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// The gRPC code when this error came from the remote side.
    #[must_use]
    pub fn code(&self) -> Option<tonic::Code> {
        match self {
            Self::Status(status) => Some(status.code()),
            Self::Service { code, .. } => Some(tonic::Code::from_i32(*code)),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
