#![cfg_attr(test, allow(warnings))]

//! Async client for the streaming speech translation service.

pub mod audio_stream;
pub mod client;
pub mod client_info;
pub mod client_options;
pub mod credentials;
pub mod error;
pub mod grpc;
pub mod method;
pub mod mtls;
pub mod retry;
pub mod session;
pub mod transport;
pub mod translate_stream;

#[cfg(test)]
mod testing;

pub use client::{SpeechTranslationServiceAsyncClient, TransportChoice};
pub use client_options::{ClientCertSource, ClientOptions};
pub use credentials::Credentials;
pub use error::Error;
pub use method::CallOptions;
pub use retry::{Retry, Setting};
pub use session::{TranslationEvent, TranslationSession, TranslationStream};
