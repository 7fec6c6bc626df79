#[allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
pub mod proto {
    pub mod google {
        pub mod rpc {
            tonic::include_proto!("google.rpc");
        }

        pub mod cloud {
            pub mod mediatranslation {
                pub mod v1alpha1 {
                    tonic::include_proto!("google.cloud.mediatranslation.v1alpha1");
                }
            }
        }
    }
}

use tokio_util::bytes::Bytes;

pub use proto::google::cloud::mediatranslation::v1alpha1::speech_translation_service_client::SpeechTranslationServiceClient as SpeechTranslationServiceStub;
pub use proto::google::cloud::mediatranslation::v1alpha1::speech_translation_service_server::{
    SpeechTranslationService, SpeechTranslationServiceServer,
};
pub use proto::google::cloud::mediatranslation::v1alpha1::streaming_translate_speech_request::StreamingRequest;
pub use proto::google::cloud::mediatranslation::v1alpha1::streaming_translate_speech_response::SpeechEventType;
pub use proto::google::cloud::mediatranslation::v1alpha1::streaming_translate_speech_result::{
    Result as TranslateResult, TextTranslationResult,
};
pub use proto::google::cloud::mediatranslation::v1alpha1::{
    StreamingTranslateSpeechConfig, StreamingTranslateSpeechRequest,
    StreamingTranslateSpeechResponse, StreamingTranslateSpeechResult, TranslateSpeechConfig,
};
pub use proto::google::rpc::Status as RpcStatus;

impl StreamingTranslateSpeechRequest {
    /// The opening message of a call.
    #[must_use]
    pub const fn config(config: StreamingTranslateSpeechConfig) -> Self {
        Self {
            streaming_request: Some(StreamingRequest::StreamingConfig(config)),
        }
    }

    #[must_use]
    pub fn audio(chunk: Bytes) -> Self {
        Self {
            streaming_request: Some(StreamingRequest::AudioContent(chunk.to_vec())),
        }
    }

    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self.streaming_request,
            Some(StreamingRequest::StreamingConfig(_))
        )
    }

    #[must_use]
    pub const fn is_audio(&self) -> bool {
        matches!(self.streaming_request, Some(StreamingRequest::AudioContent(_)))
    }
}

impl StreamingTranslateSpeechResponse {
    /// The text translation carried by this response, if any.
    #[must_use]
    pub fn text_translation(&self) -> Option<&TextTranslationResult> {
        match self.result.as_ref()?.result.as_ref()? {
            TranslateResult::TextTranslationResult(text) => Some(text),
        }
    }

    /// The embedded service error, if it carries a non-OK code.
    #[must_use]
    pub fn service_error(&self) -> Option<&RpcStatus> {
        self.error.as_ref().filter(|status| status.code != 0)
    }
}
