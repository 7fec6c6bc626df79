//! In-process fake of the translation service.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use crate::grpc::{
    RpcStatus, SpeechEventType, SpeechTranslationService, SpeechTranslationServiceServer,
    StreamingRequest, StreamingTranslateSpeechConfig, StreamingTranslateSpeechRequest,
    StreamingTranslateSpeechResponse, StreamingTranslateSpeechResult, TextTranslationResult,
    TranslateResult, TranslateSpeechConfig,
};

/// Answers every audio chunk with the running byte count as an interim
/// translation, and the total as a final one once the client half-closes.
#[derive(Clone, Default)]
pub(crate) struct FakeTranslationService {
    pub unavailable_attempts: Arc<AtomicUsize>,
    pub delay: Option<Duration>,
    pub embedded_error: Option<(i32, String)>,
    pub seen_metadata: Arc<Mutex<Vec<MetadataMap>>>,
    pub calls: Arc<AtomicUsize>,
}

pub(crate) fn translation(text: &str, is_final: bool) -> StreamingTranslateSpeechResponse {
    StreamingTranslateSpeechResponse {
        result: Some(StreamingTranslateSpeechResult {
            result: Some(TranslateResult::TextTranslationResult(
                TextTranslationResult {
                    translation: text.to_string(),
                    is_final,
                },
            )),
        }),
        ..Default::default()
    }
}

pub(crate) fn streaming_config(single_utterance: bool) -> StreamingTranslateSpeechConfig {
    StreamingTranslateSpeechConfig {
        audio_config: Some(TranslateSpeechConfig {
            audio_encoding: "linear16".to_string(),
            source_language_code: "en-US".to_string(),
            target_language_code: "fr-FR".to_string(),
            sample_rate_hertz: 16000,
            model: String::new(),
        }),
        single_utterance,
    }
}

#[tonic::async_trait]
impl SpeechTranslationService for FakeTranslationService {
    type StreamingTranslateSpeechStream =
        Pin<Box<dyn Stream<Item = Result<StreamingTranslateSpeechResponse, Status>> + Send>>;

    async fn streaming_translate_speech(
        &self,
        request: Request<Streaming<StreamingTranslateSpeechRequest>>,
    ) -> Result<Response<Self::StreamingTranslateSpeechStream>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_metadata
            .lock()
            .unwrap()
            .push(request.metadata().clone());

        let remaining = self.unavailable_attempts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_attempts.store(remaining - 1, Ordering::SeqCst);
            return Err(Status::unavailable("warming up"));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut inbound = request.into_inner();
        let Some(Ok(first)) = inbound.next().await else {
            return Err(Status::invalid_argument("missing streaming_config"));
        };
        let Some(StreamingRequest::StreamingConfig(config)) = first.streaming_request else {
            return Err(Status::invalid_argument("first request must be streaming_config"));
        };
        let embedded_error = self.embedded_error.clone();

        let output = stream! {
            if let Some((code, message)) = embedded_error {
                yield Ok(StreamingTranslateSpeechResponse {
                    error: Some(RpcStatus { code, message, details: vec![] }),
                    ..Default::default()
                });
                return;
            }
            let mut total = 0_usize;
            while let Some(request) = inbound.next().await {
                match request.map(|r| r.streaming_request) {
                    Ok(Some(StreamingRequest::AudioContent(audio))) => {
                        total += audio.len();
                        yield Ok(translation(&total.to_string(), false));
                    }
                    Ok(_) => {
                        yield Err(Status::invalid_argument("expected audio_content"));
                        return;
                    }
                    Err(_) => return,
                }
            }
            yield Ok(translation(&format!("total {total}"), true));
            if config.single_utterance {
                yield Ok(StreamingTranslateSpeechResponse {
                    speech_event_type: SpeechEventType::EndOfSingleUtterance as i32,
                    ..Default::default()
                });
            }
        };
        Ok(Response::new(Box::pin(output)))
    }
}

/// Serves `service` on an ephemeral port and returns its plaintext endpoint.
pub(crate) async fn spawn_server(service: FakeTranslationService) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(SpeechTranslationServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    format!("http://{addr}")
}
