//! Translating a live audio stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::audio_stream::AudioStream;
use crate::client::SpeechTranslationServiceAsyncClient;
use crate::error::{Error, Result};
use crate::grpc::{
    SpeechEventType, StreamingTranslateSpeechConfig, StreamingTranslateSpeechRequest,
    StreamingTranslateSpeechResponse,
};
use crate::method::CallOptions;
use crate::translate_stream::TranslateSpeechStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationEvent {
    Translation { text: String, is_final: bool },
    EndOfSingleUtterance,
}

impl TranslationEvent {
    /// Events carried by one response, or the service error it reports.
    pub fn from_response(response: StreamingTranslateSpeechResponse) -> Result<Vec<Self>> {
        if let Some(status) = response.service_error() {
            return Err(Error::Service {
                code: status.code,
                message: status.message.clone(),
            });
        }
        let mut events = Vec::new();
        if let Some(text) = response.text_translation() {
            events.push(Self::Translation {
                text: text.translation.clone(),
                is_final: text.is_final,
            });
        }
        if response.speech_event_type() == SpeechEventType::EndOfSingleUtterance {
            events.push(Self::EndOfSingleUtterance);
        }
        Ok(events)
    }
}

/// One translation call fed from an audio source.
#[derive(Debug)]
pub struct TranslationSession {
    config: StreamingTranslateSpeechConfig,
    cancellation: CancellationToken,
}

impl TranslationSession {
    #[must_use]
    pub fn new(config: StreamingTranslateSpeechConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Token to hand to the audio capture so it stops with the session.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn run(
        self,
        client: &SpeechTranslationServiceAsyncClient,
        audio_stream: AudioStream,
        options: CallOptions,
    ) -> Result<TranslationStream> {
        info!("starting translation session");
        let requests = requests(self.config, audio_stream, self.cancellation.clone());
        let inner = match client.streaming_translate_speech(requests, options).await {
            Ok(inner) => inner,
            Err(e) => {
                self.cancellation.cancel();
                return Err(e);
            }
        };
        Ok(TranslationStream {
            inner,
            cancellation: self.cancellation,
            pending: VecDeque::new(),
            done: false,
        })
    }
}

fn requests(
    config: StreamingTranslateSpeechConfig,
    mut audio_stream: AudioStream,
    cancellation: CancellationToken,
) -> impl Stream<Item = StreamingTranslateSpeechRequest> + Send + 'static {
    stream! {
        yield StreamingTranslateSpeechRequest::config(config);
        loop {
            select! {
                () = cancellation.cancelled() => {
                    debug!("session cancelled, closing audio");
                    break;
                }
                chunk = audio_stream.next() => {
                    match chunk {
                        Some(Ok(chunk)) if chunk.is_empty() => continue,
                        Some(Ok(chunk)) => {
                            trace!("sending {} bytes of audio", chunk.len());
                            yield StreamingTranslateSpeechRequest::audio(chunk);
                        }
                        Some(Err(err)) => {
                            error!("audio error: {err:?}");
                            break;
                        }
                        None => {
                            info!("audio stream finished");
                            break;
                        }
                    }
                }
            }
        }
    }
}

pin_project! {
    /// Translation events of a running session. Dropping it stops the audio.
    pub struct TranslationStream {
        #[pin]
        inner: TranslateSpeechStream,
        cancellation: CancellationToken,
        pending: VecDeque<TranslationEvent>,
        done: bool,
    }

    impl PinnedDrop for TranslationStream {
        fn drop(this: Pin<&mut Self>) {
            this.project().cancellation.cancel();
        }
    }
}

impl Stream for TranslationStream {
    type Item = Result<TranslationEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.done {
                return Poll::Ready(None);
            }
            let item = ready!(this.inner.as_mut().poll_next(cx));
            let events = match item {
                Some(Ok(response)) => TranslationEvent::from_response(response),
                Some(Err(err)) => Err(err),
                None => {
                    *this.done = true;
                    this.cancellation.cancel();
                    continue;
                }
            };
            match events {
                Ok(events) => this.pending.extend(events),
                Err(err) => {
                    *this.done = true;
                    this.cancellation.cancel();
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use futures_util::stream;
    use tokio_util::bytes::Bytes;

    use super::*;
    use crate::client::TransportChoice;
    use crate::client_options::ClientOptions;
    use crate::credentials::Credentials;
    use crate::grpc::RpcStatus;
    use crate::testing::{FakeTranslationService, spawn_server, streaming_config, translation};

    async fn client(service: FakeTranslationService) -> SpeechTranslationServiceAsyncClient {
        let endpoint = spawn_server(service).await;
        SpeechTranslationServiceAsyncClient::new(
            Some(Credentials::Anonymous),
            TransportChoice::default(),
            Some(ClientOptions::default().with_api_endpoint(endpoint)),
        )
        .await
        .unwrap()
    }

    fn chunks(chunks: Vec<io::Result<Bytes>>) -> AudioStream {
        AudioStream::new(stream::iter(chunks))
    }

    #[test]
    fn responses_map_to_events() {
        let events = TranslationEvent::from_response(translation("hola", false)).unwrap();
        assert_eq!(
            events,
            vec![TranslationEvent::Translation {
                text: "hola".to_string(),
                is_final: false
            }]
        );

        let end = StreamingTranslateSpeechResponse {
            speech_event_type: SpeechEventType::EndOfSingleUtterance as i32,
            ..Default::default()
        };
        assert_eq!(
            TranslationEvent::from_response(end).unwrap(),
            vec![TranslationEvent::EndOfSingleUtterance]
        );

        let failed = StreamingTranslateSpeechResponse {
            error: Some(RpcStatus {
                code: 11,
                message: "audio too long".to_string(),
                details: vec![],
            }),
            ..Default::default()
        };
        let Err(Error::Service { code, message }) = TranslationEvent::from_response(failed) else {
            panic!("must fail")
        };
        assert_eq!(code, 11);
        assert_eq!(message, "audio too long");
    }

    #[tokio::test]
    async fn requests_start_with_config_and_skip_empty_chunks() {
        let audio = chunks(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"c")),
            Err(io::Error::other("mic unplugged")),
            Ok(Bytes::from_static(b"never sent")),
        ]);
        let sent: Vec<_> = requests(streaming_config(false), audio, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(sent.len(), 3);
        assert!(sent[0].is_config());
        assert!(sent[1..].iter().all(StreamingTranslateSpeechRequest::is_audio));
    }

    #[tokio::test]
    async fn cancellation_closes_the_request_stream() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let audio = AudioStream::new(stream::pending());
        let sent: Vec<_> = requests(streaming_config(false), audio, cancellation)
            .collect()
            .await;
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn session_yields_translations_and_utterance_end() {
        let client = client(FakeTranslationService::default()).await;
        let session = TranslationSession::new(streaming_config(true));
        let token = session.cancellation_token();
        let audio = chunks(vec![
            Ok(Bytes::from_static(b"1234")),
            Ok(Bytes::from_static(b"56")),
        ]);

        let events: Vec<_> = session
            .run(&client, audio, CallOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();

        assert_eq!(
            events,
            vec![
                TranslationEvent::Translation {
                    text: "4".to_string(),
                    is_final: false
                },
                TranslationEvent::Translation {
                    text: "6".to_string(),
                    is_final: false
                },
                TranslationEvent::Translation {
                    text: "total 6".to_string(),
                    is_final: true
                },
                TranslationEvent::EndOfSingleUtterance,
            ]
        );
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn embedded_service_error_ends_the_session() {
        let client = client(FakeTranslationService {
            embedded_error: Some((3, "unsupported language".to_string())),
            ..Default::default()
        })
        .await;
        let session = TranslationSession::new(streaming_config(false));
        let audio = AudioStream::new(stream::pending());

        let mut events = session
            .run(&client, audio, CallOptions::default().with_timeout(Duration::from_secs(10)))
            .await
            .unwrap();
        let Some(Err(Error::Service { code, message })) = events.next().await else {
            panic!("expected a service error")
        };
        assert_eq!(code, 3);
        assert_eq!(message, "unsupported language");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_capture() {
        let client = client(FakeTranslationService::default()).await;
        let session = TranslationSession::new(streaming_config(false));
        let token = session.cancellation_token();
        let events = session
            .run(&client, AudioStream::new(stream::pending()), CallOptions::default())
            .await
            .unwrap();
        assert!(!token.is_cancelled());
        drop(events);
        assert!(token.is_cancelled());
    }
}
