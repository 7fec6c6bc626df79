//! Retry, deadline and metadata handling around a transport call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use futures_util::StreamExt;
use tokio::time::Instant;
use tonic::metadata::{AsciiMetadataValue, BinaryMetadataValue, MetadataKey, MetadataMap};
use tonic::{Request, Streaming};
use tracing::{debug, warn};

use crate::client_info::ClientInfo;
use crate::error::{Error, Result};
use crate::grpc::{StreamingTranslateSpeechRequest, StreamingTranslateSpeechResponse};
use crate::retry::{Retry, Setting};
use crate::transport::{RequestStream, SpeechTranslationServiceTransport};

/// Defaults a method is wrapped with; calls may override them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodDefaults {
    pub retry: Option<Retry>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub retry: Setting<Retry>,
    pub timeout: Setting<Duration>,
    /// Extra request headers. Keys ending in `-bin` carry binary values.
    pub metadata: Vec<(String, String)>,
}

impl CallOptions {
    #[must_use]
    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = Setting::Set(retry);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Setting::Set(timeout);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct WrappedMethod {
    defaults: MethodDefaults,
    client_info: ClientInfo,
}

#[must_use]
pub const fn wrap_method(defaults: MethodDefaults, client_info: ClientInfo) -> WrappedMethod {
    WrappedMethod {
        defaults,
        client_info,
    }
}

impl WrappedMethod {
    #[must_use]
    pub const fn defaults(&self) -> &MethodDefaults {
        &self.defaults
    }

    pub(crate) fn metadata(&self, extra: &[(String, String)]) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::new();
        self.client_info.apply(&mut metadata)?;
        for (key, value) in extra {
            if key.ends_with("-bin") {
                let key = MetadataKey::from_bytes(key.as_bytes())
                    .map_err(|_| Error::InvalidMetadata(key.clone()))?;
                metadata.append_bin(key, BinaryMetadataValue::from_bytes(value.as_bytes()));
            } else {
                let name = MetadataKey::from_bytes(key.as_bytes())
                    .map_err(|_| Error::InvalidMetadata(key.clone()))?;
                let value = AsciiMetadataValue::try_from(value.as_str())
                    .map_err(|_| Error::InvalidMetadata(key.clone()))?;
                metadata.append(name, value);
            }
        }
        Ok(metadata)
    }

    /// Opens a bidirectional stream through `transport`.
    pub async fn call_streaming(
        &self,
        transport: &dyn SpeechTranslationServiceTransport,
        requests: RequestStream,
        options: &CallOptions,
    ) -> Result<Streaming<StreamingTranslateSpeechResponse>> {
        let retry = options.retry.resolve(self.defaults.retry.as_ref());
        let timeout = options.timeout.resolve(self.defaults.timeout.as_ref());
        let metadata = self.metadata(&options.metadata)?;

        let Some(retry) = retry else {
            let request = build_request(requests, &metadata, timeout);
            let response = transport.streaming_translate_speech(request).await?;
            return Ok(response.into_inner());
        };

        let replay = Arc::new(ReplayableRequests::new(requests));
        // A deadline too far out to represent means retrying without one.
        let deadline = Instant::now().checked_add(retry.deadline);
        let mut backoff = retry.backoff();
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let request = build_request(replay.attempt(), &metadata, timeout);
            match transport.streaming_translate_speech(request).await {
                Ok(response) => {
                    debug!("stream established after {attempt} attempt(s)");
                    replay.commit();
                    return Ok(response.into_inner());
                }
                Err(status) if retry.is_retryable(&status) => {
                    let now = Instant::now();
                    if deadline.is_some_and(|deadline| now >= deadline) {
                        warn!("retry deadline of {:?} exceeded", retry.deadline);
                        return Err(status.into());
                    }
                    let mut sleep = backoff.next().unwrap_or_default();
                    if let Some(deadline) = deadline {
                        sleep = sleep.min(deadline - now);
                    }
                    warn!(
                        code = ?status.code(),
                        message = %status.message(),
                        "attempt {attempt} failed, retrying in {sleep:?}"
                    );
                    tokio::time::sleep(sleep).await;
                }
                Err(status) => return Err(status.into()),
            }
        }
    }
}

fn build_request(
    requests: RequestStream,
    metadata: &MetadataMap,
    timeout: Option<Duration>,
) -> Request<RequestStream> {
    let mut request = Request::new(requests);
    *request.metadata_mut() = metadata.clone();
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}

#[derive(Debug, Default)]
struct ReplayState {
    generation: u64,
    sent: Vec<StreamingTranslateSpeechRequest>,
    pushback: VecDeque<StreamingTranslateSpeechRequest>,
    recording: bool,
    exhausted: bool,
}

/// Shares one caller stream between successive attempts of a call.
///
/// Every request handed to an attempt is recorded until the call is
/// established, and the next attempt starts by replaying them. A request
/// pulled by an attempt that has been superseded goes back to the front.
struct ReplayableRequests {
    source: tokio::sync::Mutex<RequestStream>,
    state: Mutex<ReplayState>,
}

impl ReplayableRequests {
    fn new(source: RequestStream) -> Self {
        Self {
            source: tokio::sync::Mutex::new(source),
            state: Mutex::new(ReplayState {
                recording: true,
                ..ReplayState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attempt(self: &Arc<Self>) -> RequestStream {
        let (generation, replayed) = {
            let mut state = self.state();
            state.generation += 1;
            (state.generation, state.sent.clone())
        };
        let this = Arc::clone(self);
        Box::pin(stream! {
            for request in replayed {
                yield request;
            }
            while let Some(request) = this.take(generation).await {
                yield request;
            }
        })
    }

    /// Stops buffering once the server has accepted the call.
    fn commit(&self) {
        let mut state = self.state();
        state.recording = false;
        state.sent = Vec::new();
    }

    async fn take(&self, generation: u64) -> Option<StreamingTranslateSpeechRequest> {
        let mut source = self.source.lock().await;
        let pending = {
            let mut state = self.state();
            if state.generation != generation {
                return None;
            }
            let pending = state.pushback.pop_front();
            if pending.is_none() && state.exhausted {
                return None;
            }
            pending
        };

        let request = match pending {
            Some(request) => request,
            None => {
                let Some(request) = source.next().await else {
                    self.state().exhausted = true;
                    return None;
                };
                request
            }
        };

        let mut state = self.state();
        if state.generation != generation {
            state.pushback.push_front(request);
            return None;
        }
        if state.recording {
            state.sent.push(request.clone());
        }
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use tokio_util::bytes::Bytes;

    use super::*;
    use crate::grpc::StreamingRequest;

    fn audio(byte: u8) -> StreamingTranslateSpeechRequest {
        StreamingTranslateSpeechRequest::audio(Bytes::copy_from_slice(&[byte]))
    }

    fn payload(request: &StreamingTranslateSpeechRequest) -> u8 {
        match &request.streaming_request {
            Some(StreamingRequest::AudioContent(bytes)) => bytes[0],
            other => panic!("unexpected request: {other:?}"),
        }
    }

    fn source(count: u8) -> RequestStream {
        Box::pin(stream::iter((1..=count).map(audio)))
    }

    #[tokio::test]
    async fn next_attempt_replays_consumed_requests_in_order() {
        let replay = Arc::new(ReplayableRequests::new(source(5)));

        let mut first = replay.attempt();
        assert_eq!(payload(&first.next().await.unwrap()), 1);
        assert_eq!(payload(&first.next().await.unwrap()), 2);

        let second = replay.attempt();
        // The superseded attempt must not consume anything further.
        assert!(first.next().await.is_none());

        let seen: Vec<u8> = second.map(|r| payload(&r)).collect().await;
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn exhausted_source_is_replayed_without_polling_again() {
        let replay = Arc::new(ReplayableRequests::new(source(2)));

        let first: Vec<u8> = replay.attempt().map(|r| payload(&r)).collect().await;
        assert_eq!(first, vec![1, 2]);

        let second: Vec<u8> = replay.attempt().map(|r| payload(&r)).collect().await;
        assert_eq!(second, vec![1, 2]);
    }

    #[tokio::test]
    async fn commit_stops_recording() {
        let replay = Arc::new(ReplayableRequests::new(source(3)));
        let mut attempt = replay.attempt();
        assert_eq!(payload(&attempt.next().await.unwrap()), 1);
        replay.commit();
        assert_eq!(payload(&attempt.next().await.unwrap()), 2);
        assert_eq!(payload(&attempt.next().await.unwrap()), 3);
        assert!(replay.state().sent.is_empty());
    }

    #[tokio::test]
    async fn pushed_back_request_is_delivered_first() {
        let replay = Arc::new(ReplayableRequests::new(source(3)));
        let _first = replay.attempt();
        let second = replay.attempt();
        replay.state().pushback.push_back(audio(9));

        let seen: Vec<u8> = second.map(|r| payload(&r)).collect().await;
        assert_eq!(seen, vec![9, 1, 2, 3]);
    }

    #[test]
    fn metadata_includes_client_info_and_user_pairs() {
        let method = wrap_method(MethodDefaults::default(), ClientInfo::default());
        let metadata = method
            .metadata(&[
                ("x-request-tag".to_string(), "abc".to_string()),
                ("x-trace-bin".to_string(), "raw".to_string()),
            ])
            .unwrap();
        assert!(metadata.get("x-goog-api-client").is_some());
        assert_eq!(metadata.get("x-request-tag").unwrap(), "abc");
        assert_eq!(
            metadata.get_bin("x-trace-bin").unwrap().to_bytes().unwrap(),
            Bytes::from_static(b"raw")
        );
    }

    #[test]
    fn invalid_metadata_is_rejected() {
        let method = wrap_method(MethodDefaults::default(), ClientInfo::default());
        let Err(err) = method.metadata(&[("bad key".to_string(), "v".to_string())]) else {
            panic!("must fail")
        };
        assert!(matches!(err, Error::InvalidMetadata(key) if key == "bad key"));

        let Err(err) = method.metadata(&[("x-ok".to_string(), "line\nbreak".to_string())]) else {
            panic!("must fail")
        };
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn timeout_becomes_grpc_deadline() {
        let request = build_request(
            Box::pin(stream::empty()),
            &MetadataMap::new(),
            Some(Duration::from_secs(3)),
        );
        assert!(request.metadata().get("grpc-timeout").is_some());

        let request = build_request(Box::pin(stream::empty()), &MetadataMap::new(), None);
        assert!(request.metadata().get("grpc-timeout").is_none());
    }
}
