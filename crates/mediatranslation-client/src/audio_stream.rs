use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Raw audio chunks in the encoding announced by the session config.
pub struct AudioStream(pub Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>);

impl AudioStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self(Box::pin(stream))
    }
}

impl Stream for AudioStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.as_mut().poll_next(cx)
    }
}

/// A source able to open audio streams, e.g. a microphone or a file.
pub trait AudioCapture {
    type CaptureOption;

    fn new(capture_option: Self::CaptureOption) -> io::Result<Self>
    where
        Self: Sized;

    /// Starts capturing. The stream ends once `cancellation_token` fires.
    fn create(&self, cancellation_token: CancellationToken) -> io::Result<AudioStream>;
}
