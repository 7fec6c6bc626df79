use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tonic::Status;
use tracing::warn;

use crate::error::Error;
use crate::grpc::StreamingTranslateSpeechResponse;

/// Set by the outbound side when the caller breaks the request order.
pub(crate) type ViolationSlot = Arc<Mutex<Option<String>>>;

/// Responses of one `StreamingTranslateSpeech` call.
pub struct TranslateSpeechStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamingTranslateSpeechResponse, Status>> + Send>>,
    violation: ViolationSlot,
    finished: bool,
}

impl TranslateSpeechStream {
    pub(crate) fn new(
        inner: Pin<Box<dyn Stream<Item = Result<StreamingTranslateSpeechResponse, Status>> + Send>>,
        violation: ViolationSlot,
    ) -> Self {
        Self {
            inner,
            violation,
            finished: false,
        }
    }

    fn take_violation(&mut self) -> Option<Error> {
        let violation = self
            .violation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.finished = true;
        Some(Error::InvalidRequest(violation))
    }
}

impl Stream for TranslateSpeechStream {
    type Item = Result<StreamingTranslateSpeechResponse, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if let Some(err) = self.take_violation() {
            return Poll::Ready(Some(Err(err)));
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(response))) => Poll::Ready(Some(Ok(response))),
            Poll::Ready(Some(Err(status))) => {
                warn!(
                    code = ?status.code(),
                    message = %status.message(),
                    "translate stream yielded error status"
                );
                Poll::Ready(Some(Err(status.into())))
            }
            Poll::Ready(None) => {
                if let Some(err) = self.take_violation() {
                    return Poll::Ready(Some(Err(err)));
                }
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
