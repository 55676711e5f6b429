//! Handles returned to callers by the dispatcher.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{MuxError, MuxResult};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Single-result awaitable. Resolves once, on the final reply or an error.
///
/// Dropping it does not cancel the request: the call stays registered until
/// it resolves or times out.
#[derive(Debug)]
pub struct ResponseFuture {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<MuxResult<Value>>,
}

impl ResponseFuture {
    pub(crate) fn new(correlation_id: CorrelationId, rx: oneshot::Receiver<MuxResult<Value>>) -> Self {
        Self { correlation_id, rx }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Await the reply and deserialize it.
    pub async fn into_typed<T: DeserializeOwned>(self) -> MuxResult<T> {
        let value = self.await?;
        serde_json::from_value(value).map_err(|e| MuxError::Decode(e.to_string()))
    }
}

impl Future for ResponseFuture {
    type Output = MuxResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sink dropped without a terminal result: the router went away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(MuxError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Lazy sequence of reply chunks for a streaming request.
///
/// Yields every chunk, including the final one, then ends. An error is the
/// last item. Once ended it keeps returning `None`.
#[derive(Debug)]
pub struct ResponseStream {
    correlation_id: CorrelationId,
    rx: mpsc::UnboundedReceiver<MuxResult<Value>>,
    done: bool,
}

impl ResponseStream {
    pub(crate) fn new(
        correlation_id: CorrelationId,
        rx: mpsc::UnboundedReceiver<MuxResult<Value>>,
    ) -> Self {
        Self {
            correlation_id,
            rx,
            done: false,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Next chunk, or `None` once the sequence has terminated.
    pub async fn next_chunk(&mut self) -> Option<MuxResult<Value>> {
        StreamExt::next(self).await
    }

    /// Drain the remaining chunks, stopping at the first error.
    pub async fn collect_all(mut self) -> MuxResult<Vec<Value>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }
}

impl Stream for ResponseStream {
    type Item = MuxResult<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    self.done = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl futures::stream::FusedStream for ResponseStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}
