//! Bridge from a Flux to a `futures::Stream`

use crate::error::FlowError;
use crate::flux::Flux;
use crate::subscriber::{Signal, Subscriber, Subscription};
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

/// Items requested per batch by [`Flux::into_stream`]
pub const DEFAULT_STREAM_BATCH: u64 = 32;

impl<T: Send + 'static> Flux<T> {
    /// Consume this Flux as an async stream of `Result` items
    ///
    /// Demand follows the consumer: a new batch is requested each time the
    /// previous one has been polled out. Dropping the stream cancels the
    /// subscription.
    pub fn into_stream(&self) -> FluxStream<T> {
        self.into_stream_with(DEFAULT_STREAM_BATCH)
    }

    /// [`into_stream`](Self::into_stream) with an explicit batch size
    pub fn into_stream_with(&self, batch: u64) -> FluxStream<T> {
        let batch = batch.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Arc::new(Mutex::new(None));
        self.subscribe(ChannelSubscriber {
            sender,
            subscription: subscription.clone(),
            batch,
        });
        FluxStream {
            receiver,
            subscription,
            batch,
            received: 0,
            done: false,
        }
    }
}

struct ChannelSubscriber<T> {
    sender: mpsc::UnboundedSender<Signal<T>>,
    subscription: Arc<Mutex<Option<Subscription>>>,
    batch: u64,
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        *self.subscription.lock() = Some(subscription.clone());
        subscription.request(self.batch);
    }

    fn on_next(&mut self, item: T) {
        // receiver gone means the stream was dropped and cancelled
        let _ = self.sender.send(Signal::Next(item));
    }

    fn on_error(&mut self, error: FlowError) {
        let _ = self.sender.send(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.sender.send(Signal::Complete);
    }
}

/// Async stream over a subscribed Flux
pub struct FluxStream<T> {
    receiver: mpsc::UnboundedReceiver<Signal<T>>,
    subscription: Arc<Mutex<Option<Subscription>>>,
    batch: u64,
    received: u64,
    done: bool,
}

impl<T> FluxStream<T> {
    fn request_more(&mut self) {
        self.received += 1;
        if self.received < self.batch {
            return;
        }
        self.received = 0;
        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            trace!(batch = self.batch, "stream requesting next batch");
            subscription.request(self.batch);
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.subscription.lock().take();
    }
}

impl<T> Stream for FluxStream<T> {
    type Item = Result<T, FlowError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(Signal::Next(item))) => {
                self.request_more();
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Signal::Error(error))) => {
                self.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Signal::Complete)) | Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for FluxStream<T> {
    fn drop(&mut self) {
        // cancel automatically when the stream is dropped early
        if !self.done {
            let subscription = self.subscription.lock().take();
            if let Some(subscription) = subscription {
                subscription.cancel();
            }
        }
    }
}
