//! # Observables
//!
//! Both ends of a pushed stream.
//!
//! - `Source` is what a server method puts into a `Value` slot. It is a stream of
//!   emissions: `Ok(value)` becomes `Next`, `Err(failure)` becomes a terminal
//!   `Error`, and the end of the stream becomes `Completed`.
//! - `Observable` is what the client finds in the same slot after the value has
//!   crossed the wire. It is a `Stream` of notifications. Dropping it tells the
//!   server to stop.

use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use muxrpc::Failure;
use muxrpc::Notification;
use muxrpc::ObservableId;
use muxrpc::Value;

use crate::demux::Demux;

/// A payload as produced by server methods.
pub type ServerValue = Value<Source>;

/// A payload as seen by client code.
pub type ClientValue = Value<Observable>;

/// One item of a `Source`.
pub type Emission = std::result::Result<ServerValue, Failure>;

/// Server side of an observable.
pub struct Source {
    stream: BoxStream<'static, Emission>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Source")
    }
}

impl Source {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Emission> + Send + 'static,
    {
        Self { stream: stream.boxed() }
    }

    /// Emits each value, then completes.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = ServerValue>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures::stream::iter(values.into_iter().map(Ok)))
    }

    /// Fails immediately.
    pub fn failed(failure: Failure) -> Self {
        Self::new(futures::stream::iter(std::iter::once(Err(failure))))
    }

    /// A source fed by hand.
    ///
    /// It ends at the first `error` or `complete` from any clone of the
    /// publisher, or once every publisher has been dropped.
    pub fn channel() -> (Publisher, Source) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ended = false;
        let source = Self::new(futures::stream::poll_fn(move |cx| {
            if ended {
                return Poll::Ready(None);
            }
            match rx.poll_recv(cx) {
                Poll::Ready(Some(Notification::Next(value))) => Poll::Ready(Some(Ok(value))),
                Poll::Ready(Some(Notification::Error(failure))) => {
                    ended = true;
                    Poll::Ready(Some(Err(failure)))
                }
                Poll::Ready(Some(Notification::Completed)) | Poll::Ready(None) => {
                    ended = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            }
        }));
        (Publisher { tx }, source)
    }

    pub(crate) fn into_stream(self) -> BoxStream<'static, Emission> {
        self.stream
    }
}

impl From<Source> for ServerValue {
    fn from(source: Source) -> Self {
        Value::Observable(source)
    }
}

/// Feeds a `Source` created by `Source::channel`.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Notification<ServerValue>>,
}

impl Publisher {
    /// Pushes a value. Returns false once nobody is listening anymore.
    pub fn next(&self, value: impl Into<ServerValue>) -> bool {
        self.tx.send(Notification::Next(value.into())).is_ok()
    }

    /// Ends the stream with a failure. Later emissions from any clone are ignored.
    pub fn error(self, failure: Failure) {
        let _ = self.tx.send(Notification::Error(failure));
    }

    /// Ends the stream normally. Later emissions from any clone are ignored.
    pub fn complete(self) {
        let _ = self.tx.send(Notification::Completed);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the stream has been retired, for whatever reason.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Client side of an observable.
pub struct Observable {
    id: ObservableId,
    rx: mpsc::UnboundedReceiver<Notification<ClientValue>>,
    demux: Arc<Demux>,
    done: bool,
}

impl std::fmt::Debug for Observable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable").field("id", &self.id).field("done", &self.done).finish()
    }
}

impl Observable {
    pub(crate) fn new(
        id: ObservableId,
        rx: mpsc::UnboundedReceiver<Notification<ClientValue>>,
        demux: Arc<Demux>,
    ) -> Self {
        Self { id, rx, demux, done: false }
    }

    pub fn id(&self) -> ObservableId {
        self.id
    }

    /// Stops the stream. Same as dropping the handle.
    pub fn close(self) {}
}

impl Stream for Observable {
    type Item = Notification<ClientValue>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(notification)) => {
                if notification.is_terminal() {
                    self.done = true;
                }
                Poll::Ready(Some(notification))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Observable {
    fn drop(&mut self) {
        self.demux.release(self.id);
    }
}
