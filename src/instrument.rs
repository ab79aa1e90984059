//! Byte-counting decorators for request and response streams.
//!
//! An instrumented stream forwards every frame or chunk untouched, adds the
//! size of each successful read to its counter and keeps the first error it
//! sees. The first of end-of-stream, [`close`](InstrumentedBody::close) or
//! drop fires the close hook with a [`StreamSummary`]; later closes are
//! no-ops.
//!
//! Instrumented streams have a single owner, just like the streams they
//! wrap, so the counters are plain fields.

use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Buf;
use futures_util::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::error::Operation;

/// What a stream observed over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub op: Operation,
    pub bytes: u64,
    pub error: Option<String>,
    /// Closed by reaching end-of-stream rather than by `close()` or drop.
    pub finished: bool,
}

/// Invoked exactly once when an instrumented stream closes.
pub type CloseHook = Box<dyn FnOnce(StreamSummary) + Send>;

struct Tap {
    op: Operation,
    bytes: u64,
    error: Option<String>,
    finished: bool,
    hook: Option<CloseHook>,
}

impl Tap {
    fn new(op: Operation, hook: Option<CloseHook>) -> Self {
        Self {
            op,
            bytes: 0,
            error: None,
            finished: false,
            hook,
        }
    }

    fn add(&mut self, n: usize) {
        self.bytes += n as u64;
    }

    fn fail(&mut self, err: &dyn fmt::Display) {
        if self.error.is_none() {
            self.error = Some(err.to_string());
        }
    }

    fn finish(&mut self) {
        if self.hook.is_some() {
            self.finished = true;
        }
        self.close();
    }

    fn close(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook(StreamSummary {
                op: self.op,
                bytes: self.bytes,
                error: self.error.clone(),
                finished: self.finished,
            });
        }
    }
}

impl Drop for Tap {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Tap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tap")
            .field("op", &self.op)
            .field("bytes", &self.bytes)
            .field("error", &self.error)
            .field("closed", &self.hook.is_none())
            .finish()
    }
}

pin_project! {
    /// [`Body`] decorator used for HTTP request and response bodies.
    #[derive(Debug)]
    pub struct InstrumentedBody<B> {
        #[pin]
        inner: B,
        tap: Tap,
    }
}

impl<B> InstrumentedBody<B> {
    pub fn new(inner: B, op: Operation, hook: CloseHook) -> Self {
        Self {
            inner,
            tap: Tap::new(op, Some(hook)),
        }
    }

    /// Wraps `inner` without anything listening for the close.
    pub fn detached(inner: B, op: Operation) -> Self {
        Self {
            inner,
            tap: Tap::new(op, None),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.tap.bytes
    }

    pub fn error(&self) -> Option<&str> {
        self.tap.error.as_deref()
    }

    pub fn close(&mut self) {
        self.tap.close();
    }
}

impl<B> Body for InstrumentedBody<B>
where
    B: Body,
    B::Error: fmt::Display,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let polled = ready!(this.inner.as_mut().poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.tap.add(data.remaining());
                }
                if this.inner.is_end_stream() {
                    this.tap.finish();
                }
            }
            Some(Err(err)) => this.tap.fail(err),
            None => this.tap.finish(),
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pin_project! {
    /// [`Stream`] decorator for chunked payloads such as key-value
    /// arguments and replies.
    #[derive(Debug)]
    pub struct InstrumentedStream<S> {
        #[pin]
        inner: S,
        tap: Tap,
    }
}

impl<S> InstrumentedStream<S> {
    pub fn new(inner: S, op: Operation, hook: CloseHook) -> Self {
        Self {
            inner,
            tap: Tap::new(op, Some(hook)),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.tap.bytes
    }

    pub fn error(&self) -> Option<&str> {
        self.tap.error.as_deref()
    }

    pub fn close(&mut self) {
        self.tap.close();
    }
}

impl<S, T, E> Stream for InstrumentedStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: fmt::Display,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = ready!(this.inner.poll_next(cx));

        match &polled {
            Some(Ok(chunk)) => this.tap.add(chunk.as_ref().len()),
            Some(Err(err)) => this.tap.fail(err),
            None => this.tap.finish(),
        }

        Poll::Ready(polled)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
