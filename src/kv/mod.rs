//! Key-value (Redis protocol) client instrumentation.
//!
//! Requests and replies carry their arguments as byte-chunk streams so the
//! decorator can count what the transport writes and what the caller reads.

pub mod redis_client;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, Stream, TryStreamExt};
use tracing::info;

use crate::error::{Operation, TransportError};
use crate::instrument::InstrumentedStream;
use crate::roundtrip::Dispatch;
use crate::transaction::{Protocol, Reporter};

pub use redis_client::RedisTransport;

/// Argument or reply chunks.
pub type ArgStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Status recorded for a key-value exchange that produced a reply.
pub const REPLY_STATUS: u16 = 200;

fn arg_stream<I, B>(args: I) -> ArgStream
where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
{
    let args: Vec<Result<Bytes, TransportError>> = args.into_iter().map(|a| Ok(a.into())).collect();
    Box::pin(stream::iter(args))
}

/// A command addressed to one upstream server.
pub struct KvRequest {
    pub upstream: String,
    pub command: String,
    /// `None` for commands without arguments.
    pub args: Option<ArgStream>,
}

impl KvRequest {
    pub fn new<I, B>(upstream: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut args = args.into_iter().peekable();
        let args = if args.peek().is_some() {
            Some(arg_stream(args))
        } else {
            None
        };
        Self {
            upstream: upstream.into(),
            command: command.into().to_ascii_uppercase(),
            args,
        }
    }

    /// Drains the argument stream.
    pub async fn collect_args(&mut self) -> Result<Vec<Bytes>, TransportError> {
        match self.args.take() {
            Some(args) => args.try_collect().await,
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for KvRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvRequest")
            .field("upstream", &self.upstream)
            .field("command", &self.command)
            .field("args", &self.args.is_some())
            .finish()
    }
}

/// A successful reply, flattened into chunks.
pub struct KvResponse {
    pub upstream: String,
    pub args: ArgStream,
}

impl KvResponse {
    pub fn new<I, B>(upstream: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            upstream: upstream.into(),
            args: arg_stream(args),
        }
    }

    pub async fn collect(self) -> Result<Vec<Bytes>, TransportError> {
        self.args.try_collect().await
    }
}

impl fmt::Debug for KvResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvResponse")
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KvRoundTrip: Send + Sync {
    async fn round_trip(&self, req: KvRequest) -> Result<KvResponse, TransportError>;
}

/// Decorates a [`KvRoundTrip`] so every command is measured.
///
/// Emits `requests{command}` for every dispatch, then either
/// `request.rtt.seconds{command,upstream}` once the reply stream is done,
/// or `errors{type,operation?,upstream}` when the dispatch fails.
#[derive(Debug)]
pub struct StatsKvTransport<T> {
    inner: T,
    reporter: Reporter,
}

impl<T> StatsKvTransport<T> {
    pub fn new(inner: T, reporter: Reporter) -> Self {
        info!(statistics = reporter.has_feed(), "key-value round-trip instrumentation installed");
        Self { inner, reporter }
    }
}

#[async_trait]
impl<T: KvRoundTrip> KvRoundTrip for StatsKvTransport<T> {
    async fn round_trip(&self, mut req: KvRequest) -> Result<KvResponse, TransportError> {
        let mut dispatch = Dispatch::begin(
            &self.reporter,
            Protocol::KeyValue,
            &req.command,
            Some(req.upstream.as_str()),
        );

        let args = req
            .args
            .take()
            .unwrap_or_else(|| -> ArgStream { Box::pin(stream::empty()) });
        req.args = Some(Box::pin(InstrumentedStream::new(
            args,
            Operation::Write,
            dispatch.request_hook(),
        )));

        match self.inner.round_trip(req).await {
            Ok(res) => {
                dispatch.responded(REPLY_STATUS, None);
                let args = InstrumentedStream::new(res.args, Operation::Read, dispatch.response_hook());
                Ok(KvResponse {
                    upstream: res.upstream,
                    args: Box::pin(args),
                })
            }
            Err(err) => {
                dispatch.failed(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_without_args_has_no_body() {
        let mut req = KvRequest::new("127.0.0.1:6379", "ping", Vec::<Bytes>::new());
        assert!(req.args.is_none());
        assert_eq!(req.command, "PING");
        assert!(req.collect_args().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_args_round_trip() {
        let mut req = KvRequest::new("127.0.0.1:6379", "SET", ["foo", "bar"]);
        let args = req.collect_args().await.unwrap();
        assert_eq!(args, vec![Bytes::from("foo"), Bytes::from("bar")]);
    }
}
