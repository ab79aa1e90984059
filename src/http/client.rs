use std::io;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::info;

use super::{upstream_of, BoxBody};
use crate::error::{BoxError, Operation, TransportError};
use crate::instrument::InstrumentedBody;
use crate::roundtrip::Dispatch;
use crate::transaction::{Protocol, Reporter};

/// One outbound HTTP exchange.
#[async_trait]
pub trait HttpRoundTrip: Send + Sync {
    async fn round_trip(&self, req: Request<BoxBody>) -> Result<Response<BoxBody>, TransportError>;
}

/// Decorates an [`HttpRoundTrip`] so every exchange is measured.
///
/// Transport failures are reported as soon as the inner call returns.
/// Successful exchanges are reported once the caller has finished with the
/// response body, so slow consumers show up in the round-trip time.
#[derive(Debug)]
pub struct StatsTransport<T> {
    inner: T,
    reporter: Reporter,
}

impl<T> StatsTransport<T> {
    pub fn new(inner: T, reporter: Reporter) -> Self {
        info!(statistics = reporter.has_feed(), "http round-trip instrumentation installed");
        Self { inner, reporter }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: HttpRoundTrip> HttpRoundTrip for StatsTransport<T> {
    async fn round_trip(&self, req: Request<BoxBody>) -> Result<Response<BoxBody>, TransportError> {
        let upstream = upstream_of(req.uri());
        let mut dispatch = Dispatch::begin(
            &self.reporter,
            Protocol::HttpClient,
            req.method().as_str(),
            upstream.as_deref(),
        );

        let hook = dispatch.request_hook();
        let req = req.map(|body| InstrumentedBody::new(body, Operation::Write, hook).boxed_unsync());

        match self.inner.round_trip(req).await {
            Ok(res) => {
                let content_type = res
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok());
                dispatch.responded(res.status().as_u16(), content_type);

                let hook = dispatch.response_hook();
                Ok(res.map(|body| InstrumentedBody::new(body, Operation::Read, hook).boxed_unsync()))
            }
            Err(err) => {
                dispatch.failed(&err);
                Err(err)
            }
        }
    }
}

/// Plain-HTTP transport on the hyper-util pooled client.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, BoxBody>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpRoundTrip for HyperTransport {
    async fn round_trip(&self, req: Request<BoxBody>) -> Result<Response<BoxBody>, TransportError> {
        match self.client.request(req).await {
            Ok(res) => Ok(res.map(|body| body.map_err(BoxError::from).boxed_unsync())),
            Err(err) => {
                // nothing was sent if the connection never came up
                let op = if err.is_connect() {
                    Operation::Write
                } else {
                    Operation::Read
                };
                Err(TransportError::network(op, io::Error::new(io::ErrorKind::Other, err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::error::ErrorKind;
    use crate::http::{empty, full};
    use crate::measure::{Tag, ERRORS, REQUESTS, REQUEST_RTT};
    use bytes::Bytes;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl HttpRoundTrip for Echo {
        async fn round_trip(&self, req: Request<BoxBody>) -> Result<Response<BoxBody>, TransportError> {
            let body = req.into_body().collect().await.unwrap().to_bytes();
            Ok(Response::builder()
                .header(CONTENT_TYPE, "text/plain")
                .body(full(body))
                .unwrap())
        }
    }

    struct Refused;

    #[async_trait]
    impl HttpRoundTrip for Refused {
        async fn round_trip(&self, _req: Request<BoxBody>) -> Result<Response<BoxBody>, TransportError> {
            Err(TransportError::network(
                Operation::Write,
                io::ErrorKind::ConnectionRefused,
            ))
        }
    }

    #[tokio::test]
    async fn success_is_reported_after_body_drained() {
        let engine = Arc::new(MemoryEngine::new());
        let transport = StatsTransport::new(Echo, Reporter::new(engine.clone()));

        let req = Request::put("http://10.0.0.7:8080/items").body(full("abc")).unwrap();
        let res = transport.round_trip(req).await.unwrap();
        assert!(engine.is_empty());

        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("abc"));

        let measures = engine.measures();
        assert_eq!(measures.len(), 2);
        assert_eq!(measures[0].name, REQUESTS);
        assert_eq!(measures[0].tags, vec![Tag::new("http_req_method", "PUT")]);
        assert_eq!(measures[1].name, REQUEST_RTT);
        assert_eq!(
            measures[1].tags,
            vec![Tag::new("http_req_method", "PUT"), Tag::new("upstream", "10.0.0.7:8080")]
        );
    }

    #[tokio::test]
    async fn dropped_response_still_reports() {
        let engine = Arc::new(MemoryEngine::new());
        let transport = StatsTransport::new(Echo, Reporter::new(engine.clone()));

        let res = transport
            .round_trip(Request::get("http://example.com/").body(empty()).unwrap())
            .await
            .unwrap();
        drop(res);
        assert_eq!(engine.reports(), 1);
    }

    #[tokio::test]
    async fn transport_failure_reported_immediately() {
        let engine = Arc::new(MemoryEngine::new());
        let transport = StatsTransport::new(Refused, Reporter::new(engine.clone()));

        let err = transport
            .round_trip(Request::get("http://127.0.0.1:1/").body(empty()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network(Operation::Write));

        let measures = engine.measures();
        assert_eq!(measures.len(), 2);
        assert_eq!(measures[1].name, ERRORS);
        assert_eq!(
            measures[1].tags,
            vec![
                Tag::new("type", "network"),
                Tag::new("operation", "write"),
                Tag::new("upstream", "127.0.0.1:1"),
            ]
        );
    }
}
