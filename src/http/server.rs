//! Inbound HTTP instrumentation as a tower layer.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(StatsLayer::new(reporter));
//! ```
//!
//! The request body is counted as it is read, the response body as it is
//! written. The transaction completes when the response body finishes or
//! is dropped, or earlier through [`Hijack`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::{debug, info};

use crate::error::{ErrorKind, Operation};
use crate::instrument::InstrumentedBody;
use crate::transaction::{Protocol, Reporter, Transaction};

#[derive(Clone, Debug)]
pub struct StatsLayer {
    reporter: Reporter,
}

impl StatsLayer {
    pub fn new(reporter: Reporter) -> Self {
        info!(statistics = reporter.has_feed(), "http handler instrumentation installed");
        Self { reporter }
    }
}

impl<S> Layer<S> for StatsLayer {
    type Service = StatsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsService {
            inner,
            reporter: self.reporter.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatsService<S> {
    inner: S,
    reporter: Reporter,
}

/// Request extension letting a handler that takes over the connection
/// complete its transaction immediately.
///
/// Whatever status and byte counts were captured so far are reported; the
/// normal completion at the end of the response body then does nothing.
/// Responses with `101 Switching Protocols` are treated the same way
/// without an explicit call.
#[derive(Clone, Debug)]
pub struct Hijack {
    tx: Arc<Transaction>,
}

impl Hijack {
    /// Returns `false` if the transaction had already completed.
    pub fn hijack(&self) -> bool {
        self.tx.complete()
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_completed()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for StatsService<S>
where
    S: Service<Request<InstrumentedBody<ReqBody>>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<InstrumentedBody<ResBody>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let tx = self.reporter.begin(Protocol::HttpServer);
        tx.set_command(req.method().as_str());

        let (mut parts, body) = req.into_parts();
        parts.extensions.insert(Hijack { tx: tx.clone() });
        let body = InstrumentedBody::new(body, Operation::Read, tx.close_hook(false));

        let future = self.inner.call(Request::from_parts(parts, body));
        let pending = Unanswered {
            tx: tx.clone(),
            armed: true,
        };

        Box::pin(async move {
            let mut pending = pending;
            let result = future.await;
            pending.armed = false;
            match result {
                Ok(res) => {
                    let content_type = res
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok());
                    tx.set_status(res.status().as_u16(), content_type);

                    if res.status() == StatusCode::SWITCHING_PROTOCOLS {
                        tx.complete();
                    }

                    let hook = tx.close_hook(true);
                    Ok(res.map(|body| InstrumentedBody::new(body, Operation::Write, hook)))
                }
                Err(err) => {
                    tx.set_status(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), None);
                    tx.complete();
                    Err(err)
                }
            }
        })
    }
}

/// Reports a transaction whose handler future is dropped before answering,
/// for instance when the client disconnects mid-request. No response was
/// written, so it counts as a failed write.
struct Unanswered {
    tx: Arc<Transaction>,
    armed: bool,
}

impl Drop for Unanswered {
    fn drop(&mut self) {
        if self.armed && !self.tx.is_completed() {
            debug!("handler dropped before answering");
            self.tx.fail(ErrorKind::Network(Operation::Write));
            self.tx.complete();
        }
    }
}
