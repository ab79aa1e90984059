//! Dispatch bookkeeping shared by the HTTP client and key-value decorators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ErrorKind, Operation, TransportError};
use crate::instrument::CloseHook;
use crate::transaction::{Protocol, Reporter, Transaction};

/// One outbound dispatch.
///
/// Dropped before [`responded`](Self::responded) or [`failed`](Self::failed),
/// which happens when the caller abandons the round-trip future, it
/// reports a network failure for the phase the exchange was in: `write`
/// until the request stream was read to its end, `read` after.
pub(crate) struct Dispatch {
    tx: Arc<Transaction>,
    request_sent: Arc<AtomicBool>,
    settled: bool,
}

impl Dispatch {
    pub(crate) fn begin(
        reporter: &Reporter,
        protocol: Protocol,
        command: &str,
        upstream: Option<&str>,
    ) -> Self {
        let tx = reporter.begin(protocol);
        tx.set_command(command);
        if let Some(upstream) = upstream {
            tx.set_upstream(upstream);
        }
        Self {
            tx,
            request_sent: Arc::new(AtomicBool::new(false)),
            settled: false,
        }
    }

    /// Hook for the outgoing request body. Only folds in bytes and errors.
    pub(crate) fn request_hook(&self) -> CloseHook {
        let sent = Arc::clone(&self.request_sent);
        let observe = self.tx.close_hook(false);
        Box::new(move |summary| {
            if summary.finished {
                sent.store(true, Ordering::Release);
            }
            observe(summary);
        })
    }

    /// Hook for the response body; its close completes the transaction.
    pub(crate) fn response_hook(&self) -> CloseHook {
        self.tx.close_hook(true)
    }

    pub(crate) fn responded(&mut self, status: u16, content_type: Option<&str>) {
        self.settled = true;
        self.tx.set_status(status, content_type);
    }

    /// Terminal failure: classify and report right away, with no response
    /// fields recorded.
    pub(crate) fn failed(&mut self, err: &TransportError) {
        self.settled = true;
        self.tx.fail(err.kind());
        self.tx.complete();
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        if self.settled || self.tx.is_completed() {
            return;
        }

        let op = if self.request_sent.load(Ordering::Acquire) {
            Operation::Read
        } else {
            Operation::Write
        };
        debug!(%op, "round trip abandoned before a response");
        self.tx.fail(ErrorKind::Network(op));
        self.tx.complete();
    }
}
