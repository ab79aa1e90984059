use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::aggregator::StatsFeed;
use crate::engine::Engine;
use crate::error::ErrorKind;
use crate::instrument::{CloseHook, StreamSummary};
use crate::measure::measures_for;

/// Which interceptor produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    HttpServer,
    HttpClient,
    KeyValue,
}

/// Everything observed about one request/response cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub protocol: Protocol,
    /// `0` when no response was received.
    pub status_code: u16,
    pub content_type: String,
    /// Request and response body bytes combined.
    pub bytes_transferred: u64,
    pub error: Option<ErrorKind>,
    /// HTTP method or key-value command name.
    pub command: Option<String>,
    pub upstream: Option<String>,
}

impl TransactionRecord {
    pub fn new(protocol: Protocol, start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start,
            protocol,
            status_code: 0,
            content_type: String::new(),
            bytes_transferred: 0,
            error: None,
            command: None,
            upstream: None,
        }
    }

    /// Zero if the clock appears to have gone backwards.
    pub fn response_time(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }

    /// One-line human readable summary kept in the aggregator's log history.
    pub fn console_line(&self) -> String {
        let mut line = format!(
            "{} {:<6} {} {:>3} {:>8}B {:>10.3}ms",
            self.start.format("%H:%M:%S%.3f"),
            self.command.as_deref().unwrap_or("-"),
            self.upstream.as_deref().unwrap_or("-"),
            self.status_code,
            self.bytes_transferred,
            self.response_time().as_secs_f64() * 1000.0,
        );
        if !self.content_type.is_empty() {
            line.push(' ');
            line.push_str(&self.content_type);
        }
        if let Some(err) = self.error {
            line.push_str(" error=");
            line.push_str(&err.to_string());
        }
        line
    }
}

/// Where completed transactions go: the metrics engine, and optionally the
/// statistics feed.
#[derive(Clone)]
pub struct Reporter {
    engine: Arc<dyn Engine>,
    feed: Option<StatsFeed>,
}

impl Reporter {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine, feed: None }
    }

    pub fn with_feed(mut self, feed: StatsFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn has_feed(&self) -> bool {
        self.feed.is_some()
    }

    /// Opens a transaction starting now.
    pub fn begin(&self, protocol: Protocol) -> Arc<Transaction> {
        Arc::new(Transaction {
            reporter: self.clone(),
            clock: Instant::now(),
            record: Mutex::new(TransactionRecord::new(protocol, Utc::now())),
            completed: AtomicBool::new(false),
        })
    }

    fn deliver(&self, record: TransactionRecord) {
        let measures = measures_for(&record);
        self.engine.report_at(record.start, &measures);

        debug!(
            protocol = ?record.protocol,
            command = record.command.as_deref().unwrap_or("-"),
            upstream = record.upstream.as_deref().unwrap_or("-"),
            status = record.status_code,
            bytes = record.bytes_transferred,
            error = ?record.error,
            rtt_us = record.response_time().as_micros() as u64,
            "transaction completed"
        );

        if let Some(feed) = &self.feed {
            feed.submit(record);
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("feed", &self.feed.is_some())
            .finish()
    }
}

/// Accumulator for one in-flight transaction.
///
/// Shared between the interceptor and the close hooks of its instrumented
/// streams. [`complete`](Self::complete) reports at most once no matter how
/// many paths race to finish the transaction.
pub struct Transaction {
    reporter: Reporter,
    clock: Instant,
    record: Mutex<TransactionRecord>,
    completed: AtomicBool,
}

impl Transaction {
    pub fn start(&self) -> DateTime<Utc> {
        self.record.lock().start
    }

    pub fn set_command(&self, command: impl Into<String>) {
        self.record.lock().command = Some(command.into());
    }

    pub fn set_upstream(&self, upstream: impl Into<String>) {
        self.record.lock().upstream = Some(upstream.into());
    }

    pub fn set_status(&self, status: u16, content_type: Option<&str>) {
        let mut record = self.record.lock();
        record.status_code = status;
        if let Some(ct) = content_type {
            record.content_type = ct.to_owned();
        }
    }

    /// Classifies the transaction as failed. The dispatch outcome wins over
    /// anything a stream reported earlier.
    pub fn fail(&self, kind: ErrorKind) {
        self.record.lock().error = Some(kind);
    }

    /// Folds a closed stream into the record.
    ///
    /// Body errors seen by the HTTP server interceptor only count bytes: the
    /// handler still answered, so the transaction keeps its status.
    pub fn observe(&self, summary: &StreamSummary) {
        let mut record = self.record.lock();
        record.bytes_transferred += summary.bytes;
        if let Some(err) = &summary.error {
            if record.protocol == Protocol::HttpServer {
                debug!(op = %summary.op, error = %err, "http server body error");
            } else if record.error.is_none() {
                record.error = Some(ErrorKind::Network(summary.op));
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Finalizes and reports the transaction. Returns `false` if another
    /// path already completed it.
    pub fn complete(&self) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let record = {
            let mut record = self.record.lock();
            let elapsed = chrono::Duration::from_std(self.clock.elapsed()).unwrap_or_default();
            record.end = record.start + elapsed;
            if record.protocol == Protocol::HttpServer && record.status_code == 0 {
                record.status_code = 200;
            }
            record.clone()
        };

        self.reporter.deliver(record);
        true
    }

    /// Close hook that folds the stream summary into this transaction and,
    /// when `completes` is set, finalizes it.
    pub fn close_hook(self: &Arc<Self>, completes: bool) -> CloseHook {
        let tx = Arc::clone(self);
        Box::new(move |summary| {
            tx.observe(&summary);
            if completes {
                tx.complete();
            }
        })
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("record", &*self.record.lock())
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::error::Operation;
    use std::thread;

    #[test]
    fn success_range() {
        let mut record = TransactionRecord::new(Protocol::HttpClient, Utc::now());
        for (status, ok) in [(199, false), (200, true), (302, true), (399, true), (400, false), (0, false)] {
            record.status_code = status;
            assert_eq!(record.is_success(), ok, "status {status}");
        }
    }

    #[test]
    fn complete_reports_once() {
        let engine = Arc::new(MemoryEngine::new());
        let reporter = Reporter::new(engine.clone());
        let tx = reporter.begin(Protocol::HttpServer);
        tx.set_command("GET");

        assert!(tx.complete());
        assert!(!tx.complete());
        assert_eq!(engine.len(), 2);

        let measures = engine.measures();
        assert_eq!(measures[1].tags[1].value, "200");
    }

    #[test]
    fn racing_completions_report_once() {
        let engine = Arc::new(MemoryEngine::new());
        let reporter = Reporter::new(engine.clone());
        let tx = reporter.begin(Protocol::KeyValue);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tx = tx.clone();
                thread::spawn(move || tx.complete())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(engine.reports(), 1);
    }

    #[test]
    fn stream_error_marks_network_failure() {
        let engine = Arc::new(MemoryEngine::new());
        let tx = Reporter::new(engine).begin(Protocol::HttpClient);
        tx.observe(&StreamSummary {
            op: Operation::Read,
            bytes: 10,
            error: Some("reset".into()),
            finished: true,
        });
        tx.observe(&StreamSummary {
            op: Operation::Write,
            bytes: 4,
            error: Some("broken pipe".into()),
            finished: false,
        });
        let record = tx.record.lock().clone();
        assert_eq!(record.bytes_transferred, 14);
        assert_eq!(record.error, Some(ErrorKind::Network(Operation::Read)));
    }

    #[test]
    fn server_body_errors_keep_the_status() {
        let engine = Arc::new(MemoryEngine::new());
        let tx = Reporter::new(engine).begin(Protocol::HttpServer);
        tx.set_status(400, None);
        tx.observe(&StreamSummary {
            op: Operation::Read,
            bytes: 3,
            error: Some("reset".into()),
            finished: true,
        });
        let record = tx.record.lock().clone();
        assert_eq!(record.bytes_transferred, 3);
        assert_eq!(record.error, None);
        assert_eq!(record.status_code, 400);
    }

    #[test]
    fn console_line_mentions_error() {
        let mut record = TransactionRecord::new(Protocol::KeyValue, Utc::now());
        record.command = Some("GET".into());
        record.upstream = Some("1.2.3.4:6379".into());
        record.error = Some(ErrorKind::Response);
        let line = record.console_line();
        assert!(line.contains("GET"));
        assert!(line.contains("1.2.3.4:6379"));
        assert!(line.ends_with("error=response"));
    }
}
