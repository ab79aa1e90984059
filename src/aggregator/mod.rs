//! Running statistics over completed transactions.
//!
//! Every [`Aggregator::add`] folds one record into the cumulative totals and
//! appends an immutable [`Snapshot`]. Mutation takes the write half of a
//! single `RwLock`; queries share the read half.

pub mod feed;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::error::StatsError;
use crate::transaction::TransactionRecord;

pub use feed::{spawn, StatsFeed, StatsWorker};

/// Log lines kept for [`Aggregator::latest_log_messages`].
pub const DEFAULT_LOG_HISTORY: usize = 200;

/// Largest `count` accepted by [`latest_log_messages`], padding included.
pub const MAX_LOG_QUERY: usize = 10_000;

/// Point-in-time rollup as of one transaction's completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub average_response_time: Duration,
    /// `0.0` while every record seen starts and ends at the same instant.
    pub requests_per_second: f64,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub requests_by_status_code: BTreeMap<u16, u64>,
    pub requests_by_content_type: BTreeMap<String, u64>,
    pub total_bytes: u64,
    pub average_bytes: u64,
}

pub struct Aggregator {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    records: Vec<TransactionRecord>,
    snapshots: Vec<Snapshot>,
    log_messages: VecDeque<String>,
    log_capacity: usize,

    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,

    total_response_time: Duration,
    success_count: u64,
    failure_count: u64,
    by_status_code: BTreeMap<u16, u64>,
    by_content_type: BTreeMap<String, u64>,
    total_bytes: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::with_log_history(DEFAULT_LOG_HISTORY)
    }

    pub fn with_log_history(capacity: usize) -> Self {
        info!(log_history = capacity, "statistics aggregator created");
        Self {
            state: RwLock::new(State {
                log_capacity: capacity,
                ..State::default()
            }),
        }
    }

    /// Folds one transaction into the totals and returns the new snapshot.
    pub fn add(&self, start: DateTime<Utc>, end: DateTime<Utc>, record: TransactionRecord) -> Snapshot {
        let mut state = self.state.write();

        let min_start = state.start.map_or(start, |s| s.min(start));
        let max_end = state.end.map_or(end, |e| e.max(end));
        state.start = Some(min_start);
        state.end = Some(max_end);

        if record.is_success() {
            state.success_count += 1;
        } else {
            state.failure_count += 1;
        }

        *state.by_status_code.entry(record.status_code).or_insert(0) += 1;
        *state
            .by_content_type
            .entry(record.content_type.clone())
            .or_insert(0) += 1;

        state.total_response_time += (end - start).to_std().unwrap_or_default();
        state.total_bytes += record.bytes_transferred;

        let line = record.console_line();
        state.records.push(record);
        let count = state.records.len() as u64;

        let average_response_time =
            Duration::from_nanos((state.total_response_time.as_nanos() / count as u128) as u64);

        let span = (max_end - min_start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let requests_per_second = if span > 0.0 { count as f64 / span } else { 0.0 };

        if state.log_capacity > 0 {
            if state.log_messages.len() == state.log_capacity {
                state.log_messages.pop_front();
            }
            state.log_messages.push_back(line);
        }

        let snapshot = Snapshot {
            timestamp: end,
            average_response_time,
            requests_per_second,
            total_requests: count,
            success_count: state.success_count,
            failure_count: state.failure_count,
            requests_by_status_code: state.by_status_code.clone(),
            requests_by_content_type: state.by_content_type.clone(),
            total_bytes: state.total_bytes,
            average_bytes: state.total_bytes / count,
        };
        state.snapshots.push(snapshot.clone());

        snapshot
    }

    /// Latest snapshot, or an all-zero one before the first `add`.
    pub fn last_snapshot(&self) -> Snapshot {
        self.state.read().snapshots.last().cloned().unwrap_or_default()
    }

    /// The `count` most recent log lines, left-padded with empty strings
    /// when fewer exist.
    pub fn latest_log_messages(&self, count: i64) -> Result<Vec<String>, StatsError> {
        let count = checked_count(count)?;
        let state = self.state.read();
        Ok(pad_latest(
            state.log_messages.iter(),
            state.log_messages.len(),
            count,
        ))
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.read().snapshots.clone()
    }

    pub fn records_len(&self) -> usize {
        self.state.read().records.len()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects the `count` most recent entries of `messages`, left-padding with
/// empty strings so the result always has exactly `count` entries.
pub fn latest_log_messages(messages: &[String], count: i64) -> Result<Vec<String>, StatsError> {
    let count = checked_count(count)?;
    if count == messages.len() {
        return Ok(messages.to_vec());
    }
    Ok(pad_latest(messages.iter(), messages.len(), count))
}

fn checked_count(count: i64) -> Result<usize, StatsError> {
    let count = usize::try_from(count)
        .map_err(|_| StatsError::InvalidArgument(format!("the count cannot be negative: {count}")))?;
    if count > MAX_LOG_QUERY {
        return Err(StatsError::InvalidArgument(format!(
            "the count cannot exceed {MAX_LOG_QUERY}: {count}"
        )));
    }
    Ok(count)
}

fn pad_latest<'a>(messages: impl Iterator<Item = &'a String>, len: usize, count: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(count);
    out.extend(std::iter::repeat(String::new()).take(count.saturating_sub(len)));
    out.extend(messages.skip(len.saturating_sub(count)).cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Protocol;
    use std::sync::Arc;
    use std::thread;

    fn record(start: DateTime<Utc>, millis: i64, status: u16) -> TransactionRecord {
        let mut r = TransactionRecord::new(Protocol::HttpClient, start);
        r.end = start + chrono::Duration::milliseconds(millis);
        r.status_code = status;
        r.content_type = "application/json".into();
        r.bytes_transferred = 100;
        r.command = Some("GET".into());
        r
    }

    fn feed(agg: &Aggregator, r: TransactionRecord) -> Snapshot {
        agg.add(r.start, r.end, r)
    }

    #[test]
    fn empty_aggregator_has_default_snapshot() {
        let agg = Aggregator::new();
        assert_eq!(agg.last_snapshot(), Snapshot::default());
        assert_eq!(agg.latest_log_messages(2).unwrap(), vec![String::new(), String::new()]);
    }

    #[test]
    fn counts_add_up() {
        let agg = Aggregator::new();
        let t0 = Utc::now();
        let statuses = [200, 201, 302, 404, 500, 199, 399];
        for (i, status) in statuses.iter().enumerate() {
            feed(&agg, record(t0 + chrono::Duration::milliseconds(i as i64), 5, *status));
        }

        let last = agg.last_snapshot();
        assert_eq!(last.total_requests, 7);
        assert_eq!(last.success_count, 4);
        assert_eq!(last.failure_count, 3);
        assert_eq!(last.success_count + last.failure_count, last.total_requests);
        assert_eq!(agg.snapshots().len(), 7);
        assert_eq!(agg.records_len(), 7);
        assert_eq!(last.requests_by_status_code[&404], 1);
        assert_eq!(last.requests_by_content_type["application/json"], 7);
        assert_eq!(last.total_bytes, 700);
        assert_eq!(last.average_bytes, 100);
    }

    #[test]
    fn identical_durations_average_exactly() {
        let agg = Aggregator::new();
        let t0 = Utc::now();
        for i in 0..9 {
            feed(&agg, record(t0 + chrono::Duration::milliseconds(i * 3), 7, 200));
        }
        assert_eq!(agg.last_snapshot().average_response_time, Duration::from_millis(7));
    }

    #[test]
    fn requests_per_second_over_span() {
        let agg = Aggregator::new();
        let t0 = Utc::now();
        feed(&agg, record(t0, 500, 200));
        let snap = feed(&agg, record(t0 + chrono::Duration::milliseconds(500), 500, 200));
        // two requests across one second
        assert!((snap.requests_per_second - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_span_yields_zero_rate() {
        let agg = Aggregator::new();
        let t0 = Utc::now();
        let snap = feed(&agg, record(t0, 0, 200));
        assert_eq!(snap.requests_per_second, 0.0);
        assert!(snap.requests_per_second.is_finite());
    }

    #[test]
    fn snapshots_are_not_mutated_by_later_adds() {
        let agg = Aggregator::new();
        let t0 = Utc::now();
        let first = feed(&agg, record(t0, 1, 200));
        feed(&agg, record(t0, 1, 500));
        assert_eq!(agg.snapshots()[0], first);
        assert_eq!(first.requests_by_status_code.get(&500), None);
    }

    #[test]
    fn log_history_is_bounded() {
        let agg = Aggregator::with_log_history(3);
        let t0 = Utc::now();
        for i in 0..5 {
            let mut r = record(t0, 1, 200);
            r.command = Some(format!("CMD{i}"));
            feed(&agg, r);
        }
        let logs = agg.latest_log_messages(3).unwrap();
        assert!(logs[0].contains("CMD2"));
        assert!(logs[2].contains("CMD4"));
        assert_eq!(agg.latest_log_messages(5).unwrap()[..2], [String::new(), String::new()]);
    }

    #[test]
    fn latest_log_messages_rules() {
        let messages: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        assert_eq!(latest_log_messages(&messages, 3).unwrap(), messages);
        assert_eq!(latest_log_messages(&messages, 2).unwrap(), vec!["b", "c"]);
        assert_eq!(latest_log_messages(&messages, 0).unwrap(), Vec::<String>::new());
        assert_eq!(latest_log_messages(&messages, 5).unwrap(), vec!["", "", "a", "b", "c"]);
        assert!(matches!(
            latest_log_messages(&messages, -1),
            Err(StatsError::InvalidArgument(_))
        ));

        for count in 0..10 {
            assert_eq!(latest_log_messages(&messages, count).unwrap().len(), count as usize);
        }
    }

    #[test]
    fn oversized_count_is_rejected() {
        let agg = Aggregator::new();
        assert!(matches!(
            agg.latest_log_messages(i64::MAX),
            Err(StatsError::InvalidArgument(_))
        ));
        assert!(latest_log_messages(&[], MAX_LOG_QUERY as i64 + 1).is_err());
        assert_eq!(
            agg.latest_log_messages(MAX_LOG_QUERY as i64).unwrap().len(),
            MAX_LOG_QUERY
        );
    }

    #[test]
    fn negative_count_leaves_state_alone() {
        let agg = Aggregator::new();
        feed(&agg, record(Utc::now(), 1, 200));
        assert!(agg.latest_log_messages(-5).is_err());
        assert_eq!(agg.last_snapshot().total_requests, 1);
        assert_eq!(agg.latest_log_messages(1).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let agg = Arc::new(Aggregator::new());
        let t0 = Utc::now();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let agg = agg.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let status = if (w + i) % 3 == 0 { 500 } else { 200 };
                        feed(&agg, record(t0, 2, status));
                    }
                })
            })
            .collect();
        let reader = {
            let agg = agg.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let snap = agg.last_snapshot();
                    assert_eq!(snap.success_count + snap.failure_count, snap.total_requests);
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        let last = agg.last_snapshot();
        assert_eq!(last.total_requests, 200);
        assert_eq!(agg.snapshots().len(), 200);
        assert_eq!(last.success_count + last.failure_count, 200);
    }
}
