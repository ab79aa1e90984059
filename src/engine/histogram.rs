use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;
use super::Engine;
use crate::measure::{Measure, MeasureKind};

// ─── Configuration ───────────────────────────────────────────────

/// How many individual emissions we keep for the live feed
const MAX_RECENT: usize = 200;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// In-process engine: sums counters and keeps one HdrHistogram per
/// histogram series (name plus tags).
pub struct HistogramEngine {
    inner: Mutex<Inner>,
}

/// A single entry in the recent-emissions feed.
#[derive(Debug, Clone, Serialize)]
pub struct EmissionRecord {
    pub time: DateTime<Utc>,
    pub series: String,
    pub value: f64,
    pub kind: MeasureKind,
}

/// Read-only view served by the demo dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub counters: BTreeMap<String, f64>,
    /// Histogram series in microseconds.
    pub histograms: BTreeMap<String, PercentileSet>,
    pub total_reports: u64,
    pub reports_per_sec: f64,
    pub elapsed_secs: f64,
    pub recent: Vec<EmissionRecord>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    counters: BTreeMap<String, f64>,
    histograms: BTreeMap<String, Histogram<u64>>,
    total_reports: u64,
    recent: VecDeque<EmissionRecord>,
    start_time: Option<Instant>,
}

// ─── HistogramEngine impl ────────────────────────────────────────

impl HistogramEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Wipe all data.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for HistogramEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for HistogramEngine {
    fn report_at(&self, time: DateTime<Utc>, measures: &[Measure]) {
        let mut inner = self.inner.lock();
        inner.total_reports += 1;
        for measure in measures {
            inner.record(time, measure);
        }
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
            histograms: BTreeMap::new(),
            total_reports: 0,
            recent: VecDeque::with_capacity(MAX_RECENT + 1),
            start_time: None,
        }
    }

    fn record(&mut self, time: DateTime<Utc>, measure: &Measure) {
        // Lazily set the anchor on the very first emission
        self.start_time.get_or_insert_with(Instant::now);

        let series = measure.series();
        match measure.kind {
            MeasureKind::Counter => {
                *self.counters.entry(series.clone()).or_insert(0.0) += measure.value;
            }
            MeasureKind::Histogram => {
                // Seconds in, clamped microseconds stored
                let us = ((measure.value * 1_000_000.0) as u64).clamp(HIST_LOW, HIST_HIGH);
                let hist = self.histograms.entry(series.clone()).or_insert_with(|| {
                    // constant bounds: 1 <= low, high >= 2 * low, sigfig <= 5
                    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                        .expect("histogram creation")
                });
                hist.saturating_record(us);
            }
        }

        self.recent.push_back(EmissionRecord {
            time,
            series,
            value: measure.value,
            kind: measure.kind,
        });
        if self.recent.len() > MAX_RECENT {
            self.recent.pop_front();
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let reports_per_sec = if elapsed_secs > 0.0 {
            self.total_reports as f64 / elapsed_secs
        } else {
            0.0
        };

        EngineSnapshot {
            counters: self.counters.clone(),
            histograms: self
                .histograms
                .iter()
                .map(|(k, h)| (k.clone(), PercentileSet::from_histogram(h)))
                .collect(),
            total_reports: self.total_reports,
            reports_per_sec,
            elapsed_secs,
            recent: self.recent.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::{Tag, REQUESTS, REQUEST_RTT};

    #[test]
    fn counters_and_histograms_by_series() {
        let engine = HistogramEngine::new();
        let tags = vec![Tag::new("command", "GET")];
        for _ in 0..3 {
            engine.report_at(
                Utc::now(),
                &[
                    Measure::counter(REQUESTS, tags.clone()),
                    Measure::histogram(REQUEST_RTT, tags.clone(), 0.002),
                ],
            );
        }

        let snap = engine.snapshot();
        assert_eq!(snap.total_reports, 3);
        assert_eq!(snap.counters["requests{command=GET}"], 3.0);
        let rtt = &snap.histograms["request.rtt.seconds{command=GET}"];
        assert_eq!(rtt.count, 3);
        assert_eq!(rtt.min, 2_000);
        assert_eq!(snap.recent.len(), 6);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let engine = HistogramEngine::new();
        engine.report_at(
            Utc::now(),
            &[
                Measure::histogram(REQUEST_RTT, vec![], -1.0),
                Measure::histogram(REQUEST_RTT, vec![], 1.0e9),
            ],
        );

        let rtt = &engine.snapshot().histograms["request.rtt.seconds"];
        assert_eq!(rtt.count, 2);
        assert_eq!(rtt.min, HIST_LOW);
        assert!(rtt.max >= HIST_HIGH / 2);
    }

    #[test]
    fn reset_clears_everything() {
        let engine = HistogramEngine::new();
        engine.report_at(Utc::now(), &[Measure::counter(REQUESTS, vec![])]);
        engine.reset();
        let snap = engine.snapshot();
        assert!(snap.counters.is_empty());
        assert_eq!(snap.total_reports, 0);
        assert_eq!(snap.reports_per_sec, 0.0);
    }
}
