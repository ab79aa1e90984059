pub mod histogram;
pub mod percentiles;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::measure::Measure;

pub use histogram::{EngineSnapshot, HistogramEngine};
pub use percentiles::PercentileSet;

/// The measurement engine interceptors report to.
///
/// Implementations must not block for long: `report_at` runs on the
/// request/response path.
pub trait Engine: Send + Sync {
    fn report_at(&self, time: DateTime<Utc>, measures: &[Measure]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEngine;

impl Engine for NullEngine {
    fn report_at(&self, _time: DateTime<Utc>, _measures: &[Measure]) {}
}

/// One `report_at` call as seen by [`MemoryEngine`].
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub time: DateTime<Utc>,
    pub measures: Vec<Measure>,
}

/// Keeps every report in arrival order.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    reports: Mutex<Vec<Report>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// All measures, flattened in emission order.
    pub fn measures(&self) -> Vec<Measure> {
        self.reports
            .lock()
            .iter()
            .flat_map(|r| r.measures.iter().cloned())
            .collect()
    }

    pub fn history(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Number of `report_at` calls.
    pub fn reports(&self) -> usize {
        self.reports.lock().len()
    }

    /// Number of measures across all reports.
    pub fn len(&self) -> usize {
        self.reports.lock().iter().map(|r| r.measures.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Engine for MemoryEngine {
    fn report_at(&self, time: DateTime<Utc>, measures: &[Measure]) {
        self.reports.lock().push(Report {
            time,
            measures: measures.to_vec(),
        });
    }
}
