use hdrhistogram::Histogram;
use serde::Serialize;

/// Percentile breakdown of one histogram series, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Zeroed when the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::empty();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p99: hist.value_at_quantile(0.99),
            count: hist.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            p50: 0,
            p90: 0,
            p99: 0,
            count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_is_zeroed() {
        let hist = Histogram::<u64>::new(3).unwrap();
        assert_eq!(PercentileSet::from_histogram(&hist), PercentileSet::empty());
    }

    #[test]
    fn single_value() {
        let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
        hist.record(1_000).unwrap();
        let set = PercentileSet::from_histogram(&hist);
        assert_eq!(set.count, 1);
        assert_eq!(set.min, 1_000);
        assert_eq!(set.p50, set.p99);
    }
}
