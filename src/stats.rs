use std::time::Duration;

/// Accumulates round-trip samples and answers rank queries over them.
/// Insertion order is irrelevant; the sort is deferred until the first query
/// and cached between queries.
#[derive(Debug, Default)]
pub struct RttAggregate {
    samples: Vec<Duration>,
    sorted: bool,
}

impl RttAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rtt: Duration) {
        self.samples.push(rtt);
        self.sorted = false;
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn min(&mut self) -> Duration {
        self.percentile(0)
    }

    pub fn max(&mut self) -> Duration {
        self.percentile(100)
    }

    /// Nearest-rank percentile. `percentile(0)` is the minimum,
    /// `percentile(100)` the maximum, `percentile(50)` the median.
    /// An empty aggregate answers zero for every rank.
    pub fn percentile(&mut self, p: u8) -> Duration {
        debug_assert!(p <= 100, "percentile out of range: {p}");
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.ensure_sorted();
        let rank = (p as usize * self.samples.len()).div_ceil(100).max(1);
        self.samples[rank - 1]
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.samples.sort_unstable();
            self.sorted = true;
        }
    }
}
