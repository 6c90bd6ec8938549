//! Byte-count based percent estimation.
//!
//! Percentages are an approximation, not a measurement. When the total is
//! unknown (a dump streaming out of an external process) the first chunk,
//! multiplied by a seed factor, stands in for the total. The estimate can be
//! far off in either direction; the only guarantees are that the reported
//! percent never decreases and never exceeds [`CEILING`] until
//! [`ProgressEstimator::complete`] confirms the operation finished.

/// Highest percent reported before completion is confirmed.
pub const CEILING: u8 = 95;

/// Default multiplier applied to the first chunk when the total is unknown.
pub const DEFAULT_SEED_FACTOR: u64 = 10;

#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    total: Option<u64>,
    seed_factor: u64,
    processed: u64,
    last: u8,
}

impl ProgressEstimator {
    /// Total unknown; seed it from the first chunk times `seed_factor`.
    pub fn seeded(seed_factor: u64) -> Self {
        Self {
            total: None,
            seed_factor: seed_factor.max(1),
            processed: 0,
            last: 0,
        }
    }

    /// Total known up front (exact for uploads, estimated for archives).
    pub fn with_total(total: u64) -> Self {
        Self {
            total: Some(total),
            seed_factor: DEFAULT_SEED_FACTOR,
            processed: 0,
            last: 0,
        }
    }

    /// Account for `bytes` more bytes and return the percent to report.
    pub fn record(&mut self, bytes: u64) -> u8 {
        self.processed = self.processed.saturating_add(bytes);
        if self.total.is_none() && self.processed == 0 {
            return self.last;
        }
        let total = *self
            .total
            .get_or_insert_with(|| self.processed.saturating_mul(self.seed_factor));

        let percent = if total == 0 {
            CEILING
        } else {
            let raw = (self.processed as f64 / total as f64 * 100.0).round();
            raw.min(CEILING as f64) as u8
        };

        self.last = self.last.max(percent);
        self.last
    }

    /// The process exited or the stream closed cleanly.
    pub fn complete(&mut self) -> u8 {
        self.last = 100;
        self.last
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_chunk_seeds_total() {
        let mut estimator = ProgressEstimator::seeded(10);
        assert_eq!(estimator.record(100), 10);
        assert_eq!(estimator.total(), Some(1000));
        assert_eq!(estimator.record(400), 50);
    }

    #[test]
    fn test_stalls_at_ceiling_until_complete() {
        let mut estimator = ProgressEstimator::seeded(2);
        estimator.record(10);
        assert_eq!(estimator.record(1_000), CEILING);
        assert_eq!(estimator.record(1_000), CEILING);
        assert_eq!(estimator.complete(), 100);
    }

    #[test]
    fn test_percent_never_decreases() {
        let mut estimator = ProgressEstimator::with_total(1_000);
        let mut previous = 0;
        for chunk in [0, 3, 0, 250, 1, 0, 600, 500] {
            let percent = estimator.record(chunk);
            assert!(percent >= previous);
            assert!(percent <= CEILING);
            previous = percent;
        }
    }

    #[test]
    fn test_exact_total() {
        let mut estimator = ProgressEstimator::with_total(200);
        assert_eq!(estimator.record(50), 25);
        assert_eq!(estimator.record(50), 50);
        assert_eq!(estimator.processed(), 100);
    }

    #[test]
    fn test_zero_total_does_not_divide() {
        let mut estimator = ProgressEstimator::with_total(0);
        assert_eq!(estimator.record(0), CEILING);
    }
}
