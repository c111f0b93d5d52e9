//! Logarithmic-bucket latency histogram, used by the stats block (4.D) to
//! estimate `p99_latency_us`. Adapted from the teacher's
//! `performance::latency::histogram::LatencyHistogram`, trimmed to the
//! percentile this core actually needs.

use parking_lot::Mutex;

/// Pre-computed logarithmic bucket boundaries (microseconds). ~10% relative
/// error across 1us - 10s, with a final overflow bucket.
static BUCKET_BOUNDS: &[u64] = &[
    1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000,
    200_000, 500_000, 1_000_000, 2_000_000, 5_000_000, 10_000_000, u64::MAX,
];

struct HistogramInner {
    buckets: Vec<u64>,
    count: u64,
    sum_us: u64,
}

pub struct LatencyHistogram {
    inner: Mutex<HistogramInner>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HistogramInner {
                buckets: vec![0u64; BUCKET_BOUNDS.len()],
                count: 0,
                sum_us: 0,
            }),
        }
    }

    #[inline]
    pub fn record(&self, latency_us: u64) {
        let mut inner = self.inner.lock();
        inner.count += 1;
        inner.sum_us = inner.sum_us.saturating_add(latency_us);
        let idx = BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us);
        let bucket_idx = idx.min(inner.buckets.len() - 1);
        inner.buckets[bucket_idx] += 1;
    }

    pub fn percentile(&self, p: f64) -> u64 {
        let inner = self.inner.lock();
        if inner.count == 0 {
            return 0;
        }
        let target = ((p / 100.0) * inner.count as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &bucket_count) in inner.buckets.iter().enumerate() {
            cumulative += bucket_count;
            if cumulative >= target {
                return BUCKET_BOUNDS[i];
            }
        }
        BUCKET_BOUNDS[BUCKET_BOUNDS.len() - 1]
    }

    #[inline]
    pub fn p99(&self) -> u64 {
        self.percentile(99.0)
    }

    pub fn mean(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.count == 0 {
            0.0
        } else {
            inner.sum_us as f64 / inner.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p99_is_zero_when_empty() {
        let h = LatencyHistogram::new();
        assert_eq!(h.p99(), 0);
    }

    #[test]
    fn p99_tracks_the_tail() {
        // 49 in-band samples + 1 tail sample: target = ceil(0.99*50) = 50,
        // which only falls inside the tail sample's bucket, so the tail
        // must be included for p99 to reach it (at 99 in-band samples the
        // 99th-percentile target is already satisfied before the tail).
        let h = LatencyHistogram::new();
        for _ in 0..49 {
            h.record(10);
        }
        h.record(10_000);
        assert!(h.p99() >= 10_000);
    }
}
