//! Fixed-width latency histogram with running summary statistics
//!
//! Bucket `i` counts samples in `[i * width, (i + 1) * width)` nanoseconds.
//! Samples past the last bucket land in a separate overflow count. The
//! bucket array is sized once and never resized; re-initializing with a
//! different bucket count is rejected.
//!
//! Invariants after every [`Histogram::accumulate`]:
//! - `sum(buckets) + overflow_count == sample_count`
//! - `min <= average <= max` once `sample_count > 0`

use crate::error::{JitterError, Result};
use serde::{Deserialize, Serialize};

/// Default bucket width in nanoseconds
pub const DEFAULT_BUCKET_WIDTH_NS: u64 = 10;

/// Default number of buckets
pub const DEFAULT_BUCKET_COUNT: usize = 800;

/// Percentiles reported by a full report
pub const STANDARD_PERCENTILES: [f64; 5] = [90.0, 99.0, 99.9, 99.99, 99.999];

/// Summary statistics for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub min_ns: u64,
    pub max_ns: u64,
    pub average_ns: u64,
    pub overflow_count: u64,
    pub sample_count: u64,
}

/// Outcome of a percentile query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Percentile {
    /// At least `percentile`% of samples are below `bound_ns`
    Below { percentile: f64, bound_ns: u64 },
    /// Too many samples overflowed to resolve the percentile; `limit_ns`
    /// is the upper bound of the last bucket
    Overflow { percentile: f64, limit_ns: u64 },
}

impl Percentile {
    /// Bound in nanoseconds, if the percentile was resolved
    pub fn bound_ns(&self) -> Option<u64> {
        match self {
            Percentile::Below { bound_ns, .. } => Some(*bound_ns),
            Percentile::Overflow { .. } => None,
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Percentile::Overflow { .. })
    }
}

/// A non-empty bucket: its latency range and count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub index: usize,
    pub low_ns: u64,
    pub high_ns: u64,
    pub count: u64,
}

/// Latency histogram owned by one measurement thread
#[derive(Debug, Clone)]
pub struct Histogram {
    bucket_width_ns: u64,
    buckets: Vec<u64>,
    sized: bool,
    overflow_count: u64,
    min: u64,
    max: u64,
    total: u128,
    sample_count: u64,
    average: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            bucket_width_ns: DEFAULT_BUCKET_WIDTH_NS,
            buckets: Vec::new(),
            sized: false,
            overflow_count: 0,
            min: u64::MAX,
            max: 0,
            total: 0,
            sample_count: 0,
            average: 0,
        }
    }
}

impl Histogram {
    /// Unsized histogram with `bucket_width_ns` wide buckets.
    ///
    /// Call [`init`](Histogram::init) before accumulating.
    pub fn new(bucket_width_ns: u64) -> Result<Self> {
        if bucket_width_ns == 0 {
            return Err(JitterError::InvalidConfig(
                "bucket width must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            bucket_width_ns,
            ..Self::default()
        })
    }

    /// Sized and zeroed histogram
    pub fn with_buckets(bucket_width_ns: u64, bucket_count: usize) -> Result<Self> {
        let mut histogram = Self::new(bucket_width_ns)?;
        histogram.init(bucket_count)?;
        Ok(histogram)
    }

    /// Size on first call, then zero all counts and summary fields.
    ///
    /// Later calls must pass the same `bucket_count`.
    pub fn init(&mut self, bucket_count: usize) -> Result<()> {
        if bucket_count == 0 {
            return Err(JitterError::InvalidConfig(
                "bucket count must be non-zero".to_string(),
            ));
        }
        if self.sized {
            if bucket_count != self.buckets.len() {
                return Err(JitterError::BucketCountMismatch {
                    expected: self.buckets.len(),
                    found: bucket_count,
                });
            }
            self.buckets.iter_mut().for_each(|b| *b = 0);
        } else {
            self.buckets = vec![0; bucket_count];
            self.sized = true;
        }

        self.overflow_count = 0;
        self.min = u64::MAX;
        self.max = 0;
        self.total = 0;
        self.sample_count = 0;
        self.average = 0;
        Ok(())
    }

    /// Record one sample. The only path that changes histogram state.
    #[inline]
    pub fn accumulate(&mut self, sample_ns: u64) {
        let bucket = sample_ns / self.bucket_width_ns;
        match usize::try_from(bucket).ok().and_then(|i| self.buckets.get_mut(i)) {
            Some(count) => *count += 1,
            None => self.overflow_count += 1,
        }

        self.min = self.min.min(sample_ns);
        self.max = self.max.max(sample_ns);
        self.total += sample_ns as u128;
        self.sample_count += 1;
        self.average = (self.total / self.sample_count as u128) as u64;
    }

    /// Smallest bucket bound below which `percentile`% of samples fall.
    ///
    /// The target count is `percentile / 100 * sample_count` rounded half up.
    /// Buckets are walked in ascending order until the running total reaches
    /// it; the upper bound of the last bucket walked is reported.
    pub fn percentile(&self, percentile: f64) -> Result<Percentile> {
        if !(percentile > 0.0 && percentile <= 100.0) {
            return Err(JitterError::InvalidPercentile(percentile));
        }

        let target = ((percentile / 100.0) * self.sample_count as f64 + 0.5) as u64;
        let mut running = 0u64;
        let mut walked = 0usize;
        while walked < self.buckets.len() && running < target {
            running += self.buckets[walked];
            walked += 1;
        }

        if running >= target {
            Ok(Percentile::Below {
                percentile,
                bound_ns: walked as u64 * self.bucket_width_ns,
            })
        } else {
            Ok(Percentile::Overflow {
                percentile,
                limit_ns: self.limit_ns(),
            })
        }
    }

    /// min, max, average and overflow count
    pub fn summary(&self) -> Summary {
        Summary {
            min_ns: self.min,
            max_ns: self.max,
            average_ns: self.average,
            overflow_count: self.overflow_count,
            sample_count: self.sample_count,
        }
    }

    /// Non-empty buckets in ascending order
    pub fn nonempty_buckets(&self) -> impl Iterator<Item = Bucket> + '_ {
        let width = self.bucket_width_ns;
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, &count)| count != 0)
            .map(move |(index, &count)| Bucket {
                index,
                low_ns: index as u64 * width,
                high_ns: index as u64 * width + width - 1,
                count,
            })
    }

    /// Upper bound of the last bucket; samples at or above it overflow
    pub fn limit_ns(&self) -> u64 {
        self.buckets.len() as u64 * self.bucket_width_ns
    }

    pub fn bucket_width_ns(&self) -> u64 {
        self.bucket_width_ns
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn is_initialized(&self) -> bool {
        self.sized
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn total(&self) -> u128 {
        self.total
    }

    pub fn average(&self) -> u64 {
        self.average
    }
}
