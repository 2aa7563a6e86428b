//! Text, gnuplot and JSON reports
//!
//! Everything is written into a [`ReportBuffer`], a growable buffer with a
//! hard capacity. An append that would reach the capacity fails with
//! [`JitterError::BufferExhausted`] and leaves the buffer untouched, so a
//! report is either complete or rejected, never silently cut short.

use crate::calibration::Calibration;
use crate::driver::MeasurementRun;
use crate::error::{JitterError, Result};
use crate::histogram::{Bucket, Histogram, Percentile, Summary, STANDARD_PERCENTILES};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default report capacity in bytes
pub const DEFAULT_REPORT_CAPACITY: usize = 65_536;

/// Append formatted text to a [`ReportBuffer`]
macro_rules! report {
    ($buf:expr, $($arg:tt)*) => {
        $buf.append(format_args!($($arg)*))
    };
}

/// Length-tracked text buffer with a fixed upper bound
#[derive(Debug, Clone)]
pub struct ReportBuffer {
    text: String,
    capacity: usize,
}

impl Default for ReportBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REPORT_CAPACITY)
    }
}

impl ReportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::new(),
            capacity,
        }
    }

    /// Append text; fails if the buffer would fill
    pub fn append(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let piece = fmt::format(args);
        self.append_str(&piece)
    }

    pub fn append_str(&mut self, piece: &str) -> Result<()> {
        let needed = self.text.len() + piece.len();
        if needed >= self.capacity {
            return Err(JitterError::BufferExhausted {
                capacity: self.capacity,
                needed,
            });
        }
        self.text.push_str(piece);
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// `Minimum=…, Maximum=…, Average=…, Overflows=…`
    pub fn write_summary(&mut self, histogram: &Histogram) -> Result<()> {
        let s = histogram.summary();
        report!(
            self,
            "Minimum={}, Maximum={}, Average={}, Overflows={}\n",
            s.min_ns,
            s.max_ns,
            s.average_ns,
            s.overflow_count
        )
    }

    /// One percentile line, or an overflow warning if it cannot be resolved
    pub fn write_percentile(&mut self, histogram: &Histogram, percentile: f64) -> Result<()> {
        match histogram.percentile(percentile)? {
            Percentile::Below {
                percentile,
                bound_ns,
            } => report!(self, "{:6.3}% are below {} ns\n", percentile, bound_ns),
            Percentile::Overflow {
                percentile,
                limit_ns,
            } => {
                tracing::warn!(
                    percentile,
                    overflows = histogram.overflow_count(),
                    "percentile lost to histogram overflow"
                );
                report!(
                    self,
                    "Warning, histogram overflow for {:6.3}% (too many samples >= {})\n",
                    percentile,
                    limit_ns
                )
            }
        }
    }

    /// Every non-empty bucket as `bucket lo..hi: count`
    pub fn write_details(&mut self, histogram: &Histogram) -> Result<()> {
        for bucket in histogram.nonempty_buckets() {
            report!(
                self,
                "bucket {}..{}: {}\n",
                bucket.low_ns,
                bucket.high_ns,
                bucket.count
            )?;
        }
        Ok(())
    }

    /// Details (verbose > 0), summary, then the standard percentiles
    pub fn write_all(&mut self, histogram: &Histogram, verbose: i32) -> Result<()> {
        if verbose > 0 {
            self.write_details(histogram)?;
        }
        self.write_summary(histogram)?;
        for p in STANDARD_PERCENTILES {
            self.write_percentile(histogram, p)?;
        }
        Ok(())
    }
}

/// Histogram data ready for plotting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotData {
    pub title: String,
    pub bucket_width_ns: u64,
    /// Top of the y axis, normally the number of samples
    pub y_high: u64,
    /// `(bucket index, count)` for non-empty buckets
    pub points: Vec<(usize, u64)>,
}

impl PlotData {
    pub fn from_histogram(histogram: &Histogram, title: impl Into<String>, y_high: u64) -> Self {
        Self {
            title: title.into(),
            bucket_width_ns: histogram.bucket_width_ns(),
            y_high: y_high.max(1),
            points: histogram
                .nonempty_buckets()
                .map(|b| (b.index, b.count))
                .collect(),
        }
    }

    /// Render a self-contained gnuplot script with inline data
    pub fn write_gnuplot(&self, buf: &mut ReportBuffer) -> Result<()> {
        report!(buf, "set title \"{}\"\n", gnuplot_escape(&self.title))?;
        buf.append_str("set xlabel \"latency (ns)\"\n")?;
        buf.append_str("set ylabel \"samples\"\n")?;
        buf.append_str("set logscale y\n")?;
        report!(buf, "set yrange [0.9:{}]\n", self.y_high)?;
        buf.append_str("set style fill solid\n")?;
        report!(
            buf,
            "plot '-' using ($1*{}):2 with boxes notitle\n",
            self.bucket_width_ns
        )?;
        for (index, count) in &self.points {
            report!(buf, "{} {}\n", index, count)?;
        }
        buf.append_str("e\n")
    }
}

fn gnuplot_escape(title: &str) -> String {
    title
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Machine-readable report of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterReport {
    pub title: String,
    pub run: MeasurementRun,
    pub calibration: Calibration,
    pub bucket_width_ns: u64,
    pub bucket_count: usize,
    pub summary: Summary,
    pub percentiles: Vec<Percentile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<Bucket>,
}

impl JitterReport {
    /// Collect a report; bucket detail only when `verbose > 0`
    pub fn new(
        title: impl Into<String>,
        run: &MeasurementRun,
        calibration: &Calibration,
        histogram: &Histogram,
        verbose: i32,
    ) -> Result<Self> {
        let percentiles = STANDARD_PERCENTILES
            .iter()
            .map(|&p| histogram.percentile(p))
            .collect::<Result<Vec<_>>>()?;
        let buckets = if verbose > 0 {
            histogram.nonempty_buckets().collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            title: title.into(),
            run: run.clone(),
            calibration: calibration.clone(),
            bucket_width_ns: histogram.bucket_width_ns(),
            bucket_count: histogram.bucket_count(),
            summary: histogram.summary(),
            percentiles,
            buckets,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, buf: &mut ReportBuffer) -> Result<()> {
        let json = self.to_json()?;
        buf.append_str(&json)?;
        buf.append_str("\n")
    }
}
