//! Jitterscope - nanosecond-scale jitter measurement
//!
//! This library times short, repeated operations and reports the latency
//! distribution, after removing the cost of its own instruments. It provides
//! self-calibration of the cycle counter and monotonic clock, a busy-wait
//! pacing primitive, a fixed-width latency histogram, and the measurement
//! loop tying them together around a caller-supplied operation.
//!
//! ```no_run
//! use jitterscope::{CalibrationConfig, JitterMeter, MeasurementRun, ReportBuffer, Timebase};
//!
//! let mut meter = JitterMeter::new(10)?;
//! meter.calibrate_passes(&CalibrationConfig::default())?;
//! meter.init_histogram(800)?;
//!
//! let run = MeasurementRun::new(500, 100_000, 898, Timebase::MonotonicClock);
//! meter.run_fn(&run, || jitterscope::calibration::empty_loop(100))?;
//!
//! let mut report = ReportBuffer::new();
//! report.write_all(meter.histogram(), 0)?;
//! print!("{}", report.as_str());
//! # Ok::<(), jitterscope::JitterError>(())
//! ```

pub mod calibration;
pub mod cli;
pub mod clock;
pub mod driver;
pub mod error;
pub mod fatal;
pub mod histogram;
pub mod host;
pub mod report;
pub mod spin;

pub use calibration::{Calibration, CalibrationConfig};
pub use clock::{Clock, MockClock, SystemClock, Timebase};
pub use driver::{JitterMeter, MeasurementRun, Pacing, RunStats, TimedOperation};
pub use error::{JitterError, Result};
pub use histogram::{Histogram, Percentile, Summary};
pub use report::{JitterReport, PlotData, ReportBuffer};
pub use spin::spin_wait;
