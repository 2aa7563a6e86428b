//! Measurement loop
//!
//! [`JitterMeter`] owns everything one measurement thread needs: the time
//! source, the calibration and the histogram. Nothing here is shared with
//! other threads, so the timing chain carries no locking.
//!
//! Each iteration timestamps the caller's operation, subtracts the cost of
//! the instrument that took the timestamps, paces, and (after warmup) feeds
//! the histogram.

use crate::calibration::{Calibration, CalibrationConfig, MIN_RECOMMENDED_PASSES};
use crate::clock::{Clock, SystemClock, Timebase};
use crate::error::{JitterError, Result};
use crate::histogram::Histogram;
use crate::spin::spin_wait;
use serde::{Deserialize, Serialize};

/// Time for a 10G NIC to put a 1 KiB message on the wire, in nanoseconds.
///
/// 98 bytes of Ethernet/IP/UDP/transport framing plus 1024 payload bytes at
/// 0.8 ns per byte.
pub const NIC_10G_1KB_SEND_NS: i64 = 898;

/// The operation being timed.
///
/// Anything `FnMut(&mut Ctx)` is a timed operation.
pub trait TimedOperation<Ctx: ?Sized> {
    fn call(&mut self, ctx: &mut Ctx);
}

impl<Ctx: ?Sized, F> TimedOperation<Ctx> for F
where
    F: FnMut(&mut Ctx),
{
    #[inline]
    fn call(&mut self, ctx: &mut Ctx) {
        self(ctx)
    }
}

/// Parameters of one measurement run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRun {
    /// Iterations executed before any sample is kept
    pub warmup_count: u64,

    /// Iterations whose samples reach the histogram
    pub measured_count: u64,

    /// Pause after each sample. `>= 0` spins that many nanoseconds;
    /// negative yields for `|pause| / 1000` microseconds.
    pub post_sample_pause_ns: i64,

    /// Instrument used for timestamps and spinning
    pub timebase: Timebase,
}

impl Default for MeasurementRun {
    fn default() -> Self {
        Self {
            warmup_count: 500,
            measured_count: 1_000_000,
            post_sample_pause_ns: NIC_10G_1KB_SEND_NS,
            timebase: Timebase::CycleCounter,
        }
    }
}

impl MeasurementRun {
    pub fn new(
        warmup_count: u64,
        measured_count: u64,
        post_sample_pause_ns: i64,
        timebase: Timebase,
    ) -> Self {
        Self {
            warmup_count,
            measured_count,
            post_sample_pause_ns,
            timebase,
        }
    }

    /// Total operation invocations, warmup included
    pub fn iterations(&self) -> Result<u64> {
        self.warmup_count
            .checked_add(self.measured_count)
            .ok_or_else(|| {
                JitterError::InvalidConfig(format!(
                    "warmup_count {} + measured_count {} overflows",
                    self.warmup_count, self.measured_count
                ))
            })
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::from_pause_ns(self.post_sample_pause_ns)
    }
}

/// What happens between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Busy-wait this many nanoseconds
    Spin { ns: i64 },
    /// Yield the CPU for this many microseconds
    Sleep { us: u64 },
}

impl Pacing {
    pub fn from_pause_ns(pause_ns: i64) -> Self {
        if pause_ns >= 0 {
            Pacing::Spin { ns: pause_ns }
        } else {
            Pacing::Sleep {
                us: pause_ns.unsigned_abs() / 1000,
            }
        }
    }
}

/// Counts from a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Times the operation was called, warmup included
    pub invocations: u64,
    /// Samples fed to the histogram
    pub samples: u64,
}

/// Calibration, histogram and time source for one measurement thread
#[derive(Debug)]
pub struct JitterMeter<C: Clock = SystemClock> {
    clock: C,
    calibration: Calibration,
    histogram: Histogram,
}

impl JitterMeter<SystemClock> {
    /// Meter on the host's real instruments
    pub fn new(bucket_width_ns: u64) -> Result<Self> {
        Self::with_clock(SystemClock::new(), bucket_width_ns)
    }
}

impl<C: Clock> JitterMeter<C> {
    /// Meter on an arbitrary time source, uncalibrated, histogram unsized
    pub fn with_clock(clock: C, bucket_width_ns: u64) -> Result<Self> {
        Ok(Self {
            clock,
            calibration: Calibration::new(),
            histogram: Histogram::new(bucket_width_ns)?,
        })
    }

    /// Replace the calibration, e.g. with values measured earlier
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// One calibration pass
    pub fn calibrate(&mut self, config: &CalibrationConfig) -> Result<()> {
        self.calibration.calibrate(&self.clock, config)
    }

    /// `config.passes` calibration passes
    pub fn calibrate_passes(&mut self, config: &CalibrationConfig) -> Result<()> {
        config.validate().map_err(JitterError::InvalidConfig)?;
        for _ in 0..config.passes {
            self.calibration.calibrate_pass(&self.clock, config);
        }
        Ok(())
    }

    /// Size (first call) or reset (later calls) the histogram
    pub fn init_histogram(&mut self, bucket_count: usize) -> Result<()> {
        self.histogram.init(bucket_count)
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Time `op` for every iteration of `run`.
    ///
    /// The operation is called exactly `warmup_count + measured_count`
    /// times. Only the last `measured_count` samples reach the histogram.
    /// The run always completes; there is no cancellation.
    pub fn run<Ctx, O>(&mut self, run: &MeasurementRun, op: &mut O, ctx: &mut Ctx) -> Result<RunStats>
    where
        Ctx: ?Sized,
        O: TimedOperation<Ctx>,
    {
        let Self {
            clock,
            calibration,
            histogram,
        } = self;

        let timebase = run.timebase;
        if timebase == Timebase::CycleCounter && !clock.has_cycle_counter() {
            return Err(JitterError::TimebaseUnavailable(timebase));
        }
        calibration.ensure_ready(timebase)?;
        if !histogram.is_initialized() {
            return Err(JitterError::InvalidConfig(
                "histogram must be initialized before a run".to_string(),
            ));
        }
        if calibration.passes() < MIN_RECOMMENDED_PASSES && !calibration.is_preset() {
            tracing::warn!(
                passes = calibration.passes(),
                recommended = MIN_RECOMMENDED_PASSES,
                "running with fewer calibration passes than recommended"
            );
        }

        let iterations = run.iterations()?;
        let pacing = run.pacing();
        let overhead_ns = match timebase {
            Timebase::CycleCounter => calibration.cycle_read_cost_ns(),
            Timebase::MonotonicClock => calibration.gettime_cost_ns(),
        };

        tracing::debug!(
            warmup = run.warmup_count,
            measured = run.measured_count,
            pause_ns = run.post_sample_pause_ns,
            %timebase,
            overhead_ns,
            "measurement run starting"
        );

        let mut samples = 0u64;
        for iteration in 0..iterations {
            let elapsed_ns = match timebase {
                Timebase::CycleCounter => {
                    let start = clock.cycles();
                    op.call(ctx);
                    let end = clock.cycles();
                    calibration.cycles_to_ns_unchecked(end.saturating_sub(start))
                }
                Timebase::MonotonicClock => {
                    let start = clock.monotonic_ns();
                    op.call(ctx);
                    let end = clock.monotonic_ns();
                    end - start
                }
            };
            let sample_ns = elapsed_ns.saturating_sub(overhead_ns).max(0) as u64;

            match pacing {
                Pacing::Spin { ns } => spin_wait(ns, timebase, calibration, clock)?,
                Pacing::Sleep { us } => clock.sleep_us(us),
            }

            if iteration >= run.warmup_count {
                histogram.accumulate(sample_ns);
                samples += 1;
            }
        }

        tracing::debug!(
            invocations = iterations,
            samples,
            overflows = histogram.overflow_count(),
            "measurement run complete"
        );

        Ok(RunStats {
            invocations: iterations,
            samples,
        })
    }

    /// [`run`](JitterMeter::run) for an operation that needs no context
    pub fn run_fn<F: FnMut()>(&mut self, run: &MeasurementRun, mut op: F) -> Result<RunStats> {
        self.run(run, &mut |_: &mut ()| op(), &mut ())
    }
}
