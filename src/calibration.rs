//! Self-calibration of the timing instruments
//!
//! Every measurement subtracts the cost of the instrument that took it, so
//! those costs have to be known first. Each calibration pass re-measures
//! them and keeps the lowest value seen: scheduling noise can only inflate
//! an overhead measurement, never push it below the true floor.
//!
//! A pass measures, in order:
//! 1. Monotonic clock read cost (N back-to-back reads)
//! 2. Cycle counter frequency (cycle delta against a spun wall-clock interval)
//! 3. Cycle counter read cost (N back-to-back reads, converted with step 2)
//! 4. Cost of 1000 iterations of an empty loop
//!
//! Steps 2 and 3 are skipped on hosts without a cycle counter, and step 4
//! then falls back to the monotonic clock.

use crate::clock::{Clock, Timebase, NANOS_PER_SEC};
use crate::error::{JitterError, Result};
use crate::spin::spin_wait;
use serde::{Deserialize, Serialize};
use std::hint::black_box;

/// Starting value of every nanosecond cost: "infinitely" expensive.
pub const UNCALIBRATED_NS: i64 = i64::MAX;

/// Starting value of the cycle counter frequency.
pub const UNCALIBRATED_HZ: u64 = u64::MAX;

/// Fewest passes worth trusting before a measurement run.
pub const MIN_RECOMMENDED_PASSES: u32 = 10;

/// Iteration count the tight-loop cost is expressed in.
pub const TIGHT_LOOP_ITERATIONS: u64 = 1000;

/// Knobs for a calibration pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationConfig {
    /// Back-to-back reads used to price one instrument read (>= 100)
    pub clock_reads: u32,

    /// Wall-clock interval spun while correlating the cycle counter
    pub frequency_interval_ns: i64,

    /// Empty-loop iterations timed in step 4
    pub loop_iterations: u64,

    /// Passes run by [`Calibration::calibrated`]
    pub passes: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            clock_reads: 1000,
            frequency_interval_ns: 100_000_000, // 100 ms
            loop_iterations: TIGHT_LOOP_ITERATIONS,
            passes: MIN_RECOMMENDED_PASSES,
        }
    }
}

impl CalibrationConfig {
    /// Short passes for smoke tests and interactive use
    pub fn quick() -> Self {
        Self {
            frequency_interval_ns: 5_000_000,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.clock_reads < 100 {
            return Err(format!(
                "clock_reads must be >= 100, got {}",
                self.clock_reads
            ));
        }
        if self.frequency_interval_ns <= 0 {
            return Err(format!(
                "frequency_interval_ns must be positive, got {}",
                self.frequency_interval_ns
            ));
        }
        if self.loop_iterations == 0 {
            return Err("loop_iterations must be non-zero".to_string());
        }
        if self.passes == 0 {
            return Err("passes must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Calibrated instrument costs.
///
/// Fields start at their "infinite" sentinels and only ever decrease.
/// Nothing outside this module writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    gettime_cost_ns: i64,
    cycle_read_cost_ns: i64,
    cycles_per_sec: u64,
    tight_loop_cost_ns: i64,
    passes: u32,
    #[serde(skip)]
    preset: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibration {
    /// Uncalibrated state: every cost infinite
    pub fn new() -> Self {
        Self {
            gettime_cost_ns: UNCALIBRATED_NS,
            cycle_read_cost_ns: UNCALIBRATED_NS,
            cycles_per_sec: UNCALIBRATED_HZ,
            tight_loop_cost_ns: UNCALIBRATED_NS,
            passes: 0,
            preset: false,
        }
    }

    /// Calibration with known values, e.g. from an earlier process.
    ///
    /// Later passes still only lower these values.
    pub fn from_measurements(
        gettime_cost_ns: i64,
        cycle_read_cost_ns: i64,
        cycles_per_sec: u64,
        tight_loop_cost_ns: i64,
    ) -> Self {
        Self {
            gettime_cost_ns,
            cycle_read_cost_ns,
            cycles_per_sec,
            tight_loop_cost_ns,
            passes: 0,
            preset: true,
        }
    }

    /// Run `config.passes` passes from scratch
    pub fn calibrated<C: Clock>(clock: &C, config: &CalibrationConfig) -> Result<Self> {
        config.validate().map_err(JitterError::InvalidConfig)?;
        let mut calibration = Self::new();
        for _ in 0..config.passes {
            calibration.calibrate_pass(clock, config);
        }
        Ok(calibration)
    }

    /// One calibration pass. Lowers any field whose new measurement is below
    /// the current value.
    ///
    /// Fails with [`JitterError::InvalidConfig`] before reading any
    /// instrument if `config` does not validate.
    pub fn calibrate<C: Clock>(&mut self, clock: &C, config: &CalibrationConfig) -> Result<()> {
        config.validate().map_err(JitterError::InvalidConfig)?;
        self.calibrate_pass(clock, config);
        Ok(())
    }

    /// Caller must have validated `config`
    pub(crate) fn calibrate_pass<C: Clock>(&mut self, clock: &C, config: &CalibrationConfig) {
        let reads = i64::from(config.clock_reads);

        // 1. Monotonic clock read cost
        let start = clock.monotonic_ns();
        let mut end = start;
        for _ in 0..reads {
            end = clock.monotonic_ns();
        }
        let gettime = ((end - start) / (reads + 1)).max(0);
        self.gettime_cost_ns = self.gettime_cost_ns.min(gettime);

        if clock.has_cycle_counter() {
            // 2. Cycle counter frequency
            let start_cycles = clock.cycles();
            let start_ns = clock.monotonic_ns();
            // gettime cost was set by step 1, so the spin cannot fail
            let _ = spin_wait(
                config.frequency_interval_ns,
                Timebase::MonotonicClock,
                self,
                clock,
            );
            let end_cycles = clock.cycles();
            let end_ns = clock.monotonic_ns();

            let wall_ns = end_ns - start_ns;
            if wall_ns > 0 {
                let cycle_delta = end_cycles.saturating_sub(start_cycles) as u128;
                let hz = cycle_delta * NANOS_PER_SEC as u128 / wall_ns as u128;
                let hz = u64::try_from(hz).unwrap_or(u64::MAX);
                if hz > 0 {
                    self.cycles_per_sec = self.cycles_per_sec.min(hz);
                }
            }

            // 3. Cycle counter read cost
            if self.has_frequency() {
                let start = clock.cycles();
                let mut end = start;
                for _ in 0..reads {
                    end = clock.cycles();
                }
                let per_read = end.saturating_sub(start) / (reads as u64 + 1);
                let cost = self.cycles_to_ns_unchecked(per_read);
                self.cycle_read_cost_ns = self.cycle_read_cost_ns.min(cost);
            }
        }

        // 4. Tight empty loop
        let loop_cost = if clock.has_cycle_counter() && self.has_frequency() {
            let start = clock.cycles();
            empty_loop(config.loop_iterations);
            let end = clock.cycles();
            self.cycles_to_ns_unchecked(end.saturating_sub(start))
                .saturating_sub(self.cycle_read_cost_ns)
        } else {
            let start = clock.monotonic_ns();
            empty_loop(config.loop_iterations);
            let end = clock.monotonic_ns();
            (end - start).saturating_sub(self.gettime_cost_ns)
        };
        let loop_cost = scale_to_thousand(loop_cost.max(0), config.loop_iterations);
        self.tight_loop_cost_ns = self.tight_loop_cost_ns.min(loop_cost);

        self.passes += 1;
        tracing::debug!(
            pass = self.passes,
            gettime_cost_ns = self.gettime_cost_ns,
            cycle_read_cost_ns = self.cycle_read_cost_ns,
            cycles_per_sec = self.cycles_per_sec,
            tight_loop_cost_ns = self.tight_loop_cost_ns,
            "calibration pass complete"
        );
    }

    /// Estimated cost of one monotonic clock read
    pub fn gettime_cost_ns(&self) -> i64 {
        self.gettime_cost_ns
    }

    /// Estimated cost of one cycle counter read
    pub fn cycle_read_cost_ns(&self) -> i64 {
        self.cycle_read_cost_ns
    }

    /// Cycle counter ticks per second
    pub fn cycles_per_sec(&self) -> u64 {
        self.cycles_per_sec
    }

    /// Estimated cost of 1000 empty-loop iterations
    pub fn tight_loop_cost_ns(&self) -> i64 {
        self.tight_loop_cost_ns
    }

    /// Passes run on this state
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Whether values came from [`Calibration::from_measurements`]
    pub fn is_preset(&self) -> bool {
        self.preset
    }

    pub fn has_frequency(&self) -> bool {
        self.cycles_per_sec != UNCALIBRATED_HZ && self.cycles_per_sec > 0
    }

    /// Check that everything `timebase` relies on has been measured
    pub fn ensure_ready(&self, timebase: Timebase) -> Result<()> {
        if self.gettime_cost_ns == UNCALIBRATED_NS {
            return Err(JitterError::NotCalibrated("monotonic clock read cost"));
        }
        if timebase == Timebase::CycleCounter {
            if !self.has_frequency() {
                return Err(JitterError::NotCalibrated("cycle counter frequency"));
            }
            if self.cycle_read_cost_ns == UNCALIBRATED_NS {
                return Err(JitterError::NotCalibrated("cycle counter read cost"));
            }
        }
        Ok(())
    }

    /// Convert a cycle counter delta to nanoseconds
    pub fn cycles_to_ns(&self, cycles: u64) -> Result<i64> {
        if !self.has_frequency() {
            return Err(JitterError::NotCalibrated("cycle counter frequency"));
        }
        Ok(self.cycles_to_ns_unchecked(cycles))
    }

    /// Convert nanoseconds to a cycle counter delta
    pub fn ns_to_cycles(&self, ns: i64) -> Result<u64> {
        if !self.has_frequency() {
            return Err(JitterError::NotCalibrated("cycle counter frequency"));
        }
        let cycles = ns.max(0) as u128 * self.cycles_per_sec as u128 / NANOS_PER_SEC as u128;
        Ok(u64::try_from(cycles).unwrap_or(u64::MAX))
    }

    /// Empty-loop iterations that approximately take `wait_ns`
    pub fn busy_loop_count(&self, wait_ns: i64) -> Result<u64> {
        if self.tight_loop_cost_ns == UNCALIBRATED_NS {
            return Err(JitterError::NotCalibrated("tight loop cost"));
        }
        if wait_ns <= 0 {
            return Ok(0);
        }
        if self.tight_loop_cost_ns == 0 {
            return Ok(u64::MAX);
        }
        let count = wait_ns as u128 * TIGHT_LOOP_ITERATIONS as u128
            / self.tight_loop_cost_ns as u128;
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    /// Caller must have checked `has_frequency()`
    pub(crate) fn cycles_to_ns_unchecked(&self, cycles: u64) -> i64 {
        let ns = cycles as u128 * NANOS_PER_SEC as u128 / self.cycles_per_sec as u128;
        i64::try_from(ns).unwrap_or(i64::MAX)
    }
}

/// Spin `iterations` times doing nothing the optimizer can remove
#[inline(never)]
pub fn empty_loop(iterations: u64) {
    for i in 0..iterations {
        black_box(i);
    }
}

fn scale_to_thousand(cost_ns: i64, iterations: u64) -> i64 {
    if iterations == TIGHT_LOOP_ITERATIONS {
        return cost_ns;
    }
    let scaled = cost_ns as i128 * TIGHT_LOOP_ITERATIONS as i128 / iterations as i128;
    i64::try_from(scaled).unwrap_or(i64::MAX)
}
