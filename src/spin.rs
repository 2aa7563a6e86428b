//! Busy-wait pacing
//!
//! Pure spinning, never yielding: the point is to emulate the gap a real
//! sender leaves between messages, not to save CPU.

use crate::calibration::Calibration;
use crate::clock::{Clock, Timebase};
use crate::error::{JitterError, Result};

/// Spin until at least `duration_ns` has elapsed on `timebase`.
///
/// Non-positive durations return at once without touching the clock.
/// On the monotonic clock twice the calibrated read cost is taken off the
/// requested duration, once for the read on entry and once for the first
/// read inside the loop.
#[inline]
pub fn spin_wait<C: Clock>(
    duration_ns: i64,
    timebase: Timebase,
    calibration: &Calibration,
    clock: &C,
) -> Result<()> {
    if duration_ns <= 0 {
        return Ok(());
    }

    match timebase {
        Timebase::CycleCounter => {
            if !clock.has_cycle_counter() {
                return Err(JitterError::TimebaseUnavailable(timebase));
            }
            let wait_cycles = calibration.ns_to_cycles(duration_ns)?;
            let target = clock.cycles().saturating_add(wait_cycles);
            while clock.cycles() < target {}
        }
        Timebase::MonotonicClock => {
            let gettime_cost = calibration.gettime_cost_ns();
            if gettime_cost == crate::calibration::UNCALIBRATED_NS {
                return Err(JitterError::NotCalibrated("monotonic clock read cost"));
            }
            let compensated = duration_ns.saturating_sub(gettime_cost.saturating_mul(2)).max(0);
            let mut now = clock.monotonic_ns();
            let end = now.saturating_add(compensated);
            while now < end {
                now = clock.monotonic_ns();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn calibration() -> Calibration {
        Calibration::from_measurements(10, 5, 1_000_000_000, 400)
    }

    #[test]
    fn test_zero_duration_returns_immediately() {
        let clock = MockClock::new(10, 1_000_000_000);
        for tb in [Timebase::CycleCounter, Timebase::MonotonicClock] {
            spin_wait(0, tb, &calibration(), &clock).unwrap();
            spin_wait(-50, tb, &calibration(), &clock).unwrap();
        }
        assert_eq!(clock.reads(), 0);
    }

    #[test]
    fn test_monotonic_wait_compensates_two_reads() {
        let clock = MockClock::new(10, 1_000_000_000);
        let before = clock.peek_ns();
        spin_wait(1_000, Timebase::MonotonicClock, &calibration(), &clock).unwrap();
        // entry read lands at +10, spin until >= +10 + 980
        let elapsed = clock.peek_ns() - before;
        assert_eq!(elapsed, 990);
    }

    #[test]
    fn test_monotonic_wait_shorter_than_compensation() {
        let clock = MockClock::new(10, 1_000_000_000);
        spin_wait(15, Timebase::MonotonicClock, &calibration(), &clock).unwrap();
        // entry read only, loop condition already satisfied
        assert_eq!(clock.reads(), 1);
    }

    #[test]
    fn test_cycle_wait_reaches_target() {
        // 2 cycles per ns
        let clock = MockClock::new(10, 2_000_000_000);
        let cal = Calibration::from_measurements(10, 5, 2_000_000_000, 400);
        let before = clock.peek_ns();
        spin_wait(1_000, Timebase::CycleCounter, &cal, &clock).unwrap();
        assert!(clock.peek_ns() - before >= 1_000);
    }

    #[test]
    fn test_cycle_wait_without_counter_is_rejected() {
        let clock = MockClock::without_cycle_counter(10);
        let result = spin_wait(100, Timebase::CycleCounter, &calibration(), &clock);
        assert!(matches!(
            result,
            Err(JitterError::TimebaseUnavailable(Timebase::CycleCounter))
        ));
    }

    #[test]
    fn test_uncalibrated_wait_is_rejected() {
        let clock = MockClock::new(10, 1_000_000_000);
        let cal = Calibration::new();
        assert!(spin_wait(100, Timebase::MonotonicClock, &cal, &clock).is_err());
        assert!(spin_wait(100, Timebase::CycleCounter, &cal, &clock).is_err());
    }
}
