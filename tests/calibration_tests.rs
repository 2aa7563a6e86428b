//! Calibration behavior across passes, on a mock and on the host clock

use jitterscope::{
    Calibration, CalibrationConfig, Clock, JitterError, JitterMeter, MockClock, SystemClock,
    Timebase,
};
use proptest::prelude::*;
use serial_test::serial;

fn snapshot(c: &Calibration) -> (i64, i64, u64, i64) {
    (
        c.gettime_cost_ns(),
        c.cycle_read_cost_ns(),
        c.cycles_per_sec(),
        c.tight_loop_cost_ns(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_passes_never_raise_a_value(
        steps in prop::collection::vec(1i64..200, 1..8),
        hz in 100_000_000u64..5_000_000_000,
    ) {
        let clock = MockClock::new(steps[0], hz);
        let config = CalibrationConfig {
            frequency_interval_ns: 100_000,
            ..CalibrationConfig::quick()
        };

        let mut calibration = Calibration::new();
        let mut previous = snapshot(&calibration);
        for step in steps {
            clock.set_step(step);
            calibration.calibrate(&clock, &config).unwrap();
            let current = snapshot(&calibration);
            prop_assert!(current.0 <= previous.0);
            prop_assert!(current.1 <= previous.1);
            prop_assert!(current.2 <= previous.2);
            prop_assert!(current.3 <= previous.3);
            previous = current;
        }
    }
}

#[test]
fn test_preset_values_only_decrease() {
    let clock = MockClock::new(10, 2_000_000_000);
    let mut calibration = Calibration::from_measurements(5, 5, 3_000_000_000, 0);
    calibration.calibrate(&clock, &CalibrationConfig::quick()).unwrap();

    // mock measures gettime=9, so the lower preset survives
    assert_eq!(calibration.gettime_cost_ns(), 5);
    assert_eq!(calibration.cycles_per_sec(), 2_000_000_000);
    assert_eq!(calibration.tight_loop_cost_ns(), 0);
    assert!(calibration.is_preset());
}

#[test]
fn test_no_cycle_counter_leaves_cycle_fields_uncalibrated() {
    let clock = MockClock::without_cycle_counter(10);
    let calibration = Calibration::calibrated(&clock, &CalibrationConfig::quick()).unwrap();

    assert!(!calibration.has_frequency());
    assert!(calibration.ensure_ready(Timebase::MonotonicClock).is_ok());
    assert!(calibration.ensure_ready(Timebase::CycleCounter).is_err());
    assert!(calibration.busy_loop_count(1_000).is_ok());
}

#[test]
fn test_calibrated_rejects_invalid_config() {
    let clock = MockClock::new(10, 1_000_000_000);
    let config = CalibrationConfig {
        clock_reads: 10,
        ..CalibrationConfig::default()
    };
    assert!(Calibration::calibrated(&clock, &config).is_err());
}

#[test]
fn test_single_pass_rejects_each_invalid_field() {
    let clock = MockClock::new(10, 1_000_000_000);
    let cases = [
        (
            "clock_reads",
            CalibrationConfig {
                clock_reads: 1,
                ..CalibrationConfig::quick()
            },
        ),
        (
            "frequency_interval_ns",
            CalibrationConfig {
                frequency_interval_ns: -1,
                ..CalibrationConfig::quick()
            },
        ),
        (
            "loop_iterations",
            CalibrationConfig {
                loop_iterations: 0,
                ..CalibrationConfig::quick()
            },
        ),
        (
            "passes",
            CalibrationConfig {
                passes: 0,
                ..CalibrationConfig::quick()
            },
        ),
    ];

    for (field, config) in cases {
        let mut calibration = Calibration::new();
        let err = calibration.calibrate(&clock, &config).unwrap_err();
        assert!(
            matches!(err, JitterError::InvalidConfig(ref msg) if msg.contains(field)),
            "{field}: {err}"
        );
        assert_eq!(calibration.passes(), 0);

        let mut meter = JitterMeter::with_clock(clock.clone(), 10).unwrap();
        assert!(meter.calibrate(&config).is_err(), "{field}");
        assert!(meter.calibrate_passes(&config).is_err(), "{field}");
    }
    assert_eq!(clock.reads(), 0);
}

#[test]
#[serial]
fn test_host_clock_calibration_is_plausible() {
    let clock = SystemClock::new();
    let config = CalibrationConfig {
        passes: 3,
        ..CalibrationConfig::quick()
    };
    let calibration = Calibration::calibrated(&clock, &config).unwrap();

    assert_eq!(calibration.passes(), 3);
    assert!(calibration.ensure_ready(Timebase::MonotonicClock).is_ok());
    // a clock read costs well under a millisecond on any real host
    assert!(calibration.gettime_cost_ns() >= 0);
    assert!(calibration.gettime_cost_ns() < 1_000_000);
    assert!(calibration.tight_loop_cost_ns() >= 0);

    if clock.has_cycle_counter() {
        assert!(calibration.has_frequency());
        // between 1 MHz and 100 GHz
        assert!(calibration.cycles_per_sec() > 1_000_000);
        assert!(calibration.cycles_per_sec() < 100_000_000_000);
        assert!(calibration.ensure_ready(Timebase::CycleCounter).is_ok());
    }
}
