//! Time sources for jitter measurement
//!
//! Two instruments back every measurement:
//! - **Cycle counter**: `lfence; rdtsc` on x86_64, `isb; mrs cntvct_el0` on aarch64
//! - **Monotonic clock**: `clock_gettime(CLOCK_MONOTONIC)`
//!
//! Hosts without a cycle counter report `has_cycle_counter() == false` and
//! only the monotonic clock may be selected as a [`Timebase`].

use crate::fatal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Which instrument timestamps a measurement run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timebase {
    /// Hardware cycle counter, converted with the calibrated frequency
    #[default]
    CycleCounter,
    /// OS monotonic clock, already in nanoseconds
    MonotonicClock,
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timebase::CycleCounter => write!(f, "cycle-counter"),
            Timebase::MonotonicClock => write!(f, "monotonic-clock"),
        }
    }
}

impl FromStr for Timebase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "rdtsc" | "cycles" | "cycle-counter" => Ok(Timebase::CycleCounter),
            "2" | "clock" | "gettime" | "monotonic" | "monotonic-clock" => {
                Ok(Timebase::MonotonicClock)
            }
            other => Err(format!(
                "unknown timebase '{}' (expected rdtsc|1 or clock|2)",
                other
            )),
        }
    }
}

/// A source of timestamps and pauses for the measurement core.
///
/// Reads never fail from the caller's point of view: an implementation that
/// cannot read its instrument must abort via [`fatal::instrument_failure`].
pub trait Clock {
    /// Monotonic clock reading in nanoseconds
    fn monotonic_ns(&self) -> i64;

    /// Raw cycle counter reading. Only meaningful when `has_cycle_counter()`.
    fn cycles(&self) -> u64;

    /// Whether this host exposes a usable cycle counter
    fn has_cycle_counter(&self) -> bool;

    /// Yield the processor for roughly `us` microseconds
    fn sleep_us(&self, us: u64);
}

/// The host's real instruments
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn monotonic_ns(&self) -> i64 {
        match nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => (ts.tv_sec() as i64) * NANOS_PER_SEC + ts.tv_nsec() as i64,
            Err(errno) => fatal::instrument_failure("clock_gettime(CLOCK_MONOTONIC)", errno),
        }
    }

    /// Always 0 on targets without a counter, where `has_cycle_counter()`
    /// is false and every cycle-counter run is refused.
    #[inline]
    fn cycles(&self) -> u64 {
        #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
        {
            read_cycle_counter()
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            0
        }
    }

    fn has_cycle_counter(&self) -> bool {
        cfg!(any(target_arch = "x86_64", target_arch = "aarch64"))
    }

    fn sleep_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

/// Read the hardware cycle counter with serialization on both sides.
///
/// Only compiled where a counter exists; elsewhere there is nothing to read.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[inline]
pub(crate) fn read_cycle_counter() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        rdtsc_x86_64()
    }

    #[cfg(target_arch = "aarch64")]
    {
        cntvct_aarch64()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn rdtsc_x86_64() -> u64 {
    std::sync::atomic::compiler_fence(Ordering::SeqCst);

    let cycles: u64;
    // SAFETY: lfence and rdtsc only touch rax/rdx, both declared as outputs.
    unsafe {
        std::arch::asm!(
            "lfence",
            "rdtsc",
            "shl rdx, 32",
            "or rax, rdx",
            out("rax") cycles,
            out("rdx") _,
            options(nostack, nomem),
        );
    }

    std::sync::atomic::compiler_fence(Ordering::SeqCst);
    cycles
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn cntvct_aarch64() -> u64 {
    std::sync::atomic::compiler_fence(Ordering::SeqCst);

    let cycles: u64;
    // SAFETY: reading cntvct_el0 is permitted from EL0 and has no side effects.
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {}, cntvct_el0",
            out(reg) cycles,
            options(nostack, nomem),
        );
    }

    std::sync::atomic::compiler_fence(Ordering::SeqCst);
    cycles
}

#[derive(Debug)]
struct MockState {
    now_ns: AtomicI64,
    step_ns: AtomicI64,
    cycles_per_sec: AtomicU64,
    has_cycle_counter: AtomicBool,
    reads: AtomicU64,
    sleeps_us: Mutex<Vec<u64>>,
}

/// Deterministic clock for tests and dry runs.
///
/// Every read (monotonic or cycle) advances time by a fixed step. The cycle
/// counter is derived from the same time at a fixed frequency. Sleeps are
/// recorded and advance time instead of yielding. Clones share state, so a
/// handle kept by a timed operation can [`advance`](MockClock::advance) the
/// clock the measurement loop is reading.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<MockState>,
}

impl MockClock {
    /// A clock starting at 1 s, advancing `step_ns` per read, with a cycle
    /// counter ticking at `cycles_per_sec`.
    pub fn new(step_ns: i64, cycles_per_sec: u64) -> Self {
        Self {
            state: Arc::new(MockState {
                now_ns: AtomicI64::new(NANOS_PER_SEC),
                step_ns: AtomicI64::new(step_ns),
                cycles_per_sec: AtomicU64::new(cycles_per_sec),
                has_cycle_counter: AtomicBool::new(true),
                reads: AtomicU64::new(0),
                sleeps_us: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Same clock without a cycle counter
    pub fn without_cycle_counter(step_ns: i64) -> Self {
        let clock = Self::new(step_ns, 0);
        clock
            .state
            .has_cycle_counter
            .store(false, Ordering::SeqCst);
        clock
    }

    /// Move time forward without a read
    pub fn advance(&self, ns: i64) {
        self.state.now_ns.fetch_add(ns, Ordering::SeqCst);
    }

    /// Change the per-read step
    pub fn set_step(&self, step_ns: i64) {
        self.state.step_ns.store(step_ns, Ordering::SeqCst);
    }

    /// Current time without advancing it
    pub fn peek_ns(&self) -> i64 {
        self.state.now_ns.load(Ordering::SeqCst)
    }

    /// Number of instrument reads so far
    pub fn reads(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Every yielding sleep requested so far, in microseconds
    pub fn sleeps_us(&self) -> Vec<u64> {
        match self.state.sleeps_us.lock() {
            Ok(sleeps) => sleeps.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn tick(&self) -> i64 {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        let step = self.state.step_ns.load(Ordering::SeqCst);
        self.state.now_ns.fetch_add(step, Ordering::SeqCst) + step
    }
}

impl Clock for MockClock {
    fn monotonic_ns(&self) -> i64 {
        self.tick()
    }

    fn cycles(&self) -> u64 {
        let now = self.tick().max(0) as u128;
        let cps = self.state.cycles_per_sec.load(Ordering::SeqCst) as u128;
        (now * cps / NANOS_PER_SEC as u128) as u64
    }

    fn has_cycle_counter(&self) -> bool {
        self.state.has_cycle_counter.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u64) {
        match self.state.sleeps_us.lock() {
            Ok(mut sleeps) => sleeps.push(us),
            Err(poisoned) => poisoned.into_inner().push(us),
        }
        self.advance((us as i64).saturating_mul(1_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_monotonic_never_goes_backwards() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_cycle_counter_advances() {
        let clock = SystemClock::new();
        assert!(clock.has_cycle_counter());
        let a = clock.cycles();
        std::thread::sleep(Duration::from_millis(1));
        let b = clock.cycles();
        assert!(b > a);
    }

    #[test]
    fn test_timebase_parse() {
        assert_eq!("rdtsc".parse::<Timebase>(), Ok(Timebase::CycleCounter));
        assert_eq!("1".parse::<Timebase>(), Ok(Timebase::CycleCounter));
        assert_eq!("clock".parse::<Timebase>(), Ok(Timebase::MonotonicClock));
        assert_eq!("2".parse::<Timebase>(), Ok(Timebase::MonotonicClock));
        assert!("3".parse::<Timebase>().is_err());
    }

    #[test]
    fn test_timebase_display_round_trips() {
        for tb in [Timebase::CycleCounter, Timebase::MonotonicClock] {
            assert_eq!(tb.to_string().parse::<Timebase>(), Ok(tb));
        }
    }

    #[test]
    fn test_mock_clock_steps_per_read() {
        let clock = MockClock::new(10, 1_000_000_000);
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert_eq!(b - a, 10);
        assert_eq!(clock.reads(), 2);
    }

    #[test]
    fn test_mock_cycles_follow_frequency() {
        // 2 GHz: 2 cycles per ns
        let clock = MockClock::new(0, 2_000_000_000);
        let a = clock.cycles();
        clock.advance(500);
        let b = clock.cycles();
        assert_eq!(b - a, 1_000);
    }

    #[test]
    fn test_mock_sleep_is_recorded_and_advances() {
        let clock = MockClock::new(0, 1_000_000_000);
        let before = clock.peek_ns();
        clock.sleep_us(2);
        assert_eq!(clock.sleeps_us(), vec![2]);
        assert_eq!(clock.peek_ns() - before, 2_000);
    }

    #[test]
    fn test_mock_clones_share_state() {
        let clock = MockClock::new(1, 1_000_000_000);
        let handle = clock.clone();
        handle.advance(1_000);
        assert_eq!(clock.peek_ns(), NANOS_PER_SEC + 1_000);
    }

    #[test]
    fn test_mock_without_cycle_counter() {
        let clock = MockClock::without_cycle_counter(5);
        assert!(!clock.has_cycle_counter());
    }
}
