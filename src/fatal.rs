//! Fail-fast handling for instrument failures
//!
//! A timing loop that loses a timestamp has no trustworthy way to continue,
//! so clock and counter read failures end the process on the spot.

use std::panic::Location;

/// Report a failed instrument call and abort the process.
///
/// The diagnostic carries the caller's file and line, the call that failed,
/// and the errno with its message.
#[track_caller]
#[cold]
pub fn instrument_failure(call: &str, errno: nix::errno::Errno) -> ! {
    let location = Location::caller();
    let message = format_failure(location, call, errno);
    if reported_via_tracing() {
        tracing::error!("{}", message);
    } else {
        eprintln!("{}", message);
    }
    std::process::abort()
}

/// Whether an installed subscriber will record the diagnostic. Without one
/// it goes straight to stderr, so it is printed exactly once either way.
fn reported_via_tracing() -> bool {
    tracing::enabled!(tracing::Level::ERROR)
}

fn format_failure(location: &Location<'_>, call: &str, errno: nix::errno::Errno) -> String {
    format!(
        "instrument failure at {}:{} {}\n  errno={} ({})",
        location.file(),
        location.line(),
        call,
        errno as i32,
        errno.desc()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    #[test]
    fn test_diagnostic_goes_to_one_sink() {
        assert!(!reported_via_tracing());

        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(reported_via_tracing());
        });

        let silenced = tracing_subscriber::fmt()
            .with_max_level(tracing::level_filters::LevelFilter::OFF)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(silenced, || {
            assert!(!reported_via_tracing());
        });
    }

    #[test]
    fn test_format_failure_carries_call_site() {
        let location = Location::caller();
        let msg = format_failure(location, "clock_gettime(CLOCK_MONOTONIC)", Errno::EINVAL);
        assert!(msg.contains(file!()));
        assert!(msg.contains("clock_gettime(CLOCK_MONOTONIC)"));
        assert!(msg.contains(&format!("errno={}", Errno::EINVAL as i32)));
    }
}
