//! Host preparation before a measurement run
//!
//! Pinning and real-time priority are preconditions the caller sets up;
//! the measurement core never changes them on its own.

use crate::error::Result;

/// Pin the calling process to one CPU
#[cfg(target_os = "linux")]
pub fn pin_cpu(cpu: usize) -> Result<()> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    cpu_set.set(cpu).map_err(std::io::Error::from)?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(std::io::Error::from)?;
    tracing::debug!(cpu, "pinned to CPU");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_cpu(_cpu: usize) -> Result<()> {
    Err(unsupported("CPU pinning"))
}

/// Switch the calling process to `SCHED_FIFO` at `priority`
#[cfg(target_os = "linux")]
pub fn set_fifo_priority(priority: i32) -> Result<()> {
    // SAFETY: sched_param is plain data; all-zero is a valid value.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;

    // SAFETY: param outlives the call and pid 0 names the calling process.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    tracing::debug!(priority, "SCHED_FIFO enabled");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_fifo_priority(_priority: i32) -> Result<()> {
    Err(unsupported("SCHED_FIFO"))
}

#[cfg(not(target_os = "linux"))]
fn unsupported(what: &str) -> crate::error::JitterError {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("{} is only supported on Linux", what),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pin_to_out_of_range_cpu_fails() {
        // CpuSet holds at most CpuSet::count() CPUs
        assert!(pin_cpu(usize::MAX).is_err());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_invalid_fifo_priority_fails() {
        // valid SCHED_FIFO priorities are 1..=99
        assert!(set_fifo_priority(1000).is_err());
    }
}
