//! CLI argument parsing for jitterscope

use crate::clock::Timebase;
use crate::driver::NIC_10G_1KB_SEND_NS;
use crate::histogram::DEFAULT_BUCKET_COUNT;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "jitterscope")]
#[command(version)]
#[command(about = "Measure nanosecond-scale timing jitter of a null busy loop", long_about = None)]
pub struct Cli {
    /// Iterations of the empty loop timed as one sample
    #[arg(short = 'B', long = "busy-spins", value_name = "N", default_value = "100")]
    pub busy_spins: u64,

    /// CPU to pin the process to (-1 to not pin)
    #[arg(
        short = 'c',
        long = "cpu",
        value_name = "CPU",
        default_value = "5",
        allow_hyphen_values = true
    )]
    pub cpu: i32,

    /// Description included in each run's title
    #[arg(short = 'd', long = "descr", default_value = "Jitter null test")]
    pub descr: String,

    /// SCHED_FIFO priority (-1 to leave the scheduler alone)
    #[arg(
        short = 'f',
        long = "fifo-priority",
        value_name = "PRIO",
        default_value = "-1",
        allow_hyphen_values = true
    )]
    pub fifo_priority: i32,

    /// Write a gnuplot script with one histogram plot per run to this file
    #[arg(short = 'g', long = "gnuplot", value_name = "FILE")]
    pub gnuplot_file: Option<PathBuf>,

    /// Number of histogram buckets
    #[arg(short = 'b', long = "buckets", value_name = "N", default_value_t = DEFAULT_BUCKET_COUNT)]
    pub buckets: usize,

    /// Histogram bucket width in nanoseconds
    #[arg(long = "bucket-width", value_name = "NS", default_value = "10")]
    pub bucket_width_ns: u64,

    /// Number of test runs
    #[arg(short = 'l', long = "loops", default_value = "3")]
    pub loops: u32,

    /// Samples per run
    #[arg(short = 'n', long = "num-samples", value_name = "N", default_value = "1000000")]
    pub num_samples: u64,

    /// Pause after each sample in ns (negative: yielding sleep of |pause|/1000 us)
    #[arg(
        short = 'p',
        long = "pause",
        value_name = "NS",
        default_value_t = NIC_10G_1KB_SEND_NS,
        allow_hyphen_values = true
    )]
    pub pause_ns: i64,

    /// Timestamp source: rdtsc (1) or clock (2)
    #[arg(short = 't', long = "timebase", default_value = "rdtsc")]
    pub timebase: Timebase,

    /// Samples taken before accumulating results
    #[arg(short = 'w', long = "warmup", value_name = "N", default_value = "500")]
    pub warmup: u64,

    /// Calibration passes before the first run
    #[arg(long = "calibration-passes", value_name = "N", default_value = "10")]
    pub calibration_passes: u32,

    /// -1 quiet, 0 normal, 1+ per-bucket details
    #[arg(
        short = 'v',
        long = "verbose",
        default_value = "0",
        allow_hyphen_values = true
    )]
    pub verbose: i32,

    /// Print a JSON report instead of text
    #[arg(long = "json")]
    pub json: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
