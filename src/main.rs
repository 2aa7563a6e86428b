use anyhow::{Context, Result};
use clap::Parser;
use jitterscope::calibration::empty_loop;
use jitterscope::cli::Cli;
use jitterscope::{
    host, Calibration, CalibrationConfig, JitterMeter, JitterReport, MeasurementRun, PlotData,
    ReportBuffer,
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// The timed operation: an empty loop of `spins` iterations
fn null_operation(spins: &mut u64) {
    empty_loop(*spins);
}

fn validate_args(args: &Cli) -> Result<()> {
    if args.buckets == 0 {
        anyhow::bail!("Invalid value for --buckets: 0 (must be >= 1)");
    }
    if args.bucket_width_ns == 0 {
        anyhow::bail!("Invalid value for --bucket-width: 0 (must be >= 1)");
    }
    if args.loops == 0 {
        anyhow::bail!("Invalid value for --loops: 0 (must be >= 1)");
    }
    if args.calibration_passes == 0 {
        anyhow::bail!("Invalid value for --calibration-passes: 0 (must be >= 1)");
    }
    Ok(())
}

/// Run parameters and calibration values, prefixed by the description
fn run_title(args: &Cli, calibration: &Calibration) -> String {
    format!(
        "{}: busy_spins={}, cpu={}, fifo_priority={}, buckets={}, num_samples={},\n \
         pause={} timebase={}, warmup={}, gettime_cost={},\n \
         cycle_read_cost={}, cycles_per_sec={}, loop_1000_cost={}",
        args.descr,
        args.busy_spins,
        args.cpu,
        args.fifo_priority,
        args.buckets,
        args.num_samples,
        args.pause_ns,
        args.timebase,
        args.warmup,
        calibration.gettime_cost_ns(),
        calibration.cycle_read_cost_ns(),
        calibration.cycles_per_sec(),
        calibration.tight_loop_cost_ns()
    )
}

fn main() -> Result<()> {
    let args = Cli::parse();
    validate_args(&args)?;

    init_tracing(args.debug);

    if args.cpu >= 0 {
        host::pin_cpu(args.cpu as usize)
            .with_context(|| format!("failed to pin to CPU {}", args.cpu))?;
    }
    if args.fifo_priority >= 0 {
        host::set_fifo_priority(args.fifo_priority).with_context(|| {
            format!("failed to set SCHED_FIFO priority {}", args.fifo_priority)
        })?;
    }

    let mut meter = JitterMeter::new(args.bucket_width_ns)?;
    let config = CalibrationConfig {
        passes: args.calibration_passes,
        ..CalibrationConfig::default()
    };
    meter.calibrate_passes(&config)?;

    let run = MeasurementRun::new(args.warmup, args.num_samples, args.pause_ns, args.timebase);
    let mut results = ReportBuffer::new();
    let mut plot = ReportBuffer::new();
    let mut reports = Vec::new();
    let mut spins = args.busy_spins;

    for _ in 0..args.loops {
        meter.init_histogram(args.buckets)?;
        meter.run(&run, &mut null_operation, &mut spins)?;

        let title = run_title(&args, meter.calibration());
        if args.json {
            reports.push(JitterReport::new(
                title.as_str(),
                &run,
                meter.calibration(),
                meter.histogram(),
                args.verbose,
            )?);
        } else {
            results.append(format_args!("{}\n", title))?;
            results.write_all(meter.histogram(), args.verbose)?;
        }

        if args.gnuplot_file.is_some() {
            PlotData::from_histogram(meter.histogram(), title, args.num_samples)
                .write_gnuplot(&mut plot)?;
        }
    }

    if args.verbose >= 0 {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else {
            print!("{}", results.as_str());
        }

        if let Some(path) = &args.gnuplot_file {
            std::fs::write(path, plot.as_str())
                .with_context(|| format!("failed to write gnuplot file {}", path.display()))?;
        }
    }

    Ok(())
}
