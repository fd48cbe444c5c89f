// Merge and plot example
//
// Merges every log file of a capture into one merge file, crops a time window
// out of it and writes voltage, current and power figures next to it.

use clap::Parser;
use powertrace_rs::plot::{plot_aux_voltage, plot_filter_check, plot_power_window, plot_spectrum};
use powertrace_rs::profile::INPUT_POWER_COLUMN;
use powertrace_rs::{
    prefix_from_capture, CropMode, LogMerger, MergeOptions, PeakSearch, Profile, Smoothing,
    SpectrumBuilder, TimeWindow, WindowExtractor, WindowMeans,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "merge_and_plot")]
#[command(version = "1.0")]
#[command(about = "Merge a streamed capture and plot its power trace")]
#[command(long_about = "Merge all files of a capture into <prefix>_merge.dat, crop a window out of it and write SVG figures of voltage, current and power. Pass any one file of the capture; the prefix is everything before its last underscore.")]
struct Args {
    /// Any file of the capture, e.g. data/run_0.dat
    capture: PathBuf,

    /// Measurement profile
    #[arg(long, default_value = "pwr")]
    profile: Profile,

    /// Savitzky-Golay window length (odd)
    #[arg(long, requires = "filter_order", help = "Smooth voltage and current with this window length")]
    filter_window: Option<usize>,

    /// Savitzky-Golay polynomial order
    #[arg(long, requires = "filter_window", help = "Polynomial order of the smoothing filter")]
    filter_order: Option<usize>,

    /// Anchor time zero on the startup current and apply the crop window
    #[arg(long)]
    startup: bool,

    /// Crop start in seconds; omit to start at the first row
    #[arg(long, allow_hyphen_values = true)]
    start: Option<f64>,

    /// Crop end in seconds; omit to keep all remaining rows
    #[arg(long, allow_hyphen_values = true)]
    end: Option<f64>,

    /// Annotate the figures with window means
    #[arg(long)]
    mean: bool,

    /// Compute the power spectrum and list its peaks
    #[arg(long)]
    fft: bool,

    /// Directory for the figures; defaults to the capture's directory
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

/// Crop bounds only apply to startup-anchored extraction; unset bounds stay open.
fn crop_selection(args: &Args) -> (CropMode, TimeWindow) {
    if args.startup {
        (
            CropMode::StartupAnchored,
            TimeWindow {
                start: args.start,
                end: args.end,
            },
        )
    } else {
        (CropMode::Plain, TimeWindow::full())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let prefix = prefix_from_capture(&args.capture);
    println!("{}", args.capture.display());

    let mut options = MergeOptions {
        profile: args.profile,
        ..MergeOptions::default()
    };
    if let (Some(window), Some(order)) = (args.filter_window, args.filter_order) {
        options = options.with_smoothing(Smoothing::new(window, order)?);
    }

    let Some(report) = LogMerger::new(&prefix, options).run()? else {
        eprintln!("No files found for prefix {}", prefix.display());
        std::process::exit(1);
    };
    println!(
        "✓ Merged {} files ({} rows) into {}",
        report.files.len(),
        report.rows(),
        report.merge_path.display()
    );

    let out_dir = args
        .out_dir
        .clone()
        .or_else(|| report.merge_path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = prefix
        .file_name()
        .map_or_else(|| "capture".to_string(), |n| n.to_string_lossy().into_owned());
    let figure = |suffix: &str| out_dir.join(format!("{}_{}.svg", stem, suffix));
    let title = report.merge_path.display().to_string();

    if let Some(smoothing) = &report.smoothing {
        plot_filter_check(&report.frame, &figure("filter"), &title, smoothing)?;
    }

    let (mode, window) = crop_selection(&args);
    let frame = WindowExtractor::new(args.profile)
        .with_header(true)
        .with_mode(mode)
        .with_window(window)
        .extract(&report.merge_path)?;
    println!("Window holds {} rows", frame.height());

    let means = if args.mean {
        match WindowMeans::from_frame(&frame) {
            Ok(means) => {
                println!("Mean = {:.3} V", means.voltage);
                println!("Mean = {:.3} A", means.current);
                println!("Mean = {:.3} W", means.power);
                Some(means)
            }
            Err(e) => {
                log::warn!("Failed to get mean data: {}", e);
                None
            }
        }
    } else {
        None
    };

    plot_power_window(&frame, &figure("power"), &title, means.as_ref())?;
    if plot_aux_voltage(&frame, &figure("aux"), &title)? {
        log::info!("Auxiliary voltage figure written");
    }

    if args.fft {
        let spectrum = SpectrumBuilder::new()
            .with_leading_bin(true)
            .compute_column(&frame, INPUT_POWER_COLUMN)?;
        let peaks = PeakSearch::default().find(&spectrum);
        for peak in &peaks {
            println!("{:4.4}    \t {:3.4}", peak.frequency_hz, peak.magnitude);
        }
        plot_spectrum(&spectrum, &peaks, &figure("fft"), INPUT_POWER_COLUMN, &title)?;
    }

    println!("✓ Figures written to {}", out_dir.display());
    Ok(())
}
