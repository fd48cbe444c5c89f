// Streaming power example
//
// Replays a logged capture through the stream averager and prints running
// averages of voltage, current and power, then the acquisition summary.

use clap::Parser;
use powertrace_rs::{Profile, ReplaySession, StreamAverager, StreamConfig};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stream_power")]
#[command(version = "1.0")]
#[command(about = "Running power averages from a streamed capture")]
#[command(long_about = "Stream a capture file as if it came from the DAQ, keep running averages of V, I and P, and report sample counts and timed rates when the stream ends.")]
struct Args {
    /// Capture file to replay
    capture: PathBuf,

    /// Number of batches to consume
    #[arg(short = 'n', long, default_value_t = StreamConfig::MAX_REQUESTS)]
    max_requests: u64,

    /// Scan frequency in Hz
    #[arg(long, default_value_t = StreamConfig::SCAN_FREQUENCY)]
    scan_frequency: u32,

    /// Number of streamed channels
    #[arg(long, default_value_t = StreamConfig::NUM_CHANNELS)]
    channels: usize,

    /// Measurement profile
    #[arg(long, default_value = "pwr")]
    profile: Profile,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
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

    let config = StreamConfig::default()
        .with_max_requests(args.max_requests)
        .with_scan_frequency(args.scan_frequency)
        .with_num_channels(args.channels);

    println!("Configuring stream");
    let mut session = ReplaySession::open(&args.capture, &config)?;
    let mut averager = StreamAverager::with_profile(config, args.profile);

    println!("Start stream");
    let outcome = averager.run(&mut session, |averages| {
        print!("{}\r", averages);
        let _ = io::stdout().flush();
    });
    println!();
    println!("Stream stopped.\n");

    match outcome {
        Ok(summary) => {
            println!("{}", summary);
            Ok(())
        }
        Err(failure) => {
            eprintln!("{}", failure);
            println!("{}", failure.summary);
            std::process::exit(1);
        }
    }
}
