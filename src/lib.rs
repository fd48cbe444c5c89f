//! # PowerTrace RS
//!
//! A Rust library for turning streamed DAQ captures into voltage, current and power traces.
//!
//! A capture is logged as a series of tab separated files sharing a prefix
//! (`run_0.dat`, `run_1.dat`, ...). This library merges them into one
//! `run_merge.dat`, crops time windows out of merged data, computes summary
//! statistics and spectra, and monitors a live stream with running averages.
//!
//! ## Features
//!
//! - **Log merging**: Detects the 3 and 4 column log layouts and derives V, I and P
//! - **Smoothing**: Optional Savitzky-Golay filtering of voltage and current
//! - **Window extraction**: Plain or startup-anchored crops with time re-zeroing
//! - **Spectra**: Forward-normalised FFT magnitudes with peak detection via `rustfft`
//! - **Streaming**: Bounded acquisition with running averages and guaranteed session shutdown
//! - **DataFrame output**: Uses `polars` for all tabular data
//! - **Figures**: SVG rendering through `plotters`
//!
//! ## Examples
//!
//! ### Merge a Capture and Crop the Startup
//!
//! ```rust,no_run
//! use powertrace_rs::{
//!     prefix_from_capture, CropMode, LogMerger, MergeOptions, Smoothing, TimeWindow,
//!     WindowExtractor, WindowMeans,
//! };
//! use std::path::Path;
//!
//! let prefix = prefix_from_capture(Path::new("captures/run_0.dat"));
//! let options = MergeOptions::default().with_smoothing(Smoothing::new(31, 3)?);
//!
//! if let Some(report) = LogMerger::new(prefix, options).run()? {
//!     let window = WindowExtractor::default()
//!         .with_header(true)
//!         .with_mode(CropMode::StartupAnchored)
//!         .with_window(TimeWindow::between(0.1, 2.0))
//!         .extract(&report.merge_path)?;
//!
//!     let means = WindowMeans::from_frame(&window)?;
//!     println!("P = {:.3} W", means.power);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Spectrum Peaks
//!
//! ```rust
//! use powertrace_rs::{PeakSearch, SpectrumBuilder};
//!
//! let times: Vec<f64> = (0..200).map(|i| i as f64 / 100.0).collect();
//! let power: Vec<f64> = times.iter().map(|t| 0.5 + 0.1 * (6.0 * t).sin()).collect();
//!
//! let spectrum = SpectrumBuilder::new()
//!     .with_leading_bin(true)
//!     .compute(&times, &power)?;
//! let peaks = PeakSearch::default().find(&spectrum);
//! println!("DC power = {:.3} W", peaks[0].magnitude);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Streaming Averages
//!
//! ```rust,no_run
//! use powertrace_rs::{ReplaySession, StreamAverager, StreamConfig};
//! use std::path::Path;
//!
//! let config = StreamConfig::default().with_max_requests(10);
//! let mut session = ReplaySession::open(Path::new("captures/run_0.dat"), &config)?;
//!
//! let mut averager = StreamAverager::new(config);
//! match averager.run(&mut session, |averages| println!("{}", averages)) {
//!     Ok(summary) => println!("{}", summary),
//!     Err(failure) => eprintln!("{}\n{}", failure, failure.summary),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod live_trace;
pub mod log_merger;
pub mod plot;
pub mod profile;
pub mod raw_log;
pub mod smoothing;
pub mod spectrum;
pub mod stream_averager;
pub mod stream_session;
pub mod window_extractor;

#[cfg(test)]
mod test_support;

// Re-export the main types for convenience
pub use profile::{Profile, StreamConfig, UnknownProfile};

pub use raw_log::{merge_path, prefix_from_capture, read_raw_log, LogLayout, ParsedLog, RawLogError};

pub use smoothing::{Smoothing, SmoothingError};

pub use log_merger::{LogMerger, MergeError, MergeOptions, MergeReport};

pub use window_extractor::{CropMode, ExtractError, TimeWindow, WindowExtractor, WindowMeans};

pub use spectrum::{Peak, PeakSearch, Spectrum, SpectrumBuilder, SpectrumError};

pub use stream_session::{Batch, ReplaySession, SessionError, StreamRead, StreamSession};

pub use stream_averager::{
    PowerAverages, PowerSample, RunningAverage, StreamAverager, StreamError, StreamFailure,
    StreamSummary,
};

pub use live_trace::LiveTrace;

pub use plot::PlotError;
