use crate::profile::{Profile, StreamConfig};
use crate::stream_session::{Batch, SessionError, StreamRead, StreamSession};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Batch carries no samples for AIN{0}")]
    MissingChannel(usize),
}

/// A streaming run that ended with an error. The session was still shut down and the
/// summary covers every batch accepted before the failure.
#[derive(Debug, thiserror::Error)]
#[error("Stream aborted after {} requests: {source}", .summary.requests)]
pub struct StreamFailure {
    pub summary: StreamSummary,
    #[source]
    pub source: StreamError,
}

/// Running average that halves towards every new value.
///
/// The first value is taken as is; afterwards `avg = (avg + value) / 2`. Recent batches
/// therefore weigh more than old ones.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
    count: u64,
    value: f64,
}

impl RunningAverage {
    pub fn update(&mut self, value: f64) -> f64 {
        self.value = if self.count == 0 {
            value
        } else {
            (self.value + value) / 2.0
        };
        self.count += 1;
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then_some(self.value)
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Voltage, current and power derived from one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl PowerSample {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            power: voltage * current,
        }
    }

    /// Differential reading of a batch: `V = AIN0 - AIN1`, `I = (AIN1 - AIN2) * scale`.
    pub fn from_batch(batch: &Batch, current_scale: f64) -> Result<Self, StreamError> {
        let mean = |index: usize| -> Result<f64, StreamError> {
            match batch.channel(index) {
                Some(samples) if !samples.is_empty() => {
                    Ok(samples.iter().sum::<f64>() / samples.len() as f64)
                }
                _ => Err(StreamError::MissingChannel(index)),
            }
        };
        let (ain0, ain1, ain2) = (mean(0)?, mean(1)?, mean(2)?);

        Ok(Self::new(ain0 - ain1, (ain1 - ain2) * current_scale))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerAverages {
    pub voltage: RunningAverage,
    pub current: RunningAverage,
    pub power: RunningAverage,
}

impl PowerAverages {
    pub fn update(&mut self, sample: &PowerSample) {
        self.voltage.update(sample.voltage);
        self.current.update(sample.current);
        self.power.update(sample.power);
    }
}

impl fmt::Display for PowerAverages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.voltage.value().unwrap_or(0.0);
        let i = self.current.value().unwrap_or(0.0);
        let p = self.power.value().unwrap_or(0.0);
        write!(
            f,
            "V={:.4} V,\tI= {:.0} mA,\t=> P = {:.0} mW",
            v,
            i * 1000.0,
            p * 1000.0
        )
    }
}

/// Counters and derived rates of a finished streaming run.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub requests: u64,
    pub packets: u64,
    pub samples_per_packet: u32,
    pub missed: u64,
    pub elapsed: Duration,
    pub scan_frequency: u32,
    pub num_channels: usize,
}

impl StreamSummary {
    pub fn total_samples(&self) -> u64 {
        self.packets * u64::from(self.samples_per_packet)
    }

    /// Samples received minus those reported missed.
    pub fn adjusted_samples(&self) -> u64 {
        self.total_samples().saturating_sub(self.missed)
    }

    pub fn packets_per_request(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.packets as f64 / self.requests as f64)
    }

    pub fn scan_total(&self) -> f64 {
        self.total_samples() as f64 / self.num_channels.max(1) as f64
    }

    pub fn timed_scan_rate(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.scan_total() / secs)
    }

    pub fn timed_sample_rate(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.adjusted_samples() as f64 / secs)
    }
}

impl fmt::Display for StreamSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        let rate = |r: Option<f64>| r.map_or_else(|| "n/a".to_string(), |r| format!("{r}"));

        writeln!(
            f,
            "{} requests with {} packets per request with {} samples per packet = {} samples total.",
            self.requests,
            rate(self.packets_per_request()),
            self.samples_per_packet,
            self.total_samples()
        )?;
        writeln!(f, "{} samples were lost due to errors.", self.missed)?;
        writeln!(f, "Adjusted number of samples = {}", self.adjusted_samples())?;
        writeln!(f, "The acquisition took {} seconds.", secs)?;
        writeln!(f, "Actual Scan Rate = {} Hz", self.scan_frequency)?;
        writeln!(
            f,
            "Timed Scan Rate = {} scans / {} seconds = {} Hz",
            self.scan_total(),
            secs,
            rate(self.timed_scan_rate())
        )?;
        write!(
            f,
            "Timed Sample Rate = {} samples / {} seconds = {} Hz",
            self.adjusted_samples(),
            secs,
            rate(self.timed_sample_rate())
        )
    }
}

/// Stops and closes a session exactly once, on `finish` or when dropped.
struct ActiveSession<'a, S: StreamSession> {
    session: &'a mut S,
    finished: bool,
}

impl<'a, S: StreamSession> ActiveSession<'a, S> {
    fn new(session: &'a mut S) -> Self {
        Self {
            session,
            finished: false,
        }
    }

    fn session(&mut self) -> &mut S {
        &mut *self.session
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        self.finished = true;
        let stopped = self.session.stop();
        log::debug!("Stream stopped");
        let closed = self.session.close();
        stopped.and(closed)
    }

    fn finish(mut self) -> Result<(), SessionError> {
        self.shutdown()
    }
}

impl<S: StreamSession> Drop for ActiveSession<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.shutdown() {
                log::warn!("Failed to shut down stream: {}", e);
            }
        }
    }
}

/// Consumes a bounded number of batches and keeps running averages of V, I and P.
#[derive(Debug, Clone)]
pub struct StreamAverager {
    config: StreamConfig,
    current_scale: f64,
    averages: PowerAverages,
    requests: u64,
    packets: u64,
    missed: u64,
}

impl StreamAverager {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_profile(config, Profile::default())
    }

    pub fn with_profile(config: StreamConfig, profile: Profile) -> Self {
        Self {
            config,
            current_scale: profile.current_scale(),
            averages: PowerAverages::default(),
            requests: 0,
            packets: 0,
            missed: 0,
        }
    }

    pub fn averages(&self) -> &PowerAverages {
        &self.averages
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Fold one batch into the averages.
    ///
    /// Error, missed-sample and underflow conditions are logged; the batch is used regardless.
    pub fn process(&mut self, batch: &Batch, expected_packets: u32) -> Result<PowerSample, StreamError> {
        if batch.errors != 0 {
            log::warn!("Errors counted: {}", batch.errors);
        }
        if batch.num_packets != expected_packets {
            log::warn!(
                "----- UNDERFLOW : {} packets (expected {})",
                batch.num_packets,
                expected_packets
            );
        }
        if batch.missed != 0 {
            log::warn!("+++ Missed {}", batch.missed);
        }

        let sample = PowerSample::from_batch(batch, self.current_scale)?;
        self.averages.update(&sample);
        self.requests += 1;
        self.packets += u64::from(batch.num_packets);
        self.missed += batch.missed;
        Ok(sample)
    }

    /// Clear the averages and counters.
    pub fn reset(&mut self) {
        self.averages = PowerAverages::default();
        self.requests = 0;
        self.packets = 0;
        self.missed = 0;
    }

    /// Stream until `max_requests` batches were processed or the session runs dry.
    ///
    /// Every run starts from cleared averages and counters. `report` sees the averages
    /// after every batch. The session is stopped and closed on every exit path, and the
    /// summary is computed even when the loop fails.
    pub fn run<S, F>(&mut self, session: &mut S, mut report: F) -> Result<StreamSummary, StreamFailure>
    where
        S: StreamSession,
        F: FnMut(&PowerAverages),
    {
        let _span =
            tracing::info_span!("stream_session", max_requests = self.config.max_requests).entered();

        self.reset();
        let expected_packets = session.packets_per_request();
        let samples_per_packet = session.samples_per_packet();

        let mut active = ActiveSession::new(session);
        let started = Instant::now();
        let outcome = self.stream(active.session(), expected_packets, &mut report);
        let elapsed = started.elapsed();
        let cleanup = active.finish();

        let summary = StreamSummary {
            requests: self.requests,
            packets: self.packets,
            samples_per_packet,
            missed: self.missed,
            elapsed,
            scan_frequency: self.config.scan_frequency,
            num_channels: self.config.num_channels,
        };

        match (outcome, cleanup) {
            (Ok(()), Ok(())) => Ok(summary),
            (Ok(()), Err(e)) => Err(StreamFailure {
                summary,
                source: e.into(),
            }),
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    log::warn!("Failed to shut down stream: {}", cleanup_err);
                }
                Err(StreamFailure { summary, source: e })
            }
        }
    }

    fn stream<S, F>(&mut self, session: &mut S, expected_packets: u32, report: &mut F) -> Result<(), StreamError>
    where
        S: StreamSession,
        F: FnMut(&PowerAverages),
    {
        session.start()?;
        log::info!("Stream started");

        while self.requests < self.config.max_requests {
            match session.read()? {
                StreamRead::Data(batch) => {
                    self.process(&batch, expected_packets)?;
                    report(&self.averages);
                }
                StreamRead::NoData => log::warn!("No data"),
                StreamRead::Finished => {
                    log::info!("Stream ended after {} requests", self.requests);
                    break;
                }
            }
        }
        Ok(())
    }
}
