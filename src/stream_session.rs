use crate::profile::StreamConfig;
use crate::raw_log::{column_values, read_raw_log, RawLogError};
use polars::prelude::*;
use std::path::Path;

/// Samples delivered by one streaming read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Samples per analog input, AIN0 first.
    pub channels: Vec<Vec<f64>>,
    pub errors: u32,
    pub missed: u64,
    pub num_packets: u32,
}

impl Batch {
    pub fn new(channels: Vec<Vec<f64>>, num_packets: u32) -> Self {
        Self {
            channels,
            errors: 0,
            missed: 0,
            num_packets,
        }
    }

    pub fn with_errors(mut self, errors: u32) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_missed(mut self, missed: u64) -> Self {
        self.missed = missed;
        self
    }

    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}

/// Result of a single blocking read.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRead {
    Data(Batch),
    /// The read timed out before the device delivered anything.
    NoData,
    /// The stream has no more data.
    Finished,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data frame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to load replay data: {0}")]
    RawLog(#[from] RawLogError),

    #[error("Stream is not running")]
    NotStreaming,

    #[error("Session is closed")]
    Closed,

    #[error("Device error: {0}")]
    Device(String),
}

/// A streaming acquisition device.
pub trait StreamSession {
    fn start(&mut self) -> Result<(), SessionError>;

    /// Block until the next batch is available.
    fn read(&mut self) -> Result<StreamRead, SessionError>;

    fn stop(&mut self) -> Result<(), SessionError>;

    fn close(&mut self) -> Result<(), SessionError>;

    /// Packets a full read is expected to carry.
    fn packets_per_request(&self) -> u32;

    fn samples_per_packet(&self) -> u32;
}

/// Replays a logged capture as if it were streamed by the device.
///
/// Each signal column of the log becomes one analog input. Rows are handed out in
/// batches of one request's worth of scans.
#[derive(Debug, Clone)]
pub struct ReplaySession {
    channels: Vec<Vec<f64>>,
    position: usize,
    packets_per_request: u32,
    samples_per_packet: u32,
    streaming: bool,
    closed: bool,
}

impl ReplaySession {
    pub fn open(path: &Path, config: &StreamConfig) -> Result<Self, SessionError> {
        let parsed = read_raw_log(path)?;
        let channels = parsed
            .layout
            .signal_columns()
            .iter()
            .map(|name| column_values(&parsed.frame, name))
            .collect::<PolarsResult<Vec<_>>>()?;

        log::debug!(
            "Replaying {} scans of {} channels from {}",
            parsed.height(),
            channels.len(),
            path.display()
        );
        Ok(Self::from_channels(channels, config))
    }

    /// Channels of unequal length are cut to the shortest one.
    pub fn from_channels(mut channels: Vec<Vec<f64>>, config: &StreamConfig) -> Self {
        let scans = channels.iter().map(Vec::len).min().unwrap_or(0);
        if channels.iter().any(|c| c.len() != scans) {
            log::warn!("Channels differ in length, replaying the first {} scans", scans);
            for channel in &mut channels {
                channel.truncate(scans);
            }
        }
        Self {
            channels,
            position: 0,
            packets_per_request: config.packets_per_request,
            samples_per_packet: config.samples_per_packet,
            streaming: false,
            closed: false,
        }
    }

    fn scans(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    fn scans_per_batch(&self) -> usize {
        let samples = self.packets_per_request as usize * self.samples_per_packet as usize;
        (samples / self.channels.len().max(1)).max(1)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl StreamSession for ReplaySession {
    fn start(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.streaming = true;
        Ok(())
    }

    fn read(&mut self) -> Result<StreamRead, SessionError> {
        if !self.streaming {
            return Err(SessionError::NotStreaming);
        }
        let scans = self.scans();
        if self.position >= scans {
            return Ok(StreamRead::Finished);
        }

        let end = (self.position + self.scans_per_batch()).min(scans);
        let channels: Vec<Vec<f64>> = self
            .channels
            .iter()
            .map(|c| c[self.position..end].to_vec())
            .collect();
        let samples = (end - self.position) * self.channels.len();
        let packets = samples.div_ceil(self.samples_per_packet.max(1) as usize) as u32;
        self.position = end;

        Ok(StreamRead::Data(Batch::new(channels, packets)))
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        self.streaming = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.streaming = false;
        self.closed = true;
        Ok(())
    }

    fn packets_per_request(&self) -> u32 {
        self.packets_per_request
    }

    fn samples_per_packet(&self) -> u32 {
        self.samples_per_packet
    }
}
