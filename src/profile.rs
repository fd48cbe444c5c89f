use std::fmt;
use std::str::FromStr;

/// Raw time column written by the streaming logger.
pub const RAW_TIME_COLUMN: &str = "Time";
/// Raw signal columns, in channel order.
pub const RAW_SIGNAL_COLUMNS: [&str; 3] = ["y0", "y1", "y2"];

pub const CAPTURE_TIME_COLUMN: &str = "Capture Time, s";
pub const TIME_COLUMN: &str = "Time, s";
pub const INPUT_VOLTAGE_COLUMN: &str = "Input Voltage, V";
pub const INPUT_CURRENT_COLUMN: &str = "Input Current, A";
pub const INPUT_POWER_COLUMN: &str = "Input Power, W";
pub const RAW_VOLTAGE_COLUMN: &str = "Raw Input Voltage, V";
pub const RAW_CURRENT_COLUMN: &str = "Raw Input Current, A";
pub const AUX_VOLTAGE_COLUMN: &str = "TI Voltage, V";

/// Amps per volt across the current-sense shunt amplifier.
pub const CURRENT_SCALE: f64 = 0.2;

/// Current (A) that marks the device switching on.
pub const STARTUP_CURRENT_THRESHOLD: f64 = 0.07;

#[derive(Debug, thiserror::Error)]
#[error("Unknown configuration profile '{0}' (known profiles: pwr)")]
pub struct UnknownProfile(pub String);

/// Column and derivation scheme used to interpret a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Battery input power: y0 is the supply voltage, y1 the shunt amplifier output.
    #[default]
    Pwr,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Pwr => "pwr",
        }
    }

    /// Column names of a headerless capture file, in file order.
    pub fn capture_columns(&self) -> [&'static str; 3] {
        match self {
            Profile::Pwr => [
                CAPTURE_TIME_COLUMN,
                INPUT_VOLTAGE_COLUMN,
                INPUT_CURRENT_COLUMN,
            ],
        }
    }

    pub fn current_scale(&self) -> f64 {
        match self {
            Profile::Pwr => CURRENT_SCALE,
        }
    }

    pub fn startup_threshold(&self) -> f64 {
        match self {
            Profile::Pwr => STARTUP_CURRENT_THRESHOLD,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pwr" => Ok(Profile::Pwr),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

/// Settings for one streaming session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Number of non-empty batches to consume before stopping.
    pub max_requests: u64,
    /// Scan frequency in Hz.
    pub scan_frequency: u32,
    pub num_channels: usize,
    pub resolution_index: u8,
    pub settling_factor: u8,
    pub packets_per_request: u32,
    pub samples_per_packet: u32,
}

impl StreamConfig {
    pub const MAX_REQUESTS: u64 = 75;
    pub const SCAN_FREQUENCY: u32 = 100;
    pub const NUM_CHANNELS: usize = 4;
    pub const PACKETS_PER_REQUEST: u32 = 48;
    pub const SAMPLES_PER_PACKET: u32 = 25;

    pub fn with_max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_scan_frequency(mut self, scan_frequency: u32) -> Self {
        self.scan_frequency = scan_frequency;
        self
    }

    pub fn with_num_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = num_channels;
        self
    }

    /// Scans (one sample per channel) delivered by a full request.
    pub fn scans_per_request(&self) -> usize {
        let samples = self.packets_per_request as usize * self.samples_per_packet as usize;
        (samples / self.num_channels.max(1)).max(1)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_requests: Self::MAX_REQUESTS,
            scan_frequency: Self::SCAN_FREQUENCY,
            num_channels: Self::NUM_CHANNELS,
            resolution_index: 1,
            settling_factor: 1,
            packets_per_request: Self::PACKETS_PER_REQUEST,
            samples_per_packet: Self::SAMPLES_PER_PACKET,
        }
    }
}
