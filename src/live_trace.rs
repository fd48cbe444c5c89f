use crate::profile::Profile;
use crate::stream_averager::PowerSample;
use std::collections::VecDeque;

/// Fixed-length rolling window of the most recent voltage, current and power readings.
///
/// The window starts out filled with zeros, and every push drops the oldest reading.
#[derive(Debug, Clone)]
pub struct LiveTrace {
    sample_rate_hz: f64,
    current_scale: f64,
    voltage: VecDeque<f64>,
    current: VecDeque<f64>,
    power: VecDeque<f64>,
}

impl LiveTrace {
    pub fn new(sample_rate_hz: f64, duration_secs: f64) -> Self {
        Self::with_profile(sample_rate_hz, duration_secs, Profile::default())
    }

    pub fn with_profile(sample_rate_hz: f64, duration_secs: f64, profile: Profile) -> Self {
        let capacity = ((sample_rate_hz * duration_secs) as usize).max(1);
        let zeros = || VecDeque::from(vec![0.0; capacity]);
        Self {
            sample_rate_hz,
            current_scale: profile.current_scale(),
            voltage: zeros(),
            current: zeros(),
            power: zeros(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.voltage.len()
    }

    /// Shift in one reading. `shunt_reading` is the raw shunt voltage; it is scaled to amps.
    pub fn push(&mut self, voltage: f64, shunt_reading: f64) -> PowerSample {
        let sample = PowerSample::new(voltage, shunt_reading * self.current_scale);
        for (window, value) in [
            (&mut self.voltage, sample.voltage),
            (&mut self.current, sample.current),
            (&mut self.power, sample.power),
        ] {
            window.pop_front();
            window.push_back(value);
        }
        sample
    }

    pub fn voltage(&self) -> &VecDeque<f64> {
        &self.voltage
    }

    pub fn current(&self) -> &VecDeque<f64> {
        &self.current
    }

    pub fn power(&self) -> &VecDeque<f64> {
        &self.power
    }

    /// Time axis of the window in seconds, oldest reading at 0.
    pub fn times(&self) -> Vec<f64> {
        (0..self.capacity())
            .map(|i| i as f64 / self.sample_rate_hz)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_zeros() {
        let trace = LiveTrace::new(100.0, 0.5);
        assert_eq!(trace.capacity(), 50);
        assert!(trace.voltage().iter().all(|&v| v == 0.0));
        assert!(trace.power().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_push_shifts_left() {
        let mut trace = LiveTrace::new(10.0, 0.3);
        assert_eq!(trace.capacity(), 3);

        let sample = trace.push(5.0, 1.0);
        assert!((sample.current - 0.2).abs() < 1e-12);
        assert!((sample.power - 1.0).abs() < 1e-12);

        trace.push(4.0, 0.5);
        trace.push(3.0, 0.0);
        trace.push(2.0, 0.0);

        assert_eq!(trace.voltage(), &VecDeque::from(vec![4.0, 3.0, 2.0]));
        assert_eq!(trace.capacity(), 3);
        assert!((trace.current()[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_window_keeps_one_reading() {
        let mut trace = LiveTrace::new(1.0, 0.1);
        assert_eq!(trace.capacity(), 1);
        trace.push(1.5, 0.0);
        assert_eq!(trace.voltage(), &VecDeque::from(vec![1.5]));
        assert_eq!(trace.times(), vec![0.0]);
    }
}
