use crate::profile::TIME_COLUMN;
use crate::raw_log::column_values;
use polars::prelude::*;
use rustfft::{num_complex::Complex64, FftPlanner};

#[derive(Debug, thiserror::Error)]
pub enum SpectrumError {
    #[error("Data frame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Need at least 2 samples for a spectrum, got {0}")]
    TooFewSamples(usize),

    #[error("Time and value columns differ in length ({times} vs {values})")]
    LengthMismatch { times: usize, values: usize },

    #[error("Cannot derive a sample rate from the time column")]
    InvalidSampleRate,
}

/// One-sided magnitude spectrum, normalised so a bin holds the amplitude share of its frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub sample_rate_hz: f64,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub frequency_hz: f64,
    pub magnitude: f64,
}

/// Options of the spectrum computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectrumBuilder {
    remove_dc: bool,
    leading_bin: bool,
}

impl SpectrumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subtract the mean before transforming.
    pub fn remove_dc(mut self, remove_dc: bool) -> Self {
        self.remove_dc = remove_dc;
        self
    }

    /// Prepend a bin at `-Δf` holding the smallest magnitude, so the DC bin can be found as a peak.
    pub fn with_leading_bin(mut self, leading_bin: bool) -> Self {
        self.leading_bin = leading_bin;
        self
    }

    pub fn compute_column(&self, frame: &DataFrame, column: &str) -> Result<Spectrum, SpectrumError> {
        let times = column_values(frame, TIME_COLUMN)?;
        let values = column_values(frame, column)?;
        self.compute(&times, &values)
    }

    pub fn compute(&self, times: &[f64], values: &[f64]) -> Result<Spectrum, SpectrumError> {
        if times.len() != values.len() {
            return Err(SpectrumError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        let n = values.len();
        if n < 2 {
            return Err(SpectrumError::TooFewSamples(n));
        }

        let sample_rate_hz = median_step(times)
            .filter(|dt| dt.is_finite() && *dt > 0.0)
            .map(|dt| 1.0 / dt)
            .ok_or(SpectrumError::InvalidSampleRate)?;

        let offset = if self.remove_dc {
            values.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let mut buffer: Vec<Complex64> = values
            .iter()
            .map(|v| Complex64::new(v - offset, 0.0))
            .collect();

        let mut planner = FftPlanner::<f64>::new();
        planner.plan_fft_forward(n).process(&mut buffer);

        let bins = n / 2 + 1;
        let mut frequencies_hz: Vec<f64> = (0..bins)
            .map(|k| k as f64 * sample_rate_hz / n as f64)
            .collect();
        let mut magnitudes: Vec<f64> = buffer
            .iter()
            .take(bins)
            .map(|c| c.norm() / n as f64)
            .collect();

        if self.leading_bin {
            let floor = magnitudes.iter().copied().fold(f64::INFINITY, f64::min);
            let step = frequencies_hz[1] - frequencies_hz[0];
            frequencies_hz.insert(0, frequencies_hz[0] - step);
            magnitudes.insert(0, floor);
        }

        Ok(Spectrum {
            sample_rate_hz,
            frequencies_hz,
            magnitudes,
        })
    }
}

fn median_step(times: &[f64]) -> Option<f64> {
    let mut steps: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(f64::total_cmp);
    let mid = steps.len() / 2;
    Some(if steps.len() % 2 == 0 {
        (steps[mid - 1] + steps[mid]) / 2.0
    } else {
        steps[mid]
    })
}

/// Selects local maxima by height and by how far they rise above their neighbours.
#[derive(Debug, Clone, Copy)]
pub struct PeakSearch {
    pub min_height: f64,
    pub min_threshold: f64,
}

impl Default for PeakSearch {
    fn default() -> Self {
        Self {
            min_height: 2.5e-3,
            min_threshold: 1e-3,
        }
    }
}

impl PeakSearch {
    pub fn find(&self, spectrum: &Spectrum) -> Vec<Peak> {
        self.find_indices(&spectrum.magnitudes)
            .into_iter()
            .map(|index| Peak {
                index,
                frequency_hz: spectrum.frequencies_hz[index],
                magnitude: spectrum.magnitudes[index],
            })
            .collect()
    }

    pub fn find_indices(&self, x: &[f64]) -> Vec<usize> {
        local_maxima(x)
            .into_iter()
            .filter(|&i| x[i] >= self.min_height)
            .filter(|&i| (x[i] - x[i - 1]).min(x[i] - x[i + 1]) >= self.min_threshold)
            .collect()
    }
}

/// Indices of local maxima; a flat top counts once, at its middle (rounded down).
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(n: usize, rate: f64) -> (Vec<f64>, Vec<f64>) {
        let times: Vec<f64> = (0..n).map(|i| i as f64 / rate).collect();
        let values = times
            .iter()
            .map(|t| 1.0 + 0.5 * (2.0 * PI * 10.0 * t).sin())
            .collect();
        (times, values)
    }

    #[test]
    fn test_forward_normalised_magnitudes() {
        let (times, values) = tone(100, 100.0);
        let spectrum = SpectrumBuilder::new().compute(&times, &values).unwrap();

        assert!((spectrum.sample_rate_hz - 100.0).abs() < 1e-9);
        assert_eq!(spectrum.frequencies_hz.len(), 51);
        assert!((spectrum.magnitudes[0] - 1.0).abs() < 1e-9);
        assert!((spectrum.frequencies_hz[10] - 10.0).abs() < 1e-9);
        assert!((spectrum.magnitudes[10] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_remove_dc() {
        let (times, values) = tone(100, 100.0);
        let spectrum = SpectrumBuilder::new()
            .remove_dc(true)
            .compute(&times, &values)
            .unwrap();
        assert!(spectrum.magnitudes[0] < 1e-9);
    }

    #[test]
    fn test_peaks_include_dc_with_leading_bin() {
        let (times, values) = tone(100, 100.0);
        let spectrum = SpectrumBuilder::new()
            .with_leading_bin(true)
            .compute(&times, &values)
            .unwrap();

        assert_eq!(spectrum.magnitudes.len(), 52);
        assert!((spectrum.frequencies_hz[0] + 1.0).abs() < 1e-9);

        let peaks = PeakSearch::default().find(&spectrum);
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].frequency_hz.abs() < 1e-9);
        assert!((peaks[0].magnitude - 1.0).abs() < 1e-9);
        assert!((peaks[1].frequency_hz - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_rate_uses_median_step() {
        let times = [0.0, 0.01, 0.02, 0.5, 0.51, 0.52];
        let values = [0.0; 6];
        let spectrum = SpectrumBuilder::new().compute(&times, &values).unwrap();
        assert!((spectrum.sample_rate_hz - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_input() {
        let builder = SpectrumBuilder::new();
        assert!(matches!(
            builder.compute(&[0.0], &[1.0]),
            Err(SpectrumError::TooFewSamples(1))
        ));
        assert!(matches!(
            builder.compute(&[0.0, 0.0], &[1.0, 2.0]),
            Err(SpectrumError::InvalidSampleRate)
        ));
        assert!(matches!(
            builder.compute(&[0.0, 1.0], &[1.0]),
            Err(SpectrumError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_plateau_and_threshold() {
        let search = PeakSearch {
            min_height: 1.0,
            min_threshold: 0.5,
        };
        // Plateau at 2..=4 resolves to 3 but rises 0 above its neighbours.
        let x = [0.0, 1.0, 2.0, 2.0, 2.0, 0.0, 3.0, 0.0, 1.2, 1.0];
        assert_eq!(local_maxima(&x), vec![3, 6, 8]);
        assert_eq!(search.find_indices(&x), vec![6]);
    }
}
