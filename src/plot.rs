use crate::profile::{
    AUX_VOLTAGE_COLUMN, CAPTURE_TIME_COLUMN, INPUT_CURRENT_COLUMN, INPUT_POWER_COLUMN,
    INPUT_VOLTAGE_COLUMN, RAW_CURRENT_COLUMN, TIME_COLUMN,
};
use crate::raw_log::column_values;
use crate::smoothing::Smoothing;
use crate::spectrum::{Peak, Spectrum};
use crate::window_extractor::WindowMeans;
use plotters::coord::Shift;
use plotters::prelude::*;
use polars::prelude::{DataFrame, PolarsError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("Data frame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Nothing to plot: {0}")]
    Empty(String),

    #[error("Failed to render figure: {0}")]
    Render(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<DrawingAreaErrorKind<E>> for PlotError {
    fn from(value: DrawingAreaErrorKind<E>) -> Self {
        PlotError::Render(format!("{value:?}"))
    }
}

const PANEL_SIZE: (u32, u32) = (600, 900);
const SPECTRUM_SIZE: (u32, u32) = (800, 500);

const RED_TAB: RGBColor = RGBColor(214, 39, 40);
const BLUE_TAB: RGBColor = RGBColor(31, 119, 180);
const GREEN_TAB: RGBColor = RGBColor(44, 160, 44);
const GREY_TAB: RGBColor = RGBColor(127, 127, 127);

struct Trace {
    ys: Vec<f64>,
    color: RGBColor,
}

struct Panel {
    title: String,
    y_desc: &'static str,
    traces: Vec<Trace>,
    /// Horizontal line and its annotation.
    mean: Option<(f64, String)>,
}

type Area<'a> = DrawingArea<SVGBackend<'a>, Shift>;

/// Min and max of the finite values, widened when flat.
fn bounds<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return None;
    }
    if hi - lo < f64::EPSILON {
        let pad = lo.abs().max(1.0) * 0.05;
        return Some((lo - pad, hi + pad));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

fn draw_panel(
    area: &Area<'_>,
    xs: &[f64],
    panel: &Panel,
    x_desc: Option<&str>,
    label_x: f64,
) -> Result<(), PlotError> {
    let (x_lo, x_hi) = bounds(xs).ok_or_else(|| PlotError::Empty(panel.title.clone()))?;
    let mean = panel.mean.as_ref().map(|(m, _)| m);
    let (y_lo, y_hi) = bounds(panel.traces.iter().flat_map(|t| t.ys.iter()).chain(mean))
        .ok_or_else(|| PlotError::Empty(panel.title.clone()))?;

    let mut chart = ChartBuilder::on(area)
        .margin(8)
        .caption(panel.title.as_str(), ("sans-serif", 16).into_font())
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 35)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)?;

    let mut mesh = chart.configure_mesh();
    mesh.y_desc(panel.y_desc).light_line_style(BLACK.mix(0.05));
    if let Some(x_desc) = x_desc {
        mesh.x_desc(x_desc);
    }
    mesh.draw()?;

    for trace in &panel.traces {
        let points = xs.iter().copied().zip(trace.ys.iter().copied());
        chart.draw_series(LineSeries::new(points, &trace.color))?;
    }

    if let Some((value, text)) = &panel.mean {
        chart.draw_series(LineSeries::new(vec![(x_lo, *value), (x_hi, *value)], &GREY_TAB))?;
        chart.draw_series(std::iter::once(Text::new(
            text.clone(),
            (label_x, *value),
            ("sans-serif", 14).into_font(),
        )))?;
    }
    Ok(())
}

fn draw_panels(path: &Path, heading: &str, xs: &[f64], panels: &[Panel], label_x: f64) -> Result<(), PlotError> {
    let root = SVGBackend::new(path, PANEL_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(heading, ("sans-serif", 12).into_font())?;

    let areas = root.split_evenly((panels.len(), 1));
    let last = panels.len().saturating_sub(1);
    for (i, (area, panel)) in areas.iter().zip(panels).enumerate() {
        let x_desc = (i == last).then_some("Time, s");
        draw_panel(area, xs, panel, x_desc, label_x)?;
    }
    root.present()?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

fn file_heading(title: &str) -> String {
    let name = Path::new(title)
        .file_name()
        .map_or_else(|| title.to_string(), |n| n.to_string_lossy().into_owned());
    format!("file: {}", name)
}

/// Voltage, current and power of an extracted window, stacked.
///
/// With `means`, each panel carries its mean as a grey line annotated at `means.label_time`.
pub fn plot_power_window(
    frame: &DataFrame,
    path: &Path,
    title: &str,
    means: Option<&WindowMeans>,
) -> Result<(), PlotError> {
    let xs = column_values(frame, TIME_COLUMN)?;
    let annotate = |value: f64, unit: &str| (value, format!("Mean = {:.3} {}", value, unit));

    let panels = [
        Panel {
            title: "Battery Input: Voltage".to_string(),
            y_desc: "Voltage, V",
            traces: vec![Trace {
                ys: column_values(frame, INPUT_VOLTAGE_COLUMN)?,
                color: RED_TAB,
            }],
            mean: means.map(|m| annotate(m.voltage, "V")),
        },
        Panel {
            title: "Battery Input: Current".to_string(),
            y_desc: "Current, A",
            traces: vec![Trace {
                ys: column_values(frame, INPUT_CURRENT_COLUMN)?,
                color: BLUE_TAB,
            }],
            mean: means.map(|m| annotate(m.current, "A")),
        },
        Panel {
            title: "Battery Input: Power".to_string(),
            y_desc: "Power, W",
            traces: vec![Trace {
                ys: column_values(frame, INPUT_POWER_COLUMN)?,
                color: GREEN_TAB,
            }],
            mean: means.map(|m| annotate(m.power, "W")),
        },
    ];

    let label_x = means.map_or(0.0, |m| m.label_time);
    draw_panels(path, &file_heading(title), &xs, &panels, label_x)
}

/// Raw current, smoothed current and both overlaid, against capture time.
pub fn plot_filter_check(
    frame: &DataFrame,
    path: &Path,
    title: &str,
    smoothing: &Smoothing,
) -> Result<(), PlotError> {
    let xs = column_values(frame, CAPTURE_TIME_COLUMN)?;
    let raw = column_values(frame, RAW_CURRENT_COLUMN)?;
    let filtered = column_values(frame, INPUT_CURRENT_COLUMN)?;

    let panels = [
        Panel {
            title: "Raw Input: Current".to_string(),
            y_desc: "Current, A",
            traces: vec![Trace {
                ys: raw.clone(),
                color: GREEN_TAB,
            }],
            mean: None,
        },
        Panel {
            title: format!(
                "Filter Window: {}, Filter Order: {}",
                smoothing.window(),
                smoothing.order()
            ),
            y_desc: "Current, A",
            traces: vec![Trace {
                ys: filtered.clone(),
                color: BLUE_TAB,
            }],
            mean: None,
        },
        Panel {
            title: "Raw and Filtered Combined: Current".to_string(),
            y_desc: "Current, A",
            traces: vec![
                Trace {
                    ys: raw,
                    color: GREEN_TAB,
                },
                Trace {
                    ys: filtered,
                    color: BLUE_TAB,
                },
            ],
            mean: None,
        },
    ];

    draw_panels(path, &file_heading(title), &xs, &panels, 0.0)
}

/// Auxiliary voltage overlaid with input power. Returns `false` when the frame has no
/// auxiliary channel.
pub fn plot_aux_voltage(frame: &DataFrame, path: &Path, title: &str) -> Result<bool, PlotError> {
    if frame.column(AUX_VOLTAGE_COLUMN).is_err() {
        return Ok(false);
    }
    let xs = column_values(frame, TIME_COLUMN)?;
    let panel = Panel {
        title: "TI voltage".to_string(),
        y_desc: "V / W",
        traces: vec![
            Trace {
                ys: column_values(frame, AUX_VOLTAGE_COLUMN)?,
                color: RED_TAB,
            },
            Trace {
                ys: column_values(frame, INPUT_POWER_COLUMN)?,
                color: GREEN_TAB,
            },
        ],
        mean: None,
    };

    let root = SVGBackend::new(path, (SPECTRUM_SIZE.0, PANEL_SIZE.1 / 2)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(&file_heading(title), ("sans-serif", 12).into_font())?;
    draw_panel(&root, &xs, &panel, Some("Time, s"), 0.0)?;
    root.present()?;
    Ok(true)
}

/// Magnitude spectrum on a log axis with the detected peaks crossed out.
///
/// The first peak is labelled as the DC power.
pub fn plot_spectrum(
    spectrum: &Spectrum,
    peaks: &[Peak],
    path: &Path,
    parameter: &str,
    title: &str,
) -> Result<(), PlotError> {
    let floor = spectrum
        .magnitudes
        .iter()
        .copied()
        .filter(|m| m.is_finite() && *m > 0.0)
        .fold(f64::INFINITY, f64::min);
    let ceiling = spectrum
        .magnitudes
        .iter()
        .copied()
        .filter(|m| m.is_finite())
        .fold(0.0, f64::max);
    if !floor.is_finite() || ceiling <= 0.0 {
        return Err(PlotError::Empty(format!("spectrum of {}", parameter)));
    }

    let x_hi = match peaks.iter().map(|p| p.frequency_hz).reduce(f64::max) {
        Some(highest) => highest + 50.0,
        None => spectrum.frequencies_hz.last().copied().unwrap_or(0.0),
    };
    let (y_lo, y_hi) = (floor * 0.5, ceiling * 2.0);

    let root = SVGBackend::new(path, SPECTRUM_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(&file_heading(title), ("sans-serif", 12).into_font())?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(format!("FFT of {}", parameter), ("sans-serif", 16).into_font())
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(-5.0..x_hi, (y_lo..y_hi).log_scale())?;

    chart
        .configure_mesh()
        .x_desc("Frequency, Hz")
        .y_desc(parameter)
        .light_line_style(BLACK.mix(0.05))
        .draw()?;

    let points = spectrum
        .frequencies_hz
        .iter()
        .copied()
        .zip(spectrum.magnitudes.iter().map(|m| m.max(y_lo)));
    chart.draw_series(LineSeries::new(points, &BLUE_TAB))?;
    chart.draw_series(
        peaks
            .iter()
            .map(|p| Cross::new((p.frequency_hz, p.magnitude), 5, &RED_TAB)),
    )?;

    if let Some(dc) = peaks.first() {
        let label_x = spectrum
            .frequencies_hz
            .get(dc.index + 5)
            .copied()
            .unwrap_or(dc.frequency_hz);
        chart.draw_series(std::iter::once(Text::new(
            format!("DC power = {:.3} W", dc.magnitude),
            (label_x, dc.magnitude),
            ("sans-serif", 14).into_font(),
        )))?;
    }

    root.present()?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{PeakSearch, SpectrumBuilder};
    use crate::test_support::ScratchDir;
    use polars::prelude::*;

    fn window_frame(rows: usize) -> DataFrame {
        let t: Vec<f64> = (0..rows).map(|i| i as f64 * 0.01).collect();
        let v: Vec<f64> = vec![3.7; rows];
        let i: Vec<f64> = (0..rows).map(|k| 0.1 + 0.01 * (k % 3) as f64).collect();
        let p: Vec<f64> = v.iter().zip(&i).map(|(v, i)| v * i).collect();
        DataFrame::new(vec![
            Series::new(TIME_COLUMN.into(), t).into(),
            Series::new(INPUT_VOLTAGE_COLUMN.into(), v).into(),
            Series::new(INPUT_CURRENT_COLUMN.into(), i).into(),
            Series::new(INPUT_POWER_COLUMN.into(), p).into(),
        ])
        .unwrap()
    }

    fn svg(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_power_window_with_means() {
        let dir = ScratchDir::new("plot_window");
        let frame = window_frame(40);
        let means = WindowMeans::from_frame(&frame).unwrap();
        let path = dir.path().join("window.svg");

        plot_power_window(&frame, &path, "/tmp/run_merge.dat", Some(&means)).unwrap();
        let contents = svg(&path);
        assert!(contents.contains("<svg"));
        assert!(contents.contains("Mean = 3.700 V"));
        assert!(contents.contains("file: run_merge.dat"));
    }

    #[test]
    fn test_missing_column_is_reported() {
        let dir = ScratchDir::new("plot_missing");
        let frame = window_frame(5).drop(INPUT_POWER_COLUMN).unwrap();
        let result = plot_power_window(&frame, &dir.path().join("w.svg"), "w", None);
        assert!(matches!(result, Err(PlotError::Polars(_))));
    }

    #[test]
    fn test_aux_voltage_skipped_without_column() {
        let dir = ScratchDir::new("plot_aux");
        let path = dir.path().join("aux.svg");
        assert!(!plot_aux_voltage(&window_frame(5), &path, "w").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_spectrum_figure() {
        let dir = ScratchDir::new("plot_fft");
        let times: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let values: Vec<f64> = times
            .iter()
            .map(|t| 0.5 + 0.1 * (2.0 * std::f64::consts::PI * 10.0 * t).sin())
            .collect();
        let spectrum = SpectrumBuilder::new()
            .with_leading_bin(true)
            .compute(&times, &values)
            .unwrap();
        let peaks = PeakSearch::default().find(&spectrum);
        let path = dir.path().join("fft.svg");

        plot_spectrum(&spectrum, &peaks, &path, INPUT_POWER_COLUMN, "run").unwrap();
        assert!(svg(&path).contains("DC power = 0.500 W"));
    }

    #[test]
    fn test_flat_spectrum_is_rejected() {
        let dir = ScratchDir::new("plot_flat");
        let spectrum = Spectrum {
            sample_rate_hz: 1.0,
            frequencies_hz: vec![0.0, 0.5],
            magnitudes: vec![0.0, 0.0],
        };
        let result = plot_spectrum(&spectrum, &[], &dir.path().join("f.svg"), "p", "f");
        assert!(matches!(result, Err(PlotError::Empty(_))));
    }
}
