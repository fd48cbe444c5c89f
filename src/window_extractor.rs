use crate::profile::{
    Profile, CAPTURE_TIME_COLUMN, INPUT_CURRENT_COLUMN, INPUT_POWER_COLUMN, INPUT_VOLTAGE_COLUMN,
    TIME_COLUMN,
};
use crate::raw_log::{column_values, read_tsv};
use polars::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data frame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("Column '{column}' is missing from {}", .path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("Empty selection: {0}")]
    EmptySelection(String),
}

/// How time zero is chosen and whether the crop window is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropMode {
    /// Time zero is the first row. The crop window is ignored.
    #[default]
    Plain,
    /// Time zero is the first row drawing at least the startup current, and the crop window applies.
    StartupAnchored,
}

/// Requested time range, in seconds of normalised time. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeWindow {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl TimeWindow {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn between(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn from_start(start: f64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn until(end: f64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Loads a capture or merge file and produces a time-normalised window with power.
#[derive(Debug, Clone)]
pub struct WindowExtractor {
    profile: Profile,
    has_header: bool,
    window: TimeWindow,
    mode: CropMode,
}

impl Default for WindowExtractor {
    fn default() -> Self {
        Self::new(Profile::default())
    }
}

impl WindowExtractor {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            has_header: false,
            window: TimeWindow::full(),
            mode: CropMode::Plain,
        }
    }

    /// Take column names from the file's first line instead of the profile.
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_mode(mut self, mode: CropMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> CropMode {
        self.mode
    }

    pub fn extract(&self, path: &Path) -> Result<DataFrame, ExtractError> {
        let _span = tracing::info_span!("extract_window", path = %path.display()).entered();
        let frame = self.load(path)?;
        self.extract_frame(frame)
    }

    /// Read a file into a frame holding at least capture time, voltage and current as `Float64`.
    pub fn load(&self, path: &Path) -> Result<DataFrame, ExtractError> {
        std::fs::metadata(path)?;
        let parse_error = |source| ExtractError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let raw = read_tsv(path, 0, self.has_header).map_err(parse_error)?;
        let [time, voltage, current] = self.profile.capture_columns();

        let frame = if self.has_header {
            for required in [time, voltage, current] {
                if raw.column(required).is_err() {
                    return Err(ExtractError::MissingColumn {
                        column: required.to_string(),
                        path: path.to_path_buf(),
                    });
                }
            }
            raw.lazy().with_columns([
                col(time).strict_cast(DataType::Float64),
                col(voltage).strict_cast(DataType::Float64),
                col(current).strict_cast(DataType::Float64),
            ])
        } else {
            // Headerless columns are named column_1, column_2, ...
            for (i, required) in [time, voltage, current].iter().enumerate() {
                if raw.width() <= i {
                    return Err(ExtractError::MissingColumn {
                        column: (*required).to_string(),
                        path: path.to_path_buf(),
                    });
                }
            }
            raw.lazy().select([
                col("column_1").strict_cast(DataType::Float64).alias(time),
                col("column_2").strict_cast(DataType::Float64).alias(voltage),
                col("column_3").strict_cast(DataType::Float64).alias(current),
            ])
        };

        frame.collect().map_err(parse_error)
    }

    /// Normalise time, derive power and crop an already loaded frame.
    pub fn extract_frame(&self, frame: DataFrame) -> Result<DataFrame, ExtractError> {
        if frame.height() == 0 {
            return Err(ExtractError::EmptySelection(
                "capture contains no rows".to_string(),
            ));
        }

        let mut frame = frame
            .lazy()
            .with_column(
                (col(CAPTURE_TIME_COLUMN) - col(CAPTURE_TIME_COLUMN).first()).alias(TIME_COLUMN),
            )
            .collect()?;

        if self.mode == CropMode::StartupAnchored {
            let anchor = self.startup_time(&frame)?;
            frame = frame
                .lazy()
                .with_column((col(TIME_COLUMN) - lit(anchor)).alias(TIME_COLUMN))
                .collect()?;
        }

        let frame = frame
            .lazy()
            .with_column(
                (col(INPUT_VOLTAGE_COLUMN) * col(INPUT_CURRENT_COLUMN)).alias(INPUT_POWER_COLUMN),
            )
            .collect()?;

        let (start, end) = self.crop_bounds(&frame)?;
        let cropped = frame.slice(start as i64, end - start);
        log::debug!(
            "Selected rows {}..{} of {} ({:?})",
            start,
            end,
            frame.height(),
            self.mode
        );

        match self.mode {
            // Second zeroing pass, relative to the first retained row.
            CropMode::Plain => Ok(cropped
                .lazy()
                .with_column((col(TIME_COLUMN) - col(TIME_COLUMN).first()).alias(TIME_COLUMN))
                .collect()?),
            CropMode::StartupAnchored => Ok(cropped),
        }
    }

    /// Normalised time of the first row at or above the startup current.
    ///
    /// Without such a row the first row is used, which leaves time zero unchanged.
    fn startup_time(&self, frame: &DataFrame) -> Result<f64, ExtractError> {
        let threshold = self.profile.startup_threshold();
        let current = column_values(frame, INPUT_CURRENT_COLUMN)?;
        let times = column_values(frame, TIME_COLUMN)?;

        let trigger = match current.iter().position(|&i| i >= threshold) {
            Some(idx) => idx,
            None => {
                log::warn!(
                    "Current never reaches {} A, anchoring at the first sample",
                    threshold
                );
                0
            }
        };
        log::debug!("Startup event at row {} (t = {} s)", trigger, times[trigger]);
        Ok(times[trigger])
    }

    /// Row range `[start, end)` to keep.
    fn crop_bounds(&self, frame: &DataFrame) -> Result<(usize, usize), ExtractError> {
        let height = frame.height();

        if self.mode == CropMode::Plain {
            if !self.window.is_full() {
                log::warn!(
                    "Crop window {:?} ignored: crop bounds only apply to startup-anchored extraction",
                    self.window
                );
            }
            return Ok((0, height));
        }

        let times = column_values(frame, TIME_COLUMN)?;
        let start = match self.window.start {
            None => 0,
            Some(start) => times.iter().position(|&t| t > start).ok_or_else(|| {
                ExtractError::EmptySelection(format!("no samples after {} s", start))
            })?,
        };
        let end = match self.window.end {
            None => height,
            Some(end) => times.iter().position(|&t| t >= end).unwrap_or(height),
        };

        if end <= start {
            return Err(ExtractError::EmptySelection(format!(
                "window {:?} selects no rows",
                self.window
            )));
        }
        Ok((start, end))
    }
}

/// Mean voltage, current and power of a window, for steady-state captures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowMeans {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    /// Time at which the mean annotations are placed.
    pub label_time: f64,
}

impl WindowMeans {
    /// Row whose time positions the annotation.
    pub const LABEL_ROW: usize = 25;

    pub fn from_frame(frame: &DataFrame) -> Result<Self, ExtractError> {
        if frame.height() <= Self::LABEL_ROW {
            return Err(ExtractError::EmptySelection(format!(
                "{} rows is too short for mean annotation (need more than {})",
                frame.height(),
                Self::LABEL_ROW
            )));
        }

        let means = frame
            .clone()
            .lazy()
            .select([
                col(INPUT_VOLTAGE_COLUMN).mean(),
                col(INPUT_CURRENT_COLUMN).mean(),
                col(INPUT_POWER_COLUMN).mean(),
            ])
            .collect()?;
        let first = |name: &str| -> Result<f64, ExtractError> {
            Ok(column_values(&means, name)?
                .first()
                .copied()
                .unwrap_or(f64::NAN))
        };

        Ok(Self {
            voltage: first(INPUT_VOLTAGE_COLUMN)?,
            current: first(INPUT_CURRENT_COLUMN)?,
            power: first(INPUT_POWER_COLUMN)?,
            label_time: column_values(frame, TIME_COLUMN)?[Self::LABEL_ROW],
        })
    }
}
