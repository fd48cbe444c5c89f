use crate::profile::{RAW_SIGNAL_COLUMNS, RAW_TIME_COLUMN};
use polars::prelude::*;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Suffix appended to a capture prefix to name its merge file.
pub const MERGE_SUFFIX: &str = "_merge.dat";

/// Column layouts written by the streaming logger, depending on firmware and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLayout {
    /// 5 header rows, `Time, y0, y1, y2`.
    FourColumn,
    /// 4 header rows, `Time, y0, y1`.
    ThreeColumn,
}

impl LogLayout {
    /// Layouts in the order they are tried.
    pub const CANDIDATES: [LogLayout; 2] = [LogLayout::FourColumn, LogLayout::ThreeColumn];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLayout::FourColumn => "4-column",
            LogLayout::ThreeColumn => "3-column",
        }
    }

    /// Lines preceding the column header.
    pub fn header_rows(&self) -> usize {
        match self {
            LogLayout::FourColumn => 5,
            LogLayout::ThreeColumn => 4,
        }
    }

    pub fn signal_columns(&self) -> &'static [&'static str] {
        match self {
            LogLayout::FourColumn => &RAW_SIGNAL_COLUMNS,
            LogLayout::ThreeColumn => &RAW_SIGNAL_COLUMNS[..2],
        }
    }

    fn read(self, path: &Path) -> PolarsResult<DataFrame> {
        let mut columns = vec![col(RAW_TIME_COLUMN).strict_cast(DataType::Float64)];
        columns.extend(
            self.signal_columns()
                .iter()
                .map(|name| col(*name).strict_cast(DataType::Float64)),
        );

        read_tsv(path, self.header_rows(), true)?
            .lazy()
            .select(columns)
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RawLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: no known column layout matched ({})", .path.display(), describe_attempts(.attempts))]
    NoMatchingLayout {
        path: PathBuf,
        attempts: Vec<(LogLayout, PolarsError)>,
    },
}

fn describe_attempts(attempts: &[(LogLayout, PolarsError)]) -> String {
    let mut out = String::new();
    for (i, (layout, err)) in attempts.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "{}: {}", layout.as_str(), err);
    }
    out
}

/// A raw log together with the layout it was parsed with.
///
/// The frame holds `Time` followed by the layout's signal columns, all `Float64`.
#[derive(Debug, Clone)]
pub struct ParsedLog {
    pub layout: LogLayout,
    pub frame: DataFrame,
}

impl ParsedLog {
    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

/// Parse a raw log, trying each known layout in turn.
pub fn read_raw_log(path: &Path) -> Result<ParsedLog, RawLogError> {
    std::fs::metadata(path)?;

    let mut attempts = Vec::with_capacity(LogLayout::CANDIDATES.len());
    for layout in LogLayout::CANDIDATES {
        match layout.read(path) {
            Ok(frame) => {
                log::debug!(
                    "Parsed {} as {} log ({} rows)",
                    path.display(),
                    layout.as_str(),
                    frame.height()
                );
                return Ok(ParsedLog { layout, frame });
            }
            Err(e) => {
                log::debug!(
                    "{} is not a {} log: {}",
                    path.display(),
                    layout.as_str(),
                    e
                );
                attempts.push((layout, e));
            }
        }
    }

    Err(RawLogError::NoMatchingLayout {
        path: path.to_path_buf(),
        attempts,
    })
}

/// Read a tab separated file, skipping `skip_rows` lines before the header (or first data row).
pub(crate) fn read_tsv(path: &Path, skip_rows: usize, has_header: bool) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(has_header)
        .with_skip_rows(skip_rows)
        .map_parse_options(|opts| {
            opts.with_separator(b'\t')
                .with_quote_char(None)
                .with_truncate_ragged_lines(true)
        })
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

/// Values of a `Float64` column, nulls read as NaN.
pub(crate) fn column_values(frame: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    Ok(frame
        .column(name)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Capture prefix of a logged file: everything before the last `_` of its name.
///
/// `data/run_3.dat` gives `data/run`. A name without `_` keeps its stem.
pub fn prefix_from_capture(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stem = match name.rsplit_once('_') {
        Some((head, _)) => head.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name),
    };
    path.with_file_name(stem)
}

/// Path of the merge file belonging to a capture prefix.
pub fn merge_path(prefix: &Path) -> PathBuf {
    let mut merged = OsString::from(prefix.as_os_str());
    merged.push(MERGE_SUFFIX);
    PathBuf::from(merged)
}
