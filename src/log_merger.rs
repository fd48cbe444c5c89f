use crate::profile::{
    Profile, AUX_VOLTAGE_COLUMN, CAPTURE_TIME_COLUMN, INPUT_CURRENT_COLUMN, INPUT_POWER_COLUMN,
    INPUT_VOLTAGE_COLUMN, RAW_CURRENT_COLUMN, RAW_SIGNAL_COLUMNS, RAW_TIME_COLUMN,
    RAW_VOLTAGE_COLUMN,
};
use crate::raw_log::{self, column_values, read_raw_log, ParsedLog, RawLogError};
use crate::smoothing::{Smoothing, SmoothingError};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data frame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to parse raw log: {0}")]
    RawLog(#[from] RawLogError),

    #[error("Failed to smooth {}: {source}", .path.display())]
    Smoothing {
        path: PathBuf,
        #[source]
        source: SmoothingError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    pub profile: Profile,
    /// Filter applied to voltage and current of every file; `None` keeps raw values.
    pub smoothing: Option<Smoothing>,
}

impl MergeOptions {
    pub fn with_smoothing(mut self, smoothing: Smoothing) -> Self {
        self.smoothing = Some(smoothing);
        self
    }
}

/// Outcome of a merge that found at least one file.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub merge_path: PathBuf,
    /// Merged files, in the order their rows appear.
    pub files: Vec<PathBuf>,
    /// Row count of each merged file.
    pub rows_per_file: Vec<usize>,
    pub smoothing: Option<Smoothing>,
    pub frame: DataFrame,
}

impl MergeReport {
    pub fn rows(&self) -> usize {
        self.frame.height()
    }

    /// Whether a raw-vs-filtered check figure is worth drawing.
    pub fn is_smoothed(&self) -> bool {
        self.smoothing.is_some()
    }
}

/// Combines every raw log sharing a filename prefix into one merge file.
#[derive(Debug, Clone)]
pub struct LogMerger {
    prefix: PathBuf,
    options: MergeOptions,
}

impl LogMerger {
    pub fn new(prefix: impl Into<PathBuf>, options: MergeOptions) -> Self {
        Self {
            prefix: prefix.into(),
            options,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn merge_path(&self) -> PathBuf {
        raw_log::merge_path(&self.prefix)
    }

    fn directory(&self) -> PathBuf {
        match self.prefix.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Files in the prefix's directory whose name starts with the prefix, sorted by name.
    ///
    /// Symlinks are followed. The merge output itself is never included.
    pub fn discover(&self) -> Result<Vec<PathBuf>, MergeError> {
        let base = self.prefix.file_name().unwrap_or_default();
        let merge_path = self.merge_path();
        let merge_name = merge_path.file_name();

        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.directory())? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.as_encoded_bytes().starts_with(base.as_encoded_bytes())
                || Some(name.as_os_str()) == merge_name
            {
                continue;
            }
            let path = entry.path();
            if !path.is_file() {
                log::debug!("Skipping {}: not a file", path.display());
                continue;
            }
            files.push(path);
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(files)
    }

    /// Turn one parsed log into derived rows.
    pub fn derive(&self, parsed: &ParsedLog, source: &Path) -> Result<DataFrame, MergeError> {
        let has_aux = parsed.layout.signal_columns().len() > 2;

        let mut columns = vec![
            col(RAW_TIME_COLUMN).alias(CAPTURE_TIME_COLUMN),
            col(RAW_SIGNAL_COLUMNS[0]).alias(RAW_VOLTAGE_COLUMN),
            (col(RAW_SIGNAL_COLUMNS[1]) * lit(self.options.profile.current_scale()))
                .alias(RAW_CURRENT_COLUMN),
        ];
        if has_aux {
            columns.push(col(RAW_SIGNAL_COLUMNS[2]).alias(AUX_VOLTAGE_COLUMN));
        }
        let mut frame = parsed.frame.clone().lazy().select(columns).collect()?;

        match self.options.smoothing {
            Some(smoothing) => {
                let smooth = |name: &str| -> Result<Vec<f64>, MergeError> {
                    smoothing
                        .apply(&column_values(&frame, name)?)
                        .map_err(|err| MergeError::Smoothing {
                            path: source.to_path_buf(),
                            source: err,
                        })
                };
                let voltage = smooth(RAW_VOLTAGE_COLUMN)?;
                let current = smooth(RAW_CURRENT_COLUMN)?;

                let voltage: Column = Series::new(INPUT_VOLTAGE_COLUMN.into(), voltage).into();
                let current: Column = Series::new(INPUT_CURRENT_COLUMN.into(), current).into();
                frame.with_column(voltage)?;
                frame.with_column(current)?;
            }
            None => {
                frame = frame
                    .lazy()
                    .with_columns([
                        col(RAW_VOLTAGE_COLUMN).alias(INPUT_VOLTAGE_COLUMN),
                        col(RAW_CURRENT_COLUMN).alias(INPUT_CURRENT_COLUMN),
                    ])
                    .collect()?;
            }
        }

        let mut output = vec![
            col(CAPTURE_TIME_COLUMN),
            col(INPUT_VOLTAGE_COLUMN),
            col(INPUT_CURRENT_COLUMN),
            (col(INPUT_VOLTAGE_COLUMN) * col(INPUT_CURRENT_COLUMN)).alias(INPUT_POWER_COLUMN),
        ];
        if self.options.smoothing.is_some() {
            output.push(col(RAW_VOLTAGE_COLUMN));
            output.push(col(RAW_CURRENT_COLUMN));
        }
        if has_aux {
            output.push(col(AUX_VOLTAGE_COLUMN));
        }

        log::debug!("Derived {} rows from {}", frame.height(), source.display());
        Ok(frame.lazy().select(output).collect()?)
    }

    /// Discover, derive, concatenate and write the merge file.
    ///
    /// Returns `Ok(None)` without touching the filesystem when no file matches the prefix.
    /// An existing merge file is overwritten.
    pub fn run(&self) -> Result<Option<MergeReport>, MergeError> {
        let _span = tracing::info_span!("merge_logs", prefix = %self.prefix.display()).entered();

        let files = self.discover()?;
        if files.is_empty() {
            log::info!(
                "No files starting with {} found, nothing to merge",
                self.prefix.display()
            );
            return Ok(None);
        }
        log::info!("Merging {:?}", files);

        let mut frames = Vec::with_capacity(files.len());
        for file in &files {
            let parsed = read_raw_log(file)?;
            frames.push(self.derive(&parsed, file)?);
        }
        let rows_per_file = frames.iter().map(DataFrame::height).collect();

        let mut frame = concat_aligned(frames)?;
        let merge_path = self.merge_path();
        write_merge_file(&merge_path, &mut frame)?;
        log::info!(
            "Wrote {} rows from {} files to {}",
            frame.height(),
            files.len(),
            merge_path.display()
        );

        Ok(Some(MergeReport {
            merge_path,
            files,
            rows_per_file,
            smoothing: self.options.smoothing,
            frame,
        }))
    }
}

/// Stack frames in order, giving files without the auxiliary channel a null column.
fn concat_aligned(mut frames: Vec<DataFrame>) -> Result<DataFrame, MergeError> {
    let any_aux = frames.iter().any(|f| f.column(AUX_VOLTAGE_COLUMN).is_ok());

    if any_aux {
        for frame in &mut frames {
            if frame.column(AUX_VOLTAGE_COLUMN).is_err() {
                let height = frame.height();
                let nulls: Column =
                    Series::full_null(AUX_VOLTAGE_COLUMN.into(), height, &DataType::Float64).into();
                frame.with_column(nulls)?;
            }
        }
    }

    let lazy: Vec<LazyFrame> = frames.into_iter().map(|f| f.lazy()).collect();
    Ok(concat(lazy, UnionArgs::default())?.collect()?)
}

fn write_merge_file(path: &Path, frame: &mut DataFrame) -> Result<(), MergeError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .with_float_precision(Some(6))
        .finish(frame)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::CURRENT_SCALE;
    use crate::test_support::{three_column_log, ScratchDir, FOUR_COLUMN_LOG, THREE_COLUMN_LOG};

    fn values(frame: &DataFrame, name: &str) -> Vec<f64> {
        column_values(frame, name).unwrap()
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-12, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_derives_voltage_current_and_power() {
        let dir = ScratchDir::new("merge_example");
        dir.write("cap_0.dat", THREE_COLUMN_LOG);

        let report = LogMerger::new(dir.path().join("cap"), MergeOptions::default())
            .run()
            .unwrap()
            .unwrap();

        assert_eq!(report.rows(), 2);
        assert_close(&values(&report.frame, INPUT_CURRENT_COLUMN), &[0.2, 0.4]);
        assert_close(&values(&report.frame, INPUT_VOLTAGE_COLUMN), &[5.0, 5.0]);
        assert_close(&values(&report.frame, INPUT_POWER_COLUMN), &[1.0, 2.0]);
        assert!(report.frame.column(RAW_CURRENT_COLUMN).is_err());
        assert!(report.frame.column(AUX_VOLTAGE_COLUMN).is_err());
        assert!(report.merge_path.exists());
    }

    #[test]
    fn test_current_is_scaled_raw_y1() {
        let dir = ScratchDir::new("merge_scale");
        let rows: Vec<(f64, f64, f64)> = (0..10)
            .map(|i| (f64::from(i) * 0.01, 3.7, 0.13 * f64::from(i)))
            .collect();
        let path = dir.write("cap_0.dat", &three_column_log(&rows));

        let merger = LogMerger::new(dir.path().join("cap"), MergeOptions::default());
        let parsed = read_raw_log(&path).unwrap();
        let derived = merger.derive(&parsed, &path).unwrap();

        let y1 = values(&parsed.frame, "y1");
        let expected: Vec<f64> = y1.iter().map(|v| v * CURRENT_SCALE).collect();
        assert_eq!(derived.height(), parsed.height());
        assert_eq!(values(&derived, INPUT_CURRENT_COLUMN), expected);
    }

    #[test]
    fn test_no_matching_files_writes_nothing() {
        let dir = ScratchDir::new("merge_empty");
        dir.write("other_0.dat", THREE_COLUMN_LOG);

        let merger = LogMerger::new(dir.path().join("cap"), MergeOptions::default());
        assert!(merger.run().unwrap().is_none());
        assert!(!merger.merge_path().exists());
    }

    #[test]
    fn test_concatenates_in_sorted_filename_order() {
        let dir = ScratchDir::new("merge_order");
        dir.write("cap_1.dat", &three_column_log(&[(10.0, 1.0, 1.0), (10.1, 1.0, 1.0), (10.2, 1.0, 1.0)]));
        dir.write("cap_0.dat", &three_column_log(&[(0.0, 2.0, 1.0), (0.1, 2.0, 1.0)]));
        dir.write("other_0.dat", THREE_COLUMN_LOG);
        dir.write("cap_merge.dat", "stale\n");

        let report = LogMerger::new(dir.path().join("cap"), MergeOptions::default())
            .run()
            .unwrap()
            .unwrap();

        let names: Vec<_> = report
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cap_0.dat", "cap_1.dat"]);
        assert_eq!(report.rows_per_file, vec![2, 3]);
        assert_eq!(report.rows(), 5);
        assert_close(
            &values(&report.frame, CAPTURE_TIME_COLUMN),
            &[0.0, 0.1, 10.0, 10.1, 10.2],
        );
        assert_close(
            &values(&report.frame, INPUT_VOLTAGE_COLUMN),
            &[2.0, 2.0, 1.0, 1.0, 1.0],
        );

        let written = std::fs::read_to_string(&report.merge_path).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Capture Time, s\tInput Voltage, V\tInput Current, A\tInput Power, W"
        );
        assert_eq!(lines.next().unwrap(), "0.000000\t2.000000\t0.200000\t0.400000");
        assert_eq!(lines.count(), 4);
    }

    #[test]
    fn test_mixed_layouts_pad_auxiliary_channel() {
        let dir = ScratchDir::new("merge_mixed");
        dir.write("cap_0.dat", FOUR_COLUMN_LOG);
        dir.write("cap_1.dat", THREE_COLUMN_LOG);

        let report = LogMerger::new(dir.path().join("cap"), MergeOptions::default())
            .run()
            .unwrap()
            .unwrap();

        let aux = report.frame.column(AUX_VOLTAGE_COLUMN).unwrap();
        assert_eq!(aux.len(), 5);
        assert_eq!(aux.null_count(), 2);
    }

    #[test]
    fn test_smoothing_keeps_raw_columns() {
        let dir = ScratchDir::new("merge_smooth");
        let rows: Vec<(f64, f64, f64)> = (0..15)
            .map(|i| {
                let noise = if i % 2 == 0 { 0.05 } else { -0.05 };
                (f64::from(i) * 0.01, 3.7 + noise, 1.0 + noise)
            })
            .collect();
        dir.write("cap_0.dat", &three_column_log(&rows));

        let options = MergeOptions::default().with_smoothing(Smoothing::new(5, 2).unwrap());
        let report = LogMerger::new(dir.path().join("cap"), options)
            .run()
            .unwrap()
            .unwrap();

        assert!(report.is_smoothed());
        let raw = values(&report.frame, RAW_CURRENT_COLUMN);
        let filtered = values(&report.frame, INPUT_CURRENT_COLUMN);
        assert_eq!(raw.len(), filtered.len());
        assert_ne!(raw, filtered);
        let power = values(&report.frame, INPUT_POWER_COLUMN);
        let voltage = values(&report.frame, INPUT_VOLTAGE_COLUMN);
        for i in 0..power.len() {
            assert!((power[i] - voltage[i] * filtered[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_smoothing_window_longer_than_file_fails() {
        let dir = ScratchDir::new("merge_short");
        dir.write("cap_0.dat", THREE_COLUMN_LOG);

        let options = MergeOptions::default().with_smoothing(Smoothing::new(25, 3).unwrap());
        let result = LogMerger::new(dir.path().join("cap"), options).run();
        assert!(matches!(result, Err(MergeError::Smoothing { .. })));
    }

    #[test]
    fn test_unparseable_file_aborts_whole_merge() {
        let dir = ScratchDir::new("merge_abort");
        dir.write("cap_0.dat", THREE_COLUMN_LOG);
        dir.write("cap_1.dat", "garbage\n");

        let merger = LogMerger::new(dir.path().join("cap"), MergeOptions::default());
        assert!(matches!(merger.run(), Err(MergeError::RawLog(_))));
        assert!(!merger.merge_path().exists());
    }

    #[test]
    fn test_overwrites_existing_merge_file() {
        let dir = ScratchDir::new("merge_overwrite");
        dir.write("cap_0.dat", THREE_COLUMN_LOG);
        let merger = LogMerger::new(dir.path().join("cap"), MergeOptions::default());

        std::fs::write(merger.merge_path(), "old contents\n").unwrap();
        merger.run().unwrap();
        let written = std::fs::read_to_string(merger.merge_path()).unwrap();
        assert!(written.starts_with("Capture Time, s"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_logs_are_merged() {
        let dir = ScratchDir::new("merge_symlink");
        let target = dir.write("stored.log", THREE_COLUMN_LOG);
        std::os::unix::fs::symlink(&target, dir.path().join("cap_0.dat")).unwrap();
        std::fs::create_dir(dir.path().join("cap_old")).unwrap();

        let merger = LogMerger::new(dir.path().join("cap"), MergeOptions::default());
        assert_eq!(merger.discover().unwrap(), vec![dir.path().join("cap_0.dat")]);

        let report = merger.run().unwrap().unwrap();
        assert_eq!(report.rows(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_kept_intact() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = ScratchDir::new("merge_non_utf8");
        let odd = dir.path().join(OsStr::from_bytes(b"cap_\xff.dat"));
        std::fs::write(&odd, THREE_COLUMN_LOG).unwrap();
        dir.write("cap_0.dat", THREE_COLUMN_LOG);

        let files = LogMerger::new(dir.path().join("cap"), MergeOptions::default())
            .discover()
            .unwrap();
        assert_eq!(files, vec![dir.path().join("cap_0.dat"), odd.clone()]);
        assert!(files[1].exists());
    }
}
