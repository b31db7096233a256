//! Metric sources: one `SeriesProvider` per run, discovered under a root path.
//!
//! Two storage formats are recognized:
//! - `csv`: a table whose header row names the metrics (one run per file)
//! - `scalars`: folders of `*.scalars.jsonl` event logs (one run per folder)

pub mod scalars;
pub mod table;

pub use scalars::ScalarRun;
pub use table::TableRun;

use crate::error::PlotError;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sentinel x-axis name meaning "synthetic index 0..n-1".
pub const STEP_AXIS: &str = "step";

const CSV_FILE_RE: &str = r"(?i)\.csv$";
pub(crate) const SCALARS_FILE_RE: &str = r"\.scalars\.jsonl$";

/// Which field supplies the x values of a fetched series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum XKind {
    /// Synthetic `0..n-1` index over the raw y values.
    Step,
    /// A named field of the underlying storage (column, wall time, ...).
    Field(String),
}

impl XKind {
    pub fn parse(s: &str) -> Self {
        if s == STEP_AXIS {
            Self::Step
        } else {
            Self::Field(s.to_string())
        }
    }
}

impl fmt::Display for XKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step => f.write_str(STEP_AXIS),
            Self::Field(name) => f.write_str(name),
        }
    }
}

/// Whether non-finite entries are dropped from fetched series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NanPolicy {
    Drop,
    Keep,
}

/// Index-aligned x/y values of one metric.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Series {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        Self { xs, ys }
    }

    /// x values `0..n-1` for the given y values.
    pub fn indexed(ys: Vec<f64>) -> Self {
        let xs = (0..ys.len()).map(|i| i as f64).collect();
        Self { xs, ys }
    }

    pub fn len(&self) -> usize {
        self.ys.len()
    }

    /// Drop indices whose x is non-finite, then indices whose y is non-finite.
    pub fn drop_non_finite(self) -> Self {
        let Self { xs, ys } = self;
        let (xs, ys) = co_filter(xs, ys, |x, _| x.is_finite());
        let (xs, ys) = co_filter(xs, ys, |_, y| y.is_finite());
        Self { xs, ys }
    }

    pub fn apply(self, policy: NanPolicy) -> Self {
        match policy {
            NanPolicy::Drop => self.drop_non_finite(),
            NanPolicy::Keep => self,
        }
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }
}

fn co_filter(xs: Vec<f64>, ys: Vec<f64>, keep: impl Fn(f64, f64) -> bool) -> (Vec<f64>, Vec<f64>) {
    xs.into_iter().zip(ys).filter(|&(x, y)| keep(x, y)).unzip()
}

/// One logical run (a table file or a folder of event logs).
pub trait SeriesProvider {
    /// Display title; the run's path.
    fn title(&self) -> String;

    /// Re-read storage. Fails with `EmptySeries` when no metric remains.
    fn refresh(&mut self) -> Result<(), PlotError>;

    /// Metric names in stable first-seen order.
    fn names(&self) -> &[String];

    fn series(&self, x: &XKind, name: &str) -> Result<Series, PlotError>;
}

/// Backing format of the runs under the root path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Scalars,
    Csv,
}

impl SourceKind {
    fn file_pattern(self) -> Result<Regex, PlotError> {
        let pattern = match self {
            Self::Scalars => SCALARS_FILE_RE,
            Self::Csv => CSV_FILE_RE,
        };
        Ok(Regex::new(pattern)?)
    }

    fn open(self, path: &Path, nan: NanPolicy) -> Result<Box<dyn SeriesProvider>, PlotError> {
        Ok(match self {
            Self::Scalars => Box::new(ScalarRun::open(path, nan)?),
            Self::Csv => Box::new(TableRun::open(path, nan)?),
        })
    }
}

/// The set of runs the refresh loop draws, one column each.
pub trait RunSource {
    /// Re-discover runs and refresh every provider.
    fn rescan(&mut self) -> Result<(), PlotError>;

    fn runs(&self) -> &[Box<dyn SeriesProvider>];

    fn len(&self) -> usize {
        self.runs().len()
    }
}

/// Discovers runs under a root path and keeps one provider per run.
pub struct SourceEnumerator {
    root: PathBuf,
    kind: SourceKind,
    nan: NanPolicy,
    paths: Vec<PathBuf>,
    runs: Vec<Box<dyn SeriesProvider>>,
}

impl SourceEnumerator {
    pub fn new(root: impl Into<PathBuf>, kind: SourceKind, nan: NanPolicy) -> Self {
        Self {
            root: root.into(),
            kind,
            nan,
            paths: Vec::new(),
            runs: Vec::new(),
        }
    }
}

impl RunSource for SourceEnumerator {
    fn rescan(&mut self) -> Result<(), PlotError> {
        let found = discover(&self.root, self.kind)?;

        let mut known: HashMap<PathBuf, Box<dyn SeriesProvider>> =
            self.paths.drain(..).zip(self.runs.drain(..)).collect();

        for path in found {
            let provider = match known.remove(&path) {
                Some(mut provider) => {
                    provider.refresh()?;
                    provider
                }
                None => {
                    info!(run = %path.display(), "opening run");
                    self.kind.open(&path, self.nan)?
                }
            };
            self.paths.push(path);
            self.runs.push(provider);
        }

        for gone in known.keys() {
            info!(run = %gone.display(), "run disappeared");
        }
        Ok(())
    }

    fn runs(&self) -> &[Box<dyn SeriesProvider>] {
        &self.runs
    }
}

/// Find run paths under `root`, sorted by path.
///
/// A recognized file is itself the only run. For a directory:
/// - csv: every matching file directly inside it
/// - scalars: the directory itself if it holds log files, then every
///   subfolder that does
pub fn discover(root: &Path, kind: SourceKind) -> Result<Vec<PathBuf>, PlotError> {
    let pattern = kind.file_pattern()?;

    if root.is_file() {
        return if matches_pattern(&pattern, root) {
            Ok(vec![root.to_path_buf()])
        } else {
            Err(PlotError::NoRunsFound {
                root: root.to_path_buf(),
            })
        };
    }

    let mut runs = Vec::new();
    match kind {
        SourceKind::Csv => {
            for entry in sorted_entries(root)? {
                if entry.is_file() && matches_pattern(&pattern, &entry) {
                    runs.push(entry);
                }
            }
        }
        SourceKind::Scalars => {
            if holds_logs(root, &pattern)? {
                runs.push(root.to_path_buf());
            }
            for entry in sorted_entries(root)? {
                if entry.is_dir() && holds_logs(&entry, &pattern)? {
                    runs.push(entry);
                }
            }
        }
    }

    if runs.is_empty() {
        return Err(PlotError::NoRunsFound {
            root: root.to_path_buf(),
        });
    }
    debug!(root = %root.display(), runs = runs.len(), "discovered runs");
    Ok(runs)
}

/// Files in `dir` whose name matches `pattern`, sorted by name.
pub(crate) fn matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>, PlotError> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file() && matches_pattern(pattern, p))
        .collect())
}

fn holds_logs(dir: &Path, pattern: &Regex) -> Result<bool, PlotError> {
    Ok(!matching_files(dir, pattern)?.is_empty())
}

fn matches_pattern(pattern: &Regex, path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| pattern.is_match(n))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, PlotError> {
    let read = fs::read_dir(dir).map_err(|e| PlotError::io(dir, e))?;
    let mut entries = Vec::new();
    for entry in read {
        entries.push(entry.map_err(|e| PlotError::io(dir, e))?.path());
    }
    entries.sort();
    Ok(entries)
}
