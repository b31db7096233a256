//! Error taxonomy shared by sources, smoothing and rendering.
//!
//! Every variant is fatal where it is raised; the binary reports it and exits 1.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("unable to find any runs within '{}'", root.display())]
    NoRunsFound { root: PathBuf },

    #[error("cannot find any scalars within '{run}'")]
    EmptySeries { run: String },

    #[error("unknown x-axis field '{field}' for '{run}' (available: {available})")]
    UnknownAxis {
        run: String,
        field: String,
        available: String,
    },

    #[error("unknown metric '{name}' in '{run}'")]
    UnknownMetric { run: String, name: String },

    #[error(
        "series of length {len} is too short to smooth with polynomial order {poly_order}"
    )]
    InsufficientData { len: usize, poly_order: usize },

    #[error("plotter backend '{backend}' does not support option '{option}'")]
    UnsupportedOption {
        backend: &'static str,
        option: &'static str,
    },

    #[error("parse error at {}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("render error: {0}")]
    Render(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("CSV error in '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl PlotError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Backend drawing errors are generic over the backend; keep only the message.
    pub fn render(err: impl std::fmt::Display) -> Self {
        Self::Render(err.to_string())
    }
}
