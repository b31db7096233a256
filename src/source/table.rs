//! CSV tables: one run per file, one metric per column.

use crate::error::PlotError;
use crate::source::{NanPolicy, Series, SeriesProvider, XKind};

use chrono::{DateTime, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::debug;

const NAIVE_TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// A CSV file loaded column-major.
#[derive(Debug)]
pub struct TableRun {
    path: PathBuf,
    nan: NanPolicy,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl TableRun {
    pub fn open(path: &Path, nan: NanPolicy) -> Result<Self, PlotError> {
        let mut run = Self {
            path: path.to_path_buf(),
            nan,
            columns: Vec::new(),
            values: Vec::new(),
        };
        run.refresh()?;
        Ok(run)
    }

    fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }
}

impl SeriesProvider for TableRun {
    fn title(&self) -> String {
        self.path.display().to_string()
    }

    fn refresh(&mut self) -> Result<(), PlotError> {
        let (columns, values) = load_table(&self.path)?;
        if columns.is_empty() {
            return Err(PlotError::EmptySeries { run: self.title() });
        }
        debug!(
            run = %self.path.display(),
            columns = columns.len(),
            rows = values.first().map(Vec::len).unwrap_or(0),
            "loaded table"
        );
        self.columns = columns;
        self.values = values;
        Ok(())
    }

    fn names(&self) -> &[String] {
        &self.columns
    }

    fn series(&self, x: &XKind, name: &str) -> Result<Series, PlotError> {
        let ys = self
            .column(name)
            .ok_or_else(|| PlotError::UnknownMetric {
                run: self.title(),
                name: name.to_string(),
            })?
            .to_vec();

        let series = match x {
            XKind::Step => Series::indexed(ys),
            XKind::Field(field) => {
                let xs = self
                    .column(field)
                    .ok_or_else(|| PlotError::UnknownAxis {
                        run: self.title(),
                        field: field.clone(),
                        available: self.columns.join(", "),
                    })?
                    .to_vec();
                Series::new(xs, ys)
            }
        };
        Ok(series.apply(self.nan))
    }
}

fn load_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<f64>>), PlotError> {
    let csv_err = |source| PlotError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    // Unnamed columns (e.g. a written-out row index) are skipped.
    let (positions, columns): (Vec<usize>, Vec<String>) = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_empty())
        .map(|(i, h)| (i, h.to_string()))
        .unzip();

    let mut values = vec![Vec::new(); columns.len()];
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        for (&pos, column) in positions.iter().zip(values.iter_mut()) {
            column.push(parse_cell(record.get(pos).unwrap_or("")));
        }
    }
    Ok((columns, values))
}

/// Numbers parse as-is, timestamps become epoch seconds, anything else is NaN.
fn parse_cell(cell: &str) -> f64 {
    if cell.is_empty() {
        return f64::NAN;
    }
    if let Ok(v) = cell.parse::<f64>() {
        return v;
    }
    parse_timestamp(cell).unwrap_or(f64::NAN)
}

fn parse_timestamp(cell: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.timestamp_millis() as f64 / 1000.0);
    }
    NaiveDateTime::parse_from_str(cell, NAIVE_TIMESTAMP_FMT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn table(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn header_order_gives_metric_names() {
        let (_dir, path) = table("time,loss,acc\n1,0.9,0.1\n2,0.8,0.2\n");
        let run = TableRun::open(&path, NanPolicy::Drop).unwrap();
        assert_eq!(run.names(), ["time", "loss", "acc"]);
    }

    #[test]
    fn step_axis_ignores_storage_order() {
        let (_dir, path) = table("epoch,loss\n9,0.9\n3,0.8\n5,0.7\n");
        let run = TableRun::open(&path, NanPolicy::Drop).unwrap();
        let series = run.series(&XKind::Step, "loss").unwrap();
        assert_eq!(series.xs, vec![0.0, 1.0, 2.0]);
        assert_eq!(series.ys, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn named_axis_reads_column_and_drops_missing_cells() {
        let (_dir, path) = table("epoch,loss\n1,10\n,20\n3,\n");
        let run = TableRun::open(&path, NanPolicy::Drop).unwrap();
        let series = run.series(&XKind::Field("epoch".into()), "loss").unwrap();
        assert_eq!(series, Series::new(vec![1.0], vec![10.0]));
    }

    #[test]
    fn timestamps_become_epoch_seconds() {
        let (_dir, path) = table("time,loss\n1970-01-01 00:01:00,1\n1970-01-01T00:02:00Z,2\n");
        let run = TableRun::open(&path, NanPolicy::Drop).unwrap();
        let series = run.series(&XKind::Field("time".into()), "loss").unwrap();
        assert_eq!(series.xs, vec![60.0, 120.0]);
    }

    #[test]
    fn unknown_axis_is_rejected() {
        let (_dir, path) = table("loss\n1\n");
        let run = TableRun::open(&path, NanPolicy::Drop).unwrap();
        let err = run.series(&XKind::Field("time".into()), "loss").unwrap_err();
        assert!(matches!(err, PlotError::UnknownAxis { ref field, .. } if field == "time"));
    }

    #[test]
    fn empty_table_is_an_empty_series_error() {
        let (_dir, path) = table("");
        let err = TableRun::open(&path, NanPolicy::Drop).unwrap_err();
        assert!(matches!(err, PlotError::EmptySeries { .. }));
    }

    #[test]
    fn refresh_sees_appended_rows() {
        let (_dir, path) = table("loss\n1\n");
        let mut run = TableRun::open(&path, NanPolicy::Drop).unwrap();
        fs::write(&path, "loss\n1\n2\n").unwrap();
        run.refresh().unwrap();
        assert_eq!(run.series(&XKind::Step, "loss").unwrap().len(), 2);
    }
}
