//! Scalar event logs: folders of `*.scalars.jsonl` files.
//!
//! One JSON record per line:
//! {"tag": "train/loss", "step": 120, "wall_time": 1700000000.25, "value": 0.31}
//!
//! `value` may be `null` for a missing sample. A run is a folder (every log file
//! in it, in name order) or a single log file.

use crate::error::PlotError;
use crate::source::{NanPolicy, SCALARS_FILE_RE, Series, SeriesProvider, XKind, matching_files};

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Axis fields recorded alongside every scalar.
const GLOBAL_STEP_AXIS: &str = "global_step";
const WALL_TIME_AXIS: &str = "wall_time";
const TIME_AXIS_ALIAS: &str = "time";

#[derive(Debug, Clone, Deserialize)]
struct ScalarRecord {
    tag: String,
    #[serde(default)]
    step: u64,
    #[serde(default)]
    wall_time: f64,
    value: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Point {
    step: u64,
    wall_time: f64,
    value: f64,
}

#[derive(Debug)]
pub struct ScalarRun {
    path: PathBuf,
    nan: NanPolicy,
    tags: Vec<String>,
    points: HashMap<String, Vec<Point>>,
}

impl ScalarRun {
    pub fn open(path: &Path, nan: NanPolicy) -> Result<Self, PlotError> {
        let mut run = Self {
            path: path.to_path_buf(),
            nan,
            tags: Vec::new(),
            points: HashMap::new(),
        };
        run.refresh()?;
        Ok(run)
    }

    fn log_files(&self) -> Result<Vec<PathBuf>, PlotError> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        matching_files(&self.path, &Regex::new(SCALARS_FILE_RE)?)
    }
}

impl SeriesProvider for ScalarRun {
    fn title(&self) -> String {
        self.path.display().to_string()
    }

    fn refresh(&mut self) -> Result<(), PlotError> {
        let mut tags = Vec::new();
        let mut points: HashMap<String, Vec<Point>> = HashMap::new();

        for file in self.log_files()? {
            for record in read_records(&file)? {
                let point = Point {
                    step: record.step,
                    wall_time: record.wall_time,
                    value: record.value.unwrap_or(f64::NAN),
                };
                match points.get_mut(&record.tag) {
                    Some(series) => series.push(point),
                    None => {
                        tags.push(record.tag.clone());
                        points.insert(record.tag, vec![point]);
                    }
                }
            }
        }

        if tags.is_empty() {
            return Err(PlotError::EmptySeries { run: self.title() });
        }
        debug!(run = %self.path.display(), tags = tags.len(), "loaded scalar logs");
        self.tags = tags;
        self.points = points;
        Ok(())
    }

    fn names(&self) -> &[String] {
        &self.tags
    }

    fn series(&self, x: &XKind, name: &str) -> Result<Series, PlotError> {
        let points = self
            .points
            .get(name)
            .ok_or_else(|| PlotError::UnknownMetric {
                run: self.title(),
                name: name.to_string(),
            })?;
        let ys: Vec<f64> = points.iter().map(|p| p.value).collect();

        let series = match x {
            XKind::Step => Series::indexed(ys),
            XKind::Field(field) => {
                let xs = match field.as_str() {
                    GLOBAL_STEP_AXIS => points.iter().map(|p| p.step as f64).collect(),
                    WALL_TIME_AXIS | TIME_AXIS_ALIAS => {
                        points.iter().map(|p| p.wall_time).collect()
                    }
                    _ => {
                        return Err(PlotError::UnknownAxis {
                            run: self.title(),
                            field: field.clone(),
                            available: [GLOBAL_STEP_AXIS, WALL_TIME_AXIS, TIME_AXIS_ALIAS]
                                .join(", "),
                        });
                    }
                };
                Series::new(xs, ys)
            }
        };
        Ok(series.apply(self.nan))
    }
}

fn read_records(path: &Path) -> Result<Vec<ScalarRecord>, PlotError> {
    let text = fs::read_to_string(path).map_err(|e| PlotError::io(path, e))?;

    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ScalarRecord =
            serde_json::from_str(line).map_err(|e| PlotError::Parse {
                path: path.to_path_buf(),
                line: lineno + 1,
                reason: e.to_string(),
            })?;
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_log(dir: &Path, name: &str, lines: &[&str]) {
        fs::write(dir.join(name), lines.join("\n")).unwrap();
    }

    #[test]
    fn tags_keep_first_seen_order_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "a.scalars.jsonl",
            &[
                r#"{"tag":"train/loss","step":1,"wall_time":10.0,"value":1.0}"#,
                r#"{"tag":"eval/acc","step":1,"wall_time":10.5,"value":0.2}"#,
            ],
        );
        write_log(
            dir.path(),
            "b.scalars.jsonl",
            &[
                r#"{"tag":"train/lr","step":2,"wall_time":11.0,"value":0.1}"#,
                r#"{"tag":"train/loss","step":2,"wall_time":11.0,"value":0.5}"#,
            ],
        );

        let run = ScalarRun::open(dir.path(), NanPolicy::Drop).unwrap();
        assert_eq!(run.names(), ["train/loss", "eval/acc", "train/lr"]);
        assert_eq!(
            run.series(&XKind::Field("global_step".into()), "train/loss")
                .unwrap(),
            Series::new(vec![1.0, 2.0], vec![1.0, 0.5])
        );
    }

    #[test]
    fn step_sentinel_is_a_synthetic_index() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "x.scalars.jsonl",
            &[
                r#"{"tag":"loss","step":100,"wall_time":1.0,"value":3.0}"#,
                r#"{"tag":"loss","step":200,"wall_time":2.0,"value":2.0}"#,
                r#"{"tag":"loss","step":300,"wall_time":3.0,"value":1.0}"#,
            ],
        );
        let run = ScalarRun::open(dir.path(), NanPolicy::Drop).unwrap();
        let series = run.series(&XKind::Step, "loss").unwrap();
        assert_eq!(series.xs, vec![0.0, 1.0, 2.0]);
        let by_time = run.series(&XKind::Field("time".into()), "loss").unwrap();
        assert_eq!(by_time.xs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn null_values_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "x.scalars.jsonl",
            &[
                r#"{"tag":"loss","step":1,"wall_time":1.0,"value":null}"#,
                r#"{"tag":"loss","step":2,"wall_time":2.0,"value":2.0}"#,
            ],
        );
        let run = ScalarRun::open(dir.path(), NanPolicy::Drop).unwrap();
        let series = run.series(&XKind::Step, "loss").unwrap();
        assert_eq!(series, Series::new(vec![1.0], vec![2.0]));
    }

    #[test]
    fn malformed_line_reports_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "x.scalars.jsonl",
            &[r#"{"tag":"loss","value":1.0}"#, "not json"],
        );
        let err = ScalarRun::open(dir.path(), NanPolicy::Drop).unwrap_err();
        assert!(matches!(err, PlotError::Parse { line: 2, .. }));
    }

    #[test]
    fn folder_without_records_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "x.scalars.jsonl", &["", "  "]);
        let err = ScalarRun::open(dir.path(), NanPolicy::Drop).unwrap_err();
        assert!(matches!(err, PlotError::EmptySeries { .. }));
    }

    #[test]
    fn unknown_axis_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "x.scalars.jsonl",
            &[r#"{"tag":"loss","step":1,"wall_time":1.0,"value":1.0}"#],
        );
        let run = ScalarRun::open(dir.path(), NanPolicy::Drop).unwrap();
        let err = run.series(&XKind::Field("epoch".into()), "loss").unwrap_err();
        assert!(matches!(err, PlotError::UnknownAxis { .. }));
    }
}
