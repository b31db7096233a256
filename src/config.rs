//! Command-line options and their resolution into `RenderOptions`.
//!
//! `Cli` is the raw clap surface. `resolve` folds aliases and the dark theme
//! into a fresh `RenderOptions` without touching the parsed arguments.

use crate::consolidate::{Consolidation, KeywordFilter};
use crate::render::{AxisLimit, BackendKind, DrawMode, PlotStyle, Rgb, SubplotAddr, SubplotSelector};
use crate::smooth::{DEFAULT_POLY_ORDER, Smoothing};
use crate::source::{NanPolicy, STEP_AXIS, SourceKind, XKind};

use clap::{ArgAction, Parser};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Smoothing factor used when `-s` is given without a value.
pub const DEFAULT_SMOOTHING: &str = "0.05";

#[derive(Parser, Debug, Clone)]
#[command(name = "termplot", version)]
#[command(about = "Plot time-series metrics in the terminal or as images", long_about = None)]
pub struct Cli {
    /// Source folder or file.
    #[arg(value_name = "FOLDER")]
    pub folder: PathBuf,

    /// Plotting backend.
    #[arg(long, value_enum, default_value_t = BackendKind::Terminal)]
    pub backend: BackendKind,

    /// Alias of `--backend bitmap`.
    #[arg(short = 'm', long)]
    pub bitmap: bool,

    /// Storage format of the runs.
    #[arg(long, value_enum, default_value_t = SourceKind::Scalars)]
    pub data_source: SourceKind,

    /// Alias of `--data-source csv`.
    #[arg(long)]
    pub csv: bool,

    /// Size of each subplot, e.g. 50,20 (characters or pixels).
    #[arg(long, value_name = "WIDTH,HEIGHT", value_parser = parse_size)]
    pub plotsize: Option<(u32, u32)>,

    /// Consolidate by prefix; `-cc` puts everything in one subplot.
    #[arg(short = 'c', long, action = ArgAction::Count)]
    pub consolidate: u8,

    /// Consolidate names sharing their first LEVEL segments (0 = all).
    #[arg(long, value_name = "LEVEL", conflicts_with = "consolidate")]
    pub consolidate_level: Option<usize>,

    /// Plot as scatter instead of lines.
    #[arg(long)]
    pub as_scatter: bool,

    /// Color of the plot canvas.
    #[arg(long, value_name = "COLOR", value_parser = Rgb::parse)]
    pub canvas_color: Option<Rgb>,

    /// Color of axes, axis labels and legend frame.
    #[arg(long, value_name = "COLOR", value_parser = Rgb::parse)]
    pub axes_color: Option<Rgb>,

    /// Color of ticks, tick labels and titles.
    #[arg(long, value_name = "COLOR", value_parser = Rgb::parse)]
    pub ticks_color: Option<Rgb>,

    #[arg(long)]
    pub grid: bool,

    #[arg(long)]
    pub colorless: bool,

    /// Black canvas and axes with white ticks, unless set individually.
    #[arg(short = 'd', long)]
    pub dark_theme: bool,

    /// Use one color for every series.
    #[arg(long)]
    pub no_iter_color: bool,

    /// Label series even when a subplot holds only one.
    #[arg(long)]
    pub force_label: bool,

    /// Redraw periodically until interrupted.
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// Seconds between redraws.
    #[arg(short = 'n', long, value_name = "SECS", default_value = "5", value_parser = parse_seconds)]
    pub interval: Duration,

    /// Keywords a metric name must contain (any of), case sensitive.
    #[arg(short = 'w', long, value_name = "KEYWORD", num_args = 1..)]
    pub whitelist: Option<Vec<String>>,

    /// Keywords a metric name must not contain, case sensitive.
    #[arg(short = 'b', long, value_name = "KEYWORD", num_args = 1..)]
    pub blacklist: Option<Vec<String>>,

    /// Field used as the x-axis; `step` is the sample index.
    #[arg(short = 'x', long, default_value = STEP_AXIS)]
    pub xaxis_type: String,

    /// Subplots with a log x-axis; none listed means all.
    #[arg(long, value_name = "ROW,COL", num_args = 0.., value_parser = parse_addr)]
    pub xlog: Option<Vec<SubplotAddr>>,

    #[arg(long, value_name = "ROW,COL", num_args = 0.., value_parser = parse_addr)]
    pub ylog: Option<Vec<SubplotAddr>>,

    #[arg(long, value_name = "ROW,COL", num_args = 0.., value_parser = parse_addr)]
    pub xsymlog: Option<Vec<SubplotAddr>>,

    #[arg(long, value_name = "ROW,COL", num_args = 0.., value_parser = parse_addr)]
    pub ysymlog: Option<Vec<SubplotAddr>>,

    /// x-axis range for one subplot.
    #[arg(long, value_name = "ROW,COL=MIN,MAX", num_args = 1.., value_parser = parse_limit)]
    pub xlim: Vec<AxisLimit>,

    /// y-axis range for one subplot.
    #[arg(long, value_name = "ROW,COL=MIN,MAX", num_args = 1.., value_parser = parse_limit)]
    pub ylim: Vec<AxisLimit>,

    /// Write the encoded image to stdout instead of showing it.
    #[arg(long)]
    pub as_raw_bytes: bool,

    /// Smoothing factor between 0 and 1.
    #[arg(
        short = 's',
        long,
        value_name = "0-1",
        num_args = 0..=1,
        default_missing_value = DEFAULT_SMOOTHING,
        value_parser = parse_unit_interval
    )]
    pub smooth: Option<f64>,

    /// Polynomial order of the smoothing filter.
    #[arg(long, value_name = "ORDER", default_value_t = DEFAULT_POLY_ORDER)]
    pub smooth_poly_order: usize,

    #[arg(long, value_name = "COLS")]
    pub terminal_width: Option<u16>,

    #[arg(long, value_name = "ROWS")]
    pub terminal_height: Option<u16>,

    /// Image path written by the bitmap backend.
    #[arg(short = 'o', long, value_name = "PATH", default_value = "termplot.png")]
    pub output: PathBuf,

    /// Keep NaN and infinite samples instead of dropping them.
    #[arg(long)]
    pub keep_nan: bool,

    /// More log output on stderr (-v info, -vv debug).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Where a finished figure goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Show,
    RawBytes,
}

/// Everything the refresh loop needs, after aliases and themes are applied.
#[derive(Debug, Clone, Serialize)]
pub struct RenderOptions {
    pub folder: PathBuf,
    pub backend: BackendKind,
    pub source: SourceKind,
    pub consolidation: Consolidation,
    pub filter: KeywordFilter,
    pub x_kind: XKind,
    pub draw_mode: DrawMode,
    pub smoothing: Option<Smoothing>,
    pub force_label: bool,
    /// Redraw interval; `None` draws once.
    pub follow: Option<Duration>,
    pub output_mode: OutputMode,
    pub output: PathBuf,
    pub terminal_width: Option<u16>,
    pub terminal_height: Option<u16>,
    pub nan: NanPolicy,
    pub style: PlotStyle,
}

impl RenderOptions {
    /// Title of a run's top subplot.
    pub fn run_title(&self, run: &str) -> String {
        match self.follow {
            Some(every) => format!("'{run}' [refresh every {}s]", every.as_secs_f64()),
            None => format!("'{run}'"),
        }
    }

    /// Legend label of a series; only consolidated subplots label by default.
    pub fn label_for<'a>(&self, name: &'a str) -> Option<&'a str> {
        (self.consolidation.is_enabled() || self.force_label).then_some(name)
    }
}

pub fn resolve(cli: &Cli) -> RenderOptions {
    let backend = if cli.bitmap {
        BackendKind::Bitmap
    } else {
        cli.backend
    };
    let source = if cli.csv {
        SourceKind::Csv
    } else {
        cli.data_source
    };

    let consolidation = match (cli.consolidate_level, cli.consolidate) {
        (Some(level), _) => Consolidation::Level(level),
        (None, 0) => Consolidation::None,
        (None, 1) => Consolidation::Level(1),
        (None, _) => Consolidation::All,
    };

    let (mut canvas_color, mut axes_color, mut ticks_color) =
        (cli.canvas_color, cli.axes_color, cli.ticks_color);
    if cli.dark_theme {
        canvas_color = canvas_color.or(Some(Rgb::BLACK));
        axes_color = axes_color.or(Some(Rgb::BLACK));
        ticks_color = ticks_color.or(Some(Rgb::WHITE));
    }

    let style = PlotStyle {
        canvas_color,
        axes_color,
        ticks_color,
        grid: cli.grid,
        plot_size: cli.plotsize,
        colorless: cli.colorless,
        xlog: cli.xlog.clone().map(SubplotSelector),
        ylog: cli.ylog.clone().map(SubplotSelector),
        xsymlog: cli.xsymlog.clone().map(SubplotSelector),
        ysymlog: cli.ysymlog.clone().map(SubplotSelector),
        xlim: cli.xlim.clone(),
        ylim: cli.ylim.clone(),
        iter_color: !cli.no_iter_color,
        raw_bytes: cli.as_raw_bytes,
    };

    RenderOptions {
        folder: cli.folder.clone(),
        backend,
        source,
        consolidation,
        filter: KeywordFilter {
            whitelist: cli.whitelist.clone(),
            blacklist: cli.blacklist.clone(),
        },
        x_kind: XKind::parse(&cli.xaxis_type),
        draw_mode: if cli.as_scatter {
            DrawMode::Scatter
        } else {
            DrawMode::Line
        },
        smoothing: cli.smooth.map(|factor| Smoothing {
            factor,
            poly_order: cli.smooth_poly_order,
        }),
        force_label: cli.force_label,
        follow: cli.follow.then_some(cli.interval),
        output_mode: if cli.as_raw_bytes {
            OutputMode::RawBytes
        } else {
            OutputMode::Show
        },
        output: cli.output.clone(),
        terminal_width: cli.terminal_width,
        terminal_height: cli.terminal_height,
        nan: if cli.keep_nan {
            NanPolicy::Keep
        } else {
            NanPolicy::Drop
        },
        style,
    }
}

const LIMIT_RE: &str =
    r"^\s*(\d+)\s*,\s*(\d+)\s*=\s*([-+]?[0-9.eE+-]+)\s*,\s*([-+]?[0-9.eE+-]+)\s*$";

fn parse_pair(s: &str) -> Result<(f64, f64), String> {
    let (a, b) = s
        .split_once(',')
        .ok_or_else(|| format!("'{s}' must be in the format a,b (e.g. 30,2.2)"))?;
    let num = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("'{v}' in '{s}': {e}"))
    };
    Ok((num(a)?, num(b)?))
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = parse_pair(s)?;
    if w < 1.0 || h < 1.0 {
        return Err(format!("plot size '{s}' must be positive"));
    }
    Ok((w as u32, h as u32))
}

fn parse_addr(s: &str) -> Result<SubplotAddr, String> {
    let (row, col) = parse_pair(s)?;
    if row < 1.0 || col < 1.0 {
        return Err(format!("subplot '{s}' is 1-based (row,col >= 1)"));
    }
    Ok(SubplotAddr::new(row as usize, col as usize))
}

fn parse_limit(s: &str) -> Result<AxisLimit, String> {
    let re = Regex::new(LIMIT_RE).map_err(|e| e.to_string())?;
    let caps = re
        .captures(s)
        .ok_or_else(|| format!("'{s}' must be in the format row,col=min,max (e.g. 1,2=0,10)"))?;
    let int = |i: usize| caps[i].parse::<usize>().map_err(|e| e.to_string());
    let num = |i: usize| caps[i].parse::<f64>().map_err(|e| e.to_string());
    let addr = SubplotAddr::new(int(1)?, int(2)?);
    if addr.row == 0 || addr.col == 0 {
        return Err(format!("subplot in '{s}' is 1-based (row,col >= 1)"));
    }
    Ok(AxisLimit {
        addr,
        min: num(3)?,
        max: num(4)?,
    })
}

fn parse_unit_interval(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("'{s}': {e}"))?;
    if !(0.0..=1.0).contains(&v) {
        return Err(format!("smoothing factor {v} must be between 0 and 1"));
    }
    Ok(v)
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let v: f64 = s.parse().map_err(|e| format!("'{s}': {e}"))?;
    if !v.is_finite() || v <= 0.0 {
        return Err(format!("interval {v} must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(v).map_err(|e| format!("interval {v}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> RenderOptions {
        let cli = Cli::try_parse_from(std::iter::once("termplot").chain(args.iter().copied()))
            .unwrap();
        resolve(&cli)
    }

    #[test]
    fn defaults() {
        let opts = parse(&["runs"]);
        assert_eq!(opts.backend, BackendKind::Terminal);
        assert_eq!(opts.source, SourceKind::Scalars);
        assert_eq!(opts.consolidation, Consolidation::None);
        assert_eq!(opts.x_kind, XKind::Step);
        assert_eq!(opts.follow, None);
        assert_eq!(opts.output_mode, OutputMode::Show);
        assert_eq!(opts.smoothing, None);
        assert_eq!(opts.nan, NanPolicy::Drop);
        assert!(opts.style.iter_color);
        assert!(opts.style.requested_features().is_empty());
    }

    #[test]
    fn aliases_pick_backend_and_source() {
        let opts = parse(&["-m", "--csv", "runs"]);
        assert_eq!(opts.backend, BackendKind::Bitmap);
        assert_eq!(opts.source, SourceKind::Csv);
    }

    #[test]
    fn consolidate_count_maps_to_levels() {
        assert_eq!(parse(&["-c", "runs"]).consolidation, Consolidation::Level(1));
        assert_eq!(parse(&["-cc", "runs"]).consolidation, Consolidation::All);
        assert_eq!(
            parse(&["--consolidate-level", "2", "runs"]).consolidation,
            Consolidation::Level(2)
        );
    }

    #[test]
    fn dark_theme_fills_only_unset_colors() {
        let opts = parse(&["-d", "--ticks-color", "red", "runs"]);
        assert_eq!(opts.style.canvas_color, Some(Rgb::BLACK));
        assert_eq!(opts.style.axes_color, Some(Rgb::BLACK));
        assert_eq!(opts.style.ticks_color, Some(Rgb::parse("red").unwrap()));
    }

    #[test]
    fn smooth_without_value_uses_default_factor() {
        let opts = parse(&["runs", "-s"]);
        assert_eq!(opts.smoothing.map(|s| s.factor), Some(0.05));
        let opts = parse(&["-s", "0.5", "runs"]);
        assert_eq!(opts.smoothing.map(|s| s.factor), Some(0.5));
        assert!(Cli::try_parse_from(["termplot", "-s", "1.5", "runs"]).is_err());
    }

    #[test]
    fn scale_selectors_distinguish_wildcard_from_absent() {
        let opts = parse(&["runs", "--xlog", "--ylog", "1,2", "2,1"]);
        assert_eq!(opts.style.xlog, Some(SubplotSelector(vec![])));
        assert_eq!(
            opts.style.ylog,
            Some(SubplotSelector(vec![SubplotAddr::new(1, 2), SubplotAddr::new(2, 1)]))
        );
        assert_eq!(opts.style.xsymlog, None);
    }

    #[test]
    fn limits_parse_row_col_and_range() {
        let opts = parse(&["runs", "--xlim", "1,2=0,10.5", "2,1=-1e3,5"]);
        assert_eq!(
            opts.style.xlim,
            vec![
                AxisLimit {
                    addr: SubplotAddr::new(1, 2),
                    min: 0.0,
                    max: 10.5
                },
                AxisLimit {
                    addr: SubplotAddr::new(2, 1),
                    min: -1000.0,
                    max: 5.0
                },
            ]
        );
        assert!(parse_limit("1,2").is_err());
        assert!(parse_limit("0,1=0,1").is_err());
    }

    #[test]
    fn follow_titles_include_interval() {
        let opts = parse(&["-f", "-n", "2.5", "runs"]);
        assert_eq!(opts.follow, Some(Duration::from_millis(2500)));
        assert_eq!(opts.run_title("runs/a"), "'runs/a' [refresh every 2.5s]");
        assert_eq!(parse(&["runs"]).run_title("runs/a"), "'runs/a'");
    }

    #[test]
    fn labels_only_when_consolidating_or_forced() {
        assert_eq!(parse(&["runs"]).label_for("loss"), None);
        assert_eq!(parse(&["-c", "runs"]).label_for("loss"), Some("loss"));
        assert_eq!(parse(&["--force-label", "runs"]).label_for("loss"), Some("loss"));
    }

    #[test]
    fn raw_bytes_switches_output_mode() {
        let opts = parse(&["--as-raw-bytes", "-m", "runs"]);
        assert_eq!(opts.output_mode, OutputMode::RawBytes);
        assert!(opts.style.raw_bytes);
    }

    #[test]
    fn sizes_and_intervals_are_validated() {
        assert_eq!(parse_size("50,20").unwrap(), (50, 20));
        assert!(parse_size("0,20").is_err());
        assert!(parse_seconds("0").is_err());
        assert!(parse_addr("1").is_err());
    }

    #[test]
    fn oversized_interval_is_a_usage_error() {
        assert_eq!(parse_seconds("0.25").unwrap(), Duration::from_millis(250));
        assert!(parse_seconds("1e20").is_err());
        assert!(parse_seconds("inf").is_err());
        assert!(Cli::try_parse_from(["termplot", "-f", "-n", "1e20", "runs"]).is_err());
        assert_eq!(parse(&["-f", "runs"]).follow, Some(Duration::from_secs(5)));
    }

    #[test]
    fn folder_may_precede_bare_scale_flags() {
        let cli = Cli::try_parse_from(["termplot", "runs", "--csv", "--xlog"]).unwrap();
        assert_eq!(cli.folder, PathBuf::from("runs"));
        assert_eq!(resolve(&cli).style.xlog, Some(SubplotSelector(vec![])));
    }
}
