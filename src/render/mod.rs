//! Rendering: a capability-gated `Surface` over a concrete `PlotBackend`.
//!
//! Backends declare which optional features they implement. `Surface::new`
//! rejects any requested option the backend lacks before anything is drawn;
//! after that the orchestrator only talks to the surface.

pub mod raster;
pub mod terminal;

pub use raster::RasterBackend;
pub use terminal::TerminalBackend;

use crate::error::PlotError;
use crate::source::Series;

use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Concrete backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Character-cell charts printed to the terminal.
    Terminal,
    /// PNG images.
    Bitmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    /// Parse a named color or `#rrggbb`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let named = match s.to_ascii_lowercase().as_str() {
            "black" => Some(Rgb(0, 0, 0)),
            "white" => Some(Rgb(255, 255, 255)),
            "red" => Some(Rgb(214, 39, 40)),
            "green" => Some(Rgb(44, 160, 44)),
            "blue" => Some(Rgb(31, 119, 180)),
            "yellow" => Some(Rgb(255, 215, 0)),
            "cyan" => Some(Rgb(23, 190, 207)),
            "magenta" => Some(Rgb(227, 119, 194)),
            "orange" => Some(Rgb(255, 127, 14)),
            "gray" | "grey" => Some(Rgb(127, 127, 127)),
            _ => None,
        };
        if let Some(c) = named {
            return Ok(c);
        }

        let hex = s
            .strip_prefix('#')
            .filter(|h| h.len() == 6 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| format!("unknown color '{s}' (use a color name or #rrggbb)"))?;
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        Ok(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// 1-based (row, column) of one panel in the subplot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubplotAddr {
    pub row: usize,
    pub col: usize,
}

impl SubplotAddr {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for SubplotAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

/// Subplots an option applies to; an empty list means every subplot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubplotSelector(pub Vec<SubplotAddr>);

impl SubplotSelector {
    pub fn matches(&self, addr: SubplotAddr) -> bool {
        self.0.is_empty() || self.0.contains(&addr)
    }
}

/// Fixed axis range for one subplot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisLimit {
    pub addr: SubplotAddr,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawMode {
    #[default]
    Line,
    Scatter,
}

/// Optional backend features, each tied to the command-line option requesting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    XLog,
    YLog,
    XSymlog,
    YSymlog,
    CanvasColor,
    AxesColor,
    TicksColor,
    Grid,
    PlotSize,
    Colorless,
    RawBytes,
}

impl Feature {
    pub fn flag(self) -> &'static str {
        match self {
            Self::XLog => "--xlog",
            Self::YLog => "--ylog",
            Self::XSymlog => "--xsymlog",
            Self::YSymlog => "--ysymlog",
            Self::CanvasColor => "--canvas-color",
            Self::AxesColor => "--axes-color",
            Self::TicksColor => "--ticks-color",
            Self::Grid => "--grid",
            Self::PlotSize => "--plotsize",
            Self::Colorless => "--colorless",
            Self::RawBytes => "--as-raw-bytes",
        }
    }
}

/// What a backend can do beyond plain line and scatter drawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub xlog: bool,
    pub ylog: bool,
    pub xsymlog: bool,
    pub ysymlog: bool,
    pub canvas_color: bool,
    pub axes_color: bool,
    pub ticks_color: bool,
    pub grid: bool,
    pub plot_size: bool,
    pub colorless: bool,
    pub raw_bytes: bool,
}

impl Capabilities {
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::XLog => self.xlog,
            Feature::YLog => self.ylog,
            Feature::XSymlog => self.xsymlog,
            Feature::YSymlog => self.ysymlog,
            Feature::CanvasColor => self.canvas_color,
            Feature::AxesColor => self.axes_color,
            Feature::TicksColor => self.ticks_color,
            Feature::Grid => self.grid,
            Feature::PlotSize => self.plot_size,
            Feature::Colorless => self.colorless,
            Feature::RawBytes => self.raw_bytes,
        }
    }
}

/// One per-subplot styling instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Styling {
    CanvasColor(Rgb),
    AxesColor(Rgb),
    TicksColor(Rgb),
    Grid,
    PlotSize { width: u32, height: u32 },
    Colorless,
    XLim(f64, f64),
    YLim(f64, f64),
    XLog,
    YLog,
    XSymlog,
    YSymlog,
}

/// Styling options resolved from the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotStyle {
    pub canvas_color: Option<Rgb>,
    pub axes_color: Option<Rgb>,
    pub ticks_color: Option<Rgb>,
    pub grid: bool,
    pub plot_size: Option<(u32, u32)>,
    pub colorless: bool,
    pub xlog: Option<SubplotSelector>,
    pub ylog: Option<SubplotSelector>,
    pub xsymlog: Option<SubplotSelector>,
    pub ysymlog: Option<SubplotSelector>,
    pub xlim: Vec<AxisLimit>,
    pub ylim: Vec<AxisLimit>,
    /// Cycle through the palette per series instead of one fixed color.
    pub iter_color: bool,
    pub raw_bytes: bool,
}

impl PlotStyle {
    /// Optional features these options need from the backend.
    pub fn requested_features(&self) -> Vec<Feature> {
        [
            (self.xlog.is_some(), Feature::XLog),
            (self.ylog.is_some(), Feature::YLog),
            (self.xsymlog.is_some(), Feature::XSymlog),
            (self.ysymlog.is_some(), Feature::YSymlog),
            (self.canvas_color.is_some(), Feature::CanvasColor),
            (self.axes_color.is_some(), Feature::AxesColor),
            (self.ticks_color.is_some(), Feature::TicksColor),
            (self.grid, Feature::Grid),
            (self.plot_size.is_some(), Feature::PlotSize),
            (self.colorless, Feature::Colorless),
            (self.raw_bytes, Feature::RawBytes),
        ]
        .into_iter()
        .filter_map(|(requested, feature)| requested.then_some(feature))
        .collect()
    }
}

/// A concrete plotting backend.
///
/// Drawing calls go to the subplot chosen by the last `target_subplot`.
pub trait PlotBackend {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn create_subplot_grid(&mut self, rows: usize, cols: usize);

    fn target_subplot(&mut self, addr: SubplotAddr);

    fn set_title(&mut self, title: &str);

    fn plot(&mut self, series: &Series, label: Option<&str>, color: Rgb);

    fn scatter(&mut self, series: &Series, label: Option<&str>, color: Rgb);

    fn set_xlabel(&mut self, label: &str);

    fn set_ylabel(&mut self, label: &str);

    fn apply(&mut self, styling: Styling);

    fn clear_current_figure(&mut self);

    /// Erase what the previous `show` printed; nothing to do off-terminal.
    fn clear_terminal_printed_lines(&mut self) -> Result<(), PlotError> {
        Ok(())
    }

    fn show(&mut self) -> Result<(), PlotError>;

    fn as_image_raw_bytes(&mut self) -> Result<Vec<u8>, PlotError> {
        Err(PlotError::UnsupportedOption {
            backend: self.name(),
            option: Feature::RawBytes.flag(),
        })
    }

    /// Single color used for every series when color cycling is off.
    fn fixed_color_sequence(&self) -> Vec<Rgb>;

    /// Palette cycled per series.
    fn generator_color_sequence(&self) -> Vec<Rgb>;
}

pub type ColorCycle = std::iter::Cycle<std::vec::IntoIter<Rgb>>;

/// The backend plus the validated styling options.
pub struct Surface {
    backend: Box<dyn PlotBackend>,
    capabilities: Capabilities,
    style: PlotStyle,
}

impl Surface {
    /// Fails on the first requested option the backend does not support.
    pub fn new(backend: Box<dyn PlotBackend>, style: PlotStyle) -> Result<Self, PlotError> {
        let capabilities = backend.capabilities();
        for feature in style.requested_features() {
            if !capabilities.supports(feature) {
                return Err(PlotError::UnsupportedOption {
                    backend: backend.name(),
                    option: feature.flag(),
                });
            }
        }
        info!(backend = backend.name(), "plotter ready");
        Ok(Self {
            backend,
            capabilities,
            style,
        })
    }

    pub fn create_subplot_grid(&mut self, rows: usize, cols: usize) {
        self.backend.create_subplot_grid(rows, cols);
    }

    pub fn target_subplot(&mut self, addr: SubplotAddr) {
        self.backend.target_subplot(addr);
    }

    pub fn set_title(&mut self, title: &str) {
        self.backend.set_title(title);
    }

    pub fn plot(&mut self, series: &Series, label: Option<&str>, color: Rgb) {
        self.backend.plot(series, label, color);
    }

    pub fn scatter(&mut self, series: &Series, label: Option<&str>, color: Rgb) {
        self.backend.scatter(series, label, color);
    }

    /// Axis labels plus every styling option that applies to `addr`.
    pub fn post_setup(&mut self, xlabel: &str, ylabel: &str, addr: SubplotAddr) {
        self.backend.set_xlabel(xlabel);
        self.backend.set_ylabel(ylabel);

        let style = &self.style;
        let mut pending: Vec<(Feature, Styling)> = Vec::new();
        if let Some(c) = style.canvas_color {
            pending.push((Feature::CanvasColor, Styling::CanvasColor(c)));
        }
        if let Some(c) = style.axes_color {
            pending.push((Feature::AxesColor, Styling::AxesColor(c)));
        }
        if let Some(c) = style.ticks_color {
            pending.push((Feature::TicksColor, Styling::TicksColor(c)));
        }
        if style.grid {
            pending.push((Feature::Grid, Styling::Grid));
        }
        if let Some((width, height)) = style.plot_size {
            pending.push((Feature::PlotSize, Styling::PlotSize { width, height }));
        }
        if style.colorless {
            pending.push((Feature::Colorless, Styling::Colorless));
        }
        let scales = [
            (&style.xlog, Feature::XLog, Styling::XLog),
            (&style.ylog, Feature::YLog, Styling::YLog),
            (&style.xsymlog, Feature::XSymlog, Styling::XSymlog),
            (&style.ysymlog, Feature::YSymlog, Styling::YSymlog),
        ];
        for (selector, feature, styling) in scales {
            if selector.as_ref().is_some_and(|s| s.matches(addr)) {
                pending.push((feature, styling));
            }
        }

        let limits: Vec<Styling> = style
            .xlim
            .iter()
            .filter(|l| l.addr == addr)
            .map(|l| Styling::XLim(l.min, l.max))
            .chain(
                style
                    .ylim
                    .iter()
                    .filter(|l| l.addr == addr)
                    .map(|l| Styling::YLim(l.min, l.max)),
            )
            .collect();

        for (feature, styling) in pending {
            if self.capabilities.supports(feature) {
                self.backend.apply(styling);
            } else {
                debug!(?feature, "skipping unsupported styling");
            }
        }
        for styling in limits {
            self.backend.apply(styling);
        }
    }

    pub fn clear_current_figure(&mut self) {
        self.backend.clear_current_figure();
    }

    pub fn clear_terminal_printed_lines(&mut self) -> Result<(), PlotError> {
        self.backend.clear_terminal_printed_lines()
    }

    pub fn show(&mut self) -> Result<(), PlotError> {
        self.backend.show()
    }

    pub fn as_image_raw_bytes(&mut self) -> Result<Vec<u8>, PlotError> {
        self.backend.as_image_raw_bytes()
    }

    /// Colors to zip against the series of one subplot.
    pub fn colors(&self) -> ColorCycle {
        let sequence = if self.style.iter_color {
            self.backend.generator_color_sequence()
        } else {
            self.backend.fixed_color_sequence()
        };
        sequence.into_iter().cycle()
    }
}

/// Axis range covering `values`, or `limit` when given; never empty.
pub(crate) fn axis_range(values: impl Iterator<Item = f64>, limit: Option<(f64, f64)>) -> (f64, f64) {
    if let Some((lo, hi)) = limit {
        if lo < hi {
            return (lo, hi);
        }
    }
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return (0.0, 1.0);
    }
    if lo == hi {
        let pad = if lo == 0.0 { 0.5 } else { lo.abs() * 0.1 };
        return (lo - pad, hi + pad);
    }
    (lo, hi)
}

/// Short tick label.
pub(crate) fn tick_label(v: f64) -> String {
    let a = v.abs();
    if a != 0.0 && !(1e-3..1e5).contains(&a) {
        format!("{v:.2e}")
    } else if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        let s = format!("{v:.3}");
        s.trim_end_matches('0').to_string()
    }
}
