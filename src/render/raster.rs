//! PNG backend built on plotters' bitmap backend.
//!
//! The figure is drawn into an RGB pixel buffer and encoded with `image`;
//! `show` writes it to the output path, `as_image_raw_bytes` hands the PNG
//! bytes to the caller.

use super::{Capabilities, PlotBackend, Rgb, Styling, SubplotAddr, axis_range, tick_label};
use crate::error::PlotError;
use crate::source::Series;

use plotters::coord::Shift;
use plotters::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info, trace};

/// Panel size in pixels unless `--plotsize` says otherwise.
pub const DEFAULT_PANEL_SIZE: (u32, u32) = (640, 400);

// matplotlib's tab10 cycle
const PALETTE: [Rgb; 10] = [
    Rgb(31, 119, 180),
    Rgb(255, 127, 14),
    Rgb(44, 160, 44),
    Rgb(214, 39, 40),
    Rgb(148, 103, 189),
    Rgb(140, 86, 75),
    Rgb(227, 119, 194),
    Rgb(127, 127, 127),
    Rgb(188, 189, 34),
    Rgb(23, 190, 207),
];

/// Axis transform applied to data before it reaches the chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scale {
    #[default]
    Linear,
    Log,
    /// `sign(v) * log10(1 + |v|)`, linear around zero.
    Symlog,
}

impl Scale {
    /// Chart coordinate of `v`; `None` when the scale cannot show it.
    pub fn forward(self, v: f64) -> Option<f64> {
        match self {
            Self::Linear => Some(v),
            Self::Log => (v > 0.0).then(|| v.log10()),
            Self::Symlog => Some(v.signum() * v.abs().ln_1p() / std::f64::consts::LN_10),
        }
    }

    pub fn invert(self, c: f64) -> f64 {
        match self {
            Self::Linear => c,
            Self::Log => 10f64.powf(c),
            Self::Symlog => c.signum() * (10f64.powf(c.abs()) - 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Line,
    Scatter,
}

#[derive(Debug, Clone)]
struct Trace {
    label: Option<String>,
    points: Vec<(f64, f64)>,
    color: Rgb,
    mode: Mode,
}

#[derive(Debug, Clone)]
struct Panel {
    title: Option<String>,
    traces: Vec<Trace>,
    xlabel: String,
    ylabel: String,
    xlim: Option<(f64, f64)>,
    ylim: Option<(f64, f64)>,
    xscale: Scale,
    yscale: Scale,
    canvas: Rgb,
    axes: Rgb,
    ticks: Rgb,
    grid: bool,
}

impl Default for Panel {
    fn default() -> Self {
        Self {
            title: None,
            traces: Vec::new(),
            xlabel: String::new(),
            ylabel: String::new(),
            xlim: None,
            ylim: None,
            xscale: Scale::Linear,
            yscale: Scale::Linear,
            canvas: Rgb::WHITE,
            axes: Rgb::BLACK,
            ticks: Rgb::BLACK,
            grid: false,
        }
    }
}

pub struct RasterBackend {
    output: PathBuf,
    panel_size: (u32, u32),
    rows: usize,
    cols: usize,
    panels: Vec<Panel>,
    current: usize,
}

impl RasterBackend {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            panel_size: DEFAULT_PANEL_SIZE,
            rows: 0,
            cols: 0,
            panels: Vec::new(),
            current: 0,
        }
    }

    fn panel(&mut self) -> &mut Panel {
        if self.panels.is_empty() {
            self.rows = 1;
            self.cols = 1;
            self.panels.push(Panel::default());
            self.current = 0;
        }
        &mut self.panels[self.current]
    }

    fn figure_size(&self) -> (u32, u32) {
        let (w, h) = self.panel_size;
        (
            w.saturating_mul(self.cols.max(1) as u32),
            h.saturating_mul(self.rows.max(1) as u32),
        )
    }

    fn render_png(&self) -> Result<Vec<u8>, PlotError> {
        let (width, height) = self.figure_size();
        let mut pixels = vec![255u8; width as usize * height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
            root.fill(&WHITE).map_err(PlotError::render)?;
            if !self.panels.is_empty() {
                let areas = root.split_evenly((self.rows, self.cols));
                for (panel, area) in self.panels.iter().zip(areas.iter()) {
                    draw_panel(panel, area)?;
                }
            }
            root.present().map_err(PlotError::render)?;
        }
        encode_png(pixels, width, height)
    }
}

fn color(c: Rgb) -> RGBColor {
    RGBColor(c.0, c.1, c.2)
}

/// Transform `limit` into chart coordinates, dropping it if the scale cannot show it.
fn scaled_limit(scale: Scale, limit: Option<(f64, f64)>) -> Option<(f64, f64)> {
    let (lo, hi) = limit?;
    Some((scale.forward(lo)?, scale.forward(hi)?))
}

fn draw_panel(panel: &Panel, area: &DrawingArea<BitMapBackend<'_>, Shift>) -> Result<(), PlotError> {
    let canvas = color(panel.canvas);
    let axes = color(panel.axes);
    let ticks = color(panel.ticks);
    area.fill(&canvas).map_err(PlotError::render)?;

    let traces: Vec<(&Trace, Vec<(f64, f64)>)> = panel
        .traces
        .iter()
        .map(|t| {
            let points = t
                .points
                .iter()
                .filter_map(|&(x, y)| Some((panel.xscale.forward(x)?, panel.yscale.forward(y)?)))
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .collect();
            (t, points)
        })
        .collect();

    let (x0, x1) = axis_range(
        traces.iter().flat_map(|(_, pts)| pts.iter().map(|p| p.0)),
        scaled_limit(panel.xscale, panel.xlim),
    );
    let (y0, y1) = axis_range(
        traces.iter().flat_map(|(_, pts)| pts.iter().map(|p| p.1)),
        scaled_limit(panel.yscale, panel.ylim),
    );

    let mut builder = ChartBuilder::on(area);
    builder.margin(8).x_label_area_size(32).y_label_area_size(56);
    if let Some(title) = &panel.title {
        builder.caption(title, ("sans-serif", 16).into_font().color(&ticks));
    }
    let mut chart = builder
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(PlotError::render)?;

    let x_fmt = |v: &f64| tick_label(panel.xscale.invert(*v));
    let y_fmt = |v: &f64| tick_label(panel.yscale.invert(*v));
    let mut mesh = chart.configure_mesh();
    mesh.x_desc(panel.xlabel.clone())
        .y_desc(panel.ylabel.clone())
        .x_label_formatter(&x_fmt)
        .y_label_formatter(&y_fmt)
        .axis_style(axes.stroke_width(1))
        .label_style(("sans-serif", 12).into_font().color(&ticks));
    if panel.grid {
        mesh.light_line_style(axes.mix(0.1).stroke_width(1))
            .bold_line_style(axes.mix(0.25).stroke_width(1));
    } else {
        mesh.disable_mesh();
    }
    mesh.draw().map_err(PlotError::render)?;

    let mut labelled = false;
    for (trace, points) in traces {
        let style = color(trace.color);
        let anno = match trace.mode {
            Mode::Line => chart.draw_series(LineSeries::new(points, style.stroke_width(2))),
            Mode::Scatter => chart.draw_series(
                points
                    .into_iter()
                    .map(|p| Circle::new(p, 2, style.filled())),
            ),
        }
        .map_err(PlotError::render)?;
        if let Some(label) = &trace.label {
            anno.label(label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], style.stroke_width(2)));
            labelled = true;
        }
    }

    if labelled {
        chart
            .configure_series_labels()
            .border_style(&axes)
            .background_style(&canvas.mix(0.8))
            .label_font(("sans-serif", 12).into_font().color(&ticks))
            .draw()
            .map_err(PlotError::render)?;
    }
    Ok(())
}

pub(crate) fn encode_png(pixels: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, PlotError> {
    let img = image::RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| PlotError::render("pixel buffer does not match the figure size"))?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

impl PlotBackend for RasterBackend {
    fn name(&self) -> &'static str {
        "bitmap"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            xlog: true,
            ylog: true,
            xsymlog: true,
            ysymlog: true,
            canvas_color: true,
            axes_color: true,
            ticks_color: true,
            grid: true,
            plot_size: true,
            colorless: false,
            raw_bytes: true,
        }
    }

    fn create_subplot_grid(&mut self, rows: usize, cols: usize) {
        self.rows = rows.max(1);
        self.cols = cols.max(1);
        self.panels = vec![Panel::default(); self.rows * self.cols];
        self.current = 0;
        debug!(rows = self.rows, cols = self.cols, "bitmap subplot grid");
    }

    fn target_subplot(&mut self, addr: SubplotAddr) {
        let index = addr.row.saturating_sub(1) * self.cols + addr.col.saturating_sub(1);
        if index < self.panels.len() {
            self.current = index;
        } else {
            debug!(%addr, "subplot outside grid; drawing into the last panel");
            self.current = self.panels.len().saturating_sub(1);
        }
    }

    fn set_title(&mut self, title: &str) {
        self.panel().title = Some(title.to_string());
    }

    fn plot(&mut self, series: &Series, label: Option<&str>, color: Rgb) {
        self.panel().traces.push(Trace {
            label: label.map(str::to_string),
            points: series.points().collect(),
            color,
            mode: Mode::Line,
        });
    }

    fn scatter(&mut self, series: &Series, label: Option<&str>, color: Rgb) {
        self.panel().traces.push(Trace {
            label: label.map(str::to_string),
            points: series.points().collect(),
            color,
            mode: Mode::Scatter,
        });
    }

    fn set_xlabel(&mut self, label: &str) {
        self.panel().xlabel = label.to_string();
    }

    fn set_ylabel(&mut self, label: &str) {
        self.panel().ylabel = label.to_string();
    }

    fn apply(&mut self, styling: Styling) {
        match styling {
            Styling::CanvasColor(c) => self.panel().canvas = c,
            Styling::AxesColor(c) => self.panel().axes = c,
            Styling::TicksColor(c) => self.panel().ticks = c,
            Styling::Grid => self.panel().grid = true,
            Styling::PlotSize { width, height } => self.panel_size = (width.max(1), height.max(1)),
            Styling::XLim(lo, hi) => self.panel().xlim = Some((lo, hi)),
            Styling::YLim(lo, hi) => self.panel().ylim = Some((lo, hi)),
            Styling::XLog => self.panel().xscale = Scale::Log,
            Styling::YLog => self.panel().yscale = Scale::Log,
            Styling::XSymlog => self.panel().xscale = Scale::Symlog,
            Styling::YSymlog => self.panel().yscale = Scale::Symlog,
            Styling::Colorless => trace!("ignored by bitmap backend"),
        }
    }

    fn clear_current_figure(&mut self) {
        self.rows = 0;
        self.cols = 0;
        self.panels.clear();
        self.current = 0;
    }

    fn show(&mut self) -> Result<(), PlotError> {
        let png = self.render_png()?;
        fs::write(&self.output, &png).map_err(|e| PlotError::io(&self.output, e))?;
        info!(path = %self.output.display(), bytes = png.len(), "wrote figure");
        Ok(())
    }

    fn as_image_raw_bytes(&mut self) -> Result<Vec<u8>, PlotError> {
        self.render_png()
    }

    fn fixed_color_sequence(&self) -> Vec<Rgb> {
        vec![PALETTE[0]]
    }

    fn generator_color_sequence(&self) -> Vec<Rgb> {
        PALETTE.to_vec()
    }
}
