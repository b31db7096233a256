//! Character-cell backend: ratatui charts laid out in an off-screen buffer,
//! then printed line by line with crossterm.
//!
//! Nothing takes over the screen. `show` prints the figure below the cursor
//! and remembers how many lines it used so the next refresh can erase them.

use super::{Capabilities, PlotBackend, Rgb, Styling, SubplotAddr, axis_range, tick_label};
use crate::error::PlotError;
use crate::source::Series;

use crossterm::{
    cursor::{MoveToColumn, MoveUp},
    queue,
    style::{Color as TermColor, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    symbols::Marker,
    text::Span,
    widgets::{Axis, Block, Chart, Dataset, GraphType, Widget},
};
use std::io::{self, Write};
use tracing::{debug, trace};

const FALLBACK_SIZE: (u16, u16) = (80, 24);

const PALETTE: [Rgb; 6] = [
    Rgb(0, 175, 255),
    Rgb(255, 95, 95),
    Rgb(95, 215, 95),
    Rgb(255, 215, 0),
    Rgb(215, 95, 255),
    Rgb(0, 215, 215),
];

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

#[derive(Debug, Clone, Default)]
struct Panel {
    title: Option<String>,
    traces: Vec<Trace>,
    xlabel: String,
    ylabel: String,
    xlim: Option<(f64, f64)>,
    ylim: Option<(f64, f64)>,
    canvas: Option<Rgb>,
    axes: Option<Rgb>,
    ticks: Option<Rgb>,
}

pub struct TerminalBackend {
    out: Box<dyn Write>,
    width: Option<u16>,
    height: Option<u16>,
    panel_size: Option<(u16, u16)>,
    colorless: bool,
    rows: usize,
    cols: usize,
    panels: Vec<Panel>,
    current: usize,
    printed_lines: u16,
}

impl TerminalBackend {
    /// Prints to stdout. Either dimension overrides the detected terminal size.
    pub fn new(width: Option<u16>, height: Option<u16>) -> Self {
        Self::with_writer(Box::new(io::stdout()), width, height)
    }

    pub fn with_writer(out: Box<dyn Write>, width: Option<u16>, height: Option<u16>) -> Self {
        Self {
            out,
            width,
            height,
            panel_size: None,
            colorless: false,
            rows: 0,
            cols: 0,
            panels: Vec::new(),
            current: 0,
            printed_lines: 0,
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

    fn figure_size(&self) -> (u16, u16) {
        if let Some((w, h)) = self.panel_size {
            let w = w.saturating_mul(self.cols.max(1) as u16);
            let h = h.saturating_mul(self.rows.max(1) as u16);
            return (w, h);
        }
        let (term_w, term_h) = crossterm::terminal::size().unwrap_or(FALLBACK_SIZE);
        (self.width.unwrap_or(term_w), self.height.unwrap_or(term_h))
    }

    /// Lay every panel out into an off-screen buffer.
    fn render_buffer(&self) -> Buffer {
        let (width, height) = self.figure_size();
        let area = Rect::new(0, 0, width, height);
        let mut buf = Buffer::empty(area);
        if self.panels.is_empty() {
            return buf;
        }

        let rows = Layout::vertical(vec![Constraint::Ratio(1, self.rows as u32); self.rows])
            .split(area);
        for (r, row_area) in rows.iter().enumerate() {
            let cells =
                Layout::horizontal(vec![Constraint::Ratio(1, self.cols as u32); self.cols])
                    .split(*row_area);
            for (c, cell_area) in cells.iter().enumerate() {
                let panel = &self.panels[r * self.cols + c];
                render_panel(panel, *cell_area, &mut buf);
            }
        }
        buf
    }

    fn emit(&mut self, buf: &Buffer) -> io::Result<u16> {
        let area = buf.area;
        for y in area.top()..area.bottom() {
            let mut fg = None;
            let mut bg = None;
            for x in area.left()..area.right() {
                let Some(cell) = buf.cell((x, y)) else {
                    continue;
                };
                if !self.colorless {
                    if fg != Some(cell.fg) {
                        queue!(self.out, SetForegroundColor(term_color(cell.fg)))?;
                        fg = Some(cell.fg);
                    }
                    if bg != Some(cell.bg) {
                        queue!(self.out, SetBackgroundColor(term_color(cell.bg)))?;
                        bg = Some(cell.bg);
                    }
                }
                queue!(self.out, Print(cell.symbol()))?;
            }
            if !self.colorless {
                queue!(self.out, ResetColor)?;
            }
            queue!(self.out, Print("\n"))?;
        }
        self.out.flush()?;
        Ok(area.height)
    }

    #[cfg(test)]
    fn render_text(&self) -> Vec<String> {
        let buf = self.render_buffer();
        let area = buf.area;
        (area.top()..area.bottom())
            .map(|y| {
                (area.left()..area.right())
                    .filter_map(|x| buf.cell((x, y)).map(|c| c.symbol().to_string()))
                    .collect()
            })
            .collect()
    }
}

fn render_panel(panel: &Panel, area: Rect, buf: &mut Buffer) {
    let axes_style = panel.axes.map(|c| Style::default().fg(color(c))).unwrap_or_default();
    let ticks_style = panel.ticks.map(|c| Style::default().fg(color(c))).unwrap_or_default();
    let canvas_style = panel.canvas.map(|c| Style::default().bg(color(c))).unwrap_or_default();

    let datasets: Vec<Dataset> = panel
        .traces
        .iter()
        .map(|t| {
            let dataset = Dataset::default()
                .marker(Marker::Braille)
                .graph_type(match t.mode {
                    Mode::Line => GraphType::Line,
                    Mode::Scatter => GraphType::Scatter,
                })
                .style(Style::default().fg(color(t.color)))
                .data(&t.points);
            match &t.label {
                Some(label) => dataset.name(label.clone()),
                None => dataset,
            }
        })
        .collect();

    let xs = panel.traces.iter().flat_map(|t| t.points.iter().map(|p| p.0));
    let ys = panel.traces.iter().flat_map(|t| t.points.iter().map(|p| p.1));
    let (x0, x1) = axis_range(xs, panel.xlim);
    let (y0, y1) = axis_range(ys, panel.ylim);

    let labels = |lo: f64, hi: f64| -> Vec<Span<'static>> {
        [lo, (lo + hi) / 2.0, hi]
            .into_iter()
            .map(|v| Span::styled(tick_label(v), ticks_style))
            .collect()
    };

    let mut block = Block::bordered().border_style(axes_style);
    if let Some(title) = &panel.title {
        block = block.title(title.clone());
    }

    Chart::new(datasets)
        .block(block)
        .style(canvas_style)
        .x_axis(
            Axis::default()
                .title(Span::styled(panel.xlabel.clone(), ticks_style))
                .style(axes_style)
                .bounds([x0, x1])
                .labels(labels(x0, x1)),
        )
        .y_axis(
            Axis::default()
                .title(Span::styled(panel.ylabel.clone(), ticks_style))
                .style(axes_style)
                .bounds([y0, y1])
                .labels(labels(y0, y1)),
        )
        .render(area, buf);
}

fn color(c: Rgb) -> Color {
    Color::Rgb(c.0, c.1, c.2)
}

fn term_color(c: Color) -> TermColor {
    match c {
        Color::Reset => TermColor::Reset,
        Color::Rgb(r, g, b) => TermColor::Rgb { r, g, b },
        Color::Indexed(i) => TermColor::AnsiValue(i),
        Color::Black => TermColor::Black,
        Color::Red => TermColor::DarkRed,
        Color::Green => TermColor::DarkGreen,
        Color::Yellow => TermColor::DarkYellow,
        Color::Blue => TermColor::DarkBlue,
        Color::Magenta => TermColor::DarkMagenta,
        Color::Cyan => TermColor::DarkCyan,
        Color::Gray => TermColor::Grey,
        Color::DarkGray => TermColor::DarkGrey,
        Color::LightRed => TermColor::Red,
        Color::LightGreen => TermColor::Green,
        Color::LightYellow => TermColor::Yellow,
        Color::LightBlue => TermColor::Blue,
        Color::LightMagenta => TermColor::Magenta,
        Color::LightCyan => TermColor::Cyan,
        Color::White => TermColor::White,
    }
}

impl PlotBackend for TerminalBackend {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            canvas_color: true,
            axes_color: true,
            ticks_color: true,
            plot_size: true,
            colorless: true,
            ..Capabilities::default()
        }
    }

    fn create_subplot_grid(&mut self, rows: usize, cols: usize) {
        self.rows = rows.max(1);
        self.cols = cols.max(1);
        self.panels = vec![Panel::default(); self.rows * self.cols];
        self.current = 0;
        debug!(rows = self.rows, cols = self.cols, "terminal subplot grid");
    }

    fn target_subplot(&mut self, addr: SubplotAddr) {
        let index = (addr.row.saturating_sub(1)) * self.cols + addr.col.saturating_sub(1);
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
            Styling::CanvasColor(c) => self.panel().canvas = Some(c),
            Styling::AxesColor(c) => self.panel().axes = Some(c),
            Styling::TicksColor(c) => self.panel().ticks = Some(c),
            Styling::PlotSize { width, height } => {
                self.panel_size = Some((clamp_u16(width), clamp_u16(height)));
            }
            Styling::Colorless => self.colorless = true,
            Styling::XLim(lo, hi) => self.panel().xlim = Some((lo, hi)),
            Styling::YLim(lo, hi) => self.panel().ylim = Some((lo, hi)),
            other => trace!(?other, "ignored by terminal backend"),
        }
    }

    fn clear_current_figure(&mut self) {
        self.rows = 0;
        self.cols = 0;
        self.panels.clear();
        self.current = 0;
    }

    fn clear_terminal_printed_lines(&mut self) -> Result<(), PlotError> {
        if self.printed_lines > 0 {
            queue!(
                self.out,
                MoveUp(self.printed_lines),
                MoveToColumn(0),
                Clear(ClearType::FromCursorDown)
            )?;
            self.out.flush()?;
            self.printed_lines = 0;
        }
        Ok(())
    }

    fn show(&mut self) -> Result<(), PlotError> {
        let buf = self.render_buffer();
        self.printed_lines = self.emit(&buf)?;
        Ok(())
    }

    fn fixed_color_sequence(&self) -> Vec<Rgb> {
        vec![PALETTE[0]]
    }

    fn generator_color_sequence(&self) -> Vec<Rgb> {
        PALETTE.to_vec()
    }
}

fn clamp_u16(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}
