//! The refresh loop: draw every run, hand the figure off, sleep, repeat.
//!
//! Draw -> Display | Export -> Done | Sleep -> Draw
//!
//! Sleeping and cancellation are injected so tests can drive the loop
//! without waiting on a clock.

use crate::config::{OutputMode, RenderOptions};
use crate::consolidate::{Groups, consolidate};
use crate::error::PlotError;
use crate::render::{DrawMode, SubplotAddr, Surface};
use crate::source::{RunSource, SeriesProvider};

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shared stop flag; tripped by the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Sleeper {
    /// Wait for `dur` or until `cancel` trips, whichever comes first.
    fn sleep(&mut self, dur: Duration, cancel: &CancelToken);
}

/// Sleeps on the current thread in short slices, checking the token between them.
#[derive(Debug, Default)]
pub struct ThreadSleeper;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, dur: Duration, cancel: &CancelToken) {
        let deadline = Instant::now() + dur;
        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Draw,
    Display,
    Export,
    Sleep(Duration),
    Done(Outcome),
}

pub struct Orchestrator {
    options: RenderOptions,
    runs: Box<dyn RunSource>,
    surface: Surface,
    sleeper: Box<dyn Sleeper>,
    cancel: CancelToken,
    sink: Box<dyn Write>,
    cycle: usize,
}

impl Orchestrator {
    pub fn new(options: RenderOptions, runs: Box<dyn RunSource>, surface: Surface) -> Self {
        Self {
            options,
            runs,
            surface,
            sleeper: Box::new(ThreadSleeper),
            cancel: CancelToken::new(),
            sink: Box::new(io::stdout()),
            cycle: 0,
        }
    }

    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[cfg(test)]
    /// Destination of `--as-raw-bytes` output.
    pub fn with_sink(mut self, sink: Box<dyn Write>) -> Self {
        self.sink = sink;
        self
    }

    pub fn run(&mut self) -> Result<Outcome, PlotError> {
        let mut state = State::Draw;
        loop {
            state = match state {
                State::Draw => {
                    if self.draw()? {
                        match self.options.output_mode {
                            OutputMode::Show => State::Display,
                            OutputMode::RawBytes => State::Export,
                        }
                    } else {
                        State::Done(Outcome::Cancelled)
                    }
                }
                State::Display => {
                    self.surface.clear_terminal_printed_lines()?;
                    self.surface.show()?;
                    self.after_output()
                }
                State::Export => {
                    self.surface.clear_terminal_printed_lines()?;
                    let bytes = self.surface.as_image_raw_bytes()?;
                    self.sink.write_all(&bytes)?;
                    self.sink.flush()?;
                    info!(bytes = bytes.len(), "wrote raw image bytes");
                    self.after_output()
                }
                State::Sleep(interval) => {
                    self.sleeper.sleep(interval, &self.cancel);
                    if self.cancel.is_cancelled() {
                        State::Done(Outcome::Cancelled)
                    } else {
                        State::Draw
                    }
                }
                State::Done(outcome) => {
                    info!(?outcome, cycles = self.cycle, "refresh loop finished");
                    return Ok(outcome);
                }
            };
        }
    }

    fn after_output(&self) -> State {
        match self.options.follow {
            None => State::Done(Outcome::Completed),
            Some(_) if self.cancel.is_cancelled() => State::Done(Outcome::Cancelled),
            Some(interval) => State::Sleep(interval),
        }
    }

    /// Lay out one figure. Returns `false` when cancelled part way.
    fn draw(&mut self) -> Result<bool, PlotError> {
        self.cycle += 1;
        self.surface.clear_current_figure();
        self.runs.rescan()?;

        let cols = self.runs.len();
        let runs = self.runs.runs();
        let groups: Vec<Groups> = runs
            .iter()
            .map(|run| consolidate(run.names(), self.options.consolidation, &self.options.filter))
            .collect();
        let rows = groups.iter().map(Groups::len).max().unwrap_or(0).max(1);
        self.surface.create_subplot_grid(rows, cols);
        info!(cycle = self.cycle, rows, cols, "drawing figure");

        for (i, (run, groups)) in runs.iter().zip(&groups).enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            let drawn = plot_run(
                &mut self.surface,
                &self.options,
                run.as_ref(),
                groups,
                i + 1,
                &self.cancel,
            )?;
            if !drawn {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Draw one run into column `col`, one subplot row per group.
fn plot_run(
    surface: &mut Surface,
    options: &RenderOptions,
    run: &dyn SeriesProvider,
    groups: &Groups,
    col: usize,
    cancel: &CancelToken,
) -> Result<bool, PlotError> {
    let title = options.run_title(&run.title());
    let xlabel = options.x_kind.to_string();
    debug!(run = %run.title(), col, groups = ?groups.prefixes(), "plotting run");

    for (i, group) in groups.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let addr = SubplotAddr::new(i + 1, col);
        surface.target_subplot(addr);
        if i == 0 {
            surface.set_title(&title);
        }

        for (name, color) in group.members.iter().zip(surface.colors()) {
            let mut series = run.series(&options.x_kind, name)?;
            if let Some(smoothing) = options.smoothing {
                series.ys = smoothing.apply(&series.ys)?;
            }
            debug!(run = %run.title(), %addr, name = name.as_str(), points = series.len(), "plotting series");

            let label = options.label_for(name);
            match options.draw_mode {
                DrawMode::Line => surface.plot(&series, label, color),
                DrawMode::Scatter => surface.scatter(&series, label, color),
            }
            surface.post_setup(&xlabel, name, addr);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cli, resolve};
    use crate::render::testing::{Call, CallLog, PALETTE, RecordingBackend};
    use crate::render::{Capabilities, Rgb};
    use crate::source::{Series, XKind};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeRun {
        title: String,
        names: Vec<String>,
        len: usize,
    }

    impl SeriesProvider for FakeRun {
        fn title(&self) -> String {
            self.title.clone()
        }
        fn refresh(&mut self) -> Result<(), PlotError> {
            Ok(())
        }
        fn names(&self) -> &[String] {
            &self.names
        }
        fn series(&self, _x: &XKind, name: &str) -> Result<Series, PlotError> {
            if !self.names.iter().any(|n| n == name) {
                return Err(PlotError::UnknownMetric {
                    run: self.title.clone(),
                    name: name.to_string(),
                });
            }
            Ok(Series::indexed((0..self.len).map(|i| (i as f64).sin()).collect()))
        }
    }

    struct FakeSource {
        runs: Vec<Box<dyn SeriesProvider>>,
        rescans: Rc<RefCell<usize>>,
    }

    impl RunSource for FakeSource {
        fn rescan(&mut self) -> Result<(), PlotError> {
            *self.rescans.borrow_mut() += 1;
            Ok(())
        }
        fn runs(&self) -> &[Box<dyn SeriesProvider>] {
            &self.runs
        }
    }

    fn run(title: &str, names: &[&str], len: usize) -> Box<dyn SeriesProvider> {
        Box::new(FakeRun {
            title: title.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            len,
        })
    }

    fn options(args: &[&str]) -> RenderOptions {
        let cli = Cli::try_parse_from(
            ["termplot"].into_iter().chain(args.iter().copied()).chain(["runs"]),
        )
        .unwrap();
        resolve(&cli)
    }

    fn orchestrator(
        args: &[&str],
        runs: Vec<Box<dyn SeriesProvider>>,
        capabilities: Capabilities,
    ) -> (Orchestrator, CallLog, Rc<RefCell<usize>>) {
        let options = options(args);
        let (backend, log) = RecordingBackend::new(capabilities);
        let surface = Surface::new(Box::new(backend), options.style.clone()).unwrap();
        let rescans = Rc::new(RefCell::new(0));
        let source = FakeSource {
            runs,
            rescans: rescans.clone(),
        };
        (
            Orchestrator::new(options, Box::new(source), surface),
            log,
            rescans,
        )
    }

    fn targets(log: &CallLog) -> Vec<SubplotAddr> {
        log.borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Target(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn grid_fits_the_run_with_most_groups() {
        let (mut orch, log, _) = orchestrator(
            &[],
            vec![
                run("runs/a", &["loss", "acc", "lr"], 8),
                run("runs/b", &["loss"], 8),
            ],
            Capabilities::default(),
        );
        assert_eq!(orch.run().unwrap(), Outcome::Completed);

        assert!(log.borrow().contains(&Call::Grid(3, 2)));
        assert_eq!(
            targets(&log),
            vec![
                SubplotAddr::new(1, 1),
                SubplotAddr::new(2, 1),
                SubplotAddr::new(3, 1),
                SubplotAddr::new(1, 2),
            ]
        );
    }

    #[test]
    fn one_cycle_clears_draws_then_shows() {
        let (mut orch, log, rescans) =
            orchestrator(&[], vec![run("runs/a", &["loss"], 4)], Capabilities::default());
        orch.run().unwrap();

        let log = log.borrow();
        assert_eq!(log.first(), Some(&Call::Clear));
        assert_eq!(&log[log.len() - 2..], &[Call::ClearLines, Call::Show]);
        assert!(log.contains(&Call::Title("'runs/a'".into())));
        assert!(log.contains(&Call::XLabel("step".into())));
        assert!(log.contains(&Call::YLabel("loss".into())));
        assert_eq!(*rescans.borrow(), 1);
    }

    #[test]
    fn title_only_on_the_top_row() {
        let (mut orch, log, _) = orchestrator(
            &[],
            vec![run("runs/a", &["loss", "acc"], 4)],
            Capabilities::default(),
        );
        orch.run().unwrap();
        let titles = log
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Title(_)))
            .count();
        assert_eq!(titles, 1);
    }

    #[test]
    fn consolidated_series_are_labelled_and_cycle_colors() {
        let (mut orch, log, _) = orchestrator(
            &["-c"],
            vec![run("runs/a", &["train/loss", "train/acc", "train/lr"], 4)],
            Capabilities::default(),
        );
        orch.run().unwrap();

        let plots: Vec<(Option<String>, Rgb)> = log
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Plot { label, color, .. } => Some((label.clone(), *color)),
                _ => None,
            })
            .collect();
        assert_eq!(
            plots,
            vec![
                (Some("train/loss".into()), PALETTE[0]),
                (Some("train/acc".into()), PALETTE[1]),
                (Some("train/lr".into()), PALETTE[0]),
            ]
        );
        assert!(log.borrow().contains(&Call::Grid(1, 1)));
    }

    #[test]
    fn scatter_mode_and_smoothing_keep_series_length() {
        let (mut orch, log, _) = orchestrator(
            &["--as-scatter", "-s", "0.5"],
            vec![run("runs/a", &["loss"], 30)],
            Capabilities::default(),
        );
        orch.run().unwrap();
        assert!(log.borrow().contains(&Call::Scatter {
            len: 30,
            label: None,
            color: PALETTE[0],
        }));
    }

    #[test]
    fn too_short_series_fails_the_cycle() {
        let (mut orch, _, _) = orchestrator(
            &["-s", "0.5"],
            vec![run("runs/a", &["loss"], 3)],
            Capabilities::default(),
        );
        let err = orch.run().unwrap_err();
        assert!(matches!(err, PlotError::InsufficientData { len: 3, .. }));
    }

    #[test]
    fn raw_bytes_go_to_the_sink() {
        #[derive(Clone, Default)]
        struct Sink(Rc<RefCell<Vec<u8>>>);
        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let (orch, log, _) = orchestrator(
            &["--as-raw-bytes"],
            vec![run("runs/a", &["loss"], 4)],
            Capabilities {
                raw_bytes: true,
                ..Capabilities::default()
            },
        );
        let mut orch = orch.with_sink(Box::new(sink.clone()));
        orch.run().unwrap();

        assert_eq!(*sink.0.borrow(), b"PNG".to_vec());
        assert!(log.borrow().contains(&Call::RawBytes));
        assert!(!log.borrow().contains(&Call::Show));
    }

    struct CancelAfter {
        remaining: usize,
        slept: Rc<RefCell<Vec<Duration>>>,
    }

    impl Sleeper for CancelAfter {
        fn sleep(&mut self, dur: Duration, cancel: &CancelToken) {
            self.slept.borrow_mut().push(dur);
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                cancel.cancel();
            }
        }
    }

    #[test]
    fn follow_loops_until_cancelled() {
        let slept = Rc::new(RefCell::new(Vec::new()));
        let cancel = CancelToken::new();
        let (orch, log, rescans) = orchestrator(
            &["-f", "-n", "2"],
            vec![run("runs/a", &["loss"], 4)],
            Capabilities::default(),
        );
        let mut orch = orch
            .with_cancel(cancel.clone())
            .with_sleeper(Box::new(CancelAfter {
                remaining: 3,
                slept: slept.clone(),
            }));

        assert_eq!(orch.run().unwrap(), Outcome::Cancelled);
        assert_eq!(*slept.borrow(), vec![Duration::from_secs(2); 3]);
        assert_eq!(*rescans.borrow(), 3);
        let shows = log.borrow().iter().filter(|c| **c == Call::Show).count();
        assert_eq!(shows, 3);
        assert!(
            log.borrow()
                .contains(&Call::Title("'runs/a' [refresh every 2s]".into()))
        );
    }

    #[test]
    fn cancel_before_drawing_stops_without_output() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (orch, log, _) = orchestrator(
            &[],
            vec![run("runs/a", &["loss"], 4)],
            Capabilities::default(),
        );
        let mut orch = orch.with_cancel(cancel);
        assert_eq!(orch.run().unwrap(), Outcome::Cancelled);
        assert!(!log.borrow().contains(&Call::Show));
    }

    struct Truncate(std::path::PathBuf);

    impl Sleeper for Truncate {
        fn sleep(&mut self, _dur: Duration, _cancel: &CancelToken) {
            std::fs::write(&self.0, "").unwrap();
        }
    }

    #[test]
    fn run_emptied_between_cycles_ends_the_loop_with_an_error() {
        use crate::source::{NanPolicy, SourceEnumerator, SourceKind};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "loss\n1\n2\n3\n").unwrap();

        let options = options(&["--csv", "-f", "-n", "1"]);
        let (backend, log) = RecordingBackend::new(Capabilities::default());
        let surface = Surface::new(Box::new(backend), options.style.clone()).unwrap();
        let runs = SourceEnumerator::new(dir.path(), SourceKind::Csv, NanPolicy::Drop);
        let mut orch = Orchestrator::new(options, Box::new(runs), surface)
            .with_sleeper(Box::new(Truncate(path)));

        let err = orch.run().unwrap_err();
        assert!(matches!(err, PlotError::EmptySeries { .. }));
        let shows = log.borrow().iter().filter(|c| **c == Call::Show).count();
        assert_eq!(shows, 1);
    }

    #[test]
    fn thread_sleeper_returns_early_when_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        ThreadSleeper.sleep(Duration::from_secs(30), &cancel);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
