use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;
mod consolidate;
mod error;
mod orchestrator;
mod render;
mod smooth;
mod source;

use config::Cli;
use orchestrator::{CancelToken, Orchestrator, Outcome};
use render::{BackendKind, PlotBackend, RasterBackend, Surface, TerminalBackend};
use source::SourceEnumerator;

pub type Result<T> = anyhow::Result<T>;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version land here too.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(outcome) => {
            debug!(?outcome, "exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so raw image bytes on stdout stay clean.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<Outcome> {
    let options = config::resolve(cli);
    debug!(options = %serde_json::to_string(&options)?, "resolved options");

    // Reject unsupported options before touching the data.
    let backend: Box<dyn PlotBackend> = match options.backend {
        BackendKind::Terminal => Box::new(TerminalBackend::new(
            options.terminal_width,
            options.terminal_height,
        )),
        BackendKind::Bitmap => Box::new(RasterBackend::new(&options.output)),
    };
    let surface = Surface::new(backend, options.style.clone())?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel()).context("installing Ctrl-C handler")?;

    let folder = options.folder.clone();
    let runs = SourceEnumerator::new(&folder, options.source, options.nan);
    let mut orchestrator = Orchestrator::new(options, Box::new(runs), surface).with_cancel(cancel);

    orchestrator
        .run()
        .with_context(|| format!("plotting '{}'", folder.display()))
}
