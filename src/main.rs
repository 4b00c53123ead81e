//! # wlswarm - multi-window Wayland/EGL stress harness
//!
//! Opens `-threads=N` windows (one worker thread each), animates them until
//! SIGTERM or SIGINT, then tears every window down in order and exits 0.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;

use wlswarm::backend::headless::HeadlessDisplay;
use wlswarm::config::{BackendKind, HarnessConfig};
use wlswarm::shutdown::TerminationSignalsBlocked;
use wlswarm::{harness, logging, RunSummary, StopListener, WindowId};

#[derive(Parser, Debug)]
#[command(name = "wlswarm")]
#[command(about = "Open many concurrently rendering windows and shut them down cleanly")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of windows (one thread each), clamped to 1..=256
    #[arg(short, long)]
    threads: Option<usize>,

    /// Log verbosity: 0 error, 1 warn, 2 info, 3 debug, 4+ trace
    #[arg(short, long)]
    verbose: Option<u8>,

    /// Backend to drive
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// Window width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Window height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Dispatch wait bound in milliseconds; 0 blocks until an event arrives
    #[arg(long)]
    dispatch_timeout_ms: Option<u64>,
}

/// Accept the historical single-dash `-threads=N` / `-verbose=N` forms.
fn normalize_legacy_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(s)
                if ["-threads", "-verbose"]
                    .iter()
                    .any(|flag| s == *flag || s.starts_with(&format!("{}=", flag))) =>
            {
                OsString::from(format!("-{}", s))
            }
            _ => arg,
        })
        .collect()
}

/// Configuration file (or defaults) with command-line overrides applied
fn build_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(threads) = cli.threads {
        config.general.threads = threads;
    }
    if let Some(verbose) = cli.verbose {
        config.general.verbose = verbose;
    }
    if let Some(kind) = cli.backend {
        config.backend.kind = kind;
    }
    if let Some(width) = cli.width {
        config.window.width = width;
    }
    if let Some(height) = cli.height {
        config.window.height = height;
    }
    if let Some(timeout) = cli.dispatch_timeout_ms {
        config.dispatch.timeout_ms = timeout;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn log_banner(config: &HarnessConfig) {
    info!("wlswarm {}", wlswarm::VERSION);
    debug!(
        "built {} for {} ({})",
        env!("WLSWARM_BUILD_DATE"),
        env!("WLSWARM_TARGET"),
        option_env!("WLSWARM_GIT_COMMIT").unwrap_or("unknown commit")
    );
    info!(
        "backend {}, {} window(s) of {}x{}, dispatch {}",
        config.backend.kind.as_str(),
        config.effective_threads(),
        config.window.width,
        config.window.height,
        match config.dispatch_timeout() {
            Some(timeout) => format!("bounded at {:?}", timeout),
            None => "blocking".to_string(),
        }
    );
    if config.dispatch_timeout().is_none() {
        warn!("blocking dispatch: a window that receives no events will never observe shutdown");
    }
}

fn run_headless(config: &HarnessConfig, listener: &mut StopListener) -> Result<RunSummary> {
    let display = HeadlessDisplay::new();
    let silent: Vec<WindowId> = config
        .headless
        .silent_windows
        .iter()
        .map(|index| WindowId(*index))
        .collect();

    // Stops when dropped, after every worker has been joined
    let _pump = match config.headless_event_interval() {
        Some(interval) => {
            let _masked = TerminationSignalsBlocked::or_warn("starting the event pump");
            Some(
                display
                    .start_pump(interval, silent)
                    .context("Failed to start the headless event pump")?,
            )
        }
        None => None,
    };

    Ok(harness::launch(config, || display.connect(), listener)?)
}

#[cfg(feature = "wayland")]
fn run_wayland(config: &HarnessConfig, listener: &mut StopListener) -> Result<RunSummary> {
    use wlswarm::backend::wayland::WaylandBackend;

    Ok(harness::launch(config, WaylandBackend::connect, listener)?)
}

#[cfg(not(feature = "wayland"))]
fn run_wayland(_config: &HarnessConfig, _listener: &mut StopListener) -> Result<RunSummary> {
    anyhow::bail!("built without the `wayland` feature; use --backend headless")
}

fn log_summary(summary: &RunSummary) {
    info!(
        "stopped by {}: {} window(s) joined, {} frame(s) presented on {}",
        summary.stop_reason,
        summary.windows(),
        summary.frames_presented(),
        summary.backend
    );
    for report in &summary.reports {
        debug!(
            "{}: {} frames, {} present failures, {} dispatches, {} dispatch failures",
            report.window,
            report.frames_presented,
            report.present_failures,
            report.dispatches,
            report.dispatch_failures
        );
    }
    for report in summary.failed_windows() {
        if let Some(err) = &report.acquire_error {
            warn!("{} never ran: {}", report.window, err);
        }
    }
    if !summary.panicked.is_empty() {
        warn!("{} worker thread(s) panicked", summary.panicked.len());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(normalize_legacy_args(std::env::args_os()));
    let config = build_config(&cli)?;

    logging::init(config.general.verbose);
    log_banner(&config);

    // Installed before any window exists so no signal is missed
    let (mut listener, _stop) =
        StopListener::with_signals().context("Failed to install signal handlers")?;

    let summary = match config.backend.kind {
        BackendKind::Headless => run_headless(&config, &mut listener)?,
        BackendKind::Wayland => run_wayland(&config, &mut listener)?,
    };

    log_summary(&summary);
    info!("clean shutdown");
    Ok(())
}
