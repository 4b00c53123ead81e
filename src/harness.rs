//! Run orchestration
//!
//! The startup and shutdown sequence of a whole run:
//!
//! ```text
//! connect backend ──fail──> error, no thread spawned
//!       │
//! spawn N workers (one per window)
//!       │
//! wait for stop (signal or handle)
//!       │
//! set shutdown flag ─> join workers in spawn order ─> terminate backend
//! ```

use crate::backend::GraphicsBackend;
use crate::config::{HarnessConfig, MAX_WINDOWS};
use crate::error::BackendError;
use crate::shutdown::{self, ShutdownFlag, StopListener, StopReason};
use crate::window::WindowId;
use crate::worker::{self, WorkerReport, WorkerSettings};
use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// Failures that prevent a run from starting
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to spawn worker thread for {window}: {source}")]
    Spawn {
        window: WindowId,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub backend: &'static str,
    pub stop_reason: StopReason,
    /// One report per joined worker, in spawn order
    pub reports: Vec<WorkerReport>,
    /// Workers whose thread panicked instead of returning a report
    pub panicked: Vec<WindowId>,
}

impl RunSummary {
    pub fn windows(&self) -> usize {
        self.reports.len() + self.panicked.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.reports.iter().map(|r| r.frames_presented).sum()
    }

    pub fn failed_windows(&self) -> impl Iterator<Item = &WorkerReport> {
        self.reports.iter().filter(|r| r.acquire_error.is_some())
    }
}

/// A backend plus the settings for one run, not yet started
pub struct Harness<B: GraphicsBackend> {
    backend: Arc<B>,
    flag: Arc<ShutdownFlag>,
    settings: Arc<WorkerSettings>,
    windows: usize,
}

impl<B: GraphicsBackend> Harness<B> {
    pub fn new(backend: Arc<B>, config: &HarnessConfig) -> Self {
        let requested = config.general.threads;
        let windows = config.effective_threads();
        if windows != requested {
            warn!(
                "requested {} windows, using {} (allowed range 1..={})",
                requested, windows, MAX_WINDOWS
            );
        }

        Self {
            backend,
            flag: Arc::new(ShutdownFlag::new()),
            settings: Arc::new(WorkerSettings::from_config(config)),
            windows,
        }
    }

    /// Number of worker threads [`spawn`](Self::spawn) will start
    pub fn window_count(&self) -> usize {
        self.windows
    }

    pub fn shutdown_flag(&self) -> Arc<ShutdownFlag> {
        Arc::clone(&self.flag)
    }

    /// Start one worker per window.
    ///
    /// If a thread cannot be spawned the workers already running are
    /// stopped and joined and the backend is terminated before returning
    /// the error.
    pub fn spawn(self) -> Result<RunningHarness<B>, HarnessError> {
        info!(
            "starting {} window(s) on the {} backend",
            self.windows,
            self.backend.name()
        );

        // Workers start with termination signals already masked
        let _masked = shutdown::TerminationSignalsBlocked::or_warn("spawning workers");
        let mut workers = Vec::with_capacity(self.windows);
        for index in 0..self.windows {
            let id = WindowId(index);
            match worker::spawn(
                id,
                Arc::clone(&self.backend),
                Arc::clone(&self.flag),
                Arc::clone(&self.settings),
            ) {
                Ok(handle) => workers.push((id, handle)),
                Err(source) => {
                    error!("failed to spawn {}: {}", id, source);
                    let partial = RunningHarness {
                        backend: self.backend,
                        flag: self.flag,
                        workers,
                    };
                    partial.shutdown(StopReason::Requested);
                    return Err(HarnessError::Spawn { window: id, source });
                }
            }
        }

        Ok(RunningHarness {
            backend: self.backend,
            flag: self.flag,
            workers,
        })
    }
}

/// Workers are running; owns their join handles
pub struct RunningHarness<B: GraphicsBackend> {
    backend: Arc<B>,
    flag: Arc<ShutdownFlag>,
    workers: Vec<(WindowId, JoinHandle<WorkerReport>)>,
}

impl<B: GraphicsBackend> RunningHarness<B> {
    pub fn window_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown_flag(&self) -> Arc<ShutdownFlag> {
        Arc::clone(&self.flag)
    }

    /// Block until `listener` reports a stop, then shut down.
    pub fn run_until_stopped(self, listener: &mut StopListener) -> RunSummary {
        let reason = listener.wait();
        info!("received {}, cleaning up", reason);
        self.shutdown(reason)
    }

    /// Set the flag, join every worker in spawn order, terminate the
    /// backend.
    pub fn shutdown(self, reason: StopReason) -> RunSummary {
        if !self.flag.request_stop() {
            debug!("shutdown flag was already set");
        }

        info!("waiting for {} worker(s)", self.workers.len());
        let mut reports = Vec::with_capacity(self.workers.len());
        let mut panicked = Vec::new();
        for (id, handle) in self.workers {
            match handle.join() {
                Ok(report) => {
                    debug!("{}: joined in state {}", id, report.final_state);
                    reports.push(report);
                }
                Err(_) => {
                    error!("{}: worker thread panicked", id);
                    panicked.push(id);
                }
            }
        }
        info!("all workers joined");

        self.backend.terminate();

        RunSummary {
            backend: self.backend.name(),
            stop_reason: reason,
            reports,
            panicked,
        }
    }
}

/// Full run: connect, spawn, wait for stop, shut down.
///
/// `connect` runs before any thread exists; its failure is returned
/// unchanged and nothing is spawned.
pub fn launch<B, F>(
    config: &HarnessConfig,
    connect: F,
    listener: &mut StopListener,
) -> Result<RunSummary, HarnessError>
where
    B: GraphicsBackend,
    F: FnOnce() -> Result<B, BackendError>,
{
    // Covers any thread the graphics driver starts during device init
    let masked = shutdown::TerminationSignalsBlocked::or_warn("connecting");
    let connected = connect();
    drop(masked);

    let backend = match connected {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("backend setup failed: {}", e);
            return Err(e.into());
        }
    };

    let running = Harness::new(backend, config).spawn()?;
    Ok(running.run_until_stopped(listener))
}
