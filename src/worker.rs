//! Per-window worker thread
//!
//! A worker owns exactly one window for its whole life: it acquires the
//! resource set, alternates between dispatching the window's private event
//! channel and rendering, and releases everything once the shared flag says
//! stop. Nothing a worker touches is visible to any other worker except the
//! read-only backend and the shutdown flag.
//!
//! In blocking dispatch mode (`dispatch.timeout_ms = 0`) the flag is only
//! re-read after an event arrives, so a window whose channel stays silent
//! never notices shutdown and its join never returns. The default bounded
//! wait avoids that.

use crate::backend::{GraphicsBackend, Resource};
use crate::config::HarnessConfig;
use crate::error::WindowError;
use crate::render::Brightness;
use crate::shutdown::{self, ShutdownFlag};
use crate::window::{WindowGeometry, WindowId, WindowLifecycle, WindowState};
use log::{debug, error, trace, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Per-run settings shared by all workers
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub geometry: WindowGeometry,
    /// `None` blocks on the channel until an event arrives
    pub dispatch_timeout: Option<Duration>,
    pub error_backoff: Duration,
    pub render_step: f32,
    pub initial_brightness: f32,
}

impl WorkerSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            geometry: WindowGeometry::from(&config.window),
            dispatch_timeout: config.dispatch_timeout(),
            error_backoff: config.error_backoff(),
            render_step: config.render.step,
            initial_brightness: config.render.initial_brightness,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

/// What a worker hands back when it is joined
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub window: WindowId,
    pub final_state: WindowState,
    /// Every lifecycle state visited, oldest first
    pub history: Vec<WindowState>,
    /// Resources destroyed during release, in order
    pub released: Vec<Resource>,
    pub frames_presented: u64,
    pub present_failures: u64,
    /// Dispatch calls that processed at least one event
    pub dispatches: u64,
    pub dispatch_failures: u64,
    /// Set when the window never reached `Running`
    pub acquire_error: Option<WindowError>,
}

impl WorkerReport {
    /// Reached `Running` and shut down normally
    pub fn ran(&self) -> bool {
        self.acquire_error.is_none() && self.history.contains(&WindowState::Running)
    }
}

/// Spawn the worker thread for one window.
pub fn spawn<B: GraphicsBackend>(
    id: WindowId,
    backend: Arc<B>,
    flag: Arc<ShutdownFlag>,
    settings: Arc<WorkerSettings>,
) -> io::Result<JoinHandle<WorkerReport>> {
    thread::Builder::new()
        .name(id.to_string())
        .spawn(move || run(id, backend.as_ref(), &flag, &settings))
}

/// Worker body: acquire, loop until stop, release.
pub fn run<B: GraphicsBackend>(
    id: WindowId,
    backend: &B,
    flag: &ShutdownFlag,
    settings: &WorkerSettings,
) -> WorkerReport {
    if let Err(e) = shutdown::block_termination_signals() {
        warn!("{}: could not block termination signals: {}", id, e);
    }

    let resources = backend.new_window(id, &settings.geometry);
    let brightness = Brightness::new(settings.initial_brightness, settings.render_step);
    let mut window = WindowLifecycle::new(id, resources, brightness);
    let mut counters = DispatchCounters::default();

    let acquire_error = match window.acquire() {
        Ok(()) => {
            window.start();
            run_loop(&mut window, flag, settings, &mut counters);
            None
        }
        Err(e) => {
            // Terminal for this window only
            error!("{}: {} failed in state {}: {}", id, e.kind(), window.state(), e);
            Some(e)
        }
    };

    let released = window.release().to_vec();

    WorkerReport {
        window: id,
        final_state: window.state(),
        history: window.history().to_vec(),
        released,
        frames_presented: window.frames_presented(),
        present_failures: window.present_failures(),
        dispatches: counters.dispatches,
        dispatch_failures: counters.failures,
        acquire_error,
    }
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatches: u64,
    failures: u64,
}

fn run_loop<W: crate::backend::WindowResources>(
    window: &mut WindowLifecycle<W>,
    flag: &ShutdownFlag,
    settings: &WorkerSettings,
    counters: &mut DispatchCounters,
) {
    let id = window.id();
    while !flag.is_stopping() {
        match window.dispatch(settings.dispatch_timeout) {
            Ok(0) => trace!("{}: no events", id),
            Ok(events) => {
                counters.dispatches += 1;
                trace!("{}: dispatched {} events", id, events);
                // Present failures are counted and logged by the lifecycle
                let _ = window.render();
            }
            Err(e) => {
                counters.failures += 1;
                warn!("{}: {}", id, e);
                flag.wait_for_stop(settings.error_backoff);
            }
        }
    }
    debug!(
        "{}: observed shutdown after {} frames",
        id,
        window.frames_presented()
    );
}
