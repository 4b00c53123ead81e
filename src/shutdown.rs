//! Shutdown coordination
//!
//! Three pieces cooperate to stop a run:
//!
//! - [`ShutdownFlag`]: the single shared run state. Written once by the
//!   coordinator, read by every worker after each loop iteration, always
//!   under the same mutex. A condition variable lets sleeping workers wake
//!   as soon as it flips.
//! - [`StopListener`]: the coordinator's "await stop" primitive. Waits on
//!   SIGTERM/SIGINT (through tokio's signal driver) and on programmatic
//!   [`StopHandle`] requests. SIGHUP, SIGUSR1 and SIGUSR2 are reported and
//!   ignored.
//! - [`block_termination_signals`]: called by every worker thread so that
//!   termination signals are never delivered to (or interrupt) a worker.

use log::{info, warn};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;

/// Signals a worker thread never handles itself
const WORKER_BLOCKED_SIGNALS: [libc::c_int; 5] = [
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGHUP,
    libc::SIGUSR1,
    libc::SIGUSR2,
];

/// Shared run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
}

/// Process-wide stop flag guarded by a mutex
#[derive(Debug)]
pub struct ShutdownFlag {
    state: Mutex<RunState>,
    changed: Condvar,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Running),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == RunState::Stopping
    }

    /// Flip the flag to `Stopping` and wake every waiter.
    ///
    /// Returns `true` for the call that actually changed the state; the
    /// flag is never reset.
    pub fn request_stop(&self) -> bool {
        let mut state = self.state.lock();
        if *state == RunState::Stopping {
            return false;
        }
        *state = RunState::Stopping;
        self.changed.notify_all();
        true
    }

    /// Sleep for up to `timeout`, returning early when stop is requested.
    ///
    /// Returns whether the flag reads `Stopping` on return.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let _ = self
            .changed
            .wait_while_for(&mut state, |s| *s == RunState::Running, timeout);
        *state == RunState::Stopping
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the coordinator stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGTERM
    Terminate,
    /// SIGINT
    Interrupt,
    /// A [`StopHandle`] asked for it, or every handle was dropped while no
    /// signals were being watched
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Terminate => f.write_str("SIGTERM"),
            StopReason::Interrupt => f.write_str("SIGINT"),
            StopReason::Requested => f.write_str("stop request"),
        }
    }
}

/// Cloneable trigger for a programmatic stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl StopHandle {
    /// Ask the listener to stop. Returns `false` if it is already gone.
    pub fn request_stop(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

struct SignalSet {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
    user1: Signal,
    user2: Signal,
}

impl SignalSet {
    /// Must run inside the listener's runtime context.
    fn register() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
        })
    }
}

/// Blocking wait for the external request to stop.
///
/// Owns a single-threaded tokio runtime that drives the signal streams.
/// Signal handlers are installed when the listener is built, so a signal
/// arriving between construction and [`wait`](Self::wait) is not lost.
pub struct StopListener {
    runtime: tokio::runtime::Runtime,
    requests: mpsc::UnboundedReceiver<()>,
    signals: Option<SignalSet>,
}

impl StopListener {
    /// Listener that only reacts to [`StopHandle`] requests
    pub fn manual() -> io::Result<(Self, StopHandle)> {
        Self::build(false)
    }

    /// Listener that reacts to SIGTERM/SIGINT as well as handle requests
    pub fn with_signals() -> io::Result<(Self, StopHandle)> {
        Self::build(true)
    }

    fn build(watch_signals: bool) -> io::Result<(Self, StopHandle)> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("wlswarm-signals")
            .build()?;

        let signals = if watch_signals {
            let _guard = runtime.enter();
            Some(SignalSet::register()?)
        } else {
            None
        };

        let (tx, requests) = mpsc::unbounded_channel();
        Ok((
            Self {
                runtime,
                requests,
                signals,
            },
            StopHandle { tx },
        ))
    }

    /// Whether SIGTERM/SIGINT handlers are installed
    pub fn watches_signals(&self) -> bool {
        self.signals.is_some()
    }

    /// Block the calling thread until a stop is requested.
    pub fn wait(&mut self) -> StopReason {
        let Self {
            runtime,
            requests,
            signals,
        } = self;

        runtime.block_on(async move {
            let mut requests_open = true;
            loop {
                let Some(set) = signals.as_mut() else {
                    if requests.recv().await.is_none() {
                        warn!("every stop handle was dropped; stopping");
                    }
                    return StopReason::Requested;
                };

                tokio::select! {
                    _ = set.terminate.recv() => return StopReason::Terminate,
                    _ = set.interrupt.recv() => return StopReason::Interrupt,
                    _ = set.hangup.recv() => info!("received SIGHUP, ignoring"),
                    _ = set.user1.recv() => info!("received SIGUSR1, ignoring"),
                    _ = set.user2.recv() => info!("received SIGUSR2, ignoring"),
                    request = requests.recv(), if requests_open => match request {
                        Some(()) => return StopReason::Requested,
                        // Signals can still stop us
                        None => requests_open = false,
                    },
                }
            }
        })
    }
}

fn termination_set() -> libc::sigset_t {
    // SAFETY: sigset_t is plain data initialized by sigemptyset before use
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in WORKER_BLOCKED_SIGNALS {
            libc::sigaddset(&mut set, sig);
        }
        set
    }
}

fn set_thread_mask(
    how: libc::c_int,
    set: &libc::sigset_t,
    previous: Option<&mut libc::sigset_t>,
) -> io::Result<()> {
    let previous = previous.map_or(std::ptr::null_mut(), |p| p as *mut libc::sigset_t);
    // SAFETY: pthread_sigmask only affects the calling thread
    let rc = unsafe { libc::pthread_sigmask(how, set, previous) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Block termination-class signals on the calling thread.
///
/// Worker threads call this first thing, so the kernel delivers SIGTERM and
/// SIGINT to a thread that is waiting for them instead of interrupting a
/// worker in the middle of a dispatch.
pub fn block_termination_signals() -> io::Result<()> {
    set_thread_mask(libc::SIG_BLOCK, &termination_set(), None)
}

/// Termination signals blocked on the calling thread until dropped.
///
/// Threads spawned while the guard is held (workers, the headless pump,
/// driver threads started by `eglInitialize`) inherit the mask from their
/// first instruction. A signal arriving meanwhile stays pending and is
/// delivered once the previous mask is restored.
pub struct TerminationSignalsBlocked {
    previous: libc::sigset_t,
}

impl TerminationSignalsBlocked {
    pub fn new() -> io::Result<Self> {
        // SAFETY: overwritten by pthread_sigmask before it is read
        let mut previous: libc::sigset_t = unsafe { std::mem::zeroed() };
        set_thread_mask(libc::SIG_BLOCK, &termination_set(), Some(&mut previous))?;
        Ok(Self { previous })
    }

    /// Like [`new`](Self::new), but a failure is only logged.
    pub fn or_warn(what: &str) -> Option<Self> {
        match Self::new() {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("could not block termination signals while {}: {}", what, e);
                None
            }
        }
    }
}

impl Drop for TerminationSignalsBlocked {
    fn drop(&mut self) {
        if let Err(e) = set_thread_mask(libc::SIG_SETMASK, &self.previous, None) {
            warn!("could not restore the signal mask: {}", e);
        }
    }
}
