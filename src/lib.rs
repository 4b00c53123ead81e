//! # wlswarm
//!
//! A multi-window stress harness for Wayland compositors and EGL drivers.
//!
//! One process opens N top-level windows, each driven by its own thread
//! with its own event queue and GLES2 context. Every window animates a
//! gray level until SIGTERM or SIGINT arrives, after which all windows are
//! torn down in a fixed order and the process exits cleanly.
//!
//! ## Architecture
//!
//! - `config`: TOML configuration with defaults and validation
//! - `backend`: the graphics backend traits, with a Wayland/EGL
//!   implementation and an in-process headless one
//! - `window`: window identity, lifecycle states and the lifecycle
//!   controller that owns acquire/release ordering
//! - `render`: brightness animation and the per-frame render step
//! - `shutdown`: the shared stop flag, signal listener and worker signal
//!   masking
//! - `worker`: the per-window thread body
//! - `harness`: spawning, stop coordination, join and backend teardown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wlswarm::backend::headless::HeadlessDisplay;
//! use wlswarm::{harness, HarnessConfig, StopListener};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = HarnessConfig::default();
//!     config.general.threads = 8;
//!
//!     let display = HeadlessDisplay::new();
//!     let (mut listener, _handle) = StopListener::with_signals()?;
//!     let summary = harness::launch(&config, || display.connect(), &mut listener)?;
//!     println!("{} windows, {} frames", summary.windows(), summary.frames_presented());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod harness;
pub mod logging;
pub mod render;
pub mod shutdown;
pub mod window;
pub mod worker;

pub use config::HarnessConfig;
pub use error::{BackendError, WindowError};
pub use harness::{launch, Harness, HarnessError, RunSummary};
pub use shutdown::{ShutdownFlag, StopHandle, StopListener, StopReason};
pub use window::{WindowId, WindowState};

/// Version information for wlswarm
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
