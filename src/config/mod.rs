//! Configuration management for wlswarm
//!
//! This module handles loading, parsing, and validating the harness
//! configuration from TOML files. Every section has defaults, so an empty
//! file (or no file at all) describes a single 320x200 window on the
//! Wayland backend. Command-line flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound on concurrently opened windows
pub const MAX_WINDOWS: usize = 256;

/// Largest accepted window edge, in pixels
pub const MAX_WINDOW_EDGE: u32 = 16_384;

/// Main configuration struct containing all harness settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HarnessConfig {
    /// Window count and verbosity
    #[serde(default)]
    pub general: GeneralConfig,

    /// Size and title of every window
    #[serde(default)]
    pub window: WindowConfig,

    /// Event dispatch behavior of the worker loops
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Brightness animation
    #[serde(default)]
    pub render: RenderConfig,

    /// Which backend to drive
    #[serde(default)]
    pub backend: BackendConfig,

    /// Simulated display server settings (headless backend only)
    #[serde(default)]
    pub headless: HeadlessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of windows (one worker thread each). Clamped to
    /// `1..=MAX_WINDOWS` at run time.
    pub threads: usize,

    /// Log verbosity: 0 error, 1 warn, 2 info, 3 debug, 4+ trace
    pub verbose: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Surface width (pixels)
    pub width: u32,

    /// Surface height (pixels)
    pub height: u32,

    /// Title prefix; each window appends its index
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a worker waits for events before re-checking the shutdown
    /// flag. 0 blocks until an event arrives: a window that never gets an
    /// event then never notices shutdown.
    pub timeout_ms: u64,

    /// Pause after a failed dispatch (cut short by shutdown)
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Brightness change per frame, in (0, 1]
    pub step: f32,

    /// Starting brightness, in [0, 1]
    pub initial_brightness: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// wayland-client + EGL on the compositor named by WAYLAND_DISPLAY
    Wayland,
    /// In-process simulated display server
    Headless,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Interval of the synthetic event pump (milliseconds, 0 disables it)
    pub event_interval_ms: u64,

    /// Window indices that never receive synthetic events
    pub silent_windows: Vec<usize>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            verbose: crate::logging::DEFAULT_VERBOSITY,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 200,
            title: "wlswarm".to_string(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            error_backoff_ms: 50,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            step: crate::render::DEFAULT_STEP,
            initial_brightness: 0.0,
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Wayland
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            event_interval_ms: 16,
            silent_windows: Vec::new(),
        }
    }
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Wayland => "wayland",
            BackendKind::Headless => "headless",
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let rest = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: HarnessConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// The window count is not validated here: out-of-range values are
    /// clamped by [`effective_threads`](Self::effective_threads).
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.width > MAX_WINDOW_EDGE {
            anyhow::bail!("Invalid window width {}: must be between 1 and {}", self.window.width, MAX_WINDOW_EDGE);
        }
        if self.window.height == 0 || self.window.height > MAX_WINDOW_EDGE {
            anyhow::bail!("Invalid window height {}: must be between 1 and {}", self.window.height, MAX_WINDOW_EDGE);
        }
        if self.window.title.trim().is_empty() {
            anyhow::bail!("Invalid window title: must not be empty");
        }

        let step = self.render.step;
        if !step.is_finite() || step <= 0.0 || step > 1.0 {
            anyhow::bail!("Invalid render step {}: must be in (0.0, 1.0]", step);
        }
        let initial = self.render.initial_brightness;
        if !(0.0..=1.0).contains(&initial) {
            anyhow::bail!("Invalid initial brightness {}: must be between 0.0 and 1.0", initial);
        }

        if let Some(index) = self.headless.silent_windows.iter().find(|i| **i >= MAX_WINDOWS) {
            anyhow::bail!("Invalid silent window index {}: must be below {}", index, MAX_WINDOWS);
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Window count actually used: `general.threads` clamped to
    /// `1..=MAX_WINDOWS`
    pub fn effective_threads(&self) -> usize {
        self.general.threads.clamp(1, MAX_WINDOWS)
    }

    /// Dispatch wait bound; `None` means block indefinitely
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        match self.dispatch.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch.error_backoff_ms)
    }

    /// Synthetic event interval for the headless pump, if enabled
    pub fn headless_event_interval(&self) -> Option<Duration> {
        match self.headless.event_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
