//! Graphics backend abstraction
//!
//! A backend owns the process-wide pieces (display connection, bound
//! capabilities, graphics device) and hands out per-window resource sets.
//! The window lifecycle controller only talks to these two traits, so the
//! ordering rules live in one place regardless of which backend is active:
//!
//! - [`wayland`]: wayland-client with per-window event queues, xdg-shell
//!   toplevels and EGL/GLES2 rendering.
//! - [`headless`]: an in-process simulated display server that journals
//!   every acquire and release, used by tests and CI runs.

use crate::error::WindowError;
use crate::window::{WindowGeometry, WindowId};
use std::fmt;
use std::time::Duration;

pub mod headless;
#[cfg(feature = "wayland")]
pub mod wayland;

/// Process-wide backend shared read-only by every worker thread.
///
/// Constructing a backend is the whole initialization sequence (connect,
/// capability discovery, device init); a value of this type is therefore
/// always fully initialized.
pub trait GraphicsBackend: Send + Sync + 'static {
    /// Per-window resource set. Created and dropped on the worker thread,
    /// so it does not need to be `Send`.
    type Window: WindowResources;

    fn name(&self) -> &'static str;

    /// Create the (still empty) resource set for one window.
    fn new_window(&self, id: WindowId, geometry: &WindowGeometry) -> Self::Window;

    /// Shut the graphics device down and disconnect. Only the first call
    /// does anything; it must run after every worker has been joined.
    fn terminate(&self);
}

/// One window's resources, driven stage by stage by
/// [`WindowLifecycle`](crate::window::WindowLifecycle).
pub trait WindowResources {
    /// ROLE_READY: private event channel, surface, top-level role and
    /// opaque region.
    fn create_role(&mut self) -> Result<(), WindowError>;

    /// CONTEXT_READY: choose a graphics config and create a context.
    fn create_context(&mut self) -> Result<(), WindowError>;

    /// First half of SURFACE_READY: native drawing surface plus the
    /// graphics surface wrapping it.
    fn create_graphics_surface(&mut self) -> Result<(), WindowError>;

    /// Bind (context, surface) to the calling thread.
    fn make_current(&mut self) -> Result<(), WindowError>;

    /// Clear to the given gray level and present the frame.
    fn present(&mut self, gray: f32) -> Result<(), WindowError>;

    /// Wait for events on the private channel and dispatch them.
    ///
    /// `None` blocks until at least one event arrives. `Some(timeout)`
    /// returns `Ok(0)` when nothing arrived in time. Returns the number of
    /// events dispatched.
    fn dispatch(&mut self, timeout: Option<Duration>) -> Result<usize, WindowError>;

    /// Destroy one resource. Returns `false` when it did not exist (never
    /// acquired, or already released).
    fn release(&mut self, resource: Resource) -> bool;
}

/// The individually released pieces of a window resource set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    GraphicsSurface,
    Context,
    Role,
    Surface,
    Region,
    Channel,
}

/// Mandated teardown order.
///
/// Graphics objects go first: the driver can keep touching the
/// display-server surface for a moment after its graphics surface is
/// destroyed, so the surface (and the channel its events arrive on) must
/// outlive it.
pub const RELEASE_ORDER: [Resource; 6] = [
    Resource::GraphicsSurface,
    Resource::Context,
    Resource::Role,
    Resource::Surface,
    Resource::Region,
    Resource::Channel,
];

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::GraphicsSurface => "graphics surface",
            Resource::Context => "context",
            Resource::Role => "role",
            Resource::Surface => "surface",
            Resource::Region => "region",
            Resource::Channel => "channel",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
