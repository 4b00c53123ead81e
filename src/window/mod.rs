//! Per-window types and the lifecycle controller
//!
//! Every window moves through a fixed sequence of states:
//!
//! ```text
//! Uninit -> RoleReady -> ContextReady -> SurfaceReady -> Running -> Releasing -> Terminated
//! ```
//!
//! The acquire half never skips a state. A failed acquire stage jumps
//! straight to `Releasing`, so `Running` is only reached by windows whose
//! whole resource set exists.

use crate::config::WindowConfig;
use std::fmt;

pub mod lifecycle;

pub use lifecycle::WindowLifecycle;

/// Index of a window within one harness run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(pub usize);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Size and title every window is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl WindowGeometry {
    pub fn new(width: u32, height: u32, title: impl Into<String>) -> Self {
        Self {
            width,
            height,
            title: title.into(),
        }
    }

    /// Title shown by the compositor for a given window
    pub fn title_for(&self, id: WindowId) -> String {
        format!("{} #{}", self.title, id.0)
    }
}

impl From<&WindowConfig> for WindowGeometry {
    fn from(config: &WindowConfig) -> Self {
        Self::new(config.width, config.height, config.title.clone())
    }
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self::from(&WindowConfig::default())
    }
}

/// Lifecycle state of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WindowState {
    Uninit,
    /// Private channel, surface, top-level role and opaque region exist
    RoleReady,
    /// Graphics config selected and context created
    ContextReady,
    /// Graphics surface created, made current, first frame rendered
    SurfaceReady,
    Running,
    Releasing,
    Terminated,
}

impl WindowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowState::Uninit => "UNINIT",
            WindowState::RoleReady => "ROLE_READY",
            WindowState::ContextReady => "CONTEXT_READY",
            WindowState::SurfaceReady => "SURFACE_READY",
            WindowState::Running => "RUNNING",
            WindowState::Releasing => "RELEASING",
            WindowState::Terminated => "TERMINATED",
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: WindowState) -> bool {
        use WindowState::*;
        matches!(
            (self, next),
            (Uninit, RoleReady)
                | (RoleReady, ContextReady)
                | (ContextReady, SurfaceReady)
                | (SurfaceReady, Running)
                | (Uninit | RoleReady | ContextReady | SurfaceReady | Running, Releasing)
                | (Releasing, Terminated)
        )
    }
}

impl fmt::Display for WindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_id_display() {
        assert_eq!(WindowId(7).to_string(), "window-7");
    }

    #[test]
    fn test_acquire_transitions_are_strictly_ordered() {
        assert!(WindowState::Uninit.can_transition_to(WindowState::RoleReady));
        assert!(WindowState::RoleReady.can_transition_to(WindowState::ContextReady));
        assert!(WindowState::ContextReady.can_transition_to(WindowState::SurfaceReady));
        assert!(WindowState::SurfaceReady.can_transition_to(WindowState::Running));

        // No skipping
        assert!(!WindowState::Uninit.can_transition_to(WindowState::ContextReady));
        assert!(!WindowState::RoleReady.can_transition_to(WindowState::SurfaceReady));
        assert!(!WindowState::ContextReady.can_transition_to(WindowState::Running));
    }

    #[test]
    fn test_release_reachable_from_any_live_state() {
        for state in [
            WindowState::Uninit,
            WindowState::RoleReady,
            WindowState::ContextReady,
            WindowState::SurfaceReady,
            WindowState::Running,
        ] {
            assert!(state.can_transition_to(WindowState::Releasing), "{state}");
        }
        assert!(WindowState::Releasing.can_transition_to(WindowState::Terminated));
        assert!(!WindowState::Terminated.can_transition_to(WindowState::Releasing));
        assert!(!WindowState::Terminated.can_transition_to(WindowState::Uninit));
    }

    #[test]
    fn test_geometry_title_includes_index() {
        let geometry = WindowGeometry::new(320, 200, "swarm");
        assert_eq!(geometry.title_for(WindowId(3)), "swarm #3");
    }
}
