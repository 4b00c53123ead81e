//! Error types for the harness
//!
//! Failures are split by blast radius. [`BackendError`] covers the
//! process-wide connection and graphics device: any of these aborts startup
//! before a single worker thread exists. [`WindowError`] covers one window's
//! resources: it ends that window (or, for present/dispatch failures, is
//! only counted) and never touches the other windows.

use thiserror::Error;

/// Failures of the process-wide backend (connection, capabilities, device)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The display server could not be reached
    #[error("failed to connect to the display server: {0}")]
    ConnectFailed(String),

    /// A required global (compositor or shell) is not advertised
    #[error("display server does not provide the {0} capability")]
    CapabilityMissing(String),

    /// The graphics device could not be obtained or initialized
    #[error("graphics device initialization failed: {0}")]
    DeviceInitFailed(String),
}

/// Failures scoped to a single window
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// A display-server or native drawing surface could not be created
    #[error("surface creation failed: {0}")]
    SurfaceCreateFailed(String),

    /// No usable graphics config, or the context could not be created
    #[error("graphics context creation failed: {0}")]
    ContextCreateFailed(String),

    /// The (context, surface) pair could not be bound to the thread
    #[error("making the context current failed: {0}")]
    MakeCurrentFailed(String),

    /// Submitting a frame failed
    #[error("frame presentation failed: {0}")]
    PresentFailed(String),

    /// Waiting for or dispatching the private event channel failed
    #[error("event dispatch failed: {0}")]
    DispatchFailed(String),
}

impl WindowError {
    /// Short taxonomy name, used in logs and run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            WindowError::SurfaceCreateFailed(_) => "SurfaceCreateFailed",
            WindowError::ContextCreateFailed(_) => "ContextCreateFailed",
            WindowError::MakeCurrentFailed(_) => "MakeCurrentFailed",
            WindowError::PresentFailed(_) => "PresentFailed",
            WindowError::DispatchFailed(_) => "DispatchFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_messages_name_the_cause() {
        let err = BackendError::CapabilityMissing("xdg_wm_base".to_string());
        assert_eq!(
            err.to_string(),
            "display server does not provide the xdg_wm_base capability"
        );

        let err = BackendError::ConnectFailed("no WAYLAND_DISPLAY".to_string());
        assert!(err.to_string().contains("no WAYLAND_DISPLAY"));
    }

    #[test]
    fn test_window_error_kind() {
        assert_eq!(
            WindowError::PresentFailed("swap".into()).kind(),
            "PresentFailed"
        );
        assert_eq!(
            WindowError::MakeCurrentFailed("bad match".into()).kind(),
            "MakeCurrentFailed"
        );
    }
}
