//! Window lifecycle controller
//!
//! Owns one window's resource set and render state, and is the only place
//! that decides in which order resources are created and destroyed.

use super::{WindowId, WindowState};
use crate::backend::{Resource, WindowResources, RELEASE_ORDER};
use crate::error::WindowError;
use crate::render::{self, Brightness};
use log::{debug, error, info, warn};
use std::time::Duration;

/// Drives one [`WindowResources`] through acquire, run and release.
pub struct WindowLifecycle<W: WindowResources> {
    id: WindowId,
    resources: W,
    state: WindowState,
    history: Vec<WindowState>,
    brightness: Brightness,
    frames_presented: u64,
    present_failures: u64,
    released: Vec<Resource>,
}

impl<W: WindowResources> WindowLifecycle<W> {
    pub fn new(id: WindowId, resources: W, brightness: Brightness) -> Self {
        Self {
            id,
            resources,
            state: WindowState::Uninit,
            history: vec![WindowState::Uninit],
            brightness,
            frames_presented: 0,
            present_failures: 0,
            released: Vec::new(),
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Every state this window has been in, oldest first
    pub fn history(&self) -> &[WindowState] {
        &self.history
    }

    pub fn brightness(&self) -> Brightness {
        self.brightness
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn present_failures(&self) -> u64 {
        self.present_failures
    }

    /// Resources actually destroyed by [`release`](Self::release), in order
    pub fn released(&self) -> &[Resource] {
        &self.released
    }

    pub fn resources(&self) -> &W {
        &self.resources
    }

    /// Run the acquire stages in order, stopping at the first failure.
    ///
    /// On error the state stays at the last stage reached; the caller is
    /// expected to go straight to [`release`](Self::release).
    pub fn acquire(&mut self) -> Result<(), WindowError> {
        if self.state != WindowState::Uninit {
            warn!("{}: acquire called in state {}, ignoring", self.id, self.state);
            return Ok(());
        }

        self.resources.create_role()?;
        self.transition(WindowState::RoleReady);

        self.resources.create_context()?;
        self.transition(WindowState::ContextReady);

        self.resources.create_graphics_surface()?;
        self.resources.make_current()?;
        // First frame; a failed present here is counted like any other
        let _ = self.render();
        self.transition(WindowState::SurfaceReady);

        Ok(())
    }

    /// Enter the running state after a successful acquire.
    pub fn start(&mut self) {
        if self.state == WindowState::SurfaceReady {
            self.transition(WindowState::Running);
        } else {
            warn!("{}: cannot start from state {}", self.id, self.state);
        }
    }

    /// Render step: advance brightness and present one frame.
    pub fn render(&mut self) -> Result<f32, WindowError> {
        match render::render_frame(&mut self.resources, &mut self.brightness) {
            Ok(gray) => {
                self.frames_presented += 1;
                Ok(gray)
            }
            Err(e) => {
                self.present_failures += 1;
                warn!("{}: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Wait for and dispatch events on this window's private channel.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<usize, WindowError> {
        self.resources.dispatch(timeout)
    }

    /// Tear the resource set down in the mandated order.
    ///
    /// Best effort over whatever was acquired. Runs at most once; later
    /// calls return without touching the resources.
    pub fn release(&mut self) -> &[Resource] {
        if matches!(self.state, WindowState::Releasing | WindowState::Terminated) {
            debug!("{}: already released", self.id);
            return &self.released;
        }

        self.transition(WindowState::Releasing);
        for resource in RELEASE_ORDER {
            if self.resources.release(resource) {
                debug!("{}: destroyed {}", self.id, resource);
                self.released.push(resource);
            }
        }
        self.transition(WindowState::Terminated);

        &self.released
    }

    fn transition(&mut self, next: WindowState) {
        if !self.state.can_transition_to(next) {
            // Unreachable through the public API; keep going so teardown
            // still happens
            error!(
                "{}: illegal transition {} -> {}",
                self.id, self.state, next
            );
        }
        match next {
            WindowState::Running | WindowState::Terminated => {
                info!("{}: {} -> {}", self.id, self.state, next)
            }
            _ => debug!("{}: {} -> {}", self.id, self.state, next),
        }
        self.state = next;
        self.history.push(next);
    }
}

impl<W: WindowResources> Drop for WindowLifecycle<W> {
    fn drop(&mut self) {
        if self.state != WindowState::Terminated {
            // Worker unwound before its release path ran
            warn!("{}: dropped in state {}, releasing now", self.id, self.state);
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Minimal in-memory resource set recording every call
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        held: Vec<Resource>,
        fail: Option<&'static str>,
        present_fails: bool,
        destroyed: Rc<RefCell<Vec<Resource>>>,
    }

    impl Recorder {
        fn failing_at(stage: &'static str) -> Self {
            Self {
                fail: Some(stage),
                ..Default::default()
            }
        }

        fn step(&mut self, name: &'static str, creates: &[Resource]) -> Result<(), WindowError> {
            self.calls.push(name.to_string());
            if self.fail == Some(name) {
                return Err(WindowError::SurfaceCreateFailed(name.to_string()));
            }
            self.held.extend_from_slice(creates);
            Ok(())
        }
    }

    impl WindowResources for Recorder {
        fn create_role(&mut self) -> Result<(), WindowError> {
            self.step(
                "role",
                &[Resource::Channel, Resource::Surface, Resource::Role, Resource::Region],
            )
        }

        fn create_context(&mut self) -> Result<(), WindowError> {
            self.step("context", &[Resource::Context])
        }

        fn create_graphics_surface(&mut self) -> Result<(), WindowError> {
            self.step("graphics_surface", &[Resource::GraphicsSurface])
        }

        fn make_current(&mut self) -> Result<(), WindowError> {
            self.step("make_current", &[])
        }

        fn present(&mut self, gray: f32) -> Result<(), WindowError> {
            self.calls.push(format!("present {gray:.3}"));
            if self.present_fails {
                Err(WindowError::PresentFailed("swap".into()))
            } else {
                Ok(())
            }
        }

        fn dispatch(&mut self, _timeout: Option<Duration>) -> Result<usize, WindowError> {
            Ok(1)
        }

        fn release(&mut self, resource: Resource) -> bool {
            match self.held.iter().position(|r| *r == resource) {
                Some(index) => {
                    self.held.remove(index);
                    self.destroyed.borrow_mut().push(resource);
                    true
                }
                None => false,
            }
        }
    }

    fn lifecycle(recorder: Recorder) -> WindowLifecycle<Recorder> {
        WindowLifecycle::new(WindowId(0), recorder, Brightness::new(0.0, 0.5))
    }

    #[test]
    fn test_acquire_runs_stages_in_order() {
        let mut window = lifecycle(Recorder::default());
        window.acquire().unwrap();
        window.start();

        assert_eq!(
            window.resources().calls,
            vec!["role", "context", "graphics_surface", "make_current", "present 0.500"]
        );
        assert_eq!(
            window.history(),
            &[
                WindowState::Uninit,
                WindowState::RoleReady,
                WindowState::ContextReady,
                WindowState::SurfaceReady,
                WindowState::Running,
            ]
        );
        assert_eq!(window.frames_presented(), 1);
    }

    #[test]
    fn test_release_follows_mandated_order() {
        let mut window = lifecycle(Recorder::default());
        window.acquire().unwrap();
        window.start();

        let released = window.release().to_vec();
        assert_eq!(released, RELEASE_ORDER.to_vec());
        assert_eq!(window.state(), WindowState::Terminated);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut window = lifecycle(Recorder::default());
        window.acquire().unwrap();
        window.release();
        let history_len = window.history().len();

        let second = window.release().to_vec();
        assert_eq!(second, RELEASE_ORDER.to_vec());
        assert_eq!(window.history().len(), history_len);
    }

    #[test]
    fn test_failed_context_releases_only_acquired_resources() {
        let mut window = lifecycle(Recorder::failing_at("context"));
        let err = window.acquire().unwrap_err();
        assert!(matches!(err, WindowError::SurfaceCreateFailed(_)));
        assert_eq!(window.state(), WindowState::RoleReady);

        let released = window.release().to_vec();
        assert_eq!(
            released,
            vec![Resource::Role, Resource::Surface, Resource::Region, Resource::Channel]
        );
        assert_eq!(
            window.history(),
            &[
                WindowState::Uninit,
                WindowState::RoleReady,
                WindowState::Releasing,
                WindowState::Terminated,
            ]
        );
    }

    #[test]
    fn test_start_after_failed_acquire_is_refused() {
        let mut window = lifecycle(Recorder::failing_at("make_current"));
        assert!(window.acquire().is_err());
        window.start();
        assert_eq!(window.state(), WindowState::ContextReady);
        assert!(!window.history().contains(&WindowState::Running));
    }

    #[test]
    fn test_present_failure_is_counted_not_fatal() {
        let mut recorder = Recorder::default();
        recorder.present_fails = true;
        let mut window = lifecycle(recorder);

        window.acquire().unwrap();
        assert_eq!(window.state(), WindowState::SurfaceReady);
        assert!(window.render().is_err());
        assert_eq!(window.present_failures(), 2);
        assert_eq!(window.frames_presented(), 0);
    }

    #[test]
    fn test_drop_releases_unreleased_window() {
        let recorder = Recorder::default();
        let destroyed = Rc::clone(&recorder.destroyed);
        let mut window = lifecycle(recorder);
        window.acquire().unwrap();
        window.start();
        drop(window);

        assert_eq!(*destroyed.borrow(), RELEASE_ORDER.to_vec());
    }
}
