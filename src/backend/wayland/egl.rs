//! EGL device shared by every window
//!
//! libEGL is loaded at run time, so the binary starts (and the headless
//! backend works) on machines without a GL driver.

use crate::error::{BackendError, WindowError};
use khronos_egl as egl;
use log::{debug, info, warn};
use std::ffi::c_void;
use wayland_client::Connection;
use wayland_egl::WlEglSurface;

const CONFIG_ATTRIBS: [egl::Int; 11] = [
    egl::SURFACE_TYPE,
    egl::WINDOW_BIT,
    egl::RED_SIZE,
    8,
    egl::GREEN_SIZE,
    8,
    egl::BLUE_SIZE,
    8,
    egl::RENDERABLE_TYPE,
    egl::OPENGL_ES2_BIT,
    egl::NONE,
];

const CONTEXT_ATTRIBS: [egl::Int; 3] = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];

/// Initialized EGL display on top of the Wayland connection
pub(crate) struct EglDevice {
    egl: egl::DynamicInstance<egl::EGL1_4>,
    display: egl::Display,
}

// SAFETY: an EGLDisplay is a process-wide handle that EGL 1.4 allows to be
// used from any thread; per-thread state (the current context) is managed
// by EGL itself. Contexts and surfaces never leave their window's thread.
unsafe impl Send for EglDevice {}
unsafe impl Sync for EglDevice {}

impl EglDevice {
    /// Load libEGL, get the display for `conn` and initialize it.
    pub fn initialize(conn: &Connection) -> Result<Self, BackendError> {
        // SAFETY: loads the system libEGL; no other EGL instance is live
        let egl = unsafe { egl::DynamicInstance::<egl::EGL1_4>::load_required() }
            .map_err(|e| BackendError::DeviceInitFailed(format!("failed to load libEGL: {:?}", e)))?;

        let native = conn.backend().display_ptr() as egl::NativeDisplayType;
        // SAFETY: `native` is the live wl_display of `conn`, which outlives
        // the device (both are owned by the backend)
        let display = unsafe { egl.get_display(native) }
            .ok_or_else(|| BackendError::DeviceInitFailed("no EGL display for the connection".to_string()))?;

        let (major, minor) = egl
            .initialize(display)
            .map_err(|e| BackendError::DeviceInitFailed(format!("eglInitialize: {}", e)))?;
        info!("EGL {}.{} initialized", major, minor);
        if let Ok(vendor) = egl.query_string(Some(display), egl::VENDOR) {
            debug!("EGL vendor: {}", vendor.to_string_lossy());
        }

        if let Err(e) = egl.bind_api(egl::OPENGL_ES_API) {
            // Nothing was created yet; undo the initialize
            let _ = egl.terminate(display);
            return Err(BackendError::DeviceInitFailed(format!("eglBindAPI: {}", e)));
        }

        gl::load_with(|name| {
            egl.get_proc_address(name)
                .map_or(std::ptr::null(), |f| f as *const c_void)
        });

        Ok(Self { egl, display })
    }

    /// Pick the first config matching the attribute list, logging every
    /// candidate.
    pub fn choose_config(&self) -> Result<egl::Config, WindowError> {
        let count = self
            .egl
            .matching_config_count(self.display, &CONFIG_ATTRIBS)
            .map_err(|e| WindowError::ContextCreateFailed(format!("eglChooseConfig: {}", e)))?;
        debug!("{} matching EGL config(s)", count);
        if count == 0 {
            return Err(WindowError::ContextCreateFailed(
                "no 8-bit RGB EGL config with a window surface and GLES2".to_string(),
            ));
        }

        let mut configs = Vec::with_capacity(count);
        self.egl
            .choose_config(self.display, &CONFIG_ATTRIBS, &mut configs)
            .map_err(|e| WindowError::ContextCreateFailed(format!("eglChooseConfig: {}", e)))?;

        for (i, config) in configs.iter().enumerate() {
            let buffer = self.egl.get_config_attrib(self.display, *config, egl::BUFFER_SIZE);
            let red = self.egl.get_config_attrib(self.display, *config, egl::RED_SIZE);
            if let (Ok(buffer), Ok(red)) = (buffer, red) {
                debug!("config {}: buffer size {}, red size {}", i, buffer, red);
            }
        }

        configs
            .first()
            .copied()
            .ok_or_else(|| WindowError::ContextCreateFailed("eglChooseConfig returned nothing".to_string()))
    }

    pub fn create_context(&self, config: egl::Config) -> Result<egl::Context, WindowError> {
        self.egl
            .create_context(self.display, config, None, &CONTEXT_ATTRIBS)
            .map_err(|e| WindowError::ContextCreateFailed(format!("eglCreateContext: {}", e)))
    }

    pub fn create_window_surface(
        &self,
        config: egl::Config,
        native: &WlEglSurface,
    ) -> Result<egl::Surface, WindowError> {
        // SAFETY: `native` is a live wl_egl_window; the caller keeps it
        // alive until the returned surface is destroyed
        unsafe {
            self.egl.create_window_surface(
                self.display,
                config,
                native.ptr() as egl::NativeWindowType,
                None,
            )
        }
        .map_err(|e| WindowError::SurfaceCreateFailed(format!("eglCreateWindowSurface: {}", e)))
    }

    pub fn make_current(&self, surface: egl::Surface, context: egl::Context) -> Result<(), WindowError> {
        self.egl
            .make_current(self.display, Some(surface), Some(surface), Some(context))
            .map_err(|e| WindowError::MakeCurrentFailed(format!("eglMakeCurrent: {}", e)))?;
        // Never block a worker on the compositor's frame pacing
        if let Err(e) = self.egl.swap_interval(self.display, 0) {
            debug!("eglSwapInterval(0) not honored: {}", e);
        }
        Ok(())
    }

    /// Clear the current surface to `gray` and swap.
    pub fn present(&self, surface: egl::Surface, gray: f32) -> Result<(), WindowError> {
        // SAFETY: called on the thread that made `surface` current, after
        // the GL entry points were loaded in `initialize`
        unsafe {
            gl::ClearColor(gray, gray, gray, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
        self.egl
            .swap_buffers(self.display, surface)
            .map_err(|e| WindowError::PresentFailed(format!("eglSwapBuffers: {}", e)))
    }

    /// Unbind whatever is current on the calling thread.
    pub fn unbind(&self) {
        if let Err(e) = self.egl.make_current(self.display, None, None, None) {
            warn!("eglMakeCurrent(NONE): {}", e);
        }
    }

    pub fn destroy_surface(&self, surface: egl::Surface) {
        if let Err(e) = self.egl.destroy_surface(self.display, surface) {
            warn!("eglDestroySurface: {}", e);
        }
    }

    pub fn destroy_context(&self, context: egl::Context) {
        if let Err(e) = self.egl.destroy_context(self.display, context) {
            warn!("eglDestroyContext: {}", e);
        }
        if let Err(e) = self.egl.release_thread() {
            warn!("eglReleaseThread: {}", e);
        }
    }

    pub fn terminate(&self) {
        match self.egl.terminate(self.display) {
            Ok(()) => info!("EGL display terminated"),
            Err(e) => warn!("eglTerminate: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Value requested for `key` in a NONE-terminated attribute list
    fn requested(attribs: &[egl::Int], key: egl::Int) -> Option<egl::Int> {
        attribs
            .chunks(2)
            .take_while(|pair| pair[0] != egl::NONE)
            .find(|pair| pair[0] == key)
            .map(|pair| pair[1])
    }

    #[test]
    fn test_config_requests_8bit_rgb_window_gles2() {
        assert_eq!(requested(&CONFIG_ATTRIBS, egl::RED_SIZE), Some(8));
        assert_eq!(requested(&CONFIG_ATTRIBS, egl::GREEN_SIZE), Some(8));
        assert_eq!(requested(&CONFIG_ATTRIBS, egl::BLUE_SIZE), Some(8));
        assert_eq!(requested(&CONFIG_ATTRIBS, egl::SURFACE_TYPE), Some(egl::WINDOW_BIT));
        assert_eq!(
            requested(&CONFIG_ATTRIBS, egl::RENDERABLE_TYPE),
            Some(egl::OPENGL_ES2_BIT)
        );
        assert_eq!(CONFIG_ATTRIBS.last(), Some(&egl::NONE));
    }

    #[test]
    fn test_context_requests_gles2() {
        assert_eq!(requested(&CONTEXT_ATTRIBS, egl::CONTEXT_CLIENT_VERSION), Some(2));
        assert_eq!(CONTEXT_ATTRIBS.last(), Some(&egl::NONE));
    }
}
