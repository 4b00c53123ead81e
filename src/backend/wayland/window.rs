//! Per-window Wayland and EGL resources
//!
//! Every window has a private event queue. Its surface, shell objects and
//! region are created on that queue, so the only thread that ever handles
//! their events is the window's own worker.

use super::Shared;
use crate::backend::{Resource, WindowResources};
use crate::error::WindowError;
use crate::window::{WindowGeometry, WindowId};
use khronos_egl as egl;
use log::{debug, info, trace};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::time::Duration;
use wayland_client::backend::WaylandError;
use wayland_client::protocol::wl_region::WlRegion;
use wayland_client::protocol::wl_surface::{self, WlSurface};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_egl::WlEglSurface;
use wayland_protocols::xdg::shell::client::xdg_surface::{self, XdgSurface};
use wayland_protocols::xdg::shell::client::xdg_toplevel::{self, XdgToplevel};
use wayland_protocols::xdg::shell::client::xdg_wm_base::{self, XdgWmBase};

/// Roundtrips allowed for the initial configure
const CONFIGURE_ROUNDTRIPS: usize = 3;

/// Dispatch state of one window's private queue
#[derive(Debug)]
pub struct WindowEvents {
    id: WindowId,
    configured: bool,
    pending_size: Option<(i32, i32)>,
}

impl Dispatch<XdgWmBase, ()> for WindowEvents {
    fn event(
        state: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            trace!("{}: ping {}", state.id, serial);
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, ()> for WindowEvents {
    fn event(
        state: &mut Self,
        xdg_surface: &XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            xdg_surface.ack_configure(serial);
            if !state.configured {
                debug!("{}: initial configure acknowledged", state.id);
            }
            state.configured = true;
        }
    }
}

impl Dispatch<XdgToplevel, ()> for WindowEvents {
    fn event(
        state: &mut Self,
        _: &XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                // 0x0 leaves the size to the client
                if width > 0 && height > 0 {
                    state.pending_size = Some((width, height));
                }
            }
            xdg_toplevel::Event::Close => {
                info!("{}: compositor requested close, ignoring", state.id)
            }
            _ => {}
        }
    }
}

impl Dispatch<WlSurface, ()> for WindowEvents {
    fn event(
        state: &mut Self,
        _: &WlSurface,
        event: wl_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_surface::Event::Enter { output } => {
                trace!("{}: entered output {}", state.id, output.id())
            }
            wl_surface::Event::Leave { output } => {
                trace!("{}: left output {}", state.id, output.id())
            }
            _ => {}
        }
    }
}

delegate_noop!(WindowEvents: ignore WlRegion);

struct Channel {
    queue: EventQueue<WindowEvents>,
    state: WindowEvents,
}

struct Role {
    wm_base: XdgWmBase,
    xdg_surface: XdgSurface,
    toplevel: XdgToplevel,
}

struct GraphicsSurface {
    egl_surface: egl::Surface,
    // Must outlive egl_surface
    native: WlEglSurface,
}

/// One window's Wayland objects and EGL context/surface
pub struct WaylandWindow {
    id: WindowId,
    title: String,
    size: (i32, i32),
    shared: Arc<Shared>,
    channel: Option<Channel>,
    surface: Option<WlSurface>,
    role: Option<Role>,
    region: Option<WlRegion>,
    config: Option<egl::Config>,
    context: Option<egl::Context>,
    graphics: Option<GraphicsSurface>,
    // Native window of a destroyed EGL surface, dropped once the context is unbound
    retired_native: Option<WlEglSurface>,
}

impl WaylandWindow {
    pub(crate) fn new(id: WindowId, geometry: &WindowGeometry, shared: Arc<Shared>) -> Self {
        Self {
            id,
            title: geometry.title_for(id),
            size: (clamp_edge(geometry.width), clamp_edge(geometry.height)),
            shared,
            channel: None,
            surface: None,
            role: None,
            region: None,
            config: None,
            context: None,
            graphics: None,
            retired_native: None,
        }
    }

    /// Apply a size the compositor asked for to the native surface.
    fn apply_pending_size(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let Some(size) = channel.state.pending_size.take() else {
            return;
        };
        if size == self.size {
            return;
        }
        debug!("{}: resized to {}x{}", self.id, size.0, size.1);
        self.size = size;
        if let Some(graphics) = &self.graphics {
            graphics.native.resize(size.0, size.1, 0, 0);
        }
    }

    fn dispatch_bounded(channel: &mut Channel, timeout: Duration) -> Result<usize, WindowError> {
        let Channel { queue, state } = channel;

        let pending = queue.dispatch_pending(state).map_err(dispatch_failed)?;
        if pending > 0 {
            return Ok(pending);
        }

        match queue.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(dispatch_failed(e)),
        }

        // Another thread may have queued our events in the meantime
        let Some(guard) = queue.prepare_read() else {
            return queue.dispatch_pending(state).map_err(dispatch_failed);
        };

        if wait_readable(guard.connection_fd(), timeout).map_err(dispatch_failed)? {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(dispatch_failed(e)),
            }
        } else {
            drop(guard);
        }

        queue.dispatch_pending(state).map_err(dispatch_failed)
    }
}

impl WindowResources for WaylandWindow {
    fn create_role(&mut self) -> Result<(), WindowError> {
        let shared = Arc::clone(&self.shared);
        let queue = shared.conn.new_event_queue::<WindowEvents>();
        let qh = queue.handle();
        self.channel = Some(Channel {
            queue,
            state: WindowEvents {
                id: self.id,
                configured: false,
                pending_size: None,
            },
        });

        let surface = shared.compositor.create_surface(&qh, ());
        self.surface = Some(surface.clone());

        // Bound per window so pings arrive on this window's queue
        let wm_base: XdgWmBase = shared
            .globals
            .bind(&qh, 1..=shared.shell_version, ())
            .map_err(|e| WindowError::SurfaceCreateFailed(format!("xdg_wm_base: {}", e)))?;
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        toplevel.set_title(self.title.clone());
        toplevel.set_app_id("wlswarm".to_string());
        self.role = Some(Role {
            wm_base,
            xdg_surface,
            toplevel,
        });

        let region = shared.compositor.create_region(&qh, ());
        region.add(0, 0, self.size.0, self.size.1);
        surface.set_opaque_region(Some(&region));
        self.region = Some(region);
        surface.commit();

        let Some(channel) = self.channel.as_mut() else {
            return Err(WindowError::SurfaceCreateFailed("event queue missing".to_string()));
        };
        for _ in 0..CONFIGURE_ROUNDTRIPS {
            if channel.state.configured {
                break;
            }
            channel
                .queue
                .roundtrip(&mut channel.state)
                .map_err(|e| WindowError::SurfaceCreateFailed(format!("roundtrip: {}", e)))?;
        }
        if !channel.state.configured {
            return Err(WindowError::SurfaceCreateFailed(
                "compositor never sent the initial configure".to_string(),
            ));
        }
        self.apply_pending_size();
        debug!("{}: toplevel \"{}\" configured", self.id, self.title);
        Ok(())
    }

    fn create_context(&mut self) -> Result<(), WindowError> {
        let config = self.shared.device.choose_config()?;
        self.config = Some(config);
        self.context = Some(self.shared.device.create_context(config)?);
        Ok(())
    }

    fn create_graphics_surface(&mut self) -> Result<(), WindowError> {
        let (Some(surface), Some(config)) = (self.surface.as_ref(), self.config) else {
            return Err(WindowError::SurfaceCreateFailed(
                "surface or config missing".to_string(),
            ));
        };

        let native = WlEglSurface::new(surface.id(), self.size.0, self.size.1)
            .map_err(|e| WindowError::SurfaceCreateFailed(format!("wl_egl_window: {:?}", e)))?;
        let egl_surface = self.shared.device.create_window_surface(config, &native)?;
        self.graphics = Some(GraphicsSurface {
            egl_surface,
            native,
        });
        Ok(())
    }

    fn make_current(&mut self) -> Result<(), WindowError> {
        match (&self.graphics, self.context) {
            (Some(graphics), Some(context)) => {
                self.shared.device.make_current(graphics.egl_surface, context)
            }
            _ => Err(WindowError::MakeCurrentFailed(
                "context or graphics surface missing".to_string(),
            )),
        }
    }

    fn present(&mut self, gray: f32) -> Result<(), WindowError> {
        let Some(graphics) = &self.graphics else {
            return Err(WindowError::PresentFailed("no graphics surface".to_string()));
        };
        self.shared.device.present(graphics.egl_surface, gray)
    }

    fn dispatch(&mut self, timeout: Option<Duration>) -> Result<usize, WindowError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(WindowError::DispatchFailed("no event queue".to_string()));
        };

        let dispatched = match timeout {
            None => channel
                .queue
                .blocking_dispatch(&mut channel.state)
                .map_err(dispatch_failed)?,
            Some(timeout) => Self::dispatch_bounded(channel, timeout)?,
        };
        self.apply_pending_size();
        Ok(dispatched)
    }

    fn release(&mut self, resource: Resource) -> bool {
        let released = match resource {
            Resource::GraphicsSurface => match self.graphics.take() {
                Some(graphics) => {
                    // Deferred by EGL while still current; freed at unbind
                    self.shared.device.destroy_surface(graphics.egl_surface);
                    self.retired_native = Some(graphics.native);
                    true
                }
                None => false,
            },
            Resource::Context => match self.context.take() {
                Some(context) => {
                    self.shared.device.unbind();
                    drop(self.retired_native.take());
                    self.shared.device.destroy_context(context);
                    self.config = None;
                    true
                }
                None => false,
            },
            Resource::Role => match self.role.take() {
                Some(role) => {
                    role.toplevel.destroy();
                    role.xdg_surface.destroy();
                    role.wm_base.destroy();
                    true
                }
                None => false,
            },
            Resource::Surface => match self.surface.take() {
                Some(surface) => {
                    drop(self.retired_native.take());
                    surface.destroy();
                    true
                }
                None => false,
            },
            Resource::Region => match self.region.take() {
                Some(region) => {
                    region.destroy();
                    true
                }
                None => false,
            },
            Resource::Channel => self.channel.take().is_some(),
        };

        if released {
            self.shared.flush();
        }
        released
    }
}

fn clamp_edge(edge: u32) -> i32 {
    i32::try_from(edge).unwrap_or(i32::MAX)
}

fn dispatch_failed(e: impl std::fmt::Display) -> WindowError {
    WindowError::DispatchFailed(e.to_string())
}

/// Wait until `fd` is readable or `timeout` passes. An interrupted wait
/// counts as a timeout.
fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: pfd is a single valid pollfd for the duration of the call
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}
