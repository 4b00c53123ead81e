//! Wayland + EGL backend
//!
//! Startup, in order: connect to the compositor named by `WAYLAND_DISPLAY`,
//! enumerate the registry and bind `wl_compositor`, check that `xdg_wm_base`
//! is advertised, then initialize EGL on the same connection. Each window
//! then gets its own event queue (see [`window`]).

use super::GraphicsBackend;
use crate::error::BackendError;
use crate::window::{WindowGeometry, WindowId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wayland_client::globals::{registry_queue_init, GlobalList, GlobalListContents};
use wayland_client::protocol::wl_compositor::WlCompositor;
use wayland_client::protocol::wl_registry::{self, WlRegistry};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle};

mod egl;
pub mod window;

use egl::EglDevice;
pub use window::WaylandWindow;

const COMPOSITOR_VERSIONS: std::ops::RangeInclusive<u32> = 1..=4;
const SHELL_VERSIONS: std::ops::RangeInclusive<u32> = 1..=2;

/// State of the coordinator's registry queue
#[derive(Debug, Default)]
struct RegistryState;

impl Dispatch<WlRegistry, GlobalListContents> for RegistryState {
    fn event(
        _state: &mut Self,
        _registry: &WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => debug!("global added: {} v{} (name {})", interface, version, name),
            wl_registry::Event::GlobalRemove { name } => info!("global removed: name {}", name),
            _ => {}
        }
    }
}

delegate_noop!(RegistryState: ignore WlCompositor);

/// Process-wide objects shared read-only by every window
pub(crate) struct Shared {
    conn: Connection,
    globals: GlobalList,
    compositor: WlCompositor,
    shell_version: u32,
    device: EglDevice,
    registry_queue: Mutex<EventQueue<RegistryState>>,
    terminated: AtomicBool,
}

impl Shared {
    /// Push buffered requests to the compositor.
    fn flush(&self) {
        if let Err(e) = self.conn.flush() {
            warn!("flushing the wayland connection failed: {}", e);
        }
    }
}

/// Fully initialized Wayland backend
pub struct WaylandBackend {
    shared: Arc<Shared>,
}

impl WaylandBackend {
    /// Connect, discover and initialize the graphics device.
    pub fn connect() -> Result<Self, BackendError> {
        let conn = Connection::connect_to_env()
            .map_err(|e| BackendError::ConnectFailed(e.to_string()))?;
        info!("connected to wayland display");

        let (globals, mut registry_queue) = registry_queue_init::<RegistryState>(&conn)
            .map_err(|e| BackendError::ConnectFailed(format!("registry enumeration failed: {}", e)))?;
        let qh = registry_queue.handle();

        let mut shell_version = None;
        globals.contents().with_list(|list| {
            for global in list {
                debug!(
                    "global: {} v{} (name {})",
                    global.interface, global.version, global.name
                );
                if global.interface == "xdg_wm_base" {
                    shell_version = Some(global.version);
                }
            }
        });

        let compositor: WlCompositor = globals
            .bind(&qh, COMPOSITOR_VERSIONS, ())
            .map_err(|e| BackendError::CapabilityMissing(format!("wl_compositor ({})", e)))?;
        let shell_version = shell_version
            .map(|v| v.min(*SHELL_VERSIONS.end()))
            .ok_or_else(|| BackendError::CapabilityMissing("xdg_wm_base".to_string()))?;
        info!("bound wl_compositor v{}, xdg_wm_base v{} available", compositor.version(), shell_version);

        // Connection and queue are dropped (disconnecting) on error
        let device = EglDevice::initialize(&conn)?;

        // Settle anything the binds produced before the workers start
        if let Err(e) = registry_queue.roundtrip(&mut RegistryState) {
            warn!("registry roundtrip failed: {}", e);
        }

        Ok(Self {
            shared: Arc::new(Shared {
                conn,
                globals,
                compositor,
                shell_version,
                device,
                registry_queue: Mutex::new(registry_queue),
                terminated: AtomicBool::new(false),
            }),
        })
    }
}

impl GraphicsBackend for WaylandBackend {
    type Window = WaylandWindow;

    fn name(&self) -> &'static str {
        "wayland"
    }

    fn new_window(&self, id: WindowId, geometry: &WindowGeometry) -> WaylandWindow {
        WaylandWindow::new(id, geometry, Arc::clone(&self.shared))
    }

    fn terminate(&self) {
        let shared = &self.shared;
        if shared.terminated.swap(true, Ordering::SeqCst) {
            debug!("wayland backend already terminated");
            return;
        }

        // Report registry changes that arrived during the run
        if let Err(e) = shared.registry_queue.lock().dispatch_pending(&mut RegistryState) {
            debug!("registry dispatch at shutdown failed: {}", e);
        }

        shared.device.terminate();
        shared.flush();
        info!("wayland backend terminated");
    }
}
