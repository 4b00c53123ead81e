//! Headless backend
//!
//! An in-process stand-in for a display server and graphics device. It
//! goes through the same connect, discover and device-init steps as the
//! Wayland backend, gives every window a private event channel, and
//! journals each resource it creates or destroys so tests can check
//! ordering after the fact.
//!
//! Failures are injected through a [`FaultPlan`], and synthetic events are
//! produced either by hand ([`HeadlessDisplay::post`]) or by an
//! [`EventPump`] thread.

use super::{GraphicsBackend, Resource, WindowResources};
use crate::error::{BackendError, WindowError};
use crate::shutdown::ShutdownFlag;
use crate::window::{WindowGeometry, WindowId};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Globals a display server has to advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Compositor,
    Shell,
}

impl Capability {
    pub fn global_name(&self) -> &'static str {
        match self {
            Capability::Compositor => "wl_compositor",
            Capability::Shell => "xdg_wm_base",
        }
    }
}

/// A per-window operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Fails after the channel and surface exist, before the role
    RoleCreate,
    ContextCreate,
    GraphicsSurfaceCreate,
    MakeCurrent,
    /// Every present fails
    Present,
    /// Every dispatch fails
    Dispatch,
}

/// Which backend and window operations should fail
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    unreachable: bool,
    missing: Option<Capability>,
    device_init_fails: bool,
    window_faults: HashMap<WindowId, HashSet<Fault>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connecting fails
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// The given global is not advertised
    pub fn without(mut self, capability: Capability) -> Self {
        self.missing = Some(capability);
        self
    }

    pub fn device_init_fails(mut self) -> Self {
        self.device_init_fails = true;
        self
    }

    pub fn fail_window(mut self, window: WindowId, fault: Fault) -> Self {
        self.window_faults.entry(window).or_default().insert(fault);
        self
    }

    fn faults_for(&self, window: WindowId) -> HashSet<Fault> {
        self.window_faults.get(&window).cloned().unwrap_or_default()
    }
}

/// Events the simulated server sends to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Liveness check from the shell, answered with a pong
    Ping(u32),
    Configure { width: u32, height: u32 },
    /// The user asked to close the window
    Close,
}

/// One line of the display server's journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntry {
    Connected,
    GlobalAdvertised(&'static str),
    DeviceInitialized,
    Created(WindowId, Resource),
    Destroyed(WindowId, Resource),
    Disconnected,
    Terminated,
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalEntry::Connected => f.write_str("connected"),
            JournalEntry::GlobalAdvertised(name) => write!(f, "global {}", name),
            JournalEntry::DeviceInitialized => f.write_str("device initialized"),
            JournalEntry::Created(id, r) => write!(f, "{}: created {}", id, r),
            JournalEntry::Destroyed(id, r) => write!(f, "{}: destroyed {}", id, r),
            JournalEntry::Disconnected => f.write_str("disconnected"),
            JournalEntry::Terminated => f.write_str("terminated"),
        }
    }
}

#[derive(Default)]
struct DisplayInner {
    plan: FaultPlan,
    journal: Mutex<Vec<JournalEntry>>,
    channels: Mutex<HashMap<WindowId, Sender<SimEvent>>>,
    frames: Mutex<HashMap<WindowId, u64>>,
    terminated: AtomicBool,
    serial: AtomicU32,
}

impl DisplayInner {
    fn record(&self, entry: JournalEntry) {
        trace!("headless: {}", entry);
        self.journal.lock().push(entry);
    }
}

/// Handle on the simulated display server. Cheap to clone; every clone
/// sees the same journal and channels.
#[derive(Clone, Default)]
pub struct HeadlessDisplay {
    inner: Arc<DisplayInner>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(plan: FaultPlan) -> Self {
        Self {
            inner: Arc::new(DisplayInner {
                plan,
                ..Default::default()
            }),
        }
    }

    /// Connect, discover globals and initialize the device.
    ///
    /// A failure after the connection was made leaves a `Disconnected`
    /// entry, so nothing stays half-initialized.
    pub fn connect(&self) -> Result<HeadlessBackend, BackendError> {
        let plan = &self.inner.plan;
        if plan.unreachable {
            return Err(BackendError::ConnectFailed(
                "simulated display server is unreachable".to_string(),
            ));
        }
        self.inner.record(JournalEntry::Connected);
        info!("connected to headless display server");

        for capability in [Capability::Compositor, Capability::Shell] {
            if plan.missing == Some(capability) {
                continue;
            }
            let name = capability.global_name();
            debug!("global advertised: {}", name);
            self.inner.record(JournalEntry::GlobalAdvertised(name));
        }
        if let Some(capability) = plan.missing {
            self.inner.record(JournalEntry::Disconnected);
            return Err(BackendError::CapabilityMissing(
                capability.global_name().to_string(),
            ));
        }

        if plan.device_init_fails {
            self.inner.record(JournalEntry::Disconnected);
            return Err(BackendError::DeviceInitFailed(
                "simulated device refused initialization".to_string(),
            ));
        }
        self.inner.record(JournalEntry::DeviceInitialized);
        info!("headless graphics device initialized");

        Ok(HeadlessBackend {
            display: self.clone(),
        })
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.journal.lock().clone()
    }

    /// Resources created for `window`, in creation order
    pub fn created(&self, window: WindowId) -> Vec<Resource> {
        self.inner
            .journal
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Created(id, r) if *id == window => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Resources destroyed for `window`, in destruction order
    pub fn destroyed(&self, window: WindowId) -> Vec<Resource> {
        self.inner
            .journal
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Destroyed(id, r) if *id == window => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Number of windows that got as far as creating a channel
    pub fn windows_opened(&self) -> usize {
        self.inner
            .journal
            .lock()
            .iter()
            .filter(|e| matches!(e, JournalEntry::Created(_, Resource::Channel)))
            .count()
    }

    /// Windows whose channel currently exists
    pub fn live_windows(&self) -> Vec<WindowId> {
        let mut ids: Vec<_> = self.inner.channels.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn frames_presented(&self, window: WindowId) -> u64 {
        self.inner.frames.lock().get(&window).copied().unwrap_or(0)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Send an event to one window. Returns `false` if it has no channel.
    pub fn post(&self, window: WindowId, event: SimEvent) -> bool {
        match self.inner.channels.lock().get(&window) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Send a ping to every live window except `silent` ones. Returns the
    /// number of windows reached.
    pub fn ping_all(&self, silent: &[WindowId]) -> usize {
        let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .lock()
            .iter()
            .filter(|(id, _)| !silent.contains(*id))
            .filter(|(_, tx)| tx.send(SimEvent::Ping(serial)).is_ok())
            .count()
    }

    /// Start a thread that pings every non-silent window each `interval`.
    pub fn start_pump(&self, interval: Duration, silent: Vec<WindowId>) -> io::Result<EventPump> {
        let flag = Arc::new(ShutdownFlag::new());
        let display = self.clone();
        let stop = Arc::clone(&flag);
        let handle = thread::Builder::new()
            .name("headless-pump".to_string())
            .spawn(move || {
                debug!(
                    "event pump started ({:?} interval, {} silent window(s))",
                    interval,
                    silent.len()
                );
                while !stop.wait_for_stop(interval) {
                    display.ping_all(&silent);
                }
                debug!("event pump stopped");
            })?;

        Ok(EventPump {
            flag,
            handle: Some(handle),
        })
    }

    fn register(&self, window: WindowId, tx: Sender<SimEvent>) {
        self.inner.channels.lock().insert(window, tx);
    }

    fn unregister(&self, window: WindowId) {
        self.inner.channels.lock().remove(&window);
    }

    fn count_frame(&self, window: WindowId) {
        *self.inner.frames.lock().entry(window).or_insert(0) += 1;
    }
}

/// Background event source; stops when dropped
pub struct EventPump {
    flag: Arc<ShutdownFlag>,
    handle: Option<JoinHandle<()>>,
}

impl EventPump {
    pub fn stop(&mut self) {
        self.flag.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("event pump thread panicked");
            }
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fully initialized headless backend
pub struct HeadlessBackend {
    display: HeadlessDisplay,
}

impl HeadlessBackend {
    pub fn display(&self) -> &HeadlessDisplay {
        &self.display
    }
}

impl GraphicsBackend for HeadlessBackend {
    type Window = HeadlessWindow;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn new_window(&self, id: WindowId, geometry: &WindowGeometry) -> HeadlessWindow {
        HeadlessWindow {
            id,
            title: geometry.title_for(id),
            size: (geometry.width, geometry.height),
            display: self.display.clone(),
            faults: self.display.inner.plan.faults_for(id),
            channel: None,
            held: HashSet::new(),
        }
    }

    fn terminate(&self) {
        let inner = &self.display.inner;
        if inner.terminated.swap(true, Ordering::SeqCst) {
            debug!("headless backend already terminated");
            return;
        }
        let leftover = {
            let mut channels = inner.channels.lock();
            let n = channels.len();
            channels.clear();
            n
        };
        if leftover > 0 {
            warn!("{} window channel(s) still open at terminate", leftover);
        }
        inner.record(JournalEntry::Terminated);
        info!("headless backend terminated");
    }
}

/// One simulated window
pub struct HeadlessWindow {
    id: WindowId,
    title: String,
    size: (u32, u32),
    display: HeadlessDisplay,
    faults: HashSet<Fault>,
    channel: Option<Receiver<SimEvent>>,
    held: HashSet<Resource>,
}

impl HeadlessWindow {
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Current size, as last configured
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    fn create(&mut self, resource: Resource) {
        self.held.insert(resource);
        self.display
            .inner
            .record(JournalEntry::Created(self.id, resource));
    }

    fn fails(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn handle(&mut self, event: SimEvent) {
        match event {
            SimEvent::Ping(serial) => trace!("{}: pong {}", self.id, serial),
            SimEvent::Configure { width, height } => {
                debug!("{}: configure {}x{}", self.id, width, height);
                if width > 0 && height > 0 {
                    self.size = (width, height);
                }
            }
            SimEvent::Close => info!("{}: close requested, ignoring", self.id),
        }
    }
}

impl WindowResources for HeadlessWindow {
    fn create_role(&mut self) -> Result<(), WindowError> {
        let (tx, rx) = mpsc::channel();
        self.display.register(self.id, tx);
        self.channel = Some(rx);
        self.create(Resource::Channel);
        self.create(Resource::Surface);

        if self.fails(Fault::RoleCreate) {
            return Err(WindowError::SurfaceCreateFailed(format!(
                "toplevel role rejected for \"{}\"",
                self.title
            )));
        }
        self.create(Resource::Role);
        self.create(Resource::Region);
        debug!("{}: toplevel \"{}\" ready", self.id, self.title);
        Ok(())
    }

    fn create_context(&mut self) -> Result<(), WindowError> {
        if self.fails(Fault::ContextCreate) {
            return Err(WindowError::ContextCreateFailed(
                "no matching config".to_string(),
            ));
        }
        self.create(Resource::Context);
        Ok(())
    }

    fn create_graphics_surface(&mut self) -> Result<(), WindowError> {
        if self.fails(Fault::GraphicsSurfaceCreate) {
            return Err(WindowError::SurfaceCreateFailed(format!(
                "cannot create {}x{} drawing surface",
                self.size.0, self.size.1
            )));
        }
        self.create(Resource::GraphicsSurface);
        Ok(())
    }

    fn make_current(&mut self) -> Result<(), WindowError> {
        if self.fails(Fault::MakeCurrent) {
            return Err(WindowError::MakeCurrentFailed("bad match".to_string()));
        }
        if !self.held.contains(&Resource::Context) || !self.held.contains(&Resource::GraphicsSurface) {
            return Err(WindowError::MakeCurrentFailed(
                "context or graphics surface missing".to_string(),
            ));
        }
        Ok(())
    }

    fn present(&mut self, gray: f32) -> Result<(), WindowError> {
        if self.fails(Fault::Present) {
            return Err(WindowError::PresentFailed("swap rejected".to_string()));
        }
        if !self.held.contains(&Resource::GraphicsSurface) {
            return Err(WindowError::PresentFailed(
                "no graphics surface".to_string(),
            ));
        }
        trace!("{}: present gray {:.3}", self.id, gray);
        self.display.count_frame(self.id);
        Ok(())
    }

    fn dispatch(&mut self, timeout: Option<Duration>) -> Result<usize, WindowError> {
        if self.fails(Fault::Dispatch) {
            return Err(WindowError::DispatchFailed("connection error".to_string()));
        }
        let Some(rx) = self.channel.as_ref() else {
            return Err(WindowError::DispatchFailed("no event channel".to_string()));
        };

        let first = match timeout {
            None => rx.recv().map_err(|_| disconnected())?,
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(disconnected()),
            },
        };

        let mut events = vec![first];
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        let count = events.len();
        for event in events {
            self.handle(event);
        }
        Ok(count)
    }

    fn release(&mut self, resource: Resource) -> bool {
        if !self.held.remove(&resource) {
            return false;
        }
        if resource == Resource::Channel {
            self.display.unregister(self.id);
            self.channel = None;
        }
        self.display
            .inner
            .record(JournalEntry::Destroyed(self.id, resource));
        true
    }
}

fn disconnected() -> WindowError {
    WindowError::DispatchFailed("display server closed the channel".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RELEASE_ORDER;

    fn geometry() -> WindowGeometry {
        WindowGeometry::new(64, 48, "test")
    }

    #[test]
    fn test_connect_journals_setup_steps() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        assert_eq!(backend.name(), "headless");
        assert_eq!(
            display.journal(),
            vec![
                JournalEntry::Connected,
                JournalEntry::GlobalAdvertised("wl_compositor"),
                JournalEntry::GlobalAdvertised("xdg_wm_base"),
                JournalEntry::DeviceInitialized,
            ]
        );
    }

    #[test]
    fn test_unreachable_server() {
        let display = HeadlessDisplay::with_faults(FaultPlan::new().unreachable());
        let err = display.connect().err().unwrap();
        assert!(matches!(err, BackendError::ConnectFailed(_)));
        assert!(display.journal().is_empty());
    }

    #[test]
    fn test_missing_shell_capability() {
        let display = HeadlessDisplay::with_faults(FaultPlan::new().without(Capability::Shell));
        let err = display.connect().err().unwrap();
        assert_eq!(err, BackendError::CapabilityMissing("xdg_wm_base".to_string()));
        assert_eq!(display.journal().last(), Some(&JournalEntry::Disconnected));
    }

    #[test]
    fn test_device_init_failure() {
        let display = HeadlessDisplay::with_faults(FaultPlan::new().device_init_fails());
        let err = display.connect().err().unwrap();
        assert!(matches!(err, BackendError::DeviceInitFailed(_)));
        assert!(!display.journal().contains(&JournalEntry::DeviceInitialized));
    }

    #[test]
    fn test_window_resources_created_in_stage_order() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(0), &geometry());

        window.create_role().unwrap();
        window.create_context().unwrap();
        window.create_graphics_surface().unwrap();
        window.make_current().unwrap();
        window.present(0.5).unwrap();

        assert_eq!(
            display.created(WindowId(0)),
            vec![
                Resource::Channel,
                Resource::Surface,
                Resource::Role,
                Resource::Region,
                Resource::Context,
                Resource::GraphicsSurface,
            ]
        );
        assert_eq!(display.frames_presented(WindowId(0)), 1);
        assert_eq!(window.title(), "test #0");
    }

    #[test]
    fn test_release_is_single_shot_per_resource() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(3), &geometry());
        window.create_role().unwrap();

        assert!(window.release(Resource::Surface));
        assert!(!window.release(Resource::Surface));
        assert!(!window.release(Resource::Context));
        assert_eq!(display.destroyed(WindowId(3)), vec![Resource::Surface]);
    }

    #[test]
    fn test_releasing_channel_unregisters_window() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(1), &geometry());
        window.create_role().unwrap();
        assert_eq!(display.live_windows(), vec![WindowId(1)]);

        for resource in RELEASE_ORDER {
            window.release(resource);
        }
        assert!(display.live_windows().is_empty());
        assert!(!display.post(WindowId(1), SimEvent::Close));
    }

    #[test]
    fn test_role_fault_leaves_partial_resources() {
        let plan = FaultPlan::new().fail_window(WindowId(0), Fault::RoleCreate);
        let display = HeadlessDisplay::with_faults(plan);
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(0), &geometry());

        let err = window.create_role().unwrap_err();
        assert_eq!(err.kind(), "SurfaceCreateFailed");
        assert_eq!(
            display.created(WindowId(0)),
            vec![Resource::Channel, Resource::Surface]
        );

        // Other windows unaffected
        let mut other = backend.new_window(WindowId(1), &geometry());
        assert!(other.create_role().is_ok());
    }

    #[test]
    fn test_dispatch_timeout_returns_zero() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(0), &geometry());
        window.create_role().unwrap();

        let dispatched = window.dispatch(Some(Duration::from_millis(5))).unwrap();
        assert_eq!(dispatched, 0);
    }

    #[test]
    fn test_dispatch_drains_pending_events() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(0), &geometry());
        window.create_role().unwrap();

        assert!(display.post(WindowId(0), SimEvent::Ping(1)));
        assert!(display.post(
            WindowId(0),
            SimEvent::Configure {
                width: 800,
                height: 600
            }
        ));
        assert!(display.post(WindowId(0), SimEvent::Close));

        assert_eq!(window.dispatch(None).unwrap(), 3);
        assert_eq!(window.size(), (800, 600));
    }

    #[test]
    fn test_dispatch_without_channel_fails() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut window = backend.new_window(WindowId(0), &geometry());
        let err = window.dispatch(Some(Duration::from_millis(1))).unwrap_err();
        assert_eq!(err.kind(), "DispatchFailed");
    }

    #[test]
    fn test_pump_skips_silent_windows() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        let mut loud = backend.new_window(WindowId(0), &geometry());
        let mut silent = backend.new_window(WindowId(1), &geometry());
        loud.create_role().unwrap();
        silent.create_role().unwrap();

        let mut pump = display
            .start_pump(Duration::from_millis(2), vec![WindowId(1)])
            .unwrap();
        assert!(loud.dispatch(Some(Duration::from_secs(5))).unwrap() > 0);
        pump.stop();

        assert_eq!(silent.dispatch(Some(Duration::from_millis(5))).unwrap(), 0);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let display = HeadlessDisplay::new();
        let backend = display.connect().unwrap();
        backend.terminate();
        backend.terminate();

        assert!(display.is_terminated());
        let terminations = display
            .journal()
            .iter()
            .filter(|e| **e == JournalEntry::Terminated)
            .count();
        assert_eq!(terminations, 1);
    }
}
