//! Listener interfaces exported to the VM on the private connection
//!
//! QEMU pushes display notifications by calling methods on
//! `/org/qemu/Display1/Listener`. The baseline interface is always exported;
//! the shared-memory and multi-plane extensions only when the dispatcher was
//! built with the matching capability. All interface objects share one
//! dispatcher behind a mutex, which serializes notifications per console.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use vmview_frame::{
    Capabilities, Dispatcher, FrameError, FrameSink, MultiPlaneScanout, Outcome, Rect,
    UpdateError,
};
use zbus::connection;
use zbus::interface;
use zbus::zvariant::OwnedFd;

pub const LISTENER_PATH: &str = "/org/qemu/Display1/Listener";
pub const LISTENER_INTERFACE: &str = "org.qemu.Display1.Listener";
pub const UNIX_MAP_INTERFACE: &str = "org.qemu.Display1.Listener.Unix.Map";
pub const UNIX_SCANOUT_DMABUF2_INTERFACE: &str = "org.qemu.Display1.Listener.Unix.ScanoutDMABUF2";

pub type BoxedSink = Box<dyn FrameSink + Send>;
pub type SharedDispatcher = Arc<Mutex<Dispatcher<BoxedSink>>>;

pub fn shared_dispatcher(sink: BoxedSink, capabilities: Capabilities) -> SharedDispatcher {
    Arc::new(Mutex::new(Dispatcher::new(sink, capabilities)))
}

/// Extension interfaces to list in the listener's `Interfaces` property
pub fn advertised_interfaces(capabilities: Capabilities) -> Vec<String> {
    let mut interfaces = Vec::new();
    if capabilities.contains(Capabilities::SHARED_MEMORY_MAP) {
        interfaces.push(UNIX_MAP_INTERFACE.to_string());
    }
    if capabilities.contains(Capabilities::MULTI_PLANE) {
        interfaces.push(UNIX_SCANOUT_DMABUF2_INTERFACE.to_string());
    }
    interfaces
}

/// Export the listener objects on a connection that is not built yet
pub fn export<'a>(
    builder: connection::Builder<'a>,
    dispatcher: SharedDispatcher,
    capabilities: Capabilities,
) -> zbus::Result<connection::Builder<'a>> {
    let interfaces = advertised_interfaces(capabilities);
    debug!("Exporting {} with extensions {:?}", LISTENER_INTERFACE, interfaces);

    let mut builder =
        builder.serve_at(LISTENER_PATH, Listener::new(dispatcher.clone(), interfaces))?;
    if capabilities.contains(Capabilities::SHARED_MEMORY_MAP) {
        builder = builder.serve_at(LISTENER_PATH, MapListener::new(dispatcher.clone()))?;
    }
    if capabilities.contains(Capabilities::MULTI_PLANE) {
        builder = builder.serve_at(LISTENER_PATH, ScanoutDmabuf2Listener::new(dispatcher))?;
    }
    Ok(builder)
}

fn report_scanout(method: &str, result: Result<Outcome, FrameError>) {
    match result {
        Ok(outcome) => trace!("{} -> {:?}", method, outcome),
        Err(e) => warn!("{} rejected: {}", method, e),
    }
}

fn report_update(method: &str, result: Result<Outcome, UpdateError>) {
    match result {
        Ok(outcome) => trace!("{} -> {:?}", method, outcome),
        Err(e) => warn!("{} rejected: {}", method, e),
    }
}

/// Guest cursor as last announced by the VM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorState {
    pub x: i32,
    pub y: i32,
    pub visible: bool,
    pub width: i32,
    pub height: i32,
    pub hot_x: i32,
    pub hot_y: i32,
}

impl CursorState {
    fn set_position(&mut self, x: i32, y: i32, on: i32) {
        self.x = x;
        self.y = y;
        self.visible = on != 0;
    }

    /// Record a new cursor shape. Returns false if `data` does not hold
    /// `width * height` 32-bit pixels.
    fn define(&mut self, width: i32, height: i32, hot_x: i32, hot_y: i32, data: &[u8]) -> bool {
        self.width = width;
        self.height = height;
        self.hot_x = hot_x;
        self.hot_y = hot_y;

        let expected = i64::from(width) * i64::from(height) * 4;
        expected >= 0 && expected == data.len() as i64
    }
}

/// org.qemu.Display1.Listener
pub struct Listener {
    dispatcher: SharedDispatcher,
    cursor: CursorState,
    interfaces: Vec<String>,
}

impl Listener {
    pub fn new(dispatcher: SharedDispatcher, interfaces: Vec<String>) -> Self {
        Self {
            dispatcher,
            cursor: CursorState::default(),
            interfaces,
        }
    }
}

#[interface(name = "org.qemu.Display1.Listener")]
impl Listener {
    async fn scanout(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        pixman_format: u32,
        data: Vec<u8>,
    ) {
        let result = self
            .dispatcher
            .lock()
            .await
            .scanout(width, height, stride, pixman_format, data);
        report_scanout("Scanout", result);
    }

    #[allow(clippy::too_many_arguments)]
    async fn update(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: u32,
        _pixman_format: u32,
        data: Vec<u8>,
    ) {
        let result = match Rect::from_wire(x, y, width, height) {
            Ok(rect) => self.dispatcher.lock().await.update(rect, stride, &data),
            Err(e) => Err(e),
        };
        report_update("Update", result);
    }

    #[zbus(name = "ScanoutDMABUF")]
    #[allow(clippy::too_many_arguments)]
    async fn scanout_dmabuf(
        &self,
        dmabuf: OwnedFd,
        width: u32,
        height: u32,
        stride: u32,
        fourcc: u32,
        modifier: u64,
        y0_top: bool,
    ) {
        let result = self.dispatcher.lock().await.scanout_dmabuf(
            dmabuf.into(),
            width,
            height,
            stride,
            fourcc,
            modifier,
            !y0_top,
        );
        report_scanout("ScanoutDMABUF", result);
    }

    #[zbus(name = "UpdateDMABUF")]
    async fn update_dmabuf(&self, x: i32, y: i32, width: i32, height: i32) {
        let result = match Rect::from_wire(x, y, width, height) {
            Ok(rect) => self.dispatcher.lock().await.update_dmabuf(rect),
            Err(e) => Err(e),
        };
        report_update("UpdateDMABUF", result);
    }

    async fn disable(&self) {
        self.dispatcher.lock().await.disable();
    }

    fn mouse_set(&mut self, x: i32, y: i32, on: i32) {
        self.cursor.set_position(x, y, on);
        trace!("MouseSet: {:?}", self.cursor);
    }

    fn cursor_define(&mut self, width: i32, height: i32, hot_x: i32, hot_y: i32, data: Vec<u8>) {
        if !self.cursor.define(width, height, hot_x, hot_y, &data) {
            warn!(
                "CursorDefine: {}x{} cursor with {} bytes of data",
                width,
                height,
                data.len()
            );
        }
        debug!("CursorDefine: {}x{} hotspot ({},{})", width, height, hot_x, hot_y);
    }

    /// Extension interfaces implemented by this listener
    #[zbus(property(emits_changed_signal = "const"))]
    fn interfaces(&self) -> Vec<String> {
        self.interfaces.clone()
    }
}

/// org.qemu.Display1.Listener.Unix.Map
pub struct MapListener {
    dispatcher: SharedDispatcher,
}

impl MapListener {
    pub fn new(dispatcher: SharedDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[interface(name = "org.qemu.Display1.Listener.Unix.Map")]
impl MapListener {
    async fn scanout_map(
        &self,
        handle: OwnedFd,
        offset: u32,
        width: u32,
        height: u32,
        stride: u32,
        pixman_format: u32,
    ) {
        let result = self.dispatcher.lock().await.scanout_shared_memory(
            handle.into(),
            offset,
            width,
            height,
            stride,
            pixman_format,
        );
        report_scanout("ScanoutMap", result);
    }

    async fn update_map(&self, x: i32, y: i32, width: i32, height: i32) {
        let result = match Rect::from_wire(x, y, width, height) {
            Ok(rect) => self.dispatcher.lock().await.update_shared_memory(rect),
            Err(e) => Err(e),
        };
        report_update("UpdateMap", result);
    }
}

/// org.qemu.Display1.Listener.Unix.ScanoutDMABUF2
pub struct ScanoutDmabuf2Listener {
    dispatcher: SharedDispatcher,
}

impl ScanoutDmabuf2Listener {
    pub fn new(dispatcher: SharedDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[interface(name = "org.qemu.Display1.Listener.Unix.ScanoutDMABUF2")]
impl ScanoutDmabuf2Listener {
    #[zbus(name = "ScanoutDMABUF2")]
    #[allow(clippy::too_many_arguments)]
    async fn scanout_dmabuf2(
        &self,
        dmabuf: Vec<OwnedFd>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        offset: Vec<u32>,
        stride: Vec<u32>,
        num_planes: u32,
        fourcc: u32,
        backing_width: u32,
        backing_height: u32,
        modifier: u64,
        y0_top: bool,
    ) {
        let scanout = MultiPlaneScanout {
            fds: dmabuf.into_iter().map(Into::into).collect(),
            region: Rect::new(x, y, width, height),
            offsets: offset,
            strides: stride,
            num_planes,
            fourcc,
            backing_width,
            backing_height,
            modifier,
            flipped: !y0_top,
        };
        let result = self.dispatcher.lock().await.scanout_dmabuf_planes(scanout);
        report_scanout("ScanoutDMABUF2", result);
    }
}
