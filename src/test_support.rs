//! Shared fixtures for unit tests.
//!
//! [`TestState`] runs a real Wayland display with one in-process client
//! connected over a socket pair. Helpers drive the client side and
//! [`TestState::roundtrip`] pumps both ends until the requests and the
//! replies have been handled.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use calloop::EventLoop;
use smithay::{
    reexports::wayland_server::{Client, Display, protocol::wl_surface::WlSurface},
    utils::{Logical, Physical, Point, Rectangle, Size, Transform},
};
use wayland_client::{
    Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum,
    backend::ObjectId,
    delegate_noop,
    protocol::{
        wl_buffer::{self, WlBuffer},
        wl_callback::{self, WlCallback},
        wl_compositor::WlCompositor,
        wl_registry::{self, WlRegistry},
        wl_shm::{self, WlShm},
        wl_shm_pool::WlShmPool,
        wl_subcompositor::WlSubcompositor,
        wl_subsurface::WlSubsurface,
        wl_surface,
    },
};
use wayland_protocols::xdg::{
    decoration::zv1::client::{
        zxdg_decoration_manager_v1::ZxdgDecorationManagerV1,
        zxdg_toplevel_decoration_v1::{self, ZxdgToplevelDecorationV1},
    },
    shell::client::{
        xdg_popup::{self, XdgPopup},
        xdg_positioner::{Anchor, Gravity, XdgPositioner},
        xdg_surface::{self, XdgSurface},
        xdg_toplevel::{self, XdgToplevel},
        xdg_wm_base::{self, XdgWmBase},
    },
};

use crate::{
    CompositorError, Result,
    backend::headless::{HeadlessOutput, HeadlessRenderer},
    config::RuntimeConfig,
    message::{MessageStyle, RasterizedText, TextOptions, TextRasterizer},
    output::{Mode, OutputId, OutputSettings, Subpixel},
    render::render_output,
    state::{Cleave, ClientState},
    view::ViewId,
};

pub const MESSAGE_COLOR: u32 = 0xff20_4060;
pub const WINDOW_COLOR: u32 = 0xff80_8080;

/// Every message is a 60x20 block, whatever the text.
struct FixedRasterizer {
    fail: Rc<Cell<bool>>,
}

impl TextRasterizer for FixedRasterizer {
    fn rasterize(
        &mut self,
        text: &str,
        _style: &MessageStyle,
        _options: &TextOptions,
    ) -> Result<RasterizedText> {
        if self.fail.get() {
            return Err(CompositorError::Text(format!("refusing to rasterize {text:?}")));
        }
        Ok(RasterizedText {
            width: 60,
            height: 20,
            stride: 60,
            pixels: vec![MESSAGE_COLOR; 60 * 20],
        })
    }
}

pub fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Physical> {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

fn settings(name: &str, width: i32, height: i32, transform: Transform) -> OutputSettings {
    OutputSettings {
        name: name.to_owned(),
        mode: Mode {
            size: Size::from((width, height)),
            refresh: 60_000,
        },
        scale: 1.0,
        transform,
        subpixel: Subpixel::Unknown,
        location: Point::from((0, 0)),
        workspaces: 1,
    }
}

/// One `xdg_toplevel.configure` as the client saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToplevelConfigure {
    pub size: (i32, i32),
    pub states: Vec<xdg_toplevel::State>,
}

/// What the test client has heard from the compositor.
#[derive(Default)]
struct ClientApp {
    globals: Vec<(u32, String, u32)>,
    toplevel_configures: HashMap<ObjectId, Vec<ToplevelConfigure>>,
    closes: HashMap<ObjectId, usize>,
    popup_configures: HashMap<ObjectId, Vec<(i32, i32, i32, i32)>>,
    decoration_modes: HashMap<ObjectId, Vec<zxdg_toplevel_decoration_v1::Mode>>,
    released_buffers: usize,
    frames_done: usize,
}

impl Dispatch<WlRegistry, ()> for ClientApp {
    fn event(
        state: &mut Self,
        _: &WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            state.globals.push((name, interface, version));
        }
    }
}

impl Dispatch<WlBuffer, ()> for ClientApp {
    fn event(
        state: &mut Self,
        _: &WlBuffer,
        event: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.released_buffers += 1;
        }
    }
}

impl Dispatch<WlCallback, ()> for ClientApp {
    fn event(
        state: &mut Self,
        _: &WlCallback,
        event: wl_callback::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.frames_done += 1;
        }
    }
}

impl Dispatch<XdgWmBase, ()> for ClientApp {
    fn event(
        _: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, ()> for ClientApp {
    fn event(
        _: &mut Self,
        xdg_surface: &XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            xdg_surface.ack_configure(serial);
        }
    }
}

impl Dispatch<XdgToplevel, ()> for ClientApp {
    fn event(
        state: &mut Self,
        toplevel: &XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                let states = states
                    .chunks_exact(4)
                    .filter_map(|raw| raw.try_into().ok())
                    .map(u32::from_ne_bytes)
                    .filter_map(|raw| xdg_toplevel::State::try_from(raw).ok())
                    .collect();
                state
                    .toplevel_configures
                    .entry(toplevel.id())
                    .or_default()
                    .push(ToplevelConfigure {
                        size: (width, height),
                        states,
                    });
            }
            xdg_toplevel::Event::Close => {
                *state.closes.entry(toplevel.id()).or_default() += 1;
            }
            _ => {}
        }
    }
}

impl Dispatch<XdgPopup, ()> for ClientApp {
    fn event(
        state: &mut Self,
        popup: &XdgPopup,
        event: xdg_popup::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_popup::Event::Configure {
            x,
            y,
            width,
            height,
        } = event
        {
            state
                .popup_configures
                .entry(popup.id())
                .or_default()
                .push((x, y, width, height));
        }
    }
}

impl Dispatch<ZxdgToplevelDecorationV1, ()> for ClientApp {
    fn event(
        state: &mut Self,
        decoration: &ZxdgToplevelDecorationV1,
        event: zxdg_toplevel_decoration_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zxdg_toplevel_decoration_v1::Event::Configure {
            mode: WEnum::Value(mode),
        } = event
        {
            state
                .decoration_modes
                .entry(decoration.id())
                .or_default()
                .push(mode);
        }
    }
}

delegate_noop!(ClientApp: WlCompositor);
delegate_noop!(ClientApp: WlSubcompositor);
delegate_noop!(ClientApp: WlSubsurface);
delegate_noop!(ClientApp: WlShmPool);
delegate_noop!(ClientApp: XdgPositioner);
delegate_noop!(ClientApp: ZxdgDecorationManagerV1);
delegate_noop!(ClientApp: ignore WlShm);
delegate_noop!(ClientApp: ignore wl_surface::WlSurface);

struct ClientGlobals {
    compositor: WlCompositor,
    subcompositor: WlSubcompositor,
    shm: WlShm,
    wm_base: XdgWmBase,
    decoration_manager: ZxdgDecorationManagerV1,
}

fn pump(
    display: &mut Display<Cleave>,
    state: &mut Cleave,
    queue: &mut EventQueue<ClientApp>,
    app: &mut ClientApp,
) {
    for _ in 0..4 {
        queue.flush().unwrap();
        display.dispatch_clients(state).unwrap();
        display.flush_clients().unwrap();
        if let Some(guard) = queue.prepare_read() {
            // WouldBlock when the compositor had nothing to say.
            let _ = guard.read();
        }
        queue.dispatch_pending(app).unwrap();
    }
}

fn bind_globals(app: &ClientApp, registry: &WlRegistry, qh: &QueueHandle<ClientApp>) -> ClientGlobals {
    let find = |interface: &str| {
        app.globals
            .iter()
            .find(|(_, name, _)| name == interface)
            .map(|(name, _, version)| (*name, *version))
            .unwrap_or_else(|| panic!("{interface} is not advertised"))
    };
    let (name, version) = find("wl_compositor");
    let compositor = registry.bind(name, version.min(4), qh, ());
    let (name, _) = find("wl_subcompositor");
    let subcompositor = registry.bind(name, 1, qh, ());
    let (name, _) = find("wl_shm");
    let shm = registry.bind(name, 1, qh, ());
    let (name, version) = find("xdg_wm_base");
    let wm_base = registry.bind(name, version.min(3), qh, ());
    let (name, _) = find("zxdg_decoration_manager_v1");
    let decoration_manager = registry.bind(name, 1, qh, ());
    ClientGlobals {
        compositor,
        subcompositor,
        shm,
        wm_base,
        decoration_manager,
    }
}

/// A plain client surface and its compositor-side object.
#[derive(Debug, Clone)]
pub struct ClientSurface {
    pub surface: wl_surface::WlSurface,
    pub server: WlSurface,
}

/// A mapped xdg toplevel.
#[derive(Debug, Clone)]
pub struct ClientWindow {
    pub view: ViewId,
    pub surface: wl_surface::WlSurface,
    pub xdg_surface: XdgSurface,
    pub toplevel: XdgToplevel,
    pub server: WlSurface,
}

#[derive(Debug, Clone)]
pub struct ClientPopup {
    pub surface: wl_surface::WlSurface,
    pub xdg_surface: XdgSurface,
    pub popup: XdgPopup,
    pub server: WlSurface,
}

#[derive(Debug, Clone)]
pub struct ClientSubsurface {
    pub surface: wl_surface::WlSurface,
    pub subsurface: WlSubsurface,
    pub server: WlSurface,
}

/// A compositor with one headless output, a connected client and handles
/// to inspect both.
pub struct TestState {
    pub state: Cleave,
    pub output: OutputId,
    pub renderer: HeadlessRenderer,
    pub presentation: HeadlessOutput,
    display: Display<Cleave>,
    client: Client,
    queue: EventQueue<ClientApp>,
    app: ClientApp,
    globals: ClientGlobals,
    /// Keeps the shm backing files alive for the client's lifetime.
    pools: Vec<File>,
    event_loop: Option<EventLoop<'static, Cleave>>,
    rasterizer_fails: Rc<Cell<bool>>,
}

impl TestState {
    pub fn new(width: i32, height: i32) -> Self {
        Self::with_transform(width, height, Transform::Normal)
    }

    pub fn with_transform(width: i32, height: i32, transform: Transform) -> Self {
        let renderer = HeadlessRenderer::new();
        let presentation = HeadlessOutput::new();
        presentation.set_hardware_cursor(true);
        let fail = Rc::new(Cell::new(false));

        let mut display = Display::<Cleave>::new().unwrap();
        let mut state = Cleave::new(
            display.handle(),
            RuntimeConfig::default(),
            Box::new(renderer.clone()),
            Box::new(FixedRasterizer { fail: fail.clone() }),
        );
        let output = state.add_output(
            settings("HEADLESS-1", width, height, transform),
            Box::new(presentation.clone()),
        );

        let (server_end, client_end) = UnixStream::pair().unwrap();
        server_end.set_nonblocking(true).unwrap();
        client_end.set_nonblocking(true).unwrap();
        let client = display
            .handle()
            .insert_client(server_end, Arc::new(ClientState::default()))
            .unwrap();
        let connection = Connection::from_socket(client_end).unwrap();
        let mut queue = connection.new_event_queue::<ClientApp>();
        let qh = queue.handle();
        let registry = connection.display().get_registry(&qh, ());
        let mut app = ClientApp::default();
        pump(&mut display, &mut state, &mut queue, &mut app);
        let globals = bind_globals(&app, &registry, &qh);

        let mut t = Self {
            state,
            output,
            renderer,
            presentation,
            display,
            client,
            queue,
            app,
            globals,
            pools: Vec::new(),
            event_loop: None,
            rasterizer_fails: fail,
        };
        t.roundtrip();
        t
    }

    /// Like [`TestState::new`], with timers backed by a real event loop.
    pub fn with_event_loop(width: i32, height: i32) -> Self {
        let mut t = Self::new(width, height);
        let event_loop = EventLoop::try_new().unwrap();
        t.state
            .attach_event_loop(event_loop.handle(), event_loop.get_signal());
        t.event_loop = Some(event_loop);
        t
    }

    pub fn add_output_at(
        &mut self,
        width: i32,
        height: i32,
        location: Point<i32, Logical>,
    ) -> OutputId {
        let name = format!("HEADLESS-{}", self.state.outputs.len() + 1);
        let mut settings = settings(&name, width, height, Transform::Normal);
        settings.location = location;
        self.state.add_output(settings, Box::new(HeadlessOutput::new()))
    }

    pub fn rasterizer_fails(&self) {
        self.rasterizer_fails.set(true);
    }

    pub fn dispatch_for(&mut self, duration: Duration) {
        let Some(event_loop) = self.event_loop.as_mut() else {
            return;
        };
        let deadline = Instant::now() + duration;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            event_loop.dispatch(Some(remaining), &mut self.state).unwrap();
        }
    }

    /// Pump requests to the compositor and events back to the client until
    /// both sides are idle.
    pub fn roundtrip(&mut self) {
        pump(&mut self.display, &mut self.state, &mut self.queue, &mut self.app);
    }

    fn server_surface(&self, surface: &wl_surface::WlSurface) -> WlSurface {
        self.client
            .object_from_protocol_id(&self.display.handle(), surface.id().protocol_id())
            .unwrap()
    }

    /// A solid `width`x`height` ARGB buffer backed by a fresh shm pool.
    fn buffer(&mut self, width: i32, height: i32, color: u32) -> WlBuffer {
        let qh = self.queue.handle();
        let stride = width * 4;
        let size = stride * height;
        let mut file = tempfile::tempfile().unwrap();
        let pixels: Vec<u8> = std::iter::repeat_n(color.to_ne_bytes(), (width * height) as usize)
            .flatten()
            .collect();
        file.write_all(&pixels).unwrap();
        let pool = self.globals.shm.create_pool(file.as_fd(), size, &qh, ());
        let buffer = pool.create_buffer(0, width, height, stride, wl_shm::Format::Argb8888, &qh, ());
        pool.destroy();
        self.pools.push(file);
        buffer
    }

    pub fn bare_surface(&mut self) -> ClientSurface {
        let surface = self.globals.compositor.create_surface(&self.queue.handle(), ());
        self.roundtrip();
        let server = self.server_surface(&surface);
        ClientSurface { surface, server }
    }

    /// Attach a solid buffer, damage all of it and commit.
    pub fn attach(&mut self, surface: &wl_surface::WlSurface, width: i32, height: i32, color: u32) {
        self.attach_with_damage(surface, width, height, color, (0, 0, width, height));
    }

    pub fn attach_with_damage(
        &mut self,
        surface: &wl_surface::WlSurface,
        width: i32,
        height: i32,
        color: u32,
        (x, y, w, h): (i32, i32, i32, i32),
    ) {
        let buffer = self.buffer(width, height, color);
        surface.attach(Some(&buffer), 0, 0);
        surface.damage(x, y, w, h);
        surface.commit();
        self.roundtrip();
    }

    pub fn remove_buffer(&mut self, surface: &wl_surface::WlSurface) {
        surface.attach(None, 0, 0);
        surface.commit();
        self.roundtrip();
    }

    pub fn commit(&mut self, surface: &wl_surface::WlSurface) {
        surface.commit();
        self.roundtrip();
    }

    pub fn destroy_surface(&mut self, surface: wl_surface::WlSurface) {
        surface.destroy();
        self.roundtrip();
    }

    pub fn released_buffers(&self) -> usize {
        self.app.released_buffers
    }

    /// Ask for a frame callback on the next commit.
    pub fn request_frame(&mut self, surface: &wl_surface::WlSurface) {
        surface.frame(&self.queue.handle(), ());
        self.commit(surface);
    }

    pub fn frames_done(&self) -> usize {
        self.app.frames_done
    }

    /// Create an xdg toplevel, answer its first configure and map it with a
    /// `width`x`height` buffer.
    pub fn xdg_window(&mut self, width: i32, height: i32) -> ClientWindow {
        let qh = self.queue.handle();
        let surface = self.globals.compositor.create_surface(&qh, ());
        let xdg_surface = self.globals.wm_base.get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        surface.commit();
        self.roundtrip();

        self.attach(&surface, width, height, WINDOW_COLOR);
        let server = self.server_surface(&surface);
        let view = self.state.view_for_surface(&server).unwrap();
        ClientWindow {
            view,
            surface,
            xdg_surface,
            toplevel,
            server,
        }
    }

    pub fn destroy_window(&mut self, window: ClientWindow) {
        window.toplevel.destroy();
        window.xdg_surface.destroy();
        window.surface.destroy();
        self.roundtrip();
    }

    pub fn toplevel_configures(&self, toplevel: &XdgToplevel) -> Vec<ToplevelConfigure> {
        self.app
            .toplevel_configures
            .get(&toplevel.id())
            .cloned()
            .unwrap_or_default()
    }

    pub fn close_count(&self, toplevel: &XdgToplevel) -> usize {
        self.app.closes.get(&toplevel.id()).copied().unwrap_or(0)
    }

    pub fn decorate(
        &mut self,
        window: &ClientWindow,
        mode: Option<zxdg_toplevel_decoration_v1::Mode>,
    ) -> ZxdgToplevelDecorationV1 {
        let decoration = self.globals.decoration_manager.get_toplevel_decoration(
            &window.toplevel,
            &self.queue.handle(),
            (),
        );
        if let Some(mode) = mode {
            decoration.set_mode(mode);
        }
        self.roundtrip();
        decoration
    }

    pub fn decoration_modes(
        &self,
        decoration: &ZxdgToplevelDecorationV1,
    ) -> Vec<zxdg_toplevel_decoration_v1::Mode> {
        self.app
            .decoration_modes
            .get(&decoration.id())
            .cloned()
            .unwrap_or_default()
    }

    /// A popup below and right of `anchor` on `parent`, mapped at `size`.
    pub fn popup(
        &mut self,
        parent: &XdgSurface,
        anchor: (i32, i32, i32, i32),
        size: (i32, i32),
    ) -> ClientPopup {
        self.popup_with(parent, anchor, size, |_| {})
    }

    /// Like [`TestState::popup`], letting `adjust` change the positioner.
    pub fn popup_with(
        &mut self,
        parent: &XdgSurface,
        (x, y, w, h): (i32, i32, i32, i32),
        (width, height): (i32, i32),
        adjust: impl FnOnce(&XdgPositioner),
    ) -> ClientPopup {
        let qh = self.queue.handle();
        let positioner = self.globals.wm_base.create_positioner(&qh, ());
        positioner.set_size(width, height);
        positioner.set_anchor_rect(x, y, w, h);
        positioner.set_anchor(Anchor::BottomRight);
        positioner.set_gravity(Gravity::BottomRight);
        adjust(&positioner);

        let surface = self.globals.compositor.create_surface(&qh, ());
        let xdg_surface = self.globals.wm_base.get_xdg_surface(&surface, &qh, ());
        let popup = xdg_surface.get_popup(Some(parent), &positioner, &qh, ());
        positioner.destroy();
        surface.commit();
        self.roundtrip();

        self.attach(&surface, width, height, WINDOW_COLOR);
        let server = self.server_surface(&surface);
        ClientPopup {
            surface,
            xdg_surface,
            popup,
            server,
        }
    }

    pub fn destroy_popup(&mut self, popup: ClientPopup) {
        popup.popup.destroy();
        popup.xdg_surface.destroy();
        popup.surface.destroy();
        self.roundtrip();
    }

    pub fn popup_configures(&self, popup: &XdgPopup) -> Vec<(i32, i32, i32, i32)> {
        self.app
            .popup_configures
            .get(&popup.id())
            .cloned()
            .unwrap_or_default()
    }

    /// A desynchronized subsurface of `parent` at `position`, mapped at
    /// `size`. The parent is committed so the position applies.
    pub fn subsurface(
        &mut self,
        parent: &wl_surface::WlSurface,
        (x, y): (i32, i32),
        (width, height): (i32, i32),
    ) -> ClientSubsurface {
        let qh = self.queue.handle();
        let surface = self.globals.compositor.create_surface(&qh, ());
        let subsurface = self.globals.subcompositor.get_subsurface(&surface, parent, &qh, ());
        subsurface.set_position(x, y);
        subsurface.set_desync();
        self.attach(&surface, width, height, WINDOW_COLOR);
        self.commit(parent);
        let server = self.server_surface(&surface);
        ClientSubsurface {
            surface,
            subsurface,
            server,
        }
    }

    pub fn move_subsurface(
        &mut self,
        subsurface: &ClientSubsurface,
        parent: &wl_surface::WlSurface,
        (x, y): (i32, i32),
    ) {
        subsurface.subsurface.set_position(x, y);
        self.commit(parent);
    }

    pub fn destroy_subsurface(&mut self, subsurface: ClientSubsurface) {
        subsurface.subsurface.destroy();
        subsurface.surface.destroy();
        self.roundtrip();
    }

    /// Hand `window` to the compositor as if the X server created it, and
    /// map it on a client surface sized to its geometry.
    #[cfg(feature = "xwayland")]
    pub fn x11_window(&mut self, window: RecordingX11Window) -> (ViewId, ClientSurface) {
        use crate::handlers::xwayland::X11Window;

        let size = window.geometry().size;
        let surface = self.bare_surface();
        let view = self.state.new_xwayland_surface(Box::new(window));
        self.state.xwayland_associate(view, &surface.server);
        self.attach(&surface.surface, size.w, size.h, WINDOW_COLOR);
        (view, surface)
    }

    pub fn render(&mut self) -> bool {
        render_output(&mut self.state, self.output)
    }
}

/// A request the compositor sent to an X11 window.
#[cfg(feature = "xwayland")]
#[derive(Debug, Clone, PartialEq)]
pub enum X11Request {
    Activate(bool),
    Close,
    Configure(Rectangle<i32, Logical>),
    SetMaximized(bool),
    SetFullscreen(bool),
}

#[cfg(feature = "xwayland")]
#[derive(Debug)]
struct RecordedWindow {
    id: u32,
    override_redirect: Cell<bool>,
    geometry: Cell<Rectangle<i32, Logical>>,
    max_size: Cell<Option<Size<i32, Logical>>>,
    requests: RefCell<Vec<X11Request>>,
}

/// An X11 window that records what it was asked to do. Clones share the
/// record, so a test keeps one while the compositor owns another.
#[cfg(feature = "xwayland")]
#[derive(Debug, Clone)]
pub struct RecordingX11Window(Rc<RecordedWindow>);

#[cfg(feature = "xwayland")]
impl RecordingX11Window {
    pub fn new(id: u32, geometry: Rectangle<i32, Logical>) -> Self {
        Self(Rc::new(RecordedWindow {
            id,
            override_redirect: Cell::new(false),
            geometry: Cell::new(geometry),
            max_size: Cell::new(None),
            requests: RefCell::new(Vec::new()),
        }))
    }

    pub fn with_max_size(self, width: i32, height: i32) -> Self {
        self.0.max_size.set(Some(Size::from((width, height))));
        self
    }

    pub fn override_redirect(self) -> Self {
        self.0.override_redirect.set(true);
        self
    }

    /// Move the window as the client would on its own.
    pub fn set_geometry(&self, geometry: Rectangle<i32, Logical>) {
        self.0.geometry.set(geometry);
    }

    pub fn take_requests(&self) -> Vec<X11Request> {
        self.0.requests.take()
    }

    fn record(&self, request: X11Request) -> Result<()> {
        self.0.requests.borrow_mut().push(request);
        Ok(())
    }
}

#[cfg(feature = "xwayland")]
impl crate::handlers::xwayland::X11Window for RecordingX11Window {
    fn window_id(&self) -> u32 {
        self.0.id
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn is_override_redirect(&self) -> bool {
        self.0.override_redirect.get()
    }

    fn is_transient(&self) -> bool {
        false
    }

    fn geometry(&self) -> Rectangle<i32, Logical> {
        self.0.geometry.get()
    }

    fn max_size(&self) -> Option<Size<i32, Logical>> {
        self.0.max_size.get()
    }

    fn set_activated(&self, activated: bool) -> Result<()> {
        self.record(X11Request::Activate(activated))
    }

    fn configure(&self, geometry: Rectangle<i32, Logical>) -> Result<()> {
        self.0.geometry.set(geometry);
        self.record(X11Request::Configure(geometry))
    }

    fn set_maximized(&self, maximized: bool) -> Result<()> {
        self.record(X11Request::SetMaximized(maximized))
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<()> {
        self.record(X11Request::SetFullscreen(fullscreen))
    }

    fn close(&self) -> Result<()> {
        self.record(X11Request::Close)
    }
}
