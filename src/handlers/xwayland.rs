//! Legacy X11 bridge adapter.
//!
//! X11 windows report their own position, asynchronously, through
//! configure notifications. Commits compare that position against the
//! view's and damage both places when the window moved on its own.

use std::{ffi::OsStr, fmt, process::Stdio};

use bitflags::bitflags;
use calloop::LoopHandle;
use smithay::{
    delegate_xwayland_shell,
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Logical, Point, Rectangle, Size},
    wayland::xwayland_shell::{XWaylandShellHandler, XWaylandShellState},
    xwayland::{
        X11Surface, X11Wm, XWayland, XWaylandEvent, XwmHandler,
        xwm::{Reorder, ResizeEdge, WmWindowProperty, X11Window as X11WindowId, XwmId},
    },
};

use crate::{
    CompositorError, Result,
    state::Cleave,
    surface::{SurfaceVisitor, for_each_surface, has_texture, surface_at},
    view::{ViewId, ViewImpl, ViewShell},
};

use super::{ListenerTarget, Signal, SurfaceEvent};

/// What the adapter needs from an X11 window managed through the XWM.
pub trait X11Window: fmt::Debug {
    fn window_id(&self) -> u32;
    fn title(&self) -> Option<String>;
    fn is_override_redirect(&self) -> bool;
    fn is_transient(&self) -> bool;
    /// Root window coordinates, as last configured by either side.
    fn geometry(&self) -> Rectangle<i32, Logical>;
    /// `WM_NORMAL_HINTS` maximum size, if the client set one.
    fn max_size(&self) -> Option<Size<i32, Logical>>;

    fn set_activated(&self, activated: bool) -> Result<()>;
    fn configure(&self, geometry: Rectangle<i32, Logical>) -> Result<()>;
    fn set_maximized(&self, maximized: bool) -> Result<()>;
    fn set_fullscreen(&self, fullscreen: bool) -> Result<()>;
    fn close(&self) -> Result<()>;
}

fn x11_error(err: impl fmt::Display) -> CompositorError {
    CompositorError::Backend(format!("X11 request failed: {err}"))
}

impl X11Window for X11Surface {
    fn window_id(&self) -> u32 {
        X11Surface::window_id(self)
    }

    fn title(&self) -> Option<String> {
        Some(X11Surface::title(self)).filter(|title| !title.is_empty())
    }

    fn is_override_redirect(&self) -> bool {
        X11Surface::is_override_redirect(self)
    }

    fn is_transient(&self) -> bool {
        self.is_transient_for().is_some()
    }

    fn geometry(&self) -> Rectangle<i32, Logical> {
        X11Surface::geometry(self)
    }

    fn max_size(&self) -> Option<Size<i32, Logical>> {
        X11Surface::max_size(self)
    }

    fn set_activated(&self, activated: bool) -> Result<()> {
        X11Surface::set_activated(self, activated).map_err(x11_error)
    }

    fn configure(&self, geometry: Rectangle<i32, Logical>) -> Result<()> {
        X11Surface::configure(self, Some(geometry)).map_err(x11_error)
    }

    fn set_maximized(&self, maximized: bool) -> Result<()> {
        X11Surface::set_maximized(self, maximized).map_err(x11_error)
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<()> {
        X11Surface::set_fullscreen(self, fullscreen).map_err(x11_error)
    }

    fn close(&self) -> Result<()> {
        X11Surface::close(self).map_err(x11_error)
    }
}

bitflags! {
    /// Window state as last sent to the X server.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct Sent: u8 {
        const ACTIVATED = 1 << 0;
        const MAXIMIZED = 1 << 1;
        const FULLSCREEN = 1 << 2;
        const CLOSE_REQUESTED = 1 << 3;
    }
}

#[derive(Debug)]
pub struct XwaylandView {
    window: Box<dyn X11Window>,
    surface: Option<WlSurface>,
    /// Location of the output the view is mapped on.
    output_location: Point<i32, Logical>,
    sent: Sent,
    configured: Option<Rectangle<i32, Logical>>,
    /// `_NET_WM_STATE_FULLSCREEN` as last asked for by the client.
    requested_fullscreen: bool,
    destroyed: bool,
}

impl XwaylandView {
    pub fn new(window: Box<dyn X11Window>) -> Self {
        Self {
            window,
            surface: None,
            output_location: Point::from((0, 0)),
            sent: Sent::empty(),
            configured: None,
            requested_fullscreen: false,
            destroyed: false,
        }
    }

    pub fn window(&self) -> &dyn X11Window {
        self.window.as_ref()
    }

    pub fn surface(&self) -> Option<&WlSurface> {
        self.surface.as_ref()
    }

    fn report(&self, what: &str, result: Result<()>) {
        if let Err(err) = result {
            tracing::warn!(window = self.window.window_id(), "{what}: {err}");
        }
    }

    fn toggle(
        &mut self,
        flag: Sent,
        on: bool,
        send: impl FnOnce(&dyn X11Window, bool) -> Result<()>,
    ) {
        if self.destroyed || self.sent.contains(flag) == on {
            return;
        }
        self.sent.set(flag, on);
        self.report("state change", send(self.window.as_ref(), on));
    }

    fn configure(&mut self, geometry: Rectangle<i32, Logical>) {
        if self.destroyed || self.configured == Some(geometry) {
            return;
        }
        self.configured = Some(geometry);
        self.report("configure", self.window.configure(geometry));
    }

    /// Answer a configure request with the geometry we already chose. The
    /// client waits for a ConfigureNotify either way.
    fn reassert_configure(&self) {
        if let Some(geometry) = self.configured
            && !self.destroyed
        {
            self.report("configure", self.window.configure(geometry));
        }
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.toggle(Sent::FULLSCREEN, fullscreen, |window, on| window.set_fullscreen(on));
    }
}

impl ViewImpl for XwaylandView {
    fn title(&self) -> Option<String> {
        self.window.title()
    }

    fn is_primary(&self) -> bool {
        !self.window.is_transient()
    }

    fn activate(&mut self, activate: bool) {
        self.toggle(Sent::ACTIVATED, activate, |window, on| window.set_activated(on));
    }

    fn close(&mut self) {
        if self.destroyed || self.sent.contains(Sent::CLOSE_REQUESTED) {
            return;
        }
        self.sent.insert(Sent::CLOSE_REQUESTED);
        self.report("close", self.window.close());
    }

    /// Windows with a maximum size are clamped to it. The oversized box is
    /// returned for damage before each clamp.
    fn maximize(
        &mut self,
        origin: Point<i32, Logical>,
        width: i32,
        height: i32,
    ) -> Vec<Rectangle<i32, Logical>> {
        let mut damage = Vec::new();
        let mut width = width;
        let mut height = height;

        if let Some(max) = self.window.max_size() {
            if max.w > 0 && width > max.w {
                damage.push(Rectangle::new(origin, Size::from((width, height))));
                width = max.w;
            }
            if max.h > 0 && height > max.h {
                damage.push(Rectangle::new(origin, Size::from((width, height))));
                height = max.h;
            }
        }

        let location = self.output_location + origin;
        self.configure(Rectangle::new(location, Size::from((width, height))));
        self.toggle(Sent::MAXIMIZED, true, |window, on| window.set_maximized(on));
        damage
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }

    fn for_each_surface(
        &self,
        root: &WlSurface,
        origin: Point<i32, Logical>,
        visitor: &mut SurfaceVisitor<'_>,
    ) {
        for_each_surface(root, origin, visitor);
    }

    fn surface_at(
        &self,
        root: &WlSurface,
        point: Point<f64, Logical>,
    ) -> Option<(WlSurface, Point<f64, Logical>)> {
        surface_at(root, point, false)
    }

    fn should_manage(&self) -> bool {
        !self.window.is_override_redirect()
    }

    fn requested_position(&self) -> Option<Point<i32, Logical>> {
        Some(self.window.geometry().loc)
    }
}

impl Cleave {
    pub fn new_xwayland_surface(&mut self, window: Box<dyn X11Window>) -> ViewId {
        tracing::debug!(
            window = window.window_id(),
            override_redirect = window.is_override_redirect(),
            "new X11 window"
        );
        self.view_init(ViewShell::Xwayland(XwaylandView::new(window)))
    }

    pub fn xwayland_view(&self, view: ViewId) -> Option<&XwaylandView> {
        match &self.view(view)?.shell {
            ViewShell::Xwayland(x) => Some(x),
            _ => None,
        }
    }

    pub fn xwayland_view_mut(&mut self, view: ViewId) -> Option<&mut XwaylandView> {
        match &mut self.view_mut(view)?.shell {
            ViewShell::Xwayland(x) => Some(x),
            _ => None,
        }
    }

    pub fn xwayland_view_for_window(&self, window: u32) -> Option<ViewId> {
        self.views.values().find_map(|view| match &view.shell {
            ViewShell::Xwayland(x) if x.window.window_id() == window => Some(view.id),
            _ => None,
        })
    }

    /// Pair the X11 window with its Wayland surface. The view maps on the
    /// surface's first buffer.
    pub fn xwayland_associate(&mut self, view: ViewId, surface: &WlSurface) {
        let Some(x) = self.xwayland_view_mut(view) else {
            return;
        };
        if let Some(previous) = x.surface.replace(surface.clone()) {
            self.listeners.remove_surface(&previous);
        }
        let target = ListenerTarget::View(view);
        for signal in [
            Signal::Map,
            Signal::Unmap,
            Signal::Destroy,
            Signal::RequestFullscreen,
        ] {
            self.listeners.add(surface, signal, target);
        }
        if has_texture(surface) {
            self.emit(surface, SurfaceEvent::Map);
        }
    }

    /// A `_NET_WM_STATE` fullscreen request from the client.
    pub fn xwayland_request_fullscreen(&mut self, view: ViewId, fullscreen: bool) {
        let Some(x) = self.xwayland_view_mut(view) else {
            return;
        };
        x.requested_fullscreen = fullscreen;
        let Some(surface) = x.surface.clone() else {
            x.set_fullscreen(fullscreen);
            return;
        };
        self.emit(&surface, SurfaceEvent::RequestFullscreen(fullscreen));
    }

    /// Tiled windows keep their tile. Anything else gets what it asked for.
    pub fn xwayland_configure_request(
        &mut self,
        view: ViewId,
        x: Option<i32>,
        y: Option<i32>,
        width: Option<u32>,
        height: Option<u32>,
    ) {
        let tiled = self.view_get_tile(view).is_some();
        let Some(xv) = self.xwayland_view_mut(view) else {
            return;
        };
        if tiled {
            xv.reassert_configure();
            return;
        }
        let mut geometry = xv.window.geometry();
        geometry.loc.x = x.unwrap_or(geometry.loc.x);
        geometry.loc.y = y.unwrap_or(geometry.loc.y);
        if let Some(width) = width {
            geometry.size.w = i32::try_from(width).unwrap_or(i32::MAX);
        }
        if let Some(height) = height {
            geometry.size.h = i32::try_from(height).unwrap_or(i32::MAX);
        }
        xv.configure(geometry);
    }

    /// The X server mapped the window again after an unmap.
    fn xwayland_mapped(&mut self, view: ViewId) {
        let mapped = self.view(view).is_some_and(|v| v.is_mapped());
        let Some(surface) = self.xwayland_view(view).and_then(|x| x.surface.clone()) else {
            return;
        };
        if !mapped && has_texture(&surface) {
            self.emit(&surface, SurfaceEvent::Map);
        }
    }

    fn xwayland_unmapped(&mut self, view: ViewId) {
        let Some(surface) = self.xwayland_view(view).and_then(|x| x.surface.clone()) else {
            return;
        };
        if self.view(view).is_some_and(|v| v.is_mapped()) {
            self.emit(&surface, SurfaceEvent::Unmap);
        }
    }

    fn xwayland_destroyed(&mut self, view: ViewId) {
        let surface = self.xwayland_view(view).and_then(|x| x.surface.clone());
        let handled = surface.is_some_and(|surface| self.emit(&surface, SurfaceEvent::Destroy));
        if !handled {
            self.view_destroy(view);
        }
    }
}

impl XWaylandShellHandler for Cleave {
    fn xwayland_shell_state(&mut self) -> &mut XWaylandShellState {
        &mut self.xwayland_shell_state
    }

    fn surface_associated(&mut self, _xwm: XwmId, surface: WlSurface, window: X11Surface) {
        let Some(view) = self.xwayland_view_for_window(window.window_id()) else {
            tracing::debug!(window = window.window_id(), "surface for an unknown X11 window");
            return;
        };
        self.xwayland_associate(view, &surface);
    }
}

delegate_xwayland_shell!(Cleave);

impl XwmHandler for Cleave {
    fn xwm_state(&mut self, xwm: XwmId) -> &mut X11Wm {
        self.xwms
            .get_mut(&xwm)
            .expect("X11 window manager event for an unknown XWM")
    }

    fn new_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.new_xwayland_surface(Box::new(window));
    }

    fn new_override_redirect_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.new_xwayland_surface(Box::new(window));
    }

    fn map_window_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Err(err) = window.set_mapped(true) {
            tracing::warn!(window = window.window_id(), "failed to map X11 window: {err}");
            return;
        }
        if let Some(view) = self.xwayland_view_for_window(window.window_id()) {
            self.xwayland_mapped(view);
        }
    }

    fn mapped_override_redirect_window(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(view) = self.xwayland_view_for_window(window.window_id()) {
            self.xwayland_mapped(view);
        }
    }

    fn unmapped_window(&mut self, _xwm: XwmId, window: X11Surface) {
        if !window.is_override_redirect()
            && let Err(err) = window.set_mapped(false)
        {
            tracing::warn!(window = window.window_id(), "failed to unmap X11 window: {err}");
        }
        if let Some(view) = self.xwayland_view_for_window(window.window_id()) {
            self.xwayland_unmapped(view);
        }
    }

    fn destroyed_window(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(view) = self.xwayland_view_for_window(window.window_id()) {
            self.xwayland_destroyed(view);
        }
    }

    fn configure_request(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        x: Option<i32>,
        y: Option<i32>,
        w: Option<u32>,
        h: Option<u32>,
        _reorder: Option<Reorder>,
    ) {
        match self.xwayland_view_for_window(window.window_id()) {
            Some(view) => self.xwayland_configure_request(view, x, y, w, h),
            None => tracing::debug!(window = window.window_id(), "configure request for an unknown X11 window"),
        }
    }

    /// The window's recorded geometry is already updated. The next commit
    /// moves the view.
    fn configure_notify(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        geometry: Rectangle<i32, Logical>,
        _above: Option<X11WindowId>,
    ) {
        tracing::trace!(window = window.window_id(), ?geometry, "X11 window configured");
    }

    fn property_notify(&mut self, _xwm: XwmId, window: X11Surface, property: WmWindowProperty) {
        tracing::trace!(window = window.window_id(), ?property, "X11 property changed");
    }

    fn resize_request(&mut self, _xwm: XwmId, _window: X11Surface, _button: u32, _edges: ResizeEdge) {}

    fn move_request(&mut self, _xwm: XwmId, _window: X11Surface, _button: u32) {}

    fn fullscreen_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(view) = self.xwayland_view_for_window(window.window_id()) {
            self.xwayland_request_fullscreen(view, true);
        }
    }

    fn unfullscreen_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(view) = self.xwayland_view_for_window(window.window_id()) {
            self.xwayland_request_fullscreen(view, false);
        }
    }
}

/// Spawn Xwayland against `socket_name` and start the window manager once
/// the X server is ready.
pub fn start_xwayland(
    state: &Cleave,
    loop_handle: &LoopHandle<'static, Cleave>,
    socket_name: &OsStr,
) -> Result<()> {
    let (xwayland, client) = XWayland::spawn(
        &state.display_handle,
        None,
        [(
            "WAYLAND_DISPLAY".to_owned(),
            socket_name.to_string_lossy().into_owned(),
        )]
        .into_iter(),
        true,
        Stdio::null(),
        Stdio::null(),
        |_| {},
    )
    .map_err(|err| CompositorError::Backend(format!("failed to spawn Xwayland: {err}")))?;

    let wm_handle = loop_handle.clone();
    loop_handle
        .insert_source(xwayland, move |event, _, state| match event {
            XWaylandEvent::Ready {
                x11_socket,
                display_number,
                ..
            } => match X11Wm::start_wm(wm_handle.clone(), x11_socket, client.clone()) {
                Ok(wm) => {
                    tracing::info!(display = format!(":{display_number}"), "Xwayland ready");
                    state.xwms.insert(wm.id(), wm);
                    // Safety: the event loop runs on the only thread.
                    unsafe { std::env::set_var("DISPLAY", format!(":{display_number}")) };
                }
                Err(err) => tracing::error!("failed to start the X11 window manager: {err}"),
            },
            XWaylandEvent::Error => tracing::error!("Xwayland failed to start"),
        })
        .map_err(|err| {
            CompositorError::EventLoop(format!("failed to insert Xwayland source: {err}"))
        })?;
    Ok(())
}

pub(super) fn handle_xwayland_surface_event(
    state: &mut Cleave,
    view: ViewId,
    surface: &WlSurface,
    event: SurfaceEvent,
) {
    match event {
        SurfaceEvent::Map => handle_xwayland_map(state, view, surface),
        SurfaceEvent::Unmap => {
            state.listeners.remove(surface, Signal::Commit);
            state.view_unmap(view);
        }
        SurfaceEvent::Destroy => {
            for signal in [
                Signal::Map,
                Signal::Unmap,
                Signal::Destroy,
                Signal::RequestFullscreen,
            ] {
                state.listeners.remove(surface, signal);
            }
            state.view_destroy(view);
        }
        SurfaceEvent::Commit => handle_xwayland_commit(state, view),
        SurfaceEvent::RequestFullscreen(_) => {
            if let Some(x) = state.xwayland_view_mut(view) {
                let fullscreen = x.requested_fullscreen;
                x.set_fullscreen(fullscreen);
            }
        }
        SurfaceEvent::NewSubsurface(child) => state.subsurface_create(view, None, child),
        SurfaceEvent::NewPopup(popup) => {
            tracing::debug!(view = view.0, ?popup, "ignoring xdg popup on an X11 window");
        }
    }
}

fn handle_xwayland_map(state: &mut Cleave, view: ViewId, surface: &WlSurface) {
    state
        .listeners
        .add(surface, Signal::Commit, ListenerTarget::View(view));

    let Some(workspace) = state.current_workspace_ref() else {
        tracing::warn!(view = view.0, "no output to map X11 window on");
        return;
    };
    let location = state
        .output(workspace.output)
        .map(|output| output.location)
        .unwrap_or_default();
    if let Some(x) = state.xwayland_view_mut(view) {
        x.output_location = location;
    }
    state.view_map(view, surface, workspace);
    state.view_damage_whole(view);
}

fn handle_xwayland_commit(state: &mut Cleave, view: ViewId) {
    let Some(v) = state.view(view) else {
        return;
    };
    let (Some(root), Some(workspace)) = (v.surface.clone(), v.workspace) else {
        return;
    };
    let ViewShell::Xwayland(x) = &v.shell else {
        return;
    };
    let Some(output) = state.output(workspace.output) else {
        return;
    };
    let old = v.origin;
    let reported = x.window.geometry().loc - output.location;

    if reported == old {
        state.view_damage_part(view);
        return;
    }

    tracing::trace!(view = view.0, ?old, new = ?reported, "X11 window moved itself");
    let visible = state.view_is_visible(view);
    if let Some(v) = state.views.get_mut(&view) {
        v.origin = reported;
    }
    if !visible {
        return;
    }
    if let Some(output) = state.output_mut(workspace.output) {
        output.damage_surface(&root, old, true);
        output.damage_surface(&root, reported, true);
    }
}
