//! Native shell adapter: xdg toplevels, popups and decorations.

use smithay::{
    delegate_xdg_decoration, delegate_xdg_shell,
    desktop::{PopupKind, get_popup_toplevel_coords},
    reexports::{
        wayland_protocols::xdg::{
            decoration::zv1::server::zxdg_toplevel_decoration_v1::Mode as DecorationMode,
            shell::server::xdg_toplevel,
        },
        wayland_server::{
            Resource,
            protocol::{wl_output::WlOutput, wl_seat, wl_surface::WlSurface},
        },
    },
    utils::{Logical, Point, Rectangle, Serial, Size},
    wayland::{
        compositor::with_states,
        shell::xdg::{
            PopupSurface, PositionerState, ToplevelState, ToplevelSurface, XdgShellHandler,
            XdgShellState, XdgToplevelSurfaceData, decoration::XdgDecorationHandler,
        },
    },
};

use crate::{
    state::Cleave,
    surface::{SurfaceVisitor, for_each_popup, for_each_surface_and_popup, surface_at, window_geometry_offset},
    view::{PopupVisitor, ViewChild, ViewChildKind, ViewId, ViewImpl, ViewShell},
};

use super::{ListenerTarget, Signal, SurfaceEvent};

const TILED: [xdg_toplevel::State; 4] = [
    xdg_toplevel::State::TiledLeft,
    xdg_toplevel::State::TiledRight,
    xdg_toplevel::State::TiledTop,
    xdg_toplevel::State::TiledBottom,
];

#[derive(Debug)]
pub struct XdgShellView {
    toplevel: ToplevelSurface,
    close_requested: bool,
}

impl XdgShellView {
    pub fn new(toplevel: ToplevelSurface) -> Self {
        Self {
            toplevel,
            close_requested: false,
        }
    }

    pub fn toplevel(&self) -> &ToplevelSurface {
        &self.toplevel
    }

    pub fn app_id(&self) -> Option<String> {
        with_states(self.toplevel.wl_surface(), |states| {
            states
                .data_map
                .get::<XdgToplevelSurfaceData>()
                .and_then(|data| data.lock().ok()?.app_id.clone())
        })
    }

    pub fn set_fullscreen(&self, fullscreen: bool) -> bool {
        self.update(|state| {
            if fullscreen {
                state.states.set(xdg_toplevel::State::Fullscreen);
            } else {
                state.states.unset(xdg_toplevel::State::Fullscreen);
            }
        })
    }

    pub fn set_decoration(&self, mode: DecorationMode) -> bool {
        self.update(|state| state.decoration_mode = Some(mode))
    }

    /// Apply `f` to the pending state and configure the client if anything
    /// changed. Before the initial configure the change just rides along
    /// with it.
    fn update(&self, f: impl FnOnce(&mut ToplevelState)) -> bool {
        if !self.toplevel.alive() {
            return false;
        }
        self.toplevel.with_pending_state(f);
        if !self.toplevel.is_initial_configure_sent() {
            return false;
        }
        self.toplevel.send_pending_configure().is_some()
    }
}

impl ViewImpl for XdgShellView {
    fn title(&self) -> Option<String> {
        with_states(self.toplevel.wl_surface(), |states| {
            states
                .data_map
                .get::<XdgToplevelSurfaceData>()
                .and_then(|data| data.lock().ok()?.title.clone())
        })
    }

    fn is_primary(&self) -> bool {
        self.toplevel.parent().is_none()
    }

    fn activate(&mut self, activate: bool) {
        self.update(|state| {
            if activate {
                state.states.set(xdg_toplevel::State::Activated);
            } else {
                state.states.unset(xdg_toplevel::State::Activated);
            }
        });
    }

    fn close(&mut self) {
        if self.close_requested || !self.toplevel.alive() {
            return;
        }
        self.close_requested = true;
        self.toplevel.send_close();
    }

    fn maximize(
        &mut self,
        _origin: Point<i32, Logical>,
        width: i32,
        height: i32,
    ) -> Vec<Rectangle<i32, Logical>> {
        self.update(|state| {
            state.size = Some(Size::from((width, height)));
            for edge in TILED {
                state.states.set(edge);
            }
        });
        Vec::new()
    }

    fn destroy(&mut self) {
        tracing::trace!(surface = ?self.toplevel.wl_surface().id(), "xdg toplevel released");
    }

    fn for_each_surface(
        &self,
        root: &WlSurface,
        origin: Point<i32, Logical>,
        visitor: &mut SurfaceVisitor<'_>,
    ) {
        for_each_surface_and_popup(root, origin, visitor);
    }

    fn for_each_popup(
        &self,
        root: &WlSurface,
        origin: Point<i32, Logical>,
        visitor: &mut PopupVisitor<'_>,
    ) {
        for_each_popup(root, origin, &mut |popup, rect| visitor(popup.wl_surface(), rect));
    }

    fn surface_at(
        &self,
        root: &WlSurface,
        point: Point<f64, Logical>,
    ) -> Option<(WlSurface, Point<f64, Logical>)> {
        surface_at(root, point, true)
    }
}

impl XdgShellHandler for Cleave {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.xdg_shell_state
    }

    /// The view maps on the first commit that carries a buffer.
    fn new_toplevel(&mut self, surface: ToplevelSurface) {
        let root = surface.wl_surface().clone();
        let view = self.view_init(ViewShell::XdgShell(XdgShellView::new(surface)));
        let target = ListenerTarget::View(view);
        for signal in [
            Signal::Map,
            Signal::Unmap,
            Signal::Destroy,
            Signal::RequestFullscreen,
        ] {
            self.listeners.add(&root, signal, target);
        }
    }

    fn new_popup(&mut self, surface: PopupSurface, positioner: PositionerState) {
        surface.with_pending_state(|state| state.geometry = positioner.get_geometry());
        if let Err(err) = self.popups.track_popup(PopupKind::Xdg(surface.clone())) {
            tracing::warn!("error while tracking popup: {err:?}");
        }
        let Some(parent) = surface.get_parent_surface() else {
            return;
        };
        self.emit(&parent, SurfaceEvent::NewPopup(surface));
    }

    fn grab(&mut self, _surface: PopupSurface, _seat: wl_seat::WlSeat, _serial: Serial) {}

    fn reposition_request(&mut self, surface: PopupSurface, positioner: PositionerState, token: u32) {
        surface.with_pending_state(|state| {
            state.geometry = positioner.get_geometry();
            state.positioner = positioner;
        });
        if let Some(view) = self.view_for_child(surface.wl_surface()) {
            self.unconstrain_popup(view, &surface);
        }
        surface.send_repositioned(token);
        if let Err(err) = surface.send_configure() {
            tracing::warn!("failed to configure repositioned popup: {err:?}");
        }
    }

    fn fullscreen_request(&mut self, surface: ToplevelSurface, _output: Option<WlOutput>) {
        self.emit(surface.wl_surface(), SurfaceEvent::RequestFullscreen(true));
    }

    fn unfullscreen_request(&mut self, surface: ToplevelSurface) {
        self.emit(surface.wl_surface(), SurfaceEvent::RequestFullscreen(false));
    }

    fn toplevel_destroyed(&mut self, surface: ToplevelSurface) {
        self.emit(surface.wl_surface(), SurfaceEvent::Destroy);
    }

    fn popup_destroyed(&mut self, surface: PopupSurface) {
        self.emit(surface.wl_surface(), SurfaceEvent::Destroy);
    }
}

delegate_xdg_shell!(Cleave);

impl XdgDecorationHandler for Cleave {
    fn new_decoration(&mut self, toplevel: ToplevelSurface) {
        self.xdg_decoration_request(&toplevel, None);
    }

    fn request_mode(&mut self, toplevel: ToplevelSurface, mode: DecorationMode) {
        self.xdg_decoration_request(&toplevel, Some(mode));
    }

    fn unset_mode(&mut self, toplevel: ToplevelSurface) {
        self.xdg_decoration_request(&toplevel, None);
    }
}

delegate_xdg_decoration!(Cleave);

impl Cleave {
    pub fn xdg_view(&self, view: ViewId) -> Option<&XdgShellView> {
        match &self.view(view)?.shell {
            ViewShell::XdgShell(xdg) => Some(xdg),
            #[cfg(feature = "xwayland")]
            _ => None,
        }
    }

    pub fn xdg_view_mut(&mut self, view: ViewId) -> Option<&mut XdgShellView> {
        match &mut self.view_mut(view)?.shell {
            ViewShell::XdgShell(xdg) => Some(xdg),
            #[cfg(feature = "xwayland")]
            _ => None,
        }
    }

    /// The view whose toplevel role lives on `surface`, mapped or not.
    pub fn xdg_view_for_toplevel(&self, surface: &WlSurface) -> Option<ViewId> {
        self.views.values().find_map(|view| match &view.shell {
            ViewShell::XdgShell(xdg) if xdg.toplevel().wl_surface() == surface => Some(view.id),
            _ => None,
        })
    }

    /// Decoration negotiation always ends in server-side mode.
    pub fn xdg_decoration_request(
        &mut self,
        toplevel: &ToplevelSurface,
        requested: Option<DecorationMode>,
    ) -> DecorationMode {
        let mode = DecorationMode::ServerSide;
        tracing::debug!(?requested, ?mode, "xdg decoration negotiated");
        toplevel.with_pending_state(|state| state.decoration_mode = Some(mode));
        // A fresh decoration object needs a configure even when nothing else
        // changed.
        if toplevel.is_initial_configure_sent() {
            toplevel.send_configure();
        }
        mode
    }

    /// Keep the popup on the output under its anchor, falling back to the
    /// output of its view.
    fn unconstrain_popup(&mut self, view: ViewId, popup: &PopupSurface) {
        let Some(v) = self.view(view) else {
            return;
        };
        let (Some(root), Some(workspace)) = (v.surface.as_ref(), v.workspace) else {
            return;
        };
        let Some(view_output) = self.output(workspace.output) else {
            return;
        };

        // The positioner works relative to the popup's parent geometry.
        let window_origin = view_output.location + v.origin + window_geometry_offset(root);
        let parent_origin = window_origin + get_popup_toplevel_coords(&PopupKind::Xdg(popup.clone()));
        let anchor = parent_origin + popup.with_pending_state(|state| state.geometry.loc);
        let mut target = self
            .output_at(anchor.to_f64())
            .and_then(|id| self.output(id))
            .unwrap_or(view_output)
            .layout_box();
        target.loc -= parent_origin;

        let geometry = popup.with_pending_state(|state| {
            state.geometry = state.positioner.get_unconstrained_geometry(target);
            state.geometry
        });
        tracing::trace!(surface = ?popup.wl_surface().id(), ?target, ?geometry, "popup unconstrained");

        if popup.is_initial_configure_sent()
            && let Err(err) = popup.send_configure()
        {
            tracing::warn!("failed to configure popup: {err:?}");
        }
    }
}

/// Send initial configures and keep the popup manager current.
pub(super) fn handle_commit(state: &mut Cleave, surface: &WlSurface) {
    if let Some(view) = state.xdg_view_for_toplevel(surface)
        && let Some(xdg) = state.xdg_view(view)
        && !xdg.toplevel().is_initial_configure_sent()
    {
        xdg.toplevel().send_configure();
    }

    state.popups.commit(surface);
    if let Some(PopupKind::Xdg(popup)) = state.popups.find_popup(surface)
        && !popup.is_initial_configure_sent()
        && let Err(err) = popup.send_configure()
    {
        tracing::warn!("initial popup configure failed: {err:?}");
    }
}

pub(super) fn handle_xdg_toplevel_event(
    state: &mut Cleave,
    view: ViewId,
    surface: &WlSurface,
    event: SurfaceEvent,
) {
    match event {
        SurfaceEvent::Map => handle_xdg_map(state, view, surface),
        SurfaceEvent::Unmap => handle_xdg_unmap(state, view, surface),
        SurfaceEvent::Destroy => handle_xdg_destroy(state, view, surface),
        SurfaceEvent::Commit => state.view_damage_part(view),
        SurfaceEvent::RequestFullscreen(fullscreen) => {
            if let Some(xdg) = state.xdg_view(view) {
                xdg.set_fullscreen(fullscreen);
            }
        }
        SurfaceEvent::NewPopup(popup) => xdg_popup_create(state, view, None, popup),
        SurfaceEvent::NewSubsurface(child) => state.subsurface_create(view, None, child),
    }
}

fn handle_xdg_map(state: &mut Cleave, view: ViewId, surface: &WlSurface) {
    let target = ListenerTarget::View(view);
    state.listeners.add(surface, Signal::Commit, target);
    state.listeners.add(surface, Signal::NewPopup, target);

    let Some(workspace) = state.current_workspace_ref() else {
        tracing::warn!(view = view.0, "no output to map view on");
        return;
    };
    state.view_map(view, surface, workspace);
    state.view_damage_whole(view);
}

fn handle_xdg_unmap(state: &mut Cleave, view: ViewId, surface: &WlSurface) {
    state.listeners.remove(surface, Signal::NewPopup);
    state.listeners.remove(surface, Signal::Commit);
    state.view_unmap(view);
}

fn handle_xdg_destroy(state: &mut Cleave, view: ViewId, surface: &WlSurface) {
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

pub(super) fn handle_xdg_popup_map_change(state: &mut Cleave, view: ViewId) {
    state.view_damage_whole(view);
}

/// Track `popup` as a child of `view`, nested under `parent` when the popup
/// belongs to another popup, and place it against its output.
pub(super) fn xdg_popup_create(
    state: &mut Cleave,
    view: ViewId,
    parent: Option<&WlSurface>,
    popup: PopupSurface,
) {
    let surface = popup.wl_surface().clone();
    let kind = ViewChildKind::Popup(popup.clone());
    if !state.view_child_init(view, parent, &surface, kind, xdg_popup_destroy) {
        return;
    }
    let target = ListenerTarget::Child(view);
    for signal in [Signal::Destroy, Signal::Map, Signal::Unmap, Signal::NewPopup] {
        state.listeners.add(&surface, signal, target);
    }
    state.unconstrain_popup(view, &popup);
}

fn xdg_popup_destroy(state: &mut Cleave, view: ViewId, child: ViewChild) {
    state.view_damage_child(view, &child.surface, true);
    for signal in [Signal::Destroy, Signal::Map, Signal::Unmap, Signal::NewPopup] {
        state.listeners.remove(&child.surface, signal);
    }
    state.view_child_finish(view, child);
}
