//! Views: one client window regardless of the protocol that produced it.
//!
//! Backend adapters own the protocol side and implement [`ViewImpl`]. This
//! module owns what is shared: mapping into a workspace, the child surface
//! tree, damage, focus and hit-testing.

use smithay::{
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Logical, Point, Rectangle},
    wayland::{compositor::get_children, shell::xdg::PopupSurface},
};

use crate::{
    handlers::{ListenerTarget, Signal, xdg_shell::XdgShellView},
    layout::Tile,
    output::OutputId,
    state::Cleave,
    surface::{SurfaceVisitor, offset_in_tree},
};

#[cfg(feature = "xwayland")]
use crate::handlers::xwayland::XwaylandView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    XdgShell,
    #[cfg(feature = "xwayland")]
    Xwayland,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkspaceRef {
    pub output: OutputId,
    pub workspace: usize,
}

/// Called with each popup's root surface and its box.
pub type PopupVisitor<'a> = dyn FnMut(&WlSurface, Rectangle<i32, Logical>) + 'a;

/// Operations every backend adapter provides.
///
/// Calls that change client-visible state only produce protocol traffic
/// when the state actually changes.
pub trait ViewImpl {
    fn title(&self) -> Option<String>;

    /// True for windows without a parent window.
    fn is_primary(&self) -> bool;

    fn activate(&mut self, activate: bool);

    fn close(&mut self);

    /// Ask the client to take a `width`x`height` size at `origin`.
    ///
    /// Returns output-local boxes that must be damaged before the window
    /// changes size.
    fn maximize(
        &mut self,
        origin: Point<i32, Logical>,
        width: i32,
        height: i32,
    ) -> Vec<Rectangle<i32, Logical>>;

    fn destroy(&mut self);

    fn for_each_surface(
        &self,
        root: &WlSurface,
        origin: Point<i32, Logical>,
        visitor: &mut SurfaceVisitor<'_>,
    );

    /// Protocols without popups keep the default, which visits nothing.
    fn for_each_popup(
        &self,
        _root: &WlSurface,
        _origin: Point<i32, Logical>,
        _visitor: &mut PopupVisitor<'_>,
    ) {
    }

    /// Hit-test relative to the view's origin.
    fn surface_at(
        &self,
        root: &WlSurface,
        point: Point<f64, Logical>,
    ) -> Option<(WlSurface, Point<f64, Logical>)>;

    /// Whether the window takes part in tiling.
    fn should_manage(&self) -> bool {
        true
    }

    /// Where an unmanaged window placed itself, in layout coordinates.
    fn requested_position(&self) -> Option<Point<i32, Logical>> {
        None
    }
}

#[derive(Debug)]
pub enum ViewShell {
    XdgShell(XdgShellView),
    #[cfg(feature = "xwayland")]
    Xwayland(XwaylandView),
}

impl ViewShell {
    pub fn kind(&self) -> ViewKind {
        match self {
            ViewShell::XdgShell(_) => ViewKind::XdgShell,
            #[cfg(feature = "xwayland")]
            ViewShell::Xwayland(_) => ViewKind::Xwayland,
        }
    }

    pub fn as_impl(&self) -> &dyn ViewImpl {
        match self {
            ViewShell::XdgShell(view) => view,
            #[cfg(feature = "xwayland")]
            ViewShell::Xwayland(view) => view,
        }
    }

    pub fn as_impl_mut(&mut self) -> &mut dyn ViewImpl {
        match self {
            ViewShell::XdgShell(view) => view,
            #[cfg(feature = "xwayland")]
            ViewShell::Xwayland(view) => view,
        }
    }
}

/// Runs when a child is torn down. The child has already been detached
/// from its view's tree.
pub type ChildDestroyFn = fn(&mut Cleave, ViewId, ViewChild);

#[derive(Debug)]
pub enum ViewChildKind {
    Subsurface,
    Popup(PopupSurface),
}

#[derive(Debug)]
pub struct ViewChild {
    pub surface: WlSurface,
    pub kind: ViewChildKind,
    pub children: Vec<ViewChild>,
    pub destroy: ChildDestroyFn,
}

impl ViewChild {
    fn find(&self, surface: &WlSurface) -> Option<&ViewChild> {
        if self.surface == *surface {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(surface))
    }

    fn find_mut(&mut self, surface: &WlSurface) -> Option<&mut ViewChild> {
        if self.surface == *surface {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(surface))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(ViewChild::count).sum::<usize>()
    }
}

fn take_from(children: &mut Vec<ViewChild>, surface: &WlSurface) -> Option<ViewChild> {
    if let Some(index) = children.iter().position(|child| child.surface == *surface) {
        return Some(children.remove(index));
    }
    children
        .iter_mut()
        .find_map(|child| take_from(&mut child.children, surface))
}

#[derive(Debug)]
pub struct View {
    pub id: ViewId,
    pub workspace: Option<WorkspaceRef>,
    /// Present while mapped.
    pub surface: Option<WlSurface>,
    /// Position in output coordinates.
    pub origin: Point<i32, Logical>,
    pub children: Vec<ViewChild>,
    pub shell: ViewShell,
}

impl View {
    pub fn kind(&self) -> ViewKind {
        self.shell.kind()
    }

    pub fn is_mapped(&self) -> bool {
        self.surface.is_some()
    }

    pub fn title(&self) -> Option<String> {
        self.shell.as_impl().title()
    }

    pub fn is_primary(&self) -> bool {
        self.shell.as_impl().is_primary()
    }

    pub fn for_each_surface(&self, visitor: &mut SurfaceVisitor<'_>) {
        if let Some(root) = &self.surface {
            self.shell
                .as_impl()
                .for_each_surface(root, self.origin, visitor);
        }
    }

    pub fn for_each_popup(&self, visitor: &mut PopupVisitor<'_>) {
        if let Some(root) = &self.surface {
            self.shell
                .as_impl()
                .for_each_popup(root, self.origin, visitor);
        }
    }

    pub fn child(&self, surface: &WlSurface) -> Option<&ViewChild> {
        self.children.iter().find_map(|child| child.find(surface))
    }

    pub fn child_mut(&mut self, surface: &WlSurface) -> Option<&mut ViewChild> {
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(surface))
    }

    /// Detach the child for `surface`, with its subtree, from the tree.
    pub fn take_child(&mut self, surface: &WlSurface) -> Option<ViewChild> {
        take_from(&mut self.children, surface)
    }

    /// Number of live children at any depth.
    pub fn child_count(&self) -> usize {
        self.children.iter().map(ViewChild::count).sum()
    }
}

impl Cleave {
    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    pub fn view_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.views.get_mut(&id)
    }

    /// The mapped view whose root surface is `surface`.
    pub fn view_for_surface(&self, surface: &WlSurface) -> Option<ViewId> {
        self.views
            .values()
            .find(|view| view.surface.as_ref() == Some(surface))
            .map(|view| view.id)
    }

    /// The view that tracks `surface` as a subsurface or popup.
    pub fn view_for_child(&self, surface: &WlSurface) -> Option<ViewId> {
        self.views
            .values()
            .find(|view| view.child(surface).is_some())
            .map(|view| view.id)
    }

    pub fn view_init(&mut self, shell: ViewShell) -> ViewId {
        self.next_view_id += 1;
        let id = ViewId(self.next_view_id);
        tracing::debug!(view = id.0, kind = ?shell.kind(), "view created");
        self.views.insert(
            id,
            View {
                id,
                workspace: None,
                surface: None,
                origin: Point::from((0, 0)),
                children: Vec::new(),
                shell,
            },
        );
        id
    }

    /// Put `id` on screen with `surface` as its root, in `workspace`.
    pub fn view_map(&mut self, id: ViewId, surface: &WlSurface, workspace: WorkspaceRef) {
        let Some(view) = self.views.get_mut(&id) else {
            return;
        };
        view.surface = Some(surface.clone());
        let manage = view.shell.as_impl().should_manage();
        let requested = view.shell.as_impl().requested_position();

        for subsurface in get_children(surface) {
            self.subsurface_create(id, None, subsurface);
        }
        self.listeners
            .add(surface, Signal::NewSubsurface, ListenerTarget::View(id));

        let Some(output) = self.output_mut(workspace.output) else {
            tracing::warn!(view = id.0, output = ?workspace.output, "mapping view on unknown output");
            return;
        };
        let output_location = output.location;
        let Some(ws) = output.workspaces.get_mut(workspace.workspace) else {
            return;
        };

        if manage {
            let tile = ws.focused_tile().clone();
            let displaced = ws.assign(tile.id, Some(id));
            if let Some(displaced) = displaced
                && displaced != id
            {
                tracing::debug!(view = displaced.0, "view lost its tile");
            }
            if let Some(view) = self.views.get_mut(&id) {
                view.workspace = Some(workspace);
            }
            self.view_maximize(id, &tile);
        } else {
            ws.add_unmanaged(id);
            if let Some(view) = self.views.get_mut(&id) {
                view.workspace = Some(workspace);
                if let Some(position) = requested {
                    view.origin = position - output_location;
                }
            }
        }

        tracing::debug!(view = id.0, manage, "view mapped");
        self.focus_view(Some(id));
    }

    /// Take `id` off screen and tear down its children. A no-op when the
    /// view is not mapped.
    pub fn view_unmap(&mut self, id: ViewId) {
        let Some(surface) = self.views.get(&id).and_then(|view| view.surface.clone()) else {
            return;
        };

        self.view_damage_whole(id);
        self.listeners.remove(&surface, Signal::NewSubsurface);

        let children = self
            .views
            .get_mut(&id)
            .map(|view| std::mem::take(&mut view.children))
            .unwrap_or_default();
        for child in children {
            (child.destroy)(self, id, child);
        }

        let workspace = self.views.get(&id).and_then(|view| view.workspace);
        if let Some(workspace) = workspace
            && let Some(output) = self.output_mut(workspace.output)
            && let Some(ws) = output.workspaces.get_mut(workspace.workspace)
        {
            ws.remove_view(id);
        }

        if let Some(view) = self.views.get_mut(&id) {
            view.surface = None;
        }

        if self.seat_focus == Some(id) {
            self.seat_focus = None;
            let next = workspace.and_then(|workspace| {
                let output = self.output(workspace.output)?;
                output.workspaces.get(workspace.workspace)?.focused_tile().view
            });
            self.focus_view(next);
        }
        tracing::debug!(view = id.0, "view unmapped");
    }

    /// Unmap if needed, then release the view and its adapter.
    pub fn view_destroy(&mut self, id: ViewId) {
        self.view_unmap(id);
        if let Some(mut view) = self.views.remove(&id) {
            view.shell.as_impl_mut().destroy();
        }
        let dangling = self.listeners.remove_view(id);
        if dangling > 0 {
            tracing::warn!(view = id.0, dangling, "view destroyed with listeners attached");
        }
        tracing::debug!(view = id.0, "view destroyed");
    }

    /// Move the view into `tile` and ask for the tile's size.
    pub fn view_maximize(&mut self, id: ViewId, tile: &Tile) {
        let Some(view) = self.views.get_mut(&id) else {
            return;
        };
        view.origin = tile.geometry.loc;
        let origin = view.origin;
        let damage = view.shell.as_impl_mut().maximize(
            origin,
            tile.geometry.size.w,
            tile.geometry.size.h,
        );

        if damage.is_empty() {
            return;
        }
        let Some(output) = view.workspace.map(|ws| ws.output) else {
            return;
        };
        if let Some(output) = self.output_mut(output) {
            for rect in damage {
                output.damage_box(rect);
            }
        }
    }

    pub fn view_is_visible(&self, id: ViewId) -> bool {
        let Some(view) = self.views.get(&id) else {
            return false;
        };
        let Some(workspace) = view.workspace else {
            return false;
        };
        if !view.is_mapped() {
            return false;
        }
        self.output(workspace.output).is_some_and(|output| {
            output.current_workspace == workspace.workspace
                && output.workspace().is_some_and(|ws| ws.contains_view(id))
        })
    }

    pub fn view_get_tile(&self, id: ViewId) -> Option<Tile> {
        let workspace = self.views.get(&id)?.workspace?;
        self.output(workspace.output)?
            .workspaces
            .get(workspace.workspace)?
            .tile_for_view(id)
            .cloned()
    }

    /// Damage every surface of the view at its full extent.
    pub fn view_damage_whole(&mut self, id: ViewId) {
        if !self.view_is_visible(id) {
            return;
        }
        let Some(view) = self.views.get(&id) else {
            return;
        };
        let Some(output) = view.workspace.map(|ws| ws.output) else {
            return;
        };

        let mut boxes = Vec::new();
        view.for_each_surface(&mut |_, _, rect| boxes.push(rect));
        if let Some(output) = self.output_mut(output) {
            for rect in boxes {
                output.damage_box(rect);
            }
        }
    }

    /// Damage what the view's surfaces reported in their last commit.
    pub fn view_damage_part(&mut self, id: ViewId) {
        if !self.view_is_visible(id) {
            return;
        }
        let Some(view) = self.views.get(&id) else {
            return;
        };
        let (Some(root), Some(workspace)) = (view.surface.clone(), view.workspace) else {
            return;
        };
        let origin = view.origin;
        if let Some(output) = self.output_mut(workspace.output) {
            output.damage_surface(&root, origin, false);
        }
    }

    /// Damage the surface tree of one child, placed relative to its view.
    pub fn view_damage_child(&mut self, id: ViewId, child: &WlSurface, whole: bool) {
        self.damage_child_at(id, child, Point::from((0, 0)), whole);
    }

    /// Damage a subsurface tree where it sat before moving by `shift`.
    pub fn view_damage_child_shifted(
        &mut self,
        id: ViewId,
        child: &WlSurface,
        shift: Point<i32, Logical>,
    ) {
        self.damage_child_at(id, child, shift, true);
    }

    fn damage_child_at(
        &mut self,
        id: ViewId,
        child: &WlSurface,
        shift: Point<i32, Logical>,
        whole: bool,
    ) {
        if !self.view_is_visible(id) {
            return;
        }
        let Some(view) = self.views.get(&id) else {
            return;
        };
        let (Some(root), Some(workspace)) = (view.surface.as_ref(), view.workspace) else {
            return;
        };
        let Some(offset) = offset_in_tree(root, child) else {
            return;
        };
        let origin = view.origin + offset + shift;
        if let Some(output) = self.output_mut(workspace.output) {
            output.damage_surface(child, origin, whole);
        }
    }

    /// Track `surface` as a child of `id`, under `parent` when given.
    ///
    /// Subsurfaces that already exist under `surface` get children of
    /// their own.
    pub fn view_child_init(
        &mut self,
        id: ViewId,
        parent: Option<&WlSurface>,
        surface: &WlSurface,
        kind: ViewChildKind,
        destroy: ChildDestroyFn,
    ) -> bool {
        let Some(view) = self.views.get_mut(&id) else {
            return false;
        };
        let child = ViewChild {
            surface: surface.clone(),
            kind,
            children: Vec::new(),
            destroy,
        };
        match parent.and_then(|parent| view.child_mut(parent)) {
            Some(parent) => parent.children.push(child),
            None => view.children.push(child),
        }

        let target = ListenerTarget::Child(id);
        self.listeners.add(surface, Signal::Commit, target);
        self.listeners.add(surface, Signal::NewSubsurface, target);

        for subsurface in get_children(surface) {
            self.subsurface_create(id, Some(surface), subsurface);
        }
        true
    }

    /// Tear down a detached child: its descendants first, then its own
    /// damage and listeners.
    pub fn view_child_finish(&mut self, id: ViewId, mut child: ViewChild) {
        for grandchild in std::mem::take(&mut child.children) {
            (grandchild.destroy)(self, id, grandchild);
        }
        self.view_damage_child(id, &child.surface, true);
        self.listeners.remove(&child.surface, Signal::Commit);
        self.listeners.remove(&child.surface, Signal::NewSubsurface);
    }

    pub fn subsurface_create(&mut self, id: ViewId, parent: Option<&WlSurface>, surface: WlSurface) {
        if self.view_child_init(id, parent, &surface, ViewChildKind::Subsurface, subsurface_destroy) {
            self.listeners
                .add(&surface, Signal::Destroy, ListenerTarget::Child(id));
        }
    }

    /// Run the destroy callback of the child that owns `surface`.
    pub fn view_child_destroyed(&mut self, id: ViewId, surface: &WlSurface) {
        let child = self
            .views
            .get_mut(&id)
            .and_then(|view| view.take_child(surface));
        if let Some(child) = child {
            (child.destroy)(self, id, child);
        }
    }

    pub fn view_activate(&mut self, id: ViewId, activate: bool) {
        if let Some(view) = self.views.get_mut(&id) {
            view.shell.as_impl_mut().activate(activate);
        }
    }

    pub fn view_close(&mut self, id: ViewId) {
        if let Some(view) = self.views.get_mut(&id) {
            view.shell.as_impl_mut().close();
        }
    }

    pub fn view_get_title(&self, id: ViewId) -> Option<String> {
        self.views.get(&id)?.title()
    }

    pub fn view_is_primary(&self, id: ViewId) -> bool {
        self.views.get(&id).is_some_and(View::is_primary)
    }

    /// Hit-test `point`, given in output coordinates, against the view.
    pub fn view_surface_at(
        &self,
        id: ViewId,
        point: Point<f64, Logical>,
    ) -> Option<(WlSurface, Point<f64, Logical>)> {
        let view = self.views.get(&id)?;
        let root = view.surface.as_ref()?;
        let local = point - view.origin.to_f64();
        view.shell.as_impl().surface_at(root, local)
    }

    /// Move keyboard focus, deactivating the previous view.
    pub fn focus_view(&mut self, id: Option<ViewId>) {
        if self.seat_focus == id {
            return;
        }
        if let Some(previous) = self.seat_focus.take() {
            self.view_activate(previous, false);
        }
        if let Some(id) = id
            && self.views.contains_key(&id)
        {
            self.view_activate(id, true);
            self.seat_focus = Some(id);
        }
    }
}

fn subsurface_destroy(state: &mut Cleave, view: ViewId, child: ViewChild) {
    state.listeners.remove(&child.surface, Signal::Destroy);
    state.view_child_finish(view, child);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestState, rect};
    use smithay::utils::Size;
    use std::cell::Cell;
    use wayland_protocols::xdg::shell::client::xdg_toplevel::State;

    thread_local! {
        static DESTROYED: Cell<usize> = const { Cell::new(0) };
    }

    fn counting_destroy(state: &mut Cleave, view: ViewId, child: ViewChild) {
        assert!(state.view(view).is_some(), "child outlived its view");
        DESTROYED.with(|count| count.set(count.get() + 1));
        state.view_child_finish(view, child);
    }

    #[test]
    fn destroying_view_runs_every_child_callback_first() {
        let mut t = TestState::new(800, 600);
        let window = t.xdg_window(200, 100);

        let a = t.bare_surface().server;
        let b = t.bare_surface().server;
        let c = t.bare_surface().server;
        t.state.view_child_init(window.view, None, &a, ViewChildKind::Subsurface, counting_destroy);
        t.state.view_child_init(window.view, Some(&a), &b, ViewChildKind::Subsurface, counting_destroy);
        t.state.view_child_init(window.view, None, &c, ViewChildKind::Subsurface, counting_destroy);
        assert_eq!(t.state.view(window.view).unwrap().child_count(), 3);
        assert_eq!(t.state.view_for_child(&b), Some(window.view));

        DESTROYED.with(|count| count.set(0));
        t.destroy_window(window.clone());

        assert_eq!(DESTROYED.with(Cell::get), 3);
        assert!(t.state.view(window.view).is_none());
        assert_eq!(t.state.listeners.count_for_view(window.view), 0);
    }

    #[test]
    fn map_places_view_in_focused_tile_and_focuses_it() {
        let mut t = TestState::new(800, 600);
        let window = t.xdg_window(800, 600);

        let tile = t.state.view_get_tile(window.view).unwrap();
        assert_eq!(tile.geometry.size, Size::from((800, 600)));
        assert_eq!(t.state.seat_focus, Some(window.view));
        assert!(t.state.view_is_visible(window.view));
        assert_eq!(t.state.view_for_surface(&window.server), Some(window.view));
        assert_eq!(t.state.view_get_title(window.view), None);
        assert!(t.state.view_is_primary(window.view));
    }

    #[test]
    fn unmap_damages_whole_view_and_clears_focus() {
        let mut t = TestState::new(800, 600);
        let window = t.xdg_window(300, 200);
        t.render();

        t.remove_buffer(&window.surface);

        let out = t.state.output(t.output).unwrap();
        assert!(out.damage.covers(rect(0, 0, 300, 200)));
        assert_eq!(t.state.seat_focus, None);
        assert!(!t.state.view_is_visible(window.view));
        assert!(t.state.view(window.view).is_some());
    }

    #[test]
    fn focus_moves_activation() {
        let mut t = TestState::new(800, 600);
        let first = t.xdg_window(100, 100);
        let second = t.xdg_window(100, 100);
        assert_eq!(t.state.seat_focus, Some(second.view));

        t.state.focus_view(Some(first.view));
        t.roundtrip();
        let activated = |t: &TestState, window: &crate::test_support::ClientWindow| {
            t.toplevel_configures(&window.toplevel)
                .last()
                .is_some_and(|configure| configure.states.contains(&State::Activated))
        };
        assert!(activated(&t, &first));
        assert!(!activated(&t, &second));
    }

    #[test]
    fn surface_at_is_relative_to_view_origin() {
        let mut t = TestState::new(800, 600);
        let window = t.xdg_window(800, 600);
        let hit = t.state.view_surface_at(window.view, Point::from((10.0, 20.0)));
        assert_eq!(hit, Some((window.server.clone(), Point::from((10.0, 20.0)))));
        assert_eq!(t.state.view_surface_at(window.view, Point::from((900.0, 20.0))), None);
    }
}
