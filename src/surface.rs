//! Per-surface render state and the surface tree walkers.
//!
//! Subsurfaces are part of the tree drawn with their parent. Popups hang
//! off a root surface and are only reached through the popup walk, which
//! goes through the popup manager's bookkeeping.

use std::{cell::RefCell, time::Duration};

use smithay::{
    desktop::{PopupKind, PopupManager},
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Logical, Point, Rectangle, Size, Transform},
    wayland::{
        compositor::{
            SubsurfaceCachedState, SurfaceAttributes, SurfaceData, TraversalAction, with_states,
            with_surface_tree_downward,
        },
        shell::xdg::SurfaceCachedState,
    },
};

use crate::render_helpers::TextureId;

/// What the compositor keeps about a surface's content, stored in the
/// surface's data map.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceRenderState {
    pub texture: Option<TextureId>,
    pub size: Size<i32, Logical>,
    pub buffer_transform: Transform,
    /// Surface-local damage from the most recent commit.
    pub damage: Vec<Rectangle<i32, Logical>>,
    /// Subsurface offset as of the last commit that touched this tree.
    pub placed_at: Point<i32, Logical>,
}

impl Default for SurfaceRenderState {
    fn default() -> Self {
        Self {
            texture: None,
            size: Size::from((0, 0)),
            buffer_transform: Transform::Normal,
            damage: Vec::new(),
            placed_at: Point::from((0, 0)),
        }
    }
}

type RenderStateCell = RefCell<SurfaceRenderState>;

fn read_render_state(states: &SurfaceData) -> SurfaceRenderState {
    states
        .data_map
        .get::<RenderStateCell>()
        .map(|cell| cell.borrow().clone())
        .unwrap_or_default()
}

/// A copy of the render state of `surface`. Surfaces that never committed
/// content report the default.
pub fn render_state(surface: &WlSurface) -> SurfaceRenderState {
    with_states(surface, read_render_state)
}

pub fn has_texture(surface: &WlSurface) -> bool {
    with_states(surface, |states| {
        states
            .data_map
            .get::<RenderStateCell>()
            .is_some_and(|cell| cell.borrow().texture.is_some())
    })
}

pub fn update_render_state<T>(
    surface: &WlSurface,
    f: impl FnOnce(&mut SurfaceRenderState) -> T,
) -> T {
    with_states(surface, |states| update_render_state_in(states, f))
}

/// [`update_render_state`] for callers that already hold the surface's
/// states, such as tree walks.
pub fn update_render_state_in<T>(
    states: &SurfaceData,
    f: impl FnOnce(&mut SurfaceRenderState) -> T,
) -> T {
    states.data_map.insert_if_missing(RenderStateCell::default);
    match states.data_map.get::<RenderStateCell>() {
        Some(cell) => f(&mut cell.borrow_mut()),
        None => f(&mut SurfaceRenderState::default()),
    }
}

/// Offset of `surface` from its parent as the client last committed it.
pub fn subsurface_offset(states: &SurfaceData) -> Point<i32, Logical> {
    states
        .cached_state
        .get::<SubsurfaceCachedState>()
        .current()
        .location
}

/// Offset of `surface` from its parent. The walk root sits at the origin
/// it was given.
fn own_offset(surface: &WlSurface, root: &WlSurface, states: &SurfaceData) -> Point<i32, Logical> {
    if surface == root {
        return Point::from((0, 0));
    }
    subsurface_offset(states)
}

/// Where the client says its window starts inside the root surface.
pub fn window_geometry_offset(surface: &WlSurface) -> Point<i32, Logical> {
    with_states(surface, |states| {
        states
            .cached_state
            .get::<SurfaceCachedState>()
            .current()
            .geometry
            .map(|geometry| geometry.loc)
            .unwrap_or_default()
    })
}

/// Called with each surface, its render state and its box.
///
/// The walk holds the surface's state lock while the visitor runs, so the
/// visitor must not call back into `with_states` for the same surface.
pub type SurfaceVisitor<'a> = dyn FnMut(&WlSurface, &SurfaceRenderState, Rectangle<i32, Logical>) + 'a;

/// Visit `root` and its subsurfaces in stacking order, parents before the
/// children stacked above them. Each box is the surface's extent offset by
/// `origin` plus every subsurface offset on the way down. Popups are not
/// visited.
pub fn for_each_surface(
    root: &WlSurface,
    origin: Point<i32, Logical>,
    visitor: &mut SurfaceVisitor<'_>,
) {
    with_surface_tree_downward(
        root,
        origin,
        |surface, states, parent| {
            TraversalAction::DoChildren(*parent + own_offset(surface, root, states))
        },
        |surface, states, parent| {
            let location = *parent + own_offset(surface, root, states);
            let render = read_render_state(states);
            visitor(surface, &render, Rectangle::new(location, render.size));
        },
        |_, _, _| true,
    );
}

/// Visit every popup tracked under `root`, nested popups included. Only
/// popup roots are reported; their subsurfaces are reached with
/// [`for_each_surface`].
pub fn for_each_popup(
    root: &WlSurface,
    origin: Point<i32, Logical>,
    visitor: &mut dyn FnMut(&PopupKind, Rectangle<i32, Logical>),
) {
    let geometry = window_geometry_offset(root);
    for (popup, offset) in PopupManager::popups_for_surface(root) {
        let location = origin + geometry + offset - popup.geometry().loc;
        let size = render_state(popup.wl_surface()).size;
        visitor(&popup, Rectangle::new(location, size));
    }
}

/// The surface tree followed by every popup's surface tree.
pub fn for_each_surface_and_popup(
    root: &WlSurface,
    origin: Point<i32, Logical>,
    visitor: &mut SurfaceVisitor<'_>,
) {
    for_each_surface(root, origin, visitor);
    let mut popups = Vec::new();
    for_each_popup(root, origin, &mut |popup, rect| {
        popups.push((popup.wl_surface().clone(), rect.loc));
    });
    for (popup, location) in popups {
        for_each_surface(&popup, location, visitor);
    }
}

/// Answer the pending frame callbacks of every surface in the tree under
/// `root`. `time` is the compositor clock.
pub fn send_frame_callbacks(root: &WlSurface, time: Duration) {
    let time = time.as_millis() as u32;
    with_surface_tree_downward(
        root,
        (),
        |_, _, _| TraversalAction::DoChildren(()),
        |_, states, _| {
            let mut attributes = states.cached_state.get::<SurfaceAttributes>();
            for callback in attributes.current().frame_callbacks.drain(..) {
                callback.done(time);
            }
        },
        |_, _, _| true,
    );
}

/// Where `target` sits relative to `root`'s origin, looking through
/// subsurfaces and popups.
pub fn offset_in_tree(root: &WlSurface, target: &WlSurface) -> Option<Point<i32, Logical>> {
    let mut found = None;
    for_each_surface_and_popup(root, Point::from((0, 0)), &mut |surface, _, rect| {
        if found.is_none() && surface == target {
            found = Some(rect.loc);
        }
    });
    found
}

/// Topmost surface under `point`, which is relative to `root`'s origin.
///
/// Popups are checked before the surface tree, newest first. The returned
/// point is local to the surface that was hit.
pub fn surface_at(
    root: &WlSurface,
    point: Point<f64, Logical>,
    with_popups: bool,
) -> Option<(WlSurface, Point<f64, Logical>)> {
    let origin = Point::from((0, 0));
    let mut candidates = Vec::new();
    for_each_surface(root, origin, &mut |surface, _, rect| {
        candidates.push((surface.clone(), rect));
    });
    if with_popups {
        let mut popups = Vec::new();
        for_each_popup(root, origin, &mut |popup, rect| {
            popups.push((popup.wl_surface().clone(), rect.loc));
        });
        for (popup, location) in popups {
            for_each_surface(&popup, location, &mut |surface, _, rect| {
                candidates.push((surface.clone(), rect));
            });
        }
    }

    candidates
        .into_iter()
        .rev()
        .find(|(_, rect)| !rect.is_empty() && rect.to_f64().contains(point))
        .map(|(surface, rect)| (surface, point - rect.loc.to_f64()))
}
