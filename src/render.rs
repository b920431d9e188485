//! The per-output render pass.
//!
//! Draw order is fixed: background over the damage, tiles from the focused
//! one around the cycle, unmanaged views oldest first, popups of the
//! focused view, messages, drag icons, then software cursors.

use smithay::{
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Logical, Physical, Point, Rectangle, Size, Transform},
};

use crate::{
    damage::DamageRegion,
    output::OutputId,
    render_helpers::{Matrix, Renderer, TextureId},
    state::Cleave,
    surface::{SurfaceRenderState, for_each_surface, render_state, send_frame_callbacks},
    view::ViewId,
};

const DEBUG_DAMAGE_COLOR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

struct RenderCtx<'a> {
    /// Output damage for this frame, in output pixels.
    damage: &'a DamageRegion,
    scale: f64,
    /// Inverse of the output transform.
    inverse: Transform,
    /// Transformed output resolution.
    bounds: Size<i32, Physical>,
    projection: Matrix,
}

impl RenderCtx<'_> {
    fn scissor(&self, renderer: &mut dyn Renderer, rect: Rectangle<i32, Physical>) {
        renderer.scissor(Some(self.inverse.transform_rect_in(rect, &self.bounds)));
    }

    /// Draw `texture` wherever `rect` overlaps this frame's damage.
    fn render_texture(
        &self,
        renderer: &mut dyn Renderer,
        texture: TextureId,
        rect: Rectangle<i32, Physical>,
        matrix: &Matrix,
    ) {
        for piece in self.damage.intersect(rect) {
            self.scissor(renderer, piece);
            if let Err(err) = renderer.render_texture_with_matrix(texture, matrix, 1.0) {
                tracing::warn!(?texture, "failed to render texture: {err}");
                return;
            }
        }
    }

    fn render_surface(
        &self,
        renderer: &mut dyn Renderer,
        surface: &WlSurface,
        state: &SurfaceRenderState,
        rect: Rectangle<i32, Logical>,
        clip: Option<Rectangle<i32, Physical>>,
    ) {
        let Some(texture) = state.texture else {
            tracing::trace!(?surface, "cannot obtain surface texture");
            return;
        };

        let target: Rectangle<i32, Physical> = rect.to_physical_precise_round(self.scale);
        let matrix = Matrix::project_box(target, state.buffer_transform.invert(), &self.projection);
        let visible = match clip {
            Some(clip) => match target.intersection(clip) {
                Some(visible) => visible,
                None => return,
            },
            None => target,
        };
        self.render_texture(renderer, texture, visible, &matrix);
    }

    /// Draw the surface tree under `root` without popups.
    fn render_tree(
        &self,
        renderer: &mut dyn Renderer,
        root: &WlSurface,
        origin: Point<i32, Logical>,
        clip: Option<Rectangle<i32, Physical>>,
    ) {
        for_each_surface(root, origin, &mut |surface, state, rect| {
            self.render_surface(renderer, surface, state, rect, clip);
        });
    }
}

/// Views in tiles whose surface no longer matches the tile size.
fn resized_views(state: &Cleave, output: OutputId) -> Vec<ViewId> {
    let Some(out) = state.output(output) else {
        return Vec::new();
    };
    let Some(workspace) = out.workspace() else {
        return Vec::new();
    };
    workspace
        .tiles()
        .iter()
        .filter_map(|tile| {
            let view = tile.view?;
            let root = state.view(view)?.surface.as_ref()?;
            let size = render_state(root).size;
            (size != tile.geometry.size).then_some(view)
        })
        .collect()
}

/// Render and commit one frame on `output`.
///
/// Returns false when the output is unknown or the commit failed. A failed
/// commit is logged and the next frame proceeds normally.
pub fn render_output(state: &mut Cleave, output: OutputId) -> bool {
    for view in resized_views(state, output) {
        state.view_damage_whole(view);
    }
    if !draw_and_commit(state, output) {
        return false;
    }
    send_frames(state, output);
    true
}

/// Let every client drawn on `output` know the frame is out.
fn send_frames(state: &Cleave, output: OutputId) {
    let Some(out) = state.output(output) else {
        return;
    };
    let time = state.start_time.elapsed();
    let mut roots = Vec::new();
    if let Some(workspace) = out.workspace() {
        let tiled = workspace.tiles().iter().filter_map(|tile| tile.view);
        for id in tiled.chain(workspace.unmanaged_views().iter().copied()) {
            if let Some(root) = state.view(id).and_then(|view| view.surface.clone()) {
                roots.push(root);
            }
        }
    }
    if let Some(view) = state.seat_focus.and_then(|id| state.view(id))
        && view.workspace.is_some_and(|ws| {
            ws.output == output && ws.workspace == out.current_workspace
        })
    {
        view.for_each_popup(&mut |popup, _| roots.push(popup.clone()));
    }
    roots.extend(state.drag_icons.iter().map(|icon| icon.surface.clone()));

    for root in &roots {
        send_frame_callbacks(root, time);
    }
}

fn draw_and_commit(state: &mut Cleave, output: OutputId) -> bool {
    let debug = state.config.debug_damage_tracking;
    let background = state.config.background;
    let focused = state.seat_focus;
    let Cleave {
        outputs,
        views,
        renderer,
        drag_icons,
        ..
    } = state;
    let Some(out) = outputs.iter_mut().find(|o| o.id == output) else {
        tracing::warn!(?output, "render requested for unknown output");
        return false;
    };

    let damage = out.damage.take();
    let mode = out.mode.size;
    let transformed = out.transformed_resolution();
    let inverse = out.transform.invert();
    let ctx = RenderCtx {
        damage: &damage,
        scale: out.scale,
        inverse,
        bounds: transformed,
        projection: Matrix::projection(mode.w, mode.h, out.transform),
    };
    let renderer = renderer.as_mut();

    renderer.begin(mode.w, mode.h);

    if damage.is_empty() {
        tracing::trace!(output = %out.name, "output isn't damaged but needs a buffer swap");
    } else {
        if debug {
            renderer.scissor(None);
            renderer.clear(DEBUG_DAMAGE_COLOR);
        }
        for rect in damage.rects() {
            ctx.scissor(renderer, *rect);
            renderer.clear(background);
        }

        if let Some(workspace) = out.workspace() {
            for tile in workspace.tile_cycle() {
                let Some(view) = tile.view.and_then(|id| views.get(&id)) else {
                    continue;
                };
                if let Some(root) = &view.surface {
                    let clip = tile.geometry.to_physical_precise_round(ctx.scale);
                    ctx.render_tree(renderer, root, view.origin, Some(clip));
                }
            }

            // Newest last, so it ends up on top.
            for id in workspace.unmanaged_views().iter().rev() {
                if let Some(view) = views.get(id)
                    && let Some(root) = &view.surface
                {
                    ctx.render_tree(renderer, root, view.origin, None);
                }
            }
        }

        if let Some(view) = focused.and_then(|id| views.get(&id))
            && view.workspace.is_some_and(|ws| {
                ws.output == output && ws.workspace == out.current_workspace
            })
        {
            let mut popups = Vec::new();
            view.for_each_popup(&mut |popup, rect| popups.push((popup.clone(), rect.loc)));
            for (popup, loc) in popups {
                ctx.render_tree(renderer, &popup, loc, None);
            }
        }

        for message in out.messages.iter().rev() {
            let matrix = Matrix::project_box(message.position, Transform::Normal, &ctx.projection);
            ctx.render_texture(renderer, message.texture, message.position, &matrix);
        }

        for icon in drag_icons.iter() {
            ctx.render_tree(renderer, &icon.surface, icon.position - out.location, None);
        }
    }

    let mut frame_damage = damage.transformed(inverse);
    if debug {
        frame_damage.add_whole();
    }

    out.presentation
        .render_software_cursors(renderer, &frame_damage);
    renderer.scissor(None);
    renderer.end();

    out.presentation.set_damage(&frame_damage);
    if !out.presentation.commit() {
        tracing::error!(output = %out.name, "could not commit output");
        return false;
    }
    true
}
