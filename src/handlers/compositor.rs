use smithay::{
    delegate_compositor, delegate_shm,
    reexports::wayland_server::{
        Client, Resource,
        protocol::{wl_buffer::WlBuffer, wl_shm, wl_surface::WlSurface},
    },
    utils::{Buffer, Logical, Point, Rectangle, Size, Transform},
    wayland::{
        buffer::BufferHandler,
        compositor::{
            BufferAssignment, CompositorClientState, CompositorHandler, CompositorState, Damage,
            SurfaceAttributes, TraversalAction, is_sync_subsurface, with_states,
            with_surface_tree_downward,
        },
        shm::{ShmHandler, ShmState, with_buffer_contents},
    },
};

use crate::{
    CompositorError, Result,
    render_helpers::{PixelFormat, TextureId},
    state::{ClientState, Cleave, DragIcon},
    surface::{
        SurfaceRenderState, has_texture, subsurface_offset, update_render_state,
        update_render_state_in,
    },
};

use super::{ListenerTarget, Signal, SurfaceEvent, xdg_shell};

#[cfg(feature = "xwayland")]
use smithay::xwayland::{X11Wm, XWaylandClientData};

impl CompositorHandler for Cleave {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.compositor_state
    }

    fn client_compositor_state<'a>(&self, client: &'a Client) -> &'a CompositorClientState {
        #[cfg(feature = "xwayland")]
        if let Some(state) = client.get_data::<XWaylandClientData>() {
            return &state.compositor_state;
        }
        &client
            .get_data::<ClientState>()
            .expect("client inserted without ClientState")
            .compositor_state
    }

    fn new_subsurface(&mut self, surface: &WlSurface, parent: &WlSurface) {
        self.emit(parent, SurfaceEvent::NewSubsurface(surface.clone()));
    }

    fn commit(&mut self, surface: &WlSurface) {
        #[cfg(feature = "xwayland")]
        X11Wm::commit_hook::<Self>(surface);

        xdg_shell::handle_commit(self, surface);
        self.commit_surface(surface);
    }

    fn destroyed(&mut self, surface: &WlSurface) {
        self.destroy_surface(surface);
    }
}

impl BufferHandler for Cleave {
    fn buffer_destroyed(&mut self, _buffer: &WlBuffer) {}
}

impl ShmHandler for Cleave {
    fn shm_state(&self) -> &ShmState {
        &self.shm_state
    }
}

delegate_compositor!(Cleave);
delegate_shm!(Cleave);

/// Buffer and damage state a commit applied to one surface.
struct Applied {
    buffer: Option<BufferAssignment>,
    damage: Vec<Damage>,
    scale: i32,
    transform: Transform,
}

fn take_applied(surface: &WlSurface) -> Applied {
    with_states(surface, |states| {
        let mut attributes = states.cached_state.get::<SurfaceAttributes>();
        let attributes = attributes.current();
        Applied {
            buffer: attributes.buffer.take(),
            damage: attributes.damage.drain(..).collect(),
            scale: attributes.buffer_scale.max(1),
            transform: attributes.buffer_transform.into(),
        }
    })
}

fn shm_format(format: wl_shm::Format) -> Result<PixelFormat> {
    match format {
        wl_shm::Format::Argb8888 => Ok(PixelFormat::Argb8888),
        wl_shm::Format::Xrgb8888 => Ok(PixelFormat::Xrgb8888),
        other => Err(CompositorError::Renderer(format!(
            "unsupported shm format {other:?}"
        ))),
    }
}

impl Cleave {
    /// Copy a shm buffer into a texture and hand the buffer back to the
    /// client.
    fn import_shm_buffer(&mut self, buffer: &WlBuffer) -> Result<(TextureId, Size<i32, Buffer>)> {
        let renderer = &mut self.renderer;
        let imported = with_buffer_contents(buffer, |ptr, len, data| {
            let format = shm_format(data.format)?;
            let (offset, stride, height) = (data.offset, data.stride, data.height);
            if offset < 0 || stride < data.width * 4 || height <= 0 {
                return Err(CompositorError::Renderer(format!(
                    "invalid shm buffer layout (offset {offset}, stride {stride}, {}x{height})",
                    data.width
                )));
            }
            let start = offset as usize;
            let size = stride as usize * height as usize;
            if start + size > len {
                return Err(CompositorError::Renderer(format!(
                    "shm buffer overruns its pool ({} > {len})",
                    start + size
                )));
            }
            // Safety: the pool is mapped for `len` bytes while this closure
            // runs and the range was checked above.
            let bytes = unsafe { std::slice::from_raw_parts(ptr.add(start), size) };
            let texture =
                renderer.upload_texture(format, stride as u32, data.width, height, bytes)?;
            Ok((texture, Size::from((data.width, height))))
        });
        buffer.release();
        match imported {
            Ok(result) => result,
            Err(err) => Err(CompositorError::Renderer(format!(
                "failed to access shm buffer: {err}"
            ))),
        }
    }

    /// Apply what a `wl_surface.commit` made current and notify listeners.
    ///
    /// The committed surface is always processed. Subsurfaces below it are
    /// processed when the commit applied cached state to them. Subsurfaces
    /// that moved are damaged at both positions.
    pub fn commit_surface(&mut self, surface: &WlSurface) {
        if is_sync_subsurface(surface) {
            return;
        }

        let mut changed = Vec::new();
        let mut moved = Vec::new();
        with_surface_tree_downward(
            surface,
            (),
            |_, _, _| TraversalAction::DoChildren(()),
            |child, states, _| {
                if child == surface {
                    changed.push(child.clone());
                    return;
                }
                let offset = subsurface_offset(states);
                let previous = update_render_state_in(states, |render| {
                    std::mem::replace(&mut render.placed_at, offset)
                });
                if previous != offset {
                    moved.push((child.clone(), previous - offset));
                }
                let mut attributes = states.cached_state.get::<SurfaceAttributes>();
                let attributes = attributes.current();
                if attributes.buffer.is_some() || !attributes.damage.is_empty() {
                    changed.push(child.clone());
                }
            },
            |_, _, _| true,
        );

        for (child, shift) in moved {
            if let Some(ListenerTarget::Child(view)) = self.listeners.get(&child, Signal::Commit) {
                self.view_damage_child_shifted(view, &child, shift);
                self.view_damage_child(view, &child, true);
            }
        }
        for surface in changed {
            self.apply_commit(&surface);
        }
    }

    /// Losing the buffer emits `Unmap` before the state changes, gaining one
    /// emits `Map` after. `Commit` always comes last.
    fn apply_commit(&mut self, surface: &WlSurface) {
        let had_texture = has_texture(surface);
        let is_drag_icon = self.is_drag_icon(surface);
        if is_drag_icon {
            self.damage_drag_icon(surface);
        }

        let Applied {
            buffer,
            damage,
            scale,
            transform,
        } = take_applied(surface);

        let new_texture = match buffer {
            None => None,
            Some(BufferAssignment::Removed) => Some(None),
            Some(BufferAssignment::NewBuffer(buffer)) => match self.import_shm_buffer(&buffer) {
                Ok(imported) => Some(Some(imported)),
                Err(err) => {
                    tracing::error!(surface = ?surface.id(), "failed to import buffer: {err}");
                    None
                }
            },
        };

        if had_texture && matches!(new_texture, Some(None)) {
            self.emit(surface, SurfaceEvent::Unmap);
        }

        let released = update_render_state(surface, |state| {
            state.buffer_transform = transform;
            let mut released = None;
            match new_texture {
                Some(Some((texture, buffer_size))) => {
                    state.size = buffer_size.to_logical(scale, transform);
                    released = state.texture.replace(texture);
                }
                Some(None) => {
                    state.damage = vec![Rectangle::new(Point::from((0, 0)), state.size)];
                    state.size = Size::from((0, 0));
                    return state.texture.take();
                }
                None => {}
            }
            let buffer_size = state.size.to_buffer(scale, transform);
            state.damage = damage
                .iter()
                .map(|damage| match damage {
                    Damage::Surface(rect) => *rect,
                    Damage::Buffer(rect) => rect.to_logical(scale, transform, &buffer_size),
                })
                .collect();
            released
        });
        if let Some(texture) = released {
            self.renderer.destroy_texture(texture);
        }

        if !had_texture && has_texture(surface) {
            self.emit(surface, SurfaceEvent::Map);
        }
        self.emit(surface, SurfaceEvent::Commit);

        if is_drag_icon {
            self.damage_drag_icon(surface);
        }
    }

    /// Tear `surface` down: listeners hear `Unmap` (when it had content)
    /// and `Destroy` before its texture goes away.
    pub fn destroy_surface(&mut self, surface: &WlSurface) {
        if has_texture(surface) {
            self.emit(surface, SurfaceEvent::Unmap);
        }
        self.emit(surface, SurfaceEvent::Destroy);
        if self.is_drag_icon(surface) {
            self.remove_drag_icon(surface);
        }

        self.listeners.remove_surface(surface);
        let texture = update_render_state(surface, |state| {
            let texture = state.texture.take();
            *state = SurfaceRenderState::default();
            texture
        });
        if let Some(texture) = texture {
            self.renderer.destroy_texture(texture);
        }
        tracing::trace!(surface = ?surface.id(), "surface destroyed");
    }

    pub fn is_drag_icon(&self, surface: &WlSurface) -> bool {
        self.drag_icons.iter().any(|icon| icon.surface == *surface)
    }

    /// Show `surface` as a drag icon at `position`, in layout coordinates.
    pub fn add_drag_icon(&mut self, surface: &WlSurface, position: Point<i32, Logical>) {
        self.drag_icons.retain(|icon| icon.surface != *surface);
        self.drag_icons.push(DragIcon {
            surface: surface.clone(),
            position,
        });
        self.damage_drag_icon(surface);
    }

    pub fn move_drag_icon(&mut self, surface: &WlSurface, position: Point<i32, Logical>) {
        self.damage_drag_icon(surface);
        if let Some(icon) = self.drag_icons.iter_mut().find(|icon| icon.surface == *surface) {
            icon.position = position;
        }
        self.damage_drag_icon(surface);
    }

    pub fn remove_drag_icon(&mut self, surface: &WlSurface) {
        self.damage_drag_icon(surface);
        self.drag_icons.retain(|icon| icon.surface != *surface);
    }

    fn damage_drag_icon(&mut self, surface: &WlSurface) {
        let Some(position) = self
            .drag_icons
            .iter()
            .find(|icon| icon.surface == *surface)
            .map(|icon| icon.position)
        else {
            return;
        };
        for output in self.outputs.iter_mut() {
            let origin = position - output.location;
            output.damage_surface(surface, origin, true);
        }
    }
}
