//! Outputs: mode and transform, damage, messages and workspaces.

use calloop::RegistrationToken;
use smithay::{
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Logical, Physical, Point, Rectangle, Size, Transform},
};

use crate::{
    damage::DamageRegion,
    layout::Workspace,
    message::Message,
    render_helpers::Renderer,
    surface::for_each_surface,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub usize);

/// Physical subpixel layout reported by an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub size: Size<i32, Physical>,
    /// Refresh rate in mHz.
    pub refresh: i32,
}

impl Mode {
    pub fn frame_interval(&self) -> std::time::Duration {
        let refresh = if self.refresh > 0 { self.refresh } else { 60_000 };
        std::time::Duration::from_nanos(1_000_000_000_000 / refresh as u64)
    }
}

/// The presentation side of an output.
pub trait Presentation {
    /// Damage of the frame about to be committed, in buffer coordinates.
    fn set_damage(&mut self, damage: &DamageRegion);

    fn commit(&mut self) -> bool;

    /// Draw cursors that could not be put on a hardware plane. A no-op when
    /// hardware cursors are in use.
    fn render_software_cursors(&mut self, renderer: &mut dyn Renderer, damage: &DamageRegion);
}

pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub mode: Mode,
    pub scale: f64,
    pub transform: Transform,
    pub subpixel: Subpixel,
    /// Position in the global layout.
    pub location: Point<i32, Logical>,
    pub damage: DamageRegion,
    /// Newest first.
    pub messages: Vec<Message>,
    pub message_timer: Option<RegistrationToken>,
    pub frame_timer: Option<RegistrationToken>,
    pub workspaces: Vec<Workspace>,
    pub current_workspace: usize,
    pub presentation: Box<dyn Presentation>,
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("scale", &self.scale)
            .field("transform", &self.transform)
            .field("messages", &self.messages.len())
            .finish_non_exhaustive()
    }
}

pub struct OutputSettings {
    pub name: String,
    pub mode: Mode,
    pub scale: f64,
    pub transform: Transform,
    pub subpixel: Subpixel,
    pub location: Point<i32, Logical>,
    pub workspaces: usize,
}

impl Output {
    pub fn new(id: OutputId, settings: OutputSettings, presentation: Box<dyn Presentation>) -> Self {
        let scale = if settings.scale.is_finite() && settings.scale > 0.0 {
            settings.scale
        } else {
            tracing::warn!(output = %settings.name, scale = settings.scale, "invalid output scale, using 1");
            1.0
        };

        let mut output = Self {
            id,
            name: settings.name,
            mode: settings.mode,
            scale,
            transform: settings.transform,
            subpixel: settings.subpixel,
            location: settings.location,
            damage: DamageRegion::default(),
            messages: Vec::new(),
            message_timer: None,
            frame_timer: None,
            workspaces: Vec::new(),
            current_workspace: 0,
            presentation,
        };
        output.damage = DamageRegion::new(output.transformed_resolution());
        let logical = output.logical_box();
        output.workspaces = (0..settings.workspaces.max(1))
            .map(|_| Workspace::new(logical))
            .collect();
        output.damage_whole();
        output
    }

    /// Mode size with the output transform applied.
    pub fn transformed_resolution(&self) -> Size<i32, Physical> {
        self.transform.transform_size(self.mode.size)
    }

    pub fn logical_size(&self) -> Size<i32, Logical> {
        let size = self.transformed_resolution();
        Size::from((
            (size.w as f64 / self.scale) as i32,
            (size.h as f64 / self.scale) as i32,
        ))
    }

    /// Output-local logical box, origin at zero.
    pub fn logical_box(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(Point::from((0, 0)), self.logical_size())
    }

    /// Logical box in global layout coordinates.
    pub fn layout_box(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(self.location, self.logical_size())
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.damage.set_bounds(self.transformed_resolution());
        self.damage_whole();
    }

    pub fn set_scale(&mut self, scale: f64) {
        if scale.is_finite() && scale > 0.0 {
            self.scale = scale;
            self.damage_whole();
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.damage.set_bounds(self.transformed_resolution());
        self.damage_whole();
    }

    /// The visible workspace. Absent only if `current_workspace` was set
    /// past the end of `workspaces`.
    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspaces.get(self.current_workspace)
    }

    pub fn workspace_mut(&mut self) -> Option<&mut Workspace> {
        self.workspaces.get_mut(self.current_workspace)
    }

    pub fn has_damage(&self) -> bool {
        !self.damage.is_empty()
    }

    /// Damage an output-local logical box.
    pub fn damage_box(&mut self, rect: Rectangle<i32, Logical>) {
        self.damage.add(rect.to_physical_precise_round(self.scale));
    }

    /// Damage a box that is already in output pixels.
    pub fn damage_physical_box(&mut self, rect: Rectangle<i32, Physical>) {
        self.damage.add(rect);
    }

    pub fn damage_whole(&mut self) {
        self.damage.add_whole();
    }

    /// Damage the surface tree rooted at `root`, placed at `origin`.
    ///
    /// With `whole` every surface's full extent is damaged, otherwise only
    /// what each surface reported in its last commit.
    pub fn damage_surface(&mut self, root: &WlSurface, origin: Point<i32, Logical>, whole: bool) {
        let scale = self.scale;
        let damage = &mut self.damage;
        for_each_surface(root, origin, &mut |_, state, rect| {
            if whole {
                damage.add(rect.to_physical_precise_round(scale));
                return;
            }
            for local in &state.damage {
                let moved = Rectangle::new(local.loc + rect.loc, local.size);
                damage.add(moved.to_physical_precise_round(scale));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessOutput;
    use crate::test_support::{TestState, WINDOW_COLOR};

    fn output(scale: f64, transform: Transform) -> Output {
        Output::new(
            OutputId(0),
            OutputSettings {
                name: "HEADLESS-1".to_owned(),
                mode: Mode {
                    size: Size::from((800, 600)),
                    refresh: 60_000,
                },
                scale,
                transform,
                subpixel: Subpixel::Unknown,
                location: Point::from((0, 0)),
                workspaces: 1,
            },
            Box::new(HeadlessOutput::new()),
        )
    }

    #[test]
    fn rotated_output_swaps_logical_size() {
        let output = output(2.0, Transform::_90);
        assert_eq!(output.transformed_resolution(), Size::from((600, 800)));
        assert_eq!(output.logical_size(), Size::from((300, 400)));
    }

    #[test]
    fn new_output_starts_fully_damaged() {
        let mut output = output(1.0, Transform::Normal);
        let taken = output.damage.take();
        assert!(taken.covers(Rectangle::new(Point::from((0, 0)), Size::from((800, 600)))));
    }

    #[test]
    fn partial_surface_damage_is_translated_and_scaled() {
        let mut t = TestState::new(800, 600);
        let surface = t.bare_surface();
        t.attach(&surface.surface, 100, 100, WINDOW_COLOR);
        surface.surface.damage(5, 5, 10, 10);
        surface.surface.commit();
        t.roundtrip();

        let mut output = output(2.0, Transform::Normal);
        output.damage.take();
        output.damage_surface(&surface.server, Point::from((20, 30)), false);
        assert_eq!(
            output.damage.rects(),
            &[Rectangle::new(Point::from((50, 70)), Size::from((20, 20)))]
        );

        output.damage.take();
        output.damage_surface(&surface.server, Point::from((0, 0)), true);
        assert!(output.damage.covers(Rectangle::new(Point::from((0, 0)), Size::from((200, 200)))));
    }

    #[test]
    fn fractional_scale_leaves_no_seam_between_neighbours() {
        let mut output = output(1.25, Transform::Normal);
        output.damage.take();
        output.damage_box(Rectangle::new(Point::from((0, 0)), Size::from((3, 3))));
        output.damage_box(Rectangle::new(Point::from((3, 0)), Size::from((3, 3))));
        // Edges at 3.75 and 7.5 round to 4 and 8.
        assert!(output.damage.covers(Rectangle::new(Point::from((0, 0)), Size::from((8, 4)))));
        assert!(!output.damage.intersects(Rectangle::new(Point::from((8, 0)), Size::from((1, 1)))));
    }

    #[test]
    fn out_of_range_workspace_index_is_absent() {
        let mut output = output(1.0, Transform::Normal);
        assert!(output.workspace().is_some());
        output.current_workspace = 3;
        assert!(output.workspace().is_none());
        assert!(output.workspace_mut().is_none());
    }

    #[test]
    fn frame_interval_follows_refresh() {
        let mode = Mode {
            size: Size::from((1, 1)),
            refresh: 50_000,
        };
        assert_eq!(mode.frame_interval(), std::time::Duration::from_millis(20));
    }
}
