//! A backend without a display.
//!
//! [`HeadlessRenderer`] composites on the CPU into an ARGB framebuffer using
//! the same projection matrices a GL renderer would take, and
//! [`HeadlessOutput`] stands in for the presentation side. Both are cheap
//! handles over shared state so a copy can be kept for inspection after the
//! other one has been handed to the compositor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Duration;

use calloop::{
    EventLoop,
    timer::{TimeoutAction, Timer},
};
use smithay::utils::{Buffer, Physical, Point, Rectangle, Size, Transform};

use crate::{
    CompositorError, Result,
    config::{OutputConfig, env_truthy},
    damage::DamageRegion,
    message::pack_color,
    output::{Mode, OutputId, OutputSettings, Presentation},
    render::render_output,
    render_helpers::{Matrix, PixelFormat, Renderer, TextureId},
    state::Cleave,
};

const DEFAULT_OUTPUT_NAME: &str = "HEADLESS-1";
const DEFAULT_MODE: (i32, i32, i32) = (1280, 720, 60_000);
const CURSOR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

fn hardware_cursor_disabled() -> bool {
    static DISABLED: OnceLock<bool> = OnceLock::new();
    *DISABLED.get_or_init(|| env_truthy("CLEAVE_NO_HARDWARE_CURSORS").unwrap_or(false))
}

#[derive(Debug, Clone)]
struct Texture {
    width: i32,
    height: i32,
    /// Premultiplied `0xAARRGGBB`, tightly packed.
    pixels: Vec<u32>,
}

/// What the last finished frame did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub clears: usize,
    pub draws: usize,
    /// Textures in draw order, once per scissored draw.
    pub drawn: Vec<TextureId>,
}

#[derive(Debug, Default)]
struct RendererInner {
    width: i32,
    height: i32,
    framebuffer: Vec<u32>,
    scissor: Option<Rectangle<i32, Physical>>,
    textures: HashMap<TextureId, Texture>,
    next_texture: u64,
    frame: FrameStats,
    last_frame: FrameStats,
}

impl RendererInner {
    fn bounds(&self) -> Rectangle<i32, Physical> {
        let full = Rectangle::new(Point::from((0, 0)), Size::from((self.width, self.height)));
        match self.scissor {
            Some(scissor) => full
                .intersection(scissor)
                .unwrap_or_else(|| Rectangle::new(Point::from((0, 0)), Size::from((0, 0)))),
            None => full,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadlessRenderer {
    inner: Rc<RefCell<RendererInner>>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture_count(&self) -> usize {
        self.inner.borrow().textures.len()
    }

    /// Framebuffer pixel at `(x, y)` in buffer coordinates.
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        let inner = self.inner.borrow();
        if x < 0 || y < 0 || x >= inner.width || y >= inner.height {
            return None;
        }
        inner.framebuffer.get((y * inner.width + x) as usize).copied()
    }

    pub fn last_frame(&self) -> FrameStats {
        self.inner.borrow().last_frame.clone()
    }
}

impl Renderer for HeadlessRenderer {
    fn begin(&mut self, width: i32, height: i32) {
        let mut inner = self.inner.borrow_mut();
        if inner.width != width || inner.height != height {
            inner.width = width.max(0);
            inner.height = height.max(0);
            inner.framebuffer = vec![0; (inner.width * inner.height) as usize];
        }
        inner.scissor = None;
        inner.frame = FrameStats::default();
    }

    fn end(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.last_frame = std::mem::take(&mut inner.frame);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let mut inner = self.inner.borrow_mut();
        let bounds = inner.bounds();
        let value = pack_color(color);
        let width = inner.width;
        for y in bounds.loc.y..bounds.loc.y + bounds.size.h {
            let row = (y * width) as usize;
            let start = row + bounds.loc.x as usize;
            let end = start + bounds.size.w as usize;
            inner.framebuffer[start..end].fill(value);
        }
        inner.frame.clears += 1;
    }

    fn scissor(&mut self, rect: Option<Rectangle<i32, Physical>>) {
        self.inner.borrow_mut().scissor = rect;
    }

    fn render_texture_with_matrix(
        &mut self,
        texture: TextureId,
        matrix: &Matrix,
        alpha: f32,
    ) -> Result<()> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let Some(source) = inner.textures.get(&texture).cloned() else {
            return Err(CompositorError::Renderer(format!(
                "unknown texture {}",
                texture.0
            )));
        };
        inner.frame.draws += 1;
        inner.frame.drawn.push(texture);

        let (width, height) = (inner.width as f32, inner.height as f32);
        let to_pixel = |(nx, ny): (f32, f32)| ((nx + 1.0) / 2.0 * width, (1.0 - ny) / 2.0 * height);

        // Pixel-space affine map of the unit quad.
        let origin = to_pixel(matrix.apply(0.0, 0.0));
        let u_end = to_pixel(matrix.apply(1.0, 0.0));
        let v_end = to_pixel(matrix.apply(0.0, 1.0));
        let (a, b) = (u_end.0 - origin.0, v_end.0 - origin.0);
        let (c, d) = (u_end.1 - origin.1, v_end.1 - origin.1);
        let det = a * d - b * c;
        if det.abs() < f32::EPSILON {
            return Ok(());
        }

        let corners = [origin, u_end, v_end, to_pixel(matrix.apply(1.0, 1.0))];
        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).floor() as i32;
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).floor() as i32;
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i32;
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i32;
        let quad = Rectangle::new(
            Point::from((min_x, min_y)),
            Size::from((max_x - min_x, max_y - min_y)),
        );
        let Some(area) = inner.bounds().intersection(quad) else {
            return Ok(());
        };

        let alpha = alpha.clamp(0.0, 1.0);
        let fb_width = inner.width;
        for y in area.loc.y..area.loc.y + area.size.h {
            for x in area.loc.x..area.loc.x + area.size.w {
                let dx = x as f32 + 0.5 - origin.0;
                let dy = y as f32 + 0.5 - origin.1;
                let u = (d * dx - b * dy) / det;
                let v = (a * dy - c * dx) / det;
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                let tx = ((u * source.width as f32) as i32).min(source.width - 1);
                let ty = ((v * source.height as f32) as i32).min(source.height - 1);
                let src = source.pixels[(ty * source.width + tx) as usize];
                let index = (y * fb_width + x) as usize;
                inner.framebuffer[index] = blend(src, inner.framebuffer[index], alpha);
            }
        }
        Ok(())
    }

    fn upload_texture(
        &mut self,
        format: PixelFormat,
        stride: u32,
        width: i32,
        height: i32,
        data: &[u8],
    ) -> Result<TextureId> {
        if width <= 0 || height <= 0 {
            return Err(CompositorError::Renderer(format!(
                "invalid texture size {width}x{height}"
            )));
        }
        let row_bytes = width as usize * format.bytes_per_pixel() as usize;
        let stride = stride as usize;
        if stride < row_bytes {
            return Err(CompositorError::Renderer(format!(
                "stride {stride} is shorter than a {width} pixel row"
            )));
        }
        let needed = stride * (height as usize - 1) + row_bytes;
        if data.len() < needed {
            return Err(CompositorError::Renderer(format!(
                "buffer holds {} bytes, {needed} needed",
                data.len()
            )));
        }

        let mut pixels = Vec::with_capacity((width * height) as usize);
        for row in data.chunks(stride).take(height as usize) {
            for px in row[..row_bytes].chunks_exact(4) {
                let value = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                pixels.push(if format.has_alpha() {
                    value
                } else {
                    value | 0xff00_0000
                });
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.next_texture += 1;
        let id = TextureId(inner.next_texture);
        inner.textures.insert(
            id,
            Texture {
                width,
                height,
                pixels,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.inner.borrow_mut().textures.remove(&texture).is_none() {
            tracing::warn!(?texture, "destroying unknown texture");
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<Size<i32, Buffer>> {
        let inner = self.inner.borrow();
        let texture = inner.textures.get(&texture)?;
        Some(Size::from((texture.width, texture.height)))
    }
}

/// Premultiplied source-over.
fn blend(src: u32, dst: u32, alpha: f32) -> u32 {
    let channel = |value: u32, shift: u32| ((value >> shift) & 0xff) as f32;
    let src_a = channel(src, 24) * alpha / 255.0;
    let mut out = 0u32;
    for shift in [0, 8, 16, 24] {
        let value = channel(src, shift) * alpha + channel(dst, shift) * (1.0 - src_a);
        out |= (value.round().clamp(0.0, 255.0) as u32) << shift;
    }
    out
}

#[derive(Debug, Default)]
struct OutputInner {
    commits: usize,
    last_damage: Option<DamageRegion>,
    fail_next_commit: bool,
    hardware_cursor: bool,
    /// Buffer coordinates.
    cursor: Option<Rectangle<i32, Physical>>,
    cursor_draws: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HeadlessOutput {
    inner: Rc<RefCell<OutputInner>>,
}

impl HeadlessOutput {
    pub fn new() -> Self {
        let output = Self::default();
        output.set_hardware_cursor(!hardware_cursor_disabled());
        output
    }

    /// Successful commits so far.
    pub fn commits(&self) -> usize {
        self.inner.borrow().commits
    }

    pub fn last_damage(&self) -> Option<DamageRegion> {
        self.inner.borrow().last_damage.clone()
    }

    pub fn fail_next_commit(&self) {
        self.inner.borrow_mut().fail_next_commit = true;
    }

    pub fn set_hardware_cursor(&self, available: bool) {
        self.inner.borrow_mut().hardware_cursor = available;
    }

    /// Show a cursor image covering `rect`, in buffer coordinates.
    pub fn set_software_cursor(&self, rect: Option<Rectangle<i32, Physical>>) {
        let mut inner = self.inner.borrow_mut();
        inner.cursor = rect;
        if rect.is_some() {
            inner.hardware_cursor = false;
        }
    }

    pub fn cursor_draws(&self) -> usize {
        self.inner.borrow().cursor_draws
    }
}

impl Presentation for HeadlessOutput {
    fn set_damage(&mut self, damage: &DamageRegion) {
        self.inner.borrow_mut().last_damage = Some(damage.clone());
    }

    fn commit(&mut self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if std::mem::take(&mut inner.fail_next_commit) {
            return false;
        }
        inner.commits += 1;
        true
    }

    fn render_software_cursors(&mut self, renderer: &mut dyn Renderer, damage: &DamageRegion) {
        let mut inner = self.inner.borrow_mut();
        if inner.hardware_cursor {
            return;
        }
        let Some(cursor) = inner.cursor else {
            return;
        };
        let pieces = damage.intersect(cursor);
        if pieces.is_empty() {
            return;
        }
        for piece in pieces {
            renderer.scissor(Some(piece));
            renderer.clear(CURSOR_COLOR);
        }
        inner.cursor_draws += 1;
    }
}

fn output_settings(config: &OutputConfig, workspaces: usize) -> OutputSettings {
    OutputSettings {
        name: config.name.clone(),
        mode: Mode {
            size: Size::from((config.width, config.height)),
            refresh: config.refresh,
        },
        scale: config.scale,
        transform: config.transform,
        subpixel: config.subpixel,
        location: config.position,
        workspaces,
    }
}

fn default_output_config() -> OutputConfig {
    let (width, height, refresh) = DEFAULT_MODE;
    OutputConfig {
        name: DEFAULT_OUTPUT_NAME.to_owned(),
        width,
        height,
        refresh,
        scale: 1.0,
        transform: Transform::Normal,
        subpixel: Default::default(),
        position: Point::from((0, 0)),
    }
}

/// Create the configured outputs and drive each one from a frame timer.
pub fn init_headless(event_loop: &mut EventLoop<'static, Cleave>, state: &mut Cleave) -> Result<()> {
    let mut configs = state.config.outputs.clone();
    if configs.is_empty() {
        configs.push(default_output_config());
    }

    for config in &configs {
        let settings = output_settings(config, state.config.workspaces);
        let interval = settings.mode.frame_interval();
        let output = state.add_output(settings, Box::new(HeadlessOutput::new()));
        schedule_frames(event_loop, state, output, interval)?;
        tracing::info!(
            output = %config.name,
            width = config.width,
            height = config.height,
            refresh = config.refresh,
            "headless output added"
        );
    }
    Ok(())
}

fn schedule_frames(
    event_loop: &mut EventLoop<'static, Cleave>,
    state: &mut Cleave,
    output: OutputId,
    interval: Duration,
) -> Result<()> {
    let token = event_loop
        .handle()
        .insert_source(Timer::from_duration(interval), move |_, _, state| {
            let Some(out) = state.output(output) else {
                return TimeoutAction::Drop;
            };
            if out.has_damage() {
                render_output(state, output);
            }
            TimeoutAction::ToDuration(interval)
        })
        .map_err(|err| CompositorError::Backend(format!("failed to schedule frame timer: {err}")))?;

    if let Some(out) = state.output_mut(output) {
        out.frame_timer = Some(token);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_solid(renderer: &mut HeadlessRenderer, width: i32, height: i32, color: u32) -> TextureId {
        let data: Vec<u8> = std::iter::repeat_n(color.to_ne_bytes(), (width * height) as usize)
            .flatten()
            .collect();
        renderer
            .upload_texture(PixelFormat::Argb8888, (width * 4) as u32, width, height, &data)
            .unwrap()
    }

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Physical> {
        Rectangle::new(Point::from((x, y)), Size::from((w, h)))
    }

    #[test]
    fn clear_respects_scissor() {
        let mut renderer = HeadlessRenderer::new();
        renderer.begin(10, 10);
        renderer.scissor(None);
        renderer.clear([0.0, 0.0, 0.0, 1.0]);
        renderer.scissor(Some(rect(2, 2, 3, 3)));
        renderer.clear([1.0, 1.0, 1.0, 1.0]);
        renderer.end();

        assert_eq!(renderer.pixel(3, 3), Some(0xffff_ffff));
        assert_eq!(renderer.pixel(5, 5), Some(0xff00_0000));
        assert_eq!(renderer.last_frame().clears, 2);
    }

    #[test]
    fn textured_quad_lands_on_its_box() {
        let mut renderer = HeadlessRenderer::new();
        let texture = upload_solid(&mut renderer, 4, 4, 0xff00_ff00);
        let projection = Matrix::projection(100, 50, Transform::Normal);
        let matrix = Matrix::project_box(rect(10, 20, 30, 10), Transform::Normal, &projection);

        renderer.begin(100, 50);
        renderer.clear([0.0, 0.0, 0.0, 1.0]);
        renderer.render_texture_with_matrix(texture, &matrix, 1.0).unwrap();
        renderer.end();

        assert_eq!(renderer.pixel(10, 20), Some(0xff00_ff00));
        assert_eq!(renderer.pixel(39, 29), Some(0xff00_ff00));
        assert_eq!(renderer.pixel(40, 20), Some(0xff00_0000));
        assert_eq!(renderer.pixel(10, 30), Some(0xff00_0000));
        assert_eq!(renderer.last_frame().drawn, vec![texture]);
    }

    #[test]
    fn rotated_output_draws_through_the_inverse_transform() {
        let mut renderer = HeadlessRenderer::new();
        let texture = upload_solid(&mut renderer, 2, 2, 0xffff_0000);
        // 80x60 mode shown rotated by 90 degrees: 60x80 in output pixels.
        let projection = Matrix::projection(80, 60, Transform::_90);
        let local = rect(0, 0, 10, 20);
        let matrix = Matrix::project_box(local, Transform::Normal, &projection);

        renderer.begin(80, 60);
        renderer.clear([0.0, 0.0, 0.0, 1.0]);
        renderer.render_texture_with_matrix(texture, &matrix, 1.0).unwrap();
        renderer.end();

        let buffer = Transform::_270.transform_rect_in(local, &Size::from((60, 80)));
        let inside = (buffer.loc.x + 1, buffer.loc.y + 1);
        assert_eq!(renderer.pixel(inside.0, inside.1), Some(0xffff_0000));
        let mut painted = 0;
        for y in 0..60 {
            for x in 0..80 {
                if renderer.pixel(x, y) == Some(0xffff_0000) {
                    painted += 1;
                }
            }
        }
        assert_eq!(painted, 200);
    }

    #[test]
    fn translucent_pixels_blend_premultiplied() {
        let mut renderer = HeadlessRenderer::new();
        let texture = upload_solid(&mut renderer, 1, 1, 0x8080_0000);
        let projection = Matrix::projection(4, 4, Transform::Normal);
        let matrix = Matrix::project_box(rect(0, 0, 4, 4), Transform::Normal, &projection);

        renderer.begin(4, 4);
        renderer.clear([0.0, 0.0, 1.0, 1.0]);
        renderer.render_texture_with_matrix(texture, &matrix, 1.0).unwrap();
        renderer.end();

        assert_eq!(renderer.pixel(1, 1), Some(0xff80_007f));
    }

    #[test]
    fn upload_validates_stride_and_length() {
        let mut renderer = HeadlessRenderer::new();
        assert!(
            renderer
                .upload_texture(PixelFormat::Argb8888, 4, 2, 1, &[0; 8])
                .is_err()
        );
        assert!(
            renderer
                .upload_texture(PixelFormat::Argb8888, 8, 2, 2, &[0; 12])
                .is_err()
        );

        let padded = [0u8; 12 + 8];
        let texture = renderer
            .upload_texture(PixelFormat::Xrgb8888, 12, 2, 2, &padded)
            .unwrap();
        assert_eq!(renderer.texture_size(texture), Some(Size::from((2, 2))));

        let projection = Matrix::projection(2, 2, Transform::Normal);
        let matrix = Matrix::project_box(rect(0, 0, 2, 2), Transform::Normal, &projection);
        renderer.begin(2, 2);
        renderer.render_texture_with_matrix(texture, &matrix, 1.0).unwrap();
        assert_eq!(renderer.pixel(0, 0), Some(0xff00_0000));

        renderer.destroy_texture(texture);
        assert!(
            renderer
                .render_texture_with_matrix(texture, &matrix, 1.0)
                .is_err()
        );
    }

    #[test]
    fn failed_commit_only_affects_one_frame() {
        let mut output = HeadlessOutput::new();
        output.fail_next_commit();
        assert!(!output.commit());
        assert!(output.commit());
        assert_eq!(output.commits(), 1);
    }
}
