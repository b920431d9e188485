//! On-screen message overlay.
//!
//! Messages are rasterized once into a texture and kept on their output
//! until [`message_clear`] runs, either explicitly or from the output's
//! message timer. Posting re-arms that timer, so one expiry clears every
//! message on the output.

use calloop::timer::{TimeoutAction, Timer};
use smithay::utils::{Physical, Point, Rectangle, Size};

use crate::{
    Result,
    errors::CompositorError,
    output::{OutputId, Subpixel},
    render_helpers::{PixelFormat, TextureId},
    state::Cleave,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageAlign {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl MessageAlign {
    /// Move `anchor` so that a `width`x`height` box sits on the requested
    /// side of it.
    pub fn place(
        self,
        anchor: Point<i32, Physical>,
        width: i32,
        height: i32,
    ) -> Rectangle<i32, Physical> {
        let (x, y) = match self {
            MessageAlign::TopLeft => (anchor.x, anchor.y),
            MessageAlign::TopRight => (anchor.x - width, anchor.y),
            MessageAlign::BottomLeft => (anchor.x, anchor.y - height),
            MessageAlign::BottomRight => (anchor.x - width, anchor.y - height),
            MessageAlign::Center => (anchor.x - width / 2, anchor.y - height / 2),
        };
        Rectangle::new(Point::from((x, y)), Size::from((width, height)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub texture: TextureId,
    /// Output-local, in output pixels.
    pub position: Rectangle<i32, Physical>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageStyle {
    pub font: String,
    pub padding_x: i32,
    pub padding_y: i32,
    pub background: [f32; 4],
    pub foreground: [f32; 4],
}

impl Default for MessageStyle {
    fn default() -> Self {
        Self {
            font: "Monospace 10".to_owned(),
            padding_x: 8,
            padding_y: 2,
            background: [0.9, 0.85, 0.85, 1.0],
            foreground: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubpixelOrder {
    #[default]
    Default,
    Rgb,
    Bgr,
    Vrgb,
    Vbgr,
}

impl From<Subpixel> for SubpixelOrder {
    fn from(subpixel: Subpixel) -> Self {
        match subpixel {
            Subpixel::HorizontalRgb => SubpixelOrder::Rgb,
            Subpixel::HorizontalBgr => SubpixelOrder::Bgr,
            Subpixel::VerticalRgb => SubpixelOrder::Vrgb,
            Subpixel::VerticalBgr => SubpixelOrder::Vbgr,
            Subpixel::Unknown | Subpixel::None => SubpixelOrder::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextOptions {
    pub scale: f64,
    pub subpixel: SubpixelOrder,
}

/// A finished message image: background, border and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizedText {
    pub width: i32,
    pub height: i32,
    /// Row length in pixels.
    pub stride: i32,
    /// Premultiplied `0xAARRGGBB`.
    pub pixels: Vec<u32>,
}

pub trait TextRasterizer {
    fn rasterize(
        &mut self,
        text: &str,
        style: &MessageStyle,
        options: &TextOptions,
    ) -> Result<RasterizedText>;
}

pub(crate) fn pack_color(color: [f32; 4]) -> u32 {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    let alpha = color[3].clamp(0.0, 1.0);
    (channel(alpha) << 24)
        | (channel(color[0] * alpha) << 16)
        | (channel(color[1] * alpha) << 8)
        | channel(color[2] * alpha)
}

/// Draws the message frame with one solid block per visible character.
///
/// Used when no font stack is compiled in.
#[derive(Debug, Default)]
pub struct BlockRasterizer;

const CELL_WIDTH: f64 = 8.0;
const CELL_HEIGHT: f64 = 16.0;

impl TextRasterizer for BlockRasterizer {
    fn rasterize(
        &mut self,
        text: &str,
        style: &MessageStyle,
        options: &TextOptions,
    ) -> Result<RasterizedText> {
        if !options.scale.is_finite() || options.scale <= 0.0 {
            return Err(CompositorError::Text(format!(
                "cannot rasterize text at scale {}",
                options.scale
            )));
        }

        let cell_w = (CELL_WIDTH * options.scale).round().max(1.0) as i32;
        let cell_h = (CELL_HEIGHT * options.scale).round().max(1.0) as i32;
        let too_large = || {
            CompositorError::Text(format!(
                "text box for {} characters is too large",
                text.chars().count()
            ))
        };
        let chars = i32::try_from(text.chars().count()).map_err(|_| too_large())?;
        let width = chars
            .checked_mul(cell_w)
            .zip(style.padding_x.checked_mul(2))
            .and_then(|(text_w, padding)| text_w.checked_add(padding))
            .ok_or_else(too_large)?;
        let height = style
            .padding_y
            .checked_mul(2)
            .and_then(|padding| padding.checked_add(cell_h))
            .ok_or_else(too_large)?;
        if width <= 0 || height <= 0 {
            return Err(CompositorError::Text(format!(
                "text box has no area ({width}x{height})"
            )));
        }
        let area = width.checked_mul(height).ok_or_else(too_large)?;

        let background = pack_color(style.background);
        let foreground = pack_color(style.foreground);
        let mut pixels = vec![background; area as usize];
        let mut fill = |x0: i32, y0: i32, x1: i32, y1: i32| {
            for y in y0.max(0)..y1.min(height) {
                for x in x0.max(0)..x1.min(width) {
                    pixels[(y * width + x) as usize] = foreground;
                }
            }
        };

        let border = options.scale.round().max(1.0) as i32;
        fill(0, 0, width, border);
        fill(0, height - border, width, height);
        fill(0, 0, border, height);
        fill(width - border, 0, width, height);

        let inset = (options.scale.round() as i32).max(1);
        for (index, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x = style.padding_x + index as i32 * cell_w;
            let y = style.padding_y;
            fill(x + inset, y + 2 * inset, x + cell_w - inset, y + cell_h - inset);
        }

        Ok(RasterizedText {
            width,
            height,
            stride: width,
            pixels,
        })
    }
}

/// Rasterize `text` for `output`, upload it, and put it on screen relative
/// to `anchor`.
///
/// Returns the final box, or `None` if the message could not be created.
/// Nothing changes on failure.
pub fn message_post(
    state: &mut Cleave,
    output: OutputId,
    text: &str,
    anchor: Point<i32, Physical>,
    align: MessageAlign,
) -> Option<Rectangle<i32, Physical>> {
    let Some(out) = state.output(output) else {
        tracing::warn!(?output, "message posted to unknown output");
        return None;
    };
    let options = TextOptions {
        scale: out.scale,
        subpixel: out.subpixel.into(),
    };

    let image = match state.text.rasterize(text, &state.config.message_style, &options) {
        Ok(image) => image,
        Err(err) => {
            tracing::error!("could not create message texture: {err}");
            return None;
        }
    };
    if image.width <= 0 || image.height <= 0 {
        tracing::error!(
            width = image.width,
            height = image.height,
            "could not create message texture: empty image"
        );
        return None;
    }

    let texture = match state.renderer.upload_texture(
        PixelFormat::Argb8888,
        (image.stride * 4) as u32,
        image.width,
        image.height,
        bytemuck::cast_slice(&image.pixels),
    ) {
        Ok(texture) => texture,
        Err(err) => {
            tracing::error!("could not upload message texture: {err}");
            return None;
        }
    };

    let position = align.place(anchor, image.width, image.height);
    let out = state.output_mut(output)?;
    out.messages.insert(0, Message { texture, position });
    out.damage_physical_box(position);
    tracing::debug!(output = %out.name, ?position, text, "message posted");
    Some(position)
}

/// Post `text` in the top-right corner of `output` and re-arm the
/// message timer.
pub fn message_printf(state: &mut Cleave, output: OutputId, text: &str) -> Option<Rectangle<i32, Physical>> {
    let width = state.output(output)?.transformed_resolution().w;
    message_printf_pos(state, output, text, Point::from((width, 0)), MessageAlign::TopRight)
}

/// Post `text` at `anchor` and re-arm the message timer.
pub fn message_printf_pos(
    state: &mut Cleave,
    output: OutputId,
    text: &str,
    anchor: Point<i32, Physical>,
    align: MessageAlign,
) -> Option<Rectangle<i32, Physical>> {
    let position = message_post(state, output, text, anchor, align)?;
    arm_message_timer(state, output);
    Some(position)
}

/// Destroy every message on `output`, damaging each box first.
pub fn message_clear(state: &mut Cleave, output: OutputId) {
    let Cleave {
        outputs, renderer, ..
    } = state;
    let Some(out) = outputs.iter_mut().find(|o| o.id == output) else {
        return;
    };

    let messages = std::mem::take(&mut out.messages);
    if messages.is_empty() {
        return;
    }
    tracing::debug!(output = %out.name, count = messages.len(), "clearing messages");
    for message in messages {
        out.damage_physical_box(message.position);
        renderer.destroy_texture(message.texture);
    }
}

/// Replace the output's message timer with a fresh one.
///
/// A zero timeout leaves messages up until cleared explicitly.
pub fn arm_message_timer(state: &mut Cleave, output: OutputId) {
    let timeout = state.config.message_timeout;
    let Some(handle) = state.loop_handle.clone() else {
        return;
    };
    let Some(out) = state.output_mut(output) else {
        return;
    };

    if let Some(token) = out.message_timer.take() {
        handle.remove(token);
    }
    if timeout.is_zero() {
        return;
    }

    let inserted = handle.insert_source(Timer::from_duration(timeout), move |_, _, state| {
        if let Some(out) = state.output_mut(output) {
            out.message_timer = None;
        }
        message_clear(state, output);
        TimeoutAction::Drop
    });
    match inserted {
        Ok(token) => out.message_timer = Some(token),
        Err(err) => tracing::error!(output = %out.name, "failed to arm message timer: {err}"),
    }
}
