//! Message rasterization with Pango and Cairo.

use pango::prelude::*;

use crate::{
    CompositorError, Result,
    message::{MessageStyle, RasterizedText, SubpixelOrder, TextOptions, TextRasterizer},
};

#[derive(Debug, Default)]
pub struct PangoRasterizer;

fn text_error(what: &str, err: impl std::fmt::Display) -> CompositorError {
    CompositorError::Text(format!("{what}: {err}"))
}

fn font_options(options: &TextOptions) -> Result<cairo::FontOptions> {
    let font_options =
        cairo::FontOptions::new().map_err(|err| text_error("failed to create font options", err))?;
    font_options.set_antialias(cairo::Antialias::Best);
    font_options.set_subpixel_order(match options.subpixel {
        SubpixelOrder::Default => cairo::SubpixelOrder::Default,
        SubpixelOrder::Rgb => cairo::SubpixelOrder::Rgb,
        SubpixelOrder::Bgr => cairo::SubpixelOrder::Bgr,
        SubpixelOrder::Vrgb => cairo::SubpixelOrder::Vrgb,
        SubpixelOrder::Vbgr => cairo::SubpixelOrder::Vbgr,
    });
    Ok(font_options)
}

fn layout(cr: &cairo::Context, text: &str, style: &MessageStyle, options: &TextOptions) -> Result<pango::Layout> {
    let layout = pangocairo::functions::create_layout(cr);
    pangocairo::functions::context_set_font_options(&layout.context(), Some(&font_options(options)?));
    let font = pango::FontDescription::from_string(&style.font);
    layout.set_font_description(Some(&font));
    layout.set_text(text);
    Ok(layout)
}

impl TextRasterizer for PangoRasterizer {
    fn rasterize(
        &mut self,
        text: &str,
        style: &MessageStyle,
        options: &TextOptions,
    ) -> Result<RasterizedText> {
        let scale = options.scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CompositorError::Text(format!(
                "cannot rasterize text at scale {scale}"
            )));
        }

        let (text_w, text_h) = {
            let scratch = cairo::ImageSurface::create(cairo::Format::ARgb32, 1, 1)
                .map_err(|err| text_error("failed to create scratch surface", err))?;
            let cr = cairo::Context::new(&scratch)
                .map_err(|err| text_error("failed to create cairo context", err))?;
            cr.scale(scale, scale);
            layout(&cr, text, style, options)?.pixel_size()
        };

        let padded = |text: i32, padding: i32| {
            padding
                .checked_mul(2)
                .and_then(|padding| padding.checked_add(text))
                .ok_or_else(|| {
                    CompositorError::Text(format!("text box is too large ({text} + 2 * {padding})"))
                })
        };
        let width = (padded(text_w, style.padding_x)? as f64 * scale).ceil() as i32;
        let height = (padded(text_h, style.padding_y)? as f64 * scale).ceil() as i32;
        if width <= 0 || height <= 0 {
            return Err(CompositorError::Text(format!(
                "text box has no area ({width}x{height})"
            )));
        }

        let mut surface = cairo::ImageSurface::create(cairo::Format::ARgb32, width, height)
            .map_err(|err| text_error("failed to create text surface", err))?;
        {
            let cr = cairo::Context::new(&surface)
                .map_err(|err| text_error("failed to create cairo context", err))?;
            let [r, g, b, a] = style.background.map(f64::from);
            cr.set_source_rgba(r, g, b, a);
            cr.paint().map_err(|err| text_error("failed to paint background", err))?;

            let [r, g, b, a] = style.foreground.map(f64::from);
            cr.set_source_rgba(r, g, b, a);
            let border = scale.round().max(1.0);
            cr.set_line_width(border);
            cr.rectangle(
                border / 2.0,
                border / 2.0,
                width as f64 - border,
                height as f64 - border,
            );
            cr.stroke().map_err(|err| text_error("failed to draw border", err))?;

            cr.scale(scale, scale);
            cr.move_to(style.padding_x as f64, style.padding_y as f64);
            let layout = layout(&cr, text, style, options)?;
            pangocairo::functions::show_layout(&cr, &layout);
        }
        surface.flush();

        let stride = surface.stride() as usize;
        let data = surface
            .data()
            .map_err(|err| text_error("failed to read text surface", err))?;
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for row in data.chunks(stride).take(height as usize) {
            for px in row[..width as usize * 4].chunks_exact(4) {
                pixels.push(u32::from_ne_bytes([px[0], px[1], px[2], px[3]]));
            }
        }

        Ok(RasterizedText {
            width,
            height,
            stride: width,
            pixels,
        })
    }
}
