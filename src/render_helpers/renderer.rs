//! The low-level drawing API the render pass is written against.

use smithay::utils::{Buffer, Physical, Rectangle, Size};

use crate::Result;

use super::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Pixel layouts accepted by [`Renderer::upload_texture`].
///
/// Both are 32 bits per pixel, native-endian `0xAARRGGBB` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Argb8888,
    Xrgb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        4
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Argb8888)
    }
}

/// A renderer that draws into the current output buffer.
///
/// Rectangles passed to [`Renderer::scissor`] are in buffer coordinates,
/// i.e. after the output transform has been undone.
pub trait Renderer {
    fn begin(&mut self, width: i32, height: i32);

    fn end(&mut self);

    /// Fill the scissored area, or the whole buffer without a scissor.
    fn clear(&mut self, color: [f32; 4]);

    fn scissor(&mut self, rect: Option<Rectangle<i32, Physical>>);

    fn render_texture_with_matrix(
        &mut self,
        texture: TextureId,
        matrix: &Matrix,
        alpha: f32,
    ) -> Result<()>;

    fn upload_texture(
        &mut self,
        format: PixelFormat,
        stride: u32,
        width: i32,
        height: i32,
        data: &[u8],
    ) -> Result<TextureId>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn texture_size(&self, texture: TextureId) -> Option<Size<i32, Buffer>>;
}
