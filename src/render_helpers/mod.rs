//! Drawing primitives shared by the render pass and the message overlay.

pub mod matrix;
#[cfg(feature = "pango")]
pub mod pango_text;
pub mod renderer;

pub use matrix::Matrix;
pub use renderer::{PixelFormat, Renderer, TextureId};
