pub mod backend;
pub mod config;
pub mod damage;
pub mod errors;
pub mod handlers;
pub mod layout;
pub mod message;
pub mod output;
pub mod render;
pub mod render_helpers;
pub mod state;
pub mod surface;
pub mod view;

#[cfg(test)]
mod test_support;

pub use errors::{CompositorError, Result};
pub use state::Cleave;
