use thiserror::Error;

/// Errors raised by the compositor's fallible collaborators.
///
/// None of these cross the view operation boundary: view and message
/// operations log them and return an absent result instead.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("event loop error: {0}")]
    EventLoop(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("text rendering error: {0}")]
    Text(String),
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;
