use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Surface has zero size")]
    EmptySurface,
    #[error("Frame capture failed: {0}")]
    Capture(String),
}
