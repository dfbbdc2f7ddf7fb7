use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Invalid board state: {0}")]
    InvalidState(&'static str),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
