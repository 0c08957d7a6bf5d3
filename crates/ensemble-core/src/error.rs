//! Error types for ensemble

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Track not found: {0}")]
    TrackNotFound(String),
}

pub type Result<T> = std::result::Result<T, EnsembleError>;
