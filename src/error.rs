use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TrackError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("assignment failed: {0}")]
    Assignment(String),
    #[error("kalman filter update failed: {0}")]
    Filter(String),
}
