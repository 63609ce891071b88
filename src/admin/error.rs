use std::path::{Path, PathBuf};

use crate::types::SombraError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Shared segment not found at the specified path.
    #[error("segment not found: {0}")]
    MissingSegment(PathBuf),
    /// Core engine error.
    #[error(transparent)]
    Core(#[from] SombraError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_segment(path: impl AsRef<Path>) -> Self {
        AdminError::MissingSegment(path.as_ref().to_path_buf())
    }
}
