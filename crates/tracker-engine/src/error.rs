use tracker_core::errors::{DirectoryError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_sources_with_context() {
        let err: TrackerError = ValidationError::InvalidCoordinates("lat 91".into()).into();
        assert!(err.to_string().starts_with("validation error"));
        let err: TrackerError = DirectoryError::NotFound("entity e1".into()).into();
        assert!(matches!(err, TrackerError::Directory(_)));
    }
}
