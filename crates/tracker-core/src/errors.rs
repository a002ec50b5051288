/// Rejected client input. Reported only to the offending connection.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("invalid viewport bounds: {0}")]
    InvalidBounds(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
}

impl ValidationError {
    /// Short classification string for logging and client error details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCoordinates(_) => "invalid_coordinates",
            Self::InvalidBounds(_) => "invalid_bounds",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::RateLimited(_) => "rate_limited",
        }
    }
}

/// Failure reported by an external collaborator (store, directory, auth).
#[derive(Clone, Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}
