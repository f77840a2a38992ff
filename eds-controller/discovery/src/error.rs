use http::StatusCode;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),

    #[error("invalid discovery request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to discover endpoints: {0}")]
    Discover(#[source] anyhow::Error),
}

// === impl DiscoveryError ===

impl DiscoveryError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedType(_) | Self::Body(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Discover(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
