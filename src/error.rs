use axum::http::StatusCode;
use axum::Json;

/// Failures of the outside services the store leans on: the vector index,
/// the embedding endpoint and the text generator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator error: {0}")]
    Backend(String),

    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl From<r2d2::Error> for CollaboratorError {
    fn from(e: r2d2::Error) -> Self {
        CollaboratorError::Unavailable(format!("pool: {e}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetacogError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("content exceeds maximum length")]
    ContentTooLong,

    #[error("malformed category: {0:?}")]
    MalformedCategory(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<r2d2::Error> for MetacogError {
    fn from(e: r2d2::Error) -> Self {
        MetacogError::Internal(format!("pool: {e}"))
    }
}

impl MetacogError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Collaborator(CollaboratorError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Collaborator(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl axum::response::IntoResponse for MetacogError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
