use axum::http::StatusCode;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Session errors
    #[error("auth state mismatch")]
    CsrfMismatch,
    #[error("not authenticated")]
    Unauthenticated,

    // Provider errors
    #[error("authorization denied: {0}")]
    UpstreamDenied(String),
    #[error("token request failed: {0}")]
    UpstreamAuth(String),
    #[error("access token rejected by upstream")]
    UpstreamRejected,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    // Request errors
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("no route for {0}")]
    NotFound(String),

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::CsrfMismatch
            | Error::Unauthenticated
            | Error::UpstreamDenied(_)
            | Error::UpstreamAuth(_)
            | Error::UpstreamRejected => StatusCode::UNAUTHORIZED,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// JSON body sent for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

// axum IntoResponse implementation
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let status = self.status();
        let body = ErrorResponse {
            code: status.as_u16(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
