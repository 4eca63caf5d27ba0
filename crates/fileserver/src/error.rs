//! Error taxonomy and its mapping onto HTTP responses

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::subtitles::SubtitleError;

/// Domain errors raised by path resolution, access checks and file serving
///
/// Messages are shown to clients, so no variant carries an absolute path.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Access denied: path outside of media root")]
    PathEscape,

    #[error("Access denied")]
    AccessDenied,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Path is not a file")]
    NotAFile,

    #[error("Path is not a directory")]
    NotADirectory,

    #[error("Range not satisfiable")]
    RangeNotSatisfiable { file_size: u64 },

    #[error("{0}")]
    BadRequest(String),

    #[error("{context} failed")]
    UpstreamTool {
        context: &'static str,
        #[source]
        source: SubtitleError,
    },

    #[error("{context} failed")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl MediaError {
    /// Wrap an I/O error with a client-safe description of what was attempted
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        MediaError::Io { context, source }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            MediaError::PathEscape => StatusCode::BAD_REQUEST,
            MediaError::AccessDenied => StatusCode::FORBIDDEN,
            MediaError::NotFound(_) => StatusCode::NOT_FOUND,
            MediaError::NotAFile | MediaError::NotADirectory | MediaError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            MediaError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            MediaError::UpstreamTool { .. } | MediaError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

/// Error returned from HTTP handlers
#[derive(Debug)]
pub enum AppError {
    Media(MediaError),
    Unauthorized { realm: String },
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        AppError::Media(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized { realm } => unauthorized_response(&realm),
            AppError::Media(MediaError::RangeNotSatisfiable { file_size }) => {
                let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", file_size)) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                response
            }
            AppError::Media(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!("Request failed: {:?}", err);
                } else {
                    tracing::debug!("Request rejected: {}", err);
                }
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
        }
    }
}

/// 401 carrying a Basic challenge for `realm`
pub fn unauthorized_response(realm: &str) -> Response {
    let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({ "error": "Access denied. Please enter valid credentials." })),
    )
        .into_response()
}
