use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use crate::auth::jwt::JwtError;
use crate::imaging::acquirer::AcquireError;
use crate::inference::InferenceError;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Every way a request can fail, as seen by the HTTP caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Missing or invalid authorization token")]
    Unauthenticated,
    #[error("Incorrect email or password")]
    LoginFailed,
    #[error("Your daily quota ({limit} requests) has been used up")]
    QuotaExceeded { limit: u32 },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Unknown model: {0}")]
    UnknownBackend(String),
    #[error("Failed to open image, it may not be a valid image file: {0}")]
    InvalidImage(String),
    #[error("Download error: {0}")]
    FetchFailed(String),
    #[error("Malformed model output: {0}")]
    MalformedBackendOutput(String),
    #[error("Inference failed: {0}")]
    Backend(String),
    #[error("Model unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Unauthenticated => "unauthenticated",
            PipelineError::LoginFailed => "login_failed",
            PipelineError::QuotaExceeded { .. } => "quota_exceeded",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::UnknownBackend(_) => "unknown_backend",
            PipelineError::InvalidImage(_) => "invalid_image",
            PipelineError::FetchFailed(_) => "fetch_failed",
            PipelineError::MalformedBackendOutput(_) => "malformed_backend_output",
            PipelineError::Backend(_) => "backend",
            PipelineError::BackendUnavailable(_) => "backend_unavailable",
            PipelineError::Internal(_) => "internal",
        }
    }

    fn client_message(&self) -> String {
        if self.status_code().is_server_error() {
            // Details of server-side failures stay in the logs.
            return match self {
                PipelineError::FetchFailed(_) => self.to_string(),
                PipelineError::MalformedBackendOutput(_) | PipelineError::Backend(_) => {
                    "Inference failed".to_string()
                }
                PipelineError::BackendUnavailable(_) => "Model unavailable".to_string(),
                _ => "Internal server error".to_string(),
            };
        }
        self.to_string()
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Unauthenticated | PipelineError::LoginFailed => StatusCode::UNAUTHORIZED,
            PipelineError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::InvalidRequest(_) | PipelineError::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::UnknownBackend(_) => StatusCode::NOT_FOUND,
            PipelineError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
            PipelineError::MalformedBackendOutput(_)
            | PipelineError::Backend(_)
            | PipelineError::BackendUnavailable(_)
            | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.client_message(),
        })
    }
}

impl From<JwtError> for PipelineError {
    fn from(err: JwtError) -> Self {
        log::debug!("Credential rejected: {}", err);
        PipelineError::Unauthenticated
    }
}

impl From<AcquireError> for PipelineError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::InvalidImage(e) => PipelineError::InvalidImage(e),
            AcquireError::TooLarge { limit } => {
                PipelineError::InvalidImage(format!("image exceeds {} bytes", limit))
            }
            AcquireError::DownloadTooLarge { limit } => {
                PipelineError::FetchFailed(format!("image exceeds {} bytes", limit))
            }
            AcquireError::InvalidUrl(e) => PipelineError::FetchFailed(e),
            AcquireError::Http(e) => PipelineError::FetchFailed(e.to_string()),
            AcquireError::Status(status) => {
                PipelineError::FetchFailed(format!("remote server answered {}", status))
            }
        }
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::MalformedOutput(e) => PipelineError::MalformedBackendOutput(e),
            InferenceError::Unavailable(e) => PipelineError::BackendUnavailable(e),
            other => PipelineError::Backend(other.to_string()),
        }
    }
}
