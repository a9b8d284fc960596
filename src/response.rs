//! Maps pipeline outcomes onto the JSON shapes callers see.

use crate::error::RunError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Success body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOutput {
    pub output: String,
}

impl RunOutput {
    /// Lossy UTF-8 decode with trailing whitespace removed.
    pub fn from_stdout(stdout: &[u8]) -> Self {
        Self {
            output: String::from_utf8_lossy(stdout).trim_end().to_string(),
        }
    }
}

/// Error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

impl RunError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RunError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RunError::SourceNotPermitted(_) => StatusCode::FORBIDDEN,
            RunError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
            RunError::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RunError::StagingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RunError::ExecutionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RunError::ExecutionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message safe to hand to the caller.
    pub fn detail(&self) -> String {
        match self {
            RunError::SourceNotPermitted(_) => "Repo not allowed".to_string(),
            RunError::ExecutionFailed(stderr) => stderr.clone(),
            RunError::ExecutionTimeout(_) => "Execution timed out".to_string(),
            // Display for StagingFailed leaves the source (and its path) out.
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        if let RunError::StagingFailed(source) = &self {
            error!("Staging failed: {}", source);
        }
        let body = ErrorBody {
            error: self.category().to_string(),
            detail: self.detail(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl IntoResponse for RunOutput {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
