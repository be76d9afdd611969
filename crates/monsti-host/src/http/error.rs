use crate::error::HostError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use monsti_store::StoreError;

/// Failure of a request, mapped onto an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failed: {0}")]
    UpstreamFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::NotFound => StatusCode::NOT_FOUND,
            PipelineError::Unauthorized => StatusCode::UNAUTHORIZED,
            PipelineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::Conflict(_) => StatusCode::CONFLICT,
            PipelineError::UpstreamFailed(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<HostError> for PipelineError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::UnknownSite(_) => PipelineError::NotFound,
            HostError::Store(StoreError::Exists(target)) => {
                PipelineError::Conflict(format!("{target} already exists"))
            }
            HostError::Mail(message) => PipelineError::UpstreamFailed(message),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        HostError::from(err).into()
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            PipelineError::NotFound => "Document not found".to_string(),
            PipelineError::Unauthorized => "Unauthorized.".to_string(),
            PipelineError::Internal(message) => {
                tracing::error!("request failed: {message}");
                "Application error.".to_string()
            }
            PipelineError::UpstreamFailed(message) => {
                tracing::error!("upstream failure: {message}");
                "Application error.".to_string()
            }
            PipelineError::BadRequest(message) | PipelineError::Conflict(message) => {
                message.clone()
            }
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_errors_map_to_statuses() {
        let unknown: PipelineError = HostError::UnknownSite("x".into()).into();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        let exists: PipelineError = StoreError::Exists("/a".into()).into();
        assert_eq!(exists.status(), StatusCode::CONFLICT);
        let mail: PipelineError = HostError::Mail("sendmail exited".into()).into();
        assert_eq!(mail.status(), StatusCode::BAD_GATEWAY);
        let other: PipelineError = HostError::Render("boom".into()).into();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
