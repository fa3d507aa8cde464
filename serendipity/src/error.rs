//! Error taxonomy for the gateway and the HTTP surface.

use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, status, Responder};
use rocket::serde::json::Json;
use serde_json::json;

use crate::sessions::SessionError;

/// Failures of a single search gateway call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Query index outside the catalog.
    #[error("Invalid query index")]
    InvalidIndex,

    /// Upstream credential missing. Fatal for an aggregation run.
    #[error("API key not configured")]
    Configuration,

    /// Transport failure, non-2xx status or unreadable body.
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

/// Errors returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid query index")]
    InvalidIndex,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Configuration(_) | ApiError::Internal(_) => Status::InternalServerError,
            ApiError::Validation(_) | ApiError::InvalidIndex => Status::BadRequest,
            ApiError::Unauthorized => Status::Unauthorized,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Upstream(_) => Status::BadGateway,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidIndex => ApiError::InvalidIndex,
            GatewayError::Configuration => {
                ApiError::Configuration(GatewayError::Configuration.to_string())
            }
            GatewayError::Upstream(msg) => ApiError::Upstream(format!("Search failed: {}", msg)),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownSession => ApiError::Unauthorized,
            SessionError::UnknownArticle(id) => {
                ApiError::NotFound(format!("Unknown article: {}", id))
            }
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.code >= 500 {
            tracing::error!(status = status.code, error = %self, "request failed");
        } else {
            tracing::debug!(status = status.code, error = %self, "request rejected");
        }
        status::Custom(status, Json(json!({ "error": self.to_string() }))).respond_to(req)
    }
}
