//! Gate rejections and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Why a request was turned away before its stream started.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("monthly budget exhausted (${cost:.2} of ${limit:.2})")]
    BudgetExceeded { cost: f64, limit: f64 },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Unauthorized => "unauthorized",
            Self::Malformed(_) => "malformed_request",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Failures while assembling the gateway at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Provider(#[from] concierge_core::error::ProviderError),

    #[error(transparent)]
    Tool(#[from] concierge_core::error::ToolError),

    #[error(transparent)]
    Persistence(#[from] concierge_core::error::PersistenceError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
