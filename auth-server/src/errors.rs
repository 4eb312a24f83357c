use crate::oauth::{ProviderError, RedirectError};
use crate::token::TokenError;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub error: String,
    /// Short human-readable message
    pub detail: String,
}

/// Error returned by handlers. Internal details are logged where the error
/// is converted, never put in `detail`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub error: &'static str,
    pub detail: String,
    pub status_code: StatusCode,
}

impl ApiError {
    pub fn new<S: ToString>(error: &'static str, detail: S, status_code: StatusCode) -> Self {
        Self {
            error,
            detail: detail.to_string(),
            status_code,
        }
    }

    /// Create new Bad Request Error (400)
    pub fn bad_request<S: ToString>(error: &'static str, detail: S) -> Self {
        Self::new(error, detail, StatusCode::BAD_REQUEST)
    }

    /// Create new Unauthorized Error (401)
    pub fn unauthorized<S: ToString>(error: &'static str, detail: S) -> Self {
        Self::new(error, detail, StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden<S: ToString>(detail: S) -> Self {
        Self::new("forbidden", detail, StatusCode::FORBIDDEN)
    }

    /// Create new Service Unavailable Error (503) with the generic message
    pub fn unavailable() -> Self {
        Self::new(
            "service_unavailable",
            "Service temporarily unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }

    /// Create new Internal Server Error (500) with the generic message
    pub fn internal() -> Self {
        Self::new(
            "internal_error",
            "Internal server error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            error: self.error.to_string(),
            detail: self.detail,
        };
        (self.status_code, Json(body)).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        let code = err.code();
        let detail = match &err {
            TokenError::Registry(e) => {
                error!("Token registry failure: {}", e);
                return Self::unavailable();
            }
            TokenError::Encoding(e) => {
                error!("Token encoding failure: {}", e);
                return Self::internal();
            }
            TokenError::Expired => "Token has expired",
            TokenError::Signature => "Token signature is invalid",
            TokenError::Malformed(_) => "Token is malformed",
            TokenError::Claim(_) => "Token claims are invalid",
            TokenError::WrongKind { .. } => "Wrong token type",
            TokenError::Revoked => "Token has been revoked",
            TokenError::Reuse => "Refresh token has already been used",
        };
        debug!("Rejected token: {}", err);
        Self::unauthorized(code, detail)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection);
        Self::new("invalid_request", rejection.body_text(), rejection.status())
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        error!("OAuth provider error: {}", err);
        Self::new(
            "oauth_provider_error",
            "The identity provider could not complete the login",
            StatusCode::BAD_GATEWAY,
        )
    }
}

impl From<RedirectError> for ApiError {
    fn from(err: RedirectError) -> Self {
        error!("Refusing to build OAuth redirect: {}", err);
        Self::new(
            "redirect_misconfigured",
            "Login is not available",
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }
}
