use crate::errors::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::HeaderMap;
use log::warn;

const FORBIDDEN_DETAIL: &str =
    "You are not authorized to access this resource, please check your credentials.";

/// Token from `Authorization: Bearer <token>`
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers.get(http::header::AUTHORIZATION).ok_or_else(|| {
        ApiError::unauthorized("missing_credentials", "Missing Authorization header")
    })?;
    let value = header.to_str().map_err(|e| {
        warn!("Failed to parse Authorization header to string: {}", e);
        ApiError::unauthorized("invalid_credentials", "Invalid Authorization header")
    })?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => {
            warn!("Invalid Authorization header format, missing 'Bearer ' prefix");
            Err(ApiError::unauthorized(
                "invalid_credentials",
                "Invalid Authorization header",
            ))
        }
    }
}

/// Privileged routes accept the service API key or a valid service token
pub(super) async fn service_authentication_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !request.headers().contains_key(http::header::AUTHORIZATION) {
        warn!("Missing Authorization header");
        return ApiError::unauthorized("missing_credentials", "Missing Authorization header")
            .into_response();
    }
    let authorized = bearer_token(request.headers()).is_ok_and(|token| {
        state.is_service_api_key(token) || state.tokens.validate_service(token).is_ok()
    });

    if !authorized {
        warn!("Service authentication failed");
        return ApiError::forbidden(FORBIDDEN_DETAIL).into_response();
    }
    next.run(request).await
}
