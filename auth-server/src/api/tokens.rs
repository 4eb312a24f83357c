use crate::api::authn_middleware::bearer_token;
use crate::api::extract::ApiJson;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::TOKENS_TAG;
use crate::state::AppState;
use crate::token::{Claims, RevokeTarget, TokenPair};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueRequest {
    pub subject: String,
    pub email: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Issue a new token family for a subject
#[utoipa::path(
    post,
    path = "/auth/token",
    tag = TOKENS_TAG,
    request_body = IssueRequest,
    responses(
        (status = 200, description = "New access/refresh pair", body = TokenPair),
        (status = 400, description = "Missing subject or email", body = ErrorBody),
        (status = 503, description = "Token registry unavailable", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
async fn issue(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<IssueRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    if request.subject.trim().is_empty() || request.email.trim().is_empty() {
        return Err(ApiError::bad_request(
            "invalid_request",
            "subject and email are required",
        ));
    }
    let pair = state
        .tokens
        .issue(&request.subject, &request.email, request.permissions)
        .await?;
    Ok(Json(pair))
}

/// Rotate a refresh token. Each refresh token can be used once.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = TOKENS_TAG,
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated access/refresh pair", body = TokenPair),
        (status = 401, description = "Invalid, expired, revoked or reused token", body = ErrorBody),
        (status = 503, description = "Token registry unavailable", body = ErrorBody)
    )
)]
async fn refresh(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state.tokens.refresh(&request.refresh_token).await?;
    Ok(Json(pair))
}

/// Revoke the family of a refresh token. Expired tokens are accepted.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = TOKENS_TAG,
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Family revoked"),
        (status = 401, description = "Invalid token", body = ErrorBody),
        (status = 503, description = "Token registry unavailable", body = ErrorBody)
    )
)]
async fn logout(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .tokens
        .revoke(RevokeTarget::RefreshToken(&request.refresh_token))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Claims of the bearer access token
#[utoipa::path(
    get,
    path = "/auth/verify",
    tag = TOKENS_TAG,
    responses(
        (status = 200, description = "Token is valid", body = Claims),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 503, description = "Revocation state unavailable", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Claims>, ApiError> {
    let token = bearer_token(&headers)?;
    let claims = state.tokens.validate_access(token).await?;
    Ok(Json(claims))
}

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(refresh))
        .routes(routes!(logout))
        .routes(routes!(verify))
}

/// Routes behind service authentication
pub(super) fn protected_router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(issue))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{TestFixture, TestResponse};
    use http::StatusCode;
    use serde_json::json;

    async fn issue_pair(fixture: &TestFixture) -> TestResponse {
        let response = fixture
            .post(
                "/auth/token",
                &json!({
                    "subject": "user-1",
                    "email": "user@example.com",
                    "permissions": ["orders:read"],
                }),
            )
            .await;
        response.assert_ok();
        response
    }

    fn field<'a>(response: &'a TestResponse, name: &str) -> &'a str {
        response.json[name].as_str().expect("string field")
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let fixture = TestFixture::new().await;
        let pair = issue_pair(&fixture).await;
        assert_eq!(pair.json["token_type"], "Bearer");
        assert_eq!(pair.json["expires_in"], 900);
        assert!(pair.json.get("family_id").is_none());

        let claims = fixture
            .get_with_token("/auth/verify", Some(field(&pair, "access_token")))
            .await;
        claims.assert_ok();
        assert_eq!(claims.json["sub"], "user-1");
        assert_eq!(claims.json["email"], "user@example.com");
        assert_eq!(claims.json["kind"], "access");
        assert_eq!(claims.json["permissions"], json!(["orders:read"]));
    }

    #[tokio::test]
    async fn test_issue_requires_service_credentials() {
        let fixture = TestFixture::new().await;
        let body = json!({"subject": "user-1", "email": "user@example.com"});

        fixture
            .post_with_token("/auth/token", &body, None)
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "missing_credentials");
        fixture
            .post_with_token("/auth/token", &body, Some("not-the-key"))
            .await
            .assert_error(StatusCode::FORBIDDEN, "forbidden");
    }

    #[tokio::test]
    async fn test_issue_validates_input() {
        let fixture = TestFixture::new().await;
        fixture
            .post("/auth/token", &json!({"subject": " ", "email": "user@example.com"}))
            .await
            .assert_error(StatusCode::BAD_REQUEST, "invalid_request");
    }

    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let fixture = TestFixture::new().await;
        let pair = issue_pair(&fixture).await;
        let body = json!({"refresh_token": field(&pair, "refresh_token")});

        let rotated = fixture.post_with_token("/auth/refresh", &body, None).await;
        rotated.assert_ok();
        assert_ne!(field(&rotated, "refresh_token"), field(&pair, "refresh_token"));

        fixture
            .post_with_token("/auth/refresh", &body, None)
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "token_reuse");

        // The rotated lineage survives the replay
        fixture
            .get_with_token("/auth/verify", Some(field(&rotated, "access_token")))
            .await
            .assert_ok();
        fixture
            .post_with_token(
                "/auth/refresh",
                &json!({"refresh_token": field(&rotated, "refresh_token")}),
                None,
            )
            .await
            .assert_ok();
    }

    #[tokio::test]
    async fn test_refresh_with_access_token() {
        let fixture = TestFixture::new().await;
        let pair = issue_pair(&fixture).await;
        fixture
            .post_with_token(
                "/auth/refresh",
                &json!({"refresh_token": field(&pair, "access_token")}),
                None,
            )
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "wrong_token_kind");
    }

    #[tokio::test]
    async fn test_logout_revokes_family() {
        let fixture = TestFixture::new().await;
        let pair = issue_pair(&fixture).await;
        let body = json!({"refresh_token": field(&pair, "refresh_token")});

        let response = fixture.post_with_token("/auth/logout", &body, None).await;
        response.assert_status(StatusCode::NO_CONTENT);

        fixture
            .get_with_token("/auth/verify", Some(field(&pair, "access_token")))
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "token_revoked");
        fixture
            .post_with_token("/auth/refresh", &body, None)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        // Idempotent
        fixture
            .post_with_token("/auth/logout", &body, None)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let fixture = TestFixture::new().await;
        fixture
            .get_with_token("/auth/verify", None)
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "missing_credentials");
        fixture
            .get_with_token("/auth/verify", Some("a.b"))
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "malformed_token");
    }
}
