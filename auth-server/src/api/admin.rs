use crate::api::extract::ApiJson;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::ADMIN_TAG;
use crate::state::AppState;
use crate::token::{IssuedToken, RevokeTarget};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use log::info;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServiceTokenRequest {
    /// Name of the calling service
    pub subject: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Revoke every generation of a token family
#[utoipa::path(
    post,
    path = "/admin/families/{family_id}/revoke",
    tag = ADMIN_TAG,
    params(("family_id" = String, Path, description = "Token family id")),
    responses(
        (status = 204, description = "Family revoked (or already revoked)"),
        (status = 503, description = "Token registry unavailable", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
async fn revoke_family(
    State(state): State<AppState>,
    Path(family_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let revoked = state.tokens.revoke(RevokeTarget::Family(&family_id)).await?;
    if !revoked {
        info!("Family {} was already revoked or unknown", family_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Mint a short-lived token for an internal caller
#[utoipa::path(
    post,
    path = "/admin/service-tokens",
    tag = ADMIN_TAG,
    request_body = ServiceTokenRequest,
    responses(
        (status = 200, description = "Service token", body = IssuedToken),
        (status = 400, description = "Missing subject", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
async fn issue_service_token(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ServiceTokenRequest>,
) -> Result<Json<IssuedToken>, ApiError> {
    if request.subject.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_request", "subject is required"));
    }
    let token = state
        .tokens
        .issue_service_token(&request.subject, request.permissions)?;
    info!("Issued service token for {}", request.subject);
    Ok(Json(token))
}

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(revoke_family))
        .routes(routes!(issue_service_token))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;
    use http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_revoke_family() {
        let fixture = TestFixture::new().await;
        let pair = fixture
            .state
            .tokens
            .issue("user-1", "user@example.com", vec![])
            .await
            .expect("pair");

        let response = fixture
            .post(format!("/admin/families/{}/revoke", pair.family_id), &json!({}))
            .await;
        response.assert_status(StatusCode::NO_CONTENT);

        fixture
            .post_with_token(
                "/auth/refresh",
                &json!({"refresh_token": pair.refresh_token}),
                None,
            )
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "token_revoked");
    }

    #[tokio::test]
    async fn test_revoke_requires_service_credentials() {
        let fixture = TestFixture::new().await;
        let pair = fixture
            .state
            .tokens
            .issue("user-1", "user@example.com", vec![])
            .await
            .expect("pair");

        let response = fixture
            .post_with_token(
                format!("/admin/families/{}/revoke", pair.family_id),
                &json!({}),
                Some(pair.access_token.as_str()),
            )
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_service_token_round_trip() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .post(
                "/admin/service-tokens",
                &json!({"subject": "billing-worker", "permissions": ["tokens:issue"]}),
            )
            .await;
        response.assert_ok();
        assert_eq!(response.json["expires_in"], 300);
        let service_token = response.json["access_token"]
            .as_str()
            .expect("token")
            .to_string();

        // A service token authenticates privileged routes
        fixture
            .post_with_token(
                "/auth/token",
                &json!({"subject": "user-2", "email": "two@example.com"}),
                Some(service_token.as_str()),
            )
            .await
            .assert_ok();

        // but is not an access token
        fixture
            .get_with_token("/auth/verify", Some(service_token.as_str()))
            .await
            .assert_error(StatusCode::UNAUTHORIZED, "wrong_token_kind");
    }
}
