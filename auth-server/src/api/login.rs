//! Browser login through the upstream identity provider
//! (authorization code with PKCE).

use crate::errors::{ApiError, ErrorBody};
use crate::oauth::pkce::{random_token, PkcePair};
use crate::oauth::OAuthProviderClient;
use crate::openapi::LOGIN_TAG;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
};
use log::{info, warn};
use serde::Deserialize;
use url::form_urlencoded;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

const STATE_NONCE_PREFIX: &str = "oauth_state:";

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied access
    pub error: Option<String>,
}

fn provider(state: &AppState) -> Result<&OAuthProviderClient, ApiError> {
    state.provider.as_ref().ok_or_else(|| {
        ApiError::new(
            "oauth_not_configured",
            "Login is not available",
            StatusCode::SERVICE_UNAVAILABLE,
        )
    })
}

fn invalid_state() -> ApiError {
    ApiError::bad_request("invalid_state", "Login session is unknown or has expired")
}

/// Start a login: redirect the browser to the provider
#[utoipa::path(
    get,
    path = "/auth/login",
    tag = LOGIN_TAG,
    responses(
        (status = 303, description = "Redirect to the provider authorize URL"),
        (status = 503, description = "Login is not configured", body = ErrorBody)
    )
)]
async fn login(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let provider = provider(&state)?;
    let urls = state.redirects.resolve_urls(state.config.environment)?;
    let callback = urls.callback_uri()?;

    let login_state = random_token(24);
    let pkce = PkcePair::generate();
    let stored = state
        .tokens
        .store_nonce(
            &format!("{STATE_NONCE_PREFIX}{login_state}"),
            &pkce.verifier,
            provider.settings().state_ttl,
        )
        .await?;
    if !stored {
        warn!("Login state collision");
        return Err(ApiError::internal());
    }

    let target = provider.authorization_url(&callback, &login_state, &pkce.challenge);
    Ok(Redirect::to(target.as_str()))
}

/// Provider callback: exchange the code, issue tokens and hand them to the
/// client app in the URL fragment
#[utoipa::path(
    get,
    path = "/auth/callback",
    tag = LOGIN_TAG,
    params(CallbackQuery),
    responses(
        (status = 303, description = "Redirect to the client app with the issued tokens"),
        (status = 400, description = "Unknown or reused login state", body = ErrorBody),
        (status = 502, description = "Provider failed", body = ErrorBody),
        (status = 503, description = "Login is not configured", body = ErrorBody)
    )
)]
async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    let provider = provider(&state)?;
    if let Some(error) = &query.error {
        info!("Provider denied the login: {}", error);
        return Err(ApiError::bad_request(
            "oauth_denied",
            "The identity provider denied the login",
        ));
    }
    let login_state = query.state.as_deref().ok_or_else(invalid_state)?;
    let code = query
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::bad_request("invalid_request", "Missing authorization code"))?;

    // Consumed before anything else so a state can never be replayed
    let verifier = state
        .tokens
        .take_nonce(&format!("{STATE_NONCE_PREFIX}{login_state}"))
        .await?
        .ok_or_else(invalid_state)?;

    let urls = state.redirects.resolve_urls(state.config.environment)?;
    let callback = urls.callback_uri()?;
    let provider_token = provider.exchange_code(code, &callback, &verifier).await?;
    let identity = provider.fetch_identity(&provider_token).await?;

    let pair = state
        .tokens
        .issue(&identity.subject, &identity.email, Vec::new())
        .await?;
    info!("Login completed for {}", identity.subject);

    let fragment = form_urlencoded::Serializer::new(String::new())
        .append_pair("access_token", &pair.access_token)
        .append_pair("refresh_token", &pair.refresh_token)
        .append_pair("token_type", pair.token_type)
        .append_pair("expires_in", &pair.expires_in.to_string())
        .finish();
    Ok(Redirect::to(urls.login_success_uri(&fragment).as_str()))
}

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(login))
        .routes(routes!(callback))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;
    use http::{Method, StatusCode};
    use serde_json::json;
    use std::collections::HashMap;
    use url::Url;

    fn query_of(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    /// Start a login and return the `state` sent to the provider
    async fn start_login(fixture: &TestFixture) -> String {
        let response = fixture.get_with_token("/auth/login", None).await;
        response.assert_status(StatusCode::SEE_OTHER);
        query_of(&response.location())["state"].clone()
    }

    async fn mock_provider_success(fixture: &TestFixture) {
        fixture
            .add_provider_mock(
                Method::POST,
                "/token",
                json!({"access_token": "provider-token", "token_type": "Bearer"}),
                StatusCode::OK,
                1,
            )
            .await;
        fixture
            .add_provider_mock(
                Method::GET,
                "/userinfo",
                json!({"sub": "idp|42", "email": "user@example.com"}),
                StatusCode::OK,
                1,
            )
            .await;
    }

    #[tokio::test]
    async fn test_login_redirects_to_provider_with_service_callback() {
        let fixture = TestFixture::new().await;
        let response = fixture.get_with_token("/auth/login", None).await;
        response.assert_status(StatusCode::SEE_OTHER);

        let location = response.location();
        assert!(location
            .as_str()
            .starts_with(&format!("{}/authorize", fixture.provider_mock.uri())));
        let query = query_of(&location);
        assert_eq!(query["redirect_uri"], "https://auth.test.example.com/auth/callback");
        assert!(!query["redirect_uri"].contains("app.test.example.com"));
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["client_id"], "generic-id");
        assert!(!query["state"].is_empty());
    }

    #[tokio::test]
    async fn test_full_login() {
        let fixture = TestFixture::new().await;
        mock_provider_success(&fixture).await;
        let state = start_login(&fixture).await;

        let response = fixture
            .get_with_token(format!("/auth/callback?code=abc&state={state}"), None)
            .await;
        response.assert_status(StatusCode::SEE_OTHER);

        let location = response.location();
        assert_eq!(location.host_str(), Some("app.test.example.com"));
        assert_eq!(location.path(), "/auth/success");
        let fragment: HashMap<String, String> =
            url::form_urlencoded::parse(location.fragment().expect("fragment").as_bytes())
                .into_owned()
                .collect();
        assert_eq!(fragment["token_type"], "Bearer");
        assert_eq!(fragment["expires_in"], "900");

        let claims = fixture
            .get_with_token("/auth/verify", Some(fragment["access_token"].as_str()))
            .await;
        claims.assert_ok();
        assert_eq!(claims.json["sub"], "idp|42");
        assert_eq!(claims.json["email"], "user@example.com");

        // The state is use-once
        fixture
            .get_with_token(format!("/auth/callback?code=abc&state={state}"), None)
            .await
            .assert_error(StatusCode::BAD_REQUEST, "invalid_state");
    }

    #[tokio::test]
    async fn test_unknown_state() {
        let fixture = TestFixture::new().await;
        fixture
            .get_with_token("/auth/callback?code=abc&state=forged", None)
            .await
            .assert_error(StatusCode::BAD_REQUEST, "invalid_state");
        fixture
            .get_with_token("/auth/callback?code=abc", None)
            .await
            .assert_error(StatusCode::BAD_REQUEST, "invalid_state");
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let fixture = TestFixture::new().await;
        fixture
            .add_provider_mock(
                Method::POST,
                "/token",
                json!({"error": "invalid_grant"}),
                StatusCode::BAD_REQUEST,
                1,
            )
            .await;
        let state = start_login(&fixture).await;

        let response = fixture
            .get_with_token(format!("/auth/callback?code=expired&state={state}"), None)
            .await;
        response.assert_error(StatusCode::BAD_GATEWAY, "oauth_provider_error");
        assert!(!response.json.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_provider_denied() {
        let fixture = TestFixture::new().await;
        fixture
            .get_with_token("/auth/callback?error=access_denied&state=x", None)
            .await
            .assert_error(StatusCode::BAD_REQUEST, "oauth_denied");
    }

    #[tokio::test]
    async fn test_login_without_provider() {
        let fixture = TestFixture::with_settings(|settings| {
            settings.oauth.authorize_url = None;
        })
        .await;
        fixture
            .get_with_token("/auth/login", None)
            .await
            .assert_error(StatusCode::SERVICE_UNAVAILABLE, "oauth_not_configured");
    }

    #[tokio::test]
    async fn test_login_refuses_misconfigured_redirects() {
        let fixture = TestFixture::with_settings(|settings| {
            settings.environment = "production".to_string();
            settings.urls.client_app_url = None;
        })
        .await;
        fixture
            .get_with_token("/auth/login", None)
            .await
            .assert_error(StatusCode::SERVICE_UNAVAILABLE, "redirect_misconfigured");
    }
}
