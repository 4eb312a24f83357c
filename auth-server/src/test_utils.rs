use crate::config::Settings;
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::matchers;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// Test fixture driving the full router against a mocked identity provider.
///
/// The fixture builds settings pointing the OAuth endpoints at a wiremock
/// server, an [`AppState`] over the in-memory registry with the lifecycle
/// already READY, and the application router.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///
///     let pair = fixture
///         .post("/auth/token", &json!({"subject": "user-1", "email": "u@example.com"}))
///         .await;
///     pair.assert_ok();
///
///     let claims = fixture
///         .get_with_token("/auth/verify", pair.json["access_token"].as_str())
///         .await;
///     claims.assert_ok();
/// }
/// ```
pub struct TestFixture {
    pub app: Router,
    /// Settings `state` was built from
    pub settings: Settings,
    /// Shared state behind `app`, for issuing tokens or driving the lifecycle directly
    pub state: AppState,
    /// Mock server for the OAuth provider
    pub provider_mock: MockServer,
}

impl TestFixture {
    /// Creates a new test fixture with the default test settings.
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    /// Creates a fixture after letting `configure` adjust the settings.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let fixture = TestFixture::with_settings(|settings| {
    ///     settings.environment = "development".to_string();
    /// })
    /// .await;
    /// ```
    pub async fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let provider_mock = MockServer::start().await;
        let mut settings = Settings::for_test_with_provider(&provider_mock);
        configure(&mut settings);

        let state = AppState::for_testing(&settings);
        let app = create_app(state.clone());

        Self {
            app,
            settings,
            state,
            provider_mock,
        }
    }

    /// Called by the constructors; only the first call in a test binary
    /// takes effect.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Request builder carrying the service API key as bearer credential.
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        self.request_builder_with_token(method, uri, Some(self.settings.service_api_key.as_str()))
    }

    /// Creates a request builder with `token` as the bearer credential, or
    /// without an `Authorization` header when `token` is `None`.
    pub fn request_builder_with_token(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        token: Option<&str>,
    ) -> http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("Content-Type", "application/json");

        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        builder
    }

    /// Sends a GET request authenticated with the service API key.
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a GET request with an explicit bearer token (or none).
    ///
    /// # Examples
    ///
    /// ```rust
    /// // Public route, no credentials
    /// let response = fixture.get_with_token("/health/ready", None).await;
    /// response.assert_ok();
    /// ```
    pub async fn get_with_token(&self, uri: impl AsRef<str>, token: Option<&str>) -> TestResponse {
        let request = self
            .request_builder_with_token(Method::GET, uri, token)
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a POST request with a JSON body, authenticated with the service API key.
    pub async fn post<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder(Method::POST, uri)
            .body(Body::from(json_body))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a POST request with a JSON body and an explicit bearer token (or none).
    ///
    /// # Examples
    ///
    /// ```rust
    /// let response = fixture
    ///     .post_with_token("/auth/refresh", &json!({"refresh_token": token}), None)
    ///     .await;
    /// response.assert_ok();
    /// ```
    pub async fn post_with_token<T: Serialize>(
        &self,
        uri: impl AsRef<str>,
        body: &T,
        token: Option<&str>,
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder_with_token(Method::POST, uri, token)
            .body(Body::from(json_body))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Runs `request` through the router. Redirects are not followed.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Redirects and 204s have no body
        let json = serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}));

        TestResponse {
            status,
            headers,
            json,
        }
    }

    /// Mounts a JSON response on the identity provider mock, expected
    /// `expected_calls` times.
    pub async fn add_provider_mock(
        &self,
        method: Method,
        path: impl Into<String>,
        response_body: impl Serialize,
        status_code: StatusCode,
        expected_calls: u64,
    ) {
        Mock::given(matchers::method(method.as_str()))
            .and(matchers::path(path.into()))
            .respond_with(ResponseTemplate::new(status_code.as_u16()).set_body_json(response_body))
            .expect(expected_calls)
            .mount(&self.provider_mock)
            .await;
    }
}

/// Status, headers and parsed body of a routed request.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Parsed body, `{}` when empty or not JSON
    pub json: Value,
}

impl TestResponse {
    /// Panics with the body when the status differs.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Asserts the stable error code of an error body.
    pub fn assert_error(&self, status: StatusCode, code: &str) -> &Self {
        self.assert_status(status);
        assert_eq!(self.json["error"], code, "unexpected error body: {}", self.json);
        self
    }

    /// The `Location` header of a redirect, parsed as a URL.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or not an absolute URL.
    pub fn location(&self) -> url::Url {
        let raw = self
            .headers
            .get(http::header::LOCATION)
            .expect("Missing Location header")
            .to_str()
            .expect("Location header is not valid UTF-8");
        url::Url::parse(raw).expect("Location header is not an absolute URL")
    }

    /// Body deserialized into `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }
}
