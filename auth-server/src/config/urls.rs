use confique::Config;

/// Public base URLs of this service and of the client application.
///
/// Both are required in staging and production.
#[derive(Debug, Config, Clone, Default)]
pub struct UrlConfig {
    /// Public base URL of this auth service (the OAuth callback lives here)
    #[config(env = "AUTH_URLS_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Public base URL of the client application (browser lands here after login)
    #[config(env = "AUTH_URLS_CLIENT_APP_URL")]
    pub client_app_url: Option<String>,
}
