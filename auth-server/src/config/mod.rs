pub(crate) use crate::config::health::HealthConfig;
pub(crate) use crate::config::oauth::OAuthConfig;
pub(crate) use crate::config::registry::{RegistryConfig, RegistryStore};
pub(crate) use crate::config::snapshot::{
    ConfigSnapshot, ConfigurationError, Environment, SigningSecret,
};
pub(crate) use crate::config::tokens::TokenConfig;
pub(crate) use crate::config::urls::UrlConfig;
use confique::Config;

pub mod health;
pub mod oauth;
pub mod registry;
pub mod snapshot;
pub mod tokens;
pub mod urls;

/// Optional settings file, read after the environment
const SETTINGS_FILE: &str = "auth-server.toml";

/// Main configuration structure for the auth service
#[derive(Debug, Config, Clone)]
pub struct Settings {
    /// Deployment tier: development, staging, production or test (default: development)
    #[config(env = "AUTH_ENVIRONMENT", default = "development")]
    pub environment: String,

    /// The port the auth server will listen to (default: 8080)
    #[config(env = "AUTH_PORT", default = 8080)]
    pub port: u16,

    /// Static key for privileged routes (token issuance, admin revocation)
    #[config(env = "AUTH_SERVICE_API_KEY", default = "")]
    pub service_api_key: String,

    /// Seconds granted to in-flight requests after a termination signal (default: 30)
    #[config(env = "AUTH_SHUTDOWN_GRACE_PERIOD", default = 30)]
    pub shutdown_grace_period: u64,

    /// Postgres URL used for the database dependency check
    #[config(env = "AUTH_DATABASE_URL")]
    pub database_url: Option<String>,

    #[config(nested)]
    pub tokens: TokenConfig,

    #[config(nested)]
    pub registry: RegistryConfig,

    #[config(nested)]
    pub urls: UrlConfig,

    #[config(nested)]
    pub oauth: OAuthConfig,

    #[config(nested)]
    pub health: HealthConfig,
}

impl Settings {
    /// Load settings from environment variables (and the optional settings file)
    pub fn new() -> Result<Self, ConfigurationError> {
        Self::builder()
            .env()
            .file(SETTINGS_FILE)
            .load()
            .map_err(|e| ConfigurationError::Load(e.to_string()))
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            environment: "test".to_string(),
            port: 0, // Let the OS choose a port
            service_api_key: "test_service_key".to_string(),
            shutdown_grace_period: 1,
            database_url: None,
            tokens: TokenConfig {
                secret: Some("0123456789abcdef0123456789abcdef".to_string()),
                ..Default::default()
            },
            registry: RegistryConfig::default(),
            urls: UrlConfig {
                service_url: Some("https://auth.test.example.com".to_string()),
                client_app_url: Some("https://app.test.example.com".to_string()),
            },
            oauth: OAuthConfig {
                authorize_url: Some("https://idp.example.com/authorize".to_string()),
                token_url: Some("https://idp.example.com/token".to_string()),
                userinfo_url: Some("https://idp.example.com/userinfo".to_string()),
                ..Default::default()
            },
            health: HealthConfig::default(),
        }
    }

    #[cfg(test)]
    pub fn for_test_with_provider(provider_mock: &wiremock::MockServer) -> Self {
        let mut settings = Self::for_test();
        settings.oauth = OAuthConfig {
            authorize_url: Some(format!("{}/authorize", provider_mock.uri())),
            token_url: Some(format!("{}/token", provider_mock.uri())),
            userinfo_url: Some(format!("{}/userinfo", provider_mock.uri())),
            health_url: Some(format!("{}/health", provider_mock.uri())),
            ..Default::default()
        };
        settings
    }
}
