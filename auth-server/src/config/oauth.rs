//! OAuth 2.0 provider configuration

use confique::Config;

/// Generic OAuth 2.0 / OIDC provider endpoints.
///
/// Client credentials are not part of this struct: they are resolved per
/// environment by [`crate::config::snapshot::resolve_oauth_credentials`].
#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Provider authorization endpoint
    #[config(env = "AUTH_OAUTH_AUTHORIZE_URL")]
    pub authorize_url: Option<String>,

    /// Provider token endpoint (authorization-code exchange)
    #[config(env = "AUTH_OAUTH_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Provider userinfo endpoint
    #[config(env = "AUTH_OAUTH_USERINFO_URL")]
    pub userinfo_url: Option<String>,

    /// Provider URL probed by the health monitor
    #[config(env = "AUTH_OAUTH_HEALTH_URL")]
    pub health_url: Option<String>,

    /// Space-separated scopes requested at login (default: "openid email profile")
    #[config(env = "AUTH_OAUTH_SCOPES", default = "openid email profile")]
    pub scopes: String,

    /// Lifetime of a login `state` value in seconds (default: 600)
    #[config(env = "AUTH_OAUTH_STATE_TTL", default = 600)]
    pub state_ttl: u64,

    /// Timeout for provider calls in seconds (default: 10)
    #[config(env = "AUTH_OAUTH_CLIENT_TIMEOUT", default = 10)]
    pub client_timeout: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: None,
            token_url: None,
            userinfo_url: None,
            health_url: None,
            scopes: "openid email profile".to_string(),
            state_ttl: 600,
            client_timeout: 10,
        }
    }
}

impl OAuthConfig {
    /// Get scopes as a vector
    pub fn get_scopes(&self) -> Vec<String> {
        self.scopes
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }
}
