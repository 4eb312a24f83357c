//! Token signing and lifetime configuration

use confique::Config;

/// Token configuration
#[derive(Debug, Config, Clone)]
pub struct TokenConfig {
    /// Signing secret, at least 32 bytes
    #[config(env = "AUTH_TOKENS_SECRET")]
    pub secret: Option<String>,

    /// Signing algorithm: HS256, HS384 or HS512 (default: HS256)
    #[config(env = "AUTH_TOKENS_ALGORITHM", default = "HS256")]
    pub algorithm: String,

    /// Issuer claim written into every token (default: "auth-service")
    #[config(env = "AUTH_TOKENS_ISSUER", default = "auth-service")]
    pub issuer: String,

    /// Access token TTL in seconds (default: 900 = 15 minutes)
    #[config(env = "AUTH_TOKENS_ACCESS_TTL", default = 900)]
    pub access_ttl: u64,

    /// Refresh token TTL in seconds (default: 604800 = 7 days)
    #[config(env = "AUTH_TOKENS_REFRESH_TTL", default = 604800)]
    pub refresh_ttl: u64,

    /// Service token TTL in seconds (default: 300)
    #[config(env = "AUTH_TOKENS_SERVICE_TTL", default = 300)]
    pub service_ttl: u64,

    /// Reject access tokens of revoked families on every validation (default: true)
    #[config(env = "AUTH_TOKENS_CHECK_ACCESS_REVOCATION", default = true)]
    pub check_access_revocation: bool,

    /// What to do when a rotated refresh token is presented again:
    /// "reject-only" or "revoke-family" (default: reject-only)
    #[config(env = "AUTH_TOKENS_REUSE_POLICY", default = "reject-only")]
    pub reuse_policy: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: None,
            algorithm: "HS256".to_string(),
            issuer: "auth-service".to_string(),
            access_ttl: 900,
            refresh_ttl: 604_800,
            service_ttl: 300,
            check_access_revocation: true,
            reuse_policy: "reject-only".to_string(),
        }
    }
}
