//! Immutable, validated view of the loaded [`Settings`].
//!
//! [`ConfigSnapshot::build`] never fails outright: every defect becomes a
//! [`ConfigurationError`] in the returned issue list, and the lifecycle
//! controller decides through the environment policy whether the issues are
//! fatal (staging, production) or only warnings (development, test).

use crate::config::{RegistryStore, Settings, UrlConfig};
use crate::oauth::redirect::{OAuthRedirectResolver, RedirectError};
use crate::token::ReusePolicy;
use jsonwebtoken::Algorithm;
use log::warn;
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

/// Minimum length of the signing secret in bytes
pub const MIN_SECRET_LEN: usize = 32;

pub(crate) const CLIENT_ID_VAR: &str = "AUTH_OAUTH_CLIENT_ID";
pub(crate) const CLIENT_SECRET_VAR: &str = "AUTH_OAUTH_CLIENT_SECRET";

/// Reads a raw variable by name. `main` passes the process environment,
/// tests pass a map.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Failed to load settings: {0}")]
    Load(String),
    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),
    #[error("Signing secret is not set")]
    MissingSecret,
    #[error("Signing secret must be at least {min} bytes, got {actual}")]
    ShortSecret { min: usize, actual: usize },
    #[error("Unsupported signing algorithm '{0}' (expected HS256, HS384 or HS512)")]
    UnsupportedAlgorithm(String),
    #[error("{0} TTL must be greater than zero")]
    ZeroTtl(&'static str),
    #[error("Access token TTL ({access}s) must be shorter than refresh token TTL ({refresh}s)")]
    TtlOrder { access: u64, refresh: u64 },
    #[error("Unknown refresh token reuse policy '{0}'")]
    UnknownReusePolicy(String),
    #[error("Unknown registry store '{0}'")]
    UnknownRegistryStore(String),
    #[error("Redis URL is required for the redis registry store")]
    MissingRedisUrl,
    #[error("The in-memory registry is not shared between instances")]
    UnsharedRegistry,
    #[error("Database URL is not set")]
    MissingDatabaseUrl,
    #[error("Service API key is not set")]
    MissingServiceApiKey,
    #[error("OAuth {0} is not set")]
    MissingOAuthEndpoint(&'static str),
    #[error("OAuth {name} is not a valid URL: {reason}")]
    InvalidOAuthEndpoint { name: &'static str, reason: String },
    #[error("OAuth client credentials are missing (looked up {0})")]
    MissingOAuthCredentials(String),
    #[error("OAuth client credentials are incomplete: {0} is set without its pair")]
    IncompleteOAuthCredentials(String),
    #[error("Redirect configuration: {0}")]
    Redirect(#[from] RedirectError),
}

/// Deployment tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Test,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Suffix used for environment-qualified variables, e.g. `STAGING`
    pub fn qualifier(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }

    pub fn is_production_like(&self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" | "testing" => Ok(Self::Test),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigurationError::UnknownEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symmetric signing key. Never printed.
#[derive(Clone)]
pub struct SigningSecret {
    bytes: Arc<[u8]>,
    ephemeral: bool,
}

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            ephemeral: false,
        }
    }

    /// Random per-process secret, tokens do not survive a restart
    pub fn ephemeral() -> Self {
        let mut bytes = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            bytes: Arc::from(bytes),
            ephemeral: true,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("len", &self.bytes.len())
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

/// OAuth client id/secret pair together with the variable it came from
#[derive(Clone, PartialEq)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub source: String,
}

impl fmt::Debug for OAuthClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientCredentials")
            .field("client_id", &self.client_id)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Resolve the OAuth client pair for `environment`.
///
/// `AUTH_OAUTH_CLIENT_ID_<TIER>` / `AUTH_OAUTH_CLIENT_SECRET_<TIER>` win over
/// the generic names. Both halves must come from the same level; a half-set
/// qualified pair is an error and does not fall through to the generic pair.
pub fn resolve_oauth_credentials(
    environment: Environment,
    lookup: EnvLookup<'_>,
) -> Result<OAuthClientCredentials, ConfigurationError> {
    let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let pick = |id_key: String, secret_key: String| match (read(&id_key), read(&secret_key)) {
        (Some(client_id), Some(client_secret)) => Some(Ok(OAuthClientCredentials {
            client_id,
            client_secret,
            source: id_key,
        })),
        (None, None) => None,
        (Some(_), None) => Some(Err(ConfigurationError::IncompleteOAuthCredentials(id_key))),
        (None, Some(_)) => Some(Err(ConfigurationError::IncompleteOAuthCredentials(
            secret_key,
        ))),
    };

    let qualifier = environment.qualifier();
    let qualified_id = format!("{CLIENT_ID_VAR}_{qualifier}");
    pick(
        qualified_id.clone(),
        format!("{CLIENT_SECRET_VAR}_{qualifier}"),
    )
    .or_else(|| pick(CLIENT_ID_VAR.to_string(), CLIENT_SECRET_VAR.to_string()))
    .unwrap_or_else(|| {
        Err(ConfigurationError::MissingOAuthCredentials(format!(
            "{qualified_id}, {CLIENT_ID_VAR}"
        )))
    })
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: SigningSecret,
    pub algorithm: Algorithm,
    pub issuer: String,
    pub access_ttl: u64,
    pub refresh_ttl: u64,
    pub service_ttl: u64,
    pub check_access_revocation: bool,
    pub reuse_policy: ReusePolicy,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub store: RegistryStore,
    pub redis_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OAuthProviderSettings {
    pub authorize_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
    pub health_url: Option<Url>,
    pub scopes: Vec<String>,
    pub state_ttl: Duration,
    pub client_timeout: Duration,
    pub credentials: OAuthClientCredentials,
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub check_timeout: Duration,
    pub check_interval: Duration,
    pub slow_threshold: Duration,
    pub max_concurrency: usize,
    pub failure_threshold: u32,
}

#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub environment: Environment,
    pub port: u16,
    pub service_api_key: Option<String>,
    pub shutdown_grace_period: Duration,
    pub database_url: Option<String>,
    pub urls: UrlConfig,
    pub tokens: TokenSettings,
    pub registry: RegistrySettings,
    /// `None` when the provider endpoints or client credentials are unusable
    pub oauth: Option<OAuthProviderSettings>,
    pub health: HealthSettings,
}

/// Result of [`ConfigSnapshot::build`]
#[derive(Debug)]
pub struct ConfigBuild {
    pub snapshot: ConfigSnapshot,
    pub issues: Vec<ConfigurationError>,
}

impl ConfigSnapshot {
    /// Validate `settings` once. Unknown tiers are treated as production.
    pub fn build(settings: &Settings, lookup: EnvLookup<'_>) -> ConfigBuild {
        let mut issues = Vec::new();

        let environment = settings
            .environment
            .parse::<Environment>()
            .unwrap_or_else(|e| {
                issues.push(e);
                Environment::Production
            });

        let tokens = Self::token_settings(settings, environment, &mut issues);
        let registry = Self::registry_settings(settings, environment, &mut issues);

        let service_api_key = Some(settings.service_api_key.trim().to_string())
            .filter(|key| !key.is_empty());
        if service_api_key.is_none() && environment.is_production_like() {
            issues.push(ConfigurationError::MissingServiceApiKey);
        }

        let database_url = settings
            .database_url
            .clone()
            .filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            issues.push(ConfigurationError::MissingDatabaseUrl);
        }

        let resolver = OAuthRedirectResolver::new(settings.urls.clone(), settings.port);
        if let Err(e) = resolver.resolve_urls(environment) {
            issues.push(e.into());
        }

        let oauth = Self::oauth_settings(settings, environment, lookup, &mut issues);

        let health = HealthSettings {
            check_timeout: Duration::from_millis(settings.health.check_timeout_ms),
            check_interval: Duration::from_secs(settings.health.check_interval),
            slow_threshold: Duration::from_millis(settings.health.slow_threshold_ms),
            max_concurrency: settings.health.max_concurrency.max(1),
            failure_threshold: settings.health.failure_threshold.max(1),
        };

        let snapshot = ConfigSnapshot {
            environment,
            port: settings.port,
            service_api_key,
            shutdown_grace_period: Duration::from_secs(settings.shutdown_grace_period),
            database_url,
            urls: settings.urls.clone(),
            tokens,
            registry,
            oauth,
            health,
        };

        ConfigBuild { snapshot, issues }
    }

    /// Redirect resolver bound to this snapshot's URLs and port
    pub fn redirect_resolver(&self) -> OAuthRedirectResolver {
        OAuthRedirectResolver::new(self.urls.clone(), self.port)
    }

    fn token_settings(
        settings: &Settings,
        environment: Environment,
        issues: &mut Vec<ConfigurationError>,
    ) -> TokenSettings {
        let config = &settings.tokens;

        let secret = match config.secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => {
                if secret.len() < MIN_SECRET_LEN {
                    issues.push(ConfigurationError::ShortSecret {
                        min: MIN_SECRET_LEN,
                        actual: secret.len(),
                    });
                }
                SigningSecret::new(secret.as_bytes())
            }
            _ => {
                issues.push(ConfigurationError::MissingSecret);
                if !environment.is_production_like() {
                    warn!(
                        "No signing secret configured, using an ephemeral one; tokens will not survive a restart"
                    );
                }
                SigningSecret::ephemeral()
            }
        };

        let algorithm = match config.algorithm.trim().to_ascii_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            _ => {
                issues.push(ConfigurationError::UnsupportedAlgorithm(
                    config.algorithm.clone(),
                ));
                Algorithm::HS256
            }
        };

        if config.access_ttl == 0 {
            issues.push(ConfigurationError::ZeroTtl("Access token"));
        }
        if config.service_ttl == 0 {
            issues.push(ConfigurationError::ZeroTtl("Service token"));
        }
        if config.access_ttl >= config.refresh_ttl {
            issues.push(ConfigurationError::TtlOrder {
                access: config.access_ttl,
                refresh: config.refresh_ttl,
            });
        }

        let reuse_policy = config.reuse_policy.parse().unwrap_or_else(|_| {
            issues.push(ConfigurationError::UnknownReusePolicy(
                config.reuse_policy.clone(),
            ));
            ReusePolicy::default()
        });

        TokenSettings {
            secret,
            algorithm,
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl.max(1),
            refresh_ttl: config.refresh_ttl.max(1),
            service_ttl: config.service_ttl.max(1),
            check_access_revocation: config.check_access_revocation,
            reuse_policy,
        }
    }

    fn registry_settings(
        settings: &Settings,
        environment: Environment,
        issues: &mut Vec<ConfigurationError>,
    ) -> RegistrySettings {
        let config = &settings.registry;
        let store = config.store.parse().unwrap_or_else(|store| {
            issues.push(ConfigurationError::UnknownRegistryStore(store));
            RegistryStore::InMemory
        });
        let redis_url = config
            .redis_url
            .clone()
            .filter(|url| !url.trim().is_empty());

        match store {
            RegistryStore::Redis if redis_url.is_none() => {
                issues.push(ConfigurationError::MissingRedisUrl)
            }
            RegistryStore::InMemory if environment.is_production_like() => {
                issues.push(ConfigurationError::UnsharedRegistry)
            }
            _ => {}
        }

        RegistrySettings {
            store,
            redis_url,
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        }
    }

    fn oauth_settings(
        settings: &Settings,
        environment: Environment,
        lookup: EnvLookup<'_>,
        issues: &mut Vec<ConfigurationError>,
    ) -> Option<OAuthProviderSettings> {
        let config = &settings.oauth;
        let mut endpoint = |name: &'static str, value: &Option<String>| -> Option<Url> {
            let Some(raw) = value.as_deref().filter(|v| !v.trim().is_empty()) else {
                issues.push(ConfigurationError::MissingOAuthEndpoint(name));
                return None;
            };
            Url::parse(raw)
                .map_err(|e| {
                    issues.push(ConfigurationError::InvalidOAuthEndpoint {
                        name,
                        reason: e.to_string(),
                    })
                })
                .ok()
        };

        let authorize_url = endpoint("authorize URL", &config.authorize_url);
        let token_url = endpoint("token URL", &config.token_url);
        let userinfo_url = endpoint("userinfo URL", &config.userinfo_url);
        let health_url = match config.health_url {
            Some(_) => endpoint("health URL", &config.health_url),
            None => None,
        };

        let credentials = resolve_oauth_credentials(environment, lookup)
            .map_err(|e| issues.push(e))
            .ok();

        Some(OAuthProviderSettings {
            authorize_url: authorize_url?,
            token_url: token_url?,
            userinfo_url: userinfo_url?,
            health_url,
            scopes: config.get_scopes(),
            state_ttl: Duration::from_secs(config.state_ttl.max(1)),
            client_timeout: Duration::from_secs(config.client_timeout.max(1)),
            credentials: credentials?,
        })
    }
}
