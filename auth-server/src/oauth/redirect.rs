//! Resolution of the service URL / client app URL pair.
//!
//! The provider callback is always derived from the service URL. The client
//! app URL is only used for the final browser redirect after login.

use crate::config::{Environment, UrlConfig};
use thiserror::Error;
use url::Url;

/// Path of the provider callback on this service
pub const CALLBACK_PATH: &str = "/auth/callback";
/// Path on the client app that receives the issued tokens
pub const LOGIN_SUCCESS_PATH: &str = "/auth/success";

const DEFAULT_CLIENT_APP_URL: &str = "http://localhost:3000";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RedirectError {
    #[error("{name} is not configured for the {environment} environment")]
    Missing {
        name: &'static str,
        environment: Environment,
    },
    #[error("{name} is not a valid http(s) base URL: {reason}")]
    InvalidUrl { name: &'static str, reason: String },
    #[error("Service URL and client app URL must point at different origins ({0})")]
    SameOrigin(String),
    #[error("Callback URI {0} does not point at the service host")]
    ForeignCallback(String),
    #[error("Callback URI {0} points at the client app")]
    ClientAppCallback(String),
}

/// The two public base URLs, named so they cannot be swapped by position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectUrls {
    pub service_url: Url,
    pub client_app_url: Url,
}

impl RedirectUrls {
    /// Provider callback checked against both base URLs
    pub fn callback_uri(&self) -> Result<Url, RedirectError> {
        let callback = build_callback_uri(&self.service_url)?;

        if origin_of(&callback) != origin_of(&self.service_url) {
            return Err(RedirectError::ForeignCallback(callback.to_string()));
        }
        let client_base = self.client_app_url.as_str().trim_end_matches('/');
        if callback.as_str().contains(client_base)
            || callback.as_str().contains(&origin_of(&self.client_app_url))
        {
            return Err(RedirectError::ClientAppCallback(callback.to_string()));
        }
        Ok(callback)
    }

    /// Browser landing page on the client app; `fragment` carries the tokens
    pub fn login_success_uri(&self, fragment: &str) -> Url {
        let mut target = join_path(&self.client_app_url, LOGIN_SUCCESS_PATH)
            .unwrap_or_else(|_| self.client_app_url.clone());
        target.set_fragment(Some(fragment));
        target
    }
}

/// `<service_url>/auth/callback`, keeping any path prefix of the service URL
pub fn build_callback_uri(service_url: &Url) -> Result<Url, RedirectError> {
    join_path(service_url, CALLBACK_PATH)
}

#[derive(Debug, Clone)]
pub struct OAuthRedirectResolver {
    urls: UrlConfig,
    port: u16,
}

impl OAuthRedirectResolver {
    pub fn new(urls: UrlConfig, port: u16) -> Self {
        Self { urls, port }
    }

    /// Resolve both base URLs for `environment`.
    ///
    /// Development and test fall back to localhost defaults. Staging and
    /// production require both URLs and never fall back.
    pub fn resolve_urls(&self, environment: Environment) -> Result<RedirectUrls, RedirectError> {
        let service_url = Self::base_url(
            "service URL",
            self.urls.service_url.as_deref(),
            environment,
            || format!("http://localhost:{}", self.port),
        )?;
        let client_app_url = Self::base_url(
            "client app URL",
            self.urls.client_app_url.as_deref(),
            environment,
            || DEFAULT_CLIENT_APP_URL.to_string(),
        )?;

        if origin_of(&service_url) == origin_of(&client_app_url) {
            return Err(RedirectError::SameOrigin(origin_of(&service_url)));
        }

        let urls = RedirectUrls {
            service_url,
            client_app_url,
        };
        urls.callback_uri()?;
        Ok(urls)
    }

    fn base_url(
        name: &'static str,
        configured: Option<&str>,
        environment: Environment,
        default: impl FnOnce() -> String,
    ) -> Result<Url, RedirectError> {
        match configured.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => parse_base_url(name, raw),
            None if environment.is_production_like() => {
                Err(RedirectError::Missing { name, environment })
            }
            None => parse_base_url(name, &default()),
        }
    }
}

fn parse_base_url(name: &'static str, raw: &str) -> Result<Url, RedirectError> {
    let invalid = |reason: String| RedirectError::InvalidUrl { name, reason };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed".to_string()));
    }
    Ok(url)
}

fn join_path(base: &Url, path: &str) -> Result<Url, RedirectError> {
    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| RedirectError::InvalidUrl {
        name: "callback URI",
        reason: e.to_string(),
    })
}

/// `host:port` with the scheme's default port filled in
fn origin_of(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(service: Option<&str>, client: Option<&str>) -> OAuthRedirectResolver {
        OAuthRedirectResolver::new(
            UrlConfig {
                service_url: service.map(str::to_string),
                client_app_url: client.map(str::to_string),
            },
            8080,
        )
    }

    #[test]
    fn test_production_callback_uses_service_url() {
        let resolver = resolver(
            Some("https://auth.example.com"),
            Some("https://app.example.com"),
        );
        let urls = resolver
            .resolve_urls(Environment::Production)
            .expect("production URLs");
        assert_ne!(urls.service_url, urls.client_app_url);

        let callback = urls.callback_uri().expect("callback");
        assert_eq!(callback.as_str(), "https://auth.example.com/auth/callback");
        assert_ne!(callback.as_str(), "https://app.example.com/auth/callback");
    }

    #[test]
    fn test_production_and_staging_fail_closed() {
        let resolver = resolver(Some("https://auth.example.com"), None);
        for environment in [Environment::Staging, Environment::Production] {
            assert_eq!(
                resolver.resolve_urls(environment),
                Err(RedirectError::Missing {
                    name: "client app URL",
                    environment
                })
            );
        }
    }

    #[test]
    fn test_development_defaults() {
        let urls = resolver(None, None)
            .resolve_urls(Environment::Development)
            .expect("development defaults");
        assert_eq!(urls.service_url.as_str(), "http://localhost:8080/");
        assert_eq!(urls.client_app_url.as_str(), "http://localhost:3000/");
        assert_eq!(
            urls.callback_uri().expect("callback").as_str(),
            "http://localhost:8080/auth/callback"
        );
    }

    #[test]
    fn test_identical_urls_are_rejected() {
        let resolver = resolver(
            Some("https://example.com"),
            Some("https://example.com:443/"),
        );
        assert_eq!(
            resolver.resolve_urls(Environment::Production),
            Err(RedirectError::SameOrigin("example.com:443".to_string()))
        );
    }

    #[test]
    fn test_invalid_url() {
        let resolver = resolver(Some("auth.example.com"), Some("https://app.example.com"));
        assert!(matches!(
            resolver.resolve_urls(Environment::Production),
            Err(RedirectError::InvalidUrl {
                name: "service URL",
                ..
            })
        ));
    }

    #[test]
    fn test_callback_keeps_service_path_prefix() {
        let service_url = Url::parse("https://api.example.com/identity/").expect("url");
        assert_eq!(
            build_callback_uri(&service_url).expect("callback").as_str(),
            "https://api.example.com/identity/auth/callback"
        );
    }

    #[test]
    fn test_callback_never_contains_client_app_in_any_environment() {
        let resolver = resolver(
            Some("https://auth.example.com"),
            Some("https://app.example.com"),
        );
        for environment in Environment::ALL {
            let urls = resolver.resolve_urls(environment).expect("urls");
            let callback = urls.callback_uri().expect("callback").to_string();
            assert!(callback.contains("auth.example.com"));
            assert!(!callback.contains("app.example.com/"));
            assert!(!callback.contains("https://app.example.com"));
        }
    }

    #[test]
    fn test_client_app_under_service_path_is_rejected() {
        let urls = RedirectUrls {
            service_url: Url::parse("https://example.com").expect("url"),
            client_app_url: Url::parse("https://example.com/auth").expect("url"),
        };
        assert!(matches!(
            urls.callback_uri(),
            Err(RedirectError::ClientAppCallback(_))
        ));
    }

    #[test]
    fn test_login_success_uri_targets_client_app() {
        let urls = resolver(None, None)
            .resolve_urls(Environment::Test)
            .expect("urls");
        let target = urls.login_success_uri("access_token=a&refresh_token=b");
        assert_eq!(
            target.as_str(),
            "http://localhost:3000/auth/success#access_token=a&refresh_token=b"
        );
    }
}
