use crate::config::ConfigSnapshot;
use crate::lifecycle::ServiceLifecycleController;
use crate::oauth::{OAuthProviderClient, OAuthRedirectResolver};
use crate::registry::Registry;
use crate::token::{Clock, TokenLifecycleManager};
use log::{error, info};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigSnapshot>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub lifecycle: Arc<ServiceLifecycleController>,
    pub redirects: Arc<OAuthRedirectResolver>,
    /// `None` when the provider is not configured; login answers 503
    pub provider: Option<OAuthProviderClient>,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigSnapshot>,
        registry: Arc<Registry>,
        lifecycle: Arc<ServiceLifecycleController>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tokens =
            TokenLifecycleManager::new(&config.tokens, registry, config.registry.timeout, clock);
        let provider = config.oauth.clone().and_then(|settings| {
            OAuthProviderClient::new(settings)
                .map_err(|e| error!("Failed to create OAuth provider client: {}", e))
                .ok()
        });
        if provider.is_none() {
            info!("OAuth login is disabled");
        }

        Self {
            redirects: Arc::new(config.redirect_resolver()),
            tokens: Arc::new(tokens),
            lifecycle,
            provider,
            config,
        }
    }

    /// `true` if `key` is the configured service API key
    pub fn is_service_api_key(&self, key: &str) -> bool {
        self.config
            .service_api_key
            .as_deref()
            .is_some_and(|expected| !expected.is_empty() && expected == key)
    }
}
