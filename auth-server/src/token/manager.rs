use crate::config::snapshot::TokenSettings;
use crate::registry::{
    Registry, RegistryError, RevocationReason, RotateOutcome, TokenRecord, TokenRegistry,
};
use crate::token::{Claims, Clock, ReusePolicy, TokenCodec, TokenError, TokenKind};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::{debug, error, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

/// Access and refresh token issued together
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer"
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    #[serde(skip)]
    pub family_id: String,
}

/// Single token with its lifetime
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// What to revoke
#[derive(Debug, Clone, Copy)]
pub enum RevokeTarget<'a> {
    /// The family of a refresh token; expired tokens are accepted
    RefreshToken(&'a str),
    /// A family by id
    Family(&'a str),
}

/// SHA-256 of the token string, base64url encoded
pub(crate) fn fingerprint(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Orchestrates issuance, validation, rotation and revocation.
///
/// Every registry call is bounded by the registry timeout; a timeout or
/// registry failure rejects the request instead of skipping the check.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    codec: TokenCodec,
    registry: Arc<Registry>,
    access_ttl: u64,
    refresh_ttl: u64,
    service_ttl: u64,
    check_access_revocation: bool,
    reuse_policy: ReusePolicy,
    registry_timeout: Duration,
}

impl TokenLifecycleManager {
    pub fn new(
        settings: &TokenSettings,
        registry: Arc<Registry>,
        registry_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec: TokenCodec::new(
                &settings.secret,
                settings.algorithm,
                settings.issuer.clone(),
                clock,
            ),
            registry,
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
            service_ttl: settings.service_ttl,
            check_access_revocation: settings.check_access_revocation,
            reuse_policy: settings.reuse_policy,
            registry_timeout,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start a new family and return its first access/refresh pair
    pub async fn issue(
        &self,
        subject: &str,
        email: &str,
        permissions: Vec<String>,
    ) -> Result<TokenPair, TokenError> {
        if subject.trim().is_empty() || email.trim().is_empty() {
            return Err(TokenError::Claim("subject and email are required".to_string()));
        }
        let now = self.codec.now();
        let family_id = uuid::Uuid::new_v4().to_string();

        let refresh_claims = Claims::new(
            TokenKind::Refresh,
            subject,
            self.codec.issuer(),
            now,
            self.refresh_ttl,
        )
        .with_email(Some(email.to_string()))
        .with_permissions(permissions)
        .with_family(family_id.clone(), Some(1));
        let refresh_token = self.codec.encode(&refresh_claims)?;

        let record = TokenRecord::initial(&family_id, subject, fingerprint(&refresh_token), now);
        self.bounded(self.registry.register(record, self.refresh_ttl_duration()))
            .await?;

        let pair = self.pair_for(&refresh_claims, refresh_token, now)?;
        info!("Issued token family {} for subject {}", family_id, subject);
        Ok(pair)
    }

    /// Verify an access token and, unless disabled, reject revoked families
    pub async fn validate_access(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.codec.decode(token, TokenKind::Access)?;
        if self.check_access_revocation {
            if let Some(family_id) = &claims.family_id {
                if self
                    .bounded(self.registry.is_family_revoked(family_id))
                    .await?
                {
                    debug!("Rejected access token of revoked family {}", family_id);
                    return Err(TokenError::Revoked);
                }
            }
        }
        Ok(claims)
    }

    /// Rotate a refresh token. Exactly one concurrent caller presenting the
    /// same token wins; the others get [`TokenError::Reuse`].
    pub async fn refresh(&self, token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.codec.decode(token, TokenKind::Refresh)?;
        let (Some(family_id), Some(generation)) = (claims.family_id.clone(), claims.generation)
        else {
            return Err(TokenError::Claim("family_id and generation are required".to_string()));
        };
        let now = self.codec.now();

        let next_claims = Claims::new(
            TokenKind::Refresh,
            claims.sub.clone(),
            self.codec.issuer(),
            now,
            self.refresh_ttl,
        )
        .with_email(claims.email.clone())
        .with_permissions(claims.permissions.clone())
        .with_family(family_id.clone(), Some(generation + 1));
        let next_token = self.codec.encode(&next_claims)?;

        let next_record = TokenRecord {
            generation: generation + 1,
            previous_generation: Some(generation),
            ..TokenRecord::initial(&family_id, &claims.sub, fingerprint(&next_token), now)
        };

        let outcome = self
            .bounded(self.registry.rotate(
                &family_id,
                generation,
                &fingerprint(token),
                next_record,
                self.refresh_ttl_duration(),
            ))
            .await?;

        match outcome {
            RotateOutcome::Rotated => {
                debug!("Rotated family {} to generation {}", family_id, generation + 1);
                self.pair_for(&next_claims, next_token, now)
            }
            RotateOutcome::Reused => {
                warn!(
                    "Refresh token reuse detected for family {} (generation {})",
                    family_id, generation
                );
                if self.reuse_policy == ReusePolicy::RevokeFamily {
                    match self
                        .bounded(
                            self.registry
                                .revoke_family(&family_id, RevocationReason::ReuseDetected),
                        )
                        .await
                    {
                        Ok(true) => warn!("Revoked family {} after reuse", family_id),
                        Ok(false) => {}
                        Err(e) => error!("Failed to revoke family {} after reuse: {}", family_id, e),
                    }
                }
                Err(TokenError::Reuse)
            }
            RotateOutcome::Revoked | RotateOutcome::NotFound => Err(TokenError::Revoked),
        }
    }

    /// Revoke a family. Returns `true` if this call revoked it.
    pub async fn revoke(&self, target: RevokeTarget<'_>) -> Result<bool, TokenError> {
        let (family_id, reason) = match target {
            RevokeTarget::RefreshToken(token) => {
                let claims = self
                    .codec
                    .decode_allow_expired(token, TokenKind::Refresh)?;
                let family_id = claims
                    .family_id
                    .ok_or_else(|| TokenError::Claim("family_id is missing".to_string()))?;
                (family_id, RevocationReason::Logout)
            }
            RevokeTarget::Family(family_id) => (family_id.to_string(), RevocationReason::Admin),
        };

        let revoked = self
            .bounded(self.registry.revoke_family(&family_id, reason))
            .await?;
        if revoked {
            info!("Revoked token family {} ({})", family_id, reason.as_str());
        }
        Ok(revoked)
    }

    /// Mint a short-lived, family-less token for an internal caller
    pub fn issue_service_token(
        &self,
        subject: &str,
        permissions: Vec<String>,
    ) -> Result<IssuedToken, TokenError> {
        if subject.trim().is_empty() {
            return Err(TokenError::Claim("subject is required".to_string()));
        }
        let now = self.codec.now();
        let claims = Claims::new(
            TokenKind::Service,
            subject,
            self.codec.issuer(),
            now,
            self.service_ttl,
        )
        .with_permissions(permissions);
        Ok(IssuedToken {
            access_token: self.codec.encode(&claims)?,
            token_type: "Bearer",
            expires_in: claims.expires_in(now),
        })
    }

    pub fn validate_service(&self, token: &str) -> Result<Claims, TokenError> {
        self.codec.decode(token, TokenKind::Service)
    }

    /// Store a use-once value such as an OAuth `state`
    pub async fn store_nonce(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, TokenError> {
        Ok(self
            .bounded(self.registry.store_nonce(key, value, ttl))
            .await?)
    }

    pub async fn take_nonce(&self, key: &str) -> Result<Option<String>, TokenError> {
        Ok(self.bounded(self.registry.take_nonce(key)).await?)
    }

    fn pair_for(
        &self,
        refresh_claims: &Claims,
        refresh_token: String,
        now: i64,
    ) -> Result<TokenPair, TokenError> {
        let family_id = refresh_claims.family_id.clone().unwrap_or_default();
        let access_claims = Claims::new(
            TokenKind::Access,
            refresh_claims.sub.clone(),
            self.codec.issuer(),
            now,
            self.access_ttl,
        )
        .with_email(refresh_claims.email.clone())
        .with_permissions(refresh_claims.permissions.clone())
        .with_family(family_id.clone(), None);

        Ok(TokenPair {
            access_token: self.codec.encode(&access_claims)?,
            refresh_token,
            token_type: "Bearer",
            expires_in: access_claims.expires_in(now),
            family_id,
        })
    }

    fn refresh_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl)
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, RegistryError> {
        tokio::time::timeout(self.registry_timeout, operation)
            .await
            .map_err(|_| {
                warn!(
                    "Registry operation exceeded {}ms",
                    self.registry_timeout.as_millis()
                );
                RegistryError::Timeout(self.registry_timeout.as_millis())
            })?
    }
}
