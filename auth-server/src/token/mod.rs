//! Token issuance, validation, rotation and revocation.

pub mod claims;
pub mod clock;
pub mod codec;
pub mod manager;

pub use claims::{Claims, TokenKind};
pub use clock::{Clock, SystemClock};
pub use codec::TokenCodec;
pub use manager::{IssuedToken, RevokeTarget, TokenLifecycleManager, TokenPair};

use crate::registry::RegistryError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors returned by token decoding and lifecycle operations
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Token signature is invalid")]
    Signature,
    #[error("Token is malformed: {0}")]
    Malformed(String),
    #[error("Token claim is invalid: {0}")]
    Claim(String),
    #[error("Expected a {expected} token, got a {actual} token")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
    #[error("Token has been revoked")]
    Revoked,
    #[error("Refresh token has already been used")]
    Reuse,
    #[error("Token registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Failed to encode token: {0}")]
    Encoding(String),
}

impl TokenError {
    /// Stable machine-readable code exposed to callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expired => "token_expired",
            Self::Signature => "invalid_signature",
            Self::Malformed(_) => "malformed_token",
            Self::Claim(_) => "invalid_claims",
            Self::WrongKind { .. } => "wrong_token_kind",
            Self::Revoked => "token_revoked",
            Self::Reuse => "token_reuse",
            Self::Registry(_) => "service_unavailable",
            Self::Encoding(_) => "internal_error",
        }
    }
}

/// What happens when an already rotated refresh token is presented again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Revoke the whole family, including the generation that won the race
    RevokeFamily,
    /// Reject the presented token. Older generations stay dead and the
    /// current generation keeps working.
    #[default]
    RejectOnly,
}

impl FromStr for ReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "revoke-family" => Ok(Self::RevokeFamily),
            "reject-only" => Ok(Self::RejectOnly),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ReusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevokeFamily => f.write_str("revoke-family"),
            Self::RejectOnly => f.write_str("reject-only"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_policy_parsing() {
        assert_eq!("revoke-family".parse(), Ok(ReusePolicy::RevokeFamily));
        assert_eq!("Reject-Only".parse(), Ok(ReusePolicy::RejectOnly));
        assert!("ignore".parse::<ReusePolicy>().is_err());
        assert_eq!(ReusePolicy::default(), ReusePolicy::RejectOnly);
    }

    #[test]
    fn test_error_codes_hide_registry_details() {
        let err = TokenError::Registry(RegistryError::Redis("connection refused".into()));
        assert_eq!(err.code(), "service_unavailable");
        assert_eq!(TokenError::Reuse.code(), "token_reuse");
    }
}
