use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Service,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
            Self::Service => f.write_str("service"),
        }
    }
}

/// Claim set carried by every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Claims {
    /// Subject identifier
    pub sub: String,
    /// Absent on service tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Unique token id
    pub jti: String,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Stable across rotations; set on access and refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    /// Rotation counter, refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl Claims {
    pub fn new(
        kind: TokenKind,
        subject: impl Into<String>,
        issuer: impl Into<String>,
        issued_at: i64,
        ttl_secs: u64,
    ) -> Self {
        Self {
            sub: subject.into(),
            email: None,
            iat: issued_at,
            exp: issued_at.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            iss: issuer.into(),
            jti: uuid::Uuid::new_v4().to_string(),
            kind,
            permissions: Vec::new(),
            family_id: None,
            generation: None,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_family(mut self, family_id: impl Into<String>, generation: Option<u64>) -> Self {
        self.family_id = Some(family_id.into());
        self.generation = generation;
        self
    }

    /// Seconds until expiry as seen from `now`, never negative
    pub fn expires_in(&self, now: i64) -> u64 {
        u64::try_from(self.exp.saturating_sub(now)).unwrap_or(0)
    }
}
