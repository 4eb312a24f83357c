use crate::config::SigningSecret;
use crate::token::{Claims, Clock, TokenError, TokenKind};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Signs and verifies compact JWS tokens with one symmetric algorithm.
///
/// Only the configured algorithm is accepted on decode. Expiry is checked
/// against the injected [`Clock`], never the system time.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(
        secret: &SigningSecret,
        algorithm: Algorithm,
        issuer: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            clock,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        if claims.exp <= claims.iat {
            return Err(TokenError::Claim("exp must be after iat".to_string()));
        }
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify `token` and require it to be of kind `expected`
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.verify(token, expected)?;
        if self.clock.now() > claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Like [`TokenCodec::decode`] but accepts expired tokens. Used to log out
    /// with a refresh token that already ran out.
    pub fn decode_allow_expired(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<Claims, TokenError> {
        self.verify(token, expected)
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        check_structure(token)?;

        let header = decode_header(token)
            .map_err(|e| TokenError::Malformed(format!("invalid header: {e}")))?;
        if header.alg != self.algorithm {
            return Err(TokenError::Signature);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?
            .claims;

        if claims.iss != self.issuer {
            return Err(TokenError::Claim(format!("unexpected issuer '{}'", claims.iss)));
        }
        if claims.kind != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.kind,
            });
        }
        if claims.sub.is_empty() {
            return Err(TokenError::Claim("sub is empty".to_string()));
        }
        if claims.exp <= claims.iat {
            return Err(TokenError::Claim("exp must be after iat".to_string()));
        }
        match claims.kind {
            TokenKind::Access | TokenKind::Refresh => {
                if claims.email.as_deref().map_or(true, str::is_empty) {
                    return Err(TokenError::Claim("email is missing".to_string()));
                }
                if claims.family_id.is_none() {
                    return Err(TokenError::Claim("family_id is missing".to_string()));
                }
                if claims.kind == TokenKind::Refresh && claims.generation.is_none() {
                    return Err(TokenError::Claim("generation is missing".to_string()));
                }
            }
            TokenKind::Service => {}
        }
        Ok(claims)
    }
}

/// Three non-empty base64url segments
fn check_structure(token: &str) -> Result<(), TokenError> {
    if token.is_empty() {
        return Err(TokenError::Malformed("empty token".to_string()));
    }
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    }
    for segment in segments {
        if segment.is_empty() {
            return Err(TokenError::Malformed("empty segment".to_string()));
        }
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| TokenError::Malformed("segment is not base64url".to_string()))?;
    }
    Ok(())
}

fn map_jwt_error(error: jsonwebtoken::errors::Error) -> TokenError {
    match error.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::Signature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::MissingRequiredClaim(claim) => TokenError::Claim(format!("{claim} is missing")),
        ErrorKind::Json(e) if e.is_data() => TokenError::Claim(e.to_string()),
        _ => TokenError::Malformed(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::clock::ManualClock;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const START: i64 = 1_700_000_000;

    fn codec_with_clock() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let codec = TokenCodec::new(
            &SigningSecret::new(SECRET),
            Algorithm::HS256,
            "auth-service",
            clock.clone(),
        );
        (codec, clock)
    }

    fn access_claims(ttl: u64) -> Claims {
        Claims::new(TokenKind::Access, "user-1", "auth-service", START, ttl)
            .with_email(Some("user@example.com".to_string()))
            .with_permissions(vec!["read".to_string()])
            .with_family("family-1", None)
    }

    #[test]
    fn test_round_trip() {
        let (codec, _) = codec_with_clock();
        let claims = access_claims(900);
        let token = codec.encode(&claims).expect("encode");
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.decode(&token, TokenKind::Access).expect("decode"), claims);
    }

    #[test]
    fn test_expiry_follows_injected_clock() {
        let (codec, clock) = codec_with_clock();
        let token = codec.encode(&access_claims(900)).expect("encode");

        let claims = codec.decode(&token, TokenKind::Access).expect("fresh token");
        assert_eq!(claims.sub, "user-1");

        clock.advance(900);
        assert!(codec.decode(&token, TokenKind::Access).is_ok());

        clock.advance(1);
        assert!(matches!(
            codec.decode(&token, TokenKind::Access),
            Err(TokenError::Expired)
        ));
        assert!(codec
            .decode_allow_expired(&token, TokenKind::Access)
            .is_ok());
    }

    #[test]
    fn test_wrong_secret_is_signature_error() {
        let (codec, clock) = codec_with_clock();
        let other = TokenCodec::new(
            &SigningSecret::new("ffffffffffffffffffffffffffffffff"),
            Algorithm::HS256,
            "auth-service",
            clock,
        );
        let token = other.encode(&access_claims(900)).expect("encode");
        assert!(matches!(
            codec.decode(&token, TokenKind::Access),
            Err(TokenError::Signature)
        ));
    }

    #[test]
    fn test_other_algorithm_is_rejected() {
        let (codec, clock) = codec_with_clock();
        let hs512 = TokenCodec::new(
            &SigningSecret::new(SECRET),
            Algorithm::HS512,
            "auth-service",
            clock,
        );
        let token = hs512.encode(&access_claims(900)).expect("encode");
        assert!(matches!(
            codec.decode(&token, TokenKind::Access),
            Err(TokenError::Signature)
        ));
    }

    #[test]
    fn test_unsigned_token_is_rejected() {
        let (codec, _) = codec_with_clock();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&access_claims(900)).expect("json"));
        let token = format!("{header}.{payload}.c2ln");
        assert!(codec.decode(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_malformed_inputs() {
        let (codec, _) = codec_with_clock();
        for token in ["", "abc", "a.b", "a..c", "a.b.c.d", "###.$$$.%%%"] {
            assert!(
                matches!(
                    codec.decode(token, TokenKind::Access),
                    Err(TokenError::Malformed(_))
                ),
                "{token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_kind_mismatch() {
        let (codec, _) = codec_with_clock();
        let token = codec.encode(&access_claims(900)).expect("encode");
        assert!(matches!(
            codec.decode(&token, TokenKind::Refresh),
            Err(TokenError::WrongKind {
                expected: TokenKind::Refresh,
                actual: TokenKind::Access
            })
        ));
    }

    #[test]
    fn test_refresh_requires_generation() {
        let (codec, _) = codec_with_clock();
        let claims = Claims::new(TokenKind::Refresh, "user-1", "auth-service", START, 3600)
            .with_email(Some("user@example.com".to_string()))
            .with_family("family-1", None);
        let token = codec.encode(&claims).expect("encode");
        assert!(matches!(
            codec.decode(&token, TokenKind::Refresh),
            Err(TokenError::Claim(_))
        ));
    }

    #[test]
    fn test_foreign_issuer() {
        let (codec, clock) = codec_with_clock();
        let foreign = TokenCodec::new(&SigningSecret::new(SECRET), Algorithm::HS256, "other", clock);
        let claims = Claims::new(TokenKind::Service, "svc", "other", START, 60);
        let token = foreign.encode(&claims).expect("encode");
        assert!(matches!(
            codec.decode(&token, TokenKind::Service),
            Err(TokenError::Claim(_))
        ));
    }

    #[test]
    fn test_missing_claims_in_payload() {
        let (codec, _) = codec_with_clock();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"sub": "user-1", "iss": "auth-service"}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("encode");
        assert!(matches!(
            codec.decode(&token, TokenKind::Access),
            Err(TokenError::Claim(_))
        ));
    }

    #[test]
    fn test_encode_rejects_non_positive_lifetime() {
        let (codec, _) = codec_with_clock();
        let mut claims = access_claims(900);
        claims.exp = claims.iat;
        assert!(matches!(codec.encode(&claims), Err(TokenError::Claim(_))));
    }
}
