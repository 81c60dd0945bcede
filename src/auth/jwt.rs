use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::{
    config::{JwtConfig, MAX_TOKEN_TTL_MINUTES},
    state::AppState,
};

/// JWT payload. `sub` carries the numeric user id as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signature does not verify")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("malformed token: {0}")]
    Invalid(String),

    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

/// Signing material derived once from `JwtConfig` at startup.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs(cfg.ttl_minutes.clamp(1, MAX_TOKEN_TTL_MINUTES) as u64 * 60),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String, TokenError> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    /// Signs a token as if issued at `now`.
    pub fn issue_at(&self, user_id: i64, now: OffsetDateTime) -> Result<String, TokenError> {
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding).map_err(TokenError::Sign)?;
        debug!(user_id, "jwt signed");
        Ok(token)
    }

    /// Returns the user id carried by a valid, unexpired token.
    pub fn validate(&self, token: &str) -> Result<i64, TokenError> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    /// Expiry is checked against `now` with no leeway: `now >= exp` is expired.
    pub fn validate_at(&self, token: &str, now: OffsetDateTime) -> Result<i64, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Invalid(e.to_string()),
        })?;

        if now.unix_timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| TokenError::Invalid("subject is not a user id".into()))?;
        debug!(user_id, "jwt verified");
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 60 * 24,
        })
    }

    fn tamper_signature(token: &str) -> String {
        let (head, sig) = token.rsplit_once('.').expect("three-part jwt");
        let mut chars: Vec<char> = sig.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        format!("{}.{}", head, chars.into_iter().collect::<String>())
    }

    #[test]
    fn issue_and_validate_yields_same_user() {
        let keys = make_keys("dev-secret", "iss", "aud");
        for user_id in [1_i64, 42, 9_000_000_000] {
            let token = keys.issue(user_id).expect("sign");
            assert_eq!(keys.validate(&token).expect("verify"), user_id);
        }
    }

    #[test]
    fn ttl_defaults_to_a_day() {
        let keys = make_keys("dev-secret", "iss", "aud");
        assert_eq!(keys.ttl, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn oversized_ttl_is_capped_and_still_signs() {
        let keys = JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            ttl_minutes: i64::MAX,
        });
        assert_eq!(keys.ttl, Duration::from_secs(24 * 60 * 60));
        let token = keys.issue(8).unwrap();
        assert_eq!(keys.validate(&token).unwrap(), 8);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let token = keys.issue(5).unwrap();
        let err = keys.validate(&tamper_signature(&token)).unwrap_err();
        assert!(matches!(err, TokenError::BadSignature));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let ours = make_keys("secret-a", "iss", "aud");
        let theirs = make_keys("secret-b", "iss", "aud");
        let token = theirs.issue(5).unwrap();
        assert!(matches!(ours.validate(&token), Err(TokenError::BadSignature)));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let keys = make_keys("dev-secret", "iss", "aud");
        assert!(matches!(keys.validate("not-a-jwt"), Err(TokenError::Invalid(_))));
        assert!(matches!(keys.validate(""), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn wrong_issuer_or_audience_is_rejected() {
        let good = make_keys("same-secret", "good-iss", "good-aud");
        let bad = make_keys("same-secret", "bad-iss", "bad-aud");
        let token = good.issue(3).unwrap();
        assert!(bad.validate(&token).is_err());
    }

    #[test]
    fn expiry_boundary() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let issued = OffsetDateTime::now_utc() - TimeDuration::hours(1);
        let token = keys.issue_at(11, issued).unwrap();
        let exp = issued + TimeDuration::hours(24);

        assert_eq!(keys.validate_at(&token, exp - TimeDuration::seconds(1)).unwrap(), 11);
        assert!(matches!(keys.validate_at(&token, exp), Err(TokenError::Expired)));
        assert!(matches!(
            keys.validate_at(&token, exp + TimeDuration::minutes(5)),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn token_issued_long_ago_is_expired_now() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let token = keys
            .issue_at(2, OffsetDateTime::now_utc() - TimeDuration::hours(25))
            .unwrap();
        assert!(matches!(keys.validate(&token), Err(TokenError::Expired)));
    }
}
