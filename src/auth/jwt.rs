use std::time::Duration;

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::config::JwtConfig;
use crate::error::{AppError, AppResult};

/// Issues and validates HS256 tokens.
///
/// Built once from [`JwtConfig`] at startup and shared read-only afterwards; the
/// signing key is never rotated while the process runs. Expiry is checked against
/// the local wall clock with zero leeway.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    action_ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
            action_ttl: Duration::from_secs((cfg.action_ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub(crate) fn sign_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        bind: Option<&str>,
        now: OffsetDateTime,
    ) -> AppResult<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Verify | TokenKind::Reset => self.action_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
            bind: bind.map(str::to_string),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(e.into()))?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    /// Access token for an authenticated session.
    pub fn issue(&self, user_id: Uuid) -> AppResult<String> {
        self.sign_at(user_id, TokenKind::Access, None, OffsetDateTime::now_utc())
    }

    /// Single-purpose token for the verification and password-reset flows,
    /// bound to `bind` (see [`Claims::bind`]).
    pub fn issue_purpose(&self, user_id: Uuid, kind: TokenKind, bind: &str) -> AppResult<String> {
        self.sign_at(user_id, kind, Some(bind), OffsetDateTime::now_utc())
    }

    pub fn validate(&self, token: &str) -> AppResult<Uuid> {
        self.validate_purpose(token, TokenKind::Access).map(|c| c.sub)
    }

    pub fn validate_purpose(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let claims = self.decode(token)?;
        if claims.kind != kind {
            warn!(expected = ?kind, got = ?claims.kind, "token kind mismatch");
            return Err(AppError::TokenInvalid);
        }
        Ok(claims)
    }

    fn decode(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        // Signature comparison happens inside jsonwebtoken's constant-time HMAC verify.
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => {
                    debug!(error = %e, "jwt rejected");
                    AppError::TokenInvalid
                }
            }
        })?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service(secret: &str, issuer: &str, audience: &str) -> TokenService {
        TokenService::new(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 60,
            action_ttl_minutes: 30,
        })
    }

    #[test]
    fn issue_and_validate_round_trip() {
        let tokens = make_service("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let token = tokens.issue(user_id).expect("issue");
        assert_eq!(tokens.validate(&token).expect("validate"), user_id);
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = make_service("dev-secret", "iss", "aud");
        let two_hours_ago = OffsetDateTime::now_utc() - TimeDuration::hours(2);
        let token = tokens
            .sign_at(Uuid::new_v4(), TokenKind::Access, None, two_hours_ago)
            .expect("sign");
        assert!(matches!(tokens.validate(&token), Err(AppError::TokenExpired)));
    }

    #[test]
    fn token_still_valid_just_before_expiry() {
        let tokens = make_service("dev-secret", "iss", "aud");
        let almost_an_hour_ago = OffsetDateTime::now_utc() - TimeDuration::minutes(59);
        let user_id = Uuid::new_v4();
        let token = tokens
            .sign_at(user_id, TokenKind::Access, None, almost_an_hour_ago)
            .expect("sign");
        assert_eq!(tokens.validate(&token).expect("validate"), user_id);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let tokens = make_service("dev-secret", "iss", "aud");
        let token = tokens.issue(Uuid::new_v4()).expect("issue");
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let other = tokens.issue(Uuid::new_v4()).expect("issue");
        // Splice another token's payload under the original signature.
        parts[1] = other.split('.').nth(1).unwrap().to_string();
        let forged = parts.join(".");
        assert!(matches!(tokens.validate(&forged), Err(AppError::TokenInvalid)));
        assert!(matches!(tokens.validate("not-a-jwt"), Err(AppError::TokenInvalid)));
        assert!(matches!(tokens.validate(""), Err(AppError::TokenInvalid)));
    }

    #[test]
    fn foreign_secret_or_audience_is_invalid() {
        let good = make_service("same-secret", "good-iss", "good-aud");
        let other_aud = make_service("same-secret", "good-iss", "bad-aud");
        let other_key = make_service("other-secret", "good-iss", "good-aud");
        let token = good.issue(Uuid::new_v4()).expect("issue");
        assert!(matches!(other_aud.validate(&token), Err(AppError::TokenInvalid)));
        assert!(matches!(other_key.validate(&token), Err(AppError::TokenInvalid)));
    }

    #[test]
    fn purpose_tokens_do_not_open_sessions() {
        let tokens = make_service("dev-secret", "iss", "aud");
        let user_id = Uuid::new_v4();
        let reset = tokens
            .issue_purpose(user_id, TokenKind::Reset, "fingerprint")
            .expect("issue");
        assert!(matches!(tokens.validate(&reset), Err(AppError::TokenInvalid)));
        assert!(matches!(
            tokens.validate_purpose(&reset, TokenKind::Verify),
            Err(AppError::TokenInvalid)
        ));
        let claims = tokens.validate_purpose(&reset, TokenKind::Reset).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.bind.as_deref(), Some("fingerprint"));

        let access = tokens.issue(user_id).expect("issue");
        assert!(matches!(
            tokens.validate_purpose(&access, TokenKind::Reset),
            Err(AppError::TokenInvalid)
        ));
    }
}
