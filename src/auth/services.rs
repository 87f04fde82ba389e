use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::claims::TokenKind;
use super::jwt::TokenService;
use super::password::{equalize_timing, fingerprint, hash_password, verify_password};
use super::repo::UserRepo;
use super::repo_types::{User, UserChanges};
use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex");
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn validated_email(raw: &str) -> AppResult<String> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(AppError::validation("invalid email"));
    }
    Ok(email)
}

fn validated_password(plain: &str) -> AppResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// User records and the secrets that guard them.
#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepo>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserRepo>) -> Self {
        Self { users }
    }

    pub async fn register(&self, email: &str, plain: &str) -> AppResult<User> {
        let email = validated_email(email)?;
        validated_password(plain)?;
        let hash = hash_password(plain)?;
        let user = self.users.insert(&email, &hash).await.map_err(|e| {
            if matches!(e, AppError::DuplicateIdentity) {
                warn!(email = %email, "email already registered");
            }
            e
        })?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Unknown email, wrong secret and inactive account are indistinguishable.
    pub async fn verify_credentials(&self, email: &str, plain: &str) -> AppResult<Uuid> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            equalize_timing(plain);
            warn!(email = %email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        };
        if !verify_password(plain, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }
        if !user.is_active {
            warn!(user_id = %user.id, "login by inactive user");
            return Err(AppError::InvalidCredentials);
        }
        Ok(user.id)
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<User> {
        self.users.find_by_id(user_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.users.find_by_email(&normalize_email(email)).await
    }

    /// Changing the email clears the verified flag.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        password: Option<&str>,
    ) -> AppResult<User> {
        let current = self.get(user_id).await?;
        let mut changes = UserChanges::default();
        if let Some(raw) = email {
            let email = validated_email(raw)?;
            if email != current.email {
                changes.email = Some(email);
                changes.is_verified = Some(false);
            }
        }
        if let Some(plain) = password {
            validated_password(plain)?;
            changes.password_hash = Some(hash_password(plain)?);
        }
        let user = self.users.update(user_id, changes).await?;
        info!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    /// Writes a new password only while the stored hash is still `current_hash`.
    pub async fn set_password(
        &self,
        user_id: Uuid,
        current_hash: &str,
        plain: &str,
    ) -> AppResult<User> {
        validated_password(plain)?;
        let changes = UserChanges {
            password_hash: Some(hash_password(plain)?),
            expected_password_hash: Some(current_hash.to_string()),
            ..Default::default()
        };
        let user = self.users.update(user_id, changes).await?;
        info!(user_id = %user.id, "password reset");
        Ok(user)
    }

    pub async fn mark_verified(&self, user_id: Uuid) -> AppResult<User> {
        let changes = UserChanges {
            is_verified: Some(true),
            ..Default::default()
        };
        let user = self.users.update(user_id, changes).await?;
        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    /// Soft deactivation; the record is kept.
    pub async fn deactivate(&self, user_id: Uuid) -> AppResult<()> {
        let changes = UserChanges {
            is_active: Some(false),
            ..Default::default()
        };
        self.users.update(user_id, changes).await?;
        info!(user_id = %user_id, "user deactivated");
        Ok(())
    }
}

/// Verification and password-reset flows built on top of single-purpose tokens.
#[derive(Clone)]
pub struct AccountFlows {
    credentials: CredentialStore,
    tokens: Arc<TokenService>,
}

impl AccountFlows {
    pub fn new(credentials: CredentialStore, tokens: Arc<TokenService>) -> Self {
        Self {
            credentials,
            tokens,
        }
    }

    /// Returns the issued token, or `None` when there is nothing to send.
    /// Callers must not reveal which case happened.
    pub async fn request_verification(&self, email: &str) -> AppResult<Option<String>> {
        match self.credentials.find_by_email(email).await? {
            Some(user) if user.is_active && !user.is_verified => {
                let token = self.tokens.issue_purpose(user.id, TokenKind::Verify, &user.email)?;
                deliver(&user, TokenKind::Verify, &token);
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }

    /// The token only verifies the address it was sent to.
    pub async fn verify(&self, token: &str) -> AppResult<User> {
        let claims = self.tokens.validate_purpose(token, TokenKind::Verify)?;
        let user = self.active_user(claims.sub).await?;
        if claims.bind.as_deref() != Some(user.email.as_str()) {
            warn!(user_id = %user.id, "verify token issued for a different email");
            return Err(AppError::TokenInvalid);
        }
        if user.is_verified {
            return Ok(user);
        }
        self.credentials.mark_verified(user.id).await
    }

    pub async fn forgot_password(&self, email: &str) -> AppResult<Option<String>> {
        match self.credentials.find_by_email(email).await? {
            Some(user) if user.is_active => {
                let token = self.tokens.issue_purpose(
                    user.id,
                    TokenKind::Reset,
                    &fingerprint(&user.password_hash),
                )?;
                deliver(&user, TokenKind::Reset, &token);
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }

    /// Single use: the token is bound to the password hash it was issued against.
    pub async fn reset_password(&self, token: &str, plain: &str) -> AppResult<()> {
        let claims = self.tokens.validate_purpose(token, TokenKind::Reset)?;
        let user = self.active_user(claims.sub).await?;
        if claims.bind.as_deref() != Some(fingerprint(&user.password_hash).as_str()) {
            warn!(user_id = %user.id, "stale reset token");
            return Err(AppError::TokenInvalid);
        }
        match self
            .credentials
            .set_password(user.id, &user.password_hash, plain)
            .await
        {
            Ok(_) => Ok(()),
            // Another redemption of the same token won the race.
            Err(AppError::NotFound) => Err(AppError::TokenInvalid),
            Err(e) => Err(e),
        }
    }

    async fn active_user(&self, user_id: Uuid) -> AppResult<User> {
        match self.credentials.get(user_id).await {
            Ok(user) if user.is_active => Ok(user),
            Ok(_) => Err(AppError::UserDeactivated),
            Err(AppError::NotFound) => Err(AppError::TokenInvalid),
            Err(e) => Err(e),
        }
    }
}

/// Hand-off point to the mail collaborator.
fn deliver(user: &User, kind: TokenKind, token: &str) {
    info!(
        target: "snapfeed::mailer",
        user_id = %user.id,
        email = %user.email,
        purpose = ?kind,
        token = %token,
        "account token ready for delivery"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::MemoryUserRepo;
    use crate::config::JwtConfig;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryUserRepo::new()))
    }

    fn flows(credentials: CredentialStore) -> AccountFlows {
        let tokens = TokenService::new(&JwtConfig {
            secret: "flow-secret".into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            ttl_minutes: 60,
            action_ttl_minutes: 60,
        });
        AccountFlows::new(credentials, Arc::new(tokens))
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("a b@x.com"));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[tokio::test]
    async fn register_normalizes_and_starts_unverified() {
        let store = store();
        let user = store.register(" A@X.com ", "pw123456").await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert!(user.is_active);
        assert!(!user.is_verified);
        assert_ne!(user.password_hash, "pw123456");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let store = store();
        store.register("a@x.com", "pw123456").await.unwrap();
        let err = store.register("A@X.COM", "other-secret").await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity));
    }

    #[tokio::test]
    async fn concurrent_duplicate_registration_has_one_winner() {
        let store = store();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.register("race@x.com", "pw123456").await
            }));
        }
        let mut ok = 0;
        let mut dup = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AppError::DuplicateIdentity) => dup += 1,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(dup, 7);
    }

    #[tokio::test]
    async fn register_validates_input() {
        let store = store();
        assert!(matches!(
            store.register("bad", "pw123456").await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            store.register("a@x.com", "short").await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn credential_failures_are_uniform() {
        let store = store();
        let id = store.register("a@x.com", "pw123456").await.unwrap().id;
        assert_eq!(store.verify_credentials("A@x.com", "pw123456").await.unwrap(), id);

        let wrong = store.verify_credentials("a@x.com", "wrongpw").await.unwrap_err();
        let unknown = store.verify_credentials("nouser@x.com", "anything").await.unwrap_err();
        store.deactivate(id).await.unwrap();
        let inactive = store.verify_credentials("a@x.com", "pw123456").await.unwrap_err();

        for err in [wrong, unknown, inactive] {
            assert!(matches!(err, AppError::InvalidCredentials));
            assert_eq!(err.code(), "invalid_credentials");
            assert_eq!(err.to_string(), "invalid credentials");
        }
    }

    #[tokio::test]
    async fn get_unknown_user_is_not_found() {
        assert!(matches!(store().get(Uuid::new_v4()).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn update_profile_changes_email_and_password() {
        let store = store();
        let id = store.register("a@x.com", "pw123456").await.unwrap().id;
        store.mark_verified(id).await.unwrap();
        store.register("taken@x.com", "pw123456").await.unwrap();

        let err = store.update_profile(id, Some("Taken@x.com"), None).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity));

        let user = store
            .update_profile(id, Some("new@x.com"), Some("new-secret-1"))
            .await
            .unwrap();
        assert_eq!(user.email, "new@x.com");
        assert!(!user.is_verified);
        assert_eq!(store.verify_credentials("new@x.com", "new-secret-1").await.unwrap(), id);
        assert!(store.verify_credentials("new@x.com", "pw123456").await.is_err());
    }

    #[tokio::test]
    async fn verification_flow_marks_user_verified() {
        let store = store();
        let flows = flows(store.clone());
        let id = store.register("v@x.com", "pw123456").await.unwrap().id;

        assert!(flows.request_verification("nobody@x.com").await.unwrap().is_none());
        let token = flows.request_verification("V@x.com").await.unwrap().expect("token");
        let user = flows.verify(&token).await.unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_verified);
        assert!(flows.request_verification("v@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_reset_redemptions_have_one_winner() {
        let store = store();
        let flows = flows(store.clone());
        store.register("c@x.com", "pw123456").await.unwrap();
        let token = flows.forgot_password("c@x.com").await.unwrap().expect("token");

        let (a, b) = tokio::join!(
            flows.reset_password(&token, "first-pw-123"),
            flows.reset_password(&token, "second-pw-123")
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(AppError::TokenInvalid)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn verify_token_does_not_follow_email_change() {
        let store = store();
        let flows = flows(store.clone());
        let id = store.register("me@x.com", "pw123456").await.unwrap().id;

        let token = flows.request_verification("me@x.com").await.unwrap().expect("token");
        store.update_profile(id, Some("victim@x.com"), None).await.unwrap();
        assert!(matches!(flows.verify(&token).await, Err(AppError::TokenInvalid)));
        let user = store.get(id).await.unwrap();
        assert_eq!(user.email, "victim@x.com");
        assert!(!user.is_verified);

        let token = flows.request_verification("victim@x.com").await.unwrap().expect("token");
        assert!(flows.verify(&token).await.unwrap().is_verified);
    }

    #[tokio::test]
    async fn reset_flow_replaces_password() {
        let store = store();
        let flows = flows(store.clone());
        let id = store.register("r@x.com", "pw123456").await.unwrap().id;

        let token = flows.forgot_password("r@x.com").await.unwrap().expect("token");
        assert!(matches!(flows.verify(&token).await, Err(AppError::TokenInvalid)));
        flows.reset_password(&token, "brand-new-pw").await.unwrap();
        assert_eq!(store.verify_credentials("r@x.com", "brand-new-pw").await.unwrap(), id);

        assert!(matches!(
            flows.reset_password(&token, "attacker-pw-1").await,
            Err(AppError::TokenInvalid)
        ));
        assert!(store.verify_credentials("r@x.com", "attacker-pw-1").await.is_err());

        let token = flows.forgot_password("r@x.com").await.unwrap().expect("token");
        store.deactivate(id).await.unwrap();
        assert!(flows.forgot_password("r@x.com").await.unwrap().is_none());
        assert!(matches!(
            flows.reset_password(&token, "another-pw-1").await,
            Err(AppError::UserDeactivated)
        ));
    }
}
