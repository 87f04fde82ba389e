use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::error;

#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

// Cheap parameters keep the test suite fast; verification reads the
// parameters back from the PHC string, so both settings interoperate.
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    use argon2::{Algorithm, Params, Version};
    let params = Params::new(1024, 1, 1, None).expect("valid test params");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

lazy_static! {
    /// Verified against when the account does not exist, so a miss costs the same as a hit.
    static ref DUMMY_HASH: Option<String> = hash_password("snapfeed-timing-equalizer").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(hasher()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// One-way digest of a stored hash; changes whenever the password does.
pub fn fingerprint(password_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Runs a throwaway verification; the result is discarded.
pub fn equalize_timing(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("same-password"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn fingerprint_tracks_the_hash() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&a));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
        assert!(!fingerprint(&a).contains(&a));
    }

    #[test]
    fn dummy_hash_is_available() {
        assert!(DUMMY_HASH.is_some());
        equalize_timing("whatever");
    }
}
