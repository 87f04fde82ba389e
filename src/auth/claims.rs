use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purpose of a JWT. Only `Access` tokens open a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Verify,
    Reset,
}

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,      // user ID
    pub iat: usize,     // issued at (unix timestamp)
    pub exp: usize,     // expires at (unix timestamp)
    pub iss: String,    // issuer
    pub aud: String,    // audience
    pub kind: TokenKind, // token type
    /// Verify: the email the token was sent to. Reset: fingerprint of the
    /// password hash at issue time, so the token dies once the password changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}
