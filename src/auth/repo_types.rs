use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,                   // unique user ID
    pub email: String,              // normalized email
    pub password_hash: String,      // Argon2 PHC string, never exposed
    pub is_active: bool,            // false after soft deactivation
    pub is_verified: bool,          // email confirmed
    pub created_at: OffsetDateTime, // creation timestamp
    pub updated_at: OffsetDateTime,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
    /// Apply only while the stored hash still equals this; otherwise `NotFound`.
    pub expected_password_hash: Option<String>,
}
