use crate::error::AppError;
use lazy_static::lazy_static;
use mongodb::bson::{oid::ObjectId, DateTime};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

pub const PASSWORD_MIN_LEN: usize = 8;
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

/// Stored user document. The password hash is optional because reads
/// normally project it out; only the credential paths load it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    #[serde(default = "default_photo")]
    pub photo: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_expires: Option<DateTime>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime,
}

fn default_photo() -> String {
    "default.jpg".to_string()
}

fn default_active() -> bool {
    true
}

impl User {
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        Self {
            id: ObjectId::new(),
            name,
            email,
            photo: default_photo(),
            role: Role::User,
            password: Some(password_hash),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: DateTime::now(),
        }
    }

    /// True when the password changed after the token was issued, i.e. the
    /// token must no longer be honored.
    pub fn changed_password_after(&self, token_iat_secs: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => token_iat_secs < changed.timestamp_millis() / 1000,
            None => false,
        }
    }
}

/// A freshly minted reset token. Only `hashed` is stored; `raw` goes to the
/// user out of band and is useless to anyone reading the database.
pub struct ResetToken {
    pub raw: String,
    pub hashed: String,
    pub expires: DateTime,
}

pub fn issue_reset_token() -> ResetToken {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let hashed = hash_reset_token(&raw);
    let expires = DateTime::from_time_0_3(
        OffsetDateTime::now_utc() + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
    );
    ResetToken {
        raw,
        hashed,
        expires,
    }
}

pub fn hash_reset_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(AppError::validation(format!(
            "A password must have at least {PASSWORD_MIN_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_password_pair(password: &str, confirm: &str) -> Result<(), AppError> {
    validate_password(password)?;
    if password != confirm {
        return Err(AppError::validation("Passwords are not the same!"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{bson, to_bson};

    fn user_with_changed_at(changed: Option<DateTime>) -> User {
        let mut user = User::new("Test".into(), "t@example.com".into(), "hash".into());
        user.password_changed_at = changed;
        user
    }

    #[test]
    fn roles_serialize_kebab_case() {
        assert_eq!(to_bson(&Role::User).unwrap(), bson!("user"));
        assert_eq!(to_bson(&Role::Guide).unwrap(), bson!("guide"));
        assert_eq!(to_bson(&Role::LeadGuide).unwrap(), bson!("lead-guide"));
        assert_eq!(to_bson(&Role::Admin).unwrap(), bson!("admin"));
    }

    #[test]
    fn password_never_changed_keeps_tokens_valid() {
        let user = user_with_changed_at(None);
        assert!(!user.changed_password_after(0));
    }

    #[test]
    fn token_issued_before_change_is_stale() {
        let now = OffsetDateTime::now_utc();
        let user = user_with_changed_at(Some(DateTime::from_time_0_3(now)));
        let issued_earlier = (now - Duration::hours(1)).unix_timestamp();
        assert!(user.changed_password_after(issued_earlier));
    }

    #[test]
    fn token_issued_after_change_stays_valid() {
        let now = OffsetDateTime::now_utc();
        let user = user_with_changed_at(Some(DateTime::from_time_0_3(now - Duration::hours(1))));
        assert!(!user.changed_password_after(now.unix_timestamp()));
    }

    #[test]
    fn reset_token_hash_matches_stored_form() {
        let token = issue_reset_token();
        assert_eq!(token.raw.len(), 64);
        assert_eq!(hash_reset_token(&token.raw), token.hashed);
        assert_ne!(token.raw, token.hashed);
    }

    #[test]
    fn reset_token_expires_in_ten_minutes() {
        let token = issue_reset_token();
        let expires = token.expires.to_time_0_3();
        let delta = expires - OffsetDateTime::now_utc();
        assert!(delta > Duration::minutes(9));
        assert!(delta <= Duration::minutes(10));
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@example.com"));
    }

    #[test]
    fn password_length_is_enforced() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn password_pair_must_match() {
        assert!(validate_password_pair("pass1234", "pass1234").is_ok());
        let err = validate_password_pair("pass1234", "pass12345").unwrap_err();
        assert!(err.to_string().contains("not the same"));
    }

    #[test]
    fn stored_document_round_trips_without_password() {
        let doc = mongodb::bson::doc! {
            "_id": ObjectId::new(),
            "name": "Leo",
            "email": "leo@example.com",
            "role": "guide",
            "active": true,
            "createdAt": DateTime::now(),
        };
        let user: User = mongodb::bson::from_document(doc).expect("deserialize");
        assert_eq!(user.role, Role::Guide);
        assert_eq!(user.photo, "default.jpg");
        assert!(user.password.is_none());
        assert!(user.active);
    }
}
