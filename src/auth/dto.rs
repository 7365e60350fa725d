use serde::{Deserialize, Serialize};

use crate::users::model::{Role, User};

/// Request body for account creation. Role is deliberately absent: every
/// signup starts as a plain user.
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub password_current: String,
    pub password: String,
    pub password_confirm: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_hex(),
            name: user.name.clone(),
            email: user.email.clone(),
            photo: user.photo.clone(),
            role: user.role,
        }
    }
}

/// Response for every endpoint that establishes a session.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub status: &'static str,
    pub token: String,
    pub data: AuthData,
}

#[derive(Debug, Serialize)]
pub struct AuthData {
    pub user: PublicUser,
}

impl AuthResponse {
    pub fn new(token: String, user: &User) -> Self {
        Self {
            status: "success",
            token,
            data: AuthData {
                user: PublicUser::from(user),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_response_never_exposes_the_password() {
        let mut user = User::new(
            "Test".into(),
            "test@example.com".into(),
            "$argon2id$secret".into(),
        );
        user.role = Role::Guide;

        let response = AuthResponse::new("jwt-token".into(), &user);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["token"], "jwt-token");
        assert_eq!(json["data"]["user"]["email"], "test@example.com");
        assert_eq!(json["data"]["user"]["role"], "guide");
        assert_eq!(json["data"]["user"]["id"], user.id.to_hex());
        assert!(json["data"]["user"].get("password").is_none());
    }
}
