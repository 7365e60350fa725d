use serde::{Deserialize, Serialize};

use crate::users::model::{Role, User};

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
}

impl From<&User> for UserResponse {
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

/// Self-service profile update. Password fields are declared so their
/// presence can be rejected with a pointer to the password route.
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

/// Admin patch; everything except credentials.
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminUpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}
