use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use mongodb::bson::oid::ObjectId;

use super::token::{JwtKeys, TokenError};
use crate::error::AppError;
use crate::state::AppState;
use crate::users::model::{Role, User};
use crate::users::repo as users_repo;

/// The authenticated user for this request, inserted by [`protect`] and
/// read back by handlers through `FromRequestParts`.
#[derive(Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "CurrentUser extracted on a route without the protect layer"
                ))
            })
    }
}

/// Authentication gate. Runs the full chain: extract the token (Bearer
/// header first, `jwt` cookie second), verify signature and expiry, confirm
/// the subject still exists and is active, and reject tokens issued before
/// the last password change. On success the loaded user rides along in the
/// request extensions.
pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_or_cookie_token(req.headers()).ok_or_else(|| {
        AppError::unauthorized("You are not logged in! Please log in to get access.")
    })?;

    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify(&token)?;
    let user_id = ObjectId::parse_str(&claims.sub).map_err(|_| TokenError::Malformed)?;

    let user = users_repo::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| {
            AppError::unauthorized("The user belonging to this token does no longer exist.")
        })?;

    if user.changed_password_after(claims.iat as i64) {
        return Err(AppError::unauthorized(
            "User recently changed password! Please log in again.",
        ));
    }

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Role gate for routes behind [`protect`]. Mounted per route group:
///
/// ```ignore
/// .route_layer(middleware::from_fn(|req, next| restrict_to(req, next, &[Role::Admin])))
/// ```
pub async fn restrict_to(
    req: Request,
    next: Next,
    allowed: &[Role],
) -> Result<Response, AppError> {
    let current = req.extensions().get::<CurrentUser>().ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "restrict_to mounted on a route without the protect layer"
        ))
    })?;
    authorize(current.0.role, allowed)?;
    Ok(next.run(req).await)
}

pub fn authorize(role: Role, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&role) {
        return Ok(());
    }
    Err(AppError::forbidden(
        "You do not have permission to perform this action",
    ))
}

fn bearer_or_cookie_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    cookie_value(headers, "jwt")
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
