use axum::{
    extract::{FromRef, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
            SignupRequest, UpdatePasswordRequest,
        },
        extractors::{protect, CurrentUser},
        password::{hash_password, verify_password},
        token::JwtKeys,
    },
    error::AppError,
    state::AppState,
    users::model::{
        hash_reset_token, is_valid_email, issue_reset_token, validate_password_pair, User,
    },
    users::repo as users_repo,
};

/// Session and password-lifecycle routes, mounted under `/users` alongside
/// the account routes.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
        .route(
            "/updateMyPassword",
            patch(update_password)
                .route_layer(middleware::from_fn_with_state(state, protect)),
        )
}

type SessionResponse = (StatusCode, HeaderMap, Json<AuthResponse>);

/// Signs a token for `user` and sends it both in the body and as an
/// HttpOnly session cookie.
fn send_token(state: &AppState, user: &User, status: StatusCode) -> Result<SessionResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id)?;
    let cookie = auth_cookie(
        &token,
        state.config.jwt.ttl_minutes * 60,
        state.config.is_production(),
    );

    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid cookie header: {e}")))?;
    headers.insert(header::SET_COOKIE, value);

    Ok((status, headers, Json(AuthResponse::new(token, user))))
}

fn auth_cookie(value: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie =
        format!("jwt={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<SessionResponse, AppError> {
    payload.email = payload.email.trim().to_lowercase();
    let name = payload.name.trim().to_string();

    if name.is_empty() {
        return Err(AppError::validation("Please tell us your name!"));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid signup email");
        return Err(AppError::validation("Please provide a valid email"));
    }
    validate_password_pair(&payload.password, &payload.password_confirm)?;

    let hash = hash_password(&payload.password)?;
    let user = User::new(name, payload.email, hash);
    users_repo::insert(&state.db, &user).await?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    send_token(&state, &user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<SessionResponse, AppError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("Please provide email and password!"));
    }

    // One message for unknown email, deactivated account and wrong
    // password; nothing here may reveal which one it was.
    let user = users_repo::find_by_email_with_password(&state.db, &payload.email).await?;
    let Some(user) = user else {
        warn!(email = %payload.email, "login unknown or inactive email");
        return Err(AppError::unauthorized("Incorrect email or password"));
    };
    let Some(hash) = user.password.as_deref() else {
        warn!(user_id = %user.id, "login against account without credentials");
        return Err(AppError::unauthorized("Incorrect email or password"));
    };
    if !verify_password(&payload.password, hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Incorrect email or password"));
    }

    info!(user_id = %user.id, "user logged in");
    send_token(&state, &user, StatusCode::OK)
}

/// Overwrites the session cookie with a short-lived dummy value, carrying
/// the same attributes as the cookie it replaces.
pub async fn logout(State(state): State<AppState>) -> (HeaderMap, Json<Value>) {
    let mut headers = HeaderMap::new();
    let cookie = auth_cookie("loggedout", 10, state.config.is_production());
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
    (headers, Json(json!({ "status": "success" })))
}

#[instrument(skip(state, headers, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    payload.email = payload.email.trim().to_lowercase();
    if !is_valid_email(&payload.email) {
        return Err(AppError::validation("Please provide a valid email"));
    }

    // The response below is identical whether or not the address exists,
    // so this endpoint cannot reveal which emails have accounts.
    if let Some(user) = users_repo::find_by_email_with_password(&state.db, &payload.email).await? {
        let token = issue_reset_token();
        users_repo::set_reset_token(&state.db, user.id, &token).await?;

        let reset_url = reset_url(&state, &headers, &token.raw);
        let body = format!(
            "Forgot your password? Submit a PATCH request with your new password and \
             passwordConfirm to: {reset_url}.\nIf you didn't forget your password, \
             please ignore this email!"
        );
        let send = state
            .mailer
            .send(&user.email, "Your password reset token (valid for 10 min)", &body)
            .await;

        if let Err(e) = send {
            // A token nobody received must not stay redeemable.
            users_repo::clear_reset_token(&state.db, user.id).await?;
            error!(error = %e, user_id = %user.id, "reset email failed");
            return Err(AppError::Internal(anyhow::anyhow!(
                "There was an error sending the email. Try again later!"
            )));
        }
        info!(user_id = %user.id, "password reset token issued");
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

fn reset_url(state: &AppState, headers: &HeaderMap, raw_token: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = if state.config.is_production() {
        "https"
    } else {
        "http"
    };
    format!("{proto}://{host}/api/v1/users/resetPassword/{raw_token}")
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<SessionResponse, AppError> {
    let hashed = hash_reset_token(&token);
    let user = users_repo::find_by_reset_token(&state.db, &hashed)
        .await?
        .ok_or_else(|| AppError::validation("Token is invalid or has expired"))?;

    validate_password_pair(&payload.password, &payload.password_confirm)?;
    let hash = hash_password(&payload.password)?;
    users_repo::set_password(&state.db, user.id, &hash).await?;

    info!(user_id = %user.id, "password reset completed");
    send_token(&state, &user, StatusCode::OK)
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<SessionResponse, AppError> {
    let user = users_repo::find_by_id_with_password(&state.db, current.id)
        .await?
        .ok_or_else(|| {
            AppError::unauthorized("The user belonging to this token does no longer exist.")
        })?;

    let current_ok = user
        .password
        .as_deref()
        .map(|hash| verify_password(&payload.password_current, hash))
        .transpose()?
        .unwrap_or(false);
    if !current_ok {
        return Err(AppError::unauthorized("Your current password is wrong."));
    }

    validate_password_pair(&payload.password, &payload.password_confirm)?;
    let hash = hash_password(&payload.password)?;
    users_repo::set_password(&state.db, user.id, &hash).await?;

    info!(user_id = %user.id, "password updated");
    send_token(&state, &user, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_cookie_is_http_only_and_scoped() {
        let cookie = auth_cookie("abc.def.ghi", 3600, false);
        assert_eq!(
            cookie,
            "jwt=abc.def.ghi; Path=/; Max-Age=3600; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn auth_cookie_adds_secure_in_production() {
        let cookie = auth_cookie("t", 60, true);
        assert!(cookie.ends_with("; Secure"));
    }

    #[tokio::test]
    async fn logout_cookie_expires_quickly() {
        let (headers, _) = logout(State(AppState::fake())).await;

        let cookie = headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("jwt=loggedout"));
        assert!(cookie.contains("Max-Age=10"));
        // The fake state is not production, so the cookie stays plain.
        assert!(!cookie.contains("Secure"));
    }
}
