use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, patch},
    Json, Router,
};
use mongodb::bson::Document;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, instrument};

use crate::{
    auth::extractors::{protect, restrict_to, CurrentUser},
    error::{parse_object_id, AppError},
    query::ApiQuery,
    state::AppState,
    users::dto::{AdminUpdateUserRequest, UpdateMeRequest, UserResponse},
    users::model::{is_valid_email, Role},
    users::repo,
};

const FILTERABLE_FIELDS: &[&str] = &["name", "email", "role"];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Account routes. Everything here requires a session; the admin block
/// additionally requires the admin role.
pub fn router(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/", get(list_users).post(create_user))
        .route(
            "/:id",
            get(get_user).patch(admin_update_user).delete(delete_user),
        )
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, ADMIN_ONLY)
        }));

    Router::new()
        .route("/me", get(get_me))
        .route("/updateMe", patch(update_me))
        .route("/deleteMe", delete(delete_me))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state, protect))
}

#[instrument(skip(state, current))]
pub async fn get_me(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
) -> Result<Json<Value>, AppError> {
    // Same lookup as the admin route, pinned to the session user.
    let user = repo::find_by_id(&state.db, current.id)
        .await?
        .ok_or_else(|| AppError::not_found("No user found with that ID"))?;
    Ok(Json(
        json!({ "status": "success", "data": { "user": UserResponse::from(&user) } }),
    ))
}

#[instrument(skip(state, current, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<Value>, AppError> {
    if payload.password.is_some() || payload.password_confirm.is_some() {
        return Err(AppError::validation(
            "This route is not for password updates. Please use /updateMyPassword.",
        ));
    }

    let mut fields = Document::new();
    if let Some(name) = payload.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(AppError::validation("Please tell us your name!"));
        }
        fields.insert("name", name);
    }
    if let Some(email) = payload.email.as_deref() {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AppError::validation("Please provide a valid email"));
        }
        fields.insert("email", email);
    }
    if let Some(photo) = payload.photo {
        fields.insert("photo", photo);
    }

    let user = if fields.is_empty() {
        repo::find_by_id(&state.db, current.id).await?
    } else {
        repo::update_fields(&state.db, current.id, fields).await?
    }
    .ok_or_else(|| AppError::not_found("No user found with that ID"))?;

    info!(user_id = %user.id, "profile updated");
    Ok(Json(
        json!({ "status": "success", "data": { "user": UserResponse::from(&user) } }),
    ))
}

/// Soft delete: the account is deactivated and disappears from all reads,
/// but the document stays in the collection.
#[instrument(skip(state, current))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
) -> Result<StatusCode, AppError> {
    repo::deactivate(&state.db, current.id).await?;
    info!(user_id = %current.id, "account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let query = ApiQuery::from_params(&params, FILTERABLE_FIELDS);
    let users = repo::list(&state.db, &query).await?;
    let users: Vec<UserResponse> = users.iter().map(UserResponse::from).collect();
    let results = users.len();

    let mut users = serde_json::to_value(&users).map_err(anyhow::Error::new)?;
    if let Some(projection) = &query.projection {
        crate::query::select_fields(&mut users, projection);
    }
    Ok(Json(json!({
        "status": "success",
        "results": results,
        "data": { "users": users },
    })))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    let user = repo::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found("No user found with that ID"))?;
    Ok(Json(
        json!({ "status": "success", "data": { "user": UserResponse::from(&user) } }),
    ))
}

/// Accounts are only created through signup so the password pipeline always
/// runs; this stub exists to make that explicit.
pub async fn create_user() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": "error",
            "message": "This route is not defined! Please use /signup instead",
        })),
    )
}

#[instrument(skip(state, payload))]
pub async fn admin_update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;

    let mut fields = Document::new();
    if let Some(name) = payload.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(AppError::validation("Please tell us your name!"));
        }
        fields.insert("name", name);
    }
    if let Some(email) = payload.email.as_deref() {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AppError::validation("Please provide a valid email"));
        }
        fields.insert("email", email);
    }
    if let Some(photo) = payload.photo {
        fields.insert("photo", photo);
    }
    if let Some(role) = payload.role {
        fields.insert("role", mongodb::bson::to_bson(&role).map_err(anyhow::Error::new)?);
    }
    if let Some(active) = payload.active {
        fields.insert("active", active);
    }
    if fields.is_empty() {
        return Err(AppError::validation("Nothing to update"));
    }

    let user = repo::update_fields(&state.db, id, fields)
        .await?
        .ok_or_else(|| AppError::not_found("No user found with that ID"))?;

    info!(user_id = %user.id, "user updated by admin");
    Ok(Json(
        json!({ "status": "success", "data": { "user": UserResponse::from(&user) } }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_object_id(&id)?;
    if !repo::delete(&state.db, id).await? {
        return Err(AppError::not_found("No user found with that ID"));
    }
    info!(user_id = %id, "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}
