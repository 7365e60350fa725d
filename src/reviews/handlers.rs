use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use mongodb::bson::oid::ObjectId;
use mongodb::Database;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

use crate::{
    auth::extractors::{protect, restrict_to, CurrentUser},
    error::{parse_object_id, AppError},
    query::{select_fields, ApiQuery},
    reviews::dto::{CreateReviewRequest, ReviewResponse, UpdateReviewRequest},
    reviews::model::Review,
    reviews::repo,
    state::AppState,
    tours,
    users::model::{Role, User},
    users::repo as users_repo,
};

const FILTERABLE_FIELDS: &[&str] = &["rating"];
const USER_ONLY: &[Role] = &[Role::User];
const USER_OR_ADMIN: &[Role] = &[Role::User, Role::Admin];

/// Standalone review routes. Reads are public; writing requires a session
/// with the user role (admins may also edit and delete).
pub fn router(state: AppState) -> Router<AppState> {
    let create = Router::new()
        .route("/", post(create_review))
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, USER_ONLY)
        }));
    let modify = Router::new()
        .route("/:id", patch(update_review).delete(delete_review))
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, USER_OR_ADMIN)
        }));
    let writes = create
        .merge(modify)
        .route_layer(middleware::from_fn_with_state(state, protect));

    Router::new()
        .route("/", get(list_reviews))
        .route("/:id", get(get_review))
        .merge(writes)
}

/// Routes nested under `/tours/:id/reviews`; the tour id comes from the
/// path.
pub fn tour_router(state: AppState) -> Router<AppState> {
    let create = Router::new()
        .route("/", post(create_tour_review))
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, USER_ONLY)
        }))
        .route_layer(middleware::from_fn_with_state(state, protect));

    Router::new()
        .route("/", get(list_tour_reviews))
        .merge(create)
}

fn no_review() -> AppError {
    AppError::not_found("No review found with that ID")
}

/// Resolves the authors for a batch of reviews in one query.
pub(crate) async fn to_responses(
    db: &Database,
    reviews: &[Review],
) -> Result<Vec<ReviewResponse>, AppError> {
    let ids: Vec<ObjectId> = reviews
        .iter()
        .map(|review| review.user)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let authors: HashMap<ObjectId, User> = users_repo::find_by_ids(db, &ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();
    Ok(reviews
        .iter()
        .map(|review| ReviewResponse::new(review, authors.get(&review.user)))
        .collect())
}

async fn store_review(
    state: &AppState,
    author: &User,
    tour_id: ObjectId,
    payload: CreateReviewRequest,
) -> Result<(StatusCode, Json<Value>), AppError> {
    // A review may only be attached to a tour that actually exists.
    if tours::repo::find_by_id(&state.db, tour_id).await?.is_none() {
        return Err(AppError::not_found("No tour found with that ID"));
    }

    let rating = payload
        .rating
        .ok_or_else(|| AppError::validation("A review must have a rating"))?;
    let review = Review::new(&payload.review, rating, tour_id, author.id)?;
    repo::insert(&state.db, &review).await?;
    repo::recompute_tour_ratings(&state.db, tour_id).await?;
    info!(review_id = %review.id, tour_id = %tour_id, "review created");

    let response = ReviewResponse::new(&review, Some(author));
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": { "review": response } })),
    ))
}

#[instrument(skip(state))]
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let query = ApiQuery::from_params(&params, FILTERABLE_FIELDS);
    let reviews = repo::list(&state.db, &query).await?;
    let reviews = to_responses(&state.db, &reviews).await?;
    let results = reviews.len();

    let mut reviews = serde_json::to_value(&reviews).map_err(anyhow::Error::new)?;
    if let Some(projection) = &query.projection {
        select_fields(&mut reviews, projection);
    }

    Ok(Json(json!({
        "status": "success",
        "results": results,
        "data": { "reviews": reviews },
    })))
}

#[instrument(skip(state))]
pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    let review = repo::find_by_id(&state.db, id).await?.ok_or_else(no_review)?;
    let author = users_repo::find_by_id(&state.db, review.user).await?;

    let response = ReviewResponse::new(&review, author.as_ref());
    Ok(Json(
        json!({ "status": "success", "data": { "review": response } }),
    ))
}

#[instrument(skip(state, current, payload))]
pub async fn create_review(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let tour_id = match payload.tour.as_deref() {
        Some(raw) => parse_object_id(raw)?,
        None => return Err(AppError::validation("Review must belong to a tour.")),
    };
    store_review(&state, &current, tour_id, payload).await
}

#[instrument(skip(state, current, payload))]
pub async fn create_tour_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let tour_id = parse_object_id(&id)?;
    store_review(&state, &current, tour_id, payload).await
}

#[instrument(skip(state))]
pub async fn list_tour_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let tour_id = parse_object_id(&id)?;
    let reviews = repo::list_by_tour(&state.db, tour_id).await?;
    let reviews = to_responses(&state.db, &reviews).await?;

    Ok(Json(json!({
        "status": "success",
        "results": reviews.len(),
        "data": { "reviews": reviews },
    })))
}

/// Non-admins may only touch their own reviews.
fn check_ownership(review: &Review, current: &User) -> Result<(), AppError> {
    if current.role != Role::Admin && review.user != current.id {
        return Err(AppError::forbidden(
            "You do not have permission to perform this action",
        ));
    }
    Ok(())
}

#[instrument(skip(state, current, payload))]
pub async fn update_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    let review = repo::find_by_id(&state.db, id).await?.ok_or_else(no_review)?;
    check_ownership(&review, &current)?;

    let fields = payload.into_update()?;
    let review = if fields.is_empty() {
        review
    } else {
        repo::update(&state.db, id, fields)
            .await?
            .ok_or_else(no_review)?
    };
    repo::recompute_tour_ratings(&state.db, review.tour).await?;
    info!(review_id = %review.id, "review updated");

    let author = users_repo::find_by_id(&state.db, review.user).await?;
    let response = ReviewResponse::new(&review, author.as_ref());
    Ok(Json(
        json!({ "status": "success", "data": { "review": response } }),
    ))
}

#[instrument(skip(state, current))]
pub async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(current): CurrentUser,
) -> Result<StatusCode, AppError> {
    let id = parse_object_id(&id)?;
    let review = repo::find_by_id(&state.db, id).await?.ok_or_else(no_review)?;
    check_ownership(&review, &current)?;

    let deleted = repo::delete(&state.db, id).await?.ok_or_else(no_review)?;
    repo::recompute_tour_ratings(&state.db, deleted.tour).await?;
    info!(review_id = %id, tour_id = %deleted.tour, "review deleted");
    Ok(StatusCode::NO_CONTENT)
}
