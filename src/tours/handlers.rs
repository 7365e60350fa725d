use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use mongodb::bson::oid::ObjectId;
use mongodb::Database;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

use crate::{
    auth::extractors::{protect, restrict_to},
    error::{parse_object_id, AppError},
    query::{select_fields, ApiQuery},
    reviews,
    state::AppState,
    tours::dto::{CreateTourRequest, TourResponse, UpdateTourRequest},
    tours::model::Tour,
    tours::repo,
    users::model::{Role, User},
    users::repo as users_repo,
};

/// Query parameters accepted as tour filters; anything else is dropped.
const FILTERABLE_FIELDS: &[&str] = &[
    "duration",
    "ratingsQuantity",
    "ratingsAverage",
    "maxGroupSize",
    "difficulty",
    "price",
];
const STAFF_ONLY: &[Role] = &[Role::Admin, Role::LeadGuide];

/// Tour routes. Reads are public; writes sit behind a session with the
/// admin or lead-guide role. Reviews for a single tour hang off `/:id`.
pub fn router(state: AppState) -> Router<AppState> {
    let staff = Router::new()
        .route("/", post(create_tour))
        .route("/:id", axum::routing::patch(update_tour).delete(delete_tour))
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, STAFF_ONLY)
        }))
        .route_layer(middleware::from_fn_with_state(state.clone(), protect));

    Router::new()
        .route("/", get(list_tours))
        .route("/top-5-cheap", get(top_tours))
        .route("/:id", get(get_tour))
        .nest("/:id/reviews", reviews::handlers::tour_router(state))
        .merge(staff)
}

fn no_tour() -> AppError {
    AppError::not_found("No tour found with that ID")
}

/// Batch-resolves every guide referenced by `tours` in one query.
async fn resolve_guides(
    db: &Database,
    tours: &[Tour],
) -> Result<HashMap<ObjectId, User>, AppError> {
    let ids: Vec<ObjectId> = tours
        .iter()
        .flat_map(|tour| tour.guides.iter().copied())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let guides = users_repo::find_by_ids(db, &ids).await?;
    Ok(guides.into_iter().map(|user| (user.id, user)).collect())
}

/// Guides in the tour's own order; ids that no longer resolve are dropped.
fn guides_for<'a>(tour: &Tour, resolved: &'a HashMap<ObjectId, User>) -> Vec<&'a User> {
    tour.guides.iter().filter_map(|id| resolved.get(id)).collect()
}

async fn tour_listing(state: &AppState, query: ApiQuery) -> Result<Json<Value>, AppError> {
    let tours = repo::list(&state.db, &query).await?;
    let guides = resolve_guides(&state.db, &tours).await?;
    let tours: Vec<TourResponse> = tours
        .iter()
        .map(|tour| TourResponse::new(tour, guides_for(tour, &guides)))
        .collect();
    let results = tours.len();

    let mut tours = serde_json::to_value(&tours).map_err(anyhow::Error::new)?;
    if let Some(projection) = &query.projection {
        select_fields(&mut tours, projection);
    }

    Ok(Json(json!({
        "status": "success",
        "results": results,
        "data": { "tours": tours },
    })))
}

#[instrument(skip(state))]
pub async fn list_tours(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let query = ApiQuery::from_params(&params, FILTERABLE_FIELDS);
    tour_listing(&state, query).await
}

/// Canned listing: the five best-rated tours, cheapest first among equals.
#[instrument(skip(state))]
pub async fn top_tours(
    State(state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    params.insert("limit".to_string(), "5".to_string());
    params.insert("sort".to_string(), "-ratingsAverage,price".to_string());
    let query = ApiQuery::from_params(&params, FILTERABLE_FIELDS);
    tour_listing(&state, query).await
}

#[instrument(skip(state))]
pub async fn get_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    let tour = repo::find_by_id(&state.db, id).await?.ok_or_else(no_tour)?;

    let guides = resolve_guides(&state.db, std::slice::from_ref(&tour)).await?;
    let reviews = reviews::repo::list_by_tour(&state.db, id).await?;
    let reviews = reviews::handlers::to_responses(&state.db, &reviews).await?;

    let mut tour = serde_json::to_value(TourResponse::new(&tour, guides_for(&tour, &guides)))
        .map_err(anyhow::Error::new)?;
    tour["reviews"] = serde_json::to_value(&reviews).map_err(anyhow::Error::new)?;

    Ok(Json(json!({ "status": "success", "data": { "tour": tour } })))
}

#[instrument(skip(state, payload))]
pub async fn create_tour(
    State(state): State<AppState>,
    Json(payload): Json<CreateTourRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let tour = payload.into_tour()?;
    repo::insert(&state.db, &tour).await?;
    info!(tour_id = %tour.id, name = %tour.name, "tour created");

    let guides = resolve_guides(&state.db, std::slice::from_ref(&tour)).await?;
    let response = TourResponse::new(&tour, guides_for(&tour, &guides));
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": { "tour": response } })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTourRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    // Cross-field rules (discount below price) need the stored document.
    let current = repo::find_by_id(&state.db, id).await?.ok_or_else(no_tour)?;

    let fields = payload.into_update(&current)?;
    let tour = if fields.is_empty() {
        current
    } else {
        repo::update(&state.db, id, fields)
            .await?
            .ok_or_else(no_tour)?
    };
    info!(tour_id = %tour.id, "tour updated");

    let guides = resolve_guides(&state.db, std::slice::from_ref(&tour)).await?;
    let response = TourResponse::new(&tour, guides_for(&tour, &guides));
    Ok(Json(json!({ "status": "success", "data": { "tour": response } })))
}

#[instrument(skip(state))]
pub async fn delete_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_object_id(&id)?;
    if !repo::delete(&state.db, id).await? {
        return Err(no_tour());
    }
    info!(tour_id = %id, "tour deleted");
    Ok(StatusCode::NO_CONTENT)
}
