use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    routing::get,
    Json, Router,
};
use mongodb::bson::oid::ObjectId;
use mongodb::Database;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

use crate::{
    auth::extractors::{protect, restrict_to, CurrentUser},
    bookings::dto::{BookingResponse, CreateBookingRequest, UpdateBookingRequest},
    bookings::model::Booking,
    bookings::repo,
    error::{parse_object_id, AppError},
    payments::CheckoutRequest,
    query::ApiQuery,
    state::AppState,
    tours::model::Tour,
    tours::repo as tours_repo,
    users::model::{Role, User},
    users::repo as users_repo,
};

const FILTERABLE_FIELDS: &[&str] = &["paid", "price"];
const STAFF_ONLY: &[Role] = &[Role::Admin, Role::LeadGuide];

/// Booking routes. Checkout and the my-bookings view need a session; the
/// CRUD block additionally needs the admin or lead-guide role.
pub fn router(state: AppState) -> Router<AppState> {
    let staff = Router::new()
        .route("/", get(list_bookings).post(create_booking))
        .route(
            "/:id",
            get(get_booking).patch(update_booking).delete(delete_booking),
        )
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, STAFF_ONLY)
        }));

    Router::new()
        .route("/checkout-session/:tourId", get(checkout_session))
        .route("/me", get(my_bookings))
        .merge(staff)
        .route_layer(middleware::from_fn_with_state(state, protect))
}

fn no_booking() -> AppError {
    AppError::not_found("No booking found with that ID")
}

fn no_tour() -> AppError {
    AppError::not_found("No tour found with that ID")
}

fn request_origin(state: &AppState, headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = if state.config.is_production() {
        "https"
    } else {
        "http"
    };
    format!("{proto}://{host}")
}

/// Resolves tour and user summaries for a batch of bookings in two queries.
async fn to_responses(
    db: &Database,
    bookings: &[Booking],
) -> Result<Vec<BookingResponse>, AppError> {
    let tour_ids: Vec<ObjectId> = bookings
        .iter()
        .map(|booking| booking.tour)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let user_ids: Vec<ObjectId> = bookings
        .iter()
        .map(|booking| booking.user)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let tours: HashMap<ObjectId, Tour> = tours_repo::find_by_ids(db, &tour_ids)
        .await?
        .into_iter()
        .map(|tour| (tour.id, tour))
        .collect();
    let users: HashMap<ObjectId, User> = users_repo::find_by_ids(db, &user_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    Ok(bookings
        .iter()
        .map(|booking| {
            BookingResponse::new(booking, tours.get(&booking.tour), users.get(&booking.user))
        })
        .collect())
}

async fn booking_response(db: &Database, booking: &Booking) -> Result<BookingResponse, AppError> {
    let tour = tours_repo::find_by_id(db, booking.tour).await?;
    let user = users_repo::find_by_id(db, booking.user).await?;
    Ok(BookingResponse::new(booking, tour.as_ref(), user.as_ref()))
}

/// Starts a checkout for the given tour on behalf of the session user and
/// hands the provider session back for client-side redirect.
#[instrument(skip(state, headers, current))]
pub async fn checkout_session(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    headers: HeaderMap,
    CurrentUser(current): CurrentUser,
) -> Result<Json<Value>, AppError> {
    let tour_id = parse_object_id(&tour_id)?;
    let tour = tours_repo::find_by_id(&state.db, tour_id)
        .await?
        .ok_or_else(no_tour)?;

    let origin = request_origin(&state, &headers);
    let request = CheckoutRequest {
        tour_id: tour.id.to_hex(),
        tour_name: format!("{} Tour", tour.name),
        tour_summary: tour.summary.clone(),
        amount_cents: (tour.price * 100.0).round() as i64,
        currency: "usd".to_string(),
        customer_email: current.email.clone(),
        success_url: format!(
            "{origin}/?tour={}&user={}&price={}",
            tour.id.to_hex(),
            current.id.to_hex(),
            tour.price
        ),
        cancel_url: format!("{origin}/tour/{}", tour.slug),
    };

    let session = state.payments.create_checkout_session(request).await?;
    info!(
        tour_id = %tour_id,
        user_id = %current.id,
        session_id = %session.id,
        "checkout session created"
    );
    Ok(Json(json!({ "status": "success", "session": session })))
}

#[instrument(skip(state, current))]
pub async fn my_bookings(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
) -> Result<Json<Value>, AppError> {
    let bookings = repo::list_by_user(&state.db, current.id).await?;
    let bookings = to_responses(&state.db, &bookings).await?;

    Ok(Json(json!({
        "status": "success",
        "results": bookings.len(),
        "data": { "bookings": bookings },
    })))
}

#[instrument(skip(state))]
pub async fn list_bookings(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let query = ApiQuery::from_params(&params, FILTERABLE_FIELDS);
    let bookings = repo::list(&state.db, &query).await?;
    let bookings = to_responses(&state.db, &bookings).await?;

    Ok(Json(json!({
        "status": "success",
        "results": bookings.len(),
        "data": { "bookings": bookings },
    })))
}

#[instrument(skip(state))]
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    let booking = repo::find_by_id(&state.db, id).await?.ok_or_else(no_booking)?;

    let response = booking_response(&state.db, &booking).await?;
    Ok(Json(
        json!({ "status": "success", "data": { "booking": response } }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let tour_id = match payload.tour.as_deref() {
        Some(raw) => parse_object_id(raw)?,
        None => return Err(AppError::validation("Booking must belong to a Tour!")),
    };
    let user_id = match payload.user.as_deref() {
        Some(raw) => parse_object_id(raw)?,
        None => return Err(AppError::validation("Booking must belong to a User!")),
    };
    let price = payload
        .price
        .ok_or_else(|| AppError::validation("Booking must have a price."))?;

    // Both references must resolve before the booking is written.
    if tours_repo::find_by_id(&state.db, tour_id).await?.is_none() {
        return Err(no_tour());
    }
    if users_repo::find_by_id(&state.db, user_id).await?.is_none() {
        return Err(AppError::not_found("No user found with that ID"));
    }

    let mut booking = Booking::new(tour_id, user_id, price)?;
    if let Some(paid) = payload.paid {
        booking.paid = paid;
    }
    repo::insert(&state.db, &booking).await?;
    info!(booking_id = %booking.id, tour_id = %tour_id, user_id = %user_id, "booking created");

    let response = booking_response(&state.db, &booking).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": { "booking": response } })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_object_id(&id)?;
    let fields = payload.into_update()?;

    let booking = if fields.is_empty() {
        repo::find_by_id(&state.db, id).await?
    } else {
        repo::update(&state.db, id, fields).await?
    }
    .ok_or_else(no_booking)?;
    info!(booking_id = %booking.id, "booking updated");

    let response = booking_response(&state.db, &booking).await?;
    Ok(Json(
        json!({ "status": "success", "data": { "booking": response } }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_object_id(&id)?;
    if !repo::delete(&state.db, id).await? {
        return Err(no_booking());
    }
    info!(booking_id = %id, "booking deleted");
    Ok(StatusCode::NO_CONTENT)
}
