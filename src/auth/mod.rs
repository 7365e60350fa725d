use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod token;

pub fn router(state: AppState) -> Router<AppState> {
    handlers::router(state)
}
