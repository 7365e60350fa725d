mod app;
mod auth;
mod bookings;
mod config;
mod email;
mod error;
mod middleware;
mod payments;
mod query;
mod reviews;
mod state;
mod tours;
mod users;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "wayfare=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = AppState::init().await?;

    // Uniqueness (user email, tour name, one review per user per tour)
    // lives in these indexes.
    if let Err(e) = ensure_indexes(&state).await {
        tracing::warn!(error = %e, "index creation failed; continuing");
    }

    let app = app::build_app(state);
    app::serve(app).await
}

async fn ensure_indexes(state: &AppState) -> Result<(), error::AppError> {
    users::repo::ensure_indexes(&state.db).await?;
    tours::repo::ensure_indexes(&state.db).await?;
    reviews::repo::ensure_indexes(&state.db).await?;
    bookings::repo::ensure_indexes(&state.db).await?;
    Ok(())
}
