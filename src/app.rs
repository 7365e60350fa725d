use std::net::SocketAddr;

use axum::{extract::DefaultBodyLimit, http::Uri, middleware, routing::get, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::error::AppError;
use crate::middleware::{rate_limit, security_headers};
use crate::state::AppState;
use crate::{auth, bookings, reviews, tours, users};

/// Bodies larger than this are rejected before any handler runs.
const BODY_LIMIT_BYTES: usize = 10 * 1024;

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .nest("/tours", tours::router(state.clone()))
        .nest(
            "/users",
            auth::router(state.clone()).merge(users::router(state.clone())),
        )
        .nest("/reviews", reviews::router(state.clone()))
        .nest("/bookings", bookings::router(state.clone()))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .nest("/api/v1", api)
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(security_headers))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("Can't find {uri} on this server!"))
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Connect info feeds the per-IP rate limiter when no proxy header is set.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
