use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::oid::ObjectId;
use mongodb::error::{ErrorKind, WriteFailure};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Application error taxonomy. Every handler and repo function returns
/// `Result<_, AppError>`; the `IntoResponse` impl renders the uniform
/// `{"status": "fail" | "error", "message": ...}` envelope, where `fail`
/// covers 4xx and `error` covers 5xx.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Duplicate field value: {0}. Please use another value!")]
    Duplicate(String),

    #[error("Too many requests from this IP, please try again in an hour!")]
    RateLimited,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::Internal(err) => {
                error!(error = %err, "internal error");
                if cfg!(debug_assertions) {
                    format!("{err:#}")
                } else {
                    "Something went very wrong!".to_string()
                }
            }
            other => other.to_string(),
        };

        let label = if status.is_server_error() { "error" } else { "fail" };
        let body = Json(json!({ "status": label, "message": message }));

        (status, body).into_response()
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        if let Some(field) = duplicate_key_field(&err) {
            return AppError::Duplicate(field);
        }
        AppError::Internal(anyhow::Error::new(err).context("database operation failed"))
    }
}

/// Path ids arrive as strings; a non-hex id is a client error, not a miss.
pub fn parse_object_id(id: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id).map_err(|_| AppError::validation(format!("Invalid ID: {id}")))
}

/// Detects the server's duplicate-key error (code 11000) and pulls a short
/// description out of its message so the client sees which value collided.
fn duplicate_key_field(err: &mongodb::error::Error) -> Option<String> {
    let message = match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000 => &we.message,
        ErrorKind::Command(ce) if ce.code == 11000 => &ce.message,
        _ => return None,
    };

    // Server messages look like: `... dup key: { email: "x@y.z" }`.
    let detail = message
        .split_once("dup key:")
        .map(|(_, rest)| rest.trim().trim_start_matches('{').trim_end_matches('}').trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("value");
    Some(detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            AppError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::unauthorized("no").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::forbidden("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::not_found("gone").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Duplicate("email".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn client_errors_render_fail_envelope() {
        let resp = AppError::not_found("No tour found with that ID").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "No tour found with that ID");
    }

    #[tokio::test]
    async fn server_errors_render_error_envelope() {
        let resp = AppError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
    }
}
