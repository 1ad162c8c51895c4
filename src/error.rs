//! Error handler for weathervane.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    /// Malformed identifier, timestamp, role or body shape. Raised before any
    /// store access.
    #[error("{0}")]
    InvalidFormat(String),

    /// Partial-update keys outside the allow-list.
    #[error("invalid field(s): {}", .0.join(", "))]
    InvalidField(Vec<String>),

    #[error("invalid credentials")]
    Unauthenticated,

    #[error("insufficient role for this operation")]
    Forbidden,

    #[error("the provided email address is already taken")]
    DuplicateEmail,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("no matching readings found")]
    NoData,

    #[error("no users found in that range")]
    NoMatch,

    /// Batch update where some ids matched nothing. Writes that already went
    /// through are kept.
    #[error("readings not found: {}", .0.join(", "))]
    PartialNotFound(Vec<String>),

    #[error("store request failed")]
    Store(#[from] mongodb::error::Error),

    #[error("malformed stored document")]
    Document(#[from] mongodb::bson::document::ValueAccessError),
}

impl ServerError {
    /// HTTP status carried by both the response line and the envelope.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_)
            | ServerError::Axum(_)
            | ServerError::InvalidFormat(_)
            | ServerError::InvalidField(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::DuplicateEmail => StatusCode::CONFLICT,
            ServerError::NotFound(_)
            | ServerError::NoData
            | ServerError::NoMatch
            | ServerError::PartialNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Store(_) | ServerError::Document(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

/// `{status, message}` envelope used for every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Store-layer failures are logged in full but never leak driver text
        // to the caller.
        let message = match &self {
            ServerError::Store(err) => {
                tracing::error!(error = %err, "store request failed");
                "internal server error".to_owned()
            },
            ServerError::Document(err) => {
                tracing::error!(error = %err, "malformed stored document");
                "internal server error".to_owned()
            },
            ServerError::Validation(errors) => validation_message(errors),
            other => other.to_string(),
        };

        let body = ErrorBody {
            status: status.as_u16(),
            message,
        };

        match serde_json::to_string(&body) {
            Ok(body) => Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
                .unwrap_or_else(|_| internal_server_error()),
            Err(_) => internal_server_error(),
        }
    }
}

fn validation_message(errors: &ValidationErrors) -> String {
    let fields: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues
                .iter()
                .map(move |issue| format!("{field}: {issue}"))
        })
        .collect();

    if fields.is_empty() {
        "validation error occurred".to_owned()
    } else {
        fields.join("; ")
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "message": "internal server error",
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("internal server error".into()))
}
