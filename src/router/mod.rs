//! HTTP surface: thin glue from bodies/params to directory and repository
//! calls.

pub mod auth;
pub mod readings;
pub mod status;
pub mod users;

use axum::extract::{FromRequest, Request};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use validator::Validate;

use crate::error::ServerError;

/// JSON body extractor running `validator` checks before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// `{status, message}` envelope without a payload key.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: u16,
    pub message: String,
}

impl MessageResponse {
    pub fn new(status: axum::http::StatusCode, message: &str) -> Self {
        Self {
            status: status.as_u16(),
            message: message.to_owned(),
        }
    }
}

/// Parse an RFC 3339 timestamp parameter before any store access.
pub(crate) fn parse_timestamp(
    value: &str,
) -> Result<DateTime<Utc>, ServerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|_| {
            ServerError::InvalidFormat(format!("invalid timestamp '{value}'"))
        })
}

#[cfg(test)]
pub(crate) async fn state() -> crate::AppState {
    use std::sync::Arc;

    use crate::config::Configuration;
    use crate::crypto::Crypto;
    use crate::database::Database;

    // The driver connects lazily, so building state never needs a live
    // MongoDB; only handlers that reach the store do.
    let db = Database::new("mongodb://localhost:27017", "weathervane_test")
        .await
        .expect("cannot parse test connection string");

    crate::AppState {
        config: Arc::new(Configuration::default()),
        db,
        crypto: Arc::new(Crypto::new(None).expect("cannot build crypto")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        let time = parse_timestamp("2024-05-01T10:30:00Z").unwrap();
        assert_eq!(time.to_rfc3339(), "2024-05-01T10:30:00+00:00");

        let time = parse_timestamp("2024-05-01T10:30:00+10:00").unwrap();
        assert_eq!(time.to_rfc3339(), "2024-05-01T00:30:00+00:00");

        assert!(parse_timestamp("2024-05-01").is_err());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_message_envelope_shape() {
        let body = serde_json::to_value(MessageResponse::new(
            axum::http::StatusCode::OK,
            "Logged out",
        ))
        .unwrap();
        assert_eq!(body["status"], 200);
        assert_eq!(body["message"], "Logged out");
    }
}
