//! database (db) union structure.

use axum::extract::FromRef;
use mongodb::bson::Document;
use mongodb::bson::oid::ObjectId;
use mongodb::{Client, Collection};

use crate::AppState;
use crate::error::ServerError;

pub const DEFAULT_DATABASE_NAME: &str = "weathervane";

const USERS_COLLECTION: &str = "users";
const READINGS_COLLECTION: &str = "readings";

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    mongo: mongodb::Database,
}

impl Database {
    /// Init database connection.
    pub async fn new(
        address: &str,
        database: &str,
    ) -> Result<Self, mongodb::error::Error> {
        let client = Client::with_uri_str(address).await?;
        let mongo = client.database(database);

        tracing::info!(%database, "mongodb client initialized");

        Ok(Self { mongo })
    }

    /// User records collection.
    pub fn users(&self) -> Collection<Document> {
        self.mongo.collection(USERS_COLLECTION)
    }

    /// Reading records collection.
    pub fn readings(&self) -> Collection<Document> {
        self.mongo.collection(READINGS_COLLECTION)
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}

/// Identifiers exchanged over the boundary are 24-character hexadecimal
/// strings. Anything else is rejected before the store is touched.
pub fn parse_object_id(id: &str) -> Result<ObjectId, ServerError> {
    ObjectId::parse_str(id).map_err(|_| {
        ServerError::InvalidFormat(format!("invalid identifier '{id}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_id_accepts_24_hex() {
        assert!(parse_object_id("6592008029c8c3e4dc76256c").is_ok());
    }

    #[test]
    fn test_parse_object_id_rejects_bad_shapes() {
        for id in [
            "",
            "6592008029c8c3e4dc76256",    // 23 chars.
            "6592008029c8c3e4dc76256cc",  // 25 chars.
            "6592008029c8c3e4dc76256g",   // non-hex.
            "not-an-id",
        ] {
            let err = parse_object_id(id).unwrap_err();
            assert!(matches!(err, ServerError::InvalidFormat(_)), "{id}");
        }
    }
}
