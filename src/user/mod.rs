mod directory;

pub use directory::*;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Access tier attached to every account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    #[default]
    Student,
    /// Ad-hoc grant for ingest-only station devices.
    Sensor,
}

impl Role {
    /// Case-insensitive parse at the boundary; the store only ever sees the
    /// canonical lower-case form.
    pub fn parse(value: &str) -> Result<Self, ServerError> {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            "sensor" => Ok(Role::Sensor),
            other => Err(ServerError::InvalidFormat(format!(
                "unknown role '{other}'"
            ))),
        }
    }

    /// Roles an admin may hand out through the range-based role change.
    /// `sensor` is granted out of band, never assigned in bulk.
    pub fn assignable(self) -> bool {
        !matches!(self, Role::Sensor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Sensor => "sensor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Role::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// User as saved on database.
///
/// `password` and `authenticationKey` never leave through response JSON;
/// login hands the key back through a dedicated envelope field.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub authentication_key: Option<String>,
    pub registration_date: DateTime<Utc>,
    pub last_session: Option<DateTime<Utc>>,
}

impl User {
    /// Store representation. The identity is intentionally left out; the
    /// store assigns it on insert and filters carry it on update.
    pub fn to_document(&self) -> Document {
        doc! {
            "email": &self.email,
            "password": &self.password,
            "firstName": &self.first_name,
            "lastName": &self.last_name,
            "role": self.role.as_str(),
            "authenticationKey": self
                .authentication_key
                .as_ref()
                .map(|key| Bson::String(key.clone()))
                .unwrap_or(Bson::Null),
            "registrationDate": BsonDateTime::from_chrono(self.registration_date),
            "lastSession": self
                .last_session
                .map(|time| Bson::DateTime(BsonDateTime::from_chrono(time)))
                .unwrap_or(Bson::Null),
        }
    }

    pub fn from_document(doc: Document) -> Result<Self, ServerError> {
        Ok(Self {
            id: Some(doc.get_object_id("_id")?.to_hex()),
            email: doc.get_str("email")?.to_owned(),
            password: doc.get_str("password")?.to_owned(),
            first_name: doc.get_str("firstName")?.to_owned(),
            last_name: doc.get_str("lastName")?.to_owned(),
            role: Role::parse(doc.get_str("role")?)?,
            authentication_key: doc
                .get_str("authenticationKey")
                .ok()
                .map(ToOwned::to_owned),
            registration_date: doc.get_datetime("registrationDate")?.to_chrono(),
            last_session: doc
                .get_datetime("lastSession")
                .ok()
                .map(|time| time.to_chrono()),
        })
    }
}
