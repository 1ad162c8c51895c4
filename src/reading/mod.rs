mod repository;

pub use repository::*;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServerError;

/// Field names a partial update is permitted to touch. `_id` and `time` are
/// deliberately outside this set.
pub const UPDATABLE_FIELDS: [&str; 11] = [
    "device_name",
    "latitude",
    "longitude",
    "precipitation_mm_per_h",
    "temperature_deg_celsius",
    "atmospheric_pressure_kPa",
    "max_wind_speed_m_per_s",
    "solar_radiation_W_per_m2",
    "vapor_pressure_kPa",
    "humidity",
    "wind_direction_deg",
];

/// One timestamped multi-sensor weather observation from a device.
///
/// Measurements are optional; a station may lack a sensor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(
        rename = "_id",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub id: Option<String>,
    pub device_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub precipitation_mm_per_h: Option<f64>,
    #[serde(default)]
    pub temperature_deg_celsius: Option<f64>,
    #[serde(rename = "atmospheric_pressure_kPa", default)]
    pub atmospheric_pressure_kpa: Option<f64>,
    #[serde(default)]
    pub max_wind_speed_m_per_s: Option<f64>,
    #[serde(rename = "solar_radiation_W_per_m2", default)]
    pub solar_radiation_w_per_m2: Option<f64>,
    #[serde(rename = "vapor_pressure_kPa", default)]
    pub vapor_pressure_kpa: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub wind_direction_deg: Option<f64>,
}

impl Reading {
    /// Store representation. Absent measurements stay absent; the identity is
    /// assigned by the store.
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "device_name": &self.device_name };
        if let Some(time) = self.time {
            doc.insert("time", BsonDateTime::from_chrono(time));
        }

        let numbers = [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("precipitation_mm_per_h", self.precipitation_mm_per_h),
            ("temperature_deg_celsius", self.temperature_deg_celsius),
            ("atmospheric_pressure_kPa", self.atmospheric_pressure_kpa),
            ("max_wind_speed_m_per_s", self.max_wind_speed_m_per_s),
            ("solar_radiation_W_per_m2", self.solar_radiation_w_per_m2),
            ("vapor_pressure_kPa", self.vapor_pressure_kpa),
            ("humidity", self.humidity),
            ("wind_direction_deg", self.wind_direction_deg),
        ];
        for (key, value) in numbers {
            if let Some(value) = value {
                doc.insert(key, value);
            }
        }

        doc
    }

    pub fn from_document(doc: Document) -> Result<Self, ServerError> {
        Ok(Self {
            id: Some(doc.get_object_id("_id")?.to_hex()),
            device_name: doc.get_str("device_name")?.to_owned(),
            time: doc.get_datetime("time").ok().map(|time| time.to_chrono()),
            latitude: number(&doc, "latitude"),
            longitude: number(&doc, "longitude"),
            precipitation_mm_per_h: number(&doc, "precipitation_mm_per_h"),
            temperature_deg_celsius: number(&doc, "temperature_deg_celsius"),
            atmospheric_pressure_kpa: number(&doc, "atmospheric_pressure_kPa"),
            max_wind_speed_m_per_s: number(&doc, "max_wind_speed_m_per_s"),
            solar_radiation_w_per_m2: number(&doc, "solar_radiation_W_per_m2"),
            vapor_pressure_kpa: number(&doc, "vapor_pressure_kPa"),
            humidity: number(&doc, "humidity"),
            wind_direction_deg: number(&doc, "wind_direction_deg"),
        })
    }
}

/// Numeric field access tolerant to integer-typed historical documents.
pub(crate) fn number(doc: &Document, key: &str) -> Option<f64> {
    match doc.get(key) {
        Some(Bson::Double(value)) => Some(*value),
        Some(Bson::Int32(value)) => Some(f64::from(*value)),
        Some(Bson::Int64(value)) => Some(*value as f64),
        _ => None,
    }
}

/// One entry of a batch update, independently targeted by identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadingUpdate {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Per-item outcome of an update, reported in input order so partial success
/// cannot be mistaken for full success.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub id: String,
    pub matched: bool,
    pub modified: u64,
}

/// Check a partial-update field map against the allow-list and convert it
/// into a `$set` payload. Runs before any store access; a rejected map must
/// leave the store untouched.
pub fn update_document(
    fields: &Map<String, Value>,
) -> Result<Document, ServerError> {
    if fields.is_empty() {
        return Err(ServerError::InvalidFormat(
            "no fields to update".into(),
        ));
    }

    let unknown: Vec<String> = fields
        .keys()
        .filter(|key| !UPDATABLE_FIELDS.contains(&key.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ServerError::InvalidField(unknown));
    }

    let mut set = Document::new();
    for (key, value) in fields {
        let bson = match (key.as_str(), value) {
            ("device_name", Value::String(name)) => Bson::String(name.clone()),
            ("device_name", _) => {
                return Err(ServerError::InvalidFormat(
                    "'device_name' must be a string".into(),
                ));
            },
            (_, Value::Number(value)) => match value.as_f64() {
                Some(value) => Bson::Double(value),
                None => {
                    return Err(ServerError::InvalidFormat(format!(
                        "'{key}' is out of range"
                    )));
                },
            },
            (key, _) => {
                return Err(ServerError::InvalidFormat(format!(
                    "'{key}' must be a number"
                )));
            },
        };
        set.insert(key.as_str(), bson);
    }
    Ok(set)
}

/// Max precipitation over the trailing window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaxPrecipitation {
    pub device_name: String,
    pub max_precipitation_mm_per_h: f64,
    /// Time of the last record in natural result order, not necessarily of
    /// the maximum itself.
    pub time: DateTime<Utc>,
}

/// Per-device max temperature over a date range.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaxTemperature {
    pub device_name: String,
    pub max_temperature_deg_celsius: f64,
    /// Time of the first record in the group, not necessarily of the maximum
    /// itself.
    pub time: DateTime<Utc>,
}
