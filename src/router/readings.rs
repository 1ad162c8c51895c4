//! Readings-related HTTP API: ingestion, paging, updates and the analytical
//! queries.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ServerError};
use crate::gate::require_role;
use crate::reading::{
    MaxPrecipitation, MaxTemperature, Reading, ReadingRepository,
    ReadingUpdate, UpdateOutcome,
};
use crate::router::parse_timestamp;
use crate::user::Role;
use crate::AppState;

const DEFAULT_PAGE_SIZE: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub status: u16,
    pub message: String,
    pub readings: Vec<Reading>,
}

/// Paged listing in store-native order. Page arithmetic and size bounds are
/// enforced by the repository before any store access.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ReadingsResponse>> {
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);

    let readings = ReadingRepository::new(state.db.clone())
        .get_by_page(page, size)
        .await?;

    Ok(Json(ReadingsResponse {
        status: StatusCode::OK.as_u16(),
        message: format!("Readings page {page}"),
        readings,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReadingResponse {
    pub status: u16,
    pub message: String,
    pub reading: Reading,
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReadingResponse>> {
    let reading =
        ReadingRepository::new(state.db.clone()).get_by_id(&id).await?;

    Ok(Json(ReadingResponse {
        status: StatusCode::OK.as_u16(),
        message: "Reading found".to_owned(),
        reading,
    }))
}

/// Single-reading ingestion, open to teachers and station devices.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(reading): Json<Reading>,
) -> Result<(StatusCode, Json<ReadingResponse>)> {
    require_role(&state, &headers, &[Role::Teacher, Role::Sensor]).await?;

    if reading.device_name.is_empty() {
        return Err(ServerError::InvalidFormat(
            "'device_name' must not be empty".into(),
        ));
    }

    let created =
        ReadingRepository::new(state.db.clone()).create(reading).await?;

    Ok((
        StatusCode::CREATED,
        Json(ReadingResponse {
            status: StatusCode::CREATED.as_u16(),
            message: "Reading created".to_owned(),
            reading: created,
        }),
    ))
}

/// Batch ingestion: one bulk insert, same per-item semantics as `create`.
pub async fn create_many(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(readings): Json<Vec<Reading>>,
) -> Result<(StatusCode, Json<ReadingsResponse>)> {
    require_role(&state, &headers, &[Role::Teacher, Role::Sensor]).await?;

    if readings.is_empty() {
        return Err(ServerError::InvalidFormat(
            "empty reading batch".into(),
        ));
    }
    if readings.iter().any(|reading| reading.device_name.is_empty()) {
        return Err(ServerError::InvalidFormat(
            "'device_name' must not be empty".into(),
        ));
    }

    let created = ReadingRepository::new(state.db.clone())
        .create_many(readings)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReadingsResponse {
            status: StatusCode::CREATED.as_u16(),
            message: format!("{} reading(s) created", created.len()),
            readings: created,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub status: u16,
    pub message: String,
    pub update_result: UpdateOutcome,
}

/// Field-level partial update against the allow-list.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<UpdateResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    let outcome = ReadingRepository::new(state.db.clone())
        .update_by_id(&id, &fields)
        .await?;

    Ok(Json(UpdateResponse {
        status: StatusCode::OK.as_u16(),
        message: "Reading updated".to_owned(),
        update_result: outcome,
    }))
}

#[derive(Debug, Serialize)]
pub struct UpdateManyResponse {
    pub status: u16,
    pub message: String,
    pub results: Vec<UpdateOutcome>,
}

/// Batch partial update; per-item results come back in input order.
pub async fn update_many(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(updates): Json<Vec<ReadingUpdate>>,
) -> Result<Json<UpdateManyResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    if updates.is_empty() {
        return Err(ServerError::InvalidFormat("empty update batch".into()));
    }

    let results = ReadingRepository::new(state.db.clone())
        .update_many(&updates)
        .await?;

    Ok(Json(UpdateManyResponse {
        status: StatusCode::OK.as_u16(),
        message: format!("{} reading(s) updated", results.len()),
        results,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrecipitationBody {
    pub precipitation_mm_per_h: f64,
}

/// Single-field convenience update.
pub async fn update_precipitation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PrecipitationBody>,
) -> Result<Json<UpdateResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    let outcome = ReadingRepository::new(state.db.clone())
        .update_precipitation(&id, body.precipitation_mm_per_h)
        .await?;

    Ok(Json(UpdateResponse {
        status: StatusCode::OK.as_u16(),
        message: "Precipitation updated".to_owned(),
        update_result: outcome,
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<crate::router::MessageResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    ReadingRepository::new(state.db.clone()).delete_by_id(&id).await?;

    Ok(Json(crate::router::MessageResponse::new(
        StatusCode::OK,
        "Reading deleted",
    )))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteManyBody {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteManyResponse {
    pub status: u16,
    pub message: String,
    /// Number of readings removed.
    pub result: u64,
}

pub async fn delete_many(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DeleteManyBody>,
) -> Result<Json<DeleteManyResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    let deleted = ReadingRepository::new(state.db.clone())
        .delete_many(&body.ids)
        .await?;

    Ok(Json(DeleteManyResponse {
        status: StatusCode::OK.as_u16(),
        message: format!("{deleted} reading(s) deleted"),
        result: deleted,
    }))
}

#[derive(Debug, Serialize)]
pub struct MaxPrecipitationResponse {
    pub status: u16,
    pub message: String,
    pub result: MaxPrecipitation,
}

/// Maximum precipitation for a device over the trailing five months.
pub async fn max_precipitation(
    State(state): State<AppState>,
    Path(device_name): Path<String>,
) -> Result<Json<MaxPrecipitationResponse>> {
    let result = ReadingRepository::new(state.db.clone())
        .find_max_precipitation_recent(&device_name)
        .await?;

    Ok(Json(MaxPrecipitationResponse {
        status: StatusCode::OK.as_u16(),
        message: format!("Max precipitation for {device_name}"),
        result,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AtTimestampQuery {
    pub device_name: String,
    pub time: String,
}

/// Point-in-time multi-sensor readout, exact timestamp match.
pub async fn at_timestamp(
    State(state): State<AppState>,
    Query(query): Query<AtTimestampQuery>,
) -> Result<Json<ReadingResponse>> {
    let time = parse_timestamp(&query.time)?;

    let reading = ReadingRepository::new(state.db.clone())
        .find_at_timestamp(&query.device_name, time)
        .await?;

    Ok(Json(ReadingResponse {
        status: StatusCode::OK.as_u16(),
        message: "Reading found".to_owned(),
        reading,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct MaxTemperatureResponse {
    pub status: u16,
    pub message: String,
    pub results: Vec<MaxTemperature>,
}

/// Per-device maximum temperature over a date range, hottest first.
pub async fn max_temperature(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<MaxTemperatureResponse>> {
    let start = parse_timestamp(&query.start)?;
    let end = parse_timestamp(&query.end)?;

    let results = ReadingRepository::new(state.db.clone())
        .find_max_temperature_in_range(start, end)
        .await?;

    Ok(Json(MaxTemperatureResponse {
        status: StatusCode::OK.as_u16(),
        message: format!("{} device(s) in range", results.len()),
        results,
    }))
}
