//! Handle database requests for reading records.

use chrono::{DateTime, Months, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime};
use serde_json::{Map, Value};

use crate::database::{parse_object_id, Database};
use crate::error::{Result, ServerError};
use crate::reading::{
    number, update_document, MaxPrecipitation, MaxTemperature, Reading,
    ReadingUpdate, UpdateOutcome,
};

/// Trailing window of the precipitation analysis, in calendar months.
const PRECIPITATION_WINDOW_MONTHS: u32 = 5;

/// Upper bound on the page size. Also keeps the `skip`/`limit` arithmetic
/// in range; both parameters arrive unauthenticated.
pub const MAX_PAGE_SIZE: u64 = 500;

/// Zero-indexed page offset. Page 0 starts at record 0; `(page + 1) * size`
/// would silently drop the first page.
pub fn page_offset(page: u64, size: u64) -> Result<u64> {
    page.checked_mul(size)
        .ok_or_else(|| ServerError::InvalidFormat("page out of range".into()))
}

#[derive(Clone)]
pub struct ReadingRepository {
    db: Database,
}

impl ReadingRepository {
    /// Create a new [`ReadingRepository`].
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a single reading. Client-supplied identity is stripped and
    /// `time` defaults to the server clock.
    pub async fn create(&self, mut reading: Reading) -> Result<Reading> {
        reading.id = None;
        reading.time.get_or_insert_with(Utc::now);

        let result =
            self.db.readings().insert_one(reading.to_document()).await?;
        reading.id = result.inserted_id.as_object_id().map(|id| id.to_hex());
        Ok(reading)
    }

    /// Insert a batch with the same per-item semantics as [`create`], as one
    /// bulk call. Partial failure is not decomposed; a store error fails the
    /// whole batch.
    ///
    /// [`create`]: ReadingRepository::create
    pub async fn create_many(
        &self,
        mut readings: Vec<Reading>,
    ) -> Result<Vec<Reading>> {
        for reading in &mut readings {
            reading.id = None;
            reading.time.get_or_insert_with(Utc::now);
        }

        let documents: Vec<_> =
            readings.iter().map(Reading::to_document).collect();
        let result = self.db.readings().insert_many(documents).await?;

        for (index, reading) in readings.iter_mut().enumerate() {
            reading.id = result
                .inserted_ids
                .get(&index)
                .and_then(Bson::as_object_id)
                .map(|id| id.to_hex());
        }
        Ok(readings)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Reading> {
        let oid = parse_object_id(id)?;
        let doc = self
            .db
            .readings()
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or(ServerError::NotFound("reading"))?;

        Reading::from_document(doc)
    }

    /// All reading records in store-native order.
    pub async fn get_all(&self) -> Result<Vec<Reading>> {
        let cursor = self.db.readings().find(doc! {}).await?;
        collect(cursor).await
    }

    /// One zero-indexed page in store-native order. Out-of-range pages come
    /// back empty, not as an error. The size is bounded before any store
    /// access.
    pub async fn get_by_page(
        &self,
        page: u64,
        size: u64,
    ) -> Result<Vec<Reading>> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(ServerError::InvalidFormat(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let cursor = self
            .db
            .readings()
            .find(doc! {})
            .skip(page_offset(page, size)?)
            .limit(size as i64)
            .await?;
        collect(cursor).await
    }

    /// Field-level partial update restricted to the allow-list. Validation
    /// happens before the store call.
    pub async fn update_by_id(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<UpdateOutcome> {
        let oid = parse_object_id(id)?;
        let set = update_document(fields)?;

        let result = self
            .db
            .readings()
            .update_one(doc! { "_id": oid }, doc! { "$set": set })
            .await?;
        if result.matched_count == 0 {
            return Err(ServerError::NotFound("reading"));
        }
        Ok(UpdateOutcome {
            id: id.to_owned(),
            matched: true,
            modified: result.modified_count,
        })
    }

    /// Batch partial update. Every entry is validated before the first store
    /// write; the writes then run sequentially in input order and are not
    /// rolled back when a later entry fails to match (at-least-once,
    /// non-transactional).
    pub async fn update_many(
        &self,
        updates: &[ReadingUpdate],
    ) -> Result<Vec<UpdateOutcome>> {
        let mut prepared = Vec::with_capacity(updates.len());
        for update in updates {
            prepared.push((
                update.id.as_str(),
                parse_object_id(&update.id)?,
                update_document(&update.fields)?,
            ));
        }

        let mut outcomes = Vec::with_capacity(prepared.len());
        let mut failed = Vec::new();
        for (id, oid, set) in prepared {
            let result = self
                .db
                .readings()
                .update_one(doc! { "_id": oid }, doc! { "$set": set })
                .await?;
            if result.matched_count == 0 {
                failed.push(id.to_owned());
            }
            outcomes.push(UpdateOutcome {
                id: id.to_owned(),
                matched: result.matched_count > 0,
                modified: result.modified_count,
            });
        }

        if !failed.is_empty() {
            return Err(ServerError::PartialNotFound(failed));
        }
        Ok(outcomes)
    }

    /// Single-field convenience update for precipitation.
    pub async fn update_precipitation(
        &self,
        id: &str,
        value: f64,
    ) -> Result<UpdateOutcome> {
        let oid = parse_object_id(id)?;

        let result = self
            .db
            .readings()
            .update_one(
                doc! { "_id": oid },
                doc! { "$set": { "precipitation_mm_per_h": value } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(ServerError::NotFound("reading"));
        }
        Ok(UpdateOutcome {
            id: id.to_owned(),
            matched: true,
            modified: result.modified_count,
        })
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        let oid = parse_object_id(id)?;

        let result = self.db.readings().delete_one(doc! { "_id": oid }).await?;
        if result.deleted_count == 0 {
            return Err(ServerError::NotFound("reading"));
        }
        Ok(())
    }

    /// Delete a set of readings by id. Fails when nothing matched at all.
    pub async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let mut oids = Vec::with_capacity(ids.len());
        for id in ids {
            oids.push(Bson::ObjectId(parse_object_id(id)?));
        }
        if oids.is_empty() {
            return Err(ServerError::InvalidFormat(
                "no identifiers to delete".into(),
            ));
        }

        let result = self
            .db
            .readings()
            .delete_many(doc! { "_id": { "$in": oids } })
            .await?;
        if result.deleted_count == 0 {
            return Err(ServerError::NotFound("reading"));
        }
        Ok(result.deleted_count)
    }

    /// Maximum precipitation for a device over the trailing five calendar
    /// months. The reported `time` is the last record in natural order, not
    /// the time of the maximum.
    pub async fn find_max_precipitation_recent(
        &self,
        device_name: &str,
    ) -> Result<MaxPrecipitation> {
        let cutoff = Utc::now()
            .checked_sub_months(Months::new(PRECIPITATION_WINDOW_MONTHS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let pipeline = [
            doc! { "$match": {
                "device_name": device_name,
                "time": { "$gte": BsonDateTime::from_chrono(cutoff) },
            } },
            doc! { "$group": {
                "_id": "$device_name",
                "max_precipitation": { "$max": "$precipitation_mm_per_h" },
                "time": { "$last": "$time" },
            } },
        ];

        let mut cursor = self.db.readings().aggregate(pipeline).await?;
        let Some(doc) = cursor.try_next().await? else {
            return Err(ServerError::NoData);
        };

        Ok(MaxPrecipitation {
            device_name: device_name.to_owned(),
            max_precipitation_mm_per_h: number(&doc, "max_precipitation")
                .ok_or(ServerError::NoData)?,
            time: doc.get_datetime("time")?.to_chrono(),
        })
    }

    /// All measurement fields of the first record matching device and exact
    /// timestamp. No tolerance window.
    pub async fn find_at_timestamp(
        &self,
        device_name: &str,
        time: DateTime<Utc>,
    ) -> Result<Reading> {
        let doc = self
            .db
            .readings()
            .find_one(doc! {
                "device_name": device_name,
                "time": BsonDateTime::from_chrono(time),
            })
            .await?
            .ok_or(ServerError::NoData)?;

        Reading::from_document(doc)
    }

    /// Per-device maximum temperature over `[start, end]`, sorted descending
    /// by the maximum. The reported `time` is the first record encountered in
    /// each group, not the time of the maximum.
    pub async fn find_max_temperature_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MaxTemperature>> {
        let pipeline = [
            doc! { "$match": {
                "time": {
                    "$gte": BsonDateTime::from_chrono(start),
                    "$lte": BsonDateTime::from_chrono(end),
                },
            } },
            doc! { "$group": {
                "_id": "$device_name",
                "max_temperature": { "$max": "$temperature_deg_celsius" },
                "time": { "$first": "$time" },
            } },
            doc! { "$sort": { "max_temperature": -1 } },
        ];

        let mut cursor = self.db.readings().aggregate(pipeline).await?;
        let mut results = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            let Some(max_temperature) = number(&doc, "max_temperature") else {
                continue;
            };
            results.push(MaxTemperature {
                device_name: doc.get_str("_id")?.to_owned(),
                max_temperature_deg_celsius: max_temperature,
                time: doc.get_datetime("time")?.to_chrono(),
            });
        }

        if results.is_empty() {
            return Err(ServerError::NoData);
        }
        Ok(results)
    }
}

async fn collect(
    mut cursor: mongodb::Cursor<mongodb::bson::Document>,
) -> Result<Vec<Reading>> {
    let mut readings = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        readings.push(Reading::from_document(doc)?);
    }
    Ok(readings)
}
