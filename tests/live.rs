//! End-to-end tests against a real MongoDB instance.
//!
//! Run with `cargo test -- --ignored` and a `MONGODB_URI` environment
//! variable (defaults to a local instance). Each test works in its own
//! throwaway database, dropped on success.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::{DateTime, Duration, Months, Utc};
use http_body_util::BodyExt;
use mongodb::bson::oid::ObjectId;
use serde_json::{json, Map, Value};
use tower::util::ServiceExt;

use weathervane::config::Configuration;
use weathervane::crypto::Crypto;
use weathervane::database::Database;
use weathervane::error::ServerError;
use weathervane::reading::{Reading, ReadingRepository, ReadingUpdate};
use weathervane::user::{Role, User, UserDirectory};
use weathervane::{app, AppState};

const DEFAULT_URI: &str = "mongodb://localhost:27017";

fn mongo_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| DEFAULT_URI.to_owned())
}

struct TestContext {
    state: AppState,
    database_name: String,
}

impl TestContext {
    async fn new() -> Self {
        let database_name = format!("weathervane_test_{}", ObjectId::new());
        let db = Database::new(&mongo_uri(), &database_name)
            .await
            .expect("cannot initialize database");

        TestContext {
            state: AppState {
                config: Arc::new(Configuration::default()),
                db,
                crypto: Arc::new(
                    Crypto::new(Some(weathervane::config::Argon2 {
                        memory_cost: 1024,
                        iterations: 1,
                        parallelism: 1,
                        hash_length: 32,
                    }))
                    .expect("cannot build crypto"),
                ),
            },
            database_name,
        }
    }

    fn users(&self) -> UserDirectory {
        UserDirectory::new(self.state.db.clone())
    }

    fn readings(&self) -> ReadingRepository {
        ReadingRepository::new(self.state.db.clone())
    }

    async fn seed_user(&self, email: &str, role: Role) -> (User, String) {
        let key = Crypto::generate_key();
        let user = User {
            id: None,
            email: email.to_owned(),
            password: self
                .state
                .crypto
                .pwd
                .hash_password("longenoughpassword")
                .unwrap(),
            first_name: "Test".to_owned(),
            last_name: "User".to_owned(),
            role,
            authentication_key: Some(key.clone()),
            registration_date: Utc::now(),
            last_session: Some(Utc::now()),
        };
        (self.users().create(&user).await.unwrap(), key)
    }

    async fn teardown(self) {
        mongodb::Client::with_uri_str(mongo_uri())
            .await
            .expect("cannot connect")
            .database(&self.database_name)
            .drop()
            .await
            .expect("cannot drop test database");
    }
}

/// BSON datetimes carry millisecond precision; truncate fixture times so
/// stored values compare equal to computed ones.
fn millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap()
}

fn reading(device_name: &str) -> Reading {
    Reading {
        device_name: device_name.to_owned(),
        latitude: Some(-27.47),
        longitude: Some(153.03),
        precipitation_mm_per_h: Some(0.0),
        temperature_deg_celsius: Some(20.0),
        humidity: Some(0.5),
        ..Default::default()
    }
}

async fn request(
    state: &AppState,
    method: Method,
    path: &str,
    key: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-auth-key", key);
    }

    let response = app(state.clone())
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_register_hashes_password_and_rejects_duplicates() {
    let ctx = TestContext::new().await;

    let (status, body) = request(
        &ctx.state,
        Method::POST,
        "/api/register",
        None,
        json!({
            "email": "ada@example.org",
            "password": "longenoughpassword",
            "firstName": "Ada",
            "lastName": "Lovelace",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "student");
    assert!(body["user"]["password"].is_null());

    let stored = ctx
        .users()
        .get_by_email("ada@example.org")
        .await
        .unwrap()
        .expect("user must exist");
    assert!(stored.password.starts_with("$argon2"));
    assert_ne!(stored.password, "longenoughpassword");

    // The assigned identity resolves back to the same record.
    let fetched = ctx
        .users()
        .get_by_id(stored.id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(fetched.email, stored.email);
    assert_eq!(fetched.role, Role::Student);

    // Same email again, different casing of intent: always a conflict.
    let (status, body) = request(
        &ctx.state,
        Method::POST,
        "/api/register",
        None,
        json!({
            "email": "ada@example.org",
            "password": "anotherpassword",
            "firstName": "Ada",
            "lastName": "Byron",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_login_logout_key_lifecycle() {
    let ctx = TestContext::new().await;
    ctx.seed_user("grace@example.org", Role::Teacher).await;

    // Login replaces the seeded key with a fresh one.
    let (status, body) = request(
        &ctx.state,
        Method::POST,
        "/api/login",
        None,
        json!({ "email": "grace@example.org", "password": "longenoughpassword" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let key = body["authenticationKey"].as_str().unwrap().to_owned();
    assert_eq!(key.len(), 64);

    let user = ctx.users().get_by_authentication_key(&key).await.unwrap();
    assert_eq!(user.email, "grace@example.org");
    assert!(user.last_session.is_some());

    // Wrong password is indistinguishable from an unknown account.
    let (status, _) = request(
        &ctx.state,
        Method::POST,
        "/api/login",
        None,
        json!({ "email": "grace@example.org", "password": "wrong password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Logout clears the key; the key no longer resolves.
    let (status, _) = request(
        &ctx.state,
        Method::POST,
        "/api/logout",
        None,
        json!({ "authenticationKey": key }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let err = ctx.users().get_by_authentication_key(&key).await.unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_reading_creation_role_gating() {
    let ctx = TestContext::new().await;
    let (_, teacher_key) = ctx.seed_user("t@example.org", Role::Teacher).await;
    let (_, sensor_key) = ctx.seed_user("s@example.org", Role::Sensor).await;
    let (_, student_key) = ctx.seed_user("u@example.org", Role::Student).await;

    let body = json!({ "device_name": "S1", "temperature_deg_celsius": 21.5 });

    let (status, response) = request(
        &ctx.state,
        Method::POST,
        "/api/readings",
        Some(&teacher_key),
        body.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = response["reading"]["_id"].as_str().unwrap();
    assert_eq!(id.len(), 24);
    assert!(response["reading"]["time"].is_string());

    let (status, _) = request(
        &ctx.state,
        Method::POST,
        "/api/readings",
        Some(&sensor_key),
        body.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Students never get through, and nothing is written.
    let before = ctx.readings().get_all().await.unwrap().len();
    let (status, response) = request(
        &ctx.state,
        Method::POST,
        "/api/readings",
        Some(&student_key),
        body,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(response["status"], 403);
    assert_eq!(ctx.readings().get_all().await.unwrap().len(), before);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_pagination_is_zero_indexed() {
    let ctx = TestContext::new().await;

    let batch: Vec<Reading> =
        (0..7).map(|i| reading(&format!("station-{i}"))).collect();
    ctx.readings().create_many(batch).await.unwrap();

    let all = ctx.readings().get_all().await.unwrap();
    assert_eq!(all.len(), 7);

    let mut paged = Vec::new();
    for page in 0..3 {
        let chunk = ctx.readings().get_by_page(page, 3).await.unwrap();
        assert!(chunk.len() <= 3);
        paged.extend(chunk);
    }
    // Concatenated pages reproduce the full set in store-native order.
    assert_eq!(paged, all);

    // Out-of-range pages are empty, not an error.
    let chunk = ctx.readings().get_by_page(10, 3).await.unwrap();
    assert!(chunk.is_empty());

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_update_rejects_disallowed_field_without_mutation() {
    let ctx = TestContext::new().await;

    // BSON datetimes carry millisecond precision; pin the fixture to it so
    // the snapshot comparison below is exact.
    let mut record = reading("S1");
    record.time = chrono::DateTime::from_timestamp_millis(1_714_550_000_000);
    let created = ctx.readings().create(record).await.unwrap();
    let id = created.id.clone().unwrap();

    let mut fields = Map::new();
    fields.insert("temperature_deg_celsius".into(), json!(30.0));
    fields.insert("color".into(), json!("red"));

    let err = ctx.readings().update_by_id(&id, &fields).await.unwrap_err();
    assert!(matches!(err, ServerError::InvalidField(_)));

    // Snapshot unchanged: even the allow-listed field kept its old value.
    let snapshot = ctx.readings().get_by_id(&id).await.unwrap();
    assert_eq!(snapshot, created);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_update_many_partial_semantics() {
    let ctx = TestContext::new().await;

    let first = ctx.readings().create(reading("S1")).await.unwrap();
    let missing = ObjectId::new().to_hex();

    let mut fields = Map::new();
    fields.insert("humidity".into(), json!(0.9));
    let updates = vec![
        ReadingUpdate {
            id: first.id.clone().unwrap(),
            fields: fields.clone(),
        },
        ReadingUpdate {
            id: missing.clone(),
            fields,
        },
    ];

    let err = ctx.readings().update_many(&updates).await.unwrap_err();
    match err {
        ServerError::PartialNotFound(failed) => {
            assert_eq!(failed, vec![missing]);
        },
        other => panic!("expected PartialNotFound, got {other:?}"),
    }

    // The first write is kept: at-least-once, no rollback.
    let snapshot = ctx
        .readings()
        .get_by_id(first.id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(snapshot.humidity, Some(0.9));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_delete_students_in_range() {
    let ctx = TestContext::new().await;
    let directory = ctx.users();

    let now = Utc::now();
    for (email, role, session_offset_days) in [
        ("in1@example.org", Role::Student, 5),
        ("in2@example.org", Role::Student, 10),
        ("old@example.org", Role::Student, 40),
        ("teacher@example.org", Role::Teacher, 5),
    ] {
        let mut user = User {
            id: None,
            email: email.to_owned(),
            password: "$argon2id$v=19$m=1024,t=1,p=1$abc$def".to_owned(),
            first_name: "Range".to_owned(),
            last_name: "Case".to_owned(),
            role,
            authentication_key: None,
            registration_date: now - Duration::days(60),
            last_session: Some(now - Duration::days(session_offset_days)),
        };
        user = directory.create(&user).await.unwrap();
        assert!(user.id.is_some());
    }

    // Empty candidate set: nothing deleted.
    let err = directory
        .delete_in_range(
            now - Duration::days(2),
            now - Duration::days(1),
            Role::Student,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NoMatch));
    assert_eq!(directory.get_all().await.unwrap().len(), 4);

    // Two students fall in the window; the teacher and the old student stay.
    let deleted = directory
        .delete_in_range(now - Duration::days(20), now, Role::Student)
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let remaining = directory.get_all().await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|user| user.email != "in1@example.org"
            && user.email != "in2@example.org"));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_change_roles_in_registration_range() {
    let ctx = TestContext::new().await;
    let directory = ctx.users();

    let now = Utc::now();
    for (email, role, registered_days_ago) in [
        ("young@example.org", Role::Student, 5),
        ("older@example.org", Role::Student, 50),
        ("teacher@example.org", Role::Teacher, 5),
    ] {
        directory
            .create(&User {
                id: None,
                email: email.to_owned(),
                password: "$argon2id$v=19$m=1024,t=1,p=1$abc$def".to_owned(),
                first_name: "Role".to_owned(),
                last_name: "Case".to_owned(),
                role,
                authentication_key: None,
                registration_date: now - Duration::days(registered_days_ago),
                last_session: None,
            })
            .await
            .unwrap();
    }

    // The ad-hoc sensor grant can never be assigned in bulk.
    let err = directory
        .change_roles_in_range(now - Duration::days(10), now, Role::Sensor)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::InvalidFormat(_)));

    let modified = directory
        .change_roles_in_range(now - Duration::days(10), now, Role::Teacher)
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let young = directory
        .get_by_email("young@example.org")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(young.role, Role::Teacher);
    let older = directory
        .get_by_email("older@example.org")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(older.role, Role::Student);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_max_precipitation_trailing_window() {
    let ctx = TestContext::new().await;
    let repository = ctx.readings();

    let now = Utc::now();
    // The in-window maximum is inserted first so the reported time is
    // distinguishable from the maximum's own.
    let max_time =
        millis(now.checked_sub_months(Months::new(3)).unwrap());
    let last_time =
        millis(now.checked_sub_months(Months::new(1)).unwrap());
    let stale_time =
        millis(now.checked_sub_months(Months::new(7)).unwrap());
    for (time, precipitation) in
        [(max_time, 8.0), (last_time, 2.0), (stale_time, 99.0)]
    {
        let mut record = reading("SensorA");
        record.time = Some(time);
        record.precipitation_mm_per_h = Some(precipitation);
        repository.create(record).await.unwrap();
    }

    // The 7-month-old spike is outside the trailing window.
    let result = repository
        .find_max_precipitation_recent("SensorA")
        .await
        .unwrap();
    assert_eq!(result.max_precipitation_mm_per_h, 8.0);
    assert_eq!(result.device_name, "SensorA");
    // The reported time is the last in-window record's in natural order,
    // not the time the maximum was observed.
    assert_eq!(result.time, last_time);
    assert_ne!(result.time, max_time);

    // Unknown device, and a device with only stale data, both come up empty.
    let err = repository
        .find_max_precipitation_recent("SensorB")
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NoData));

    let mut stale = reading("SensorC");
    stale.time = now.checked_sub_months(Months::new(9));
    stale.precipitation_mm_per_h = Some(5.0);
    repository.create(stale).await.unwrap();
    let err = repository
        .find_max_precipitation_recent("SensorC")
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NoData));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_max_temperature_groups_sorted_descending() {
    let ctx = TestContext::new().await;
    let repository = ctx.readings();

    let now = Utc::now();
    // S1's maximum is its second record, so the reported group time is
    // distinguishable from the maximum's own.
    let s1_first_time = millis(now - Duration::days(3));
    let s1_max_time = millis(now - Duration::days(2));
    let s2_first_time = millis(now - Duration::days(3));
    for (device, time, temperature) in [
        ("S1", s1_first_time, 18.0),
        ("S1", s1_max_time, 24.0),
        ("S2", s2_first_time, 31.0),
        ("S2", millis(now - Duration::days(2)), 27.0),
        ("S3", millis(now - Duration::days(90)), 45.0), // out of range.
    ] {
        let mut record = reading(device);
        record.time = Some(time);
        record.temperature_deg_celsius = Some(temperature);
        repository.create(record).await.unwrap();
    }

    let results = repository
        .find_max_temperature_in_range(now - Duration::days(7), now)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].device_name, "S2");
    assert_eq!(results[0].max_temperature_deg_celsius, 31.0);
    assert_eq!(results[0].time, s2_first_time);
    assert_eq!(results[1].device_name, "S1");
    assert_eq!(results[1].max_temperature_deg_celsius, 24.0);
    // Each group reports the time of its first record in natural order,
    // not the time the maximum was observed.
    assert_eq!(results[1].time, s1_first_time);
    assert_ne!(results[1].time, s1_max_time);

    let err = repository
        .find_max_temperature_in_range(
            now - Duration::days(60),
            now - Duration::days(30),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NoData));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_find_at_timestamp_exact_match_only() {
    let ctx = TestContext::new().await;
    let repository = ctx.readings();

    let mut record = reading("S1");
    // BSON datetimes carry millisecond precision; pin the fixture to it.
    let time = chrono::DateTime::from_timestamp_millis(1_714_550_000_000)
        .unwrap();
    record.time = Some(time);
    repository.create(record).await.unwrap();

    let found = repository.find_at_timestamp("S1", time).await.unwrap();
    assert_eq!(found.device_name, "S1");
    assert_eq!(found.time, Some(time));

    // One millisecond off is a miss: no tolerance window.
    let err = repository
        .find_at_timestamp("S1", time + Duration::milliseconds(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NoData));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore = "needs a running MongoDB"]
async fn test_delete_many_readings() {
    let ctx = TestContext::new().await;
    let repository = ctx.readings();

    let first = ctx.readings().create(reading("S1")).await.unwrap();
    let second = ctx.readings().create(reading("S2")).await.unwrap();

    let deleted = repository
        .delete_many(&[first.id.unwrap(), second.id.unwrap()])
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    // A second pass matches nothing.
    let err = repository
        .delete_many(&[ObjectId::new().to_hex()])
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));

    ctx.teardown().await;
}
