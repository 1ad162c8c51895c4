//! Users-related HTTP API. Everything here is role-restricted.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::crypto::PHC_PREFIX;
use crate::error::Result;
use crate::gate::require_role;
use crate::router::{MessageResponse, Valid};
use crate::user::{Role, User, UserDirectory};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    #[validate(length(min = 1, message = "First name must not be empty."))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name must not be empty."))]
    pub last_name: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub status: u16,
    pub message: String,
    pub user: User,
}

/// Teacher-only account provisioning with an explicit role.
///
/// An already-hashed password (PHC form) is passed through unchanged so
/// accounts can be migrated between instances.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(body): Valid<CreateBody>,
) -> Result<(StatusCode, Json<CreateResponse>)> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    let password = if body.password.starts_with(PHC_PREFIX) {
        body.password
    } else {
        state.crypto.pwd.hash_password(&body.password).map_err(|err| {
            tracing::error!(error = %err, "password hashing failed");
            crate::error::ServerError::InvalidFormat(
                "password cannot be hashed".into(),
            )
        })?
    };

    let user = User {
        id: None,
        email: body.email,
        password,
        first_name: body.first_name,
        last_name: body.last_name,
        role: body.role,
        authentication_key: None,
        registration_date: Utc::now(),
        last_session: None,
    };

    let created = UserDirectory::new(state.db.clone()).create(&user).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            status: StatusCode::CREATED.as_u16(),
            message: "User created".to_owned(),
            user: created,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub status: u16,
    pub message: String,
    pub user: User,
}

/// Teacher-only single user lookup. Secret fields never serialize.
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    let user = UserDirectory::new(state.db.clone()).get_by_id(&id).await?;

    Ok(Json(UserResponse {
        status: StatusCode::OK.as_u16(),
        message: "User found".to_owned(),
        user,
    }))
}

/// Teacher-only single user removal.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    UserDirectory::new(state.db.clone()).delete_by_id(&id).await?;

    Ok(Json(MessageResponse::new(StatusCode::OK, "User deleted")))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRangeBody {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Defaults to `student`, the usual purge target.
    #[serde(default)]
    pub role: Option<Role>,
}

/// Teacher-only purge of accounts whose last session falls in the range.
pub async fn delete_range(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(body): Valid<DeleteRangeBody>,
) -> Result<Json<MessageResponse>> {
    require_role(&state, &headers, &[Role::Teacher]).await?;

    let role = body.role.unwrap_or(Role::Student);
    let deleted = UserDirectory::new(state.db.clone())
        .delete_in_range(body.start_date, body.end_date, role)
        .await?;

    Ok(Json(MessageResponse::new(
        StatusCode::OK,
        &format!("Deleted {deleted} {role} account(s) in range"),
    )))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRolesBody {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub new_role: Role,
}

#[derive(Debug, Serialize)]
pub struct ChangeRolesResponse {
    pub status: u16,
    pub message: String,
    /// Number of accounts moved to the new role.
    pub result: u64,
}

/// Admin-only bulk role change over a registration-date range.
pub async fn change_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(body): Valid<ChangeRolesBody>,
) -> Result<Json<ChangeRolesResponse>> {
    require_role(&state, &headers, &[Role::Admin]).await?;

    let modified = UserDirectory::new(state.db.clone())
        .change_roles_in_range(body.start_date, body.end_date, body.new_role)
        .await?;

    Ok(Json(ChangeRolesResponse {
        status: StatusCode::OK.as_u16(),
        message: "Roles updated".to_owned(),
        result: modified,
    }))
}
