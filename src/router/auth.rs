//! Registration, login and logout.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::crypto::Crypto;
use crate::error::{Result, ServerError};
use crate::router::{MessageResponse, Valid};
use crate::user::{Role, User, UserDirectory};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
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
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: u16,
    pub message: String,
    pub user: User,
}

/// Public registration. Always creates a `student`; no session starts here.
pub async fn register(
    State(state): State<AppState>,
    Valid(body): Valid<RegisterBody>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let password = state
        .crypto
        .pwd
        .hash_password(&body.password)
        .map_err(|err| {
            tracing::error!(error = %err, "password hashing failed");
            ServerError::InvalidFormat("password cannot be hashed".into())
        })?;

    let user = User {
        id: None,
        email: body.email,
        password,
        first_name: body.first_name,
        last_name: body.last_name,
        role: Role::Student,
        authentication_key: None,
        registration_date: Utc::now(),
        last_session: None,
    };

    let created = UserDirectory::new(state.db.clone()).create(&user).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            status: StatusCode::CREATED.as_u16(),
            message: "Registration successful".to_owned(),
            user: created,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password must not be empty."))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub status: u16,
    pub message: String,
    pub authentication_key: String,
}

/// Verify credentials, mint a fresh authentication key and stamp the session.
///
/// Unknown email and wrong password are indistinguishable to the caller.
pub async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<LoginBody>,
) -> Result<Json<LoginResponse>> {
    let directory = UserDirectory::new(state.db.clone());

    let mut user = directory
        .get_by_email(&body.email)
        .await?
        .ok_or(ServerError::Unauthenticated)?;
    if !state.crypto.pwd.verify_password(&body.password, &user.password) {
        return Err(ServerError::Unauthenticated);
    }

    let key = Crypto::generate_key();
    user.authentication_key = Some(key.clone());
    user.last_session = Some(Utc::now());
    directory.update(&user).await?;

    Ok(Json(LoginResponse {
        status: StatusCode::OK.as_u16(),
        message: "user logged in".to_owned(),
        authentication_key: key,
    }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogoutBody {
    #[validate(length(
        min = 1,
        message = "Missing authentication key, cannot logout."
    ))]
    pub authentication_key: String,
}

/// Clear the caller's authentication key, ending the session.
pub async fn logout(
    State(state): State<AppState>,
    Valid(body): Valid<LogoutBody>,
) -> Result<Json<MessageResponse>> {
    let directory = UserDirectory::new(state.db.clone());

    let mut user = directory
        .get_by_authentication_key(&body.authentication_key)
        .await?;
    user.authentication_key = None;
    directory.update(&user).await?;

    Ok(Json(MessageResponse::new(StatusCode::OK, "Logged out")))
}
