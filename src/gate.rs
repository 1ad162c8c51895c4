//! Access control gate.
//!
//! Every role-restricted handler runs through [`require_role`] before any
//! side-effecting directory or repository call.

use std::sync::LazyLock;

use axum::http::HeaderMap;
use regex_lite::Regex;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::user::{Role, User, UserDirectory};

/// Request header carrying the opaque authentication key.
pub const AUTH_HEADER: &str = "x-auth-key";

/// Match minted authentication keys: 32 hex-encoded bytes.
static KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// Resolve the submitted key and enforce role membership.
///
/// A missing, empty or malformed header short-circuits before any store
/// lookup. The resolved user is handed back for authorization-aware
/// follow-ups.
pub async fn require_role(
    state: &AppState,
    headers: &HeaderMap,
    allowed: &[Role],
) -> Result<User> {
    let key = headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !KEY.is_match(key) {
        return Err(ServerError::Unauthenticated);
    }

    let user = match UserDirectory::new(state.db.clone())
        .get_by_authentication_key(key)
        .await
    {
        Ok(user) => user,
        Err(ServerError::NotFound(_)) => {
            return Err(ServerError::Unauthenticated);
        },
        Err(err) => return Err(err),
    };

    if !allowed.contains(&user.role) {
        return Err(ServerError::Forbidden);
    }
    Ok(user)
}
