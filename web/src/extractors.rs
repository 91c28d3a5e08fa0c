//! Custom Axum extractors.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::AppError;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The calling user, taken from the `X-User-Id` header.
///
/// Authentication happens upstream; this extractor only reads the identity
/// the gateway forwarded. A missing or malformed header is rejected with
/// 401.
///
/// # Example
///
/// ```ignore
/// async fn handler(UserIdentity(user): UserIdentity) -> String {
///     format!("Hello {user}")
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing user identity"))?;

        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("Invalid user identity"))
    }
}
