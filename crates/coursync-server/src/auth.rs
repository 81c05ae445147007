//! Caller identity. Every user-scoped route reads the numeric user id from
//! the `x-user-id` header; authentication proper happens upstream.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use coursync_shared::constants::USER_ID_HEADER;
use coursync_shared::types::UserId;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .filter(|id| id.0 > 0)
            .map(AuthUser)
            .ok_or(ServerError::Unauthorized)
    }
}
