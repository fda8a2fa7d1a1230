//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::KernelError;
use crate::events::UserId;
use crate::local::USER_HEADER;

/// The calling user, taken from the `x-user-id` header.
#[axum::async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = KernelError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| KernelError::unauthorized("missing x-user-id header"))?;

        let user = value
            .to_str()
            .map_err(|_| KernelError::unauthorized("x-user-id header is not valid text"))?
            .trim();
        if user.is_empty() {
            return Err(KernelError::unauthorized("x-user-id header is empty"));
        }

        Ok(UserId::new(user))
    }
}
