//! Identity asserted by the upstream gateway through trusted headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use raffle_types::{Role, UserId};
use serde_json::json;
use thiserror::Error as ThisError;

pub(super) const USER_ID_HEADER: &str = "x-user-id";
pub(super) const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    pub role: Role,
}

/// A caller holding the manager role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Manager(pub Caller);

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum CallerError {
    #[error("missing x-user-id header")]
    MissingUser,
    #[error("invalid x-user-id header")]
    InvalidUser,
    #[error("invalid x-user-role header")]
    InvalidRole,
    #[error("manager role required")]
    Forbidden,
}

impl Caller {
    fn from_headers(headers: &HeaderMap) -> Result<Self, CallerError> {
        let user = headers
            .get(USER_ID_HEADER)
            .ok_or(CallerError::MissingUser)?
            .to_str()
            .map_err(|_| CallerError::InvalidUser)?
            .trim()
            .parse::<UserId>()
            .map_err(|_| CallerError::InvalidUser)?;
        // Callers without a role header are customers.
        let role = match headers.get(USER_ROLE_HEADER) {
            None => Role::Customer,
            Some(value) => value
                .to_str()
                .map_err(|_| CallerError::InvalidRole)?
                .parse::<Role>()
                .map_err(|_| CallerError::InvalidRole)?,
        };
        Ok(Self { user, role })
    }
}

impl IntoResponse for CallerError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            CallerError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            _ => (StatusCode::UNAUTHORIZED, "unauthorized"),
        };
        (
            status,
            Json(json!({ "error": code, "message": self.to_string() })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = CallerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_headers(&parts.headers)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Manager {
    type Rejection = CallerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_headers(&parts.headers)?;
        if !caller.role.is_manager() {
            return Err(CallerError::Forbidden);
        }
        Ok(Manager(caller))
    }
}
