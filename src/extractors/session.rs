use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::{
    error::ApiError,
    models::User,
    token::{self, Claims},
};

/// The user behind the current request.
///
/// Taken from the claims the route guard middleware stored in the request
/// extensions, or else from a `Bearer` token in the `Authorization` header.
/// Expired and undecodable tokens are rejected with 401.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub claims: Claims,
    pub user: User,
}

impl SessionUser {
    pub fn role(&self) -> Option<&str> {
        self.claims.role.as_deref()
    }
}

pub struct OptionalSessionUser(pub Option<SessionUser>);

impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = match parts.extensions.get::<Claims>() {
            Some(claims) => claims.clone(),
            None => {
                let bearer = extract_bearer_token(parts).ok_or(ApiError::TokenInvalid)?;
                token::decode_claims(bearer).ok_or(ApiError::TokenInvalid)?
            }
        };

        if claims.is_expired_at(time::OffsetDateTime::now_utc()) {
            return Err(ApiError::TokenInvalid);
        }

        Ok(SessionUser {
            user: claims.user(),
            claims,
        })
    }
}

impl<S> FromRequestParts<S> for OptionalSessionUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match SessionUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(OptionalSessionUser(Some(user))),
            Err(_) => Ok(OptionalSessionUser(None)),
        }
    }
}

fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
