//! Request extractors.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use polly_common::AppError;

/// Voter identity placed in request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voter(pub String);

/// Authenticated voter extractor.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Voter>()
            .map(|voter| Self(voter.0.clone()))
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional voter extractor.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<String>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Voter>().map(|v| v.0.clone())))
    }
}
