//! API response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Success envelope. Errors are rendered by [`polly_common::AppError`].
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap a payload.
    pub const fn ok(data: T) -> Self {
        Self { data }
    }

    /// Wrap a payload for a newly created resource.
    pub const fn created(data: T) -> Created<T> {
        Created(Self { data })
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// A `201 Created` response.
#[derive(Debug)]
pub struct Created<T: Serialize>(ApiResponse<T>);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self.0)).into_response()
    }
}

/// Empty success response.
#[must_use]
pub fn ok() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
