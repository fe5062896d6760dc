//! HTTP API layer for polly.
//!
//! This crate exposes the poll engine as JSON over HTTP:
//!
//! - **Endpoints**: poll registry, lifecycle, voting and results routes
//! - **Extractors**: voter identity taken from request extensions
//! - **Middleware**: application state and voter identity resolution
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
pub use middleware::{AppState, auth_middleware};
