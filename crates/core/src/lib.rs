//! Core business logic for polly.
//!
//! The services here own every voting rule: poll validation, lifecycle
//! transitions, vote acceptance and result aggregation. Storage is reached
//! only through [`polly_db::repositories::PollStore`].

pub mod services;

pub use services::*;
