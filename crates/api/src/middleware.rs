//! API middleware.

#![allow(missing_docs)]

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};
use polly_common::{AppError, AppResult, Config};
use polly_core::{LifecycleService, PollService, ResultsService, VoteService};
use polly_db::repositories::PollStoreRef;

use crate::extractors::Voter;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub poll_service: PollService,
    pub lifecycle_service: LifecycleService,
    pub vote_service: VoteService,
    pub results_service: ResultsService,
    pub user_header: HeaderName,
}

impl AppState {
    /// Wire every service to one poll store.
    pub fn new(store: PollStoreRef, config: &Config) -> AppResult<Self> {
        let user_header = HeaderName::try_from(config.auth.user_header.as_str())
            .map_err(|e| AppError::Config(format!("Invalid auth.user_header: {e}")))?;

        Ok(Self {
            poll_service: PollService::new(store.clone(), config.polls.clone()),
            lifecycle_service: LifecycleService::new(store.clone()),
            vote_service: VoteService::new(store.clone()),
            results_service: ResultsService::new(store, config.polls.clone()),
            user_header,
        })
    }
}

/// Authentication middleware.
///
/// Sessions are resolved upstream. A non-blank user id in the configured header
/// becomes the request's [`Voter`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let voter = req
        .headers()
        .get(&state.user_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| Voter(id.to_string()));

    if let Some(voter) = voter {
        req.extensions_mut().insert(voter);
    }

    next.run(req).await
}
