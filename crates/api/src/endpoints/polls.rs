//! Poll endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use polly_common::AppResult;
use polly_core::{
    CreatePollInput, ListPollsInput, PollDetail, PollResults, UpdatePollInput, VoteReceipt,
    lifecycle,
};
use polly_db::entities::poll::{self, PollStatus, VoteType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::{self, ApiResponse},
};

/// Poll response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: PollStatus,
    /// `closed` for an active poll past its expiry.
    pub effective_status: PollStatus,
    pub vote_type: VoteType,
    pub allow_multiple_votes: bool,
    pub max_votes_per_user: Option<i32>,
    pub expires_at: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub options: Vec<PollOptionResponse>,
    pub total_votes: u64,
    pub is_expired: bool,
    pub accepts_votes: bool,
}

/// Poll option response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionResponse {
    pub id: String,
    pub text: String,
    pub order_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<u64>,
}

impl From<PollDetail> for PollResponse {
    fn from(detail: PollDetail) -> Self {
        let effective_status = lifecycle::effective_status(&detail.poll, Utc::now());
        let poll = detail.poll;
        Self {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            status: poll.status,
            effective_status,
            vote_type: poll.vote_type,
            allow_multiple_votes: poll.allow_multiple_votes,
            max_votes_per_user: poll.max_votes_per_user,
            expires_at: poll.expires_at.map(|e| e.to_rfc3339()),
            created_by: poll.created_by,
            created_at: poll.created_at.to_rfc3339(),
            updated_at: poll.updated_at.to_rfc3339(),
            options: detail
                .options
                .into_iter()
                .map(|o| PollOptionResponse {
                    id: o.option.id,
                    text: o.option.text,
                    order_index: o.option.order_index,
                    votes: o.votes,
                })
                .collect(),
            total_votes: detail.total_votes,
            is_expired: detail.is_expired,
            accepts_votes: detail.accepts_votes,
        }
    }
}

/// Results response, carrying the poll configuration next to the rows.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub poll_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: PollStatus,
    pub vote_type: VoteType,
    pub allow_multiple_votes: bool,
    pub max_votes_per_user: Option<i32>,
    pub expires_at: Option<String>,
    pub options: Vec<OptionResultResponse>,
    pub total_votes: u64,
    pub is_expired: bool,
    pub accepts_votes: bool,
}

/// One result row.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResultResponse {
    pub option_id: String,
    pub text: String,
    pub order_index: i32,
    pub count: u64,
    pub percentage: f64,
}

impl From<PollResults> for ResultsResponse {
    fn from(results: PollResults) -> Self {
        let poll: poll::Model = results.poll;
        Self {
            poll_id: poll.id,
            title: poll.title,
            description: poll.description,
            status: poll.status,
            vote_type: poll.vote_type,
            allow_multiple_votes: poll.allow_multiple_votes,
            max_votes_per_user: poll.max_votes_per_user,
            expires_at: poll.expires_at.map(|e| e.to_rfc3339()),
            options: results
                .options
                .into_iter()
                .map(|r| OptionResultResponse {
                    option_id: r.option_id,
                    text: r.text,
                    order_index: r.order_index,
                    count: r.count,
                    percentage: r.percentage,
                })
                .collect(),
            total_votes: results.total_votes,
            is_expired: results.is_expired,
            accepts_votes: results.accepts_votes,
        }
    }
}

/// Show poll query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowPollQuery {
    #[serde(default = "default_true")]
    pub include_counts: bool,
}

const fn default_true() -> bool {
    true
}

/// Vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_ids: Vec<String>,
}

/// Vote response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub total_votes: u64,
    pub recorded: Vec<String>,
}

impl From<VoteReceipt> for VoteResponse {
    fn from(receipt: VoteReceipt) -> Self {
        Self {
            total_votes: receipt.total_votes,
            recorded: receipt.recorded,
        }
    }
}

/// The caller's own selections.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVotesResponse {
    pub option_ids: Vec<String>,
    pub has_voted: bool,
}

/// List polls.
async fn list_polls(
    State(state): State<AppState>,
    Query(query): Query<ListPollsInput>,
) -> AppResult<ApiResponse<Vec<PollResponse>>> {
    let polls = state.poll_service.list_polls(query).await?;
    Ok(ApiResponse::ok(polls.into_iter().map(Into::into).collect()))
}

/// Create a poll.
async fn create_poll(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreatePollInput>,
) -> AppResult<impl IntoResponse> {
    info!(user_id = %user_id, title = %input.title, "Creating poll");
    let detail = state.poll_service.create(&user_id, input).await?;
    Ok(ApiResponse::created(PollResponse::from(detail)))
}

/// Get a poll.
async fn show_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ShowPollQuery>,
) -> AppResult<ApiResponse<PollResponse>> {
    let detail = state
        .poll_service
        .get_poll(&id, query.include_counts)
        .await?;
    Ok(ApiResponse::ok(detail.into()))
}

/// Update a poll.
async fn update_poll(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdatePollInput>,
) -> AppResult<ApiResponse<PollResponse>> {
    info!(user_id = %user_id, poll_id = %id, "Updating poll");
    let detail = state.poll_service.update(&id, &user_id, input).await?;
    Ok(ApiResponse::ok(detail.into()))
}

/// Delete a poll.
async fn delete_poll(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    info!(user_id = %user_id, poll_id = %id, "Deleting poll");
    state.poll_service.delete(&id, &user_id).await?;
    Ok(response::ok())
}

/// Open a draft poll for voting.
async fn publish_poll(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    info!(user_id = %user_id, poll_id = %id, "Publishing poll");
    state.lifecycle_service.publish(&id, &user_id).await?;
    let detail = state.poll_service.get_poll(&id, true).await?;
    Ok(ApiResponse::ok(detail.into()))
}

/// Close an active poll.
async fn close_poll(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    info!(user_id = %user_id, poll_id = %id, "Closing poll");
    state.lifecycle_service.close(&id, &user_id).await?;
    let detail = state.poll_service.get_poll(&id, true).await?;
    Ok(ApiResponse::ok(detail.into()))
}

/// Vote on a poll.
async fn vote(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> AppResult<ApiResponse<VoteResponse>> {
    info!(user_id = %user_id, poll_id = %id, options = req.option_ids.len(), "Submitting vote");
    let receipt = state
        .vote_service
        .submit_vote(&id, &user_id, &req.option_ids)
        .await?;
    Ok(ApiResponse::ok(receipt.into()))
}

/// The caller's selections on a poll. Empty for anonymous callers.
async fn my_votes(
    MaybeAuthUser(user_id): MaybeAuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<MyVotesResponse>> {
    let option_ids = state
        .vote_service
        .votes_by_voter(&id, user_id.as_deref())
        .await?;
    let has_voted = match user_id.as_deref() {
        Some(user_id) => state.vote_service.has_voted(&id, user_id).await?,
        None => false,
    };
    Ok(ApiResponse::ok(MyVotesResponse {
        option_ids,
        has_voted,
    }))
}

/// Poll results.
async fn results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ResultsResponse>> {
    let results = state.results_service.compute_results(&id).await?;
    Ok(ApiResponse::ok(results.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_polls).post(create_poll))
        .route(
            "/{id}",
            get(show_poll).patch(update_poll).delete(delete_poll),
        )
        .route("/{id}/publish", post(publish_poll))
        .route("/{id}/close", post(close_poll))
        .route("/{id}/vote", post(vote))
        .route("/{id}/votes/me", get(my_votes))
        .route("/{id}/results", get(results))
}
