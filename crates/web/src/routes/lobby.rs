use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use chess_lobby_core::{MatchInfo, MatchOutcome, WaitOutcome};

use super::{disconnect_token, ApiResult, CurrentPlayer};
use crate::AppState;

pub async fn request_rank_match(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
) -> ApiResult<MatchOutcome> {
    Ok(Json(state.matchmaker.request_rank_match(player).await?))
}

pub async fn wait_for_match(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
) -> ApiResult<WaitOutcome> {
    let (cancel, _guard) = disconnect_token(&state);
    Ok(Json(state.matchmaker.wait_for_match(player, &cancel).await?))
}

pub async fn cancel_search(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
) -> ApiResult<serde_json::Value> {
    let removed = state.matchmaker.cancel_search(player).await?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
) -> ApiResult<serde_json::Value> {
    let code = state.matchmaker.create_room(player).await?;
    Ok(Json(json!({ "code": code })))
}

pub async fn join_room(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(code): Path<String>,
) -> ApiResult<MatchInfo> {
    Ok(Json(state.matchmaker.join_room(&code, player).await?))
}

pub async fn wait_room(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(code): Path<String>,
) -> ApiResult<WaitOutcome> {
    let (cancel, _guard) = disconnect_token(&state);
    Ok(Json(state.matchmaker.wait_room(&code, player, &cancel).await?))
}
