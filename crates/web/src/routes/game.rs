use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use chess_lobby_core::session::{GameOverReport, GameView, ResultView};
use chess_lobby_core::storage::{GameId, MatchSummary};
use chess_lobby_core::{DrawAction, DrawReport, Move, MoveReport, PieceKind, Result, Square, WaitOutcome};

use super::{disconnect_token, ApiResult, CurrentPlayer};
use crate::AppState;

#[derive(Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
}

impl MoveRequest {
    fn parse(&self) -> Result<Move> {
        let from: Square = self.from.trim().parse()?;
        let to: Square = self.to.trim().parse()?;
        let mv = Move::new(from, to);
        match self.promotion.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => Ok(mv.with_promotion(kind.parse::<PieceKind>()?)),
            _ => Ok(mv),
        }
    }
}

#[derive(Deserialize)]
pub struct DrawRequest {
    pub action: DrawAction,
}

#[derive(Deserialize)]
pub struct SquareQuery {
    pub square: String,
}

pub async fn make_move(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<MoveReport> {
    let mv = body.parse()?;
    Ok(Json(state.sessions.make_move(game_id, player, mv).await?))
}

pub async fn wait_for_update(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
) -> ApiResult<WaitOutcome> {
    let (cancel, _guard) = disconnect_token(&state);
    Ok(Json(
        state
            .sessions
            .wait_for_update(game_id, player, &cancel)
            .await?,
    ))
}

pub async fn resign(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
) -> ApiResult<GameOverReport> {
    Ok(Json(state.sessions.resign(game_id, player).await?))
}

pub async fn draw(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
    Json(body): Json<DrawRequest>,
) -> ApiResult<DrawReport> {
    Ok(Json(state.sessions.draw(game_id, player, body.action).await?))
}

pub async fn valid_moves(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
    Query(query): Query<SquareQuery>,
) -> ApiResult<serde_json::Value> {
    let square: Square = query.square.trim().parse()?;
    let moves = state.sessions.valid_moves(game_id, player, square).await?;
    Ok(Json(json!({ "square": square, "moves": moves })))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
) -> ApiResult<GameView> {
    Ok(Json(state.sessions.status(game_id, player).await?))
}

pub async fn result(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
    Path(game_id): Path<GameId>,
) -> ApiResult<ResultView> {
    Ok(Json(state.sessions.result(game_id, player)?))
}

pub async fn current_game(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
) -> ApiResult<serde_json::Value> {
    let game_id = state.sessions.current_game(player)?;
    Ok(Json(json!({ "game_id": game_id })))
}

pub async fn match_history(
    State(state): State<Arc<AppState>>,
    CurrentPlayer(player): CurrentPlayer,
) -> ApiResult<Vec<MatchSummary>> {
    Ok(Json(state.sessions.match_history(player)?))
}
