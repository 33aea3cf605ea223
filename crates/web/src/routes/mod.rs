use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use chess_lobby_core::storage::PlayerId;
use chess_lobby_core::{DurableStore, Error};

use crate::AppState;

pub mod game;
pub mod lobby;

/// Header carrying the caller's identity, set by the auth proxy in front
pub const PLAYER_HEADER: &str = "x-player-id";

const DEFAULT_RATING: i64 = 1500;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/players", post(create_player))
        .route(
            "/match/rank",
            post(lobby::request_rank_match).delete(lobby::cancel_search),
        )
        .route("/match/rank/wait", get(lobby::wait_for_match))
        .route("/rooms", post(lobby::create_room))
        .route("/rooms/:code/join", post(lobby::join_room))
        .route("/rooms/:code/wait", get(lobby::wait_room))
        .route("/games/current", get(game::current_game))
        .route("/games/history", get(game::match_history))
        .route("/games/:id/status", get(game::status))
        .route("/games/:id/result", get(game::result))
        .route("/games/:id/moves", get(game::valid_moves))
        .route("/games/:id/move", post(game::make_move))
        .route("/games/:id/wait", get(game::wait_for_update))
        .route("/games/:id/resign", post(game::resign))
        .route("/games/:id/draw", post(game::draw))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub enum ApiError {
    Unauthenticated,
    Core(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Format(_)
        | Error::IllegalMove(_)
        | Error::NotYourTurn
        | Error::NoPendingOffer
        | Error::OwnRoom => StatusCode::BAD_REQUEST,
        Error::NotAParticipant => StatusCode::FORBIDDEN,
        Error::GameNotFound(_) | Error::PlayerNotFound(_) | Error::RoomNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::DuplicateDrawOffer | Error::SettlementConflict(_) | Error::MoveConflict(_) => {
            StatusCode::CONFLICT
        }
        Error::GameAlreadyFinished(_) | Error::GameExpired(_) => StatusCode::GONE,
        Error::Config(_) | Error::Database(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                format!("missing or invalid {} header", PLAYER_HEADER),
            ),
            ApiError::Core(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Player id resolved by the identity collaborator
pub struct CurrentPlayer(pub PlayerId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPlayer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(PLAYER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .map(CurrentPlayer)
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Token for one long-poll: fires on server shutdown, or when the handler
/// future is dropped because the client went away.
pub fn disconnect_token(state: &AppState) -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = state.shutdown.child_token();
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
pub struct NewPlayer {
    pub nickname: String,
}

pub async fn create_player(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewPlayer>,
) -> ApiResult<serde_json::Value> {
    let nickname = body.nickname.trim();
    if nickname.is_empty() {
        return Err(Error::Format("nickname must not be empty".into()).into());
    }
    let id = state.db.create_player(nickname, DEFAULT_RATING, 0)?;
    Ok(Json(json!({ "id": id, "nickname": nickname, "rating": DEFAULT_RATING })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chess_lobby_core::{build_services, Config, Database, MemoryCache};
    use serde_json::Value;
    use tower::ServiceExt;

    pub(crate) fn test_app() -> (Router, Arc<AppState>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(MemoryCache::new());
        let (sessions, matchmaker) = build_services(db.clone(), cache, &Config::default());
        let state = Arc::new(AppState {
            db,
            sessions,
            matchmaker,
            shutdown: CancellationToken::new(),
        });
        (router(state.clone()), state)
    }

    pub(crate) async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        player: Option<PlayerId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(p) = player {
            req = req.header(PLAYER_HEADER, p.to_string());
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_player() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "POST", "/players", None, Some(json!({"nickname": "ann"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rating"], 1500);

        let (status, _) = call(&app, "POST", "/players", None, Some(json!({"nickname": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "GET", "/games/current", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains(PLAYER_HEADER));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::NotYourTurn), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::NotAParticipant), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&Error::RoomNotFound("X".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&Error::SettlementConflict(1)), StatusCode::CONFLICT);
        assert_eq!(status_for(&Error::MoveConflict(1)), StatusCode::CONFLICT);
        assert_eq!(status_for(&Error::GameExpired(1)), StatusCode::GONE);
        assert_eq!(
            status_for(&Error::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
