//! Error types for chess-lobby-core

use thiserror::Error;

use crate::storage::{GameId, PlayerId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed input: {0}")]
    Format(String),

    #[error("Illegal move: {0}")]
    IllegalMove(String),

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Game {0} not found")]
    GameNotFound(GameId),

    #[error("Game {0} expired from the session cache")]
    GameExpired(GameId),

    #[error("You are not a player in this game")]
    NotAParticipant,

    #[error("Game {0} has already finished")]
    GameAlreadyFinished(GameId),

    #[error("A draw offer is already pending")]
    DuplicateDrawOffer,

    #[error("No valid draw offer to answer")]
    NoPendingOffer,

    #[error("Game {0} was already settled by another request")]
    SettlementConflict(GameId),

    #[error("Game {0} kept changing while the move was applied; try again")]
    MoveConflict(GameId),

    #[error("Player {0} not found")]
    PlayerNotFound(PlayerId),

    #[error("Room '{0}' does not exist or has expired")]
    RoomNotFound(String),

    #[error("You cannot join your own room")]
    OwnRoom,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
