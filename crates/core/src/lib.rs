//! Chess Lobby Core Library
//!
//! Server-side rules engine plus the session, notification and matchmaking
//! layers that turn two HTTP clients into one synchronized game.

pub mod board;
pub mod cache;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod notify;
pub mod rating;
pub mod rules;
pub mod session;
pub mod storage;

pub use board::{Board, Color, Move, Piece, PieceKind, Square, STARTING_FEN};
pub use cache::{FastCache, MemoryCache};
pub use config::Config;
pub use error::{Error, Result};
pub use matchmaking::{MatchInfo, MatchOutcome, Matchmaker};
pub use notify::{Channel, Event, Notifier, WaitOutcome};
pub use rules::BoardStatus;
pub use session::{DrawAction, DrawReport, GameSession, MoveReport, SessionStore};
pub use storage::{Database, DurableStore};

use std::sync::Arc;

/// Wire the session store and matchmaker over shared backends
pub fn build_services(
    db: Arc<dyn DurableStore>,
    cache: Arc<dyn FastCache>,
    config: &Config,
) -> (SessionStore, Matchmaker) {
    let notifier = Notifier::new(cache.clone(), config);
    let sessions = SessionStore::new(db.clone(), cache.clone(), notifier.clone(), config);
    let matchmaker = Matchmaker::new(db, cache, sessions.clone(), notifier, config);
    (sessions, matchmaker)
}
