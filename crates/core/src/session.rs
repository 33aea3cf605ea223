//! Cache-aside game sessions: moves, resignation and draw handling

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::board::{Board, Color, Move, PieceKind, Square, STARTING_FEN};
use crate::cache::FastCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{Channel, Event, Notifier, WaitOutcome};
use crate::rating::SettlementPolicy;
use crate::rules::{self, BoardStatus};
use crate::storage::{
    DurableStore, EndReason, GameId, GameKind, GameOutcome, GameResult, MatchSummary, PlayerId,
    PlayerProfile, Settlement, StoredGame,
};

/// Two tries: a lost board write reloads the session and revalidates once.
const MOVE_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ongoing,
    Finished,
}

impl SessionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ongoing => "ongoing",
            SessionStatus::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawAction {
    Offer,
    Accept,
    Decline,
}

impl FromStr for DrawAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "offer" => Ok(DrawAction::Offer),
            "accept" => Ok(DrawAction::Accept),
            "decline" => Ok(DrawAction::Decline),
            other => Err(Error::Format(format!("unknown draw action '{}'", other))),
        }
    }
}

/// One game as held in the fast cache
#[derive(Debug, Clone, PartialEq)]
pub struct GameSession {
    pub game_id: GameId,
    pub white: PlayerId,
    pub black: PlayerId,
    pub kind: GameKind,
    pub board: Board,
    pub status: SessionStatus,
    pub draw_offer_by: Option<Color>,
    pub moves: Vec<Move>,
    pub outcome: Option<GameOutcome>,
}

impl GameSession {
    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        if player == self.white {
            Some(Color::White)
        } else if player == self.black {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn player(&self, color: Color) -> PlayerId {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn ensure_ongoing(&self) -> Result<()> {
        match self.status {
            SessionStatus::Ongoing => Ok(()),
            SessionStatus::Finished => Err(Error::GameAlreadyFinished(self.game_id)),
        }
    }

    fn from_record(record: &StoredGame) -> Result<Self> {
        Ok(Self {
            game_id: record.id,
            white: record.white_player_id,
            black: record.black_player_id,
            kind: record.game_type,
            board: Board::from_fen(&record.fen)?,
            status: if record.is_pending() {
                SessionStatus::Ongoing
            } else {
                SessionStatus::Finished
            },
            draw_offer_by: None,
            moves: parse_log(&record.move_log)?,
            outcome: record.outcome(),
        })
    }

    fn from_fields(game_id: GameId, fields: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| fields.get(name).ok_or(Error::GameExpired(game_id));
        let id = |name: &str| -> Result<PlayerId> {
            field(name)?
                .parse()
                .map_err(|_| Error::Format(format!("bad {} in game {}", name, game_id)))
        };

        let status = match field("status")?.as_str() {
            "ongoing" => SessionStatus::Ongoing,
            "finished" => SessionStatus::Finished,
            other => return Err(Error::Format(format!("unknown session status '{}'", other))),
        };
        let outcome = match (fields.get("result"), fields.get("end_reason")) {
            (Some(r), Some(e)) if !r.is_empty() && !e.is_empty() => {
                Some(GameOutcome::new(r.parse()?, e.parse()?))
            }
            _ => None,
        };

        Ok(Self {
            game_id,
            white: id("white_player_id")?,
            black: id("black_player_id")?,
            kind: field("game_type")?.parse()?,
            board: Board::from_fen(field("fen")?)?,
            status,
            draw_offer_by: fields
                .get("draw_offer_by")
                .and_then(|c| c.chars().next())
                .and_then(Color::from_char),
            moves: parse_log(fields.get("move_log").map_or("", String::as_str))?,
            outcome,
        })
    }

    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("game_type", self.kind.as_str().to_string()),
            ("white_player_id", self.white.to_string()),
            ("black_player_id", self.black.to_string()),
            ("fen", self.board.to_fen()),
            ("current_turn", self.board.side_to_move().as_char().to_string()),
            ("status", self.status.as_str().to_string()),
            ("draw_offer_by", offer_field(self.draw_offer_by)),
            ("move_log", format_log(&self.moves)),
            (
                "result",
                self.outcome.map_or(String::new(), |o| o.result.as_str().to_string()),
            ),
            (
                "end_reason",
                self.outcome.map_or(String::new(), |o| o.reason.as_str().to_string()),
            ),
        ]
    }
}

fn offer_field(color: Option<Color>) -> String {
    color.map(|c| c.as_char().to_string()).unwrap_or_default()
}

fn format_log(moves: &[Move]) -> String {
    moves
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_log(log: &str) -> Result<Vec<Move>> {
    log.split_whitespace().map(str::parse).collect()
}

fn game_key(game_id: GameId) -> String {
    format!("game:{}", game_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveReport {
    pub game_id: GameId,
    #[serde(rename = "move")]
    pub mv: Move,
    pub fen: String,
    pub status: BoardStatus,
    pub current_turn: Color,
    pub outcome: Option<GameOutcome>,
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOverReport {
    pub game_id: GameId,
    pub outcome: GameOutcome,
    pub fen: String,
    pub settlement: Settlement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "draw", rename_all = "snake_case")]
pub enum DrawReport {
    Offered,
    Declined,
    Accepted(GameOverReport),
}

/// Ongoing game as seen by one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameView {
    pub game_id: GameId,
    pub game_type: GameKind,
    pub fen: String,
    pub current_turn: Color,
    pub my_color: Color,
    pub status: BoardStatus,
    pub draw_offer_by: Option<Color>,
    pub move_log: Vec<Move>,
    pub white: PlayerProfile,
    pub black: PlayerProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultView {
    pub game_id: GameId,
    pub outcome: GameOutcome,
    pub my_color: Color,
    pub fen: String,
    pub move_log: Vec<Move>,
    pub ended_at: Option<i64>,
    pub white: PlayerProfile,
    pub black: PlayerProfile,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<dyn DurableStore>,
    cache: Arc<dyn FastCache>,
    notifier: Notifier,
    game_ttl: Duration,
    policy: SettlementPolicy,
}

impl SessionStore {
    pub fn new(
        db: Arc<dyn DurableStore>,
        cache: Arc<dyn FastCache>,
        notifier: Notifier,
        config: &Config,
    ) -> Self {
        Self {
            db,
            cache,
            notifier,
            game_ttl: config.game_ttl,
            policy: config.settlement_policy(),
        }
    }

    /// Start a game from the standard position
    pub async fn create(&self, white: PlayerId, black: PlayerId, kind: GameKind) -> Result<GameSession> {
        let game_id = self.db.create_game(white, black, kind, STARTING_FEN)?;
        let session = GameSession {
            game_id,
            white,
            black,
            kind,
            board: Board::starting(),
            status: SessionStatus::Ongoing,
            draw_offer_by: None,
            moves: Vec::new(),
            outcome: None,
        };
        self.write_session(&session).await?;
        Ok(session)
    }

    async fn write_session(&self, session: &GameSession) -> Result<()> {
        let key = game_key(session.game_id);
        self.cache.hash_set(&key, &session.to_fields()).await?;
        self.cache.expire(&key, self.game_ttl).await
    }

    /// Read a session for one of its participants, refilling the cache on a
    /// miss while the game is still pending.
    pub async fn load(&self, game_id: GameId, player: PlayerId) -> Result<GameSession> {
        let fields = self.cache.hash_get_all(&game_key(game_id)).await?;
        if !fields.is_empty() {
            let session = GameSession::from_fields(game_id, &fields)?;
            session.color_of(player).ok_or(Error::NotAParticipant)?;
            return Ok(session);
        }

        let record = self
            .db
            .get_game(game_id)?
            .ok_or(Error::GameNotFound(game_id))?;
        let session = GameSession::from_record(&record)?;
        session.color_of(player).ok_or(Error::NotAParticipant)?;
        if record.is_pending() {
            tracing::debug!(game_id, "session cache refilled from database");
            self.write_session(&session).await?;
        }
        Ok(session)
    }

    pub async fn make_move(&self, game_id: GameId, player: PlayerId, requested: Move) -> Result<MoveReport> {
        for _ in 0..MOVE_ATTEMPTS {
            let session = self.load(game_id, player).await?;
            session.ensure_ongoing()?;
            let color = session.color_of(player).ok_or(Error::NotAParticipant)?;
            if session.board.side_to_move() != color {
                return Err(Error::NotYourTurn);
            }
            if !rules::is_legal(&session.board, requested) {
                return Err(Error::IllegalMove(requested.to_string()));
            }

            let mv = Move {
                promotion: if rules::is_promotion(&session.board, requested.from, requested.to) {
                    Some(requested.promotion.unwrap_or(PieceKind::Queen))
                } else {
                    None
                },
                ..requested
            };
            let next = rules::apply_move(&session.board, mv);
            let status = BoardStatus::of(&next);
            let mut moves = session.moves.clone();
            moves.push(mv);

            let outcome = if status.is_checkmate {
                Some(GameOutcome::new(GameResult::win_for(color), EndReason::Checkmate))
            } else if status.is_stalemate {
                Some(GameOutcome::new(GameResult::Draw, EndReason::Stalemate))
            } else {
                None
            };

            if let Some(outcome) = outcome {
                let settlement = self.finish(&session, &next, &moves, outcome, color).await?;
                return Ok(MoveReport {
                    game_id,
                    mv,
                    fen: next.to_fen(),
                    status,
                    current_turn: next.side_to_move(),
                    outcome: Some(outcome),
                    settlement: Some(settlement),
                });
            }

            let fen = next.to_fen();
            let log = format_log(&moves);
            match self.db.record_board(game_id, &session.board.to_fen(), &fen, &log) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(game_id, %mv, "board changed underneath move, reloading");
                    self.cache.delete(&game_key(game_id)).await?;
                    continue;
                }
                Err(err @ Error::GameAlreadyFinished(_)) => {
                    self.cache.delete(&game_key(game_id)).await?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
            self.sync_cached_board(&session, &next, &log).await?;

            tracing::info!(game_id, player, %mv, check = status.is_check, "move accepted");
            let event = Event::Move {
                game_id,
                mv,
                fen: fen.clone(),
                status,
                current_turn: next.side_to_move(),
            };
            self.notifier
                .push(&Channel::Game { game_id, color: color.opposite() }, &event)
                .await?;

            return Ok(MoveReport {
                game_id,
                mv,
                fen,
                status,
                current_turn: next.side_to_move(),
                outcome: None,
                settlement: None,
            });
        }

        let session = self.load(game_id, player).await?;
        session.ensure_ongoing()?;
        if session.color_of(player) != Some(session.board.side_to_move()) {
            return Err(Error::NotYourTurn);
        }
        Err(Error::MoveConflict(game_id))
    }

    /// Mirror an already persisted move into the cache. The cached record is
    /// only touched while it is ongoing and still holds the previous board;
    /// otherwise it is dropped so the next read refills it from the database.
    async fn sync_cached_board(&self, session: &GameSession, next: &Board, log: &str) -> Result<()> {
        let key = game_key(session.game_id);
        let previous = session.board.to_fen();
        let applied = self
            .cache
            .hash_compare_and_set(
                &key,
                &[("status", SessionStatus::Ongoing.as_str()), ("fen", previous.as_str())],
                &[
                    ("fen", next.to_fen()),
                    ("current_turn", next.side_to_move().as_char().to_string()),
                    ("move_log", log.to_string()),
                    ("draw_offer_by", String::new()),
                ],
            )
            .await?;
        if applied {
            self.cache.expire(&key, self.game_ttl).await
        } else {
            tracing::warn!(game_id = session.game_id, "cached session out of step with database, evicting");
            self.cache.delete(&key).await
        }
    }

    /// Settle a decided game durably, then mark the cached copy finished and
    /// tell the other side.
    async fn finish(
        &self,
        session: &GameSession,
        board: &Board,
        moves: &[Move],
        outcome: GameOutcome,
        actor: Color,
    ) -> Result<Settlement> {
        let game_id = session.game_id;
        let fen = board.to_fen();
        let log = format_log(moves);

        let settlement = self
            .db
            .commit_game_result(game_id, outcome, &fen, &log, &self.policy)?;

        let finished = GameSession {
            board: board.clone(),
            status: SessionStatus::Finished,
            draw_offer_by: None,
            moves: moves.to_vec(),
            outcome: Some(outcome),
            ..session.clone()
        };
        self.write_session(&finished).await?;

        let event = Event::GameOver {
            game_id,
            outcome,
            fen,
        };
        self.notifier
            .push(&Channel::Game { game_id, color: actor.opposite() }, &event)
            .await?;
        Ok(settlement)
    }

    /// Resigning is accepted on either player's turn.
    pub async fn resign(&self, game_id: GameId, player: PlayerId) -> Result<GameOverReport> {
        let session = self.load(game_id, player).await?;
        session.ensure_ongoing()?;
        let color = session.color_of(player).ok_or(Error::NotAParticipant)?;

        let outcome = GameOutcome::new(GameResult::win_for(color.opposite()), EndReason::Resign);
        let settlement = self
            .finish(&session, &session.board, &session.moves, outcome, color)
            .await?;
        tracing::info!(game_id, player, "player resigned");

        Ok(GameOverReport {
            game_id,
            outcome,
            fen: session.board.to_fen(),
            settlement,
        })
    }

    pub async fn draw(&self, game_id: GameId, player: PlayerId, action: DrawAction) -> Result<DrawReport> {
        let session = self.load(game_id, player).await?;
        session.ensure_ongoing()?;
        let color = session.color_of(player).ok_or(Error::NotAParticipant)?;
        let key = game_key(game_id);
        let opponent = Channel::Game {
            game_id,
            color: color.opposite(),
        };

        match action {
            DrawAction::Offer => {
                if session.board.side_to_move() != color {
                    return Err(Error::NotYourTurn);
                }
                if session.draw_offer_by.is_some() {
                    return Err(Error::DuplicateDrawOffer);
                }
                let placed = self
                    .cache
                    .hash_compare_and_set(
                        &key,
                        &[("status", SessionStatus::Ongoing.as_str()), ("draw_offer_by", "")],
                        &[("draw_offer_by", offer_field(Some(color)))],
                    )
                    .await?;
                if !placed {
                    return Err(Error::DuplicateDrawOffer);
                }
                self.cache.expire(&key, self.game_ttl).await?;
                self.notifier
                    .push(&opponent, &Event::DrawOffered { game_id, by: color })
                    .await?;
                tracing::info!(game_id, player, "draw offered");
                Ok(DrawReport::Offered)
            }
            DrawAction::Accept => {
                if session.draw_offer_by != Some(color.opposite()) {
                    return Err(Error::NoPendingOffer);
                }
                let outcome = GameOutcome::new(GameResult::Draw, EndReason::Agreement);
                let settlement = self
                    .finish(&session, &session.board, &session.moves, outcome, color)
                    .await?;
                tracing::info!(game_id, player, "draw agreed");
                Ok(DrawReport::Accepted(GameOverReport {
                    game_id,
                    outcome,
                    fen: session.board.to_fen(),
                    settlement,
                }))
            }
            DrawAction::Decline => {
                if session.draw_offer_by != Some(color.opposite()) {
                    return Err(Error::NoPendingOffer);
                }
                let offered_by = offer_field(Some(color.opposite()));
                let cleared = self
                    .cache
                    .hash_compare_and_set(
                        &key,
                        &[
                            ("status", SessionStatus::Ongoing.as_str()),
                            ("draw_offer_by", offered_by.as_str()),
                        ],
                        &[("draw_offer_by", String::new())],
                    )
                    .await?;
                if !cleared {
                    return Err(Error::NoPendingOffer);
                }
                self.notifier
                    .push(&opponent, &Event::DrawDeclined { game_id, by: color })
                    .await?;
                tracing::info!(game_id, player, "draw declined");
                Ok(DrawReport::Declined)
            }
        }
    }

    /// Long-poll for the next event addressed to this player's side
    pub async fn wait_for_update(
        &self,
        game_id: GameId,
        player: PlayerId,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let session = self.load(game_id, player).await?;
        let color = session.color_of(player).ok_or(Error::NotAParticipant)?;
        self.notifier
            .wait(&Channel::Game { game_id, color }, cancel)
            .await
    }

    /// Legal destinations for one of the caller's pieces, on their turn only
    pub async fn valid_moves(&self, game_id: GameId, player: PlayerId, from: Square) -> Result<Vec<Square>> {
        let session = self.load(game_id, player).await?;
        session.ensure_ongoing()?;
        let color = session.color_of(player).ok_or(Error::NotAParticipant)?;
        if session.board.side_to_move() != color {
            return Err(Error::NotYourTurn);
        }
        match session.board.piece_at(from) {
            Some(piece) if piece.color == color => Ok(rules::legal_moves(&session.board, from)),
            _ => Ok(Vec::new()),
        }
    }

    fn profile(&self, player: PlayerId) -> Result<PlayerProfile> {
        self.db
            .get_player(player)?
            .map(|p| PlayerProfile::from(&p))
            .ok_or(Error::PlayerNotFound(player))
    }

    pub async fn status(&self, game_id: GameId, player: PlayerId) -> Result<GameView> {
        let session = self.load(game_id, player).await?;
        session.ensure_ongoing()?;
        let my_color = session.color_of(player).ok_or(Error::NotAParticipant)?;

        Ok(GameView {
            game_id,
            game_type: session.kind,
            fen: session.board.to_fen(),
            current_turn: session.board.side_to_move(),
            my_color,
            status: BoardStatus::of(&session.board),
            draw_offer_by: session.draw_offer_by,
            move_log: session.moves.clone(),
            white: self.profile(session.white)?,
            black: self.profile(session.black)?,
        })
    }

    /// Final result of a decided game, read from durable storage
    pub fn result(&self, game_id: GameId, player: PlayerId) -> Result<ResultView> {
        let record = self
            .db
            .get_game(game_id)?
            .ok_or(Error::GameNotFound(game_id))?;
        let my_color = record.color_of(player).ok_or(Error::NotAParticipant)?;
        let outcome = record.outcome().ok_or(Error::GameNotFound(game_id))?;

        Ok(ResultView {
            game_id,
            outcome,
            my_color,
            fen: record.fen.clone(),
            move_log: parse_log(&record.move_log)?,
            ended_at: record.ended_at,
            white: self.profile(record.white_player_id)?,
            black: self.profile(record.black_player_id)?,
        })
    }

    pub fn current_game(&self, player: PlayerId) -> Result<Option<GameId>> {
        self.db.current_game_for_player(player)
    }

    pub fn match_history(&self, player: PlayerId) -> Result<Vec<MatchSummary>> {
        self.db.matches_for_player(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::storage::Database;

    struct Fixture {
        store: SessionStore,
        cache: Arc<MemoryCache>,
        db: Arc<Database>,
        white: PlayerId,
        black: PlayerId,
        game_id: GameId,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(MemoryCache::new());
        let config = Config::default();
        let notifier = Notifier::new(cache.clone(), &config);
        let store = SessionStore::new(db.clone(), cache.clone(), notifier, &config);
        let white = db.create_player("white", 1500, 0).unwrap();
        let black = db.create_player("black", 1500, 0).unwrap();
        let game_id = store.create(white, black, GameKind::Rank).await.unwrap().game_id;
        Fixture {
            store,
            cache,
            db,
            white,
            black,
            game_id,
        }
    }

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_move_updates_cache_and_database() {
        let f = fixture().await;
        let report = f.store.make_move(f.game_id, f.white, mv("e2e4")).await.unwrap();
        assert_eq!(report.current_turn, Color::Black);
        assert!(report.outcome.is_none());

        let session = f.store.load(f.game_id, f.black).await.unwrap();
        assert_eq!(session.moves, vec![mv("e2e4")]);
        let stored = f.db.get_game(f.game_id).unwrap().unwrap();
        assert_eq!(stored.fen, report.fen);
        assert_eq!(stored.move_log, "e2e4");
    }

    #[tokio::test]
    async fn test_move_rejections() {
        let f = fixture().await;
        assert!(matches!(
            f.store.make_move(f.game_id, f.black, mv("e7e5")).await,
            Err(Error::NotYourTurn)
        ));
        assert!(matches!(
            f.store.make_move(f.game_id, f.white, mv("e2e5")).await,
            Err(Error::IllegalMove(_))
        ));
        assert!(matches!(
            f.store.make_move(f.game_id, 999, mv("e2e4")).await,
            Err(Error::NotAParticipant)
        ));
        assert!(matches!(
            f.store.make_move(f.game_id + 1, f.white, mv("e2e4")).await,
            Err(Error::GameNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_miss_rehydrates_pending_game() {
        let f = fixture().await;
        f.store.make_move(f.game_id, f.white, mv("d2d4")).await.unwrap();
        f.cache.delete(&game_key(f.game_id)).await.unwrap();

        let session = f.store.load(f.game_id, f.black).await.unwrap();
        assert_eq!(session.board.side_to_move(), Color::Black);
        assert_eq!(session.moves, vec![mv("d2d4")]);
        assert!(!f.cache.hash_get_all(&game_key(f.game_id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_game_is_not_cached_again() {
        let f = fixture().await;
        f.store.resign(f.game_id, f.white).await.unwrap();
        let key = game_key(f.game_id);
        f.cache.delete(&key).await.unwrap();

        let session = f.store.load(f.game_id, f.white).await.unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
        assert!(f.cache.hash_get_all(&key).await.unwrap().is_empty());

        assert!(matches!(
            f.store.status(f.game_id, f.black).await,
            Err(Error::GameAlreadyFinished(_))
        ));
        assert!(matches!(
            f.store.resign(f.game_id, f.black).await,
            Err(Error::GameAlreadyFinished(_))
        ));
        assert!(f.cache.hash_get_all(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_after_durable_settlement_leaves_no_trace() {
        let f = fixture().await;
        let outcome = GameOutcome::new(GameResult::BlackWin, EndReason::Resign);
        f.db
            .commit_game_result(f.game_id, outcome, STARTING_FEN, "", &SettlementPolicy::default())
            .unwrap();

        // the cache still believes the game is running
        assert!(matches!(
            f.store.make_move(f.game_id, f.white, mv("e2e4")).await,
            Err(Error::GameAlreadyFinished(_))
        ));
        assert!(f.cache.hash_get_all(&game_key(f.game_id)).await.unwrap().is_empty());

        let stored = f.db.get_game(f.game_id).unwrap().unwrap();
        assert_eq!(stored.fen, STARTING_FEN);
        assert_eq!(stored.move_log, "");
        let session = f.store.load(f.game_id, f.white).await.unwrap();
        assert_eq!(session.board.to_fen(), STARTING_FEN);
        assert!(session.moves.is_empty());
    }

    #[tokio::test]
    async fn test_cached_board_only_follows_ongoing_record() {
        let f = fixture().await;
        let key = game_key(f.game_id);
        let session = f.store.load(f.game_id, f.white).await.unwrap();
        let next = rules::apply_move(&session.board, mv("e2e4"));

        f.cache
            .hash_set(&key, &[("status", "finished".to_string())])
            .await
            .unwrap();
        f.store.sync_cached_board(&session, &next, "e2e4").await.unwrap();
        assert!(f.cache.hash_get_all(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_cache_yields_to_database_position() {
        let f = fixture().await;
        let after_e4 = rules::apply_move(&Board::starting(), mv("e2e4")).to_fen();
        assert!(f.db.record_board(f.game_id, STARTING_FEN, &after_e4, "e2e4").unwrap());

        // cache still shows white to move; the database says black
        assert!(matches!(
            f.store.make_move(f.game_id, f.white, mv("d2d4")).await,
            Err(Error::NotYourTurn)
        ));
        assert_eq!(f.db.get_game(f.game_id).unwrap().unwrap().move_log, "e2e4");

        let report = f.store.make_move(f.game_id, f.black, mv("e7e5")).await.unwrap();
        assert_eq!(report.current_turn, Color::White);
        let stored = f.db.get_game(f.game_id).unwrap().unwrap();
        assert_eq!(stored.move_log, "e2e4 e7e5");
        assert_eq!(stored.fen, report.fen);
    }

    #[tokio::test]
    async fn test_incomplete_cache_record_is_expired() {
        let f = fixture().await;
        f.cache
            .hash_delete_field(&game_key(f.game_id), "fen")
            .await
            .unwrap();
        assert!(matches!(
            f.store.load(f.game_id, f.white).await,
            Err(Error::GameExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_fools_mate_settles_game() {
        let f = fixture().await;
        for (player, m) in [
            (f.white, "f2f3"),
            (f.black, "e7e5"),
            (f.white, "g2g4"),
        ] {
            f.store.make_move(f.game_id, player, mv(m)).await.unwrap();
        }
        let report = f.store.make_move(f.game_id, f.black, mv("d8h4")).await.unwrap();
        assert!(report.status.is_checkmate);
        assert_eq!(
            report.outcome,
            Some(GameOutcome::new(GameResult::BlackWin, EndReason::Checkmate))
        );
        assert_eq!(report.settlement.unwrap().black.new_coins, 100);

        assert!(matches!(
            f.store.make_move(f.game_id, f.white, mv("a2a3")).await,
            Err(Error::GameAlreadyFinished(_))
        ));
        assert!(matches!(
            f.store.status(f.game_id, f.white).await,
            Err(Error::GameAlreadyFinished(_))
        ));
        let result = f.store.result(f.game_id, f.white).unwrap();
        assert_eq!(result.my_color, Color::White);
        assert_eq!(result.move_log.len(), 4);
    }

    #[tokio::test]
    async fn test_promotion_defaults_to_queen_in_log() {
        let f = fixture().await;
        let board = Board::from_fen("7k/P7/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let session = GameSession {
            board,
            ..f.store.load(f.game_id, f.white).await.unwrap()
        };
        f.store.write_session(&session).await.unwrap();

        let report = f.store.make_move(f.game_id, f.white, mv("a7a8")).await.unwrap();
        assert_eq!(report.mv, mv("a7a8q"));
        assert!(report.status.is_check);
    }

    #[tokio::test]
    async fn test_draw_offer_flow() {
        let f = fixture().await;
        assert!(matches!(
            f.store.draw(f.game_id, f.black, DrawAction::Offer).await,
            Err(Error::NotYourTurn)
        ));
        f.store.draw(f.game_id, f.white, DrawAction::Offer).await.unwrap();
        assert!(matches!(
            f.store.draw(f.game_id, f.white, DrawAction::Offer).await,
            Err(Error::DuplicateDrawOffer)
        ));
        assert!(matches!(
            f.store.draw(f.game_id, f.white, DrawAction::Accept).await,
            Err(Error::NoPendingOffer)
        ));

        f.store.draw(f.game_id, f.black, DrawAction::Decline).await.unwrap();
        assert!(matches!(
            f.store.draw(f.game_id, f.black, DrawAction::Accept).await,
            Err(Error::NoPendingOffer)
        ));

        f.store.draw(f.game_id, f.white, DrawAction::Offer).await.unwrap();
        let report = f.store.draw(f.game_id, f.black, DrawAction::Accept).await.unwrap();
        match report {
            DrawReport::Accepted(over) => {
                assert_eq!(over.outcome.result, GameResult::Draw);
                assert_eq!(over.settlement.white.coins_awarded, 50);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_move_clears_pending_offer() {
        let f = fixture().await;
        f.store.draw(f.game_id, f.white, DrawAction::Offer).await.unwrap();
        f.store.make_move(f.game_id, f.white, mv("e2e4")).await.unwrap();
        let session = f.store.load(f.game_id, f.black).await.unwrap();
        assert_eq!(session.draw_offer_by, None);
    }

    #[tokio::test]
    async fn test_resign_out_of_turn_and_notify() {
        let f = fixture().await;
        let over = f.store.resign(f.game_id, f.black).await.unwrap();
        assert_eq!(over.outcome.result, GameResult::WhiteWin);

        let token = CancellationToken::new();
        let got = f
            .store
            .wait_for_update(f.game_id, f.white, &token)
            .await
            .unwrap();
        assert!(matches!(got, WaitOutcome::Event(Event::GameOver { .. })));
        assert!(matches!(
            f.store.resign(f.game_id, f.white).await,
            Err(Error::GameAlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_valid_moves_on_own_turn_only() {
        let f = fixture().await;
        let square: Square = "g1".parse().unwrap();
        let mut moves = f.store.valid_moves(f.game_id, f.white, square).await.unwrap();
        moves.sort();
        assert_eq!(moves.len(), 2);
        assert!(matches!(
            f.store.valid_moves(f.game_id, f.black, "g8".parse().unwrap()).await,
            Err(Error::NotYourTurn)
        ));
        assert!(f
            .store
            .valid_moves(f.game_id, f.white, "g8".parse().unwrap())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_status_and_current_game() {
        let f = fixture().await;
        let view = f.store.status(f.game_id, f.black).await.unwrap();
        assert_eq!(view.my_color, Color::Black);
        assert_eq!(view.white.nickname, "white");
        assert_eq!(view.fen, STARTING_FEN);
        assert_eq!(f.store.current_game(f.white).unwrap(), Some(f.game_id));
        assert!(matches!(
            f.store.result(f.game_id, f.white),
            Err(Error::GameNotFound(_))
        ));
        assert_eq!(f.store.match_history(f.white).unwrap().len(), 1);
    }
}
