//! Database operations

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;

use super::models::*;
use crate::board::Color;
use crate::error::{Error, Result};
use crate::rating::{self, SettlementPolicy};

/// Persistent record of players and games.
///
/// Implementations must make `commit_game_result` atomic: the game row is
/// decided at most once and both players' rating and coin updates land
/// together or not at all.
pub trait DurableStore: Send + Sync {
    fn create_player(&self, nickname: &str, rating: i64, coins: i64) -> Result<PlayerId>;
    fn get_player(&self, id: PlayerId) -> Result<Option<StoredPlayer>>;
    fn create_game(
        &self,
        white: PlayerId,
        black: PlayerId,
        kind: GameKind,
        fen: &str,
    ) -> Result<GameId>;
    fn get_game(&self, id: GameId) -> Result<Option<StoredGame>>;
    /// Replace the position of a pending game, provided it still holds
    /// `expected_fen`. Returns false when another write got there first.
    fn record_board(&self, id: GameId, expected_fen: &str, fen: &str, move_log: &str) -> Result<bool>;
    fn commit_game_result(
        &self,
        id: GameId,
        outcome: GameOutcome,
        fen: &str,
        move_log: &str,
        policy: &SettlementPolicy,
    ) -> Result<Settlement>;
    fn adjust_rating_and_currency(&self, player: PlayerId, rating: i64, coins: i64) -> Result<()>;
    fn matches_for_player(&self, player: PlayerId) -> Result<Vec<MatchSummary>>;
    fn current_game_for_player(&self, player: PlayerId) -> Result<Option<GameId>>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nickname TEXT NOT NULL,
                rating INTEGER NOT NULL,
                coins INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS games (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                white_player_id INTEGER NOT NULL,
                black_player_id INTEGER NOT NULL,
                game_type TEXT NOT NULL,
                result TEXT NOT NULL DEFAULT 'pending',
                end_reason TEXT,
                fen TEXT NOT NULL,
                move_log TEXT NOT NULL DEFAULT '',
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                FOREIGN KEY (white_player_id) REFERENCES players(id),
                FOREIGN KEY (black_player_id) REFERENCES players(id)
            );

            CREATE INDEX IF NOT EXISTS idx_games_white ON games(white_player_id);
            CREATE INDEX IF NOT EXISTS idx_games_black ON games(black_player_id);
            CREATE INDEX IF NOT EXISTS idx_games_result ON games(result);
            "#,
        )?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn player_in(conn: &Connection, id: PlayerId) -> Result<Option<StoredPlayer>> {
        let player = conn
            .query_row(
                "SELECT id, nickname, rating, coins, created_at FROM players WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredPlayer {
                        id: row.get(0)?,
                        nickname: row.get(1)?,
                        rating: row.get(2)?,
                        coins: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(player)
    }

    fn adjust_in(conn: &Connection, player: PlayerId, rating: i64, coins: i64) -> Result<()> {
        let updated = conn.execute(
            "UPDATE players SET rating = ?1, coins = ?2 WHERE id = ?3",
            params![rating, coins, player],
        )?;
        if updated == 0 {
            return Err(Error::PlayerNotFound(player));
        }
        Ok(())
    }

    fn game_exists(conn: &Connection, id: GameId) -> Result<bool> {
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM games WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

// 'pending' is stored as text so the column can be compared in SQL
fn result_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<GameResult>> {
    let raw: String = row.get(idx)?;
    if raw == "pending" {
        Ok(None)
    } else {
        row.get(idx).map(Some)
    }
}

impl DurableStore for Database {
    fn create_player(&self, nickname: &str, rating: i64, coins: i64) -> Result<PlayerId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO players (nickname, rating, coins, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![nickname, rating, coins, Self::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_player(&self, id: PlayerId) -> Result<Option<StoredPlayer>> {
        Self::player_in(&self.conn.lock(), id)
    }

    fn create_game(
        &self,
        white: PlayerId,
        black: PlayerId,
        kind: GameKind,
        fen: &str,
    ) -> Result<GameId> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO games (white_player_id, black_player_id, game_type, result, fen, move_log, started_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, '', ?5)
            "#,
            params![white, black, kind, fen, Self::now()],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(game_id = id, white, black, kind = kind.as_str(), "game created");
        Ok(id)
    }

    fn get_game(&self, id: GameId) -> Result<Option<StoredGame>> {
        let conn = self.conn.lock();
        let game = conn
            .query_row(
                r#"
                SELECT id, white_player_id, black_player_id, game_type, result, end_reason,
                       fen, move_log, started_at, ended_at
                FROM games WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(StoredGame {
                        id: row.get(0)?,
                        white_player_id: row.get(1)?,
                        black_player_id: row.get(2)?,
                        game_type: row.get(3)?,
                        result: result_column(row, 4)?,
                        end_reason: row.get(5)?,
                        fen: row.get(6)?,
                        move_log: row.get(7)?,
                        started_at: row.get(8)?,
                        ended_at: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(game)
    }

    fn record_board(&self, id: GameId, expected_fen: &str, fen: &str, move_log: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE games SET fen = ?1, move_log = ?2 WHERE id = ?3 AND result = 'pending' AND fen = ?4",
            params![fen, move_log, id, expected_fen],
        )?;
        if updated > 0 {
            return Ok(true);
        }
        let pending: Option<bool> = conn
            .query_row(
                "SELECT result = 'pending' FROM games WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match pending {
            None => Err(Error::GameNotFound(id)),
            Some(false) => Err(Error::GameAlreadyFinished(id)),
            Some(true) => Ok(false),
        }
    }

    fn commit_game_result(
        &self,
        id: GameId,
        outcome: GameOutcome,
        fen: &str,
        move_log: &str,
        policy: &SettlementPolicy,
    ) -> Result<Settlement> {
        let mut conn = self.conn.lock();
        // Dropping the transaction on any early return rolls it back.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let decided = tx.execute(
            r#"
            UPDATE games
            SET result = ?1, end_reason = ?2, fen = ?3, move_log = ?4, ended_at = ?5
            WHERE id = ?6 AND result = 'pending'
            "#,
            params![outcome.result, outcome.reason, fen, move_log, Self::now(), id],
        )?;
        if decided == 0 {
            let err = if Self::game_exists(&tx, id)? {
                Error::SettlementConflict(id)
            } else {
                Error::GameNotFound(id)
            };
            tracing::warn!(game_id = id, error = %err, "settlement rejected");
            return Err(err);
        }

        let (white_id, black_id): (PlayerId, PlayerId) = tx.query_row(
            "SELECT white_player_id, black_player_id FROM games WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let white = Self::player_in(&tx, white_id)?.ok_or(Error::PlayerNotFound(white_id))?;
        let black = Self::player_in(&tx, black_id)?.ok_or(Error::PlayerNotFound(black_id))?;

        let settlement = rating::settle(&white, &black, outcome.result, policy);
        Self::adjust_in(&tx, white.id, settlement.white.new_rating, settlement.white.new_coins)?;
        Self::adjust_in(&tx, black.id, settlement.black.new_rating, settlement.black.new_coins)?;

        tx.commit()?;
        tracing::info!(
            game_id = id,
            result = outcome.result.as_str(),
            reason = outcome.reason.as_str(),
            white_rating = settlement.white.new_rating,
            black_rating = settlement.black.new_rating,
            "game settled"
        );
        Ok(settlement)
    }

    fn adjust_rating_and_currency(&self, player: PlayerId, rating: i64, coins: i64) -> Result<()> {
        Self::adjust_in(&self.conn.lock(), player, rating, coins)
    }

    fn matches_for_player(&self, player: PlayerId) -> Result<Vec<MatchSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT g.id, g.game_type, g.result, g.end_reason, g.white_player_id,
                   CASE WHEN g.white_player_id = ?1 THEN g.black_player_id ELSE g.white_player_id END,
                   p.nickname, g.started_at, g.ended_at
            FROM games g
            JOIN players p
              ON p.id = CASE WHEN g.white_player_id = ?1 THEN g.black_player_id ELSE g.white_player_id END
            WHERE g.white_player_id = ?1 OR g.black_player_id = ?1
            ORDER BY g.started_at DESC, g.id DESC
            "#,
        )?;

        let matches = stmt
            .query_map(params![player], |row| {
                let white: PlayerId = row.get(4)?;
                Ok(MatchSummary {
                    game_id: row.get(0)?,
                    game_type: row.get(1)?,
                    result: result_column(row, 2)?,
                    end_reason: row.get(3)?,
                    my_color: if white == player {
                        Color::White
                    } else {
                        Color::Black
                    },
                    opponent_id: row.get(5)?,
                    opponent_nickname: row.get(6)?,
                    started_at: row.get(7)?,
                    ended_at: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(matches)
    }

    fn current_game_for_player(&self, player: PlayerId) -> Result<Option<GameId>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                r#"
                SELECT id FROM games
                WHERE (white_player_id = ?1 OR black_player_id = ?1) AND result = 'pending'
                ORDER BY id DESC LIMIT 1
                "#,
                params![player],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::STARTING_FEN;

    fn setup() -> (Database, PlayerId, PlayerId, GameId) {
        let db = Database::open_in_memory().unwrap();
        let white = db.create_player("alice", 1500, 0).unwrap();
        let black = db.create_player("bob", 1500, 20).unwrap();
        let game = db
            .create_game(white, black, GameKind::Rank, STARTING_FEN)
            .unwrap();
        (db, white, black, game)
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_create_and_get_game() {
        let (db, white, black, game) = setup();
        let stored = db.get_game(game).unwrap().unwrap();
        assert_eq!(stored.white_player_id, white);
        assert_eq!(stored.black_player_id, black);
        assert_eq!(stored.game_type, GameKind::Rank);
        assert!(stored.is_pending());
        assert_eq!(stored.fen, STARTING_FEN);
        assert!(db.get_game(game + 100).unwrap().is_none());
        assert_eq!(db.current_game_for_player(black).unwrap(), Some(game));
    }

    #[test]
    fn test_record_board() {
        let (db, _, _, game) = setup();
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        assert!(db.record_board(game, STARTING_FEN, fen, "e2e4").unwrap());
        let stored = db.get_game(game).unwrap().unwrap();
        assert_eq!(stored.fen, fen);
        assert_eq!(stored.move_log, "e2e4");

        // a second writer working from the old position loses
        assert!(!db.record_board(game, STARTING_FEN, fen, "d2d4").unwrap());
        assert_eq!(db.get_game(game).unwrap().unwrap().move_log, "e2e4");

        assert!(matches!(
            db.record_board(game + 1, STARTING_FEN, fen, ""),
            Err(Error::GameNotFound(_))
        ));
    }

    #[test]
    fn test_settlement_applies_once() {
        let (db, white, black, game) = setup();
        let outcome = GameOutcome::new(GameResult::WhiteWin, EndReason::Resign);
        let policy = SettlementPolicy::default();

        let s = db
            .commit_game_result(game, outcome, STARTING_FEN, "", &policy)
            .unwrap();
        assert_eq!(s.white.new_rating, 1516);

        let again = db.commit_game_result(
            game,
            GameOutcome::new(GameResult::BlackWin, EndReason::Checkmate),
            STARTING_FEN,
            "",
            &policy,
        );
        assert!(matches!(again, Err(Error::SettlementConflict(_))));

        let alice = db.get_player(white).unwrap().unwrap();
        let bob = db.get_player(black).unwrap().unwrap();
        assert_eq!((alice.rating, alice.coins), (1516, 100));
        assert_eq!((bob.rating, bob.coins), (1484, 20));

        let stored = db.get_game(game).unwrap().unwrap();
        assert_eq!(stored.outcome(), Some(outcome));
        assert!(stored.ended_at.is_some());
        assert!(matches!(
            db.record_board(game, STARTING_FEN, STARTING_FEN, ""),
            Err(Error::GameAlreadyFinished(_))
        ));
        assert_eq!(db.current_game_for_player(white).unwrap(), None);
    }

    #[test]
    fn test_failed_settlement_rolls_back() {
        let (db, white, black, game) = setup();
        // Opponent row vanishes, so the second rating write cannot happen.
        db.conn
            .lock()
            .execute_batch(&format!(
                "PRAGMA foreign_keys = OFF; DELETE FROM players WHERE id = {}",
                black
            ))
            .unwrap();

        let res = db.commit_game_result(
            game,
            GameOutcome::new(GameResult::Draw, EndReason::Agreement),
            STARTING_FEN,
            "",
            &SettlementPolicy::default(),
        );
        assert!(matches!(res, Err(Error::PlayerNotFound(id)) if id == black));
        assert!(db.get_game(game).unwrap().unwrap().is_pending());
        assert_eq!(db.get_player(white).unwrap().unwrap().coins, 0);
    }

    #[test]
    fn test_match_history() {
        let (db, white, black, game) = setup();
        let carol = db.create_player("carol", 1400, 0).unwrap();
        let second = db
            .create_game(carol, white, GameKind::Private, STARTING_FEN)
            .unwrap();
        db.commit_game_result(
            game,
            GameOutcome::new(GameResult::Draw, EndReason::Stalemate),
            STARTING_FEN,
            "",
            &SettlementPolicy::default(),
        )
        .unwrap();

        let history = db.matches_for_player(white).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].game_id, second);
        assert_eq!(history[0].my_color, Color::Black);
        assert_eq!(history[0].opponent_nickname, "carol");
        assert_eq!(history[0].result, None);
        assert_eq!(history[1].opponent_id, black);
        assert_eq!(history[1].result, Some(GameResult::Draw));
        assert!(db.matches_for_player(12345).unwrap().is_empty());
    }

    #[test]
    fn test_adjust_unknown_player() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.adjust_rating_and_currency(7, 1500, 0),
            Err(Error::PlayerNotFound(7))
        ));
    }
}
