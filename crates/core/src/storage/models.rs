//! Database models

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::board::Color;
use crate::error::Error;

pub type PlayerId = i64;
pub type GameId = i64;

/// How the two players were paired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Rank,
    Private,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Rank => "rank",
            GameKind::Private => "private",
        }
    }
}

impl FromStr for GameKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "rank" => Ok(GameKind::Rank),
            "private" => Ok(GameKind::Private),
            other => Err(Error::Format(format!("unknown game type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameResult::WhiteWin => "white_win",
            GameResult::BlackWin => "black_win",
            GameResult::Draw => "draw",
        }
    }

    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => GameResult::WhiteWin,
            Color::Black => GameResult::BlackWin,
        }
    }

    /// 1 for a win, 0.5 for a draw, 0 for a loss
    pub fn score_for(&self, color: Color) -> f64 {
        match (self, color) {
            (GameResult::Draw, _) => 0.5,
            (GameResult::WhiteWin, Color::White) | (GameResult::BlackWin, Color::Black) => 1.0,
            _ => 0.0,
        }
    }
}

impl FromStr for GameResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "white_win" => Ok(GameResult::WhiteWin),
            "black_win" => Ok(GameResult::BlackWin),
            "draw" => Ok(GameResult::Draw),
            other => Err(Error::Format(format!("unknown game result '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    Resign,
    Agreement,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::Resign => "resign",
            EndReason::Agreement => "agreement",
        }
    }
}

impl FromStr for EndReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "checkmate" => Ok(EndReason::Checkmate),
            "stalemate" => Ok(EndReason::Stalemate),
            "resign" => Ok(EndReason::Resign),
            "agreement" => Ok(EndReason::Agreement),
            other => Err(Error::Format(format!("unknown end reason '{}'", other))),
        }
    }
}

macro_rules! sql_text_enum {
    ($($ty:ty),*) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: Error| FromSqlError::Other(Box::from(e.to_string())))
            }
        }
    )*};
}

sql_text_enum!(GameKind, GameResult, EndReason);

/// Final result of a game and why it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    pub result: GameResult,
    pub reason: EndReason,
}

impl GameOutcome {
    pub fn new(result: GameResult, reason: EndReason) -> Self {
        Self { result, reason }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlayer {
    pub id: PlayerId,
    pub nickname: String,
    pub rating: i64,
    pub coins: i64,
    pub created_at: i64,
}

/// Public view of an opponent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub nickname: String,
    pub rating: i64,
}

impl From<&StoredPlayer> for PlayerProfile {
    fn from(player: &StoredPlayer) -> Self {
        Self {
            id: player.id,
            nickname: player.nickname.clone(),
            rating: player.rating,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGame {
    pub id: GameId,
    pub white_player_id: PlayerId,
    pub black_player_id: PlayerId,
    pub game_type: GameKind,
    /// `None` while the game is still being played
    pub result: Option<GameResult>,
    pub end_reason: Option<EndReason>,
    pub fen: String,
    pub move_log: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

impl StoredGame {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        Some(GameOutcome::new(self.result?, self.end_reason?))
    }

    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        if player == self.white_player_id {
            Some(Color::White)
        } else if player == self.black_player_id {
            Some(Color::Black)
        } else {
            None
        }
    }
}

/// One row of a player's match history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub game_id: GameId,
    pub game_type: GameKind,
    pub result: Option<GameResult>,
    pub end_reason: Option<EndReason>,
    pub my_color: Color,
    pub opponent_id: PlayerId,
    pub opponent_nickname: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSettlement {
    pub player_id: PlayerId,
    pub old_rating: i64,
    pub new_rating: i64,
    pub coins_awarded: i64,
    pub new_coins: i64,
}

/// Rating and currency changes applied when a game is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub white: PlayerSettlement,
    pub black: PlayerSettlement,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_scores() {
        assert_eq!(GameResult::WhiteWin.score_for(Color::White), 1.0);
        assert_eq!(GameResult::WhiteWin.score_for(Color::Black), 0.0);
        assert_eq!(GameResult::Draw.score_for(Color::Black), 0.5);
        assert_eq!(GameResult::win_for(Color::Black), GameResult::BlackWin);
    }

    #[test]
    fn test_text_codes() {
        assert_eq!("black_win".parse::<GameResult>().unwrap(), GameResult::BlackWin);
        assert_eq!(EndReason::Agreement.as_str(), "agreement");
        assert!("pending".parse::<GameResult>().is_err());
        assert_eq!(
            serde_json::to_string(&GameOutcome::new(GameResult::Draw, EndReason::Stalemate)).unwrap(),
            r#"{"result":"draw","reason":"stalemate"}"#
        );
    }
}
