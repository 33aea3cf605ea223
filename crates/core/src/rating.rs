//! Elo rating and coin awards applied when a game is decided

use serde::{Deserialize, Serialize};

use crate::board::Color;
use crate::storage::{GameResult, PlayerSettlement, Settlement, StoredPlayer};

pub const DEFAULT_K_FACTOR: f64 = 32.0;
pub const DEFAULT_WIN_AWARD: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementPolicy {
    pub k_factor: f64,
    /// Coins for a win; a draw pays half
    pub win_award: i64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            k_factor: DEFAULT_K_FACTOR,
            win_award: DEFAULT_WIN_AWARD,
        }
    }
}

/// Probability-like expectation of `rating` scoring against `opponent`
pub fn expected_score(rating: i64, opponent: i64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) as f64 / 400.0))
}

pub fn rating_delta(rating: i64, opponent: i64, score: f64, k_factor: f64) -> f64 {
    k_factor * (score - expected_score(rating, opponent))
}

pub fn new_rating(rating: i64, opponent: i64, score: f64, k_factor: f64) -> i64 {
    (rating as f64 + rating_delta(rating, opponent, score, k_factor)).round() as i64
}

pub fn coin_award(score: f64, win_award: i64) -> i64 {
    if score >= 1.0 {
        win_award
    } else if score > 0.0 {
        win_award / 2
    } else {
        0
    }
}

/// Compute both players' new ratings and balances.
///
/// Both ratings are derived from the pre-game values, so the order the
/// rows are written in does not matter.
pub fn settle(
    white: &StoredPlayer,
    black: &StoredPlayer,
    result: GameResult,
    policy: &SettlementPolicy,
) -> Settlement {
    let side = |me: &StoredPlayer, opponent: &StoredPlayer, color: Color| {
        let score = result.score_for(color);
        let coins_awarded = coin_award(score, policy.win_award);
        PlayerSettlement {
            player_id: me.id,
            old_rating: me.rating,
            new_rating: new_rating(me.rating, opponent.rating, score, policy.k_factor),
            coins_awarded,
            new_coins: me.coins + coins_awarded,
        }
    };

    Settlement {
        white: side(white, black, Color::White),
        black: side(black, white, Color::Black),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: i64, rating: i64, coins: i64) -> StoredPlayer {
        StoredPlayer {
            id,
            nickname: format!("p{}", id),
            rating,
            coins,
            created_at: 0,
        }
    }

    #[test]
    fn test_expected_score_symmetry() {
        assert!((expected_score(1500, 1500) - 0.5).abs() < 1e-9);
        let a = expected_score(1600, 1400);
        let b = expected_score(1400, 1600);
        assert!((a + b - 1.0).abs() < 1e-9);
        assert!(a > 0.75 && a < 0.77);
    }

    #[test]
    fn test_equal_players_win() {
        let s = settle(
            &player(1, 1500, 0),
            &player(2, 1500, 10),
            GameResult::WhiteWin,
            &SettlementPolicy::default(),
        );
        assert_eq!(s.white.new_rating, 1516);
        assert_eq!(s.black.new_rating, 1484);
        assert_eq!(s.white.new_coins, 100);
        assert_eq!(s.black.new_coins, 10);
        assert_eq!(s.black.coins_awarded, 0);
    }

    #[test]
    fn test_draw_pays_half_and_moves_toward_favourite() {
        let s = settle(
            &player(1, 1600, 0),
            &player(2, 1400, 0),
            GameResult::Draw,
            &SettlementPolicy::default(),
        );
        assert!(s.white.new_rating < 1600);
        assert!(s.black.new_rating > 1400);
        assert_eq!(s.white.coins_awarded, 50);
        assert_eq!(s.black.coins_awarded, 50);
    }

    #[test]
    fn test_upset_gains_more() {
        let s = settle(
            &player(1, 1600, 0),
            &player(2, 1400, 0),
            GameResult::BlackWin,
            &SettlementPolicy::default(),
        );
        assert_eq!(s.black.new_rating, 1424);
        assert_eq!(s.white.new_rating, 1576);
    }
}
