//! Rank-queue pairing and private rooms

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::board::Color;
use crate::cache::FastCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{Channel, Event, Notifier, WaitOutcome};
use crate::session::SessionStore;
use crate::storage::{DurableStore, GameId, GameKind, PlayerId, PlayerProfile};

const RANK_QUEUE: &str = "rank_queue";
/// No 0/O or 1/I so codes survive being read aloud.
const ROOM_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ROOM_CODE_ATTEMPTS: usize = 8;

/// A pairing as seen by one of the two players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub game_id: GameId,
    pub color: Color,
    pub opponent: PlayerProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(MatchInfo),
    /// Queued; the pairing will arrive on the player's result channel
    Pending,
}

fn room_key(code: &str) -> String {
    format!("room:{}", code)
}

/// Outlives the room itself so the creator's result stays private after a join
fn room_owner_key(code: &str) -> String {
    format!("room_owner:{}", code)
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn random_room_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ROOM_ALPHABET[rng.random_range(0..ROOM_ALPHABET.len())] as char)
        .collect()
}

#[derive(Clone)]
pub struct Matchmaker {
    db: Arc<dyn DurableStore>,
    cache: Arc<dyn FastCache>,
    sessions: SessionStore,
    notifier: Notifier,
    rating_band: i64,
    room_ttl: Duration,
    result_ttl: Duration,
    room_code_len: usize,
}

impl Matchmaker {
    pub fn new(
        db: Arc<dyn DurableStore>,
        cache: Arc<dyn FastCache>,
        sessions: SessionStore,
        notifier: Notifier,
        config: &Config,
    ) -> Self {
        Self {
            db,
            cache,
            sessions,
            notifier,
            rating_band: config.rating_band,
            room_ttl: config.room_ttl,
            result_ttl: config.notification_ttl,
            room_code_len: config.room_code_len,
        }
    }

    fn profile(&self, player: PlayerId) -> Result<PlayerProfile> {
        self.db
            .get_player(player)?
            .map(|p| PlayerProfile::from(&p))
            .ok_or(Error::PlayerNotFound(player))
    }

    /// Create the game with random colors and tell the passive side.
    ///
    /// Returns the pairing from the point of view of `requester`.
    async fn pair(
        &self,
        requester: &PlayerProfile,
        other: &PlayerProfile,
        kind: GameKind,
        notify: Channel,
    ) -> Result<MatchInfo> {
        let requester_white: bool = rand::random();
        let (white, black) = if requester_white {
            (requester.id, other.id)
        } else {
            (other.id, requester.id)
        };
        let session = self.sessions.create(white, black, kind).await?;
        let requester_color = if requester_white {
            Color::White
        } else {
            Color::Black
        };

        let theirs = MatchInfo {
            game_id: session.game_id,
            color: requester_color.opposite(),
            opponent: requester.clone(),
        };
        self.notifier.push(&notify, &Event::MatchFound(theirs)).await?;

        tracing::info!(
            game_id = session.game_id,
            white,
            black,
            kind = kind.as_str(),
            "players paired"
        );
        Ok(MatchInfo {
            game_id: session.game_id,
            color: requester_color,
            opponent: other.clone(),
        })
    }

    /// Join the rank queue and try to pair with anyone inside the rating band.
    ///
    /// Removal of both players is all-or-nothing, so when two compatible
    /// players ask at once only one of them creates the game.
    pub async fn request_rank_match(&self, player: PlayerId) -> Result<MatchOutcome> {
        let me = self.profile(player)?;
        let my_member = player.to_string();
        self.cache.zadd(RANK_QUEUE, &my_member, me.rating).await?;

        let candidates = self
            .cache
            .zrange_by_score(RANK_QUEUE, me.rating - self.rating_band, me.rating + self.rating_band)
            .await?;

        for (member, _) in candidates {
            if member == my_member {
                continue;
            }
            let Ok(opponent_id) = member.parse::<PlayerId>() else {
                tracing::warn!(member = %member, "dropping malformed queue entry");
                self.cache.zrem(RANK_QUEUE, &member).await?;
                continue;
            };

            if self.cache.zrem_all(RANK_QUEUE, &[my_member.as_str(), member.as_str()]).await? {
                let opponent = match self.profile(opponent_id) {
                    Ok(p) => p,
                    Err(e) => {
                        self.cache.zadd(RANK_QUEUE, &my_member, me.rating).await?;
                        return Err(e);
                    }
                };
                let info = self
                    .pair(&me, &opponent, GameKind::Rank, Channel::Player(opponent_id))
                    .await?;
                return Ok(MatchOutcome::Matched(info));
            }

            if !self.is_queued(&my_member, me.rating).await? {
                // Someone else paired with us first; the result is on our channel.
                return Ok(MatchOutcome::Pending);
            }
        }

        tracing::debug!(player, rating = me.rating, "queued for rank match");
        Ok(MatchOutcome::Pending)
    }

    async fn is_queued(&self, member: &str, rating: i64) -> Result<bool> {
        Ok(self
            .cache
            .zrange_by_score(RANK_QUEUE, rating, rating)
            .await?
            .iter()
            .any(|(m, _)| m == member))
    }

    pub async fn wait_for_match(&self, player: PlayerId, cancel: &CancellationToken) -> Result<WaitOutcome> {
        self.notifier.wait(&Channel::Player(player), cancel).await
    }

    /// Leave the rank queue; false if the player was not waiting
    pub async fn cancel_search(&self, player: PlayerId) -> Result<bool> {
        let removed = self.cache.zrem(RANK_QUEUE, &player.to_string()).await?;
        if removed {
            tracing::debug!(player, "left rank queue");
        }
        Ok(removed)
    }

    pub async fn create_room(&self, creator: PlayerId) -> Result<String> {
        self.profile(creator)?;
        for _ in 0..ROOM_CODE_ATTEMPTS {
            let code = random_room_code(self.room_code_len);
            let key = room_key(&code);
            let owner_key = room_owner_key(&code);
            if !self.cache.hash_get_all(&owner_key).await?.is_empty() {
                continue;
            }
            self.cache
                .hash_set(&owner_key, &[("creator", creator.to_string())])
                .await?;
            self.cache
                .expire(&owner_key, self.room_ttl + self.result_ttl)
                .await?;
            self.cache
                .hash_set(&key, &[("creator", creator.to_string())])
                .await?;
            self.cache.expire(&key, self.room_ttl).await?;
            tracing::info!(creator, code = %code, "room created");
            return Ok(code);
        }
        Err(Error::Config("could not allocate a free room code".into()))
    }

    /// Consume a room code and start the private game
    pub async fn join_room(&self, code: &str, player: PlayerId) -> Result<MatchInfo> {
        let code = normalize_code(code);
        let key = room_key(&code);

        let creator = self
            .cache
            .hash_get(&key, "creator")
            .await?
            .ok_or_else(|| Error::RoomNotFound(code.clone()))?;
        if creator == player.to_string() {
            return Err(Error::OwnRoom);
        }
        let me = self.profile(player)?;

        let room = self.cache.hash_take(&key).await?;
        let creator_id: PlayerId = room
            .get("creator")
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| Error::RoomNotFound(code.clone()))?;
        let creator = self.profile(creator_id)?;

        self.pair(&me, &creator, GameKind::Private, Channel::Room(code))
            .await
    }

    /// Long-poll used by a room creator until someone joins. Only the
    /// creator may listen, before and after the room is consumed.
    pub async fn wait_room(&self, code: &str, player: PlayerId, cancel: &CancellationToken) -> Result<WaitOutcome> {
        let code = normalize_code(code);
        let creator = self
            .cache
            .hash_get(&room_owner_key(&code), "creator")
            .await?
            .ok_or_else(|| Error::RoomNotFound(code.clone()))?;
        if creator != player.to_string() {
            return Err(Error::NotAParticipant);
        }
        self.notifier.wait(&Channel::Room(code), cancel).await
    }
}
