//! Per-recipient event queues and the long-poll wait

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::board::{Color, Move};
use crate::cache::FastCache;
use crate::config::Config;
use crate::error::Result;
use crate::matchmaking::MatchInfo;
use crate::rules::BoardStatus;
use crate::storage::{GameId, GameOutcome, PlayerId};

/// Where an event is delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Updates for one side of a game
    Game { game_id: GameId, color: Color },
    /// Rank-queue pairing results for a waiting player
    Player(PlayerId),
    /// Pairing result for the creator of a private room
    Room(String),
}

impl Channel {
    pub fn key(&self) -> String {
        match self {
            Channel::Game { game_id, color } => format!("game_updates:{}:{}", game_id, color.as_char()),
            Channel::Player(id) => format!("match_result:{}", id),
            Channel::Room(code) => format!("room_result:{}", code),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Move {
        game_id: GameId,
        #[serde(rename = "move")]
        mv: Move,
        fen: String,
        status: BoardStatus,
        current_turn: Color,
    },
    DrawOffered {
        game_id: GameId,
        by: Color,
    },
    DrawDeclined {
        game_id: GameId,
        by: Color,
    },
    GameOver {
        game_id: GameId,
        outcome: GameOutcome,
        fen: String,
    },
    MatchFound(MatchInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "event", rename_all = "snake_case")]
pub enum WaitOutcome {
    Event(Event),
    /// Nothing arrived; the caller should wait again
    Timeout,
    /// The waiting client went away
    Cancelled,
}

/// Pushes events to channels and serves bounded waits on them.
#[derive(Clone)]
pub struct Notifier {
    cache: Arc<dyn FastCache>,
    ttl: Duration,
    backlog: usize,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl Notifier {
    pub fn new(cache: Arc<dyn FastCache>, config: &Config) -> Self {
        Self {
            cache,
            ttl: config.notification_ttl,
            backlog: config.notification_backlog,
            wait_timeout: config.wait_timeout,
            poll_interval: config.poll_interval,
        }
    }

    pub async fn push(&self, channel: &Channel, event: &Event) -> Result<()> {
        let key = channel.key();
        let payload = serde_json::to_string(event)?;
        self.cache.list_push(&key, payload, self.backlog).await?;
        self.cache.expire(&key, self.ttl).await?;
        tracing::debug!(channel = %channel, "event queued");
        Ok(())
    }

    /// Block until an event arrives, the wait times out, or `cancel` fires.
    ///
    /// The pop is issued in `poll_interval` slices so a disconnect is also
    /// noticed between slices when the token is not wired to the transport.
    pub async fn wait(&self, channel: &Channel, cancel: &CancellationToken) -> Result<WaitOutcome> {
        let key = channel.key();
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(channel = %channel, "wait timed out");
                return Ok(WaitOutcome::Timeout);
            }
            let slice = self.poll_interval.min(deadline - now);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(channel = %channel, "wait abandoned by client");
                    return Ok(WaitOutcome::Cancelled);
                }
                popped = self.cache.list_pop_blocking(&key, slice) => {
                    if let Some(raw) = popped? {
                        return Ok(WaitOutcome::Event(serde_json::from_str(&raw)?));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn notifier() -> Notifier {
        Notifier::new(Arc::new(MemoryCache::new()), &Config::default())
    }

    fn offer(game_id: GameId) -> Event {
        Event::DrawOffered {
            game_id,
            by: Color::White,
        }
    }

    #[test]
    fn test_channel_keys() {
        let game = Channel::Game {
            game_id: 12,
            color: Color::Black,
        };
        assert_eq!(game.key(), "game_updates:12:b");
        assert_eq!(Channel::Player(3).key(), "match_result:3");
        assert_eq!(Channel::Room("K7QX2M".into()).key(), "room_result:K7QX2M");
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(offer(5)).unwrap();
        assert_eq!(json["type"], "draw_offered");
        assert_eq!(json["by"], "white");
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_event_returns_immediately() {
        let n = notifier();
        let channel = Channel::Player(1);
        n.push(&channel, &offer(1)).await.unwrap();
        let start = Instant::now();
        let got = n.wait(&channel, &CancellationToken::new()).await.unwrap();
        assert_eq!(got, WaitOutcome::Event(offer(1)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_after_thirty_seconds() {
        let n = notifier();
        let start = Instant::now();
        let got = n.wait(&Channel::Player(1), &CancellationToken::new()).await.unwrap();
        assert_eq!(got, WaitOutcome::Timeout);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_abandoned_on_cancel() {
        let n = notifier();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            canceller.cancel();
        });
        let start = Instant::now();
        let got = n.wait(&Channel::Player(1), &token).await.unwrap();
        assert_eq!(got, WaitOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_delivered_mid_wait() {
        let n = notifier();
        let pusher = n.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            pusher.push(&Channel::Player(9), &offer(4)).await.unwrap();
        });
        let got = n.wait(&Channel::Player(9), &CancellationToken::new()).await.unwrap();
        assert_eq!(got, WaitOutcome::Event(offer(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_events_expire() {
        let n = notifier();
        let channel = Channel::Player(2);
        n.push(&channel, &offer(2)).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        let got = n.wait(&channel, &CancellationToken::new()).await.unwrap();
        assert_eq!(got, WaitOutcome::Timeout);
    }
}
