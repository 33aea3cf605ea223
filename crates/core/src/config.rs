//! Runtime configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rating::SettlementPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    /// Lifetime of a cached game session after its last write
    pub game_ttl: Duration,
    pub notification_ttl: Duration,
    /// Undelivered events kept per channel; older ones are dropped
    pub notification_backlog: usize,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub rating_band: i64,
    pub k_factor: f64,
    pub win_award: i64,
    pub room_ttl: Duration,
    pub room_code_len: usize,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("chess_lobby.db"),
            game_ttl: Duration::from_secs(3600),
            notification_ttl: Duration::from_secs(300),
            notification_backlog: 16,
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            rating_band: 100,
            k_factor: 32.0,
            win_award: 100,
            room_ttl: Duration::from_secs(600),
            room_code_len: 6,
            listen_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by `CHESS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("CHESS_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("CHESS_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        let secs = |key: &str, current: Duration| -> Result<Duration> {
            Ok(parse_var::<u64>(&lookup, key)?.map_or(current, Duration::from_secs))
        };
        config.game_ttl = secs("CHESS_GAME_TTL_SECS", config.game_ttl)?;
        config.notification_ttl = secs("CHESS_NOTIFICATION_TTL_SECS", config.notification_ttl)?;
        config.wait_timeout = secs("CHESS_WAIT_TIMEOUT_SECS", config.wait_timeout)?;
        config.poll_interval = secs("CHESS_POLL_INTERVAL_SECS", config.poll_interval)?;
        config.room_ttl = secs("CHESS_ROOM_TTL_SECS", config.room_ttl)?;

        if let Some(v) = parse_var(&lookup, "CHESS_NOTIFICATION_BACKLOG")? {
            config.notification_backlog = v;
        }
        if let Some(v) = parse_var(&lookup, "CHESS_RATING_BAND")? {
            config.rating_band = v;
        }
        if let Some(v) = parse_var(&lookup, "CHESS_K_FACTOR")? {
            config.k_factor = v;
        }
        if let Some(v) = parse_var(&lookup, "CHESS_WIN_AWARD")? {
            config.win_award = v;
        }
        if let Some(v) = parse_var(&lookup, "CHESS_ROOM_CODE_LEN")? {
            config.room_code_len = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        if self.notification_backlog == 0 {
            return Err(Error::Config("notification backlog must hold at least one event".into()));
        }
        if self.room_code_len == 0 {
            return Err(Error::Config("room code length must be positive".into()));
        }
        Ok(())
    }

    pub fn settlement_policy(&self) -> SettlementPolicy {
        SettlementPolicy {
            k_factor: self.k_factor,
            win_award: self.win_award,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}
