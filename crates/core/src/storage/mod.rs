//! SQLite storage for players and games

mod db;
mod models;

pub use db::{Database, DurableStore};
pub use models::*;
