//! # guidon-store
//!
//! SQLite persistence for the Guidon bot.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` with typed helpers for users, rate-limit windows,
//! the canvas and snapshots, plus an async [`DbHandle`] that runs those
//! helpers on tokio's blocking pool.
//!
//! Contended records (a user's rate window, a pixel and the canvas
//! aggregate) are only ever mutated inside a single `IMMEDIATE` transaction.

pub mod canvas;
pub mod database;
pub mod handle;
pub mod migrations;
pub mod models;
pub mod rate_limits;
pub mod snapshots;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use handle::DbHandle;
pub use models::*;
