//! Data models
//!
//! Shared between procurement-server and the bot/UI layer (via API).
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (SQLite INTEGER PRIMARY KEY), timestamps are Unix millis.

pub mod lot;
pub mod order;
pub mod price_history;
pub mod purchase;

// Re-exports
pub use lot::*;
pub use order::*;
pub use price_history::*;
pub use purchase::*;
