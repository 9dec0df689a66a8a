//! Price History Module
//!
//! Append-only log of realized purchase/sale prices plus trend and margin
//! analytics over it.

pub mod history;

pub use history::PriceHistoryRecorder;
