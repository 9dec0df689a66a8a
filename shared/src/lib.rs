//! Shared types for the procurement workspace
//!
//! Typed records, status enums, error codes and the API response envelope
//! used by the procurement server and by any bot/UI layer that talks to it.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
