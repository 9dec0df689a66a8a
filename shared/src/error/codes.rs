//! Unified error codes for the procurement workspace
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 5xxx: Purchase errors
//! - 6xxx: Price history errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order item not found
    OrderItemNotFound = 4006,
    /// Order is empty
    OrderEmpty = 4007,
    /// Order lines can no longer be edited
    OrderNotEditable = 4008,
    /// Requested status is not reachable from the current one
    OrderInvalidTransition = 4009,

    // ==================== 5xxx: Purchase ====================
    /// Purchase record not found
    PurchaseNotFound = 5001,
    /// Lot already has an active purchase
    LotAlreadyClaimed = 5002,
    /// Requested purchase status change is not allowed
    PurchaseInvalidTransition = 5003,
    /// No open lot with the given id
    LotNotFound = 5004,
    /// A contributing order cannot receive allocated prices
    OrderNotAllocatable = 5005,
    /// Lot lines are no longer open demand
    LotStale = 5006,
    /// Order line is already priced by another purchase
    LineAlreadyPurchased = 5007,

    // ==================== 6xxx: Price history ====================
    /// No price history for the product
    PriceHistoryEmpty = 6001,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Operation timed out
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
    /// Allocation post-check failed
    AllocationMismatch = 9006,

    // ==================== 94xx: Storage ====================
    /// Storage stayed busy after all retries
    SystemBusy = 9404,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the default message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Order
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::OrderItemNotFound => "Order item not found",
            ErrorCode::OrderEmpty => "Order is empty",
            ErrorCode::OrderNotEditable => "Order lines can no longer be edited",
            ErrorCode::OrderInvalidTransition => "Order status change is not allowed",

            // Purchase
            ErrorCode::PurchaseNotFound => "Purchase not found",
            ErrorCode::LotAlreadyClaimed => "Lot already has an active purchase",
            ErrorCode::PurchaseInvalidTransition => "Purchase status change is not allowed",
            ErrorCode::LotNotFound => "Lot not found",
            ErrorCode::OrderNotAllocatable => "Order cannot receive purchase prices",
            ErrorCode::LotStale => "Lot no longer matches open demand",
            ErrorCode::LineAlreadyPurchased => "Order line already belongs to another purchase",

            // Price history
            ErrorCode::PriceHistoryEmpty => "No price history for this product",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::TimeoutError => "Operation timed out",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::AllocationMismatch => "Purchase allocation does not add up",

            // Storage
            ErrorCode::SystemBusy => "System busy, please retry later",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an unknown u16 value to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Order
            4001 => Ok(ErrorCode::OrderNotFound),
            4006 => Ok(ErrorCode::OrderItemNotFound),
            4007 => Ok(ErrorCode::OrderEmpty),
            4008 => Ok(ErrorCode::OrderNotEditable),
            4009 => Ok(ErrorCode::OrderInvalidTransition),

            // Purchase
            5001 => Ok(ErrorCode::PurchaseNotFound),
            5002 => Ok(ErrorCode::LotAlreadyClaimed),
            5003 => Ok(ErrorCode::PurchaseInvalidTransition),
            5004 => Ok(ErrorCode::LotNotFound),
            5005 => Ok(ErrorCode::OrderNotAllocatable),
            5006 => Ok(ErrorCode::LotStale),
            5007 => Ok(ErrorCode::LineAlreadyPurchased),

            // Price history
            6001 => Ok(ErrorCode::PriceHistoryEmpty),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),
            9006 => Ok(ErrorCode::AllocationMismatch),
            9404 => Ok(ErrorCode::SystemBusy),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}
