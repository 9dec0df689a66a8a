//! Purchasing service errors
//!
//! Expected kinds (validation, not found, conflict, invalid transition) go back
//! to the caller untouched. Busy storage is retried by `db::retry`; everything
//! else is logged where it is converted to an [`AppError`].

use shared::error::{AppError, ErrorCode};
use shared::models::{OrderStatus, PriceType, PurchaseStatus};
use thiserror::Error;

use crate::db::repository::RepoError;

/// Coarse classification used by callers and the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidTransition,
    Consistency,
    Storage,
    StorageBusy,
    Serialization,
}

#[derive(Debug, Error)]
pub enum PurchasingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order {0} has no line items")]
    OrderEmpty(i64),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Order item not found: {0}")]
    ItemNotFound(i64),

    #[error("Purchase not found: {0}")]
    PurchaseNotFound(i64),

    #[error("No open lot with id {0}")]
    LotNotFound(String),

    #[error("No {price_type} price recorded for {product} ({unit})")]
    PriceHistoryEmpty {
        product: String,
        unit: String,
        price_type: PriceType,
    },

    #[error("Order {order_id} is {status}, its lines cannot be changed")]
    ImmutableOrder { order_id: i64, status: OrderStatus },

    #[error("Lot {lot_id} is already claimed by an active purchase")]
    LotAlreadyClaimed {
        lot_id: String,
        purchase_id: Option<i64>,
    },

    #[error("Lot {0} no longer matches open demand, reload lots and retry")]
    StaleLot(String),

    #[error("Order item {item_id} already belongs to another purchase")]
    LineAlreadyPurchased { item_id: i64 },

    #[error("Order {order_id} is {status} and cannot receive purchase prices")]
    OrderNotAllocatable { order_id: i64, status: OrderStatus },

    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidOrderTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Purchase {purchase_id} is {status}, cannot {action}")]
    InvalidPurchaseTransition {
        purchase_id: i64,
        status: PurchaseStatus,
        action: &'static str,
    },

    #[error(
        "Allocation mismatch on purchase {purchase_id}: allocated {allocated} over {lines} lines, expected {expected}"
    )]
    Consistency {
        purchase_id: i64,
        allocated: f64,
        expected: f64,
        lines: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] RepoError),

    #[error("Storage still busy after {attempts} attempts ({operation})")]
    StorageBusy {
        operation: &'static str,
        attempts: u32,
    },

    #[error("Deadline exceeded before retrying {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for PurchasingError {
    fn from(err: sqlx::Error) -> Self {
        PurchasingError::Storage(err.into())
    }
}

impl From<serde_json::Error> for PurchasingError {
    fn from(err: serde_json::Error) -> Self {
        PurchasingError::Serialization(err.to_string())
    }
}

impl PurchasingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PurchasingError::Validation(_) | PurchasingError::OrderEmpty(_) => {
                ErrorKind::Validation
            }
            PurchasingError::OrderNotFound(_)
            | PurchasingError::ItemNotFound(_)
            | PurchasingError::PurchaseNotFound(_)
            | PurchasingError::LotNotFound(_)
            | PurchasingError::PriceHistoryEmpty { .. } => ErrorKind::NotFound,
            PurchasingError::ImmutableOrder { .. }
            | PurchasingError::LotAlreadyClaimed { .. }
            | PurchasingError::StaleLot(_)
            | PurchasingError::LineAlreadyPurchased { .. }
            | PurchasingError::OrderNotAllocatable { .. } => ErrorKind::Conflict,
            PurchasingError::InvalidOrderTransition { .. }
            | PurchasingError::InvalidPurchaseTransition { .. } => ErrorKind::InvalidTransition,
            PurchasingError::Consistency { .. } => ErrorKind::Consistency,
            PurchasingError::Storage(e) => match e {
                RepoError::NotFound(_) => ErrorKind::NotFound,
                RepoError::Duplicate(_) => ErrorKind::Conflict,
                RepoError::Validation(_) => ErrorKind::Validation,
                RepoError::Busy(_) => ErrorKind::StorageBusy,
                RepoError::Serialization(_) => ErrorKind::Serialization,
                RepoError::Database(_) => ErrorKind::Storage,
            },
            PurchasingError::StorageBusy { .. } | PurchasingError::DeadlineExceeded { .. } => {
                ErrorKind::StorageBusy
            }
            PurchasingError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Transient contention, worth another attempt of the whole transaction
    pub fn is_busy(&self) -> bool {
        matches!(self, PurchasingError::Storage(e) if e.is_busy())
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            PurchasingError::Validation(_) => ErrorCode::ValidationFailed,
            PurchasingError::OrderEmpty(_) => ErrorCode::OrderEmpty,
            PurchasingError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            PurchasingError::ItemNotFound(_) => ErrorCode::OrderItemNotFound,
            PurchasingError::PurchaseNotFound(_) => ErrorCode::PurchaseNotFound,
            PurchasingError::LotNotFound(_) => ErrorCode::LotNotFound,
            PurchasingError::PriceHistoryEmpty { .. } => ErrorCode::PriceHistoryEmpty,
            PurchasingError::ImmutableOrder { .. } => ErrorCode::OrderNotEditable,
            PurchasingError::LotAlreadyClaimed { .. } => ErrorCode::LotAlreadyClaimed,
            PurchasingError::StaleLot(_) => ErrorCode::LotStale,
            PurchasingError::LineAlreadyPurchased { .. } => ErrorCode::LineAlreadyPurchased,
            PurchasingError::OrderNotAllocatable { .. } => ErrorCode::OrderNotAllocatable,
            PurchasingError::InvalidOrderTransition { .. } => ErrorCode::OrderInvalidTransition,
            PurchasingError::InvalidPurchaseTransition { .. } => {
                ErrorCode::PurchaseInvalidTransition
            }
            PurchasingError::Consistency { .. } => ErrorCode::AllocationMismatch,
            PurchasingError::Storage(e) => match e {
                RepoError::NotFound(_) => ErrorCode::NotFound,
                RepoError::Duplicate(_) => ErrorCode::AlreadyExists,
                RepoError::Validation(_) => ErrorCode::ValidationFailed,
                RepoError::Busy(_) => ErrorCode::SystemBusy,
                RepoError::Serialization(_) | RepoError::Database(_) => ErrorCode::DatabaseError,
            },
            PurchasingError::StorageBusy { .. } => ErrorCode::SystemBusy,
            PurchasingError::DeadlineExceeded { .. } => ErrorCode::TimeoutError,
            PurchasingError::Serialization(_) => ErrorCode::InternalError,
        }
    }
}

impl From<PurchasingError> for AppError {
    fn from(err: PurchasingError) -> Self {
        let code = err.error_code();
        match err.kind() {
            ErrorKind::Validation
            | ErrorKind::NotFound
            | ErrorKind::Conflict
            | ErrorKind::InvalidTransition => AppError::with_message(code, err.to_string()),
            ErrorKind::Consistency => {
                tracing::error!(error = %err, "Allocation rolled back");
                match err {
                    PurchasingError::Consistency {
                        purchase_id,
                        allocated,
                        expected,
                        lines,
                    } => AppError::new(code)
                        .with_detail("purchase_id", purchase_id)
                        .with_detail("allocated", allocated)
                        .with_detail("expected", expected)
                        .with_detail("lines", lines),
                    _ => AppError::new(code),
                }
            }
            // Internal details stay in the log
            _ => {
                tracing::error!(error = %err, error_code = ?code, "Purchasing operation failed");
                AppError::new(code)
            }
        }
    }
}

pub type PurchasingResult<T> = Result<T, PurchasingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            PurchasingError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(PurchasingError::OrderEmpty(1).kind(), ErrorKind::Validation);
        assert_eq!(
            PurchasingError::LotAlreadyClaimed {
                lot_id: "abc".into(),
                purchase_id: Some(1)
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PurchasingError::StaleLot("abc".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PurchasingError::Storage(RepoError::Duplicate("unique".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PurchasingError::Storage(RepoError::Busy("locked".into())).kind(),
            ErrorKind::StorageBusy
        );
    }

    #[test]
    fn test_only_storage_busy_is_retryable() {
        assert!(PurchasingError::Storage(RepoError::Busy("locked".into())).is_busy());
        assert!(!PurchasingError::StorageBusy {
            operation: "x",
            attempts: 5
        }
        .is_busy());
        assert!(!PurchasingError::Storage(RepoError::Database("io".into())).is_busy());
    }

    #[test]
    fn test_app_error_mapping() {
        let err: AppError = PurchasingError::LotAlreadyClaimed {
            lot_id: "abc".into(),
            purchase_id: None,
        }
        .into();
        assert_eq!(err.code, ErrorCode::LotAlreadyClaimed);
        assert_eq!(err.http_status(), http::StatusCode::CONFLICT);

        let err: AppError = PurchasingError::InvalidOrderTransition {
            order_id: 1,
            from: OrderStatus::Completed,
            to: OrderStatus::Sent,
        }
        .into();
        assert_eq!(err.code, ErrorCode::OrderInvalidTransition);
        assert!(err.message.contains("COMPLETED"));

        let err: AppError = PurchasingError::StorageBusy {
            operation: "complete_purchase",
            attempts: 5,
        }
        .into();
        assert_eq!(err.code, ErrorCode::SystemBusy);
        assert_eq!(err.http_status(), http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
