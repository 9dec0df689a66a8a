//! Order Module
//!
//! - **store**: OrderStore, line editing and the order status machine
//! - **aggregator**: order total = Σ priced line totals
//! - **money**: decimal arithmetic and input validation for quantities/prices
//!
//! ```text
//! DRAFT → SENT → PROCESSING → APPROVED → PURCHASED → COMPLETED
//!           │         ├──→ REJECTED
//!           └─────────┴──→ CANCELLED
//! ```

pub mod aggregator;
pub mod money;
pub mod store;

pub use store::OrderStore;
