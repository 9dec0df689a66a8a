//! Purchasing Module
//!
//! - **consolidation**: open demand grouped into lots (derived, never stored)
//! - **ledger**: purchase records, claiming and proportional cost allocation
//! - **purchase_entry**: the buyer's completion flow as a state machine
//!
//! ```text
//! orders (SENT) → ConsolidationEngine → lot → PurchaseLedger::create
//!                                              ↓
//!                         complete → price lines → recalc order totals
//! ```

pub mod consolidation;
pub mod ledger;
pub mod purchase_entry;

pub use consolidation::ConsolidationEngine;
pub use ledger::PurchaseLedger;
pub use purchase_entry::{CompletePurchase, PurchaseEntryInput, PurchaseEntryState};
