//! Purchase entry flow
//!
//! The buyer's completion screen as an explicit state machine. States are
//! plain data so a client can park a half-finished entry and resume it.
//!
//! ```text
//! SelectingLot ──select──▶ EnteringQuantity ──quantity──▶ EnteringTotal
//!                                 ▲                            │ total
//!                                 └────────── back ───── Confirming
//!                                                              │ confirm
//!                                                          Submitted(CompletePurchase)
//! ```
//!
//! `apply` never touches storage; the [`CompletePurchase`] produced on
//! submission is executed by [`PurchaseLedger::submit`](super::PurchaseLedger::submit).

use serde::{Deserialize, Serialize};
use shared::models::{PurchaseComplete, PurchaseRecord};

use crate::core::error::{PurchasingError, PurchasingResult};
use crate::orders::money;

/// The purchase being completed, as shown to the buyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryTarget {
    pub purchase_id: i64,
    pub lot_id: String,
    pub product_name: String,
    pub unit: String,
    pub required_quantity: f64,
}

impl TryFrom<&PurchaseRecord> for EntryTarget {
    type Error = PurchasingError;

    fn try_from(record: &PurchaseRecord) -> PurchasingResult<Self> {
        if !record.status.is_active() {
            return Err(PurchasingError::InvalidPurchaseTransition {
                purchase_id: record.id,
                status: record.status,
                action: "complete",
            });
        }
        Ok(Self {
            purchase_id: record.id,
            lot_id: record.lot_id.clone(),
            product_name: record.product_name.clone(),
            unit: record.unit.clone(),
            required_quantity: record.required_quantity,
        })
    }
}

/// Completion request produced by a confirmed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletePurchase {
    pub purchase_id: i64,
    pub actual_quantity: f64,
    pub actual_total_price: f64,
    pub notes: Option<String>,
}

impl CompletePurchase {
    pub fn into_parts(self) -> (i64, PurchaseComplete) {
        (
            self.purchase_id,
            PurchaseComplete {
                actual_quantity: self.actual_quantity,
                actual_total_price: self.actual_total_price,
                notes: self.notes,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseEntryState {
    SelectingLot,
    EnteringQuantity {
        target: EntryTarget,
    },
    EnteringTotal {
        target: EntryTarget,
        actual_quantity: f64,
    },
    Confirming {
        target: EntryTarget,
        actual_quantity: f64,
        actual_total_price: f64,
        notes: Option<String>,
        /// Preview of the unit price the ledger will allocate
        unit_price: f64,
        shortfall: bool,
    },
    Submitted {
        command: CompletePurchase,
    },
}

impl Default for PurchaseEntryState {
    fn default() -> Self {
        Self::SelectingLot
    }
}

impl PurchaseEntryState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectingLot => "SELECTING_LOT",
            Self::EnteringQuantity { .. } => "ENTERING_QUANTITY",
            Self::EnteringTotal { .. } => "ENTERING_TOTAL",
            Self::Confirming { .. } => "CONFIRMING",
            Self::Submitted { .. } => "SUBMITTED",
        }
    }

    pub fn command(&self) -> Option<&CompletePurchase> {
        match self {
            Self::Submitted { command } => Some(command),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseEntryInput {
    Select { target: EntryTarget },
    EnterQuantity { quantity: f64 },
    EnterTotal { total: f64, notes: Option<String> },
    Confirm,
    Back,
    Reset,
}

impl PurchaseEntryInput {
    fn name(&self) -> &'static str {
        match self {
            Self::Select { .. } => "SELECT",
            Self::EnterQuantity { .. } => "ENTER_QUANTITY",
            Self::EnterTotal { .. } => "ENTER_TOTAL",
            Self::Confirm => "CONFIRM",
            Self::Back => "BACK",
            Self::Reset => "RESET",
        }
    }
}

fn rejected(state: &PurchaseEntryState, input: &PurchaseEntryInput) -> PurchasingError {
    PurchasingError::Validation(format!(
        "{} is not accepted while {}",
        input.name(),
        state.name()
    ))
}

/// Advance the entry by one input
pub fn apply(
    state: PurchaseEntryState,
    input: PurchaseEntryInput,
) -> PurchasingResult<PurchaseEntryState> {
    use PurchaseEntryInput as In;
    use PurchaseEntryState as St;

    match (state, input) {
        // Reset is always allowed, even after submission
        (_, In::Reset) => Ok(St::SelectingLot),

        (St::SelectingLot, In::Select { target }) => Ok(St::EnteringQuantity { target }),

        (St::EnteringQuantity { target }, In::EnterQuantity { quantity }) => {
            money::validate_quantity(quantity, "actual_quantity")?;
            Ok(St::EnteringTotal {
                target,
                actual_quantity: quantity,
            })
        }
        (St::EnteringQuantity { .. }, In::Back) => Ok(St::SelectingLot),

        (
            St::EnteringTotal {
                target,
                actual_quantity,
            },
            In::EnterTotal { total, notes },
        ) => {
            money::validate_amount(total, "actual_total_price")?;
            let unit_price = money::unit_price(total, actual_quantity)
                .map(money::price_to_f64)
                .unwrap_or_default();
            let shortfall = money::to_decimal(actual_quantity)
                < money::to_decimal(target.required_quantity);
            Ok(St::Confirming {
                target,
                actual_quantity,
                actual_total_price: total,
                notes: notes.filter(|n| !n.trim().is_empty()),
                unit_price,
                shortfall,
            })
        }
        (St::EnteringTotal { target, .. }, In::Back) => Ok(St::EnteringQuantity { target }),

        (
            St::Confirming {
                target,
                actual_quantity,
                actual_total_price,
                notes,
                ..
            },
            In::Confirm,
        ) => Ok(St::Submitted {
            command: CompletePurchase {
                purchase_id: target.purchase_id,
                actual_quantity,
                actual_total_price,
                notes,
            },
        }),
        (
            St::Confirming {
                target,
                actual_quantity,
                ..
            },
            In::Back,
        ) => Ok(St::EnteringTotal {
            target,
            actual_quantity,
        }),

        (state, input) => Err(rejected(&state, &input)),
    }
}
