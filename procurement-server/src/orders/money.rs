//! Money calculation utilities using rust_decimal for precision
//!
//! All calculations are done using `Decimal` internally, then converted to `f64`
//! for storage/serialization. Totals are kept at 2 decimal places, unit prices
//! at 4, both rounded half away from zero.

use rust_decimal::prelude::*;
use shared::models::{OrderLineInput, OrderLineUpdate};

use crate::core::error::{PurchasingError, PurchasingResult};

/// Decimal places for totals
const DECIMAL_PLACES: u32 = 2;
/// Decimal places for unit prices
const PRICE_PLACES: u32 = 4;

/// Tolerance for monetary comparisons (0.01)
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Maximum allowed unit price
const MAX_PRICE: f64 = 10_000_000.0;
/// Maximum allowed quantity per line
const MAX_QUANTITY: f64 = 1_000_000.0;
/// Maximum product name / unit length
const MAX_NAME_LEN: usize = 200;

/// Validate that a f64 value is finite (not NaN, not Infinity)
#[inline]
fn require_finite(value: f64, field_name: &str) -> PurchasingResult<()> {
    if !value.is_finite() {
        return Err(PurchasingError::Validation(format!(
            "{field_name} must be a finite number, got {value}"
        )));
    }
    Ok(())
}

/// Quantity must be finite, positive and within bounds
pub fn validate_quantity(value: f64, field_name: &str) -> PurchasingResult<()> {
    require_finite(value, field_name)?;
    if value <= 0.0 {
        return Err(PurchasingError::Validation(format!(
            "{field_name} must be positive, got {value}"
        )));
    }
    if value > MAX_QUANTITY {
        return Err(PurchasingError::Validation(format!(
            "{field_name} exceeds maximum allowed ({MAX_QUANTITY}), got {value}"
        )));
    }
    Ok(())
}

/// Amount must be finite, non-negative and within bounds
pub fn validate_amount(value: f64, field_name: &str) -> PurchasingResult<()> {
    require_finite(value, field_name)?;
    if value < 0.0 {
        return Err(PurchasingError::Validation(format!(
            "{field_name} must be non-negative, got {value}"
        )));
    }
    if value > MAX_PRICE * MAX_QUANTITY {
        return Err(PurchasingError::Validation(format!(
            "{field_name} is out of range, got {value}"
        )));
    }
    Ok(())
}

pub fn validate_price(value: f64, field_name: &str) -> PurchasingResult<()> {
    require_finite(value, field_name)?;
    if value < 0.0 {
        return Err(PurchasingError::Validation(format!(
            "{field_name} must be non-negative, got {value}"
        )));
    }
    if value > MAX_PRICE {
        return Err(PurchasingError::Validation(format!(
            "{field_name} exceeds maximum allowed ({MAX_PRICE}), got {value}"
        )));
    }
    Ok(())
}

fn validate_name(value: &str, field_name: &str) -> PurchasingResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PurchasingError::Validation(format!(
            "{field_name} must not be empty"
        )));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(PurchasingError::Validation(format!(
            "{field_name} is too long (max {MAX_NAME_LEN} characters)"
        )));
    }
    Ok(())
}

/// Validate a new line item before insertion
pub fn validate_line_input(item: &OrderLineInput) -> PurchasingResult<()> {
    validate_name(&item.product_name, "product_name")?;
    validate_name(&item.unit, "unit")?;
    validate_quantity(item.quantity, "quantity")?;
    if let Some(price) = item.price {
        validate_price(price, "price")?;
    }
    Ok(())
}

/// Validate a partial line update
pub fn validate_line_update(changes: &OrderLineUpdate) -> PurchasingResult<()> {
    if let Some(name) = &changes.product_name {
        validate_name(name, "product_name")?;
    }
    if let Some(unit) = &changes.unit {
        validate_name(unit, "unit")?;
    }
    if let Some(quantity) = changes.quantity {
        validate_quantity(quantity, "quantity")?;
    }
    if let Some(price) = changes.price {
        validate_price(price, "price")?;
    }
    Ok(())
}

/// Convert f64 to Decimal for calculation
#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Round to 2 decimal places, half away from zero
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert Decimal back to f64 for storage, rounded to 2 decimal places
#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    round_money(value).to_f64().unwrap_or_default()
}

/// Convert a unit price back to f64 for storage, rounded to 4 decimal places
#[inline]
pub fn price_to_f64(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(PRICE_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

/// quantity × price at 2 decimal places
pub fn line_total(quantity: f64, price: f64) -> f64 {
    to_f64(to_decimal(quantity) * to_decimal(price))
}

/// Unrounded total / quantity; `None` when quantity is zero
pub fn unit_price(total: f64, quantity: f64) -> Option<Decimal> {
    to_decimal(total).checked_div(to_decimal(quantity))
}

/// Average over a quantity at 2 decimal places, zero for zero quantity
pub fn average_price(amount: Decimal, quantity: Decimal) -> f64 {
    amount.checked_div(quantity).map(to_f64).unwrap_or_default()
}

/// Σ of optional line totals (unpriced lines count as zero) at 2 decimal places
pub fn sum_totals(totals: &[Option<f64>]) -> f64 {
    let sum: Decimal = totals.iter().flatten().map(|t| to_decimal(*t)).sum();
    to_f64(sum)
}

/// Compare two monetary values for equality (within 0.01 tolerance)
pub fn money_eq(a: f64, b: f64) -> bool {
    let diff = (to_decimal(a) - to_decimal(b)).abs();
    diff < MONEY_TOLERANCE
}
