//! Minor-unit currency amount handling.
//!
//! User-entered amounts are decimal strings in major units with either a
//! dot or a comma as the decimal separator ("25.00", "25,00"). Internally
//! every amount is an integer count of minor units.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing a user-entered amount.
#[derive(Debug, Error, PartialEq)]
pub enum AmountParseError {
	/// Input is not a decimal number.
	#[error("Not a valid amount: {0}")]
	Invalid(String),
	/// Amount is zero or negative.
	#[error("Amount must be positive")]
	NotPositive,
	/// Amount has more precision than minor units can represent.
	#[error("Amount has more than two decimal places")]
	TooPrecise,
}

/// Parses a user-entered decimal amount into minor units.
///
/// Accepts a comma as decimal separator and rejects amounts that are not
/// positive or carry sub-minor-unit precision.
pub fn parse_amount_minor(input: &str) -> Result<i64, AmountParseError> {
	let normalized = input.trim().replace(',', ".");
	let value = Decimal::from_str(&normalized)
		.map_err(|_| AmountParseError::Invalid(input.trim().to_string()))?;
	if value <= Decimal::ZERO {
		return Err(AmountParseError::NotPositive);
	}
	let minor = value * Decimal::from(100);
	if minor.fract() != Decimal::ZERO {
		return Err(AmountParseError::TooPrecise);
	}
	minor
		.to_i64()
		.ok_or_else(|| AmountParseError::Invalid(input.trim().to_string()))
}

/// Formats minor units as a major-unit decimal string with the currency code.
pub fn format_minor(amount_minor: i64, currency: &str) -> String {
	let sign = if amount_minor < 0 { "-" } else { "" };
	let abs = amount_minor.unsigned_abs();
	format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, currency)
}
