//! Ledger entry types for the append-only transaction log.
//!
//! Entries are never mutated or deleted. An account's balance is the running
//! sum of signed entries; a materialized balance is kept on the account
//! record by the same operation that appends the entry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single append-only ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
	/// Unique identifier for this entry.
	pub id: String,
	/// Account this entry applies to.
	pub account_id: String,
	/// Kind of balance movement.
	pub kind: EntryKind,
	/// Amount moved, in minor currency units. Always positive.
	pub amount_minor: i64,
	/// Order that caused this entry, if any.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub order_id: Option<String>,
	/// Timestamp when this entry was appended.
	pub created_at: u64,
}

/// Kind of a ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
	/// Credit from an external top-up.
	TopUp,
	/// Escrow hold debiting a payer pending order outcome.
	Hold,
	/// Credit releasing escrowed funds.
	Release,
	/// Debit paying out a balance.
	Withdraw,
}

impl EntryKind {
	/// Sign of the balance change this kind applies, +1 or -1.
	pub fn sign(&self) -> i64 {
		match self {
			EntryKind::TopUp | EntryKind::Release => 1,
			EntryKind::Hold | EntryKind::Withdraw => -1,
		}
	}
}

impl fmt::Display for EntryKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EntryKind::TopUp => write!(f, "topup"),
			EntryKind::Hold => write!(f, "hold"),
			EntryKind::Release => write!(f, "release"),
			EntryKind::Withdraw => write!(f, "withdraw"),
		}
	}
}
