//! Account types for the broker system.
//!
//! An account is created on first contact and never deleted. Providers carry
//! an approval status and an availability flag in addition to the fields
//! shared by all participants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A participant in the broker system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
	/// Unique identifier for this account.
	pub id: String,
	/// Opaque chat identity handle, unique across accounts.
	pub handle: String,
	/// Display name shown to other participants.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub display_name: Option<String>,
	/// Free-text self description.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub about: Option<String>,
	/// Role of this account.
	pub role: Role,
	/// Materialized balance in minor currency units. Never negative.
	pub balance_minor: i64,
	/// Whether a provider is currently accepting orders.
	pub available: bool,
	/// Approval status for provider accounts.
	pub approval: ApprovalStatus,
	/// Timestamp when the terms of service were accepted.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub terms_accepted_at: Option<u64>,
	/// Timestamp when this account was created.
	pub created_at: u64,
	/// Timestamp when this account was last updated.
	pub updated_at: u64,
}

impl Account {
	/// Whether this account is a provider that has passed approval.
	pub fn is_approved_provider(&self) -> bool {
		self.role == Role::Provider && self.approval == ApprovalStatus::Approved
	}
}

/// Role of an account in the broker system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	/// Account purchasing services.
	Requester,
	/// Account offering paid services.
	Provider,
	/// Operator account with administrative rights.
	Operator,
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Role::Requester => write!(f, "requester"),
			Role::Provider => write!(f, "provider"),
			Role::Operator => write!(f, "operator"),
		}
	}
}

/// Approval status of a provider account.
///
/// Requester and operator accounts are created as `Approved` since no
/// review step applies to them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
	/// Provider awaiting operator review.
	Pending,
	/// Provider cleared to offer services.
	Approved,
	/// Provider rejected during review.
	Rejected,
}

impl fmt::Display for ApprovalStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApprovalStatus::Pending => write!(f, "pending"),
			ApprovalStatus::Approved => write!(f, "approved"),
			ApprovalStatus::Rejected => write!(f, "rejected"),
		}
	}
}
