//! Order lifecycle types.
//!
//! An order is the central entity of the broker. It is created by the
//! conversation engine, mutated only through the order state machine's
//! transition operations, and never deleted: cancelled and expired orders
//! are retained for audit.

use crate::ServiceCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A paid, time-bounded request for a service.
///
/// The amount invariant `total_minor == base_minor + fee_minor` is fixed at
/// creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Account id of the requester that placed the order.
	pub requester_id: String,
	/// Account id of the provider bound by acceptance. None until accepted.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub provider_id: Option<String>,
	/// Service this order was placed against.
	pub service_id: String,
	/// Category copied from the service at creation.
	pub category: ServiceCategory,
	/// Base amount in minor currency units.
	pub base_minor: i64,
	/// Brokerage fee in minor currency units.
	pub fee_minor: i64,
	/// Total amount the requester pays. Always `base_minor + fee_minor`.
	pub total_minor: i64,
	/// ISO currency code.
	pub currency: String,
	/// Current status of the order.
	pub status: OrderStatus,
	/// Payment state of the order.
	pub payment: PaymentStatus,
	/// Free-text description assembled at creation.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// Session link handed out when a session order starts.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_url: Option<String>,
	/// Post-completion rating from the requester, 1 to 5.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub rating: Option<u8>,
	/// Post-completion problem report from the requester.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub problem: Option<String>,
	/// Whether a stale-order reminder has been sent for this order.
	#[serde(default)]
	pub reminded: bool,
	/// Timestamp when this order was created.
	pub created_at: u64,
	/// Timestamp when this order was last updated.
	pub updated_at: u64,
	/// Timestamp after which a pending order is expired by the sweeper.
	pub expires_at: u64,
}

/// Status of an order in the broker system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Order has been created and is waiting for a provider.
	Pending,
	/// A provider is bound and payment is being committed.
	PendingPayment,
	/// Payment committed; work may begin.
	Accepted,
	/// A session is in progress.
	InCall,
	/// Work confirmed delivered; funds released. Terminal.
	Completed,
	/// Cancelled by the requester or expired by the sweeper. Terminal.
	Cancelled,
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderStatus::Pending => write!(f, "pending"),
			OrderStatus::PendingPayment => write!(f, "pending_payment"),
			OrderStatus::Accepted => write!(f, "accepted"),
			OrderStatus::InCall => write!(f, "in_call"),
			OrderStatus::Completed => write!(f, "completed"),
			OrderStatus::Cancelled => write!(f, "cancelled"),
		}
	}
}

/// Payment state of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	/// No funds committed yet.
	Unpaid,
	/// Funds held in escrow or confirmed by the external payment provider.
	Paid,
}

/// Where order funds are committed at accept time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
	/// Funds are held from the requester's internal balance.
	Balance,
	/// Funds are confirmed out of band by an external payment provider.
	External,
}
