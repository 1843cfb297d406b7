//! Event types for inter-service communication.
//!
//! Events flow through a broadcast event bus so that the engine and any
//! observers can react to state changes without being on the request path.

use crate::{EntryKind, FlowKind};
use serde::{Deserialize, Serialize};

/// Main event type encompassing all broker events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerEvent {
	/// Events from the order lifecycle.
	Order(OrderEvent),
	/// Events from the escrow ledger.
	Ledger(LedgerEvent),
	/// Events from the conversation engine.
	Flow(FlowEvent),
}

/// Events related to the order lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A new order has been created and is waiting for a provider.
	Created {
		order_id: String,
		requester_id: String,
	},
	/// A provider won the acceptance race and funds were committed.
	Accepted {
		order_id: String,
		provider_id: String,
	},
	/// An external payment was confirmed against the order total.
	PaymentConfirmed { order_id: String },
	/// A session order moved in-call.
	SessionStarted {
		order_id: String,
		session_url: String,
	},
	/// The provider confirmed delivery; base amount released.
	Completed {
		order_id: String,
		provider_id: String,
		released_minor: i64,
	},
	/// The requester cancelled the order.
	Cancelled { order_id: String },
	/// The sweeper expired a stale pending order.
	Expired { order_id: String },
	/// A stale-order reminder was sent.
	Reminded { order_id: String },
}

/// Events related to ledger movements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEvent {
	/// An entry was appended and the materialized balance updated.
	BalanceChanged {
		account_id: String,
		kind: EntryKind,
		amount_minor: i64,
		balance_minor: i64,
	},
}

/// Events related to conversation flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
	/// A flow was installed at its first step.
	Started { account_id: String, kind: FlowKind },
	/// A flow reached its final step and ran its completion action.
	Completed { account_id: String, kind: FlowKind },
	/// A flow was cancelled before completion.
	Cancelled { account_id: String },
}
