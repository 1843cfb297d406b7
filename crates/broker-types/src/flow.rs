//! Conversation flow types.
//!
//! A flow is the ephemeral per-account state of a multi-step guided
//! data-entry conversation. It is created when a flow starts, advanced on
//! each matching input and discarded on completion, cancellation or reset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of a conversation flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
	/// Requester placing a new order.
	NewOrder,
	/// Provider defining a new service.
	NewService,
	/// Provider editing their public profile.
	EditProfile,
	/// Requester reporting a problem with a completed order.
	ReportProblem,
}

impl fmt::Display for FlowKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlowKind::NewOrder => write!(f, "new_order"),
			FlowKind::NewService => write!(f, "new_service"),
			FlowKind::EditProfile => write!(f, "edit_profile"),
			FlowKind::ReportProblem => write!(f, "report_problem"),
		}
	}
}

impl FromStr for FlowKind {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"new_order" => Ok(Self::NewOrder),
			"new_service" => Ok(Self::NewService),
			"edit_profile" => Ok(Self::EditProfile),
			"report_problem" => Ok(Self::ReportProblem),
			_ => Err(()),
		}
	}
}

/// Per-account state of an open conversation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
	/// Account this flow belongs to.
	pub account_id: String,
	/// Kind of flow being driven.
	pub kind: FlowKind,
	/// Index of the current step in the flow's step table.
	pub step: usize,
	/// Fields collected so far, keyed by step field name.
	pub fields: BTreeMap<String, String>,
	/// Timestamp when this flow was started.
	pub started_at: u64,
}
