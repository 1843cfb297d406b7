//! Step tables for the conversation flows.
//!
//! Each flow is a fixed ordered list of (field, prompt, validator) tuples.
//! Steps can be conditional on fields collected earlier, which is how the
//! duration question only appears for session services. Keeping the tables
//! data-driven means the engine itself never branches on flow kind beyond
//! looking up the right table.

use broker_types::FlowKind;
use std::collections::BTreeMap;

/// Validation rule applied to one step's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Validator {
	/// Non-empty free text. Optional steps accept "-" to skip.
	Text { optional: bool },
	/// Membership in a fixed set of choices, matched case-insensitively.
	OneOf(&'static [&'static str]),
	/// Positive decimal amount in major units, dot or comma separator.
	Amount,
	/// Positive integer.
	Integer,
	/// Handle of a discoverable provider, resolved to an account id.
	Provider,
	/// Name or id of an active service of the chosen provider, resolved
	/// to a service id.
	Service,
}

/// One step in a flow table.
pub(crate) struct StepDef {
	/// Field name the parsed value is stored under.
	pub field: &'static str,
	/// Prompt shown when this step becomes current.
	pub prompt: &'static str,
	/// Validation rule for the input.
	pub validator: Validator,
	/// Skip this step unless the condition holds on the collected fields.
	pub condition: Option<fn(&BTreeMap<String, String>) -> bool>,
}

const fn step(field: &'static str, prompt: &'static str, validator: Validator) -> StepDef {
	StepDef {
		field,
		prompt,
		validator,
		condition: None,
	}
}

fn is_session(fields: &BTreeMap<String, String>) -> bool {
	fields.get("category").map(String::as_str) == Some("session")
}

pub(crate) static NEW_SERVICE: &[StepDef] = &[
	step(
		"name",
		"What should the service be called? (e.g. 'Video session 15 min')",
		Validator::Text { optional: false },
	),
	step(
		"category",
		"What kind of service is it? (session, deliverable, other)",
		Validator::OneOf(&["session", "deliverable", "other"]),
	),
	step(
		"price",
		"What is the price? (e.g. 25.00)",
		Validator::Amount,
	),
	StepDef {
		field: "duration",
		prompt: "How many minutes does a session last? (e.g. 15)",
		validator: Validator::Integer,
		condition: Some(is_session),
	},
	step(
		"description",
		"Add a short description, or reply \"-\" to skip.",
		Validator::Text { optional: true },
	),
];

pub(crate) static NEW_ORDER: &[StepDef] = &[
	step(
		"provider",
		"Which provider is this order for? Reply with their handle.",
		Validator::Provider,
	),
	step(
		"service",
		"Which service do you want? Reply with its name or id.",
		Validator::Service,
	),
	step(
		"details",
		"Add details for the provider, or reply \"-\" to skip.",
		Validator::Text { optional: true },
	),
];

pub(crate) static EDIT_PROFILE: &[StepDef] = &[
	step(
		"display_name",
		"What name should be shown on your profile?",
		Validator::Text { optional: false },
	),
	step(
		"about",
		"Write a short line about yourself, or reply \"-\" to skip.",
		Validator::Text { optional: true },
	),
];

pub(crate) static REPORT_PROBLEM: &[StepDef] = &[
	step(
		"order",
		"Which order is this about? Reply with the order id.",
		Validator::Text { optional: false },
	),
	step(
		"details",
		"Describe the problem.",
		Validator::Text { optional: false },
	),
];

/// Returns the step table for a flow kind.
pub(crate) fn table(kind: FlowKind) -> &'static [StepDef] {
	match kind {
		FlowKind::NewService => NEW_SERVICE,
		FlowKind::NewOrder => NEW_ORDER,
		FlowKind::EditProfile => EDIT_PROFILE,
		FlowKind::ReportProblem => REPORT_PROBLEM,
	}
}

/// Finds the next applicable step at or after `from`, honoring conditions.
pub(crate) fn next_step(
	steps: &[StepDef],
	from: usize,
	fields: &BTreeMap<String, String>,
) -> Option<usize> {
	(from..steps.len()).find(|&i| match steps[i].condition {
		Some(condition) => condition(fields),
		None => true,
	})
}
