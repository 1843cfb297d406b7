//! Conversation engine module for the broker system.
//!
//! Drives linear per-account wizards that assemble a structured request
//! from a sequence of free-text inputs, validating each step before
//! advancing. The engine is data-driven: every flow is a fixed table of
//! (field, prompt, validator) steps defined in [`steps`], and the engine
//! only walks tables, validates input and hands the assembled result back
//! as a [`FlowCompletion`] for the caller to act on.

use broker_account::{AccountError, AccountService};
use broker_catalog::CatalogService;
use broker_storage::{StorageError, StorageService};
use broker_types::{
	parse_amount_minor, Clock, FlowKind, FlowState, Role, ServiceCategory, StorageKey,
};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

mod steps;

use steps::{StepDef, Validator};

/// Errors that can occur while driving a conversation flow.
#[derive(Debug, Error)]
pub enum FlowError {
	/// Error that occurs when a step input does not satisfy its rule.
	/// The message doubles as the re-prompt for the unchanged step.
	#[error("{0}")]
	ValidationFailed(String),
	/// Error that occurs when input arrives without an open flow.
	#[error("No active flow")]
	NoActiveFlow,
	/// Error that occurs when a provider flow is started before approval.
	#[error("Provider approval required")]
	NotApproved,
	/// Error that occurs when an account's role cannot start a flow kind.
	#[error("Flow {kind} is not available to {role} accounts")]
	NotEligible { kind: FlowKind, role: Role },
	/// Error that occurs when the account does not exist.
	#[error("Account not found: {0}")]
	AccountNotFound(String),
	/// Error that occurs in the storage layer.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<AccountError> for FlowError {
	fn from(err: AccountError) -> Self {
		match err {
			AccountError::NotFound(id) => FlowError::AccountNotFound(id),
			AccountError::Storage(e) => FlowError::Storage(e),
		}
	}
}

impl From<StorageError> for FlowError {
	fn from(err: StorageError) -> Self {
		FlowError::Storage(err.to_string())
	}
}

/// Result of submitting one step of input.
#[derive(Debug)]
pub enum StepOutcome {
	/// The flow advanced; show this prompt for the next step.
	Prompt(String),
	/// The final step was accepted; the flow is cleared and the caller
	/// should run the completion action.
	Completed(FlowCompletion),
}

/// Structured request assembled by a finished flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowCompletion {
	/// Create a service for the provider that drove the flow.
	NewService {
		provider_id: String,
		name: String,
		category: ServiceCategory,
		price_minor: i64,
		duration_min: Option<u32>,
		description: Option<String>,
	},
	/// Create an order for the requester that drove the flow.
	NewOrder {
		requester_id: String,
		service_id: String,
		details: Option<String>,
	},
	/// Update the profile of the account that drove the flow.
	EditProfile {
		account_id: String,
		display_name: String,
		about: Option<String>,
	},
	/// File a problem report against a completed order.
	ReportProblem {
		account_id: String,
		order_id: String,
		details: String,
	},
}

/// Engine driving per-account multi-step conversations.
pub struct FlowEngine {
	storage: Arc<StorageService>,
	accounts: Arc<AccountService>,
	catalog: Arc<CatalogService>,
	clock: Arc<dyn Clock>,
}

impl FlowEngine {
	/// Creates a new FlowEngine.
	pub fn new(
		storage: Arc<StorageService>,
		accounts: Arc<AccountService>,
		catalog: Arc<CatalogService>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			storage,
			accounts,
			catalog,
			clock,
		}
	}

	/// Installs a fresh flow at its first step and returns that step's prompt.
	///
	/// Any flow already open for the account is replaced: starting a wizard
	/// is an explicit reset.
	pub async fn start_flow(&self, account_id: &str, kind: FlowKind) -> Result<String, FlowError> {
		let account = self.accounts.get(account_id).await?;
		match kind {
			FlowKind::NewOrder | FlowKind::ReportProblem => {
				if account.role != Role::Requester {
					return Err(FlowError::NotEligible {
						kind,
						role: account.role,
					});
				}
			}
			FlowKind::NewService | FlowKind::EditProfile => {
				if account.role != Role::Provider {
					return Err(FlowError::NotEligible {
						kind,
						role: account.role,
					});
				}
				if !account.is_approved_provider() {
					return Err(FlowError::NotApproved);
				}
			}
		}

		let table = steps::table(kind);
		let first = steps::next_step(table, 0, &BTreeMap::new())
			.expect("flow tables always have an unconditional first step");
		let flow = FlowState {
			account_id: account_id.to_string(),
			kind,
			step: first,
			fields: BTreeMap::new(),
			started_at: self.clock.now(),
		};
		self.storage
			.store(StorageKey::Flows.as_str(), account_id, &flow)
			.await?;
		tracing::debug!(account_id = %account_id, kind = %kind, "Started flow");
		Ok(table[first].prompt.to_string())
	}

	/// Validates input against the current step and advances the flow.
	///
	/// On validation failure the flow is left unchanged and the error
	/// message re-prompts the same step. When the final step is accepted
	/// the flow is cleared and the assembled completion returned.
	pub async fn submit_step(
		&self,
		account_id: &str,
		input: &str,
	) -> Result<StepOutcome, FlowError> {
		let mut flow: FlowState = match self
			.storage
			.retrieve(StorageKey::Flows.as_str(), account_id)
			.await
		{
			Ok(flow) => flow,
			Err(StorageError::NotFound) => return Err(FlowError::NoActiveFlow),
			Err(e) => return Err(e.into()),
		};

		let table = steps::table(flow.kind);
		let def = &table[flow.step];
		if let Some(value) = self.validate(def, &flow.fields, input).await? {
			flow.fields.insert(def.field.to_string(), value);
		}

		match steps::next_step(table, flow.step + 1, &flow.fields) {
			Some(next) => {
				flow.step = next;
				self.storage
					.store(StorageKey::Flows.as_str(), account_id, &flow)
					.await?;
				Ok(StepOutcome::Prompt(table[next].prompt.to_string()))
			}
			None => {
				self.storage
					.remove(StorageKey::Flows.as_str(), account_id)
					.await?;
				tracing::debug!(account_id = %account_id, kind = %flow.kind, "Completed flow");
				Ok(StepOutcome::Completed(Self::assemble(&flow)?))
			}
		}
	}

	/// Clears any open flow for the account. Idempotent.
	pub async fn cancel_flow(&self, account_id: &str) -> Result<(), FlowError> {
		self.storage
			.remove(StorageKey::Flows.as_str(), account_id)
			.await?;
		Ok(())
	}

	/// Whether the account currently has an open flow.
	pub async fn has_active(&self, account_id: &str) -> Result<bool, FlowError> {
		Ok(self
			.storage
			.exists(StorageKey::Flows.as_str(), account_id)
			.await?)
	}

	/// Validates one input against a step rule.
	///
	/// Returns the parsed value to store, or `None` when an optional step
	/// was skipped.
	async fn validate(
		&self,
		def: &StepDef,
		fields: &BTreeMap<String, String>,
		input: &str,
	) -> Result<Option<String>, FlowError> {
		let input = input.trim();
		match def.validator {
			Validator::Text { optional } => {
				if input == "-" && optional {
					return Ok(None);
				}
				if input.is_empty() || input == "-" {
					return Err(FlowError::ValidationFailed(
						"This step needs a text answer.".into(),
					));
				}
				Ok(Some(input.to_string()))
			}
			Validator::OneOf(options) => {
				let lowered = input.to_lowercase();
				if options.contains(&lowered.as_str()) {
					Ok(Some(lowered))
				} else {
					Err(FlowError::ValidationFailed(format!(
						"Choose one of: {}.",
						options.join(", ")
					)))
				}
			}
			Validator::Amount => match parse_amount_minor(input) {
				Ok(minor) => Ok(Some(minor.to_string())),
				Err(_) => Err(FlowError::ValidationFailed(
					"Not a valid amount. Example: 25.00".into(),
				)),
			},
			Validator::Integer => match input.parse::<u32>() {
				Ok(value) if value > 0 => Ok(Some(value.to_string())),
				_ => Err(FlowError::ValidationFailed(
					"Not a valid number of minutes. Example: 15".into(),
				)),
			},
			Validator::Provider => {
				let provider = match self.accounts.get_by_handle(input).await {
					Ok(account) => account,
					Err(AccountError::NotFound(_)) => {
						return Err(FlowError::ValidationFailed(
							"No provider with that handle. Reply with a provider handle.".into(),
						))
					}
					Err(e) => return Err(e.into()),
				};
				if !provider.is_approved_provider() || !provider.available {
					return Err(FlowError::ValidationFailed(
						"That provider is not taking orders right now.".into(),
					));
				}
				Ok(Some(provider.id))
			}
			Validator::Service => {
				let provider_id = fields
					.get("provider")
					.ok_or_else(|| FlowError::Storage("flow missing provider field".into()))?;
				let services = self
					.catalog
					.list_by_provider(provider_id, false)
					.await
					.map_err(|e| FlowError::Storage(e.to_string()))?;
				let service = services
					.iter()
					.find(|s| s.id == input || s.name.eq_ignore_ascii_case(input));
				match service {
					Some(service) => Ok(Some(service.id.clone())),
					None => Err(FlowError::ValidationFailed(
						"That provider does not offer such a service. Reply with a service name or id."
							.into(),
					)),
				}
			}
		}
	}

	/// Assembles the typed completion from a finished flow's fields.
	fn assemble(flow: &FlowState) -> Result<FlowCompletion, FlowError> {
		let corrupt = |field: &str| FlowError::Storage(format!("corrupt flow state: {}", field));
		let get = |field: &str| {
			flow.fields
				.get(field)
				.cloned()
				.ok_or_else(|| corrupt(field))
		};
		match flow.kind {
			FlowKind::NewService => Ok(FlowCompletion::NewService {
				provider_id: flow.account_id.clone(),
				name: get("name")?,
				category: ServiceCategory::from_str(&get("category")?)
					.map_err(|_| corrupt("category"))?,
				price_minor: get("price")?.parse().map_err(|_| corrupt("price"))?,
				duration_min: flow
					.fields
					.get("duration")
					.map(|d| d.parse().map_err(|_| corrupt("duration")))
					.transpose()?,
				description: flow.fields.get("description").cloned(),
			}),
			FlowKind::NewOrder => Ok(FlowCompletion::NewOrder {
				requester_id: flow.account_id.clone(),
				service_id: get("service")?,
				details: flow.fields.get("details").cloned(),
			}),
			FlowKind::EditProfile => Ok(FlowCompletion::EditProfile {
				account_id: flow.account_id.clone(),
				display_name: get("display_name")?,
				about: flow.fields.get("about").cloned(),
			}),
			FlowKind::ReportProblem => Ok(FlowCompletion::ReportProblem {
				account_id: flow.account_id.clone(),
				order_id: get("order")?,
				details: get("details")?,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_storage::implementations::memory::MemoryStorage;
	use broker_types::{ApprovalStatus, ManualClock};

	struct Fixture {
		engine: FlowEngine,
		accounts: Arc<AccountService>,
		catalog: Arc<CatalogService>,
	}

	async fn setup() -> Fixture {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock: Arc<ManualClock> = Arc::new(ManualClock::new(1_700_000_000));
		let accounts = Arc::new(AccountService::new(storage.clone(), clock.clone()));
		let catalog = Arc::new(CatalogService::new(storage.clone(), clock.clone()));
		Fixture {
			engine: FlowEngine::new(storage, accounts.clone(), catalog.clone(), clock),
			accounts,
			catalog,
		}
	}

	async fn approved_provider(fixture: &Fixture, handle: &str) -> broker_types::Account {
		let account = fixture.accounts.find_or_create(handle).await.unwrap();
		fixture
			.accounts
			.set_role(&account.id, Role::Provider)
			.await
			.unwrap();
		let account = fixture
			.accounts
			.set_approval(&account.id, ApprovalStatus::Approved)
			.await
			.unwrap();
		fixture
			.accounts
			.set_available(&account.id, true)
			.await
			.unwrap()
	}

	async fn submit(fixture: &Fixture, account_id: &str, input: &str) -> StepOutcome {
		fixture.engine.submit_step(account_id, input).await.unwrap()
	}

	#[tokio::test]
	async fn test_new_service_walkthrough() {
		let fixture = setup().await;
		let provider = approved_provider(&fixture, "mia").await;

		let prompt = fixture
			.engine
			.start_flow(&provider.id, FlowKind::NewService)
			.await
			.unwrap();
		assert!(prompt.contains("called"));

		submit(&fixture, &provider.id, "Video session 15 min").await;
		submit(&fixture, &provider.id, "session").await;
		submit(&fixture, &provider.id, "25.00").await;
		submit(&fixture, &provider.id, "15").await;
		let outcome = submit(&fixture, &provider.id, "-").await;

		match outcome {
			StepOutcome::Completed(FlowCompletion::NewService {
				provider_id,
				name,
				category,
				price_minor,
				duration_min,
				description,
			}) => {
				assert_eq!(provider_id, provider.id);
				assert_eq!(name, "Video session 15 min");
				assert_eq!(category, ServiceCategory::Session);
				assert_eq!(price_minor, 2500);
				assert_eq!(duration_min, Some(15));
				assert_eq!(description, None);
			}
			other => panic!("expected completion, got {:?}", other),
		}
		assert!(!fixture.engine.has_active(&provider.id).await.unwrap());
	}

	#[tokio::test]
	async fn test_duration_step_skipped_for_deliverables() {
		let fixture = setup().await;
		let provider = approved_provider(&fixture, "mia").await;

		fixture
			.engine
			.start_flow(&provider.id, FlowKind::NewService)
			.await
			.unwrap();
		submit(&fixture, &provider.id, "Photo pack").await;
		submit(&fixture, &provider.id, "deliverable").await;
		let outcome = submit(&fixture, &provider.id, "40,00").await;

		// Straight to the description step, no duration question
		match outcome {
			StepOutcome::Prompt(prompt) => assert!(prompt.contains("description")),
			other => panic!("expected description prompt, got {:?}", other),
		}
		let outcome = submit(&fixture, &provider.id, "ten edited photos").await;
		match outcome {
			StepOutcome::Completed(FlowCompletion::NewService {
				price_minor,
				duration_min,
				description,
				..
			}) => {
				assert_eq!(price_minor, 4000);
				assert_eq!(duration_min, None);
				assert_eq!(description.as_deref(), Some("ten edited photos"));
			}
			other => panic!("expected completion, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_invalid_input_does_not_advance() {
		let fixture = setup().await;
		let provider = approved_provider(&fixture, "mia").await;

		fixture
			.engine
			.start_flow(&provider.id, FlowKind::NewService)
			.await
			.unwrap();
		submit(&fixture, &provider.id, "Session").await;
		submit(&fixture, &provider.id, "session").await;

		let err = fixture
			.engine
			.submit_step(&provider.id, "not a price")
			.await
			.unwrap_err();
		assert!(matches!(err, FlowError::ValidationFailed(_)));

		// Same step accepts corrected input
		match submit(&fixture, &provider.id, "30,00").await {
			StepOutcome::Prompt(prompt) => assert!(prompt.contains("minutes")),
			other => panic!("expected duration prompt, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_start_flow_gates_on_role_and_approval() {
		let fixture = setup().await;
		let requester = fixture.accounts.find_or_create("alice").await.unwrap();

		let err = fixture
			.engine
			.start_flow(&requester.id, FlowKind::NewService)
			.await
			.unwrap_err();
		assert!(matches!(err, FlowError::NotEligible { .. }));

		let pending = fixture.accounts.find_or_create("mia").await.unwrap();
		fixture
			.accounts
			.set_role(&pending.id, Role::Provider)
			.await
			.unwrap();
		let err = fixture
			.engine
			.start_flow(&pending.id, FlowKind::NewService)
			.await
			.unwrap_err();
		assert!(matches!(err, FlowError::NotApproved));
	}

	#[tokio::test]
	async fn test_new_order_walkthrough() {
		let fixture = setup().await;
		let provider = approved_provider(&fixture, "mia").await;
		let service = fixture
			.catalog
			.create_service(
				&provider,
				"Video session",
				ServiceCategory::Session,
				2500,
				Some(15),
				None,
			)
			.await
			.unwrap();
		let requester = fixture.accounts.find_or_create("alice").await.unwrap();

		fixture
			.engine
			.start_flow(&requester.id, FlowKind::NewOrder)
			.await
			.unwrap();
		submit(&fixture, &requester.id, "mia").await;
		submit(&fixture, &requester.id, "video session").await;
		let outcome = submit(&fixture, &requester.id, "-").await;

		match outcome {
			StepOutcome::Completed(FlowCompletion::NewOrder {
				requester_id,
				service_id,
				details,
			}) => {
				assert_eq!(requester_id, requester.id);
				assert_eq!(service_id, service.id);
				assert_eq!(details, None);
			}
			other => panic!("expected completion, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_cancel_flow_is_idempotent() {
		let fixture = setup().await;
		let provider = approved_provider(&fixture, "mia").await;

		fixture
			.engine
			.start_flow(&provider.id, FlowKind::EditProfile)
			.await
			.unwrap();
		fixture.engine.cancel_flow(&provider.id).await.unwrap();
		fixture.engine.cancel_flow(&provider.id).await.unwrap();

		let err = fixture
			.engine
			.submit_step(&provider.id, "anything")
			.await
			.unwrap_err();
		assert!(matches!(err, FlowError::NoActiveFlow));
	}
}
