//! Command dispatch into the broker core.
//!
//! Takes one decoded command from one account and routes it to the typed
//! operation behind it. Every domain failure is already a user-facing
//! message, so dispatch renders errors with their Display form and never
//! bubbles them further.

use crate::commands::{self, Command};
use broker_core::BrokerEngine;
use broker_flows::{FlowError, StepOutcome};
use broker_types::{format_minor, Account, ApprovalStatus, FlowKind, OrderStatus, Role};

const MENU: &str = "Commands:\n\
	/provider - apply to offer services\n\
	/available on|off - open or close for new orders\n\
	/service new|list|toggle <id>|delete <id>\n\
	/order new|accept <id>|start <id>|complete <id>|cancel <id>|rate <id> <1-5>|problem\n\
	/topup <amount>, /withdraw <amount>, /balance\n\
	/providers - browse providers\n\
	/profile - edit your profile\n\
	/terms - accept the terms of service\n\
	/cancel - abort the current flow";

/// Handles one inbound line from the transport and returns the reply.
pub async fn handle_line(engine: &BrokerEngine, handle: &str, text: &str) -> String {
	let account = match ensure_account(engine, handle).await {
		Ok(account) => account,
		Err(message) => return message,
	};
	match commands::decode(text) {
		Ok(command) => run(engine, &account, command).await,
		Err(usage) => usage,
	}
}

/// Resolves the sender to an account, creating it on first contact.
///
/// Handles listed under `broker.operators` in the configuration are
/// promoted to the operator role the first time they write in.
async fn ensure_account(engine: &BrokerEngine, handle: &str) -> Result<Account, String> {
	let account = engine
		.accounts()
		.find_or_create(handle)
		.await
		.map_err(|e| e.to_string())?;
	if account.role != Role::Operator
		&& engine
			.config()
			.broker
			.operators
			.iter()
			.any(|h| h == handle)
	{
		return engine
			.accounts()
			.set_role(&account.id, Role::Operator)
			.await
			.map_err(|e| e.to_string());
	}
	Ok(account)
}

async fn run(engine: &BrokerEngine, account: &Account, command: Command) -> String {
	let currency = engine.config().orders.currency.clone();
	match command {
		Command::Start => format!("Welcome, {}.\n{}", account.handle, MENU),
		Command::Menu => {
			// Opening the menu is an explicit flow reset.
			engine.cancel_flow(&account.id).await.ok();
			MENU.to_string()
		}
		Command::AcceptTerms => match engine.accounts().accept_terms(&account.id).await {
			Ok(_) => "Thanks, terms accepted.".to_string(),
			Err(e) => e.to_string(),
		},
		Command::BecomeProvider => {
			if account.role == Role::Provider {
				return "You are already registered as a provider.".to_string();
			}
			match engine.accounts().set_role(&account.id, Role::Provider).await {
				Ok(_) => {
					alert_operators(
						engine,
						&format!("Provider application from {}. /approve {0} or /reject {0}", account.handle),
					)
					.await;
					"Application submitted. An operator will review it.".to_string()
				}
				Err(e) => e.to_string(),
			}
		}
		Command::SetAvailable(available) => {
			if !account.is_approved_provider() {
				return "Only approved providers can set availability.".to_string();
			}
			match engine.accounts().set_available(&account.id, available).await {
				Ok(_) if available => "You are now open for new orders.".to_string(),
				Ok(_) => "You are now closed for new orders.".to_string(),
				Err(e) => e.to_string(),
			}
		}
		Command::Approve(handle) => review_provider(engine, account, &handle, ApprovalStatus::Approved).await,
		Command::Reject(handle) => review_provider(engine, account, &handle, ApprovalStatus::Rejected).await,
		Command::Balance => match engine.ledger().balance(&account.id).await {
			Ok(balance) => format!("Balance: {}", format_minor(balance, &currency)),
			Err(e) => e.to_string(),
		},
		Command::TopUp(amount_minor) => {
			match engine.ledger().top_up(&account.id, amount_minor).await {
				Ok(balance) => format!("Balance: {}", format_minor(balance, &currency)),
				Err(e) => e.to_string(),
			}
		}
		Command::Withdraw(amount_minor) => {
			match engine.ledger().withdraw(&account.id, amount_minor).await {
				Ok(balance) => format!(
					"Withdrawal of {} requested. Balance: {}",
					format_minor(amount_minor, &currency),
					format_minor(balance, &currency)
				),
				Err(e) => e.to_string(),
			}
		}
		Command::Providers => match engine.accounts().list_discoverable_providers().await {
			Ok(providers) if providers.is_empty() => {
				"No providers are taking orders right now.".to_string()
			}
			Ok(providers) => providers
				.iter()
				.map(|p| match &p.display_name {
					Some(name) => format!("{} - {}", p.handle, name),
					None => p.handle.clone(),
				})
				.collect::<Vec<_>>()
				.join("\n"),
			Err(e) => e.to_string(),
		},
		Command::NewService => start_flow(engine, account, FlowKind::NewService).await,
		Command::NewOrder => start_flow(engine, account, FlowKind::NewOrder).await,
		Command::EditProfile => start_flow(engine, account, FlowKind::EditProfile).await,
		Command::ReportProblem => start_flow(engine, account, FlowKind::ReportProblem).await,
		Command::ListServices => {
			match engine.catalog().list_by_provider(&account.id, true).await {
				Ok(services) if services.is_empty() => "You have no services yet.".to_string(),
				Ok(services) => services
					.iter()
					.map(|s| {
						format!(
							"{} | {} | {} | {}",
							s.id,
							s.name,
							format_minor(s.price_minor, &currency),
							if s.active { "active" } else { "hidden" }
						)
					})
					.collect::<Vec<_>>()
					.join("\n"),
				Err(e) => e.to_string(),
			}
		}
		Command::ToggleService(service_id) => {
			match engine.catalog().toggle_active(&account.id, &service_id).await {
				Ok(service) if service.active => {
					format!("Service '{}' is visible again.", service.name)
				}
				Ok(service) => format!("Service '{}' is now hidden.", service.name),
				Err(e) => e.to_string(),
			}
		}
		Command::DeleteService(service_id) => {
			match engine.catalog().delete_service(&account.id, &service_id).await {
				Ok(()) => "Service deleted.".to_string(),
				Err(e) => e.to_string(),
			}
		}
		Command::AcceptOrder(order_id) => {
			match engine.orders().accept(&order_id, &account.id).await {
				Ok(order) if order.status == OrderStatus::PendingPayment => format!(
					"Order accepted. Waiting for the payment of {}.",
					format_minor(order.total_minor, &order.currency)
				),
				Ok(order) => format!(
					"Order accepted. {} is held in escrow.",
					format_minor(order.total_minor, &order.currency)
				),
				Err(e) => e.to_string(),
			}
		}
		Command::StartSession(order_id) => {
			match engine.orders().start_session(&order_id, &account.id).await {
				Ok(order) => format!(
					"Session ready: {}",
					order.session_url.as_deref().unwrap_or_default()
				),
				Err(e) => e.to_string(),
			}
		}
		Command::CompleteOrder(order_id) => {
			match engine.orders().complete(&order_id, &account.id).await {
				Ok(order) => format!(
					"Order completed. {} released to your balance.",
					format_minor(order.base_minor, &order.currency)
				),
				Err(e) => e.to_string(),
			}
		}
		Command::CancelOrder(order_id) => {
			match engine.orders().cancel(&order_id, &account.id).await {
				Ok(_) => "Order cancelled. Any held funds were returned.".to_string(),
				Err(e) => e.to_string(),
			}
		}
		Command::RateOrder(order_id, rating) => {
			match engine.orders().rate(&order_id, &account.id, rating).await {
				Ok(_) => "Thanks for rating.".to_string(),
				Err(e) => e.to_string(),
			}
		}
		Command::ConfirmPayment {
			order_id,
			amount_minor,
			currency,
		} => {
			// Stands in for the payment provider's confirmation callback.
			if account.role != Role::Operator {
				return "Operators only.".to_string();
			}
			match engine
				.orders()
				.confirm_payment(&order_id, amount_minor, &currency)
				.await
			{
				Ok(order) => format!("Payment recorded for order {}.", order.id),
				Err(e) => e.to_string(),
			}
		}
		Command::CancelFlow => {
			match engine.cancel_flow(&account.id).await {
				Ok(()) => "Okay, cancelled.".to_string(),
				Err(e) => e.to_string(),
			}
		}
		Command::Text(input) => submit_flow_input(engine, account, &input).await,
	}
}

async fn start_flow(engine: &BrokerEngine, account: &Account, kind: FlowKind) -> String {
	match engine.start_flow(&account.id, kind).await {
		Ok(prompt) => prompt,
		Err(e) => e.to_string(),
	}
}

async fn submit_flow_input(engine: &BrokerEngine, account: &Account, input: &str) -> String {
	if input.is_empty() {
		return MENU.to_string();
	}
	match engine.flows().submit_step(&account.id, input).await {
		Ok(StepOutcome::Prompt(prompt)) => prompt,
		Ok(StepOutcome::Completed(completion)) => {
			match engine.run_completion(completion).await {
				Ok(reply) => reply,
				Err(e) => e.to_string(),
			}
		}
		Err(FlowError::NoActiveFlow) => {
			"Nothing in progress. Send /menu to see what you can do.".to_string()
		}
		// Validation messages re-prompt the unchanged step.
		Err(e) => e.to_string(),
	}
}

async fn review_provider(
	engine: &BrokerEngine,
	operator: &Account,
	handle: &str,
	approval: ApprovalStatus,
) -> String {
	if operator.role != Role::Operator {
		return "Operators only.".to_string();
	}
	let target = match engine.accounts().get_by_handle(handle).await {
		Ok(target) => target,
		Err(e) => return e.to_string(),
	};
	if target.role != Role::Provider {
		return format!("{} has not applied as a provider.", handle);
	}
	match engine.accounts().set_approval(&target.id, approval).await {
		Ok(_) => {
			let message = match approval {
				ApprovalStatus::Approved => {
					"Your provider application was approved. Send /service new to offer a service."
				}
				_ => "Your provider application was rejected.",
			};
			engine.notify().notify(&target.handle, message).await;
			format!("{} is now {}.", handle, approval)
		}
		Err(e) => e.to_string(),
	}
}

async fn alert_operators(engine: &BrokerEngine, message: &str) {
	if let Ok(operators) = engine.accounts().list_by_role(Role::Operator).await {
		for operator in operators {
			engine.notify().notify(&operator.handle, message).await;
		}
	}
}
