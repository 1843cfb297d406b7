//! Typed commands decoded at the transport boundary.
//!
//! Inbound text is decoded exactly once into this closed command type;
//! everything downstream dispatches on the variant instead of matching
//! strings again. Anything that is not a slash command becomes
//! [`Command::Text`] and is treated as a step of the sender's open
//! conversation flow.

use broker_types::parse_amount_minor;

/// One decoded transport command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	/// First contact / greeting.
	Start,
	/// Reset any open flow and show the menu.
	Menu,
	/// Accept the terms of service.
	AcceptTerms,
	/// Apply for the provider role.
	BecomeProvider,
	/// Flip provider availability.
	SetAvailable(bool),
	/// Operator: approve a provider by handle.
	Approve(String),
	/// Operator: reject a provider by handle.
	Reject(String),
	/// Show the account balance.
	Balance,
	/// Credit the balance, amount in minor units.
	TopUp(i64),
	/// Debit the balance, amount in minor units.
	Withdraw(i64),
	/// List discoverable providers.
	Providers,
	/// Start the new-service flow.
	NewService,
	/// List the caller's own services.
	ListServices,
	/// Toggle a service's active flag.
	ToggleService(String),
	/// Delete a service.
	DeleteService(String),
	/// Start the new-order flow.
	NewOrder,
	/// Accept a pending order.
	AcceptOrder(String),
	/// Start the session of an accepted session order.
	StartSession(String),
	/// Mark an order delivered.
	CompleteOrder(String),
	/// Cancel a pending order.
	CancelOrder(String),
	/// Rate a completed order, 1 to 5.
	RateOrder(String, u8),
	/// Start the report-problem flow.
	ReportProblem,
	/// Start the edit-profile flow.
	EditProfile,
	/// External payment confirmation for an order.
	ConfirmPayment {
		order_id: String,
		amount_minor: i64,
		currency: String,
	},
	/// Abort the open flow.
	CancelFlow,
	/// Free text fed into the open conversation flow.
	Text(String),
}

/// Decodes one line of inbound text.
///
/// Malformed slash commands return a usage string to echo back; any other
/// input is passed through as flow text.
pub fn decode(input: &str) -> Result<Command, String> {
	let input = input.trim();
	if !input.starts_with('/') {
		return Ok(Command::Text(input.to_string()));
	}

	let mut parts = input.split_whitespace();
	let head = parts.next().unwrap_or_default();
	let args: Vec<&str> = parts.collect();

	let amount = |value: &str, usage: &str| {
		parse_amount_minor(value).map_err(|e| format!("{}. Usage: {}", e, usage))
	};

	match (head, args.as_slice()) {
		("/start", []) => Ok(Command::Start),
		("/menu", []) => Ok(Command::Menu),
		("/terms", []) => Ok(Command::AcceptTerms),
		("/provider", []) => Ok(Command::BecomeProvider),
		("/available", ["on"]) => Ok(Command::SetAvailable(true)),
		("/available", ["off"]) => Ok(Command::SetAvailable(false)),
		("/available", _) => Err("Usage: /available on|off".into()),
		("/approve", [handle]) => Ok(Command::Approve(handle.to_string())),
		("/reject", [handle]) => Ok(Command::Reject(handle.to_string())),
		("/approve", _) | ("/reject", _) => Err("Usage: /approve <handle>".into()),
		("/balance", []) => Ok(Command::Balance),
		("/topup", [value]) => Ok(Command::TopUp(amount(value, "/topup 50.00")?)),
		("/topup", _) => Err("Usage: /topup 50.00".into()),
		("/withdraw", [value]) => Ok(Command::Withdraw(amount(value, "/withdraw 20.00")?)),
		("/withdraw", _) => Err("Usage: /withdraw 20.00".into()),
		("/providers", []) => Ok(Command::Providers),
		("/profile", []) => Ok(Command::EditProfile),
		("/service", ["new"]) => Ok(Command::NewService),
		("/service", ["list"]) => Ok(Command::ListServices),
		("/service", ["toggle", id]) => Ok(Command::ToggleService(id.to_string())),
		("/service", ["delete", id]) => Ok(Command::DeleteService(id.to_string())),
		("/service", _) => Err("Usage: /service new|list|toggle <id>|delete <id>".into()),
		("/order", ["new"]) => Ok(Command::NewOrder),
		("/order", ["accept", id]) => Ok(Command::AcceptOrder(id.to_string())),
		("/order", ["start", id]) => Ok(Command::StartSession(id.to_string())),
		("/order", ["complete", id]) => Ok(Command::CompleteOrder(id.to_string())),
		("/order", ["cancel", id]) => Ok(Command::CancelOrder(id.to_string())),
		("/order", ["rate", id, rating]) => {
			let rating: u8 = rating
				.parse()
				.map_err(|_| "Usage: /order rate <id> <1-5>".to_string())?;
			Ok(Command::RateOrder(id.to_string(), rating))
		}
		("/order", ["problem"]) => Ok(Command::ReportProblem),
		("/order", _) => Err(
			"Usage: /order new|accept <id>|start <id>|complete <id>|cancel <id>|rate <id> <1-5>|problem"
				.into(),
		),
		("/pay", [order_id, value, currency]) => Ok(Command::ConfirmPayment {
			order_id: order_id.to_string(),
			amount_minor: amount(value, "/pay <order> <amount> <currency>")?,
			currency: currency.to_uppercase(),
		}),
		("/pay", _) => Err("Usage: /pay <order> <amount> <currency>".into()),
		("/cancel", []) => Ok(Command::CancelFlow),
		_ => Err(format!(
			"Unknown command {}. Send /menu for the list of commands.",
			head
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_decodes_plain_text_as_flow_input() {
		assert_eq!(
			decode("Video session 15 min").unwrap(),
			Command::Text("Video session 15 min".into())
		);
		assert_eq!(decode("  -  ").unwrap(), Command::Text("-".into()));
	}

	#[test]
	fn test_decodes_order_commands() {
		assert_eq!(decode("/order new").unwrap(), Command::NewOrder);
		assert_eq!(
			decode("/order accept o-1").unwrap(),
			Command::AcceptOrder("o-1".into())
		);
		assert_eq!(
			decode("/order rate o-1 4").unwrap(),
			Command::RateOrder("o-1".into(), 4)
		);
	}

	#[test]
	fn test_decodes_amounts_in_minor_units() {
		assert_eq!(decode("/topup 50.00").unwrap(), Command::TopUp(5000));
		assert_eq!(decode("/withdraw 7,50").unwrap(), Command::Withdraw(750));
		assert_eq!(
			decode("/pay o-1 32.70 eur").unwrap(),
			Command::ConfirmPayment {
				order_id: "o-1".into(),
				amount_minor: 3270,
				currency: "EUR".into(),
			}
		);
	}

	#[test]
	fn test_malformed_commands_return_usage() {
		assert!(decode("/topup").unwrap_err().contains("/topup"));
		assert!(decode("/topup nonsense").unwrap_err().contains("/topup"));
		assert!(decode("/order rate o-1 five").unwrap_err().contains("rate"));
		assert!(decode("/frobnicate").unwrap_err().contains("/menu"));
	}

	#[test]
	fn test_availability_toggle() {
		assert_eq!(decode("/available on").unwrap(), Command::SetAvailable(true));
		assert_eq!(
			decode("/available off").unwrap(),
			Command::SetAvailable(false)
		);
		assert!(decode("/available maybe").is_err());
	}
}
