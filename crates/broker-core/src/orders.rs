//! Order lifecycle operations.
//!
//! Owns creation, acceptance, payment confirmation, session start,
//! completion, cancellation and expiry of orders, coupling every status
//! change to the ledger movements the same business event requires. The
//! acceptance race is settled by a single compare-and-set on the order
//! status; funds are committed at accept time, never at creation, so
//! creation needs no rollback.

use crate::engine::event_bus::EventBus;
use crate::state::{OrderStateError, OrderStateMachine};
use broker_account::{AccountError, AccountService};
use broker_catalog::{CatalogError, CatalogService};
use broker_config::OrdersConfig;
use broker_ledger::{LedgerError, LedgerService};
use broker_notify::{NotifyAction, NotifyService};
use broker_types::{
	format_minor, truncate_id, BrokerEvent, Clock, EntryKind, LedgerEvent, Order, OrderEvent,
	OrderStatus, PaymentMode, PaymentStatus, Role, ServiceCategory,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during order operations.
///
/// All variants are recoverable at the call site and are rendered into a
/// user-facing message by the transport layer.
#[derive(Debug, Error)]
pub enum OrderError {
	/// Error that occurs when an operation is attempted from a state that
	/// does not permit it.
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	/// Error that occurs when the acceptance race was lost.
	#[error("Order already accepted")]
	AlreadyAccepted,
	/// Error that occurs when the actor lacks rights over the order.
	#[error("Not the owner of this order")]
	NotOwner,
	/// Error that occurs when the requester's balance cannot cover the hold.
	#[error("Insufficient funds")]
	InsufficientFunds,
	/// Error that occurs when a provider acts before approval.
	#[error("Provider approval required")]
	NotApproved,
	/// Error that occurs when a payment confirmation does not match the
	/// order total and currency.
	#[error("Payment mismatch: expected {expected}")]
	AmountMismatch { expected: String },
	/// Error that occurs when acting on an order past its deadline.
	#[error("Order expired")]
	Expired,
	/// Error that occurs when input fails validation.
	#[error("Validation failed: {0}")]
	Validation(String),
	/// Error that occurs when the order or a referenced entity is missing.
	#[error("Not found: {0}")]
	NotFound(String),
	/// Error that occurs in the storage layer.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<OrderStateError> for OrderError {
	fn from(err: OrderStateError) -> Self {
		match err {
			OrderStateError::OrderNotFound(id) => OrderError::NotFound(id),
			OrderStateError::InvalidTransition { from, to } => {
				OrderError::InvalidTransition { from, to }
			}
			OrderStateError::StatusConflict {
				expected, actual, ..
			} => OrderError::InvalidTransition {
				from: actual,
				to: expected,
			},
			// Callers driving conditional updates match this variant before
			// converting; the order's current status is all that is left to
			// report here.
			OrderStateError::ConditionFailed { actual, .. } => OrderError::InvalidTransition {
				from: actual,
				to: actual,
			},
			OrderStateError::Storage(e) => OrderError::Storage(e),
		}
	}
}

impl From<AccountError> for OrderError {
	fn from(err: AccountError) -> Self {
		match err {
			AccountError::NotFound(id) => OrderError::NotFound(id),
			AccountError::Storage(e) => OrderError::Storage(e),
		}
	}
}

impl From<CatalogError> for OrderError {
	fn from(err: CatalogError) -> Self {
		match err {
			CatalogError::NotFound(id) => OrderError::NotFound(id),
			CatalogError::NotOwner => OrderError::NotOwner,
			CatalogError::NotApproved => OrderError::NotApproved,
			CatalogError::Validation(e) => OrderError::Validation(e),
			CatalogError::Storage(e) => OrderError::Storage(e),
		}
	}
}

impl From<LedgerError> for OrderError {
	fn from(err: LedgerError) -> Self {
		match err {
			LedgerError::InsufficientFunds => OrderError::InsufficientFunds,
			LedgerError::NotFound(id) => OrderError::NotFound(id),
			LedgerError::InvalidAmount(a) => OrderError::Validation(format!("invalid amount {}", a)),
			LedgerError::Storage(e) => OrderError::Storage(e),
		}
	}
}

/// Service that drives the order lifecycle.
pub struct OrderService {
	state: Arc<OrderStateMachine>,
	accounts: Arc<AccountService>,
	catalog: Arc<CatalogService>,
	ledger: Arc<LedgerService>,
	notify: Arc<NotifyService>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
	settings: OrdersConfig,
}

impl OrderService {
	/// Creates a new OrderService.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		state: Arc<OrderStateMachine>,
		accounts: Arc<AccountService>,
		catalog: Arc<CatalogService>,
		ledger: Arc<LedgerService>,
		notify: Arc<NotifyService>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
		settings: OrdersConfig,
	) -> Self {
		Self {
			state,
			accounts,
			catalog,
			ledger,
			notify,
			event_bus,
			clock,
			settings,
		}
	}

	/// Publishes the balance movement an order operation just applied.
	fn publish_balance(&self, account_id: &str, kind: EntryKind, amount_minor: i64, balance_minor: i64) {
		self.event_bus
			.publish(BrokerEvent::Ledger(LedgerEvent::BalanceChanged {
				account_id: account_id.to_string(),
				kind,
				amount_minor,
				balance_minor,
			}))
			.ok();
	}

	/// Gets an order by id.
	pub async fn get(&self, order_id: &str) -> Result<Order, OrderError> {
		Ok(self.state.get_order(order_id).await?)
	}

	/// Computes the brokerage fee for a base amount, rounding half up.
	pub fn fee_for(&self, base_minor: i64) -> i64 {
		let proportional =
			(base_minor as i128 * self.settings.fee_rate_bps as i128 + 5_000) / 10_000;
		proportional as i64 + self.settings.flat_fee_minor
	}

	/// Creates an order against an active service.
	///
	/// No funds move here: creation is free to the requester and never
	/// needs a rollback. The service's owning provider is invited with a
	/// notification carrying the accept command.
	pub async fn create(
		&self,
		requester_id: &str,
		service_id: &str,
		details: Option<&str>,
	) -> Result<Order, OrderError> {
		let requester = self.accounts.get(requester_id).await?;
		if requester.role != Role::Requester {
			return Err(OrderError::Validation(
				"only requester accounts can place orders".into(),
			));
		}
		let service = self.catalog.get(service_id).await?;
		if !service.active {
			return Err(OrderError::NotFound(service_id.to_string()));
		}
		let provider = self.accounts.get(&service.provider_id).await?;
		if !provider.is_approved_provider() {
			return Err(OrderError::NotApproved);
		}

		let base_minor = service.price_minor;
		let fee_minor = self.fee_for(base_minor);
		let description = match details {
			Some(details) if !details.is_empty() => {
				Some(format!("{} - {}", service.name, details))
			}
			_ => Some(service.name.clone()),
		};
		let now = self.clock.now();
		let order = Order {
			id: Uuid::new_v4().to_string(),
			requester_id: requester.id.clone(),
			provider_id: None,
			service_id: service.id.clone(),
			category: service.category,
			base_minor,
			fee_minor,
			total_minor: base_minor + fee_minor,
			currency: self.settings.currency.clone(),
			status: OrderStatus::Pending,
			payment: PaymentStatus::Unpaid,
			description,
			session_url: None,
			rating: None,
			problem: None,
			reminded: false,
			created_at: now,
			updated_at: now,
			expires_at: now + self.settings.expiry_minutes * 60,
		};
		self.state.store_order(&order).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			requester_id = %truncate_id(&order.requester_id),
			total_minor = order.total_minor,
			"Created order"
		);
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::Created {
				order_id: order.id.clone(),
				requester_id: order.requester_id.clone(),
			}))
			.ok();
		self.notify
			.notify_with_action(
				&provider.handle,
				&format!(
					"New order {}: {} for {}.",
					order.id,
					order.description.as_deref().unwrap_or(""),
					format_minor(order.total_minor, &order.currency)
				),
				Some(&NotifyAction {
					label: "Accept".into(),
					command: format!("order accept {}", order.id),
				}),
			)
			.await;
		Ok(order)
	}

	/// Accepts a pending order on behalf of a provider.
	///
	/// Exactly one provider may ever be bound to an order: the transition
	/// out of `pending` is a single compare-and-set, and every losing
	/// caller gets `AlreadyAccepted`. Funds are committed here. With
	/// balance payment the requester's total is held in escrow and the
	/// order lands in `accepted`; with external payment the order waits in
	/// `pending_payment` for `confirm_payment`.
	pub async fn accept(&self, order_id: &str, provider_id: &str) -> Result<Order, OrderError> {
		let provider = self.accounts.get(provider_id).await?;
		if !provider.is_approved_provider() {
			return Err(OrderError::NotApproved);
		}

		let order = self.state.get_order(order_id).await?;
		match order.status {
			OrderStatus::Pending => {}
			OrderStatus::Cancelled => {
				return Err(OrderError::InvalidTransition {
					from: OrderStatus::Cancelled,
					to: OrderStatus::PendingPayment,
				})
			}
			_ => return Err(OrderError::AlreadyAccepted),
		}
		if order.expires_at <= self.clock.now() {
			return Err(OrderError::Expired);
		}

		// The race-settling step: first caller to swap pending away wins.
		// Losing the swap always reads as AlreadyAccepted; funds are only
		// checked by the winner, whose failed hold rolls the order back.
		let order = match self
			.state
			.transition_order_status(
				order_id,
				&[OrderStatus::Pending],
				OrderStatus::PendingPayment,
				|o| o.provider_id = Some(provider.id.clone()),
			)
			.await
		{
			Ok(order) => order,
			Err(OrderStateError::StatusConflict { actual, .. }) => {
				return match actual {
					OrderStatus::Cancelled => Err(OrderError::InvalidTransition {
						from: OrderStatus::Cancelled,
						to: OrderStatus::PendingPayment,
					}),
					_ => Err(OrderError::AlreadyAccepted),
				}
			}
			Err(e) => return Err(e.into()),
		};

		let requester = self.accounts.get(&order.requester_id).await?;
		match self.settings.payment {
			PaymentMode::Balance => {
				let balance = match self
					.ledger
					.hold(&order.requester_id, order.total_minor, Some(order_id))
					.await
				{
					Ok(balance) => balance,
					Err(e) => {
						// Compensation: the hold failed, so the acceptance
						// must not become visible. Unbind the provider and
						// put the order back up for grabs. A concurrent
						// cancel that already closed the order wins and the
						// rollback is a no-op.
						let bound = provider.id.clone();
						self.state
							.update_order_if(
								order_id,
								|o| {
									o.status == OrderStatus::PendingPayment
										&& o.provider_id.as_deref() == Some(bound.as_str())
								},
								|o| {
									o.status = OrderStatus::Pending;
									o.provider_id = None;
								},
							)
							.await
							.ok();
						self.notify
							.notify(
								&requester.handle,
								&format!(
									"Order {} could not be accepted: balance too low. Top up to keep it open.",
									order_id
								),
							)
							.await;
						return Err(e.into());
					}
				};
				self.publish_balance(
					&order.requester_id,
					EntryKind::Hold,
					order.total_minor,
					balance,
				);

				let order = match self
					.state
					.transition_order_status(
						order_id,
						&[OrderStatus::PendingPayment],
						OrderStatus::Accepted,
						|o| o.payment = PaymentStatus::Paid,
					)
					.await
				{
					Ok(order) => order,
					Err(e) => {
						// A concurrent cancel won; it saw the order unpaid,
						// so the hold reversal is on us.
						let balance = self
							.ledger
							.release(&order.requester_id, order.total_minor, Some(order_id))
							.await?;
						self.publish_balance(
							&order.requester_id,
							EntryKind::Release,
							order.total_minor,
							balance,
						);
						return Err(e.into());
					}
				};

				tracing::info!(
					order_id = %truncate_id(order_id),
					provider_id = %truncate_id(provider_id),
					"Accepted order with escrow hold"
				);
				self.event_bus
					.publish(BrokerEvent::Order(OrderEvent::Accepted {
						order_id: order.id.clone(),
						provider_id: provider.id.clone(),
					}))
					.ok();
				self.notify
					.notify(
						&requester.handle,
						&format!(
							"Your order {} was accepted. {} is held in escrow.",
							order.id,
							format_minor(order.total_minor, &order.currency)
						),
					)
					.await;
				Ok(order)
			}
			PaymentMode::External => {
				tracing::info!(
					order_id = %truncate_id(order_id),
					provider_id = %truncate_id(provider_id),
					"Accepted order, awaiting external payment"
				);
				self.notify
					.notify(
						&requester.handle,
						&format!(
							"Your order {} was accepted. Pay {} to confirm.",
							order.id,
							format_minor(order.total_minor, &order.currency)
						),
					)
					.await;
				Ok(order)
			}
		}
	}

	/// Confirms an external payment against an order awaiting it.
	///
	/// The paid amount and currency must match the order total exactly.
	pub async fn confirm_payment(
		&self,
		order_id: &str,
		paid_minor: i64,
		paid_currency: &str,
	) -> Result<Order, OrderError> {
		let order = self.state.get_order(order_id).await?;
		if paid_minor != order.total_minor || paid_currency != order.currency {
			return Err(OrderError::AmountMismatch {
				expected: format_minor(order.total_minor, &order.currency),
			});
		}

		let order = self
			.state
			.transition_order_status(
				order_id,
				&[OrderStatus::PendingPayment],
				OrderStatus::Accepted,
				|o| o.payment = PaymentStatus::Paid,
			)
			.await?;

		tracing::info!(order_id = %truncate_id(order_id), "Confirmed payment");
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::PaymentConfirmed {
				order_id: order.id.clone(),
			}))
			.ok();
		let requester = self.accounts.get(&order.requester_id).await?;
		self.notify
			.notify(
				&requester.handle,
				&format!("Payment received for order {}.", order.id),
			)
			.await;
		if let Some(provider_id) = &order.provider_id {
			let provider = self.accounts.get(provider_id).await?;
			self.notify
				.notify(&provider.handle, &format!("Order {} is paid.", order.id))
				.await;
		}
		Ok(order)
	}

	/// Starts the session for an accepted session order.
	///
	/// Idempotent: an order already in call returns its existing session
	/// link instead of erroring.
	pub async fn start_session(
		&self,
		order_id: &str,
		provider_id: &str,
	) -> Result<Order, OrderError> {
		let order = self.state.get_order(order_id).await?;
		if order.provider_id.as_deref() != Some(provider_id) {
			return Err(OrderError::NotOwner);
		}
		if order.category != ServiceCategory::Session {
			return Err(OrderError::InvalidTransition {
				from: order.status,
				to: OrderStatus::InCall,
			});
		}
		if order.status == OrderStatus::InCall {
			return Ok(order);
		}

		let token = Uuid::new_v4().simple().to_string();
		let session_url = format!(
			"{}_{}_{}",
			self.settings.session_url_base,
			order_id,
			&token[..6]
		);
		let order = match self
			.state
			.transition_order_status(
				order_id,
				&[OrderStatus::Accepted],
				OrderStatus::InCall,
				|o| o.session_url = Some(session_url.clone()),
			)
			.await
		{
			Ok(order) => order,
			Err(OrderStateError::StatusConflict {
				actual: OrderStatus::InCall,
				..
			}) => return Ok(self.state.get_order(order_id).await?),
			Err(e) => return Err(e.into()),
		};

		let url = order.session_url.clone().unwrap_or_default();
		tracing::info!(order_id = %truncate_id(order_id), "Started session");
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::SessionStarted {
				order_id: order.id.clone(),
				session_url: url.clone(),
			}))
			.ok();
		let requester = self.accounts.get(&order.requester_id).await?;
		self.notify
			.notify(
				&requester.handle,
				&format!("Your session for order {} is ready: {}", order.id, url),
			)
			.await;
		Ok(order)
	}

	/// Marks an order delivered and releases the base amount to the provider.
	///
	/// The fee is retained by the broker, not released to anyone.
	pub async fn complete(&self, order_id: &str, provider_id: &str) -> Result<Order, OrderError> {
		let order = self.state.get_order(order_id).await?;
		if order.provider_id.as_deref() != Some(provider_id) {
			return Err(OrderError::NotOwner);
		}

		let order = self
			.state
			.transition_order_status(
				order_id,
				&[OrderStatus::Accepted, OrderStatus::InCall],
				OrderStatus::Completed,
				|_| {},
			)
			.await?;

		let balance = self
			.ledger
			.release(provider_id, order.base_minor, Some(order_id))
			.await?;
		self.publish_balance(provider_id, EntryKind::Release, order.base_minor, balance);

		tracing::info!(
			order_id = %truncate_id(order_id),
			provider_id = %truncate_id(provider_id),
			released_minor = order.base_minor,
			"Completed order"
		);
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::Completed {
				order_id: order.id.clone(),
				provider_id: provider_id.to_string(),
				released_minor: order.base_minor,
			}))
			.ok();
		let requester = self.accounts.get(&order.requester_id).await?;
		self.notify
			.notify(
				&requester.handle,
				&format!("Order {} has been completed.", order.id),
			)
			.await;
		Ok(order)
	}

	/// Cancels an order on behalf of its requester.
	///
	/// Allowed only from the two pending states. Funds already held are
	/// released back to the requester.
	pub async fn cancel(&self, order_id: &str, requester_id: &str) -> Result<Order, OrderError> {
		let order = self.state.get_order(order_id).await?;
		if order.requester_id != requester_id {
			return Err(OrderError::NotOwner);
		}

		let order = self
			.state
			.transition_order_status(
				order_id,
				&[OrderStatus::Pending, OrderStatus::PendingPayment],
				OrderStatus::Cancelled,
				|_| {},
			)
			.await?;

		if order.payment == PaymentStatus::Paid {
			let balance = self
				.ledger
				.release(requester_id, order.total_minor, Some(order_id))
				.await?;
			self.publish_balance(requester_id, EntryKind::Release, order.total_minor, balance);
		}

		tracing::info!(order_id = %truncate_id(order_id), "Cancelled order");
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::Cancelled {
				order_id: order.id.clone(),
			}))
			.ok();
		if let Some(provider_id) = &order.provider_id {
			let provider = self.accounts.get(provider_id).await?;
			self.notify
				.notify(
					&provider.handle,
					&format!("Order {} was cancelled by the requester.", order.id),
				)
				.await;
		}
		Ok(order)
	}

	/// Expires a stale pending order. Called by the sweeper.
	///
	/// The status check and the deadline check are one conditional update,
	/// so a tick racing a normal transition, or a second tick, observes
	/// the changed status and fails instead of expiring twice.
	pub async fn expire(&self, order_id: &str) -> Result<Order, OrderError> {
		let now = self.clock.now();
		let order = match self
			.state
			.update_order_if(
				order_id,
				|o| o.status == OrderStatus::Pending && o.expires_at <= now,
				|o| o.status = OrderStatus::Cancelled,
			)
			.await
		{
			Ok(order) => order,
			Err(OrderStateError::ConditionFailed { actual, .. }) => {
				return Err(OrderError::InvalidTransition {
					from: actual,
					to: OrderStatus::Cancelled,
				})
			}
			Err(e) => return Err(e.into()),
		};

		// Funds commit only when an order leaves pending, so an expired
		// order is always unpaid and this branch never fires; it keeps
		// expiry on the same reversal rule as cancel.
		if order.payment == PaymentStatus::Paid {
			let balance = self
				.ledger
				.release(&order.requester_id, order.total_minor, Some(order_id))
				.await?;
			self.publish_balance(
				&order.requester_id,
				EntryKind::Release,
				order.total_minor,
				balance,
			);
		}

		tracing::info!(order_id = %truncate_id(order_id), "Expired order");
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::Expired {
				order_id: order.id.clone(),
			}))
			.ok();
		let requester = self.accounts.get(&order.requester_id).await?;
		self.notify
			.notify(
				&requester.handle,
				&format!("Order {} expired and was cancelled.", order.id),
			)
			.await;
		Ok(order)
	}

	/// Records a post-completion rating from the requester.
	pub async fn rate(
		&self,
		order_id: &str,
		requester_id: &str,
		rating: u8,
	) -> Result<Order, OrderError> {
		if !(1..=5).contains(&rating) {
			return Err(OrderError::Validation(
				"rating must be between 1 and 5".into(),
			));
		}
		let order = self.completed_order_of(order_id, requester_id).await?;
		Ok(self
			.state
			.update_order_with(&order.id, |o| o.rating = Some(rating))
			.await?)
	}

	/// Records a post-completion problem report and alerts the operators.
	pub async fn report_problem(
		&self,
		order_id: &str,
		requester_id: &str,
		details: &str,
	) -> Result<Order, OrderError> {
		if details.trim().is_empty() {
			return Err(OrderError::Validation(
				"problem description must not be empty".into(),
			));
		}
		let order = self.completed_order_of(order_id, requester_id).await?;
		let order = self
			.state
			.update_order_with(&order.id, |o| o.problem = Some(details.trim().to_string()))
			.await?;

		for operator in self.accounts.list_by_role(Role::Operator).await? {
			self.notify
				.notify(
					&operator.handle,
					&format!("Problem reported on order {}: {}", order.id, details.trim()),
				)
				.await;
		}
		Ok(order)
	}

	/// Loads a completed order owned by the given requester.
	///
	/// `Completed` is terminal, so the pre-check cannot be raced into a
	/// different status afterwards.
	async fn completed_order_of(
		&self,
		order_id: &str,
		requester_id: &str,
	) -> Result<Order, OrderError> {
		let order = self.state.get_order(order_id).await?;
		if order.requester_id != requester_id {
			return Err(OrderError::NotOwner);
		}
		if order.status != OrderStatus::Completed {
			return Err(OrderError::InvalidTransition {
				from: order.status,
				to: OrderStatus::Completed,
			});
		}
		Ok(order)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_notify::implementations::memory::MemoryNotifier;
	use broker_storage::implementations::memory::MemoryStorage;
	use broker_storage::StorageService;
	use broker_types::{Account, ApprovalStatus, ManualClock, Role, Service};

	struct Fixture {
		orders: Arc<OrderService>,
		accounts: Arc<AccountService>,
		catalog: Arc<CatalogService>,
		ledger: Arc<LedgerService>,
		clock: Arc<ManualClock>,
		notifier: MemoryNotifier,
	}

	fn settings(payment: PaymentMode) -> OrdersConfig {
		OrdersConfig {
			currency: "EUR".into(),
			fee_rate_bps: 800,
			flat_fee_minor: 30,
			expiry_minutes: 60,
			payment,
			session_url_base: "https://meet.jit.si/SafeSession".into(),
		}
	}

	async fn setup(payment: PaymentMode) -> Fixture {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock = Arc::new(ManualClock::new(1_700_000_000));
		let accounts = Arc::new(AccountService::new(storage.clone(), clock.clone()));
		let catalog = Arc::new(CatalogService::new(storage.clone(), clock.clone()));
		let ledger = Arc::new(LedgerService::new(storage.clone(), clock.clone()));
		let notifier = MemoryNotifier::new();
		let notify = Arc::new(NotifyService::new(Box::new(notifier.clone())));
		let state = Arc::new(OrderStateMachine::new(storage, clock.clone()));
		let orders = Arc::new(OrderService::new(
			state,
			accounts.clone(),
			catalog.clone(),
			ledger.clone(),
			notify,
			EventBus::new(16),
			clock.clone(),
			settings(payment),
		));
		Fixture {
			orders,
			accounts,
			catalog,
			ledger,
			clock,
			notifier,
		}
	}

	async fn approved_provider(fixture: &Fixture, handle: &str) -> Account {
		let account = fixture.accounts.find_or_create(handle).await.unwrap();
		fixture
			.accounts
			.set_role(&account.id, Role::Provider)
			.await
			.unwrap();
		fixture
			.accounts
			.set_approval(&account.id, ApprovalStatus::Approved)
			.await
			.unwrap()
	}

	async fn session_service(fixture: &Fixture, provider: &Account, price_minor: i64) -> Service {
		fixture
			.catalog
			.create_service(
				provider,
				"Video session",
				ServiceCategory::Session,
				price_minor,
				Some(15),
				None,
			)
			.await
			.unwrap()
	}

	async fn placed_order(fixture: &Fixture, price_minor: i64) -> (Order, Account, Account) {
		let provider = approved_provider(fixture, "mia").await;
		let service = session_service(fixture, &provider, price_minor).await;
		let requester = fixture.accounts.find_or_create("alice").await.unwrap();
		let order = fixture
			.orders
			.create(&requester.id, &service.id, None)
			.await
			.unwrap();
		(order, requester, provider)
	}

	#[tokio::test]
	async fn test_create_fixes_fee_and_total() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, _, _) = placed_order(&fixture, 3000).await;

		// 8% of 3000 plus the flat 30
		assert_eq!(order.base_minor, 3000);
		assert_eq!(order.fee_minor, 270);
		assert_eq!(order.total_minor, 3270);
		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.payment, PaymentStatus::Unpaid);
		assert_eq!(order.provider_id, None);
		assert_eq!(order.expires_at, order.created_at + 60 * 60);
	}

	#[tokio::test]
	async fn test_create_moves_no_funds() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, _) = placed_order(&fixture, 3000).await;
		assert_eq!(fixture.ledger.balance(&requester.id).await.unwrap(), 0);
		assert_eq!(order.total_minor, 3270);
	}

	#[tokio::test]
	async fn test_accept_holds_total_in_escrow() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();

		let accepted = fixture.orders.accept(&order.id, &provider.id).await.unwrap();
		assert_eq!(accepted.status, OrderStatus::Accepted);
		assert_eq!(accepted.payment, PaymentStatus::Paid);
		assert_eq!(accepted.provider_id.as_deref(), Some(provider.id.as_str()));
		assert_eq!(fixture.ledger.balance(&requester.id).await.unwrap(), 1730);
	}

	#[tokio::test]
	async fn test_accept_race_has_exactly_one_winner() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, _) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 100_000).await.unwrap();

		let mut providers = Vec::new();
		for i in 0..8 {
			providers.push(approved_provider(&fixture, &format!("prov-{}", i)).await);
		}

		let mut handles = Vec::new();
		for provider in providers {
			let orders = fixture.orders.clone();
			let order_id = order.id.clone();
			handles.push(tokio::spawn(async move {
				orders.accept(&order_id, &provider.id).await
			}));
		}

		let mut winners = 0;
		let mut losers = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => winners += 1,
				Err(OrderError::AlreadyAccepted) => losers += 1,
				Err(other) => panic!("unexpected accept failure: {:?}", other),
			}
		}
		assert_eq!(winners, 1);
		assert_eq!(losers, 7);
		// Exactly one hold was placed
		assert_eq!(
			fixture.ledger.balance(&requester.id).await.unwrap(),
			100_000 - 3270
		);
	}

	#[tokio::test]
	async fn test_accept_without_funds_reopens_order() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;

		let result = fixture.orders.accept(&order.id, &provider.id).await;
		assert!(matches!(result, Err(OrderError::InsufficientFunds)));

		// The failed hold rolled the acceptance back
		let reread = fixture.orders.get(&order.id).await.unwrap();
		assert_eq!(reread.status, OrderStatus::Pending);
		assert_eq!(reread.provider_id, None);

		// After a top-up the same order can be accepted normally
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();
		let accepted = fixture.orders.accept(&order.id, &provider.id).await.unwrap();
		assert_eq!(accepted.status, OrderStatus::Accepted);
	}

	#[tokio::test]
	async fn test_accept_requires_approved_provider() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, _, _) = placed_order(&fixture, 3000).await;
		let stranger = fixture.accounts.find_or_create("bob").await.unwrap();
		fixture
			.accounts
			.set_role(&stranger.id, Role::Provider)
			.await
			.unwrap();

		let result = fixture.orders.accept(&order.id, &stranger.id).await;
		assert!(matches!(result, Err(OrderError::NotApproved)));
	}

	#[tokio::test]
	async fn test_accept_past_deadline_is_expired() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();
		fixture.clock.advance(61 * 60);

		let result = fixture.orders.accept(&order.id, &provider.id).await;
		assert!(matches!(result, Err(OrderError::Expired)));
	}

	#[tokio::test]
	async fn test_complete_releases_base_and_retains_fee() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();
		fixture.orders.accept(&order.id, &provider.id).await.unwrap();

		let completed = fixture.orders.complete(&order.id, &provider.id).await.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
		// The provider receives the base amount; the 270 fee stays held back
		assert_eq!(fixture.ledger.balance(&provider.id).await.unwrap(), 3000);
		assert_eq!(fixture.ledger.balance(&requester.id).await.unwrap(), 1730);
	}

	#[tokio::test]
	async fn test_complete_rejects_other_providers() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();
		fixture.orders.accept(&order.id, &provider.id).await.unwrap();

		let other = approved_provider(&fixture, "eve").await;
		let result = fixture.orders.complete(&order.id, &other.id).await;
		assert!(matches!(result, Err(OrderError::NotOwner)));
	}

	#[tokio::test]
	async fn test_cancel_only_by_owner_and_only_pending() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;

		let other = fixture.accounts.find_or_create("carol").await.unwrap();
		let result = fixture.orders.cancel(&order.id, &other.id).await;
		assert!(matches!(result, Err(OrderError::NotOwner)));

		let cancelled = fixture.orders.cancel(&order.id, &requester.id).await.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);

		// Terminal: acceptance and re-cancellation both fail
		let result = fixture.orders.accept(&order.id, &provider.id).await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
		let result = fixture.orders.cancel(&order.id, &requester.id).await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
	}

	#[tokio::test]
	async fn test_cancel_after_acceptance_is_rejected() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();
		fixture.orders.accept(&order.id, &provider.id).await.unwrap();

		let result = fixture.orders.cancel(&order.id, &requester.id).await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
	}

	#[tokio::test]
	async fn test_external_payment_confirmation_checks_amount_and_currency() {
		let fixture = setup(PaymentMode::External).await;
		let (order, _, provider) = placed_order(&fixture, 3000).await;

		let waiting = fixture.orders.accept(&order.id, &provider.id).await.unwrap();
		assert_eq!(waiting.status, OrderStatus::PendingPayment);
		assert_eq!(waiting.payment, PaymentStatus::Unpaid);

		let result = fixture.orders.confirm_payment(&order.id, 3270, "USD").await;
		assert!(matches!(result, Err(OrderError::AmountMismatch { .. })));
		let result = fixture.orders.confirm_payment(&order.id, 3200, "EUR").await;
		assert!(matches!(result, Err(OrderError::AmountMismatch { .. })));

		let paid = fixture
			.orders
			.confirm_payment(&order.id, 3270, "EUR")
			.await
			.unwrap();
		assert_eq!(paid.status, OrderStatus::Accepted);
		assert_eq!(paid.payment, PaymentStatus::Paid);

		// A second confirmation finds nothing to confirm
		let result = fixture.orders.confirm_payment(&order.id, 3270, "EUR").await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
	}

	#[tokio::test]
	async fn test_start_session_is_idempotent() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();
		fixture.orders.accept(&order.id, &provider.id).await.unwrap();

		let started = fixture
			.orders
			.start_session(&order.id, &provider.id)
			.await
			.unwrap();
		assert_eq!(started.status, OrderStatus::InCall);
		let url = started.session_url.clone().unwrap();
		assert!(url.starts_with("https://meet.jit.si/SafeSession"));

		let again = fixture
			.orders
			.start_session(&order.id, &provider.id)
			.await
			.unwrap();
		assert_eq!(again.session_url.as_deref(), Some(url.as_str()));

		// The session order can still be completed from in_call
		let completed = fixture.orders.complete(&order.id, &provider.id).await.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
	}

	#[tokio::test]
	async fn test_expire_is_guarded_and_idempotent() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, _, _) = placed_order(&fixture, 3000).await;

		// Too early: the deadline has not elapsed
		let result = fixture.orders.expire(&order.id).await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));

		fixture.clock.advance(61 * 60);
		let expired = fixture.orders.expire(&order.id).await.unwrap();
		assert_eq!(expired.status, OrderStatus::Cancelled);

		// Exactly once: a second sweep finds nothing to expire
		let result = fixture.orders.expire(&order.id).await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
	}

	#[tokio::test]
	async fn test_rate_and_problem_report_require_completion() {
		let fixture = setup(PaymentMode::Balance).await;
		let (order, requester, provider) = placed_order(&fixture, 3000).await;
		fixture.ledger.top_up(&requester.id, 5000).await.unwrap();

		let result = fixture.orders.rate(&order.id, &requester.id, 5).await;
		assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));

		fixture.orders.accept(&order.id, &provider.id).await.unwrap();
		fixture.orders.complete(&order.id, &provider.id).await.unwrap();

		let result = fixture.orders.rate(&order.id, &requester.id, 6).await;
		assert!(matches!(result, Err(OrderError::Validation(_))));
		let rated = fixture.orders.rate(&order.id, &requester.id, 4).await.unwrap();
		assert_eq!(rated.rating, Some(4));

		let operator = fixture.accounts.find_or_create("ops").await.unwrap();
		fixture
			.accounts
			.set_role(&operator.id, Role::Operator)
			.await
			.unwrap();
		let reported = fixture
			.orders
			.report_problem(&order.id, &requester.id, "no-show")
			.await
			.unwrap();
		assert_eq!(reported.problem.as_deref(), Some("no-show"));
		assert!(fixture
			.notifier
			.sent_to("ops")
			.iter()
			.any(|m| m.contains("no-show")));
	}
}
