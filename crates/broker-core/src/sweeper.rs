//! Background sweeper for stale pending orders.
//!
//! The sweeper runs outside the request path. Each tick scans pending
//! orders and (1) sends one reminder per order that has sat unaccepted past
//! the reminder threshold, (2) expires orders whose deadline has elapsed.
//! Both actions are guarded by conditional updates on the order record, so
//! a tick racing a normal transition, or an overlapping tick, acts at most
//! once per order.

use crate::engine::event_bus::EventBus;
use crate::orders::{OrderError, OrderService};
use crate::state::{OrderStateError, OrderStateMachine};
use broker_account::AccountService;
use broker_catalog::CatalogService;
use broker_config::SweeperConfig;
use broker_notify::{NotifyAction, NotifyService};
use broker_storage::StorageService;
use broker_types::{
	format_minor, truncate_id, BrokerEvent, Clock, Order, OrderEvent, OrderStatus, StorageKey,
};
use std::sync::Arc;

/// Counts of what one sweep tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
	/// Orders that received their one stale-order reminder.
	pub reminded: usize,
	/// Orders expired because their deadline elapsed.
	pub expired: usize,
}

/// Periodic task that reminds about and expires stale pending orders.
pub struct Sweeper {
	storage: Arc<StorageService>,
	state: Arc<OrderStateMachine>,
	orders: Arc<OrderService>,
	accounts: Arc<AccountService>,
	catalog: Arc<CatalogService>,
	notify: Arc<NotifyService>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
	config: SweeperConfig,
}

impl Sweeper {
	/// Creates a new Sweeper.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		storage: Arc<StorageService>,
		state: Arc<OrderStateMachine>,
		orders: Arc<OrderService>,
		accounts: Arc<AccountService>,
		catalog: Arc<CatalogService>,
		notify: Arc<NotifyService>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
		config: SweeperConfig,
	) -> Self {
		Self {
			storage,
			state,
			orders,
			accounts,
			catalog,
			notify,
			event_bus,
			clock,
			config,
		}
	}

	/// Returns the configured tick interval in seconds.
	pub fn interval_seconds(&self) -> u64 {
		self.config.interval_seconds
	}

	/// Runs one sweep over all pending orders.
	///
	/// Scan failures are logged and produce an empty tick; the next tick
	/// retries from scratch. Per-order failures never stop the sweep.
	pub async fn tick(&self) -> SweepStats {
		let mut stats = SweepStats::default();
		let now = self.clock.now();

		let orders: Vec<Order> = match self.storage.retrieve_all(StorageKey::Orders.as_str()).await
		{
			Ok(orders) => orders,
			Err(e) => {
				tracing::warn!(error = %e, "Sweep scan failed");
				return stats;
			}
		};

		for order in orders.iter().filter(|o| o.status == OrderStatus::Pending) {
			if order.expires_at <= now {
				match self.orders.expire(&order.id).await {
					Ok(_) => stats.expired += 1,
					// Lost to a concurrent transition or another tick.
					Err(OrderError::InvalidTransition { .. }) | Err(OrderError::NotFound(_)) => {}
					Err(e) => {
						tracing::warn!(
							order_id = %truncate_id(&order.id),
							error = %e,
							"Failed to expire order"
						);
					}
				}
			} else if !order.reminded
				&& order.created_at + self.config.reminder_minutes * 60 <= now
			{
				if self.remind(order).await {
					stats.reminded += 1;
				}
			}
		}

		if stats != SweepStats::default() {
			tracing::info!(
				reminded = stats.reminded,
				expired = stats.expired,
				"Swept pending orders"
			);
		}
		stats
	}

	/// Sends the one stale-order reminder for a pending order.
	///
	/// The reminded flag is flipped with a conditional update before
	/// anything is sent, so of two racing ticks only one delivers.
	async fn remind(&self, order: &Order) -> bool {
		let order = match self
			.state
			.update_order_if(
				&order.id,
				|o| o.status == OrderStatus::Pending && !o.reminded,
				|o| o.reminded = true,
			)
			.await
		{
			Ok(order) => order,
			Err(OrderStateError::ConditionFailed { .. })
			| Err(OrderStateError::OrderNotFound(_)) => return false,
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"Failed to mark order reminded"
				);
				return false;
			}
		};

		let message = format!(
			"Order {} ({}) is still waiting for you to accept it.",
			order.id,
			format_minor(order.total_minor, &order.currency)
		);
		match self.invited_provider_handle(&order).await {
			Some(handle) => {
				self.notify
					.notify_with_action(
						&handle,
						&message,
						Some(&NotifyAction {
							label: "Accept".into(),
							command: format!("order accept {}", order.id),
						}),
					)
					.await;
			}
			None => {
				// The service or its provider went away; the requester
				// should know the order is going nowhere.
				if let Ok(requester) = self.accounts.get(&order.requester_id).await {
					self.notify
						.notify(
							&requester.handle,
							&format!("Order {} has not been accepted yet.", order.id),
						)
						.await;
				}
			}
		}

		tracing::debug!(order_id = %truncate_id(&order.id), "Sent stale-order reminder");
		self.event_bus
			.publish(BrokerEvent::Order(OrderEvent::Reminded {
				order_id: order.id.clone(),
			}))
			.ok();
		true
	}

	/// Resolves the chat handle of the provider invited by this order.
	async fn invited_provider_handle(&self, order: &Order) -> Option<String> {
		let service = self.catalog.get(&order.service_id).await.ok()?;
		let provider = self.accounts.get(&service.provider_id).await.ok()?;
		Some(provider.handle)
	}
}
