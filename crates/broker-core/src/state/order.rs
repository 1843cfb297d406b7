//! Order state machine implementation.
//!
//! Manages order state transitions with validation, ensuring orders move
//! through valid lifecycle states: Pending -> PendingPayment -> Accepted ->
//! InCall -> Completed, with cancellation out of the two pending states.
//! Every transition is a compare-and-set on the stored order, so a racing
//! writer observes the already-changed status instead of overwriting it.

use broker_storage::{StorageError, StorageService};
use broker_types::{Clock, Order, OrderStatus, StorageKey};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Order {id} is {actual}, expected {expected}")]
	StatusConflict {
		id: String,
		expected: OrderStatus,
		actual: OrderStatus,
	},
	#[error("Order {id} no longer satisfies the update condition (status {actual})")]
	ConditionFailed { id: String, actual: OrderStatus },
}

/// Manages order state transitions and persistence
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Gets an order by ID
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		match self
			.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
		{
			Ok(order) => Ok(order),
			Err(StorageError::NotFound) => Err(OrderStateError::OrderNotFound(order_id.to_string())),
			Err(e) => Err(OrderStateError::Storage(e.to_string())),
		}
	}

	/// Stores a new order
	pub async fn store_order(&self, order: &Order) -> Result<(), OrderStateError> {
		self.storage
			.store(StorageKey::Orders.as_str(), &order.id, order)
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))
	}

	/// Updates an order with a closure and persists it.
	///
	/// The update is unconditional; use `transition_order_status` when the
	/// change depends on the order's current status.
	pub async fn update_order_with<F>(
		&self,
		order_id: &str,
		updater: F,
	) -> Result<Order, OrderStateError>
	where
		F: Fn(&mut Order),
	{
		let now = self.clock.now();
		self.storage
			.update_where::<Order, _, _>(
				StorageKey::Orders.as_str(),
				order_id,
				|_| true,
				|order| {
					updater(order);
					order.updated_at = now;
				},
			)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => OrderStateError::OrderNotFound(order_id.to_string()),
				other => OrderStateError::Storage(other.to_string()),
			})
	}

	/// Updates an order when a predicate on its current state holds.
	///
	/// Like `transition_order_status` but with a caller-supplied predicate,
	/// for updates that also depend on non-status fields (the expiry
	/// deadline, the reminder flag). The caller is responsible for only
	/// applying status changes the transition table allows.
	pub async fn update_order_if<P, F>(
		&self,
		order_id: &str,
		check: P,
		apply: F,
	) -> Result<Order, OrderStateError>
	where
		P: Fn(&Order) -> bool,
		F: Fn(&mut Order),
	{
		let now = self.clock.now();
		match self
			.storage
			.update_where::<Order, _, _>(StorageKey::Orders.as_str(), order_id, check, |order| {
				apply(order);
				order.updated_at = now;
			})
			.await
		{
			Ok(order) => Ok(order),
			Err(StorageError::NotFound) => Err(OrderStateError::OrderNotFound(order_id.to_string())),
			Err(StorageError::PreconditionFailed) => {
				let actual = self.get_order(order_id).await?.status;
				Err(OrderStateError::ConditionFailed {
					id: order_id.to_string(),
					actual,
				})
			}
			Err(e) => Err(OrderStateError::Storage(e.to_string())),
		}
	}

	/// Transitions an order to a new status as one atomic check-and-write.
	///
	/// The transition succeeds only while the stored status is one of
	/// `from`; the status read and write happen under compare-and-set, so
	/// of N racing callers exactly one observes its expected status and
	/// wins. Losers get a `StatusConflict` carrying the status they lost
	/// to. `apply` runs inside the same write and must be idempotent.
	pub async fn transition_order_status<F>(
		&self,
		order_id: &str,
		from: &[OrderStatus],
		to: OrderStatus,
		apply: F,
	) -> Result<Order, OrderStateError>
	where
		F: Fn(&mut Order),
	{
		for status in from {
			if !Self::is_valid_transition(status, &to) {
				return Err(OrderStateError::InvalidTransition { from: *status, to });
			}
		}

		let now = self.clock.now();
		match self
			.storage
			.update_where::<Order, _, _>(
				StorageKey::Orders.as_str(),
				order_id,
				|order| from.contains(&order.status),
				|order| {
					order.status = to;
					order.updated_at = now;
					apply(order);
				},
			)
			.await
		{
			Ok(order) => Ok(order),
			Err(StorageError::NotFound) => Err(OrderStateError::OrderNotFound(order_id.to_string())),
			Err(StorageError::PreconditionFailed) => {
				let actual = self.get_order(order_id).await?.status;
				Err(OrderStateError::StatusConflict {
					id: order_id.to_string(),
					expected: from[0],
					actual,
				})
			}
			Err(e) => Err(OrderStateError::Storage(e.to_string())),
		}
	}

	/// Checks if a state transition is valid
	pub fn is_valid_transition(from: &OrderStatus, to: &OrderStatus) -> bool {
		// Static transition table - each state maps to allowed next states
		static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
			let mut m = HashMap::new();
			m.insert(
				OrderStatus::Pending,
				HashSet::from([OrderStatus::PendingPayment, OrderStatus::Cancelled]),
			);
			m.insert(
				OrderStatus::PendingPayment,
				HashSet::from([OrderStatus::Accepted, OrderStatus::Cancelled]),
			);
			m.insert(
				OrderStatus::Accepted,
				HashSet::from([OrderStatus::InCall, OrderStatus::Completed]),
			);
			m.insert(
				OrderStatus::InCall,
				HashSet::from([OrderStatus::Completed]),
			);
			m.insert(OrderStatus::Completed, HashSet::new()); // terminal
			m.insert(OrderStatus::Cancelled, HashSet::new()); // terminal
			m
		});

		TRANSITIONS.get(from).is_some_and(|set| set.contains(to))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_storage::implementations::memory::MemoryStorage;
	use broker_types::{ManualClock, PaymentStatus, ServiceCategory};

	fn order(status: OrderStatus) -> Order {
		Order {
			id: "order-1".into(),
			requester_id: "req-1".into(),
			provider_id: None,
			service_id: "svc-1".into(),
			category: ServiceCategory::Session,
			base_minor: 3000,
			fee_minor: 270,
			total_minor: 3270,
			currency: "EUR".into(),
			status,
			payment: PaymentStatus::Unpaid,
			description: None,
			session_url: None,
			rating: None,
			problem: None,
			reminded: false,
			created_at: 100,
			updated_at: 100,
			expires_at: 1000,
		}
	}

	fn machine() -> OrderStateMachine {
		OrderStateMachine::new(
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			Arc::new(ManualClock::new(200)),
		)
	}

	#[test]
	fn test_transition_table() {
		use OrderStatus::*;
		let valid = [
			(Pending, PendingPayment),
			(Pending, Cancelled),
			(PendingPayment, Accepted),
			(PendingPayment, Cancelled),
			(Accepted, InCall),
			(Accepted, Completed),
			(InCall, Completed),
		];
		for (from, to) in valid {
			assert!(
				OrderStateMachine::is_valid_transition(&from, &to),
				"{} -> {} should be allowed",
				from,
				to
			);
		}
		// Completion is only reachable out of accepted states
		let invalid = [
			(Pending, Accepted),
			(Pending, Completed),
			(Pending, InCall),
			(PendingPayment, InCall),
			(PendingPayment, Completed),
			(Accepted, Pending),
			(Completed, Cancelled),
			(Cancelled, Pending),
			(Cancelled, Completed),
		];
		for (from, to) in invalid {
			assert!(
				!OrderStateMachine::is_valid_transition(&from, &to),
				"{} -> {} should be rejected",
				from,
				to
			);
		}
	}

	#[tokio::test]
	async fn test_transition_updates_status_and_timestamp() {
		let machine = machine();
		machine.store_order(&order(OrderStatus::Pending)).await.unwrap();

		let updated = machine
			.transition_order_status(
				"order-1",
				&[OrderStatus::Pending],
				OrderStatus::PendingPayment,
				|o| o.provider_id = Some("prov-1".into()),
			)
			.await
			.unwrap();
		assert_eq!(updated.status, OrderStatus::PendingPayment);
		assert_eq!(updated.provider_id.as_deref(), Some("prov-1"));
		assert_eq!(updated.updated_at, 200);
	}

	#[tokio::test]
	async fn test_transition_conflict_reports_actual_status() {
		let machine = machine();
		machine
			.store_order(&order(OrderStatus::Accepted))
			.await
			.unwrap();

		let result = machine
			.transition_order_status(
				"order-1",
				&[OrderStatus::Pending],
				OrderStatus::PendingPayment,
				|_| {},
			)
			.await;
		match result {
			Err(OrderStateError::StatusConflict { actual, .. }) => {
				assert_eq!(actual, OrderStatus::Accepted)
			}
			other => panic!("expected status conflict, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_transition_rejects_paths_outside_table() {
		let machine = machine();
		machine.store_order(&order(OrderStatus::Pending)).await.unwrap();

		let result = machine
			.transition_order_status(
				"order-1",
				&[OrderStatus::Pending],
				OrderStatus::Completed,
				|_| {},
			)
			.await;
		assert!(matches!(
			result,
			Err(OrderStateError::InvalidTransition { .. })
		));
	}
}
