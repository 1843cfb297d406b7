//! Event bus for inter-service communication.
//!
//! A thin wrapper over a tokio broadcast channel. Publishing never blocks
//! and does not fail the publisher when nobody is listening.

use broker_types::BrokerEvent;
use tokio::sync::broadcast;

/// Broadcast-based event bus shared by broker services.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
	/// Creates a new event bus with the given channel capacity.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns an error only when there are no subscribers; callers treat
	/// that as uninteresting and drop it with `.ok()`.
	pub fn publish(&self, event: BrokerEvent) -> Result<(), Box<broadcast::error::SendError<BrokerEvent>>> {
		self.sender.send(event).map(|_| ()).map_err(Box::new)
	}

	/// Subscribes to all events published after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(256)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_types::OrderEvent;

	#[tokio::test]
	async fn test_subscribers_receive_published_events() {
		let bus = EventBus::new(8);
		let mut receiver = bus.subscribe();

		bus.publish(BrokerEvent::Order(OrderEvent::Created {
			order_id: "o1".into(),
			requester_id: "r1".into(),
		}))
		.unwrap();

		match receiver.recv().await.unwrap() {
			BrokerEvent::Order(OrderEvent::Created { order_id, .. }) => {
				assert_eq!(order_id, "o1")
			}
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_publish_without_subscribers_is_harmless() {
		let bus = EventBus::new(8);
		assert!(bus
			.publish(BrokerEvent::Order(OrderEvent::Cancelled {
				order_id: "o1".into(),
			}))
			.is_err());
	}
}
