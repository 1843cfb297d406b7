//! In-memory notifier implementation.
//!
//! Captures notifications in a vector so tests can assert on what was
//! sent and to whom.

use crate::{NotifyAction, NotifyError, NotifyInterface};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// One captured notification.
#[derive(Debug, Clone)]
pub struct SentNotification {
	pub handle: String,
	pub message: String,
	pub action: Option<NotifyAction>,
}

/// Notifier that records notifications instead of delivering them.
#[derive(Clone, Default)]
pub struct MemoryNotifier {
	sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl MemoryNotifier {
	/// Creates a new MemoryNotifier with an empty capture buffer.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns a copy of everything captured so far.
	pub fn sent(&self) -> Vec<SentNotification> {
		self.sent.lock().expect("notifier lock poisoned").clone()
	}

	/// Returns the messages captured for one handle.
	pub fn sent_to(&self, handle: &str) -> Vec<String> {
		self.sent()
			.into_iter()
			.filter(|n| n.handle == handle)
			.map(|n| n.message)
			.collect()
	}
}

#[async_trait]
impl NotifyInterface for MemoryNotifier {
	async fn deliver(
		&self,
		handle: &str,
		message: &str,
		action: Option<&NotifyAction>,
	) -> Result<(), NotifyError> {
		self.sent
			.lock()
			.expect("notifier lock poisoned")
			.push(SentNotification {
				handle: handle.to_string(),
				message: message.to_string(),
				action: action.cloned(),
			});
		Ok(())
	}
}

/// Factory function to create a memory notifier from configuration.
///
/// Configuration parameters:
/// - None required
pub fn create_notifier(_config: &toml::Value) -> Result<Box<dyn NotifyInterface>, NotifyError> {
	Ok(Box::new(MemoryNotifier::new()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::NotifyService;

	#[tokio::test]
	async fn test_captures_messages_per_handle() {
		let notifier = MemoryNotifier::new();
		let service = NotifyService::new(Box::new(notifier.clone()));

		service.notify("alice", "first").await;
		service
			.notify_with_action(
				"mia",
				"second",
				Some(&NotifyAction {
					label: "Accept".into(),
					command: "order accept 1".into(),
				}),
			)
			.await;

		assert_eq!(notifier.sent_to("alice"), vec!["first"]);
		let sent = notifier.sent();
		assert_eq!(sent.len(), 2);
		assert_eq!(
			sent[1].action.as_ref().map(|a| a.command.as_str()),
			Some("order accept 1")
		);
	}
}
