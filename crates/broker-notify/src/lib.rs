//! Notification module for the broker system.
//!
//! Outbound messages to participants are fire-and-forget: delivery is
//! best-effort, failures are logged and never escalate to the caller. The
//! transport that actually renders messages and buttons sits behind the
//! NotifyInterface trait.

use async_trait::async_trait;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod log;
	pub mod memory;
}

/// Errors that can occur during notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
	/// Error that occurs when the transport fails to deliver.
	#[error("Delivery error: {0}")]
	Delivery(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// An optional action attached to a notification, rendered by the
/// transport as a button or suggested command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyAction {
	/// Human-readable label.
	pub label: String,
	/// Command the transport submits back when the action is taken.
	pub command: String,
}

/// Trait defining the interface for notification transports.
#[async_trait]
pub trait NotifyInterface: Send + Sync {
	/// Delivers a message to the account behind the given chat handle.
	async fn deliver(
		&self,
		handle: &str,
		message: &str,
		action: Option<&NotifyAction>,
	) -> Result<(), NotifyError>;
}

/// Type alias for notifier factory functions.
pub type NotifyFactory = fn(&toml::Value) -> Result<Box<dyn NotifyInterface>, NotifyError>;

/// Service that delivers notifications on a best-effort basis.
///
/// Wraps a transport implementation and swallows delivery failures after
/// logging them, so no caller ever fails because a notification could not
/// be sent.
pub struct NotifyService {
	backend: Box<dyn NotifyInterface>,
}

impl NotifyService {
	/// Creates a new NotifyService with the specified transport.
	pub fn new(backend: Box<dyn NotifyInterface>) -> Self {
		Self { backend }
	}

	/// Sends a plain message. Failures are logged, never returned.
	pub async fn notify(&self, handle: &str, message: &str) {
		self.notify_with_action(handle, message, None).await;
	}

	/// Sends a message with an optional action. Failures are logged,
	/// never returned.
	pub async fn notify_with_action(
		&self,
		handle: &str,
		message: &str,
		action: Option<&NotifyAction>,
	) {
		if let Err(e) = self.backend.deliver(handle, message, action).await {
			tracing::warn!(handle = %handle, error = %e, "Failed to deliver notification");
		}
	}
}
