//! Log-based notifier implementation.
//!
//! Writes every notification to the tracing log instead of a chat
//! transport. This is the default for local runs and demos.

use crate::{NotifyAction, NotifyError, NotifyInterface};
use async_trait::async_trait;

/// Notifier that emits notifications as log lines.
pub struct LogNotifier;

#[async_trait]
impl NotifyInterface for LogNotifier {
	async fn deliver(
		&self,
		handle: &str,
		message: &str,
		action: Option<&NotifyAction>,
	) -> Result<(), NotifyError> {
		match action {
			Some(action) => tracing::info!(
				target: "broker_notify",
				handle = %handle,
				action = %action.command,
				"{}",
				message
			),
			None => tracing::info!(target: "broker_notify", handle = %handle, "{}", message),
		}
		Ok(())
	}
}

/// Factory function to create a log notifier from configuration.
///
/// Configuration parameters:
/// - None required
pub fn create_notifier(_config: &toml::Value) -> Result<Box<dyn NotifyInterface>, NotifyError> {
	Ok(Box::new(LogNotifier))
}
