//! Configuration module for the escrow broker system.
//!
//! This module provides structures and utilities for managing broker
//! configuration. It supports loading configuration from TOML files,
//! resolving `${VAR}` and `${VAR:-default}` environment references and
//! validating that all required configuration values are properly set.

use broker_types::PaymentMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration specific to the broker instance.
	pub broker: BrokerConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for the notification transport.
	pub notify: NotifyConfig,
	/// Configuration for order fees, expiry and payment mode.
	pub orders: OrdersConfig,
	/// Configuration for the background sweeper.
	#[serde(default)]
	pub sweeper: SweeperConfig,
}

/// Configuration specific to the broker instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
	/// Unique identifier for this broker instance.
	pub id: String,
	/// Chat handles granted the operator role on first contact.
	#[serde(default)]
	pub operators: Vec<String>,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the notification transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of notifier implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for order fees, expiry and payment mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrdersConfig {
	/// ISO currency code all orders are priced in.
	pub currency: String,
	/// Proportional fee in basis points applied to the base amount.
	#[serde(default = "default_fee_rate_bps")]
	pub fee_rate_bps: u32,
	/// Flat fee in minor units added on top of the proportional fee.
	#[serde(default = "default_flat_fee_minor")]
	pub flat_fee_minor: i64,
	/// Minutes a pending order stays open before the sweeper expires it.
	#[serde(default = "default_expiry_minutes")]
	pub expiry_minutes: u64,
	/// Where funds are committed at accept time.
	#[serde(default = "default_payment_mode")]
	pub payment: PaymentMode,
	/// Base URL that session links are derived from.
	#[serde(default = "default_session_url_base")]
	pub session_url_base: String,
}

/// Returns the default proportional fee of 8%.
fn default_fee_rate_bps() -> u32 {
	800
}

/// Returns the default flat fee of 30 minor units.
fn default_flat_fee_minor() -> i64 {
	30
}

/// Returns the default pending-order lifetime of 24 hours.
fn default_expiry_minutes() -> u64 {
	1440
}

/// Returns the default payment mode.
fn default_payment_mode() -> PaymentMode {
	PaymentMode::Balance
}

/// Returns the default session link base.
fn default_session_url_base() -> String {
	"https://meet.jit.si/SafeSession".to_string()
}

/// Configuration for the background sweeper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweeperConfig {
	/// Seconds between sweeper ticks.
	#[serde(default = "default_interval_seconds")]
	pub interval_seconds: u64,
	/// Minutes a pending order may sit before its one reminder is sent.
	#[serde(default = "default_reminder_minutes")]
	pub reminder_minutes: u64,
}

impl Default for SweeperConfig {
	fn default() -> Self {
		Self {
			interval_seconds: default_interval_seconds(),
			reminder_minutes: default_reminder_minutes(),
		}
	}
}

/// Returns the default sweeper interval of 5 minutes.
fn default_interval_seconds() -> u64 {
	300
}

/// Returns the default reminder threshold of 1 hour.
fn default_reminder_minutes() -> u64 {
	60
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let full_match = cap.get(0).unwrap();
		let var_name = cap.get(1).unwrap().as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => {
				if let Some(default) = default_value {
					default.to_string()
				} else {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				}
			}
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file with environment variable resolution.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let contents = tokio::fs::read_to_string(path).await?;
		contents.parse()
	}

	/// Validates the configuration to ensure all required fields are
	/// properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.broker.id.is_empty() {
			return Err(ConfigError::Validation("Broker ID cannot be empty".into()));
		}

		// Validate storage config
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		// Validate notify config
		if self.notify.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one notify implementation must be configured".into(),
			));
		}
		if !self
			.notify
			.implementations
			.contains_key(&self.notify.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary notifier '{}' not found in implementations",
				self.notify.primary
			)));
		}

		// Validate orders config
		if self.orders.currency.len() != 3
			|| !self.orders.currency.chars().all(|c| c.is_ascii_uppercase())
		{
			return Err(ConfigError::Validation(format!(
				"Currency must be a 3-letter ISO code, got '{}'",
				self.orders.currency
			)));
		}
		if self.orders.fee_rate_bps > 10_000 {
			return Err(ConfigError::Validation(
				"fee_rate_bps cannot exceed 10000 (100%)".into(),
			));
		}
		if self.orders.flat_fee_minor < 0 {
			return Err(ConfigError::Validation(
				"flat_fee_minor cannot be negative".into(),
			));
		}
		if self.orders.expiry_minutes == 0 {
			return Err(ConfigError::Validation(
				"expiry_minutes must be greater than 0".into(),
			));
		}
		if self.orders.session_url_base.is_empty() {
			return Err(ConfigError::Validation(
				"session_url_base cannot be empty".into(),
			));
		}

		// Validate sweeper config
		if self.sweeper.interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"Sweeper interval_seconds must be greater than 0".into(),
			));
		}
		if self.sweeper.interval_seconds > 86_400 {
			return Err(ConfigError::Validation(
				"Sweeper interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}
		if self.sweeper.reminder_minutes == 0 {
			return Err(ConfigError::Validation(
				"Sweeper reminder_minutes must be greater than 0".into(),
			));
		}
		if self.sweeper.reminder_minutes >= self.orders.expiry_minutes {
			return Err(ConfigError::Validation(
				"reminder_minutes must be below orders.expiry_minutes".into(),
			));
		}

		Ok(())
	}
}

/// Implementation of FromStr trait for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is
/// automatically validated after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const VALID_CONFIG: &str = r#"
[broker]
id = "test-broker"

[storage]
primary = "memory"
[storage.implementations.memory]

[notify]
primary = "log"
[notify.implementations.log]

[orders]
currency = "EUR"
fee_rate_bps = 800
flat_fee_minor = 30
expiry_minutes = 1440
payment = "balance"

[sweeper]
interval_seconds = 300
reminder_minutes = 60
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("TEST_BROKER_HOST", "localhost");
		std::env::set_var("TEST_BROKER_PORT", "5432");

		let input = "host = \"${TEST_BROKER_HOST}:${TEST_BROKER_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("TEST_BROKER_HOST");
		std::env::remove_var("TEST_BROKER_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${MISSING_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("MISSING_VAR"));
	}

	#[test]
	fn test_parse_valid_config() {
		let config: Config = VALID_CONFIG.parse().unwrap();
		assert_eq!(config.broker.id, "test-broker");
		assert!(config.broker.operators.is_empty());
		assert_eq!(config.storage.primary, "memory");
		assert_eq!(config.orders.fee_rate_bps, 800);
		assert_eq!(config.orders.payment, PaymentMode::Balance);
		assert_eq!(config.sweeper.interval_seconds, 300);
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = r#"
[broker]
id = "b"

[storage]
primary = "memory"
[storage.implementations.memory]

[notify]
primary = "log"
[notify.implementations.log]

[orders]
currency = "EUR"
"#
		.parse()
		.unwrap();
		assert_eq!(config.orders.fee_rate_bps, 800);
		assert_eq!(config.orders.flat_fee_minor, 30);
		assert_eq!(config.orders.expiry_minutes, 1440);
		assert_eq!(config.sweeper.interval_seconds, 300);
		assert_eq!(config.sweeper.reminder_minutes, 60);
	}

	#[test]
	fn test_rejects_unknown_primary_storage() {
		let bad = VALID_CONFIG.replace("primary = \"memory\"", "primary = \"redis\"");
		let result: Result<Config, _> = bad.parse();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_rejects_bad_currency() {
		let bad = VALID_CONFIG.replace("currency = \"EUR\"", "currency = \"euros\"");
		let result: Result<Config, _> = bad.parse();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_rejects_reminder_beyond_expiry() {
		let bad = VALID_CONFIG.replace("reminder_minutes = 60", "reminder_minutes = 2000");
		let result: Result<Config, _> = bad.parse();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}
}
