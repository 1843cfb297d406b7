//! Service catalog types.
//!
//! A service is owned by exactly one provider. Deactivation hides a service
//! from discovery without deleting order history that references it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A paid service offered by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
	/// Unique identifier for this service.
	pub id: String,
	/// Account id of the owning provider.
	pub provider_id: String,
	/// Short human-readable name.
	pub name: String,
	/// Category of the service.
	pub category: ServiceCategory,
	/// Price in minor currency units.
	pub price_minor: i64,
	/// Duration in minutes. Only set for session services.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_min: Option<u32>,
	/// Whether the service is visible for new orders.
	pub active: bool,
	/// Free-text description.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// Timestamp when this service was created.
	pub created_at: u64,
	/// Timestamp when this service was last updated.
	pub updated_at: u64,
}

/// Category of a service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
	/// Live time-bounded session delivered over a call link.
	Session,
	/// Deliverable produced and handed over asynchronously.
	Deliverable,
	/// Anything else.
	Other,
}

impl fmt::Display for ServiceCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ServiceCategory::Session => write!(f, "session"),
			ServiceCategory::Deliverable => write!(f, "deliverable"),
			ServiceCategory::Other => write!(f, "other"),
		}
	}
}

impl FromStr for ServiceCategory {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"session" => Ok(Self::Session),
			"deliverable" => Ok(Self::Deliverable),
			"other" => Ok(Self::Other),
			_ => Err(()),
		}
	}
}
