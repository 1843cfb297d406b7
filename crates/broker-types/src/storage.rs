//! Storage-related types for the broker system.

use std::str::FromStr;

/// Storage keys for different data collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Key for storing account records
	Accounts,
	/// Key for mapping chat handles to account ids
	AccountHandles,
	/// Key for storing service records
	Services,
	/// Key for storing order records
	Orders,
	/// Key for storing append-only ledger entries
	Ledger,
	/// Key for storing open conversation flows
	Flows,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Accounts => "accounts",
			StorageKey::AccountHandles => "account_handles",
			StorageKey::Services => "services",
			StorageKey::Orders => "orders",
			StorageKey::Ledger => "ledger",
			StorageKey::Flows => "flows",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Accounts,
			Self::AccountHandles,
			Self::Services,
			Self::Orders,
			Self::Ledger,
			Self::Flows,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"accounts" => Ok(Self::Accounts),
			"account_handles" => Ok(Self::AccountHandles),
			"services" => Ok(Self::Services),
			"orders" => Ok(Self::Orders),
			"ledger" => Ok(Self::Ledger),
			"flows" => Ok(Self::Flows),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
