//! Escrow ledger module for the broker system.
//!
//! The ledger keeps a monotonically-consistent balance per account derived
//! from an append-only entry log. Debits (`hold`, `withdraw`) are an atomic
//! check-and-decrement on the account record: the non-negative balance
//! check and the decrement are one conditional update, so concurrent debits
//! cannot drive a balance below zero. A materialized balance lives on the
//! account record for O(1) reads; the entry is appended by the same logical
//! operation.

use broker_storage::{StorageError, StorageService};
use broker_types::{truncate_id, Account, Clock, EntryKind, LedgerEntry, StorageKey};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// Error that occurs when a debit would make the balance negative.
	#[error("Insufficient funds")]
	InsufficientFunds,
	/// Error that occurs when the account does not exist.
	#[error("Account not found: {0}")]
	NotFound(String),
	/// Error that occurs when an amount is zero or negative.
	#[error("Invalid amount: {0}")]
	InvalidAmount(i64),
	/// Error that occurs in the storage layer.
	#[error("Storage error: {0}")]
	Storage(String),
}

/// Service that applies balance movements and appends ledger entries.
pub struct LedgerService {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl LedgerService {
	/// Creates a new LedgerService backed by the given storage.
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Places an escrow hold, debiting the payer's balance.
	pub async fn hold(
		&self,
		account_id: &str,
		amount_minor: i64,
		order_id: Option<&str>,
	) -> Result<i64, LedgerError> {
		self.apply(account_id, EntryKind::Hold, amount_minor, order_id)
			.await
	}

	/// Releases funds, crediting the receiving account.
	pub async fn release(
		&self,
		account_id: &str,
		amount_minor: i64,
		order_id: Option<&str>,
	) -> Result<i64, LedgerError> {
		self.apply(account_id, EntryKind::Release, amount_minor, order_id)
			.await
	}

	/// Credits an external top-up.
	pub async fn top_up(&self, account_id: &str, amount_minor: i64) -> Result<i64, LedgerError> {
		self.apply(account_id, EntryKind::TopUp, amount_minor, None)
			.await
	}

	/// Debits a payout from the account balance.
	pub async fn withdraw(&self, account_id: &str, amount_minor: i64) -> Result<i64, LedgerError> {
		self.apply(account_id, EntryKind::Withdraw, amount_minor, None)
			.await
	}

	/// Returns the materialized balance for an account.
	pub async fn balance(&self, account_id: &str) -> Result<i64, LedgerError> {
		let account: Account = self
			.storage
			.retrieve(StorageKey::Accounts.as_str(), account_id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => LedgerError::NotFound(account_id.to_string()),
				other => LedgerError::Storage(other.to_string()),
			})?;
		Ok(account.balance_minor)
	}

	/// Returns the entries for an account, oldest first.
	pub async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
		let mut entries: Vec<LedgerEntry> = self
			.storage
			.retrieve_all(StorageKey::Ledger.as_str())
			.await
			.map_err(|e| LedgerError::Storage(e.to_string()))?;
		entries.retain(|e| e.account_id == account_id);
		entries.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
		Ok(entries)
	}

	/// Applies one balance movement and appends the matching entry.
	///
	/// The balance mutation is the commit point. A backend failure while
	/// appending the entry afterwards is surfaced as a storage error and
	/// never as partial domain success.
	async fn apply(
		&self,
		account_id: &str,
		kind: EntryKind,
		amount_minor: i64,
		order_id: Option<&str>,
	) -> Result<i64, LedgerError> {
		if amount_minor <= 0 {
			return Err(LedgerError::InvalidAmount(amount_minor));
		}
		let delta = kind.sign() * amount_minor;
		let now = self.clock.now();

		let account = self
			.storage
			.update_where::<Account, _, _>(
				StorageKey::Accounts.as_str(),
				account_id,
				|account| account.balance_minor + delta >= 0,
				|account| {
					account.balance_minor += delta;
					account.updated_at = now;
				},
			)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => LedgerError::NotFound(account_id.to_string()),
				StorageError::PreconditionFailed => LedgerError::InsufficientFunds,
				other => LedgerError::Storage(other.to_string()),
			})?;

		let entry = LedgerEntry {
			id: Uuid::new_v4().to_string(),
			account_id: account_id.to_string(),
			kind,
			amount_minor,
			order_id: order_id.map(|s| s.to_string()),
			created_at: now,
		};
		self.storage
			.store(StorageKey::Ledger.as_str(), &entry.id, &entry)
			.await
			.map_err(|e| LedgerError::Storage(e.to_string()))?;

		tracing::debug!(
			account_id = %truncate_id(account_id),
			kind = %kind,
			amount_minor,
			balance_minor = account.balance_minor,
			"Applied ledger entry"
		);
		Ok(account.balance_minor)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_account::AccountService;
	use broker_storage::implementations::memory::MemoryStorage;
	use broker_types::ManualClock;

	async fn setup() -> (LedgerService, String) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock = Arc::new(ManualClock::new(1_700_000_000));
		let accounts = AccountService::new(storage.clone(), clock.clone());
		let account = accounts.find_or_create("payer").await.unwrap();
		(LedgerService::new(storage, clock), account.id)
	}

	#[tokio::test]
	async fn test_hold_fails_without_funds_then_succeeds_after_topup() {
		let (ledger, account) = setup().await;

		let result = ledger.hold(&account, 2000, None).await;
		assert!(matches!(result, Err(LedgerError::InsufficientFunds)));

		ledger.top_up(&account, 5000).await.unwrap();
		let balance = ledger.hold(&account, 2000, None).await.unwrap();
		assert_eq!(balance, 3000);
		assert_eq!(ledger.balance(&account).await.unwrap(), 3000);
	}

	#[tokio::test]
	async fn test_balance_never_negative_under_concurrent_holds() {
		let (ledger, account) = setup().await;
		ledger.top_up(&account, 5000).await.unwrap();

		let ledger = Arc::new(ledger);
		let mut handles = Vec::new();
		for _ in 0..10 {
			let ledger = ledger.clone();
			let account = account.clone();
			handles.push(tokio::spawn(async move {
				ledger.hold(&account, 1000, None).await
			}));
		}

		let mut succeeded = 0;
		for handle in handles {
			if handle.await.unwrap().is_ok() {
				succeeded += 1;
			}
		}
		assert_eq!(succeeded, 5);
		assert_eq!(ledger.balance(&account).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_entries_are_append_only_history() {
		let (ledger, account) = setup().await;
		ledger.top_up(&account, 4000).await.unwrap();
		ledger.hold(&account, 1500, Some("order-1")).await.unwrap();
		ledger.release(&account, 1500, Some("order-1")).await.unwrap();
		ledger.withdraw(&account, 4000).await.unwrap();

		let entries = ledger.entries(&account).await.unwrap();
		let kinds: Vec<EntryKind> = entries.iter().map(|e| e.kind).collect();
		assert_eq!(
			kinds,
			vec![
				EntryKind::TopUp,
				EntryKind::Hold,
				EntryKind::Release,
				EntryKind::Withdraw
			]
		);
		assert!(entries.iter().all(|e| e.amount_minor > 0));
		assert_eq!(ledger.balance(&account).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_rejects_non_positive_amounts() {
		let (ledger, account) = setup().await;
		assert!(matches!(
			ledger.top_up(&account, 0).await,
			Err(LedgerError::InvalidAmount(0))
		));
		assert!(matches!(
			ledger.hold(&account, -5, None).await,
			Err(LedgerError::InvalidAmount(-5))
		));
	}
}
