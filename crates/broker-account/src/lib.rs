//! Account management module for the escrow broker system.
//!
//! Accounts are created on first contact, keyed by an opaque chat handle,
//! and never deleted. This module owns role assignment, provider approval,
//! availability, terms acceptance and profile edits. Balance changes are
//! owned by the ledger and are not exposed here.

use broker_storage::{StorageError, StorageService};
use broker_types::{Account, ApprovalStatus, Clock, Role, StorageKey};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when the requested account does not exist.
	#[error("Account not found: {0}")]
	NotFound(String),
	/// Error that occurs in the storage layer.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for AccountError {
	fn from(err: StorageError) -> Self {
		AccountError::Storage(err.to_string())
	}
}

/// Handle-to-id index record.
///
/// Stored under the account handle so that first-contact creation can be
/// made atomic with a conditional create on the index key.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct HandleIndex {
	account_id: String,
}

/// Service that manages participant accounts.
pub struct AccountService {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl AccountService {
	/// Creates a new AccountService backed by the given storage.
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Returns the account for a chat handle, creating it on first contact.
	///
	/// New accounts start as requesters; providers are switched via
	/// `set_role` and then go through approval. Two concurrent first
	/// contacts for the same handle resolve to a single account because
	/// the handle index is written with an atomic create.
	pub async fn find_or_create(&self, handle: &str) -> Result<Account, AccountError> {
		if let Some(existing) = self.lookup_handle(handle).await? {
			return Ok(existing);
		}

		let now = self.clock.now();
		let account = Account {
			id: Uuid::new_v4().to_string(),
			handle: handle.to_string(),
			display_name: None,
			about: None,
			role: Role::Requester,
			balance_minor: 0,
			available: false,
			approval: ApprovalStatus::Approved,
			terms_accepted_at: None,
			created_at: now,
			updated_at: now,
		};

		let index = HandleIndex {
			account_id: account.id.clone(),
		};
		match self
			.storage
			.create(StorageKey::AccountHandles.as_str(), handle, &index)
			.await
		{
			Ok(()) => {
				self.storage
					.store(StorageKey::Accounts.as_str(), &account.id, &account)
					.await?;
				tracing::info!(account_id = %account.id, handle = %handle, "Created account");
				Ok(account)
			}
			// Lost the creation race; the winner's record is authoritative.
			Err(StorageError::AlreadyExists) => self
				.lookup_handle(handle)
				.await?
				.ok_or_else(|| AccountError::NotFound(handle.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	async fn lookup_handle(&self, handle: &str) -> Result<Option<Account>, AccountError> {
		match self
			.storage
			.retrieve::<HandleIndex>(StorageKey::AccountHandles.as_str(), handle)
			.await
		{
			Ok(index) => Ok(Some(self.get(&index.account_id).await?)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Gets an account by id.
	pub async fn get(&self, account_id: &str) -> Result<Account, AccountError> {
		match self
			.storage
			.retrieve(StorageKey::Accounts.as_str(), account_id)
			.await
		{
			Ok(account) => Ok(account),
			Err(StorageError::NotFound) => Err(AccountError::NotFound(account_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Gets an account by chat handle.
	pub async fn get_by_handle(&self, handle: &str) -> Result<Account, AccountError> {
		self.lookup_handle(handle)
			.await?
			.ok_or_else(|| AccountError::NotFound(handle.to_string()))
	}

	/// Assigns a role to an account.
	///
	/// Switching to provider resets approval to pending; the account stays
	/// out of discovery until an operator approves it.
	pub async fn set_role(&self, account_id: &str, role: Role) -> Result<Account, AccountError> {
		self.update(account_id, |account| {
			account.role = role;
			if role == Role::Provider {
				account.approval = ApprovalStatus::Pending;
			} else {
				account.approval = ApprovalStatus::Approved;
			}
		})
		.await
	}

	/// Sets a provider's approval status.
	pub async fn set_approval(
		&self,
		account_id: &str,
		approval: ApprovalStatus,
	) -> Result<Account, AccountError> {
		self.update(account_id, |account| account.approval = approval)
			.await
	}

	/// Sets a provider's availability flag.
	pub async fn set_available(
		&self,
		account_id: &str,
		available: bool,
	) -> Result<Account, AccountError> {
		self.update(account_id, |account| account.available = available)
			.await
	}

	/// Records acceptance of the terms of service.
	pub async fn accept_terms(&self, account_id: &str) -> Result<Account, AccountError> {
		let now = self.clock.now();
		self.update(account_id, |account| {
			account.terms_accepted_at = Some(now);
		})
		.await
	}

	/// Updates profile fields. `None` leaves a field unchanged.
	pub async fn update_profile(
		&self,
		account_id: &str,
		display_name: Option<String>,
		about: Option<String>,
	) -> Result<Account, AccountError> {
		self.update(account_id, |account| {
			if let Some(name) = &display_name {
				account.display_name = Some(name.clone());
			}
			if let Some(about) = &about {
				account.about = Some(about.clone());
			}
		})
		.await
	}

	/// Lists all accounts with the given role.
	pub async fn list_by_role(&self, role: Role) -> Result<Vec<Account>, AccountError> {
		let mut accounts: Vec<Account> = self
			.storage
			.retrieve_all(StorageKey::Accounts.as_str())
			.await?;
		accounts.retain(|a| a.role == role);
		accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		Ok(accounts)
	}

	/// Lists providers visible to requesters: approved and available.
	pub async fn list_discoverable_providers(&self) -> Result<Vec<Account>, AccountError> {
		let mut providers = self.list_by_role(Role::Provider).await?;
		providers.retain(|a| a.approval == ApprovalStatus::Approved && a.available);
		Ok(providers)
	}

	async fn update<F>(&self, account_id: &str, apply: F) -> Result<Account, AccountError>
	where
		F: Fn(&mut Account),
	{
		let now = self.clock.now();
		match self
			.storage
			.update_where::<Account, _, _>(
				StorageKey::Accounts.as_str(),
				account_id,
				|_| true,
				|account| {
					apply(account);
					account.updated_at = now;
				},
			)
			.await
		{
			Ok(account) => Ok(account),
			Err(StorageError::NotFound) => Err(AccountError::NotFound(account_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_storage::implementations::memory::MemoryStorage;
	use broker_types::ManualClock;

	fn service() -> AccountService {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		AccountService::new(storage, Arc::new(ManualClock::new(1_700_000_000)))
	}

	#[tokio::test]
	async fn test_find_or_create_is_idempotent() {
		let accounts = service();
		let first = accounts.find_or_create("alice").await.unwrap();
		let second = accounts.find_or_create("alice").await.unwrap();
		assert_eq!(first.id, second.id);
		assert_eq!(first.role, Role::Requester);
		assert_eq!(first.balance_minor, 0);
	}

	#[tokio::test]
	async fn test_provider_role_requires_new_approval() {
		let accounts = service();
		let account = accounts.find_or_create("mia").await.unwrap();
		assert_eq!(account.approval, ApprovalStatus::Approved);

		let provider = accounts.set_role(&account.id, Role::Provider).await.unwrap();
		assert_eq!(provider.approval, ApprovalStatus::Pending);
		assert!(!provider.is_approved_provider());

		let approved = accounts
			.set_approval(&account.id, ApprovalStatus::Approved)
			.await
			.unwrap();
		assert!(approved.is_approved_provider());
	}

	#[tokio::test]
	async fn test_discoverable_providers_filters_unavailable() {
		let accounts = service();
		let a = accounts.find_or_create("a").await.unwrap();
		let b = accounts.find_or_create("b").await.unwrap();
		for id in [&a.id, &b.id] {
			accounts.set_role(id, Role::Provider).await.unwrap();
			accounts
				.set_approval(id, ApprovalStatus::Approved)
				.await
				.unwrap();
		}
		accounts.set_available(&a.id, true).await.unwrap();

		let discoverable = accounts.list_discoverable_providers().await.unwrap();
		assert_eq!(discoverable.len(), 1);
		assert_eq!(discoverable[0].id, a.id);
	}

	#[tokio::test]
	async fn test_update_profile_keeps_unset_fields() {
		let accounts = service();
		let account = accounts.find_or_create("mia").await.unwrap();
		accounts
			.update_profile(&account.id, Some("Mia".into()), Some("hi".into()))
			.await
			.unwrap();
		let updated = accounts
			.update_profile(&account.id, None, Some("bye".into()))
			.await
			.unwrap();
		assert_eq!(updated.display_name.as_deref(), Some("Mia"));
		assert_eq!(updated.about.as_deref(), Some("bye"));
	}

	#[tokio::test]
	async fn test_get_unknown_account() {
		let accounts = service();
		let result = accounts.get("missing").await;
		assert!(matches!(result, Err(AccountError::NotFound(_))));
	}
}
