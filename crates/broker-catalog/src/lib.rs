//! Service catalog module for the broker system.
//!
//! Ownership-checked CRUD over the services providers offer. Every mutating
//! operation verifies that the caller owns the service. Deactivating a
//! service hides it from discovery without deleting the order history that
//! references it.

use broker_storage::{StorageError, StorageService};
use broker_types::{truncate_id, Account, Clock, Service, ServiceCategory, StorageKey};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
	/// Error that occurs when the caller does not own the target service.
	#[error("Not the owner of this service")]
	NotOwner,
	/// Error that occurs when a provider action is attempted before approval.
	#[error("Provider approval required")]
	NotApproved,
	/// Error that occurs when the requested service does not exist.
	#[error("Service not found: {0}")]
	NotFound(String),
	/// Error that occurs when service fields fail validation.
	#[error("Validation failed: {0}")]
	Validation(String),
	/// Error that occurs in the storage layer.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for CatalogError {
	fn from(err: StorageError) -> Self {
		match err {
			StorageError::NotFound => CatalogError::NotFound("unknown".to_string()),
			other => CatalogError::Storage(other.to_string()),
		}
	}
}

/// Service that manages the provider service catalog.
pub struct CatalogService {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl CatalogService {
	/// Creates a new CatalogService backed by the given storage.
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Creates a service owned by the given provider.
	///
	/// The caller must be an approved provider. Duration is only meaningful
	/// for session services and is rejected elsewhere.
	pub async fn create_service(
		&self,
		provider: &Account,
		name: &str,
		category: ServiceCategory,
		price_minor: i64,
		duration_min: Option<u32>,
		description: Option<String>,
	) -> Result<Service, CatalogError> {
		if !provider.is_approved_provider() {
			return Err(CatalogError::NotApproved);
		}
		if name.trim().is_empty() {
			return Err(CatalogError::Validation("name must not be empty".into()));
		}
		if price_minor <= 0 {
			return Err(CatalogError::Validation(
				"price must be a positive amount".into(),
			));
		}
		match (category, duration_min) {
			(ServiceCategory::Session, None) => {
				return Err(CatalogError::Validation(
					"session services need a duration".into(),
				))
			}
			(ServiceCategory::Session, Some(0)) => {
				return Err(CatalogError::Validation("duration must be positive".into()))
			}
			(ServiceCategory::Session, Some(_)) => {}
			(_, Some(_)) => {
				return Err(CatalogError::Validation(
					"only session services carry a duration".into(),
				))
			}
			(_, None) => {}
		}

		let now = self.clock.now();
		let service = Service {
			id: Uuid::new_v4().to_string(),
			provider_id: provider.id.clone(),
			name: name.trim().to_string(),
			category,
			price_minor,
			duration_min,
			active: true,
			description,
			created_at: now,
			updated_at: now,
		};
		self.storage
			.store(StorageKey::Services.as_str(), &service.id, &service)
			.await?;
		tracing::info!(
			service_id = %truncate_id(&service.id),
			provider_id = %truncate_id(&provider.id),
			"Created service"
		);
		Ok(service)
	}

	/// Gets a service by id.
	pub async fn get(&self, service_id: &str) -> Result<Service, CatalogError> {
		match self
			.storage
			.retrieve(StorageKey::Services.as_str(), service_id)
			.await
		{
			Ok(service) => Ok(service),
			Err(StorageError::NotFound) => Err(CatalogError::NotFound(service_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Lists a provider's services, newest first.
	///
	/// With `include_inactive` set, deactivated services are included; this
	/// is the owner's view. Discovery uses the active-only form.
	pub async fn list_by_provider(
		&self,
		provider_id: &str,
		include_inactive: bool,
	) -> Result<Vec<Service>, CatalogError> {
		let mut services: Vec<Service> = self
			.storage
			.retrieve_all(StorageKey::Services.as_str())
			.await?;
		services.retain(|s| s.provider_id == provider_id && (include_inactive || s.active));
		services.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(services)
	}

	/// Flips the active flag on a service owned by the caller.
	pub async fn toggle_active(
		&self,
		provider_id: &str,
		service_id: &str,
	) -> Result<Service, CatalogError> {
		self.check_owner(provider_id, service_id).await?;
		let now = self.clock.now();
		self.storage
			.update_where::<Service, _, _>(
				StorageKey::Services.as_str(),
				service_id,
				|s| s.provider_id == provider_id,
				|s| {
					s.active = !s.active;
					s.updated_at = now;
				},
			)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => CatalogError::NotFound(service_id.to_string()),
				StorageError::PreconditionFailed => CatalogError::NotOwner,
				other => CatalogError::Storage(other.to_string()),
			})
	}

	/// Deletes a service owned by the caller.
	pub async fn delete_service(
		&self,
		provider_id: &str,
		service_id: &str,
	) -> Result<(), CatalogError> {
		self.check_owner(provider_id, service_id).await?;
		self.storage
			.remove(StorageKey::Services.as_str(), service_id)
			.await?;
		tracing::info!(service_id = %truncate_id(service_id), "Deleted service");
		Ok(())
	}

	async fn check_owner(&self, provider_id: &str, service_id: &str) -> Result<(), CatalogError> {
		let service = self.get(service_id).await?;
		if service.provider_id != provider_id {
			return Err(CatalogError::NotOwner);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_account::AccountService;
	use broker_storage::implementations::memory::MemoryStorage;
	use broker_types::{ApprovalStatus, ManualClock, Role};

	async fn setup() -> (CatalogService, Account, Account) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock = Arc::new(ManualClock::new(1_700_000_000));
		let accounts = AccountService::new(storage.clone(), clock.clone());

		let mut provider = accounts.find_or_create("mia").await.unwrap();
		accounts.set_role(&provider.id, Role::Provider).await.unwrap();
		provider = accounts
			.set_approval(&provider.id, ApprovalStatus::Approved)
			.await
			.unwrap();

		let requester = accounts.find_or_create("alice").await.unwrap();
		(CatalogService::new(storage, clock), provider, requester)
	}

	#[tokio::test]
	async fn test_service_roundtrip() {
		let (catalog, provider, _) = setup().await;
		let created = catalog
			.create_service(
				&provider,
				"Video session 15 min",
				ServiceCategory::Session,
				2500,
				Some(15),
				None,
			)
			.await
			.unwrap();

		let read = catalog.get(&created.id).await.unwrap();
		assert_eq!(read.name, "Video session 15 min");
		assert_eq!(read.category, ServiceCategory::Session);
		assert_eq!(read.price_minor, 2500);
		assert_eq!(read.duration_min, Some(15));
		assert!(read.active);
		assert_eq!(read.description, None);
	}

	#[tokio::test]
	async fn test_create_requires_approved_provider() {
		let (catalog, _, requester) = setup().await;
		let result = catalog
			.create_service(
				&requester,
				"Photo pack",
				ServiceCategory::Deliverable,
				1000,
				None,
				None,
			)
			.await;
		assert!(matches!(result, Err(CatalogError::NotApproved)));
	}

	#[tokio::test]
	async fn test_duration_only_for_sessions() {
		let (catalog, provider, _) = setup().await;
		let no_duration = catalog
			.create_service(
				&provider,
				"Session",
				ServiceCategory::Session,
				2500,
				None,
				None,
			)
			.await;
		assert!(matches!(no_duration, Err(CatalogError::Validation(_))));

		let stray_duration = catalog
			.create_service(
				&provider,
				"Pack",
				ServiceCategory::Deliverable,
				2500,
				Some(15),
				None,
			)
			.await;
		assert!(matches!(stray_duration, Err(CatalogError::Validation(_))));
	}

	#[tokio::test]
	async fn test_toggle_hides_from_discovery_listing() {
		let (catalog, provider, _) = setup().await;
		let service = catalog
			.create_service(
				&provider,
				"Pack",
				ServiceCategory::Deliverable,
				1000,
				None,
				None,
			)
			.await
			.unwrap();

		let toggled = catalog.toggle_active(&provider.id, &service.id).await.unwrap();
		assert!(!toggled.active);

		let active = catalog.list_by_provider(&provider.id, false).await.unwrap();
		assert!(active.is_empty());
		let all = catalog.list_by_provider(&provider.id, true).await.unwrap();
		assert_eq!(all.len(), 1);
	}

	#[tokio::test]
	async fn test_mutations_reject_non_owner() {
		let (catalog, provider, requester) = setup().await;
		let service = catalog
			.create_service(
				&provider,
				"Pack",
				ServiceCategory::Deliverable,
				1000,
				None,
				None,
			)
			.await
			.unwrap();

		assert!(matches!(
			catalog.toggle_active(&requester.id, &service.id).await,
			Err(CatalogError::NotOwner)
		));
		assert!(matches!(
			catalog.delete_service(&requester.id, &service.id).await,
			Err(CatalogError::NotOwner)
		));

		catalog
			.delete_service(&provider.id, &service.id)
			.await
			.unwrap();
		assert!(matches!(
			catalog.get(&service.id).await,
			Err(CatalogError::NotFound(_))
		));
	}
}
