//! Storage module for the escrow broker system.
//!
//! This module provides abstractions for persistent storage of broker data,
//! supporting different backend implementations such as in-memory or
//! file-based storage. Backends expose a compare-and-swap primitive so that
//! higher layers can implement atomic check-and-write operations (order
//! acceptance, balance debits) without cross-operation locks.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Maximum number of compare-and-swap attempts before a typed update gives up.
///
/// A conditional update only retries while its precondition still holds, so
/// this bound is reached only under pathological write contention.
const CAS_MAX_ATTEMPTS: usize = 16;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs when a conditional update's precondition does not hold.
	#[error("Precondition failed")]
	PreconditionFailed,
	/// Error that occurs when a create hits an already existing key.
	#[error("Already exists")]
	AlreadyExists,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the broker. It provides basic key-value operations plus
/// an atomic compare-and-swap on the raw value bytes.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, creating or overwriting the key.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Atomically replaces the value only if the current bytes equal `expected`.
	///
	/// `None` for `expected` requires the key to be absent, which makes this
	/// usable as an atomic create. Returns false when the comparison fails;
	/// the stored value is then left untouched.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all keys starting with the given prefix.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Type alias for storage factory functions.
///
/// This is the function signature that all storage implementations must
/// provide to create instances of their storage interface.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with automatic
/// serialization, plus conditional updates built on the backend's
/// compare-and-swap primitive.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Stores a serializable value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Stores a serializable value only if the key does not exist yet.
	///
	/// Uses compare-and-swap against an absent key, so two concurrent
	/// creates for the same id cannot both succeed.
	pub async fn create<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		if self
			.backend
			.compare_and_swap(&Self::key(namespace, id), None, bytes)
			.await?
		{
			Ok(())
		} else {
			Err(StorageError::AlreadyExists)
		}
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Lists the ids stored under a namespace.
	pub async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.list_keys(&prefix).await?;
		Ok(keys
			.into_iter()
			.filter_map(|k| k.strip_prefix(&prefix).map(|s| s.to_string()))
			.collect())
	}

	/// Retrieves and deserializes every value stored under a namespace.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		let mut values = Vec::new();
		for id in self.list_ids(namespace).await? {
			match self.retrieve(namespace, &id).await {
				Ok(value) => values.push(value),
				// A concurrent delete between list and get is not an error.
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	/// Atomically updates a value when a precondition on its current state holds.
	///
	/// Reads the current value, checks it with `check`, applies `apply` and
	/// writes the result back with compare-and-swap against the bytes that
	/// were read. A lost swap re-reads and re-checks, so the precondition is
	/// always evaluated against the state that the write replaces. Returns
	/// `PreconditionFailed` as soon as `check` rejects the current value.
	///
	/// This is the primitive behind "update row only if field X equals Y":
	/// order acceptance and balance debits are built on it.
	pub async fn update_where<T, P, F>(
		&self,
		namespace: &str,
		id: &str,
		check: P,
		apply: F,
	) -> Result<T, StorageError>
	where
		T: Serialize + DeserializeOwned,
		P: Fn(&T) -> bool,
		F: Fn(&mut T),
	{
		let key = Self::key(namespace, id);
		for _ in 0..CAS_MAX_ATTEMPTS {
			let current = self.backend.get_bytes(&key).await?;
			let mut value: T = serde_json::from_slice(&current)
				.map_err(|e| StorageError::Serialization(e.to_string()))?;
			if !check(&value) {
				return Err(StorageError::PreconditionFailed);
			}
			apply(&mut value);
			let next = serde_json::to_vec(&value)
				.map_err(|e| StorageError::Serialization(e.to_string()))?;
			if self
				.backend
				.compare_and_swap(&key, Some(&current), next)
				.await?
			{
				return Ok(value);
			}
		}
		Err(StorageError::Backend(format!(
			"compare-and-swap contention on {}",
			key
		)))
	}
}
