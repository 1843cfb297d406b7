//! In-memory storage backend implementation for the broker service.
//!
//! This module provides a memory-based implementation of the StorageInterface
//! trait, useful for testing and development scenarios where persistence is
//! not required.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage implementation.
///
/// This implementation stores data in a HashMap in memory, providing fast
/// access but no persistence across restarts. Compare-and-swap is atomic
/// under the map's write lock.
pub struct MemoryStorage {
	/// The in-memory store protected by a read-write lock.
	store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let mut store = self.store.write().await;
		let matches = match (store.get(key), expected) {
			(Some(current), Some(expected)) => current.as_slice() == expected,
			(None, None) => true,
			_ => false,
		};
		if matches {
			store.insert(key.to_string(), value);
		}
		Ok(matches)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.keys()
			.filter(|k| k.starts_with(prefix))
			.cloned()
			.collect())
	}
}

/// Factory function to create a memory storage backend from configuration.
///
/// Configuration parameters:
/// - None required for memory storage
pub fn create_storage(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	Ok(Box::new(MemoryStorage::new()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		// Test set and get
		let key = "test_key";
		let value = b"test_value".to_vec();
		storage.set_bytes(key, value.clone()).await.unwrap();

		let retrieved = storage.get_bytes(key).await.unwrap();
		assert_eq!(retrieved, value);

		// Test exists
		assert!(storage.exists(key).await.unwrap());

		// Test delete
		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());

		// Test get after delete
		let result = storage.get_bytes(key).await;
		assert!(matches!(result, Err(StorageError::NotFound)));
	}

	#[tokio::test]
	async fn test_compare_and_swap() {
		let storage = MemoryStorage::new();
		let key = "cas_key";

		// Absent key: expected None succeeds, expected Some fails
		assert!(storage
			.compare_and_swap(key, None, b"v1".to_vec())
			.await
			.unwrap());
		assert!(!storage
			.compare_and_swap(key, None, b"v2".to_vec())
			.await
			.unwrap());

		// Present key: swap only on matching bytes
		assert!(!storage
			.compare_and_swap(key, Some(b"wrong"), b"v2".to_vec())
			.await
			.unwrap());
		assert!(storage
			.compare_and_swap(key, Some(b"v1"), b"v2".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"v2".to_vec());
	}

	#[tokio::test]
	async fn test_list_keys_by_prefix() {
		let storage = MemoryStorage::new();
		storage.set_bytes("orders:1", b"a".to_vec()).await.unwrap();
		storage.set_bytes("orders:2", b"b".to_vec()).await.unwrap();
		storage
			.set_bytes("accounts:1", b"c".to_vec())
			.await
			.unwrap();

		let mut keys = storage.list_keys("orders:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["orders:1", "orders:2"]);
	}
}
