//! File-based storage backend implementation for the broker service.
//!
//! This module provides a file-backed implementation of the StorageInterface
//! trait. Each key is stored as one JSON document under a per-namespace
//! directory. The directory is claimed with an advisory file lock at
//! construction so two broker processes cannot share one data directory,
//! which lets compare-and-swap be implemented with an in-process mutex.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use broker_types::StorageKey;
use fs2::FileExt;
use std::fs::File;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

/// File-based storage implementation.
///
/// Keys follow the `namespace:id` convention of the storage service; ids
/// must be filesystem-safe. Writes go through a temporary file followed by
/// a rename so readers never observe a partial document.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Serializes mutations so compare-and-swap is atomic.
	write_lock: Mutex<()>,
	/// Advisory lock claiming the data directory for this process.
	_dir_lock: File,
}

impl FileStorage {
	/// Creates a new FileStorage rooted at the given directory.
	///
	/// Fails if the directory cannot be created or is already claimed by
	/// another process.
	pub fn new(base_path: PathBuf) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(|e| StorageError::Backend(e.to_string()))?;
		for key in StorageKey::all() {
			std::fs::create_dir_all(base_path.join(key.as_str()))
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}
		let lock_path = base_path.join(".lock");
		let dir_lock = File::create(&lock_path).map_err(|e| StorageError::Backend(e.to_string()))?;
		dir_lock.try_lock_exclusive().map_err(|_| {
			StorageError::Backend(format!(
				"storage directory {} is locked by another process",
				base_path.display()
			))
		})?;
		Ok(Self {
			base_path,
			write_lock: Mutex::new(()),
			_dir_lock: dir_lock,
		})
	}

	/// Converts a storage key to its file path.
	fn file_path(&self, key: &str) -> PathBuf {
		match key.split_once(':') {
			Some((namespace, id)) => self
				.base_path
				.join(namespace)
				.join(format!("{}.json", id.replace(['/', ':'], "_"))),
			None => self.base_path.join(format!("{}.json", key)),
		}
	}

	async fn write_atomic(&self, path: &PathBuf, value: &[u8]) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}
		let tmp = path.with_extension("json.tmp");
		fs::write(&tmp, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&tmp, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn read_optional(&self, path: &PathBuf) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_optional(&self.file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write_atomic(&self.file_path(key), &value).await
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		let path = self.file_path(key);
		let current = self.read_optional(&path).await?;
		let matches = match (&current, expected) {
			(Some(current), Some(expected)) => current.as_slice() == expected,
			(None, None) => true,
			_ => false,
		};
		if matches {
			self.write_atomic(&path, &value).await?;
		}
		Ok(matches)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		match fs::remove_file(self.file_path(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_optional(&self.file_path(key)).await?.is_some())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		// Keys are grouped in one directory per namespace, so a prefix scan
		// is a directory listing.
		let namespace = prefix.strip_suffix(':').unwrap_or(prefix);
		let dir = self.base_path.join(namespace);
		let mut keys = Vec::new();
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name();
			let name = name.to_string_lossy();
			if let Some(id) = name.strip_suffix(".json") {
				keys.push(format!("{}:{}", namespace, id));
			}
		}
		Ok(keys)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `path`: base directory for stored documents (required)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let path = config
		.get("path")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("file storage requires 'path'".into()))?;
	Ok(Box::new(FileStorage::new(PathBuf::from(path))?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[tokio::test]
	async fn test_basic_operations() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().join("data")).unwrap();

		storage
			.set_bytes("orders:1", b"payload".to_vec())
			.await
			.unwrap();
		assert_eq!(
			storage.get_bytes("orders:1").await.unwrap(),
			b"payload".to_vec()
		);
		assert!(storage.exists("orders:1").await.unwrap());

		storage.delete("orders:1").await.unwrap();
		assert!(!storage.exists("orders:1").await.unwrap());
		assert!(matches!(
			storage.get_bytes("orders:1").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_compare_and_swap_persists_winner() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().join("data")).unwrap();

		assert!(storage
			.compare_and_swap("orders:1", None, b"v1".to_vec())
			.await
			.unwrap());
		assert!(!storage
			.compare_and_swap("orders:1", Some(b"stale"), b"v2".to_vec())
			.await
			.unwrap());
		assert!(storage
			.compare_and_swap("orders:1", Some(b"v1"), b"v2".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes("orders:1").await.unwrap(), b"v2".to_vec());
	}

	#[tokio::test]
	async fn test_list_keys_per_namespace() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().join("data")).unwrap();

		storage.set_bytes("orders:1", b"a".to_vec()).await.unwrap();
		storage.set_bytes("orders:2", b"b".to_vec()).await.unwrap();
		storage
			.set_bytes("accounts:9", b"c".to_vec())
			.await
			.unwrap();

		let mut keys = storage.list_keys("orders:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["orders:1", "orders:2"]);
	}

	#[tokio::test]
	async fn test_directory_lock_is_exclusive() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("data");
		let _storage = FileStorage::new(path.clone()).unwrap();
		assert!(FileStorage::new(path).is_err());
	}
}
