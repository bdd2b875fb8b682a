// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage providers for the unsent-event mirror.
//!
//! A destination rewrites its outstanding events to storage on every queue
//! change and reads them back once during setup, so a restarted process
//! resumes delivery of whatever was still pending.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use loom_track_core::Event;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Result, TrackError};

const PROBE_KEY: &str = "LOOM_TRACK_probe";

/// Key/value persistence used for crash and restart recovery.
#[async_trait]
pub trait Storage: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Value>>;

	async fn set(&self, key: &str, value: Value) -> Result<()>;

	async fn remove(&self, key: &str) -> Result<()>;

	/// Probes the provider with a write, read and delete round trip.
	async fn is_enabled(&self) -> bool {
		let probe = Value::String(uuid::Uuid::new_v4().to_string());
		if self.set(PROBE_KEY, probe.clone()).await.is_err() {
			return false;
		}
		let read_back = self.get(PROBE_KEY).await.ok().flatten();
		let _ = self.remove(PROBE_KEY).await;
		read_back == Some(probe)
	}
}

/// Type alias for a shared storage provider.
pub type SharedStorage = Arc<dyn Storage>;

/// Reads a stored event list. Unreadable entries are logged and skipped.
pub async fn load_events(storage: &dyn Storage, key: &str) -> Vec<Event> {
	let value = match storage.get(key).await {
		Ok(Some(value)) => value,
		Ok(None) => return Vec::new(),
		Err(e) => {
			warn!(key, error = %e, "Failed to read unsent events from storage");
			return Vec::new();
		}
	};

	match serde_json::from_value(value) {
		Ok(events) => events,
		Err(e) => {
			warn!(key, error = %e, "Discarding malformed unsent events in storage");
			Vec::new()
		}
	}
}

/// Writes an event list under `key`.
pub async fn save_events(storage: &dyn Storage, key: &str, events: &[Event]) -> Result<()> {
	let value = serde_json::to_value(events)?;
	storage.set(key, value).await
}

/// In-process storage, useful for tests and short-lived programs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of stored keys.
	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}

	/// Returns true if nothing is stored.
	pub async fn is_empty(&self) -> bool {
		self.entries.lock().await.is_empty()
	}
}

#[async_trait]
impl Storage for MemoryStorage {
	async fn get(&self, key: &str) -> Result<Option<Value>> {
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: Value) -> Result<()> {
		self.entries.lock().await.insert(key.to_string(), value);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<()> {
		self.entries.lock().await.remove(key);
		Ok(())
	}
}

/// Storage that keeps nothing. Disables recovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

#[async_trait]
impl Storage for NoopStorage {
	async fn get(&self, _key: &str) -> Result<Option<Value>> {
		Ok(None)
	}

	async fn set(&self, _key: &str, _value: Value) -> Result<()> {
		Ok(())
	}

	async fn remove(&self, _key: &str) -> Result<()> {
		Ok(())
	}
}

/// Stores each key as a JSON file in a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
}

impl FileStorage {
	/// Stores files under `dir`. The directory is created on first write.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Directory the files live in.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let file_name: String = key
			.chars()
			.map(|c| {
				if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
					c
				} else {
					'_'
				}
			})
			.collect();
		self.dir.join(format!("{file_name}.json"))
	}
}

#[async_trait]
impl Storage for FileStorage {
	async fn get(&self, key: &str) -> Result<Option<Value>> {
		match tokio::fs::read(self.path_for(key)).await {
			Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(TrackError::Io(e)),
		}
	}

	async fn set(&self, key: &str, value: Value) -> Result<()> {
		tokio::fs::create_dir_all(&self.dir).await?;
		let path = self.path_for(key);
		let tmp = path.with_extension("json.tmp");
		let bytes = serde_json::to_vec(&value)?;
		tokio::fs::write(&tmp, bytes).await?;
		tokio::fs::rename(&tmp, &path).await?;
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<()> {
		match tokio::fs::remove_file(self.path_for(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(TrackError::Io(e)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_memory_storage_roundtrip() {
		let storage = MemoryStorage::new();
		storage.set("k", Value::from(3)).await.unwrap();
		assert_eq!(storage.get("k").await.unwrap(), Some(Value::from(3)));

		storage.remove("k").await.unwrap();
		assert_eq!(storage.get("k").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_memory_storage_is_enabled() {
		let storage = MemoryStorage::new();
		assert!(storage.is_enabled().await);
		assert!(storage.is_empty().await);
	}

	#[tokio::test]
	async fn test_noop_storage_is_not_enabled() {
		assert!(!NoopStorage.is_enabled().await);
	}

	#[tokio::test]
	async fn test_events_roundtrip_through_storage() {
		let storage = MemoryStorage::new();
		let events = vec![Event::track("a"), Event::track("b").with_user_id("u")];

		save_events(&storage, "unsent", &events).await.unwrap();
		let loaded = load_events(&storage, "unsent").await;

		assert_eq!(loaded, events);
	}

	#[tokio::test]
	async fn test_malformed_events_load_as_empty() {
		let storage = MemoryStorage::new();
		storage.set("unsent", Value::from("garbage")).await.unwrap();

		assert!(load_events(&storage, "unsent").await.is_empty());
	}

	#[tokio::test]
	async fn test_file_storage_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().join("nested"));

		assert_eq!(storage.get("LOOM_TRACK_abc").await.unwrap(), None);

		storage
			.set("LOOM_TRACK_abc", serde_json::json!([{"event_type": "a"}]))
			.await
			.unwrap();
		let value = storage.get("LOOM_TRACK_abc").await.unwrap().unwrap();
		assert_eq!(value[0]["event_type"], "a");

		storage.remove("LOOM_TRACK_abc").await.unwrap();
		storage.remove("LOOM_TRACK_abc").await.unwrap();
		assert_eq!(storage.get("LOOM_TRACK_abc").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_file_storage_sanitizes_keys() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path());

		storage.set("../escape/key", Value::from(1)).await.unwrap();
		assert!(dir.path().join("___escape_key.json").exists());
	}

	#[tokio::test]
	async fn test_file_storage_is_enabled() {
		let dir = tempfile::tempdir().unwrap();
		assert!(FileStorage::new(dir.path()).is_enabled().await);
	}
}
