// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destination plugin that uploads events to the ingestion endpoint.

use std::sync::OnceLock;

use async_trait::async_trait;
use loom_track_core::{Event, TrackConfig};
use tracing::{info, warn};

use crate::error::{Result, TrackError};
use crate::plugin::DestinationPlugin;
use crate::queue::{DeliveryQueue, DeliveryReceipt};
use crate::storage::SharedStorage;
use crate::transport::SharedTransport;

/// Default plugin name of [`HttpDestination`].
pub const HTTP_DESTINATION_NAME: &str = "loom-track-http";

/// Delivers events through a [`DeliveryQueue`].
///
/// The queue is created during `setup` from the pipeline's configuration.
/// Events left in storage by an earlier process are re-enqueued at that
/// point.
pub struct HttpDestination {
	name: String,
	transport: SharedTransport,
	storage: Option<SharedStorage>,
	queue: OnceLock<DeliveryQueue>,
}

impl HttpDestination {
	/// Creates a destination sending through `transport`.
	pub fn new(transport: SharedTransport) -> Self {
		Self {
			name: HTTP_DESTINATION_NAME.to_string(),
			transport,
			storage: None,
			queue: OnceLock::new(),
		}
	}

	/// Mirrors unsent events to `storage`.
	pub fn with_storage(mut self, storage: SharedStorage) -> Self {
		self.storage = Some(storage);
		self
	}

	/// Registers under a different name.
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	/// The delivery queue, once set up.
	pub fn queue(&self) -> Option<&DeliveryQueue> {
		self.queue.get()
	}

	/// Stops or resumes delivery.
	pub async fn set_offline(&self, offline: bool) {
		if let Some(queue) = self.queue() {
			queue.set_offline(offline).await;
		}
	}

	fn require_queue(&self) -> Result<&DeliveryQueue> {
		self.queue
			.get()
			.ok_or_else(|| TrackError::plugin(&self.name, "destination is not set up"))
	}
}

impl std::fmt::Debug for HttpDestination {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpDestination")
			.field("name", &self.name)
			.field("queue", &self.queue.get())
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl DestinationPlugin for HttpDestination {
	fn name(&self) -> &str {
		&self.name
	}

	async fn setup(&self, config: &TrackConfig) -> Result<()> {
		let storage = match self.storage {
			Some(ref storage) if storage.is_enabled().await => Some(storage.clone()),
			Some(_) => {
				warn!(destination = %self.name, "Storage unavailable, unsent events will not survive restarts");
				None
			}
			None => None,
		};

		let queue = DeliveryQueue::new(config.clone(), self.transport.clone(), storage);
		if self.queue.set(queue).is_err() {
			return Err(TrackError::plugin(&self.name, "destination is already set up"));
		}

		let restored = self.require_queue()?.restore().await;
		info!(
			destination = %self.name,
			url = %config.server_url(),
			restored,
			"Destination ready"
		);
		Ok(())
	}

	async fn execute(&self, event: Event) -> Result<DeliveryReceipt> {
		Ok(self.require_queue()?.enqueue(event).await)
	}

	async fn flush(&self) {
		if let Some(queue) = self.queue() {
			queue.flush(false).await;
		}
	}

	async fn teardown(&self) -> Result<()> {
		if let Some(queue) = self.queue() {
			queue.shutdown().await;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::{save_events, MemoryStorage, NoopStorage};
	use crate::transport::Transport;
	use loom_track_core::{Payload, Response};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[derive(Default)]
	struct CountingTransport {
		events: AtomicUsize,
	}

	#[async_trait]
	impl Transport for CountingTransport {
		async fn send(&self, _url: &str, payload: &Payload) -> Result<Response> {
			self.events.fetch_add(payload.len(), Ordering::SeqCst);
			Ok(Response::from_status(200, "{}"))
		}
	}

	#[tokio::test]
	async fn test_execute_before_setup_fails() {
		let destination = HttpDestination::new(Arc::new(CountingTransport::default()));
		let result = destination.execute(Event::track("a")).await;
		assert!(matches!(result, Err(TrackError::Plugin { .. })));
	}

	#[tokio::test]
	async fn test_setup_twice_fails() {
		let destination = HttpDestination::new(Arc::new(CountingTransport::default()));
		let config = TrackConfig::new("key");
		destination.setup(&config).await.unwrap();
		assert!(destination.setup(&config).await.is_err());
	}

	#[tokio::test]
	async fn test_flush_delivers_immediately() {
		let transport = Arc::new(CountingTransport::default());
		let destination = HttpDestination::new(transport.clone());
		destination.setup(&TrackConfig::new("key")).await.unwrap();

		let receipt = destination.execute(Event::track("a")).await.unwrap();
		destination.flush().await;

		assert!(receipt.result().await.is_success());
		assert_eq!(transport.events.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_setup_restores_stored_events() {
		let transport = Arc::new(CountingTransport::default());
		let storage = Arc::new(MemoryStorage::new());
		let config = TrackConfig::new("key");
		save_events(
			storage.as_ref(),
			&config.storage_key(),
			&[Event::track("left-over")],
		)
		.await
		.unwrap();

		let destination = HttpDestination::new(transport.clone()).with_storage(storage);
		destination.setup(&config).await.unwrap();
		assert_eq!(destination.queue().unwrap().len().await, 1);

		destination.flush().await;
		assert_eq!(transport.events.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_disabled_storage_is_ignored() {
		let destination = HttpDestination::new(Arc::new(CountingTransport::default()))
			.with_storage(Arc::new(NoopStorage));
		destination.setup(&TrackConfig::new("key")).await.unwrap();
		assert_eq!(destination.queue().unwrap().restore().await, 0);
	}

	#[tokio::test]
	async fn test_teardown_stops_accepting_events() {
		let destination = HttpDestination::new(Arc::new(CountingTransport::default()));
		destination.setup(&TrackConfig::new("key")).await.unwrap();
		destination.teardown().await.unwrap();

		let receipt = destination.execute(Event::track("late")).await.unwrap();
		assert_eq!(receipt.result().await.code, 0);
	}
}
