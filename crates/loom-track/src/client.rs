// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracking client facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_track_core::{DeliveryResult, Event, Identify, Revenue, ServerZone, TrackConfig};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::{ContextPlugin, Identity};
use crate::destination::HttpDestination;
use crate::error::{Result, TrackError};
use crate::pipeline::Pipeline;
use crate::plugin::{Plugin, PluginHandle};
use crate::properties::Properties;
use crate::storage::SharedStorage;
use crate::transport::{HttpTransport, SharedTransport};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for constructing a [`TrackClient`].
pub struct TrackClientBuilder {
	config: TrackConfig,
	transport: Option<SharedTransport>,
	storage: Option<SharedStorage>,
	plugins: Vec<Plugin>,
	request_timeout: Duration,
	app_version: Option<String>,
	user_id: Option<String>,
	device_id: Option<String>,
}

impl TrackClientBuilder {
	/// Creates a builder with default settings.
	pub fn new() -> Self {
		Self::with_config(TrackConfig::default())
	}

	/// Starts from an existing configuration, e.g. [`TrackConfig::from_env`].
	pub fn with_config(config: TrackConfig) -> Self {
		Self {
			config,
			transport: None,
			storage: None,
			plugins: Vec::new(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			app_version: None,
			user_id: None,
			device_id: None,
		}
	}

	/// Sets the project API key. Required.
	pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
		self.config.api_key = api_key.into();
		self
	}

	/// Sets the delay before queued events are flushed.
	pub fn flush_interval(mut self, interval: Duration) -> Self {
		self.config.flush_interval = interval;
		self
	}

	/// Sets the attempts after which an event is dropped.
	pub fn flush_max_retries(mut self, retries: u32) -> Self {
		self.config.flush_max_retries = retries;
		self
	}

	/// Sets the maximum events per upload request.
	pub fn flush_queue_size(mut self, size: usize) -> Self {
		self.config.flush_queue_size = size;
		self
	}

	/// Sends to this URL instead of the zone default.
	pub fn server_url(mut self, url: impl Into<String>) -> Self {
		self.config.server_url = Some(url.into());
		self
	}

	/// Selects the data residency region.
	pub fn server_zone(mut self, zone: ServerZone) -> Self {
		self.config.server_zone = zone;
		self
	}

	/// Uses the batch endpoint.
	pub fn use_batch(mut self, use_batch: bool) -> Self {
		self.config.use_batch = use_batch;
		self
	}

	/// Forwarded to the backend as `min_id_length`.
	pub fn min_id_length(mut self, length: u32) -> Self {
		self.config.min_id_length = Some(length);
		self
	}

	/// Starts without sending anything.
	pub fn offline(mut self, offline: bool) -> Self {
		self.config.offline = offline;
		self
	}

	/// Starts with tracking opted out.
	pub fn opt_out(mut self, opt_out: bool) -> Self {
		self.config.opt_out = opt_out;
		self
	}

	/// Sets the cool-down for throttled events.
	pub fn throttle_timeout(mut self, timeout: Duration) -> Self {
		self.config.throttle_timeout = timeout;
		self
	}

	/// Sets the linear backoff unit for failed uploads.
	pub fn retry_timeout(mut self, timeout: Duration) -> Self {
		self.config.retry_timeout = timeout;
		self
	}

	/// Namespaces the storage key.
	pub fn storage_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.config.storage_namespace = Some(namespace.into());
		self
	}

	/// Attaches arbitrary metadata to every upload request.
	pub fn request_metadata(mut self, metadata: Value) -> Self {
		self.config.request_metadata = Some(metadata);
		self
	}

	/// Timeout of the default HTTP transport. Ignored with a custom transport.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// Uses a custom transport instead of HTTP.
	pub fn transport(mut self, transport: SharedTransport) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Persists unsent events so they survive restarts.
	pub fn storage(mut self, storage: SharedStorage) -> Self {
		self.storage = Some(storage);
		self
	}

	/// Registers an additional plugin when the client is built.
	pub fn plugin(mut self, plugin: Plugin) -> Self {
		self.plugins.push(plugin);
		self
	}

	/// App version reported with every event.
	pub fn app_version(mut self, version: impl Into<String>) -> Self {
		self.app_version = Some(version.into());
		self
	}

	/// Initial user id.
	pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	/// Uses this device id instead of a generated one.
	pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
		self.device_id = Some(device_id.into());
		self
	}

	/// Validates the configuration, sets up the built-in plugins and any
	/// extra plugins, and restores events left in storage.
	pub async fn build(self) -> Result<TrackClient> {
		self.config.validate()?;
		let config = self.config;

		let transport: SharedTransport = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::with_timeout(self.request_timeout)?),
		};

		let mut context = ContextPlugin::new();
		if let Some(version) = self.app_version {
			context = context.with_app_version(version);
		}
		let context = Arc::new(context);
		if self.user_id.is_some() {
			context.set_user_id(self.user_id).await;
		}
		if self.device_id.is_some() {
			context.set_device_id(self.device_id).await;
		}

		let mut destination = HttpDestination::new(transport);
		if let Some(storage) = self.storage {
			destination = destination.with_storage(storage);
		}
		let destination = Arc::new(destination);

		let pipeline = Pipeline::new();
		pipeline.set_opt_out(config.opt_out);
		pipeline
			.register(Plugin::Before(context.clone()), &config)
			.await?;
		pipeline
			.register(Plugin::Destination(destination.clone()), &config)
			.await?;
		for plugin in self.plugins {
			pipeline.register(plugin, &config).await?;
		}

		info!(
			server_url = %config.server_url(),
			flush_interval_ms = config.flush_interval.as_millis() as u64,
			flush_queue_size = config.flush_queue_size,
			"Tracking client initialized"
		);

		Ok(TrackClient {
			inner: Arc::new(TrackClientInner {
				config,
				pipeline,
				context,
				destination,
				closed: AtomicBool::new(false),
			}),
		})
	}
}

impl Default for TrackClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct TrackClientInner {
	config: TrackConfig,
	pipeline: Pipeline,
	context: Arc<ContextPlugin>,
	destination: Arc<HttpDestination>,
	closed: AtomicBool,
}

/// Handle for recording events. Cheap to clone.
///
/// Every recording call resolves once the event's delivery is decided, with
/// the per-event [`DeliveryResult`]. Delivery failures never surface as
/// `Err`; only a shut-down client or invalid input does.
///
/// ```no_run
/// use loom_track::{Identify, Properties, TrackClient};
///
/// # async fn run() -> loom_track::Result<()> {
/// let client = TrackClient::builder().api_key("my-api-key").build().await?;
///
/// client.set_user_id(Some("user-42".to_string())).await;
/// let result = client
///     .track("song_played", Some(Properties::new().insert("genre", "jazz")))
///     .await?;
/// assert!(result.is_success());
///
/// client.identify(&Identify::new().set("plan", "pro")).await?;
/// client.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TrackClient {
	inner: Arc<TrackClientInner>,
}

impl TrackClient {
	/// Creates a new builder.
	pub fn builder() -> TrackClientBuilder {
		TrackClientBuilder::new()
	}

	/// Configuration the client was built with.
	pub fn config(&self) -> &TrackConfig {
		&self.inner.config
	}

	/// Records a named event with optional event properties.
	pub async fn track(
		&self,
		event_type: impl Into<String>,
		properties: Option<Properties>,
	) -> Result<DeliveryResult> {
		let mut event = Event::track(event_type);
		if let Some(properties) = properties {
			event = event.with_event_properties(properties.into_map());
		}
		self.track_event(event).await
	}

	/// Records a fully built event.
	pub async fn track_event(&self, event: Event) -> Result<DeliveryResult> {
		self.ensure_open()?;
		Ok(self.inner.pipeline.push(event).await)
	}

	/// Applies user property operations to the current user.
	pub async fn identify(&self, identify: &Identify) -> Result<DeliveryResult> {
		self.track_event(Event::identify(identify)).await
	}

	/// Applies property operations to a group.
	pub async fn group_identify(
		&self,
		group_type: impl Into<String>,
		group_name: impl Into<Value>,
		identify: &Identify,
	) -> Result<DeliveryResult> {
		self.track_event(Event::group_identify(group_type, group_name, identify))
			.await
	}

	/// Assigns the current user to a group.
	pub async fn set_group(
		&self,
		group_type: impl Into<String>,
		group_name: impl Into<Value>,
	) -> Result<DeliveryResult> {
		self.track_event(Event::set_group(group_type, group_name)).await
	}

	/// Records a purchase. Fails without sending when the price is missing.
	pub async fn revenue(&self, revenue: &Revenue) -> Result<DeliveryResult> {
		revenue
			.validate()
			.map_err(|e| TrackError::InvalidEvent(e.to_string()))?;
		self.track_event(Event::revenue(revenue)).await
	}

	/// Sends every queued event now, without retrying failures.
	pub async fn flush(&self) -> Result<()> {
		self.ensure_open()?;
		self.inner.pipeline.flush().await;
		Ok(())
	}

	/// Registers a plugin after construction.
	pub async fn add(&self, plugin: Plugin) -> Result<PluginHandle> {
		self.ensure_open()?;
		self.inner.pipeline.register(plugin, &self.inner.config).await
	}

	/// Removes the first plugin called `name`. Returns false when none matched.
	pub async fn remove(&self, name: &str) -> Result<bool> {
		self.ensure_open()?;
		self.inner.pipeline.deregister(name).await
	}

	/// Discards every event pushed from now on while set.
	pub fn set_opt_out(&self, opt_out: bool) {
		debug!(opt_out, "Opt-out changed");
		self.inner.pipeline.set_opt_out(opt_out);
	}

	/// Returns true if tracking is opted out.
	pub fn is_opted_out(&self) -> bool {
		self.inner.pipeline.is_opted_out()
	}

	/// Sets or clears the user id attached to events.
	pub async fn set_user_id(&self, user_id: Option<String>) {
		self.inner.context.set_user_id(user_id).await;
	}

	/// Sets the device id. `None` generates a new random id.
	pub async fn set_device_id(&self, device_id: Option<String>) {
		self.inner.context.set_device_id(device_id).await;
	}

	/// Sets or clears the session id attached to events.
	pub async fn set_session_id(&self, session_id: Option<i64>) {
		self.inner.context.set_session_id(session_id).await;
	}

	/// Current user, device and session ids.
	pub async fn identity(&self) -> Identity {
		self.inner.context.identity().await
	}

	/// Pauses or resumes uploads. Events keep queueing while offline.
	pub async fn set_offline(&self, offline: bool) {
		self.inner.destination.set_offline(offline).await;
	}

	/// Number of events the built-in destination has not resolved yet.
	pub async fn pending_events(&self) -> usize {
		match self.inner.destination.queue() {
			Some(queue) => queue.len().await,
			None => 0,
		}
	}

	/// Returns true once the client has been shut down.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Flushes queued events and tears down every plugin.
	///
	/// Events that could not be sent stay in storage for the next client.
	pub async fn shutdown(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Err(TrackError::ClientShutdown);
		}

		self.inner.pipeline.flush().await;
		self.inner.pipeline.teardown_all().await;

		info!("Tracking client shut down");
		Ok(())
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			return Err(TrackError::ClientShutdown);
		}
		Ok(())
	}
}
