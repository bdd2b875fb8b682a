// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ordered plugin pipeline.
//!
//! Every event passes through the registered Before stages, then the
//! Enrichment stages, and is finally handed to each Destination. Pushes are
//! admitted one at a time through the stage chain so events reach each
//! destination in the order they were pushed; waiting for delivery happens
//! after admission ends.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use loom_track_core::{DeliveryResult, Event, TrackConfig};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, instrument, warn};

use crate::error::{Result, TrackError};
use crate::plugin::{Plugin, PluginHandle, PluginKind};
use crate::queue::DeliveryReceipt;

struct Registration {
	handle: PluginHandle,
	plugin: Plugin,
}

/// Plugin registry and event router owned by one client.
pub struct Pipeline {
	plugins: RwLock<Vec<Registration>>,
	admission: Mutex<()>,
	opt_out: AtomicBool,
	next_handle: AtomicU64,
}

impl Default for Pipeline {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Pipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pipeline")
			.field("opt_out", &self.is_opted_out())
			.finish_non_exhaustive()
	}
}

impl Pipeline {
	/// Creates an empty pipeline.
	pub fn new() -> Self {
		Self {
			plugins: RwLock::new(Vec::new()),
			admission: Mutex::new(()),
			opt_out: AtomicBool::new(false),
			next_handle: AtomicU64::new(0),
		}
	}

	/// Runs the plugin's setup and adds it after every plugin of the same or
	/// an earlier stage. A failed setup leaves the pipeline unchanged.
	pub async fn register(&self, plugin: Plugin, config: &TrackConfig) -> Result<PluginHandle> {
		let name = plugin.name().to_string();
		let kind = plugin.kind();
		if let Err(e) = plugin.setup(config).await {
			error!(plugin = %name, kind = %kind, error = %e, "Plugin setup failed");
			return Err(e);
		}

		let handle = PluginHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
		let mut plugins = self.plugins.write().await;
		let position = plugins
			.iter()
			.position(|registered| registered.plugin.kind() > kind)
			.unwrap_or(plugins.len());
		plugins.insert(position, Registration { handle, plugin });

		debug!(plugin = %name, kind = %kind, "Plugin registered");
		Ok(handle)
	}

	/// Tears down and removes the first plugin called `name`.
	///
	/// Returns `Ok(false)` when no plugin has that name. The plugin is
	/// removed even if its teardown fails.
	pub async fn deregister(&self, name: &str) -> Result<bool> {
		let handle = {
			let plugins = self.plugins.read().await;
			plugins
				.iter()
				.find(|registered| registered.plugin.name() == name)
				.map(|registered| registered.handle)
		};
		match handle {
			Some(handle) => self.deregister_handle(handle).await,
			None => Ok(false),
		}
	}

	/// Tears down and removes the plugin registered under `handle`.
	pub async fn deregister_handle(&self, handle: PluginHandle) -> Result<bool> {
		let plugin = {
			let plugins = self.plugins.read().await;
			plugins
				.iter()
				.find(|registered| registered.handle == handle)
				.map(|registered| registered.plugin.clone())
		};
		let Some(plugin) = plugin else {
			return Ok(false);
		};

		let teardown = plugin.teardown().await;
		self.plugins
			.write()
			.await
			.retain(|registered| registered.handle != handle);
		debug!(plugin = %plugin.name(), "Plugin deregistered");

		teardown.map(|()| true)
	}

	/// Names of the registered plugins in execution order.
	pub async fn plugin_names(&self) -> Vec<(PluginKind, String)> {
		self.plugins
			.read()
			.await
			.iter()
			.map(|registered| (registered.plugin.kind(), registered.plugin.name().to_string()))
			.collect()
	}

	/// Discards every event pushed from now on while set.
	pub fn set_opt_out(&self, opt_out: bool) {
		self.opt_out.store(opt_out, Ordering::Release);
	}

	/// Returns true if events are being discarded.
	pub fn is_opted_out(&self) -> bool {
		self.opt_out.load(Ordering::Acquire)
	}

	/// Routes one event through every stage and waits for its outcome.
	///
	/// Never fails: drops, plugin errors and panics become code 0 results.
	/// With several destinations the first registered one decides the result.
	#[instrument(skip(self, event), fields(event_type = %event.event_type))]
	pub async fn push(&self, event: Event) -> DeliveryResult {
		if self.is_opted_out() {
			debug!("Event skipped, opted out");
			return DeliveryResult::opted_out(event);
		}

		let receipts = match self.admit(event).await {
			Ok(receipts) => receipts,
			Err(result) => return result,
		};

		let mut results =
			futures::future::join_all(receipts.into_iter().map(DeliveryReceipt::result)).await;
		let first = results.remove(0);
		for other in results.iter().filter(|other| other.code != first.code) {
			debug!(
				code = other.code,
				reported = first.code,
				"Secondary destination reported a different outcome"
			);
		}
		first
	}

	/// Runs the transform stages and hands the event to every destination
	/// while holding the admission lock.
	async fn admit(&self, event: Event) -> std::result::Result<Vec<DeliveryReceipt>, DeliveryResult> {
		let _admission = self.admission.lock().await;
		let plugins: Vec<Plugin> = self
			.plugins
			.read()
			.await
			.iter()
			.map(|registered| registered.plugin.clone())
			.collect();

		let mut event = event;
		for plugin in &plugins {
			let (Plugin::Before(stage) | Plugin::Enrichment(stage)) = plugin else {
				continue;
			};
			match guarded(stage.name(), stage.execute(event.clone())).await {
				Ok(Some(next)) => event = next,
				Ok(None) => {
					debug!(plugin = %stage.name(), "Event dropped by plugin");
					return Err(DeliveryResult::dropped(event, stage.name()));
				}
				Err(e) => return Err(DeliveryResult::errored(event, e.to_string())),
			}
		}

		let mut receipts = Vec::new();
		for plugin in &plugins {
			let Plugin::Destination(destination) = plugin else {
				continue;
			};
			let receipt = match guarded(destination.name(), destination.execute(event.clone())).await {
				Ok(receipt) => receipt,
				Err(e) => DeliveryReceipt::ready(DeliveryResult::errored(event.clone(), e.to_string())),
			};
			receipts.push(receipt);
		}

		if receipts.is_empty() {
			warn!("Event not delivered, no destination registered");
			return Err(DeliveryResult::no_destination(event));
		}
		Ok(receipts)
	}

	/// Asks every destination to send what it holds.
	pub async fn flush(&self) {
		let destinations: Vec<Plugin> = self
			.plugins
			.read()
			.await
			.iter()
			.filter(|registered| registered.plugin.kind() == PluginKind::Destination)
			.map(|registered| registered.plugin.clone())
			.collect();

		futures::future::join_all(destinations.iter().filter_map(|plugin| match plugin {
			Plugin::Destination(destination) => Some(destination.flush()),
			_ => None,
		}))
		.await;
	}

	/// Tears down and removes every plugin, newest registration first.
	pub async fn teardown_all(&self) {
		let mut registrations = std::mem::take(&mut *self.plugins.write().await);
		registrations.sort_by(|a, b| b.handle.0.cmp(&a.handle.0));

		for registered in registrations {
			if let Err(e) = registered.plugin.teardown().await {
				warn!(plugin = %registered.plugin.name(), error = %e, "Plugin teardown failed");
			}
		}
	}
}

/// Awaits a plugin call, turning a panic into an error.
async fn guarded<T, F>(plugin: &str, call: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match AssertUnwindSafe(call).catch_unwind().await {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(e)) => {
			warn!(plugin, error = %e, "Plugin failed");
			Err(e)
		}
		Err(_) => {
			error!(plugin, "Plugin panicked");
			Err(TrackError::PluginPanicked {
				plugin: plugin.to_string(),
			})
		}
	}
}
