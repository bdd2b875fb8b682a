// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Plugin traits and the plugin sum type.

use std::sync::Arc;

use async_trait::async_trait;
use loom_track_core::{Event, TrackConfig};

use crate::error::Result;
use crate::queue::DeliveryReceipt;

/// Pipeline stage of a plugin. Stages run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginKind {
	Before,
	Enrichment,
	Destination,
}

impl PluginKind {
	/// Stage name used in logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			PluginKind::Before => "before",
			PluginKind::Enrichment => "enrichment",
			PluginKind::Destination => "destination",
		}
	}
}

impl std::fmt::Display for PluginKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// A stage that transforms or vetoes events.
///
/// Returning `Ok(None)` drops the event; later stages never see it.
#[async_trait]
pub trait EventPlugin: Send + Sync {
	fn name(&self) -> &str;

	async fn setup(&self, _config: &TrackConfig) -> Result<()> {
		Ok(())
	}

	async fn execute(&self, event: Event) -> Result<Option<Event>>;

	async fn teardown(&self) -> Result<()> {
		Ok(())
	}
}

/// A stage that delivers events somewhere.
#[async_trait]
pub trait DestinationPlugin: Send + Sync {
	fn name(&self) -> &str;

	async fn setup(&self, _config: &TrackConfig) -> Result<()> {
		Ok(())
	}

	/// Accepts an event. The receipt resolves once delivery is decided.
	async fn execute(&self, event: Event) -> Result<DeliveryReceipt>;

	/// Sends everything that is waiting.
	async fn flush(&self) {}

	async fn teardown(&self) -> Result<()> {
		Ok(())
	}
}

/// Type alias for a shared event plugin.
pub type SharedEventPlugin = Arc<dyn EventPlugin>;

/// Type alias for a shared destination plugin.
pub type SharedDestinationPlugin = Arc<dyn DestinationPlugin>;

/// A registered plugin together with the stage it runs in.
#[derive(Clone)]
pub enum Plugin {
	Before(SharedEventPlugin),
	Enrichment(SharedEventPlugin),
	Destination(SharedDestinationPlugin),
}

impl Plugin {
	/// Wraps a Before-stage plugin.
	pub fn before(plugin: impl EventPlugin + 'static) -> Self {
		Plugin::Before(Arc::new(plugin))
	}

	/// Wraps an Enrichment-stage plugin.
	pub fn enrichment(plugin: impl EventPlugin + 'static) -> Self {
		Plugin::Enrichment(Arc::new(plugin))
	}

	/// Wraps a destination.
	pub fn destination(plugin: impl DestinationPlugin + 'static) -> Self {
		Plugin::Destination(Arc::new(plugin))
	}

	/// Stage this plugin runs in.
	pub fn kind(&self) -> PluginKind {
		match self {
			Plugin::Before(_) => PluginKind::Before,
			Plugin::Enrichment(_) => PluginKind::Enrichment,
			Plugin::Destination(_) => PluginKind::Destination,
		}
	}

	/// Name the plugin registered under.
	pub fn name(&self) -> &str {
		match self {
			Plugin::Before(plugin) | Plugin::Enrichment(plugin) => plugin.name(),
			Plugin::Destination(plugin) => plugin.name(),
		}
	}

	pub(crate) async fn setup(&self, config: &TrackConfig) -> Result<()> {
		match self {
			Plugin::Before(plugin) | Plugin::Enrichment(plugin) => plugin.setup(config).await,
			Plugin::Destination(plugin) => plugin.setup(config).await,
		}
	}

	pub(crate) async fn teardown(&self) -> Result<()> {
		match self {
			Plugin::Before(plugin) | Plugin::Enrichment(plugin) => plugin.teardown().await,
			Plugin::Destination(plugin) => plugin.teardown().await,
		}
	}
}

impl std::fmt::Debug for Plugin {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Plugin")
			.field("kind", &self.kind())
			.field("name", &self.name())
			.finish()
	}
}

/// Identifies one registration in a [`crate::Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub(crate) u64);
