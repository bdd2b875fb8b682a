// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Built-in stage that stamps identity and runtime context onto events.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use loom_track_core::Event;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::plugin::EventPlugin;
use crate::transport::user_agent;

/// Plugin name of [`ContextPlugin`].
pub const CONTEXT_PLUGIN_NAME: &str = "loom-track-context";

const PLATFORM: &str = "Rust";

/// Identity applied to events that do not carry their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
	pub user_id: Option<String>,
	pub device_id: Option<String>,
	pub session_id: Option<i64>,
}

/// Fills `time`, identity, library and platform fields when they are
/// missing, and numbers events with a per-client counter.
#[derive(Debug)]
pub struct ContextPlugin {
	identity: RwLock<Identity>,
	next_event_id: AtomicU64,
	app_version: Option<String>,
	language: Option<String>,
}

impl Default for ContextPlugin {
	fn default() -> Self {
		Self::new()
	}
}

impl ContextPlugin {
	/// Creates the plugin with a freshly generated device id.
	pub fn new() -> Self {
		Self {
			identity: RwLock::new(Identity {
				device_id: Some(uuid::Uuid::new_v4().to_string()),
				..Default::default()
			}),
			next_event_id: AtomicU64::new(0),
			app_version: None,
			language: std::env::var("LANG").ok().as_deref().and_then(locale_to_language),
		}
	}

	/// Reports this app version with every event.
	pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
		self.app_version = Some(app_version.into());
		self
	}

	/// Overrides the language derived from the locale.
	pub fn with_language(mut self, language: impl Into<String>) -> Self {
		self.language = Some(language.into());
		self
	}

	/// Current user, device and session ids.
	pub async fn identity(&self) -> Identity {
		self.identity.read().await.clone()
	}

	/// Sets or clears the user id.
	pub async fn set_user_id(&self, user_id: Option<String>) {
		self.identity.write().await.user_id = user_id;
	}

	/// Replaces the device id. `None` generates a new random one.
	pub async fn set_device_id(&self, device_id: Option<String>) {
		let device_id = device_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
		self.identity.write().await.device_id = Some(device_id);
	}

	/// Sets or clears the session id.
	pub async fn set_session_id(&self, session_id: Option<i64>) {
		self.identity.write().await.session_id = session_id;
	}
}

#[async_trait]
impl EventPlugin for ContextPlugin {
	fn name(&self) -> &str {
		CONTEXT_PLUGIN_NAME
	}

	async fn execute(&self, mut event: Event) -> Result<Option<Event>> {
		let identity = self.identity.read().await.clone();

		event.time.get_or_insert_with(|| Utc::now().timestamp_millis());
		if event.user_id.is_none() {
			event.user_id = identity.user_id;
		}
		if event.device_id.is_none() {
			event.device_id = identity.device_id;
		}
		if event.session_id.is_none() {
			event.session_id = identity.session_id;
		}
		if event.event_id.is_none() {
			event.event_id = Some(self.next_event_id.fetch_add(1, Ordering::Relaxed));
		}

		event.library.get_or_insert_with(user_agent);
		event.platform.get_or_insert_with(|| PLATFORM.to_string());
		event
			.os_name
			.get_or_insert_with(|| std::env::consts::OS.to_string());
		if event.app_version.is_none() {
			event.app_version = self.app_version.clone();
		}
		if event.language.is_none() {
			event.language = self.language.clone();
		}

		Ok(Some(event))
	}
}

/// Turns a POSIX locale such as `en_US.UTF-8` into `en-US`.
fn locale_to_language(locale: &str) -> Option<String> {
	let tag = locale.split(['.', '@']).next()?.replace('_', "-");
	match tag.as_str() {
		"" | "C" | "POSIX" => None,
		_ => Some(tag),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn stamp(plugin: &ContextPlugin, event: Event) -> Event {
		plugin.execute(event).await.unwrap().unwrap()
	}

	#[tokio::test]
	async fn test_fills_missing_context() {
		let plugin = ContextPlugin::new().with_app_version("2.1.0");
		let event = stamp(&plugin, Event::track("opened")).await;

		assert!(event.time.is_some());
		assert!(event.device_id.is_some());
		assert_eq!(event.user_id, None);
		assert_eq!(event.event_id, Some(0));
		assert_eq!(event.platform.as_deref(), Some("Rust"));
		assert_eq!(event.os_name.as_deref(), Some(std::env::consts::OS));
		assert_eq!(event.app_version.as_deref(), Some("2.1.0"));
		assert!(event
			.library
			.as_deref()
			.is_some_and(|library| library.starts_with("loom-track-rust/")));
	}

	#[tokio::test]
	async fn test_keeps_explicit_fields() {
		let plugin = ContextPlugin::new();
		plugin.set_user_id(Some("global".to_string())).await;

		let event = stamp(
			&plugin,
			Event::track("opened")
				.with_user_id("explicit")
				.with_device_id("device-1")
				.with_time(42),
		)
		.await;

		assert_eq!(event.user_id.as_deref(), Some("explicit"));
		assert_eq!(event.device_id.as_deref(), Some("device-1"));
		assert_eq!(event.time, Some(42));
	}

	#[tokio::test]
	async fn test_event_ids_increase() {
		let plugin = ContextPlugin::new();
		let ids: Vec<_> = futures::future::join_all((0..3).map(|_| stamp(&plugin, Event::track("e"))))
			.await
			.into_iter()
			.map(|event| event.event_id)
			.collect();
		assert_eq!(ids, vec![Some(0), Some(1), Some(2)]);
	}

	#[tokio::test]
	async fn test_identity_updates_apply_to_later_events() {
		let plugin = ContextPlugin::new();
		let original_device = plugin.identity().await.device_id;

		plugin.set_user_id(Some("user-7".to_string())).await;
		plugin.set_session_id(Some(1_700_000_000_000)).await;
		plugin.set_device_id(None).await;

		let event = stamp(&plugin, Event::track("e")).await;
		assert_eq!(event.user_id.as_deref(), Some("user-7"));
		assert_eq!(event.session_id, Some(1_700_000_000_000));
		assert!(event.device_id.is_some());
		assert_ne!(event.device_id, original_device);
	}

	#[test]
	fn test_locale_parsing() {
		assert_eq!(locale_to_language("en_US.UTF-8").as_deref(), Some("en-US"));
		assert_eq!(locale_to_language("de_DE@euro").as_deref(), Some("de-DE"));
		assert_eq!(locale_to_language("C.UTF-8"), None);
		assert_eq!(locale_to_language(""), None);
	}
}
