// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration shared by the pipeline and the delivery queue.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Prefix of every storage key written by the SDK.
pub const STORAGE_PREFIX: &str = "LOOM_TRACK";
/// Number of API key characters that make it into a storage key.
const STORAGE_KEY_API_KEY_LEN: usize = 10;

// Default ingestion hosts. Loom events are forwarded to the upstream
// Amplitude-compatible HTTP API; deployments with their own collector set
// `server_url` instead.

/// Upstream HTTP V2 endpoint in the US region.
pub const US_SERVER_URL: &str = "https://api2.amplitude.com/2/httpapi";
/// Upstream batch endpoint in the US region.
pub const US_BATCH_SERVER_URL: &str = "https://api2.amplitude.com/batch";
/// Upstream HTTP V2 endpoint in the EU region.
pub const EU_SERVER_URL: &str = "https://api.eu.amplitude.com/2/httpapi";
/// Upstream batch endpoint in the EU region.
pub const EU_BATCH_SERVER_URL: &str = "https://api.eu.amplitude.com/batch";

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FLUSH_MAX_RETRIES: u32 = 12;
pub const DEFAULT_FLUSH_QUEUE_SIZE: usize = 200;
pub const DEFAULT_THROTTLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(1);

/// Data residency region of the ingestion endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerZone {
	#[default]
	Us,
	Eu,
}

impl ServerZone {
	/// Upper-case zone name as used in configuration.
	pub fn as_str(&self) -> &'static str {
		match self {
			ServerZone::Us => "US",
			ServerZone::Eu => "EU",
		}
	}

	/// Default ingestion URL for this zone.
	pub fn url(&self, use_batch: bool) -> &'static str {
		match (self, use_batch) {
			(ServerZone::Us, false) => US_SERVER_URL,
			(ServerZone::Us, true) => US_BATCH_SERVER_URL,
			(ServerZone::Eu, false) => EU_SERVER_URL,
			(ServerZone::Eu, true) => EU_BATCH_SERVER_URL,
		}
	}
}

impl std::fmt::Display for ServerZone {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

impl FromStr for ServerZone {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_uppercase().as_str() {
			"US" => Ok(ServerZone::Us),
			"EU" => Ok(ServerZone::Eu),
			_ => Err(CoreError::UnknownServerZone(s.to_string())),
		}
	}
}

/// Settings for one SDK instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackConfig {
	/// Project API key sent with every upload.
	pub api_key: String,
	/// Delay before queued events are flushed.
	pub flush_interval: Duration,
	/// Attempts after which an event is dropped.
	pub flush_max_retries: u32,
	/// Maximum events per upload request.
	pub flush_queue_size: usize,
	/// When set, nothing is scheduled or sent.
	pub offline: bool,
	/// When set, events are discarded before any plugin runs.
	pub opt_out: bool,
	/// Explicit ingestion URL; overrides `server_zone` and `use_batch`.
	pub server_url: Option<String>,
	/// Region whose default endpoint is used.
	pub server_zone: ServerZone,
	/// Use the batch endpoint instead of the HTTP V2 one.
	pub use_batch: bool,
	/// Forwarded to the backend as `options.min_id_length`.
	pub min_id_length: Option<u32>,
	/// Cool-down applied to events the backend throttled.
	pub throttle_timeout: Duration,
	/// Linear backoff unit for transient failures.
	pub retry_timeout: Duration,
	/// Namespace folded into the storage key.
	pub storage_namespace: Option<String>,
	/// Opaque metadata attached to each upload request.
	pub request_metadata: Option<Value>,
}

impl Default for TrackConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			flush_interval: DEFAULT_FLUSH_INTERVAL,
			flush_max_retries: DEFAULT_FLUSH_MAX_RETRIES,
			flush_queue_size: DEFAULT_FLUSH_QUEUE_SIZE,
			offline: false,
			opt_out: false,
			server_url: None,
			server_zone: ServerZone::default(),
			use_batch: false,
			min_id_length: None,
			throttle_timeout: DEFAULT_THROTTLE_TIMEOUT,
			retry_timeout: DEFAULT_RETRY_TIMEOUT,
			storage_namespace: None,
			request_metadata: None,
		}
	}
}

impl TrackConfig {
	/// Default settings for the given API key.
	pub fn new(api_key: impl Into<String>) -> Self {
		Self {
			api_key: api_key.into(),
			..Default::default()
		}
	}

	/// Reads overrides from `LOOM_TRACK_*` environment variables.
	///
	/// Unset variables keep their defaults; malformed values are errors.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Like [`TrackConfig::from_env`] but with an injectable variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(api_key) = lookup("LOOM_TRACK_API_KEY") {
			config.api_key = api_key;
		}
		if let Some(url) = lookup("LOOM_TRACK_SERVER_URL") {
			config.server_url = Some(url);
		}
		if let Some(zone) = lookup("LOOM_TRACK_SERVER_ZONE") {
			config.server_zone = zone.parse()?;
		}
		if let Some(ms) = parse_env::<u64, _>(&lookup, "LOOM_TRACK_FLUSH_INTERVAL_MS")? {
			config.flush_interval = Duration::from_millis(ms);
		}
		if let Some(retries) = parse_env(&lookup, "LOOM_TRACK_FLUSH_MAX_RETRIES")? {
			config.flush_max_retries = retries;
		}
		if let Some(size) = parse_env(&lookup, "LOOM_TRACK_FLUSH_QUEUE_SIZE")? {
			config.flush_queue_size = size;
		}
		if let Some(use_batch) = parse_env(&lookup, "LOOM_TRACK_USE_BATCH")? {
			config.use_batch = use_batch;
		}
		if let Some(offline) = parse_env(&lookup, "LOOM_TRACK_OFFLINE")? {
			config.offline = offline;
		}

		Ok(config)
	}

	/// Checks invariants the delivery queue relies on.
	pub fn validate(&self) -> Result<()> {
		if self.api_key.trim().is_empty() {
			return Err(CoreError::MissingApiKey);
		}
		if self.flush_queue_size == 0 {
			return Err(CoreError::InvalidConfig(
				"flush_queue_size must be at least 1".to_string(),
			));
		}
		if self.flush_max_retries == 0 {
			return Err(CoreError::InvalidConfig(
				"flush_max_retries must be at least 1".to_string(),
			));
		}
		Ok(())
	}

	/// The URL uploads are sent to.
	pub fn server_url(&self) -> String {
		match self.server_url {
			Some(ref url) if !url.is_empty() => url.clone(),
			_ => self.server_zone.url(self.use_batch).to_string(),
		}
	}

	/// Key under which unsent events are mirrored in storage.
	pub fn storage_key(&self) -> String {
		storage_key(&self.api_key, self.storage_namespace.as_deref())
	}
}

/// Derives a storage key from the fixed prefix, an optional namespace and a
/// truncated API key.
pub fn storage_key(api_key: &str, namespace: Option<&str>) -> String {
	let truncated: String = api_key.chars().take(STORAGE_KEY_API_KEY_LEN).collect();
	match namespace {
		Some(ns) if !ns.is_empty() => format!("{STORAGE_PREFIX}_{ns}_{truncated}"),
		_ => format!("{STORAGE_PREFIX}_{truncated}"),
	}
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
	T: FromStr,
	F: Fn(&str) -> Option<String>,
{
	let Some(value) = lookup(name) else {
		return Ok(None);
	};
	let parsed = value.trim().parse::<T>();
	match parsed {
		Ok(parsed) => Ok(Some(parsed)),
		Err(_) => Err(CoreError::InvalidEnv {
			name: name.to_string(),
			value,
		}),
	}
}
