// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tracking SDK.

use loom_track_core::CoreError;
use thiserror::Error;

/// Tracking SDK errors.
///
/// Delivery problems never surface as errors from `track()`-style calls;
/// they are reported through [`loom_track_core::DeliveryResult`]. These
/// errors cover construction, collaborators and plugin failures, which the
/// pipeline converts to results at its boundary.
#[derive(Debug, Error)]
pub enum TrackError {
	/// Configuration was rejected.
	#[error("invalid configuration: {0}")]
	Config(#[from] CoreError),

	/// An event could not be built from the caller's input.
	#[error("invalid event: {0}")]
	InvalidEvent(String),

	/// HTTP request failed before a response was received.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// The transport produced no response.
	#[error("transport returned no response")]
	NoResponse,

	/// A storage provider failed.
	#[error("storage error: {0}")]
	Storage(String),

	/// A plugin failed during setup, execute or teardown.
	#[error("plugin '{plugin}' failed: {message}")]
	Plugin { plugin: String, message: String },

	/// A plugin panicked.
	#[error("plugin '{plugin}' panicked")]
	PluginPanicked { plugin: String },

	/// The delivery queue was dropped before fulfilling an event.
	#[error("delivery queue closed before the event was fulfilled")]
	QueueClosed,

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,

	/// Serialization error.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// File system error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl TrackError {
	/// Builds a plugin error from any displayable cause.
	pub fn plugin(plugin: impl Into<String>, message: impl std::fmt::Display) -> Self {
		TrackError::Plugin {
			plugin: plugin.into(),
			message: message.to_string(),
		}
	}

	/// Returns true if retrying the same request could succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			TrackError::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
			TrackError::NoResponse => true,
			_ => false,
		}
	}
}

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_no_response_is_retryable() {
		assert!(TrackError::NoResponse.is_retryable());
	}

	#[test]
	fn test_config_error_not_retryable() {
		let err = TrackError::from(CoreError::MissingApiKey);
		assert!(!err.is_retryable());
		assert_eq!(err.to_string(), "invalid configuration: API key is required");
	}

	#[test]
	fn test_plugin_error_names_plugin() {
		let err = TrackError::plugin("redactor", "boom");
		assert_eq!(err.to_string(), "plugin 'redactor' failed: boom");
		assert!(!err.is_retryable());
	}

	#[test]
	fn test_client_shutdown_not_retryable() {
		assert!(!TrackError::ClientShutdown.is_retryable());
	}
}
