// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tracking core types.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building or validating core types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
	/// No API key was configured.
	#[error("API key is required")]
	MissingApiKey,

	/// A configuration value is out of range.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// The server zone string is not recognised.
	#[error("unknown server zone: {0}")]
	UnknownServerZone(String),

	/// A revenue record is missing its price.
	#[error("revenue requires a price")]
	MissingRevenuePrice,

	/// An environment variable could not be parsed.
	#[error("environment variable {name} has invalid value {value:?}")]
	InvalidEnv { name: String, value: String },
}
