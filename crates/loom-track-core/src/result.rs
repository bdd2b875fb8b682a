// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Terminal delivery outcomes reported back to the caller.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Result code for outcomes decided locally (opt-out, plugin drop, plugin error).
pub const CODE_LOCAL: u16 = 0;
/// Result code when no destination plugin is registered.
pub const CODE_NO_DESTINATION: u16 = 100;
/// Result code for accepted events.
pub const CODE_SUCCESS: u16 = 200;
/// Result code when the API key is missing.
pub const CODE_MISSING_API_KEY: u16 = 400;
/// Result code when the retry ceiling is reached.
pub const CODE_MAX_RETRIES: u16 = 500;

pub const SUCCESS_MESSAGE: &str = "Event tracked successfully";
pub const OPT_OUT_MESSAGE: &str = "Event skipped due to opt out";
pub const MISSING_API_KEY_MESSAGE: &str = "No API key is set";
pub const MAX_RETRIES_EXCEEDED_MESSAGE: &str = "Event rejected due to exceeded retry count";
pub const NO_DESTINATION_MESSAGE: &str = "Event not tracked, no destination plugins registered";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected error occurred";

/// The final outcome of delivering one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
	pub event: Event,
	pub code: u16,
	pub message: String,
}

impl DeliveryResult {
	/// Creates a result with an explicit code.
	pub fn new(event: Event, code: u16, message: impl Into<String>) -> Self {
		Self {
			event,
			code,
			message: message.into(),
		}
	}

	/// A successful delivery.
	pub fn success(event: Event) -> Self {
		Self::new(event, CODE_SUCCESS, SUCCESS_MESSAGE)
	}

	/// An event discarded because tracking is opted out.
	pub fn opted_out(event: Event) -> Self {
		Self::new(event, CODE_LOCAL, OPT_OUT_MESSAGE)
	}

	/// An event dropped by the named plugin.
	pub fn dropped(event: Event, plugin: &str) -> Self {
		Self::new(event, CODE_LOCAL, format!("Event dropped by plugin {plugin}"))
	}

	/// A local failure with code 0.
	pub fn errored(event: Event, message: impl Into<String>) -> Self {
		Self::new(event, CODE_LOCAL, message)
	}

	/// An event that had no destination to go to.
	pub fn no_destination(event: Event) -> Self {
		Self::new(event, CODE_NO_DESTINATION, NO_DESTINATION_MESSAGE)
	}

	/// Returns true if the event was delivered.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.code)
	}
}
