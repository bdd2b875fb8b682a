// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalized ingestion responses.
//!
//! Transports turn an HTTP status and body into a [`Response`]. The delivery
//! queue's retry engine matches on the variant to decide, per event, whether
//! to succeed, drop, or retry.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Error prefix the ingestion endpoint uses for unknown API keys.
pub const INVALID_API_KEY_PREFIX: &str = "Invalid API key";

/// Body of a 2xx response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessBody {
	pub events_ingested: u64,
	pub payload_size_bytes: u64,
	pub server_upload_time: i64,
}

/// Body of a 400 response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidBody {
	pub error: String,
	pub missing_field: Option<String>,
	/// Field name to the batch indices whose value was invalid.
	pub events_with_invalid_fields: HashMap<String, Vec<usize>>,
	/// Field name to the batch indices missing that field.
	pub events_with_missing_fields: HashMap<String, Vec<usize>>,
	/// Field name to the batch indices whose id was too short.
	pub events_with_invalid_id_lengths: HashMap<String, Vec<usize>>,
	pub silenced_events: Vec<usize>,
}

impl InvalidBody {
	/// Returns true when the whole request was rejected, e.g. a bad API key.
	pub fn rejects_whole_batch(&self) -> bool {
		self.missing_field.is_some() || self.error.starts_with(INVALID_API_KEY_PREFIX)
	}

	/// Batch indices that must be dropped rather than retried.
	pub fn dropped_indices(&self) -> HashSet<usize> {
		self.events_with_invalid_fields
			.values()
			.chain(self.events_with_missing_fields.values())
			.chain(self.events_with_invalid_id_lengths.values())
			.flatten()
			.chain(self.silenced_events.iter())
			.copied()
			.collect()
	}
}

/// Body of a response that only carries an error message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
	pub error: String,
}

/// Body of a 429 response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitBody {
	pub error: String,
	pub exceeded_daily_quota_users: HashMap<String, u64>,
	pub exceeded_daily_quota_devices: HashMap<String, u64>,
	/// Batch indices that must wait before being retried.
	pub throttled_events: Vec<usize>,
}

impl RateLimitBody {
	/// Returns true when the event's user or device has used its daily quota.
	pub fn is_over_quota(&self, event: &Event) -> bool {
		let user_over = event
			.user_id
			.as_ref()
			.is_some_and(|id| self.exceeded_daily_quota_users.contains_key(id));
		let device_over = event
			.device_id
			.as_ref()
			.is_some_and(|id| self.exceeded_daily_quota_devices.contains_key(id));
		user_over || device_over
	}

	/// Indices of events the backend asked to slow down.
	pub fn throttled_indices(&self) -> HashSet<usize> {
		self.throttled_events.iter().copied().collect()
	}
}

/// A transport response classified for the retry engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
	Success { status_code: u16, body: SuccessBody },
	Invalid { status_code: u16, body: InvalidBody },
	PayloadTooLarge { status_code: u16, body: ErrorBody },
	RateLimit { status_code: u16, body: RateLimitBody },
	Failed { status_code: u16 },
	Unknown { status_code: u16 },
}

impl Response {
	/// Classifies a raw status code and body.
	///
	/// Bodies that fail to parse are kept as the error message of an
	/// otherwise empty body, so classification never fails.
	pub fn from_status(status_code: u16, body: &str) -> Self {
		match status_code {
			200..=299 => Response::Success {
				status_code,
				body: serde_json::from_str(body).unwrap_or_default(),
			},
			413 => Response::PayloadTooLarge {
				status_code,
				body: parse_body(body, |error| ErrorBody { error }),
			},
			429 => Response::RateLimit {
				status_code,
				body: parse_body(body, |error| RateLimitBody {
					error,
					..Default::default()
				}),
			},
			408 | 500..=599 => Response::Failed { status_code },
			400..=499 => Response::Invalid {
				status_code,
				body: parse_body(body, |error| InvalidBody {
					error,
					..Default::default()
				}),
			},
			_ => Response::Unknown { status_code },
		}
	}

	/// HTTP status the response was classified from.
	pub fn status_code(&self) -> u16 {
		match self {
			Response::Success { status_code, .. }
			| Response::Invalid { status_code, .. }
			| Response::PayloadTooLarge { status_code, .. }
			| Response::RateLimit { status_code, .. }
			| Response::Failed { status_code }
			| Response::Unknown { status_code } => *status_code,
		}
	}

	/// Returns true for a 2xx response.
	pub fn is_success(&self) -> bool {
		matches!(self, Response::Success { .. })
	}

	/// Short variant name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Response::Success { .. } => "success",
			Response::Invalid { .. } => "invalid",
			Response::PayloadTooLarge { .. } => "payload_too_large",
			Response::RateLimit { .. } => "rate_limit",
			Response::Failed { .. } => "failed",
			Response::Unknown { .. } => "unknown",
		}
	}

	/// The backend error message, if the variant carries one.
	pub fn error_message(&self) -> Option<&str> {
		match self {
			Response::Invalid { body, .. } => Some(&body.error),
			Response::PayloadTooLarge { body, .. } => Some(&body.error),
			Response::RateLimit { body, .. } => Some(&body.error),
			_ => None,
		}
	}

	/// Human readable summary used when a response is reported without retrying.
	pub fn describe(&self) -> String {
		match self.error_message() {
			Some(error) if !error.is_empty() => format!("{}: {}", self.kind(), error),
			_ => self.kind().to_string(),
		}
	}
}

fn parse_body<T, F>(body: &str, fallback: F) -> T
where
	T: DeserializeOwned,
	F: FnOnce(String) -> T,
{
	serde_json::from_str(body).unwrap_or_else(|_| fallback(body.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_classifies_success() {
		let response = Response::from_status(
			200,
			r#"{"code":200,"events_ingested":3,"payload_size_bytes":120,"server_upload_time":1700000000000}"#,
		);
		match response {
			Response::Success { body, .. } => assert_eq!(body.events_ingested, 3),
			other => panic!("unexpected response: {other:?}"),
		}
	}

	#[test]
	fn test_classifies_invalid_with_indices() {
		let response = Response::from_status(
			400,
			r#"{"code":400,"error":"Request missing required field","events_with_invalid_fields":{"time":[0,2]},"events_with_missing_fields":{"event_type":[3]},"silenced_events":[5]}"#,
		);
		let Response::Invalid { body, .. } = response else {
			panic!("expected invalid");
		};
		assert!(!body.rejects_whole_batch());
		let dropped = body.dropped_indices();
		assert_eq!(dropped, HashSet::from([0, 2, 3, 5]));
	}

	#[test]
	fn test_missing_field_rejects_whole_batch() {
		let response = Response::from_status(
			400,
			r#"{"code":400,"error":"Request missing required field","missing_field":"api_key"}"#,
		);
		let Response::Invalid { body, .. } = response else {
			panic!("expected invalid");
		};
		assert!(body.rejects_whole_batch());
	}

	#[test]
	fn test_invalid_api_key_rejects_whole_batch() {
		let body = InvalidBody {
			error: "Invalid API key: abc".to_string(),
			..Default::default()
		};
		assert!(body.rejects_whole_batch());
	}

	#[test]
	fn test_classifies_rate_limit() {
		let response = Response::from_status(
			429,
			r#"{"code":429,"error":"Too many requests","exceeded_daily_quota_users":{"u1":1},"exceeded_daily_quota_devices":{"d1":1},"throttled_events":[0]}"#,
		);
		let Response::RateLimit { body, .. } = response else {
			panic!("expected rate limit");
		};
		assert!(body.is_over_quota(&Event::track("a").with_user_id("u1")));
		assert!(body.is_over_quota(&Event::track("a").with_device_id("d1")));
		assert!(!body.is_over_quota(&Event::track("a").with_user_id("u2")));
		assert_eq!(body.throttled_indices(), HashSet::from([0]));
	}

	#[test]
	fn test_unparseable_body_becomes_error_text() {
		let response = Response::from_status(413, "request entity too large");
		assert_eq!(response.error_message(), Some("request entity too large"));
		assert_eq!(response.describe(), "payload_too_large: request entity too large");
	}

	#[test]
	fn test_server_errors_are_failed() {
		assert_eq!(Response::from_status(503, ""), Response::Failed { status_code: 503 });
		assert_eq!(Response::from_status(408, ""), Response::Failed { status_code: 408 });
		assert_eq!(Response::from_status(302, ""), Response::Unknown { status_code: 302 });
	}

	proptest! {
		#[test]
		fn test_classification_preserves_status_code(status in 100u16..600) {
			let response = Response::from_status(status, "{}");
			prop_assert_eq!(response.status_code(), status);
		}

		#[test]
		fn test_only_2xx_is_success(status in 100u16..600) {
			let response = Response::from_status(status, "{}");
			prop_assert_eq!(response.is_success(), (200..300).contains(&status));
		}
	}
}
