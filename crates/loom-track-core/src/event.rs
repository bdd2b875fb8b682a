// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The tracked event record.
//!
//! An [`Event`] is a plain value. Pipeline stages take an event and return a
//! new one; the delivery queue treats it as immutable apart from assigning an
//! `insert_id` when the event is enqueued.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::identify::Identify;
use crate::revenue::Revenue;

/// Event type used for user property updates.
pub const IDENTIFY_EVENT: &str = "$identify";
/// Event type used for group property updates.
pub const GROUP_IDENTIFY_EVENT: &str = "$groupidentify";
/// Event type used for revenue records.
pub const REVENUE_EVENT: &str = "revenue_amount";

/// Tracking plan metadata attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub branch: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version_id: Option<String>,
}

/// Identifies the integration that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionMetadata {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_version: Option<String>,
}

/// A single tracked data point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub event_type: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub device_id: Option<String>,
	/// Milliseconds since the Unix epoch.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub event_id: Option<u64>,
	/// Deduplication key, assigned by the delivery queue if absent.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub insert_id: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub event_properties: Option<Map<String, Value>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_properties: Option<Map<String, Value>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub group_properties: Option<Map<String, Value>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub groups: Option<Map<String, Value>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub app_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub library: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub platform: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub os_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub os_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub device_model: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub language: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub partner_id: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub price: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub quantity: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub revenue: Option<f64>,
	#[serde(rename = "productId", skip_serializing_if = "Option::is_none")]
	pub product_id: Option<String>,
	#[serde(rename = "revenueType", skip_serializing_if = "Option::is_none")]
	pub revenue_type: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub plan: Option<Plan>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ingestion_metadata: Option<IngestionMetadata>,

	/// Internal-only data. Persisted with the event but never sent.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub extra: Option<Map<String, Value>>,
}

impl Event {
	/// Creates a plain tracking event.
	pub fn track(event_type: impl Into<String>) -> Self {
		Self {
			event_type: event_type.into(),
			..Default::default()
		}
	}

	/// Creates an `$identify` event carrying the given user property operations.
	pub fn identify(identify: &Identify) -> Self {
		Self {
			event_type: IDENTIFY_EVENT.to_string(),
			user_properties: Some(identify.user_properties()),
			..Default::default()
		}
	}

	/// Creates a `$groupidentify` event updating properties of one group.
	pub fn group_identify(
		group_type: impl Into<String>,
		group_name: impl Into<Value>,
		identify: &Identify,
	) -> Self {
		let mut groups = Map::new();
		groups.insert(group_type.into(), group_name.into());
		Self {
			event_type: GROUP_IDENTIFY_EVENT.to_string(),
			group_properties: Some(identify.user_properties()),
			groups: Some(groups),
			..Default::default()
		}
	}

	/// Creates an `$identify` event assigning the user to a group.
	pub fn set_group(group_type: impl Into<String>, group_name: impl Into<Value>) -> Self {
		let group_type = group_type.into();
		let group_name = group_name.into();
		let identify = Identify::new().set(group_type.clone(), group_name.clone());

		let mut groups = Map::new();
		groups.insert(group_type, group_name);
		Self {
			event_type: IDENTIFY_EVENT.to_string(),
			user_properties: Some(identify.user_properties()),
			groups: Some(groups),
			..Default::default()
		}
	}

	/// Creates a revenue event from a validated [`Revenue`].
	pub fn revenue(revenue: &Revenue) -> Self {
		Self {
			event_type: REVENUE_EVENT.to_string(),
			event_properties: Some(revenue.event_properties()),
			..Default::default()
		}
	}

	/// Sets the user id.
	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	/// Sets the device id.
	pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
		self.device_id = Some(device_id.into());
		self
	}

	/// Replaces the event properties.
	pub fn with_event_properties(mut self, properties: Map<String, Value>) -> Self {
		self.event_properties = Some(properties);
		self
	}

	/// Replaces the user properties.
	pub fn with_user_properties(mut self, properties: Map<String, Value>) -> Self {
		self.user_properties = Some(properties);
		self
	}

	/// Sets the event time in milliseconds since the epoch.
	pub fn with_time(mut self, time_ms: i64) -> Self {
		self.time = Some(time_ms);
		self
	}

	/// Sets an explicit deduplication id.
	pub fn with_insert_id(mut self, insert_id: impl Into<String>) -> Self {
		self.insert_id = Some(insert_id.into());
		self
	}

	/// Assigns a random `insert_id` unless one is already present.
	pub fn ensure_insert_id(&mut self) -> &str {
		self.insert_id
			.get_or_insert_with(|| Uuid::new_v4().to_string())
			.as_str()
	}

	/// Returns the JSON sent on the wire, with internal-only fields removed.
	pub fn to_wire(&self) -> Value {
		let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
		if let Value::Object(ref mut map) = value {
			map.remove("extra");
		}
		value
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_track_event_serializes_only_set_fields() {
		let event = Event::track("button_clicked").with_user_id("user-1");
		let json = serde_json::to_value(&event).unwrap();

		assert_eq!(json["event_type"], "button_clicked");
		assert_eq!(json["user_id"], "user-1");
		assert!(json.get("device_id").is_none());
	}

	#[test]
	fn test_to_wire_strips_extra() {
		let mut extra = Map::new();
		extra.insert("retry_hint".to_string(), Value::Bool(true));
		let event = Event {
			extra: Some(extra),
			..Event::track("checkout")
		};

		let stored = serde_json::to_value(&event).unwrap();
		assert!(stored.get("extra").is_some());

		let wire = event.to_wire();
		assert!(wire.get("extra").is_none());
		assert_eq!(wire["event_type"], "checkout");
	}

	#[test]
	fn test_ensure_insert_id_keeps_existing_value() {
		let mut event = Event::track("a").with_insert_id("fixed");
		assert_eq!(event.ensure_insert_id(), "fixed");
	}

	#[test]
	fn test_ensure_insert_id_assigns_when_missing() {
		let mut event = Event::track("a");
		let id = event.ensure_insert_id().to_string();
		assert!(Uuid::parse_str(&id).is_ok());
		assert_eq!(event.insert_id.as_deref(), Some(id.as_str()));
	}

	#[test]
	fn test_set_group_builds_identify_with_groups() {
		let event = Event::set_group("org", "acme");

		assert_eq!(event.event_type, IDENTIFY_EVENT);
		let groups = event.groups.unwrap();
		assert_eq!(groups["org"], "acme");
		let props = event.user_properties.unwrap();
		assert_eq!(props["$set"]["org"], "acme");
	}

	#[test]
	fn test_group_identify_uses_group_properties() {
		let identify = Identify::new().set("plan", "enterprise");
		let event = Event::group_identify("org", "acme", &identify);

		assert_eq!(event.event_type, GROUP_IDENTIFY_EVENT);
		assert!(event.user_properties.is_none());
		assert_eq!(event.group_properties.unwrap()["$set"]["plan"], "enterprise");
	}

	#[test]
	fn test_revenue_fields_use_camel_case_on_wire() {
		let event = Event {
			product_id: Some("sku-1".to_string()),
			revenue_type: Some("purchase".to_string()),
			..Event::track("buy")
		};
		let wire = event.to_wire();
		assert_eq!(wire["productId"], "sku-1");
		assert_eq!(wire["revenueType"], "purchase");
	}

	proptest! {
		#[test]
		fn test_stored_event_deserializes_back(
			event_type in "[a-z_]{1,20}",
			user_id in prop::option::of("[a-zA-Z0-9]{5,20}"),
			time in prop::option::of(0i64..4_000_000_000_000),
		) {
			let event = Event {
				user_id: user_id.clone(),
				time,
				..Event::track(event_type.clone())
			};
			let json = serde_json::to_string(&event).unwrap();
			let back: Event = serde_json::from_str(&json).unwrap();
			prop_assert_eq!(back, event);
		}
	}
}
