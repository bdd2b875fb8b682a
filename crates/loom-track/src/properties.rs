// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fluent builder for event, user and group property maps.

use serde_json::{Map, Value};

/// Property map builder.
///
/// ```
/// use loom_track::{Event, Properties};
///
/// let event = Event::track("checkout_completed").with_event_properties(
///     Properties::new()
///         .insert("cart_size", 3)
///         .insert("currency", "EUR")
///         .into_map(),
/// );
/// assert_eq!(event.event_properties.unwrap()["cart_size"], 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
	map: Map<String, Value>,
}

impl Properties {
	/// Creates an empty property map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a property. Any value convertible to JSON is accepted.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.map.insert(key.into(), value.into());
		self
	}

	/// Inserts `value` only when it is `Some`.
	pub fn insert_opt<K, V>(self, key: K, value: Option<V>) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		match value {
			Some(value) => self.insert(key, value),
			None => self,
		}
	}

	/// Adds every entry of `other`; its values win on conflicts.
	pub fn merge(mut self, other: Properties) -> Self {
		self.map.extend(other.map);
		self
	}

	/// Removes a property.
	pub fn remove(mut self, key: &str) -> Self {
		self.map.remove(key);
		self
	}

	/// Gets a value by key.
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.map.get(key)
	}

	/// Returns the number of properties.
	pub fn len(&self) -> usize {
		self.map.len()
	}

	/// Returns true if no properties are set.
	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	/// Converts into a JSON object map.
	pub fn into_map(self) -> Map<String, Value> {
		self.map
	}
}

impl From<Properties> for Map<String, Value> {
	fn from(properties: Properties) -> Self {
		properties.map
	}
}

impl From<Properties> for Value {
	fn from(properties: Properties) -> Self {
		Value::Object(properties.map)
	}
}

impl From<Map<String, Value>> for Properties {
	fn from(map: Map<String, Value>) -> Self {
		Self { map }
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		iter.into_iter()
			.fold(Self::new(), |properties, (key, value)| properties.insert(key, value))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_starts_empty() {
		let properties = Properties::new();
		assert!(properties.is_empty());
		assert_eq!(properties.len(), 0);
	}

	#[test]
	fn test_insert_accepts_json_values() {
		let properties = Properties::new()
			.insert("plan", "team")
			.insert("seats", 12)
			.insert("annual", true)
			.insert("tags", vec!["a", "b"]);

		assert_eq!(properties.len(), 4);
		assert_eq!(properties.get("plan"), Some(&Value::from("team")));
		assert_eq!(properties.get("seats"), Some(&Value::from(12)));
		assert_eq!(properties.get("tags"), Some(&serde_json::json!(["a", "b"])));
	}

	#[test]
	fn test_insert_opt_skips_none() {
		let properties = Properties::new()
			.insert_opt("referrer", Some("newsletter"))
			.insert_opt::<_, String>("coupon", None);
		assert_eq!(properties.len(), 1);
		assert!(properties.get("coupon").is_none());
	}

	#[test]
	fn test_merge_prefers_other() {
		let merged = Properties::new()
			.insert("a", 1)
			.insert("b", 2)
			.merge(Properties::new().insert("b", 3).insert("c", 4));

		assert_eq!(merged.get("a"), Some(&Value::from(1)));
		assert_eq!(merged.get("b"), Some(&Value::from(3)));
		assert_eq!(merged.len(), 3);
	}

	#[test]
	fn test_remove_drops_key() {
		let properties = Properties::new().insert("a", 1).remove("a").remove("missing");
		assert!(properties.is_empty());
	}

	#[test]
	fn test_collects_from_pairs() {
		let properties: Properties = [("x", 1), ("y", 2)].into_iter().collect();
		assert_eq!(Value::from(properties), serde_json::json!({"x": 1, "y": 2}));
	}

	proptest! {
		#[test]
		fn test_insert_then_get_returns_value(key in "[a-z_]{1,16}", value in any::<i64>()) {
			let properties = Properties::new().insert(key.clone(), value);
			prop_assert_eq!(properties.get(&key), Some(&Value::from(value)));
		}

		#[test]
		fn test_len_counts_distinct_keys(keys in prop::collection::vec("[a-c]{1,2}", 0..20)) {
			let distinct: std::collections::HashSet<_> = keys.iter().cloned().collect();
			let properties: Properties = keys.into_iter().map(|key| (key, 0)).collect();
			prop_assert_eq!(properties.len(), distinct.len());
		}
	}
}
