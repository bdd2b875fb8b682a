// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User and group property operations.
//!
//! An [`Identify`] collects property operations (`$set`, `$add`, ...) that are
//! sent as the `user_properties` of an `$identify` event or the
//! `group_properties` of a `$groupidentify` event.
//!
//! Each property may be touched by only one operation per `Identify`. Once
//! `$clearAll` is set, no further operations are accepted.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

/// Value sent for operations that take no argument.
const UNSET_VALUE: &str = "-";

/// A user property operation understood by the ingestion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifyOperation {
	Set,
	SetOnce,
	Add,
	Append,
	Prepend,
	PreInsert,
	PostInsert,
	Remove,
	Unset,
	ClearAll,
}

impl IdentifyOperation {
	/// Wire name of the operation, e.g. `$setOnce`.
	pub fn as_str(&self) -> &'static str {
		match self {
			IdentifyOperation::Set => "$set",
			IdentifyOperation::SetOnce => "$setOnce",
			IdentifyOperation::Add => "$add",
			IdentifyOperation::Append => "$append",
			IdentifyOperation::Prepend => "$prepend",
			IdentifyOperation::PreInsert => "$preInsert",
			IdentifyOperation::PostInsert => "$postInsert",
			IdentifyOperation::Remove => "$remove",
			IdentifyOperation::Unset => "$unset",
			IdentifyOperation::ClearAll => "$clearAll",
		}
	}
}

impl std::fmt::Display for IdentifyOperation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Builder for user or group property operations.
///
/// # Example
///
/// ```
/// use loom_track_core::Identify;
///
/// let identify = Identify::new()
///     .set("plan", "enterprise")
///     .set_once("first_seen", "2025-01-01")
///     .add("logins", 1);
/// assert_eq!(identify.user_properties()["$add"]["logins"], 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Identify {
	operations: Map<String, Value>,
	properties: HashSet<String>,
}

impl Identify {
	/// Creates an empty identify.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets a property, overwriting any previous value.
	pub fn set(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::Set, property.into(), value.into())
	}

	/// Sets a property only if it has no value yet.
	pub fn set_once(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::SetOnce, property.into(), value.into())
	}

	/// Increments a numeric property. Non-numeric values are ignored.
	pub fn add(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::Add, property.into(), value.into())
	}

	/// Appends a value to a list property.
	pub fn append(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::Append, property.into(), value.into())
	}

	/// Prepends a value to a list property.
	pub fn prepend(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::Prepend, property.into(), value.into())
	}

	/// Inserts a value at the front of a list property unless already present.
	pub fn pre_insert(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::PreInsert, property.into(), value.into())
	}

	/// Inserts a value at the end of a list property unless already present.
	pub fn post_insert(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::PostInsert, property.into(), value.into())
	}

	/// Removes a value from a list property.
	pub fn remove(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
		self.apply(IdentifyOperation::Remove, property.into(), value.into())
	}

	/// Unsets a property.
	pub fn unset(self, property: impl Into<String>) -> Self {
		self.apply(
			IdentifyOperation::Unset,
			property.into(),
			Value::String(UNSET_VALUE.to_string()),
		)
	}

	/// Clears every user property. Replaces all previously added operations.
	pub fn clear_all(mut self) -> Self {
		self.operations = Map::new();
		self.properties.clear();
		self.operations.insert(
			IdentifyOperation::ClearAll.as_str().to_string(),
			Value::String(UNSET_VALUE.to_string()),
		);
		self
	}

	/// Returns true if no operation has been recorded.
	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}

	/// Returns the operations as a `user_properties` map.
	pub fn user_properties(&self) -> Map<String, Value> {
		self.operations.clone()
	}

	fn apply(mut self, operation: IdentifyOperation, property: String, value: Value) -> Self {
		if let Some(reason) = self.rejection(operation, &property, &value) {
			warn!(%operation, property = %property, reason, "Ignoring identify operation");
			return self;
		}

		let entry = self
			.operations
			.entry(operation.as_str().to_string())
			.or_insert_with(|| Value::Object(Map::new()));
		if let Value::Object(map) = entry {
			map.insert(property.clone(), value);
		}
		self.properties.insert(property);
		self
	}

	fn rejection(
		&self,
		operation: IdentifyOperation,
		property: &str,
		value: &Value,
	) -> Option<&'static str> {
		if self.operations.contains_key(IdentifyOperation::ClearAll.as_str()) {
			return Some("$clearAll already set");
		}
		if self.properties.contains(property) {
			return Some("property already used by another operation");
		}
		match operation {
			IdentifyOperation::Add if !value.is_number() => Some("$add requires a number"),
			IdentifyOperation::Unset | IdentifyOperation::Remove => None,
			_ if value.is_null() => Some("value must not be null"),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_operations_are_grouped_by_kind() {
		let identify = Identify::new()
			.set("plan", "pro")
			.set("seats", 5)
			.append("tags", "beta");

		let props = identify.user_properties();
		assert_eq!(props["$set"]["plan"], "pro");
		assert_eq!(props["$set"]["seats"], 5);
		assert_eq!(props["$append"]["tags"], "beta");
	}

	#[test]
	fn test_property_used_once_across_operations() {
		let identify = Identify::new().set("plan", "pro").set_once("plan", "free");

		let props = identify.user_properties();
		assert_eq!(props["$set"]["plan"], "pro");
		assert!(props.get("$setOnce").is_none());
	}

	#[test]
	fn test_add_rejects_non_numbers() {
		let identify = Identify::new().add("logins", "many");
		assert!(identify.is_empty());
	}

	#[test]
	fn test_unset_uses_placeholder_value() {
		let identify = Identify::new().unset("nickname");
		assert_eq!(identify.user_properties()["$unset"]["nickname"], "-");
	}

	#[test]
	fn test_clear_all_is_exclusive() {
		let identify = Identify::new()
			.set("plan", "pro")
			.clear_all()
			.set("seats", 3);

		let props = identify.user_properties();
		assert_eq!(props.len(), 1);
		assert_eq!(props["$clearAll"], "-");
	}

	#[test]
	fn test_null_values_are_ignored() {
		let identify = Identify::new().set("plan", Value::Null);
		assert!(identify.is_empty());
	}
}
