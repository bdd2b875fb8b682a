// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Upload payload and batch chunking.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// Per-request options understood by the ingestion endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadOptions {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub min_id_length: Option<u32>,
}

/// The JSON body of one upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
	pub api_key: String,
	/// Events in enqueue order, internal-only fields removed.
	pub events: Vec<Value>,
	pub options: PayloadOptions,
	/// RFC 3339 timestamp with millisecond precision.
	pub client_upload_time: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub request_metadata: Option<Value>,
}

impl Payload {
	/// Builds an upload body for the given events.
	pub fn new<'a>(
		api_key: impl Into<String>,
		events: impl IntoIterator<Item = &'a Event>,
		min_id_length: Option<u32>,
		request_metadata: Option<Value>,
	) -> Self {
		Self {
			api_key: api_key.into(),
			events: events.into_iter().map(Event::to_wire).collect(),
			options: PayloadOptions { min_id_length },
			client_upload_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
			request_metadata,
		}
	}

	/// Number of events in the payload.
	pub fn len(&self) -> usize {
		self.events.len()
	}

	/// Returns true if the payload carries no events.
	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}

	/// The `event_type` of each event, in payload order.
	pub fn event_types(&self) -> Vec<&str> {
		self.events
			.iter()
			.filter_map(|event| event.get("event_type").and_then(Value::as_str))
			.collect()
	}
}

/// Splits `items` into consecutive groups of at most `size`, preserving order.
///
/// A `size` of zero is treated as one.
pub fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
	let size = size.max(1);
	let mut batches = Vec::with_capacity(items.len().div_ceil(size));
	let mut current = Vec::with_capacity(size.min(items.len()));
	for item in items {
		current.push(item);
		if current.len() == size {
			batches.push(std::mem::take(&mut current));
		}
	}
	if !current.is_empty() {
		batches.push(current);
	}
	batches
}
