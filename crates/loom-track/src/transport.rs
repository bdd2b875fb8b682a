// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Transports that upload one payload and classify the response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_track_core::{Payload, Response};
use reqwest::Client;
use tracing::debug;

use crate::error::Result;

/// SDK name reported in the User-Agent header.
pub const SDK_NAME: &str = "loom-track-rust";
/// SDK version reported in the User-Agent header and the `library` field.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default timeout for one upload request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends one payload to one URL.
///
/// Implementations return `Err` when no response was obtained at all; the
/// delivery queue treats that the same as a transient [`Response::Failed`].
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, url: &str, payload: &Payload) -> Result<Response>;
}

/// Type alias for a shared transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Returns the User-Agent string, `loom-track-rust/{version}`.
pub fn user_agent() -> String {
	format!("{SDK_NAME}/{SDK_VERSION}")
}

/// JSON-over-HTTP transport built on reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
}

impl HttpTransport {
	/// Creates a transport with the SDK User-Agent and a 30 second timeout.
	pub fn new() -> Result<Self> {
		Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
	}

	/// Creates a transport whose requests time out after `timeout`.
	pub fn with_timeout(timeout: Duration) -> Result<Self> {
		let client = Client::builder()
			.user_agent(user_agent())
			.timeout(timeout)
			.build()?;
		Ok(Self { client })
	}

	/// Wraps an already configured client.
	pub fn with_client(client: Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn send(&self, url: &str, payload: &Payload) -> Result<Response> {
		debug!(url, events = payload.len(), "Uploading event batch");

		let response = self
			.client
			.post(url)
			.header(reqwest::header::ACCEPT, "*/*")
			.json(payload)
			.send()
			.await?;

		let status = response.status().as_u16();
		let body = response.text().await.unwrap_or_default();
		let classified = Response::from_status(status, &body);

		debug!(status, kind = classified.kind(), "Upload response received");
		Ok(classified)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_track_core::Event;
	use wiremock::matchers::{body_partial_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn payload() -> Payload {
		Payload::new("test-key", [&Event::track("signup")], Some(3), None)
	}

	#[test]
	fn test_user_agent_has_sdk_name() {
		assert!(user_agent().starts_with("loom-track-rust/"));
	}

	#[tokio::test]
	async fn test_posts_payload_and_classifies_success() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/2/httpapi"))
			.and(header("content-type", "application/json"))
			.and(body_partial_json(serde_json::json!({
				"api_key": "test-key",
				"events": [{"event_type": "signup"}],
				"options": {"min_id_length": 3}
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"code": 200,
				"events_ingested": 1,
				"payload_size_bytes": 50,
				"server_upload_time": 1
			})))
			.expect(1)
			.mount(&server)
			.await;

		let transport = HttpTransport::new().unwrap();
		let response = transport
			.send(&format!("{}/2/httpapi", server.uri()), &payload())
			.await
			.unwrap();

		assert!(response.is_success());
	}

	#[tokio::test]
	async fn test_classifies_rate_limit_body() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
				"code": 429,
				"error": "Too many requests for some devices and users",
				"throttled_events": [0]
			})))
			.mount(&server)
			.await;

		let transport = HttpTransport::new().unwrap();
		let response = transport.send(&server.uri(), &payload()).await.unwrap();

		match response {
			Response::RateLimit { status_code, body } => {
				assert_eq!(status_code, 429);
				assert_eq!(body.throttled_events, vec![0]);
			}
			other => panic!("unexpected response: {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_classifies_server_error_as_failed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(502))
			.mount(&server)
			.await;

		let transport = HttpTransport::new().unwrap();
		let response = transport.send(&server.uri(), &payload()).await.unwrap();

		assert_eq!(response, Response::Failed { status_code: 502 });
	}

	#[tokio::test]
	async fn test_unreachable_server_is_an_error() {
		let transport = HttpTransport::with_timeout(Duration::from_millis(500)).unwrap();
		let result = transport.send("http://127.0.0.1:1/ingest", &payload()).await;

		let err = result.unwrap_err();
		assert!(err.is_retryable());
	}
}
