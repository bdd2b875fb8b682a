// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event tracking SDK for Loom.
//!
//! Applications record events through a [`TrackClient`]. Each event passes
//! through an ordered [`Pipeline`] of plugins and is then handed to the
//! destinations, which batch, upload and retry it until delivery is decided.
//!
//! # Architecture
//!
//! - [`Pipeline`]: runs Before, Enrichment and Destination plugins in order
//! - [`DeliveryQueue`]: batches events and drives retries from the
//!   classified ingestion [`Response`]
//! - [`Transport`]: performs the upload; [`HttpTransport`] uses reqwest
//! - [`Storage`]: mirrors unsent events so a restart can resume delivery
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use loom_track::{FileStorage, Properties, TrackClient};
//!
//! # async fn run() -> loom_track::Result<()> {
//! let client = TrackClient::builder()
//!     .api_key("my-api-key")
//!     .flush_interval(Duration::from_secs(5))
//!     .storage(Arc::new(FileStorage::new("/var/lib/myapp/track")))
//!     .build()
//!     .await?;
//!
//! let result = client
//!     .track("report_exported", Some(Properties::new().insert("format", "csv")))
//!     .await?;
//! println!("delivered with code {}", result.code);
//!
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod context;
pub mod destination;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod properties;
pub mod queue;
pub mod storage;
pub mod transport;

pub use client::{TrackClient, TrackClientBuilder};
pub use context::{ContextPlugin, Identity, CONTEXT_PLUGIN_NAME};
pub use destination::{HttpDestination, HTTP_DESTINATION_NAME};
pub use error::{Result, TrackError};
pub use pipeline::Pipeline;
pub use plugin::{
	DestinationPlugin, EventPlugin, Plugin, PluginHandle, PluginKind, SharedDestinationPlugin,
	SharedEventPlugin,
};
pub use properties::Properties;
pub use queue::{DeliveryQueue, DeliveryReceipt, QueuePhase};
pub use storage::{FileStorage, MemoryStorage, NoopStorage, SharedStorage, Storage};
pub use transport::{HttpTransport, SharedTransport, Transport};

pub use loom_track_core::{
	storage_key, DeliveryResult, Event, Identify, IdentifyOperation, Payload, Response, Revenue,
	ServerZone, TrackConfig,
};
