// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom event tracking SDK.
//!
//! This crate holds the value types shared by the plugin pipeline and the
//! delivery queue in `loom-track`:
//!
//! - [`Event`]: one tracked data point, plus builders for identify, group and
//!   revenue events
//! - [`Response`]: an ingestion response classified for the retry engine
//! - [`DeliveryResult`]: the terminal per-event outcome reported to callers
//! - [`Payload`] and [`chunk`]: the upload body and batch splitting
//! - [`TrackConfig`]: instance settings, endpoint selection and storage keys

pub mod config;
pub mod error;
pub mod event;
pub mod identify;
pub mod payload;
pub mod response;
pub mod result;
pub mod revenue;

pub use config::{storage_key, ServerZone, TrackConfig};
pub use error::{CoreError, Result};
pub use event::{
	Event, IngestionMetadata, Plan, GROUP_IDENTIFY_EVENT, IDENTIFY_EVENT, REVENUE_EVENT,
};
pub use identify::{Identify, IdentifyOperation};
pub use payload::{chunk, Payload, PayloadOptions};
pub use response::{ErrorBody, InvalidBody, RateLimitBody, Response, SuccessBody};
pub use result::DeliveryResult;
pub use revenue::Revenue;
