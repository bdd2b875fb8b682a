// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery queue with response-driven retry and backoff.
//!
//! The queue owns every event a destination has accepted until the event
//! reaches a terminal outcome. Events are uploaded in batches when a timer
//! fires or when a flush is requested, and the classified [`Response`]
//! decides per event whether it is fulfilled, dropped or retried later.
//!
//! Scheduling is a small phase machine:
//!
//! - [`QueuePhase::Idle`]: no timer is pending and nothing is being sent
//! - [`QueuePhase::Scheduled`]: a timer will flush the queue at `deadline`
//! - [`QueuePhase::Flushing`]: batches are being uploaded
//!
//! A pending timer is only replaced by a request with a strictly longer
//! timeout, so throttle and backoff delays are never shortened by newly
//! enqueued events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use loom_track_core::result::{
	CODE_LOCAL, CODE_MAX_RETRIES, CODE_MISSING_API_KEY, MAX_RETRIES_EXCEEDED_MESSAGE,
	MISSING_API_KEY_MESSAGE, SUCCESS_MESSAGE, UNEXPECTED_ERROR_MESSAGE,
};
use loom_track_core::{chunk, DeliveryResult, Event, Payload, Response, TrackConfig};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::TrackError;
use crate::storage::{load_events, save_events, SharedStorage};
use crate::transport::SharedTransport;

/// Observable scheduling state of a [`DeliveryQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
	Idle,
	Scheduled { deadline: Instant, timeout: Duration },
	Flushing,
}

/// Resolves with the terminal [`DeliveryResult`] of one enqueued event.
#[derive(Debug)]
pub struct DeliveryReceipt {
	event: Event,
	rx: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryReceipt {
	/// A receipt that is already resolved.
	pub fn ready(result: DeliveryResult) -> Self {
		let (tx, rx) = oneshot::channel();
		let event = result.event.clone();
		let _ = tx.send(result);
		Self { event, rx }
	}

	/// The event as it was accepted, including its `insert_id`.
	pub fn event(&self) -> &Event {
		&self.event
	}

	/// Waits for the outcome. A queue dropped before fulfilling the event
	/// yields a code 0 result.
	pub async fn result(self) -> DeliveryResult {
		match self.rx.await {
			Ok(result) => result,
			Err(_) => DeliveryResult::errored(self.event, TrackError::QueueClosed.to_string()),
		}
	}
}

struct QueueItem {
	id: u64,
	event: Event,
	attempts: u32,
	/// Zero means eligible for the next flush.
	timeout: Duration,
	callback: oneshot::Sender<DeliveryResult>,
}

/// A batch member as seen by the send path, detached from queue state.
#[derive(Clone)]
struct BatchEntry {
	id: u64,
	event: Event,
}

struct ScheduledFlush {
	generation: u64,
	timeout: Duration,
	deadline: Instant,
	handle: JoinHandle<()>,
}

struct QueueState {
	items: Vec<QueueItem>,
	timer: Option<ScheduledFlush>,
	next_generation: u64,
	next_item_id: u64,
	flush_queue_size: usize,
	offline: bool,
	closed: bool,
}

struct Inner {
	config: TrackConfig,
	url: String,
	transport: SharedTransport,
	storage: Option<SharedStorage>,
	storage_key: String,
	state: Mutex<QueueState>,
	in_flight: AtomicBool,
	persist_lock: Mutex<()>,
}

/// Clears the in-flight flag when a flush ends, even if it is cancelled.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

/// Batches, uploads and retries events for one destination.
#[derive(Clone)]
pub struct DeliveryQueue {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for DeliveryQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeliveryQueue")
			.field("url", &self.inner.url)
			.field("storage_key", &self.inner.storage_key)
			.finish_non_exhaustive()
	}
}

impl DeliveryQueue {
	/// Creates a queue sending through `transport` and mirroring to `storage`.
	pub fn new(
		config: TrackConfig,
		transport: SharedTransport,
		storage: Option<SharedStorage>,
	) -> Self {
		let state = QueueState {
			items: Vec::new(),
			timer: None,
			next_generation: 0,
			next_item_id: 0,
			flush_queue_size: config.flush_queue_size.max(1),
			offline: config.offline,
			closed: false,
		};
		Self {
			inner: Arc::new(Inner {
				url: config.server_url(),
				storage_key: config.storage_key(),
				config,
				transport,
				storage,
				state: Mutex::new(state),
				in_flight: AtomicBool::new(false),
				persist_lock: Mutex::new(()),
			}),
		}
	}

	/// Configuration the queue was created with.
	pub fn config(&self) -> &TrackConfig {
		&self.inner.config
	}

	/// Number of events awaiting a terminal outcome.
	pub async fn len(&self) -> usize {
		self.inner.state.lock().await.items.len()
	}

	/// Returns true if no event is awaiting an outcome.
	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}

	/// Current batch size limit. Shrinks after oversized payloads.
	pub async fn flush_queue_size(&self) -> usize {
		self.inner.state.lock().await.flush_queue_size
	}

	/// Current scheduling phase.
	pub async fn phase(&self) -> QueuePhase {
		if self.inner.in_flight.load(Ordering::Acquire) {
			return QueuePhase::Flushing;
		}
		let state = self.inner.state.lock().await;
		match state.timer {
			Some(ref timer) => QueuePhase::Scheduled {
				deadline: timer.deadline,
				timeout: timer.timeout,
			},
			None => QueuePhase::Idle,
		}
	}

	/// Returns true while delivery is paused.
	pub async fn is_offline(&self) -> bool {
		self.inner.state.lock().await.offline
	}

	/// Accepts an event and schedules a flush at the regular interval.
	pub async fn enqueue(&self, mut event: Event) -> DeliveryReceipt {
		event.ensure_insert_id();
		let (tx, rx) = oneshot::channel();
		let receipt = DeliveryReceipt {
			event: event.clone(),
			rx,
		};

		{
			let mut state = self.inner.state.lock().await;
			if state.closed {
				drop(state);
				return DeliveryReceipt::ready(DeliveryResult::errored(
					event,
					TrackError::QueueClosed.to_string(),
				));
			}
			let id = state.next_item_id;
			state.next_item_id += 1;
			state.items.push(QueueItem {
				id,
				event,
				attempts: 0,
				timeout: Duration::ZERO,
				callback: tx,
			});
		}

		self.persist().await;
		self.schedule(self.inner.config.flush_interval).await;
		receipt
	}

	/// Arms the flush timer.
	///
	/// Does nothing while offline or after shutdown. A pending timer is kept
	/// unless `timeout` is strictly longer than the timeout it was armed with.
	pub async fn schedule(&self, timeout: Duration) {
		let mut state = self.inner.state.lock().await;
		if state.offline || state.closed {
			return;
		}
		if let Some(ref pending) = state.timer {
			if timeout <= pending.timeout {
				return;
			}
		}
		if let Some(replaced) = state.timer.take() {
			replaced.handle.abort();
		}

		let generation = state.next_generation;
		state.next_generation += 1;
		let deadline = Instant::now() + timeout;
		let weak = Arc::downgrade(&self.inner);
		let handle = tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;
			fire(weak, generation).await;
		});

		debug!(timeout_ms = timeout.as_millis() as u64, generation, "Flush scheduled");
		state.timer = Some(ScheduledFlush {
			generation,
			timeout,
			deadline,
			handle,
		});
	}

	/// Uploads every due event.
	///
	/// Skipped while offline or while another flush is in flight. Items still
	/// queued afterwards are re-scheduled. With `use_retry` unset every
	/// response is reported as-is and nothing is retried.
	pub async fn flush(&self, use_retry: bool) {
		let (batches, guard) = {
			let mut state = self.inner.state.lock().await;
			if let Some(pending) = state.timer.take() {
				pending.handle.abort();
			}
			if state.offline {
				debug!("Flush skipped while offline");
				return;
			}
			if self
				.inner
				.in_flight
				.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
				.is_err()
			{
				debug!("Flush skipped, another flush is in flight");
				return;
			}
			let guard = FlushGuard(&self.inner.in_flight);

			let due: Vec<BatchEntry> = state
				.items
				.iter()
				.filter(|item| item.timeout.is_zero())
				.map(|item| BatchEntry {
					id: item.id,
					event: item.event.clone(),
				})
				.collect();
			debug!(
				due = due.len(),
				later = state.items.len() - due.len(),
				batch_size = state.flush_queue_size,
				use_retry,
				"Flushing delivery queue"
			);
			(chunk(due, state.flush_queue_size), guard)
		};

		for batch in batches {
			self.send(batch, use_retry).await;
		}

		let longest = {
			let state = self.inner.state.lock().await;
			state.items.iter().map(|item| self.delay_for(item.timeout)).max()
		};
		drop(guard);
		if let Some(timeout) = longest {
			self.schedule(timeout).await;
		}
	}

	/// Stops or resumes delivery. Coming back online schedules a flush at the
	/// regular interval when events are waiting.
	pub async fn set_offline(&self, offline: bool) {
		let has_items = {
			let mut state = self.inner.state.lock().await;
			state.offline = offline;
			if offline {
				if let Some(pending) = state.timer.take() {
					pending.handle.abort();
				}
			}
			!state.items.is_empty()
		};
		debug!(offline, "Delivery queue connectivity changed");
		if !offline && has_items {
			self.schedule(self.inner.config.flush_interval).await;
		}
	}

	/// Re-enqueues events left in storage by a previous process.
	///
	/// Returns the number of restored events. Their outcomes are only logged.
	pub async fn restore(&self) -> usize {
		let Some(ref storage) = self.inner.storage else {
			return 0;
		};
		let key = &self.inner.storage_key;
		let events = load_events(storage.as_ref(), key).await;
		if let Err(e) = storage.remove(key).await {
			warn!(key = %key, error = %e, "Failed to clear unsent events from storage");
		}

		let restored = events.len();
		for event in events {
			drop(self.enqueue(event).await);
		}
		if restored > 0 {
			debug!(restored, key = %key, "Restored unsent events");
		}
		restored
	}

	/// Cancels the pending timer and rejects further events.
	///
	/// Every event still queued resolves with a code 0 result. The storage
	/// mirror keeps them so the next restore can deliver them.
	pub async fn shutdown(&self) {
		let remaining = {
			let mut state = self.inner.state.lock().await;
			if state.closed {
				return;
			}
			state.closed = true;
			if let Some(pending) = state.timer.take() {
				pending.handle.abort();
			}
			std::mem::take(&mut state.items)
		};
		debug!(pending = remaining.len(), "Delivery queue shut down");

		if let Some(ref storage) = self.inner.storage {
			let _write = self.inner.persist_lock.lock().await;
			let snapshot: Vec<Event> = remaining.iter().map(|item| item.event.clone()).collect();
			if let Err(e) = save_events(storage.as_ref(), &self.inner.storage_key, &snapshot).await {
				error!(key = %self.inner.storage_key, error = %e, "Failed to persist unsent events");
			}
		}

		let message = TrackError::QueueClosed.to_string();
		for item in remaining {
			let _ = item
				.callback
				.send(DeliveryResult::errored(item.event, message.clone()));
		}
	}

	fn delay_for(&self, timeout: Duration) -> Duration {
		if timeout.is_zero() {
			self.inner.config.flush_interval
		} else {
			timeout
		}
	}

	async fn send(&self, batch: Vec<BatchEntry>, use_retry: bool) {
		let config = &self.inner.config;
		if config.api_key.is_empty() {
			let outcomes = batch
				.iter()
				.map(|entry| (entry.id, CODE_MISSING_API_KEY, MISSING_API_KEY_MESSAGE.to_string()))
				.collect();
			self.fulfill(outcomes).await;
			return;
		}

		let payload = Payload::new(
			config.api_key.clone(),
			batch.iter().map(|entry| &entry.event),
			config.min_id_length,
			config.request_metadata.clone(),
		);

		let response = match self.inner.transport.send(&self.inner.url, &payload).await {
			Ok(response) => response,
			Err(e) => {
				error!(url = %self.inner.url, events = batch.len(), error = %e, "Event upload failed");
				if !use_retry {
					let message = format!("{UNEXPECTED_ERROR_MESSAGE}: {e}");
					self.fulfill(uniform(&batch, CODE_LOCAL, &message)).await;
					return;
				}
				Response::Failed { status_code: 0 }
			}
		};

		if !use_retry {
			let message = if response.is_success() {
				SUCCESS_MESSAGE.to_string()
			} else {
				response.describe()
			};
			self.fulfill(uniform(&batch, response.status_code(), &message)).await;
			return;
		}

		self.handle_response(response, batch).await;
	}

	async fn handle_response(&self, response: Response, batch: Vec<BatchEntry>) {
		match response {
			Response::Success { status_code, .. } => {
				self.fulfill(uniform(&batch, status_code, SUCCESS_MESSAGE)).await;
			}
			Response::Invalid { status_code, body } => {
				if body.rejects_whole_batch() {
					warn!(status_code, error = %body.error, events = batch.len(), "Batch rejected");
					self.fulfill(uniform(&batch, status_code, &body.error)).await;
					return;
				}
				let dropped = body.dropped_indices();
				let (rejected, retry) = partition_indices(batch, &dropped);
				if !rejected.is_empty() {
					warn!(status_code, error = %body.error, dropped = rejected.len(), "Events rejected as invalid");
				}
				self.fulfill(uniform(&rejected, status_code, &body.error)).await;
				self.retry(retry).await;
			}
			Response::PayloadTooLarge { status_code, body } => {
				if batch.len() == 1 {
					warn!(status_code, error = %body.error, "Single event exceeds payload limit");
					self.fulfill(uniform(&batch, status_code, &body.error)).await;
					return;
				}
				{
					let mut state = self.inner.state.lock().await;
					state.flush_queue_size = (state.flush_queue_size / 2).max(1);
					warn!(
						flush_queue_size = state.flush_queue_size,
						"Payload too large, reduced batch size"
					);
				}
				self.retry(batch).await;
			}
			Response::RateLimit { status_code, body } => {
				let throttled = body.throttled_indices();
				let mut over_quota = Vec::new();
				let mut delayed = Vec::new();
				let mut retry = Vec::new();
				for (index, entry) in batch.into_iter().enumerate() {
					if body.is_over_quota(&entry.event) {
						over_quota.push(entry);
					} else {
						if throttled.contains(&index) {
							delayed.push(entry.id);
						}
						retry.push(entry);
					}
				}
				warn!(
					status_code,
					over_quota = over_quota.len(),
					throttled = delayed.len(),
					"Events rate limited"
				);

				if !delayed.is_empty() {
					let throttle = self.inner.config.throttle_timeout;
					let mut state = self.inner.state.lock().await;
					for item in state.items.iter_mut() {
						if delayed.contains(&item.id) {
							item.timeout = throttle;
						}
					}
				}
				self.fulfill(uniform(&over_quota, status_code, &body.error)).await;
				self.retry(retry).await;
			}
			Response::Failed { status_code } | Response::Unknown { status_code } => {
				warn!(status_code, events = batch.len(), "Event upload failed, will retry");
				{
					let unit = self.inner.config.retry_timeout;
					let ids: HashSet<u64> = batch.iter().map(|entry| entry.id).collect();
					let mut state = self.inner.state.lock().await;
					for item in state.items.iter_mut().filter(|item| ids.contains(&item.id)) {
						item.timeout = unit.saturating_mul(item.attempts);
					}
				}
				self.retry(batch).await;
			}
		}
	}

	/// Counts an attempt for each entry and drops those that hit the ceiling.
	async fn retry(&self, batch: Vec<BatchEntry>) {
		if batch.is_empty() {
			return;
		}
		let max_retries = self.inner.config.flush_max_retries;
		let ids: HashSet<u64> = batch.iter().map(|entry| entry.id).collect();

		let mut exhausted = Vec::new();
		let mut longest: Option<Duration> = None;
		{
			let mut state = self.inner.state.lock().await;
			for item in state.items.iter_mut().filter(|item| ids.contains(&item.id)) {
				item.attempts += 1;
				if item.attempts >= max_retries {
					exhausted.push((item.id, CODE_MAX_RETRIES, MAX_RETRIES_EXCEEDED_MESSAGE.to_string()));
				} else {
					let delay = self.delay_for(item.timeout);
					longest = Some(longest.map_or(delay, |current| current.max(delay)));
				}
			}
		}

		if !exhausted.is_empty() {
			warn!(dropped = exhausted.len(), max_retries, "Events exceeded retry count");
		}
		self.fulfill(exhausted).await;
		if let Some(timeout) = longest {
			self.schedule(timeout).await;
		}
	}

	/// Removes items and delivers their outcomes, then rewrites storage.
	async fn fulfill(&self, outcomes: Vec<(u64, u16, String)>) {
		if outcomes.is_empty() {
			return;
		}
		{
			let mut state = self.inner.state.lock().await;
			for (id, code, message) in outcomes {
				let Some(position) = state.items.iter().position(|item| item.id == id) else {
					continue;
				};
				let item = state.items.remove(position);
				debug!(
					event_type = %item.event.event_type,
					code,
					attempts = item.attempts,
					"Event fulfilled"
				);
				let _ = item.callback.send(DeliveryResult::new(item.event, code, message));
			}
		}
		self.persist().await;
	}

	/// Mirrors the outstanding events to storage.
	///
	/// The write runs on its own task so a cancelled caller cannot leave the
	/// mirror behind the queue. Writes are serialized and each one snapshots
	/// the queue after acquiring the write lock. Once the queue is closed the
	/// mirror is left as shutdown wrote it.
	async fn persist(&self) {
		if self.inner.storage.is_none() {
			return;
		}
		let queue = self.clone();
		let write = tokio::spawn(async move { queue.write_mirror().await });
		if let Err(e) = write.await {
			error!(key = %self.inner.storage_key, error = %e, "Storage write task failed");
		}
	}

	async fn write_mirror(&self) {
		let Some(ref storage) = self.inner.storage else {
			return;
		};
		let _write = self.inner.persist_lock.lock().await;
		let snapshot: Vec<Event> = {
			let state = self.inner.state.lock().await;
			if state.closed {
				return;
			}
			state.items.iter().map(|item| item.event.clone()).collect()
		};
		if let Err(e) = save_events(storage.as_ref(), &self.inner.storage_key, &snapshot).await {
			error!(key = %self.inner.storage_key, error = %e, "Failed to persist unsent events");
		}
	}
}

/// Runs an expired timer. Stale generations are ignored so a replaced timer
/// that already woke up cannot flush early.
fn fire(weak: Weak<Inner>, generation: u64) -> BoxFuture<'static, ()> {
	Box::pin(async move {
		let Some(inner) = weak.upgrade() else {
			return;
		};
		let queue = DeliveryQueue { inner };
		{
			let mut state = queue.inner.state.lock().await;
			match state.timer {
				Some(ref timer) if timer.generation == generation => {}
				_ => return,
			}
			state.timer = None;
			for item in state.items.iter_mut() {
				item.timeout = Duration::ZERO;
			}
		}
		queue.flush(true).await;
	})
}

fn uniform(batch: &[BatchEntry], code: u16, message: &str) -> Vec<(u64, u16, String)> {
	batch
		.iter()
		.map(|entry| (entry.id, code, message.to_string()))
		.collect()
}

fn partition_indices(
	batch: Vec<BatchEntry>,
	indices: &HashSet<usize>,
) -> (Vec<BatchEntry>, Vec<BatchEntry>) {
	let mut selected = Vec::new();
	let mut rest = Vec::new();
	for (index, entry) in batch.into_iter().enumerate() {
		if indices.contains(&index) {
			selected.push(entry);
		} else {
			rest.push(entry);
		}
	}
	(selected, rest)
}
