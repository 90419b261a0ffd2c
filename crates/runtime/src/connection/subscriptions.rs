//! Subscription registry: active streams by server id, plus the set of
//! subscriptions whose subscribe call has not been answered yet.
//!
//! A server may push the first notification of a new subscription before the
//! reply that tells us its id. Such notifications are parked per id and a
//! resolver task waits (bounded) for the id to become active, then releases
//! them in arrival order. Notifications for ids nobody is waiting on are
//! dropped with a warning.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use jrpc_protocol::Notification;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Events kept for a subscription until its first handler attaches.
const EARLY_EVENT_CAPACITY: usize = 16;

/// Capacity of the live event channel per subscription.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An active subscription as seen by the router.
pub(crate) struct ActiveSubscription {
	id: Arc<str>,
	method: String,
	unsubscribe_method: String,
	result_type: &'static str,
	sink: Mutex<EventSink>,
}

struct EventSink {
	/// `Some` until the first handler attaches.
	early: Option<VecDeque<Notification>>,
	/// `None` once the subscription is torn down.
	live: Option<broadcast::Sender<Notification>>,
}

impl ActiveSubscription {
	fn new(id: Arc<str>, method: &str, unsubscribe_method: &str, result_type: &'static str) -> Self {
		let (live, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		Self {
			id,
			method: method.to_string(),
			unsubscribe_method: unsubscribe_method.to_string(),
			result_type,
			sink: Mutex::new(EventSink {
				early: Some(VecDeque::new()),
				live: Some(live),
			}),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn method(&self) -> &str {
		&self.method
	}

	pub fn unsubscribe_method(&self) -> &str {
		&self.unsubscribe_method
	}

	pub fn result_type(&self) -> &'static str {
		self.result_type
	}

	pub(crate) fn deliver(&self, event: Notification) {
		let mut sink = self.sink.lock();
		if let Some(early) = sink.early.as_mut() {
			if early.len() == EARLY_EVENT_CAPACITY {
				early.pop_front();
				tracing::warn!(
					subscription = %self.id,
					"No handler attached; dropping oldest buffered event"
				);
			}
			early.push_back(event);
			return;
		}
		if let Some(live) = &sink.live {
			// no receivers: handler was removed, event is not retained
			let _ = live.send(event);
		}
	}

	/// Hands out the events held since activation plus a live receiver.
	///
	/// Returns `None` once the subscription has been torn down.
	pub(crate) fn attach(&self) -> Option<(Vec<Notification>, broadcast::Receiver<Notification>)> {
		let mut sink = self.sink.lock();
		let receiver = sink.live.as_ref()?.subscribe();
		let early = sink.early.take().map(Vec::from).unwrap_or_default();
		Some((early, receiver))
	}

	/// Ends the event stream; attached handlers observe the channel closing.
	pub(crate) fn teardown(&self) {
		let mut sink = self.sink.lock();
		sink.early = None;
		sink.live = None;
	}

	pub fn is_torn_down(&self) -> bool {
		self.sink.lock().live.is_none()
	}
}

/// Tracks active and starting subscriptions and routes notifications to them.
pub(crate) struct SubscriptionRegistry {
	active: DashMap<Arc<str>, Arc<ActiveSubscription>>,
	/// Call ids of subscribe calls still waiting for their reply.
	starting: DashMap<u32, &'static str>,
	/// Notifications waiting for their subscription to become active.
	/// Also serialises activation against [`SubscriptionRegistry::clear`].
	parked: Mutex<HashMap<Arc<str>, VecDeque<Notification>>>,
	changed: Notify,
	/// Bumped on every clear; activations started in an older epoch are refused.
	epoch: AtomicU64,
	resolve_timeout: Duration,
}

impl SubscriptionRegistry {
	pub fn new(resolve_timeout: Duration) -> Self {
		Self {
			active: DashMap::new(),
			starting: DashMap::new(),
			parked: Mutex::new(HashMap::new()),
			changed: Notify::new(),
			epoch: AtomicU64::new(0),
			resolve_timeout,
		}
	}

	/// Marks a subscribe call as in flight. Dropping the guard unmarks it.
	pub fn start(self: &Arc<Self>, call_id: u32, result_type: &'static str) -> StartingSubscription {
		self.starting.insert(call_id, result_type);
		StartingSubscription {
			registry: Arc::clone(self),
			call_id,
			epoch: self.epoch.load(Ordering::SeqCst),
		}
	}

	/// Makes `id` active. The entry is visible to the router before the
	/// starting mark is removed, so a resolver never sees neither.
	pub fn activate(
		&self,
		starting: StartingSubscription,
		id: String,
		method: &str,
		unsubscribe_method: &str,
	) -> Result<Arc<ActiveSubscription>> {
		let id: Arc<str> = Arc::from(id);
		let entry = {
			let _parked = self.parked.lock();
			if starting.epoch != self.epoch.load(Ordering::SeqCst) {
				return Err(Error::ConnectionFailed(
					"connection lost before the subscription became active".to_string(),
				));
			}
			let entry = Arc::new(ActiveSubscription::new(
				Arc::clone(&id),
				method,
				unsubscribe_method,
				self.starting
					.get(&starting.call_id)
					.map(|r| *r.value())
					.unwrap_or("unknown"),
			));
			if let Some(replaced) = self.active.insert(Arc::clone(&id), Arc::clone(&entry)) {
				tracing::warn!(subscription = %id, "Server reused an active subscription id");
				replaced.teardown();
			}
			entry
		};
		drop(starting);
		tracing::debug!(subscription = %id, method, "Subscription active");
		Ok(entry)
	}

	/// Removes and tears down one subscription. Returns it if it was active.
	pub fn remove(&self, id: &str) -> Option<Arc<ActiveSubscription>> {
		let (_, entry) = self.active.remove(id)?;
		entry.teardown();
		Some(entry)
	}

	/// Tears down every active subscription and drops parked notifications.
	pub fn clear(&self) -> usize {
		let removed = {
			let mut parked = self.parked.lock();
			self.epoch.fetch_add(1, Ordering::SeqCst);
			parked.clear();

			let ids: Vec<Arc<str>> = self.active.iter().map(|e| Arc::clone(e.key())).collect();
			let mut removed = 0;
			for id in ids {
				if let Some((_, entry)) = self.active.remove(&id) {
					entry.teardown();
					removed += 1;
				}
			}
			removed
		};
		self.changed.notify_waiters();
		removed
	}

	/// Delivers a notification to its subscription, parking it if the
	/// subscription may still be starting.
	pub fn route(self: &Arc<Self>, notification: Notification) {
		let id: Arc<str> = Arc::from(notification.subscription());

		let mut parked = self.parked.lock();
		if let Some(queue) = parked.get_mut(&id) {
			queue.push_back(notification);
			return;
		}

		let active = self.active.get(&id).map(|e| Arc::clone(e.value()));
		if let Some(entry) = active {
			entry.deliver(notification);
			return;
		}

		if self.starting.is_empty() {
			drop(parked);
			tracing::warn!(
				subscription = %id,
				method = %notification.method,
				"{}",
				Error::UnknownSubscription(id.to_string())
			);
			return;
		}

		parked.insert(Arc::clone(&id), VecDeque::from([notification]));
		drop(parked);

		let registry = Arc::clone(self);
		tokio::spawn(async move { registry.release_parked(id).await });
	}

	async fn release_parked(self: Arc<Self>, id: Arc<str>) {
		let resolved = self.resolve(&id).await;

		let mut parked = self.parked.lock();
		let Some(queue) = parked.remove(&id) else {
			return;
		};
		match resolved {
			Ok(entry) => {
				for notification in queue {
					entry.deliver(notification);
				}
			}
			Err(e) => {
				tracing::warn!(subscription = %id, dropped = queue.len(), "{}", e);
			}
		}
	}

	/// Waits for `id` to become active while subscribe calls are in flight.
	///
	/// Fails with [`Error::UnknownSubscription`] as soon as nothing is starting,
	/// or after the resolve timeout.
	pub async fn resolve(&self, id: &str) -> Result<Arc<ActiveSubscription>> {
		let deadline = Instant::now() + self.resolve_timeout;
		loop {
			// register before checking so an activation in between is not missed
			let notified = self.changed.notified();

			if let Some(entry) = self.active.get(id) {
				return Ok(Arc::clone(entry.value()));
			}
			if self.starting.is_empty() {
				return Err(Error::UnknownSubscription(id.to_string()));
			}

			tokio::select! {
				_ = notified => {}
				_ = tokio::time::sleep_until(deadline) => {
					return Err(Error::UnknownSubscription(format!(
						"{id} (not resolved within {:?})",
						self.resolve_timeout
					)));
				}
			}
		}
	}

	pub fn get(&self, id: &str) -> Option<Arc<ActiveSubscription>> {
		self.active.get(id).map(|e| Arc::clone(e.value()))
	}

	pub fn active_count(&self) -> usize {
		self.active.len()
	}

	pub fn starting_count(&self) -> usize {
		self.starting.len()
	}
}

/// Marks one subscribe call as in flight for as long as it lives.
pub(crate) struct StartingSubscription {
	registry: Arc<SubscriptionRegistry>,
	call_id: u32,
	epoch: u64,
}

impl Drop for StartingSubscription {
	fn drop(&mut self) {
		self.registry.starting.remove(&self.call_id);
		self.registry.changed.notify_waiters();
	}
}
