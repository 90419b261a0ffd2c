//! Shared duplex connection: lifecycle, call correlation and event dispatch.
//!
//! One [`Connection`] owns at most one open channel at a time. The channel is
//! opened lazily by the first caller that needs it; concurrent callers wait
//! for that same attempt instead of starting their own. The current state is
//! published through a [`tokio::sync::watch`] channel and only changes through
//! [`transition`].
//!
//! Whenever the connection leaves `Connecting`/`Connected` every pending call
//! is failed and every subscription is torn down, exactly once.

pub mod state;

pub(crate) mod calls;
pub(crate) mod router;
pub(crate) mod subscriptions;

use std::any::type_name;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::watch;

use self::calls::CallRegistry;
use self::router::FrameRouter;
pub use self::state::{ConnectionState, LifecycleEvent, transition};
use self::state::Snapshot;
use self::subscriptions::{ActiveSubscription, SubscriptionRegistry};
use crate::codec::RpcCoder;
use crate::error::{Error, Result};
use crate::transport::{Connector, DuplexSender, NORMAL_CLOSURE, Target, TransportEvent};

pub(crate) struct Connection {
	connector: Arc<dyn Connector>,
	target: Target,
	pub(crate) coder: Arc<RpcCoder>,
	lifecycle: watch::Sender<Snapshot>,
	pub(crate) calls: Arc<CallRegistry>,
	pub(crate) subscriptions: Arc<SubscriptionRegistry>,
	router: FrameRouter,
	shut_down: AtomicBool,
}

impl Connection {
	pub fn new(
		connector: Arc<dyn Connector>,
		target: Target,
		coder: Arc<RpcCoder>,
		resolve_timeout: Duration,
	) -> Arc<Self> {
		let calls = Arc::new(CallRegistry::default());
		let subscriptions = Arc::new(SubscriptionRegistry::new(resolve_timeout));
		let router = FrameRouter::new(
			Arc::clone(&coder),
			Arc::clone(&calls),
			Arc::clone(&subscriptions),
		);
		let (lifecycle, _) = watch::channel(Snapshot::default());

		Arc::new(Self {
			connector,
			target,
			coder,
			lifecycle,
			calls,
			subscriptions,
			router,
			shut_down: AtomicBool::new(false),
		})
	}

	pub fn state(&self) -> ConnectionState {
		self.lifecycle.borrow().state.clone()
	}

	pub fn is_shut_down(&self) -> bool {
		self.shut_down.load(Ordering::SeqCst)
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_shut_down() {
			return Err(Error::Closed);
		}
		Ok(())
	}

	/// Issues one call and decodes its result into `T`.
	pub async fn call<T: DeserializeOwned>(self: &Arc<Self>, method: &str, params: Value) -> Result<T> {
		let value = self.call_raw(method, params, type_name::<T>()).await?;
		self.coder.decode_result(value)
	}

	async fn call_raw(
		self: &Arc<Self>,
		method: &str,
		params: Value,
		result_type: &'static str,
	) -> Result<Value> {
		self.ensure_open()?;
		let id = self.coder.next_id();
		let reply = self.calls.register(id, method, result_type)?;
		self.send(id, method, params).await?;
		tracing::debug!(id, method, "Awaiting reply");
		reply.await
	}

	/// Issues a subscribe call and activates the returned subscription id.
	pub async fn subscribe(
		self: &Arc<Self>,
		method: &str,
		params: Value,
		unsubscribe_method: &str,
		result_type: &'static str,
	) -> Result<Arc<ActiveSubscription>> {
		self.ensure_open()?;
		let id = self.coder.next_id();
		let starting = self.subscriptions.start(id, result_type);
		let reply = self.calls.register(id, method, "subscription id")?;
		self.send(id, method, params).await?;

		let subscription_id = subscription_id(reply.await?)?;
		self.subscriptions
			.activate(starting, subscription_id, method, unsubscribe_method)
	}

	/// Stops local delivery and asks the server to cancel the subscription.
	///
	/// Nothing is sent if the subscription was already torn down by a
	/// connection loss, since the server no longer knows it.
	pub async fn unsubscribe(self: &Arc<Self>, id: &str) -> Result<()> {
		let Some(entry) = self.subscriptions.remove(id) else {
			return Ok(());
		};
		let accepted: Value = self
			.call(entry.unsubscribe_method(), json!([entry.id()]))
			.await?;
		if accepted == Value::Bool(false) {
			tracing::warn!(subscription = id, "Server refused to unsubscribe");
		}
		Ok(())
	}

	async fn send(self: &Arc<Self>, id: u32, method: &str, params: Value) -> Result<()> {
		let payload = self.coder.encode(id, method, params)?;
		let (handle, generation) = self.acquire().await?;
		if !self.calls.contains(id) {
			// failed by a drain while waiting for the channel; its caller already has the error
			tracing::debug!(id, method, "Call no longer pending; not sent");
			return Ok(());
		}
		tracing::debug!(id, method, "Sending request");
		if let Err(e) = handle.send(payload) {
			let cause = format!("send failed: {e}");
			self.fail(generation, cause.clone());
			return Err(Error::ConnectionFailed(cause));
		}
		Ok(())
	}

	/// Returns the live channel, opening it if nobody else is.
	async fn acquire(self: &Arc<Self>) -> Result<(Arc<dyn DuplexSender>, u64)> {
		let mut rx = self.lifecycle.subscribe();

		// failed and closing connections are drained before they settle; wait for that
		let _ = rx
			.wait_for(|s| !matches!(s.state, ConnectionState::Failed(_) | ConnectionState::Closing))
			.await;

		let mut started = None;
		self.lifecycle.send_if_modified(|snapshot| {
			if self.shut_down.load(Ordering::SeqCst) {
				return false;
			}
			match transition(&snapshot.state, LifecycleEvent::Demand) {
				Some(next) => {
					tracing::debug!(from = snapshot.state.name(), to = next.name(), "Connection state");
					snapshot.state = next;
					snapshot.generation += 1;
					started = Some(snapshot.generation);
					true
				}
				None => false,
			}
		});
		if let Some(generation) = started {
			tokio::spawn(Arc::clone(self).run(generation));
		}

		let snapshot = rx
			.wait_for(|s| !matches!(s.state, ConnectionState::Connecting))
			.await
			.map_err(|_| Error::ChannelClosed)?;
		match &snapshot.state {
			ConnectionState::Connected(handle) => Ok((Arc::clone(handle), snapshot.generation)),
			ConnectionState::Failed(cause) => Err(Error::ConnectionFailed(cause.to_string())),
			_ if self.is_shut_down() => Err(Error::Closed),
			other => Err(Error::ConnectionFailed(match &snapshot.last_failure {
				Some(cause) => cause.to_string(),
				None => format!("connection {} before it was established", other.name()),
			})),
		}
	}

	/// Opens the channel for attempt `generation` and pumps its events.
	async fn run(self: Arc<Self>, generation: u64) {
		let (handle, mut events) = match self.connector.open(&self.target).await {
			Ok(parts) => parts,
			Err(Error::ConnectionFailed(cause)) => {
				self.fail(generation, cause);
				return;
			}
			Err(e) => {
				self.fail(generation, e.to_string());
				return;
			}
		};

		if !self.apply(generation, LifecycleEvent::Opened(Arc::clone(&handle))) {
			// shut down while the handshake was in progress
			let _ = handle.close(NORMAL_CLOSURE, "close");
			return;
		}
		tracing::debug!(url = %self.target.url, "Connected");

		while let Some(event) = events.recv().await {
			match event {
				TransportEvent::Frame(text) => self.router.route(&text),
				TransportEvent::Closed { code, reason } => {
					tracing::debug!(code, %reason, "Connection closed by peer");
					// held in Closing until drained so no new attempt starts underneath
					if self.apply(generation, LifecycleEvent::CloseRequested) {
						self.drain(&format!("connection closed ({code} {reason})"));
						self.apply(generation, LifecycleEvent::Closed);
					}
					return;
				}
				TransportEvent::Failed(cause) => {
					self.fail(generation, cause);
					return;
				}
			}
		}
		self.fail(generation, "transport event stream ended".to_string());
	}

	/// Applies an event raised by attempt `generation`; stale events are ignored.
	fn apply(&self, generation: u64, event: LifecycleEvent) -> bool {
		self.lifecycle.send_if_modified(|snapshot| {
			if snapshot.generation != generation {
				return false;
			}
			let failure = match &event {
				LifecycleEvent::Failed(cause) => Some(Arc::clone(cause)),
				_ => None,
			};
			match transition(&snapshot.state, event) {
				Some(next) => {
					tracing::debug!(from = snapshot.state.name(), to = next.name(), "Connection state");
					snapshot.state = next;
					if failure.is_some() {
						snapshot.last_failure = failure;
					}
					true
				}
				None => false,
			}
		})
	}

	fn fail(&self, generation: u64, cause: String) {
		let cause: Arc<str> = Arc::from(cause);
		if self.apply(generation, LifecycleEvent::Failed(Arc::clone(&cause))) {
			tracing::error!(url = %self.target.url, "Connection failed: {}", cause);
			self.drain(&cause);
			self.apply(generation, LifecycleEvent::Drained);
		}
	}

	/// Fails every pending call and tears down every subscription.
	fn drain(&self, cause: &str) {
		let calls = self.calls.fail_all(cause);
		let subscriptions = self.subscriptions.clear();
		if calls > 0 || subscriptions > 0 {
			tracing::warn!(calls, subscriptions, "Dropped outstanding work: {}", cause);
		}
	}

	/// Closes the channel for good. Later calls fail with [`Error::Closed`].
	pub fn shutdown(&self) {
		self.shut_down.store(true, Ordering::SeqCst);

		let mut handle = None;
		let mut was_live = false;
		self.lifecycle.send_if_modified(|snapshot| {
			if let ConnectionState::Connected(h) = &snapshot.state {
				handle = Some(Arc::clone(h));
			}
			match transition(&snapshot.state, LifecycleEvent::CloseRequested) {
				Some(next) => {
					tracing::debug!(from = snapshot.state.name(), to = next.name(), "Connection state");
					was_live = true;
					snapshot.state = next;
					true
				}
				None => false,
			}
		});

		if let Some(handle) = handle {
			if let Err(e) = handle.close(NORMAL_CLOSURE, "close") {
				tracing::warn!("Failed to send close frame: {}", e);
			}
		}
		if was_live {
			self.drain("client closed");
		}

		self.lifecycle.send_if_modified(|snapshot| {
			match transition(&snapshot.state, LifecycleEvent::Closed) {
				Some(next) => {
					snapshot.state = next;
					true
				}
				None => false,
			}
		});
	}
}

/// Servers report subscription ids as strings or plain numbers.
fn subscription_id(value: Value) -> Result<String> {
	match value {
		Value::String(id) => Ok(id),
		Value::Number(id) => Ok(id.to_string()),
		other => Err(Error::MalformedPayload(format!(
			"expected subscription id, got {other}"
		))),
	}
}

#[cfg(test)]
mod tests;
