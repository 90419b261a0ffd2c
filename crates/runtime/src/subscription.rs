//! Caller-facing handle for an active subscription.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use jrpc_protocol::Notification;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::codec::RpcCoder;
use crate::connection::Connection;
use crate::connection::subscriptions::ActiveSubscription;
use crate::error::Result;

/// One decoded notification of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
	/// Notification method, e.g. `chain_finalizedHead`.
	pub method: String,
	pub value: T,
}

/// Handle to an active subscription.
///
/// Events are decoded into `T` and passed to the handler installed with
/// [`Subscription::set_handler`]. Events that arrive before the first handler
/// is attached are held (bounded) and delivered to it first; after that,
/// events arriving while no handler is attached are dropped.
///
/// Dropping the handle stops delivery and unsubscribes in the background.
pub struct Subscription<T> {
	entry: Arc<ActiveSubscription>,
	connection: Weak<Connection>,
	coder: Arc<RpcCoder>,
	handler: Mutex<Option<JoinHandle<()>>>,
	_event: PhantomData<fn() -> T>,
}

impl<T> Subscription<T>
where
	T: DeserializeOwned + Send + 'static,
{
	pub(crate) fn new(entry: Arc<ActiveSubscription>, connection: &Arc<Connection>) -> Self {
		Self {
			entry,
			coder: Arc::clone(&connection.coder),
			connection: Arc::downgrade(connection),
			handler: Mutex::new(None),
			_event: PhantomData,
		}
	}

	/// Server-assigned subscription id.
	pub fn id(&self) -> &str {
		self.entry.id()
	}

	/// Method the subscription was opened with.
	pub fn method(&self) -> &str {
		self.entry.method()
	}

	/// True once the subscription was closed or its connection was lost.
	pub fn is_closed(&self) -> bool {
		self.entry.is_torn_down()
	}

	/// Installs `handler`, replacing any previous one.
	pub fn set_handler<F>(&self, handler: F)
	where
		F: Fn(Event<T>) + Send + Sync + 'static,
	{
		let mut slot = self.handler.lock();
		if let Some(previous) = slot.take() {
			previous.abort();
		}

		let Some((early, mut events)) = self.entry.attach() else {
			tracing::debug!(subscription = self.id(), "Subscription closed; handler not attached");
			return;
		};

		let coder = Arc::clone(&self.coder);
		let subscription: Arc<str> = Arc::from(self.id());
		let result_type = self.entry.result_type();
		*slot = Some(tokio::spawn(async move {
			for notification in early {
				dispatch(&coder, &handler, &subscription, notification);
			}
			loop {
				match events.recv().await {
					Ok(notification) => dispatch(&coder, &handler, &subscription, notification),
					Err(RecvError::Lagged(skipped)) => {
						tracing::warn!(%subscription, skipped, result_type, "Handler lagging; events dropped");
					}
					Err(RecvError::Closed) => break,
				}
			}
			tracing::debug!(%subscription, "Subscription event stream ended");
		}));
	}

	/// Detaches the current handler; later events are dropped.
	pub fn remove_handler(&self) {
		if let Some(previous) = self.handler.lock().take() {
			previous.abort();
		}
	}

	/// Stops delivery and sends the unsubscribe call.
	///
	/// The local entry is removed even if the call fails.
	pub async fn close(&self) -> Result<()> {
		self.remove_handler();
		match self.connection.upgrade() {
			Some(connection) => connection.unsubscribe(self.entry.id()).await,
			None => {
				self.entry.teardown();
				Ok(())
			}
		}
	}
}

fn dispatch<T, F>(coder: &RpcCoder, handler: &F, subscription: &str, notification: Notification)
where
	T: DeserializeOwned,
	F: Fn(Event<T>),
{
	match coder.decode_result::<T>(notification.params.result) {
		Ok(value) => handler(Event {
			method: notification.method,
			value,
		}),
		Err(e) => {
			tracing::warn!(subscription, "Dropping event: {}", e);
		}
	}
}

impl<T> Drop for Subscription<T> {
	fn drop(&mut self) {
		if let Some(task) = self.handler.get_mut().take() {
			task.abort();
		}

		let Some(connection) = self.connection.upgrade() else {
			return;
		};
		if connection.subscriptions.get(self.entry.id()).is_none() || connection.is_shut_down() {
			return;
		}

		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				let id = self.entry.id().to_string();
				handle.spawn(async move {
					if let Err(e) = connection.unsubscribe(&id).await {
						tracing::debug!(subscription = %id, "Unsubscribe on drop failed: {}", e);
					}
				});
			}
			Err(_) => {
				connection.subscriptions.remove(self.entry.id());
			}
		}
	}
}
