//! Duplex adapter: calls and subscriptions over one shared connection.

use std::any::type_name;
use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::RpcCoder;
use crate::connection::{Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::subscription::Subscription;
use crate::transport::{Connector, Target, WebSocketConnector};

/// Default duplex endpoint.
pub const DEFAULT_WS_TARGET: &str = "ws://127.0.0.1:9944";

/// Default `User-Agent` sent by both adapters.
pub const USER_AGENT: &str = concat!("jrpc/", env!("CARGO_PKG_VERSION"));

/// How long a notification for a not-yet-known subscription id is held.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback run once when an adapter is closed.
pub type CloseHook = Box<dyn FnOnce() -> std::result::Result<(), Box<dyn StdError + Send + Sync>> + Send>;

/// Runs a close hook, logging (never propagating) its error or panic.
pub fn run_close_hook(hook: CloseHook) {
	match catch_unwind(AssertUnwindSafe(hook)) {
		Ok(Ok(())) => {}
		Ok(Err(e)) => tracing::warn!("Error during on_close hook: {}", e),
		Err(_) => tracing::warn!("on_close hook panicked"),
	}
}

pub(crate) fn default_headers(target: &mut Target) {
	target.set_header("User-Agent", USER_AGENT);
	target.set_header("Content-Type", jrpc_protocol::APPLICATION_JSON);
}

/// Issues calls and subscriptions over a single lazily opened duplex channel.
///
/// Dropping the adapter shuts the connection down without running the close
/// hook; call [`DuplexAdapter::close`] for an orderly shutdown.
pub struct DuplexAdapter {
	pub(crate) connection: Arc<Connection>,
	request_timeout: Option<Duration>,
	on_close: Mutex<Option<CloseHook>>,
	closed: AtomicBool,
}

impl DuplexAdapter {
	pub fn builder() -> DuplexAdapterBuilder {
		DuplexAdapterBuilder::default()
	}

	/// Codec shared by every call made through this adapter.
	pub fn coder(&self) -> &Arc<RpcCoder> {
		&self.connection.coder
	}

	pub fn state(&self) -> ConnectionState {
		self.connection.state()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends `method(params)` and decodes the result into `T`.
	///
	/// Opens the connection if needed. Dropping the returned future abandons
	/// the call; a late reply is then ignored.
	pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
		let call = self.connection.call::<T>(method, params);
		match self.request_timeout {
			Some(limit) => tokio::time::timeout(limit, call)
				.await
				.map_err(|_| Error::Timeout(format!("{method} did not complete within {limit:?}")))?,
			None => call.await,
		}
	}

	/// Opens a subscription with `method(params)`; `unsubscribe_method` cancels it.
	pub async fn subscribe<T>(
		&self,
		method: &str,
		params: Value,
		unsubscribe_method: &str,
	) -> Result<Subscription<T>>
	where
		T: DeserializeOwned + Send + 'static,
	{
		let subscribe = self
			.connection
			.subscribe(method, params, unsubscribe_method, type_name::<T>());
		let entry = match self.request_timeout {
			Some(limit) => tokio::time::timeout(limit, subscribe)
				.await
				.map_err(|_| Error::Timeout(format!("{method} did not complete within {limit:?}")))?,
			None => subscribe.await,
		}?;
		Ok(Subscription::new(entry, &self.connection))
	}

	/// Closes the connection and runs the close hook. Idempotent.
	///
	/// Outstanding calls fail and subscriptions end. Errors raised by the hook
	/// are logged and swallowed.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!("Closing duplex adapter");
		self.connection.shutdown();

		let hook = self.on_close.lock().take();
		if let Some(hook) = hook {
			run_close_hook(hook);
		}
	}
}

impl Drop for DuplexAdapter {
	fn drop(&mut self) {
		if !self.is_closed() {
			self.connection.shutdown();
		}
	}
}

/// Builder for [`DuplexAdapter`].
pub struct DuplexAdapterBuilder {
	target: Target,
	coder: Option<Arc<RpcCoder>>,
	connector: Arc<dyn Connector>,
	request_timeout: Option<Duration>,
	resolve_timeout: Duration,
	on_close: Option<CloseHook>,
}

impl Default for DuplexAdapterBuilder {
	fn default() -> Self {
		let mut target = Target::new(DEFAULT_WS_TARGET);
		default_headers(&mut target);
		Self {
			target,
			coder: None,
			connector: Arc::new(WebSocketConnector),
			request_timeout: None,
			resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
			on_close: None,
		}
	}
}

impl DuplexAdapterBuilder {
	pub fn target(mut self, url: impl Into<String>) -> Self {
		self.target.url = url.into();
		self
	}

	/// Sends `Authorization: Basic ...` with the opening request.
	pub fn basic_auth(mut self, username: &str, password: &str) -> Self {
		self.target
			.set_header("Authorization", jrpc_protocol::basic_auth(username, password));
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.target.set_header(name, value);
		self
	}

	/// Shares a codec (and thus the call id counter) with other adapters.
	pub fn coder(mut self, coder: Arc<RpcCoder>) -> Self {
		self.coder = Some(coder);
		self
	}

	/// Replaces the WebSocket connector, e.g. with a test double.
	pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
		self.connector = connector;
		self
	}

	/// Fails calls that take longer than `timeout` with [`Error::Timeout`].
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = Some(timeout);
		self
	}

	/// How long a notification waits for its subscription id to become known.
	pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
		self.resolve_timeout = timeout;
		self
	}

	pub fn on_close<F>(mut self, hook: F) -> Self
	where
		F: FnOnce() -> std::result::Result<(), Box<dyn StdError + Send + Sync>> + Send + 'static,
	{
		self.on_close = Some(Box::new(hook));
		self
	}

	pub fn build(self) -> DuplexAdapter {
		let coder = self.coder.unwrap_or_default();
		DuplexAdapter {
			connection: Connection::new(self.connector, self.target, coder, self.resolve_timeout),
			request_timeout: self.request_timeout,
			on_close: Mutex::new(self.on_close),
			closed: AtomicBool::new(false),
		}
	}
}
