//! Client façade over a call adapter and a subscription adapter.

use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jrpc_runtime::{CloseHook, DuplexAdapter, Error, HttpAdapter, Result, Subscription, run_close_hook};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::call::{RpcCall, SubscribeCall};

/// Adapter used for plain calls.
#[derive(Clone)]
pub enum CallAdapter {
	Http(Arc<HttpAdapter>),
	Duplex(Arc<DuplexAdapter>),
}

impl CallAdapter {
	async fn call<T: DeserializeOwned>(&self, call: RpcCall<T>) -> Result<T> {
		let (method, params) = call.into_parts();
		match self {
			CallAdapter::Http(adapter) => adapter.call(&method, params).await,
			CallAdapter::Duplex(adapter) => adapter.call(&method, params).await,
		}
	}

	fn close(&self) {
		match self {
			CallAdapter::Http(adapter) => adapter.close(),
			CallAdapter::Duplex(adapter) => adapter.close(),
		}
	}

	fn shares(&self, duplex: &Arc<DuplexAdapter>) -> bool {
		matches!(self, CallAdapter::Duplex(adapter) if Arc::ptr_eq(adapter, duplex))
	}
}

impl From<HttpAdapter> for CallAdapter {
	fn from(adapter: HttpAdapter) -> Self {
		CallAdapter::Http(Arc::new(adapter))
	}
}

impl From<Arc<HttpAdapter>> for CallAdapter {
	fn from(adapter: Arc<HttpAdapter>) -> Self {
		CallAdapter::Http(adapter)
	}
}

impl From<DuplexAdapter> for CallAdapter {
	fn from(adapter: DuplexAdapter) -> Self {
		CallAdapter::Duplex(Arc::new(adapter))
	}
}

impl From<Arc<DuplexAdapter>> for CallAdapter {
	fn from(adapter: Arc<DuplexAdapter>) -> Self {
		CallAdapter::Duplex(adapter)
	}
}

/// Entry point for issuing typed calls and subscriptions.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder()
///     .duplex(DuplexAdapter::builder().target("ws://127.0.0.1:9944").build())
///     .build();
/// let head: String = client.execute(RpcCall::new("chain_getFinalisedHead")).await?;
/// client.close();
/// ```
pub struct Client {
	call_adapter: Option<CallAdapter>,
	subscription_adapter: Option<Arc<DuplexAdapter>>,
	on_close: Mutex<Option<CloseHook>>,
	closed: AtomicBool,
}

impl Client {
	pub fn builder() -> ClientBuilder {
		ClientBuilder::default()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Executes `call` on the call adapter.
	pub async fn execute<T: DeserializeOwned>(&self, call: RpcCall<T>) -> Result<T> {
		if self.is_closed() {
			return Err(Error::Closed);
		}
		let Some(adapter) = &self.call_adapter else {
			return Err(Error::InvalidArgument("call adapter not set".to_string()));
		};
		adapter.call(call).await
	}

	/// Opens a subscription on the subscription adapter.
	pub async fn subscribe<T>(&self, call: SubscribeCall<T>) -> Result<Subscription<T>>
	where
		T: DeserializeOwned + Send + 'static,
	{
		if self.is_closed() {
			return Err(Error::Closed);
		}
		let Some(adapter) = &self.subscription_adapter else {
			return Err(Error::InvalidArgument("subscription adapter not set".to_string()));
		};
		let (method, params, unsubscribe) = call.into_parts();
		adapter.subscribe(&method, params, &unsubscribe).await
	}

	/// Closes each adapter once, then runs the close hook. Idempotent.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!("Closing client");
		if let Some(adapter) = &self.call_adapter {
			adapter.close();
		}
		if let Some(duplex) = &self.subscription_adapter {
			let shared = self
				.call_adapter
				.as_ref()
				.is_some_and(|adapter| adapter.shares(duplex));
			if !shared {
				duplex.close();
			}
		}

		let hook = self.on_close.lock().take();
		if let Some(hook) = hook {
			run_close_hook(hook);
		}
	}
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
	call_adapter: Option<CallAdapter>,
	subscription_adapter: Option<Arc<DuplexAdapter>>,
	on_close: Option<CloseHook>,
}

impl ClientBuilder {
	pub fn call_adapter(mut self, adapter: impl Into<CallAdapter>) -> Self {
		self.call_adapter = Some(adapter.into());
		self
	}

	pub fn subscription_adapter(mut self, adapter: impl Into<Arc<DuplexAdapter>>) -> Self {
		self.subscription_adapter = Some(adapter.into());
		self
	}

	/// Uses one duplex adapter for both calls and subscriptions.
	pub fn duplex(self, adapter: impl Into<Arc<DuplexAdapter>>) -> Self {
		let adapter = adapter.into();
		self.call_adapter(Arc::clone(&adapter))
			.subscription_adapter(adapter)
	}

	pub fn on_close<F>(mut self, hook: F) -> Self
	where
		F: FnOnce() -> std::result::Result<(), Box<dyn StdError + Send + Sync>> + Send + 'static,
	{
		self.on_close = Some(Box::new(hook));
		self
	}

	pub fn build(self) -> Client {
		Client {
			call_adapter: self.call_adapter,
			subscription_adapter: self.subscription_adapter,
			on_close: Mutex::new(self.on_close),
			closed: AtomicBool::new(false),
		}
	}
}
