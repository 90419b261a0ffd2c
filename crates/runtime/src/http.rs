//! Unary adapter: one HTTP POST per call.

use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::adapter::{CloseHook, default_headers, run_close_hook};
use crate::codec::RpcCoder;
use crate::error::{Error, Result, SERVER_ERROR};
use crate::transport::Target;

/// Default unary endpoint.
pub const DEFAULT_HTTP_TARGET: &str = "http://127.0.0.1:9933";

/// Default per-request timeout of the HTTP client.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends each call as its own HTTP request. Subscriptions are not supported.
pub struct HttpAdapter {
	client: reqwest::Client,
	target: Target,
	coder: Arc<RpcCoder>,
	on_close: Mutex<Option<CloseHook>>,
	closed: AtomicBool,
}

impl HttpAdapter {
	pub fn builder() -> HttpAdapterBuilder {
		HttpAdapterBuilder::default()
	}

	pub fn coder(&self) -> &Arc<RpcCoder> {
		&self.coder
	}

	pub fn target(&self) -> &str {
		&self.target.url
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// POSTs `method(params)` and decodes the result into `T`.
	///
	/// A non-200 status or a non-JSON content type becomes an [`Error::Rpc`]
	/// with code -32000. Dropping the future cancels the request.
	pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
		if self.is_closed() {
			return Err(Error::Closed);
		}

		let id = self.coder.next_id();
		let body = self.coder.encode(id, method, params)?;

		let mut request = self.client.post(&self.target.url).body(body);
		for (name, value) in &self.target.headers {
			request = request.header(name.as_str(), value.as_str());
		}

		tracing::debug!(id, method, url = %self.target.url, "Sending request");
		let response = request
			.send()
			.await
			.map_err(|e| Error::Transport(e.to_string()))?;

		let status = response.status();
		if status != StatusCode::OK {
			return Err(Error::rpc(
				SERVER_ERROR,
				format!("Server returned error status: {}", status.as_u16()),
			));
		}
		if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
			let content_type = content_type.to_str().unwrap_or_default();
			if !content_type.starts_with(jrpc_protocol::APPLICATION_JSON) {
				return Err(Error::rpc(
					SERVER_ERROR,
					format!("Server returned invalid content-type {content_type}"),
				));
			}
		}

		let body = response
			.bytes()
			.await
			.map_err(|e| Error::Transport(e.to_string()))?;
		self.coder.decode(id, &body)
	}

	/// Marks the adapter closed and runs the close hook. Idempotent.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!(url = %self.target.url, "Closing http adapter");
		let hook = self.on_close.lock().take();
		if let Some(hook) = hook {
			run_close_hook(hook);
		}
	}
}

/// Builder for [`HttpAdapter`].
pub struct HttpAdapterBuilder {
	target: Target,
	coder: Option<Arc<RpcCoder>>,
	timeout: Duration,
	client: Option<reqwest::Client>,
	on_close: Option<CloseHook>,
}

impl Default for HttpAdapterBuilder {
	fn default() -> Self {
		let mut target = Target::new(DEFAULT_HTTP_TARGET);
		default_headers(&mut target);
		Self {
			target,
			coder: None,
			timeout: DEFAULT_HTTP_TIMEOUT,
			client: None,
			on_close: None,
		}
	}
}

impl HttpAdapterBuilder {
	pub fn target(mut self, url: impl Into<String>) -> Self {
		self.target.url = url.into();
		self
	}

	pub fn basic_auth(mut self, username: &str, password: &str) -> Self {
		self.target
			.set_header("Authorization", jrpc_protocol::basic_auth(username, password));
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.target.set_header(name, value);
		self
	}

	pub fn coder(mut self, coder: Arc<RpcCoder>) -> Self {
		self.coder = Some(coder);
		self
	}

	/// Request timeout; ignored when a custom client is supplied.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn client(mut self, client: reqwest::Client) -> Self {
		self.client = Some(client);
		self
	}

	pub fn on_close<F>(mut self, hook: F) -> Self
	where
		F: FnOnce() -> std::result::Result<(), Box<dyn StdError + Send + Sync>> + Send + 'static,
	{
		self.on_close = Some(Box::new(hook));
		self
	}

	pub fn build(self) -> Result<HttpAdapter> {
		let client = match self.client {
			Some(client) => client,
			None => reqwest::Client::builder()
				.timeout(self.timeout)
				.build()
				.map_err(|e| Error::Transport(e.to_string()))?,
		};
		Ok(HttpAdapter {
			client,
			target: self.target,
			coder: self.coder.unwrap_or_default(),
			on_close: Mutex::new(self.on_close),
			closed: AtomicBool::new(false),
		})
	}
}
