//! Pending call registry keyed by call id.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jrpc_protocol::Response;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::reply_value;
use crate::error::{Error, Result};

/// A call that has been registered and is waiting for its reply.
struct PendingCall {
	method: Arc<str>,
	result_type: &'static str,
	completion: oneshot::Sender<Result<Value>>,
}

type PendingMap = Arc<DashMap<u32, PendingCall>>;

/// Maps call ids to the callers waiting on them.
///
/// Each entry is consumed exactly once: by its reply, by a connection
/// failure, or by the caller dropping its [`ReplyFuture`].
#[derive(Default)]
pub(crate) struct CallRegistry {
	pending: PendingMap,
}

impl CallRegistry {
	/// Registers interest in the reply to call `id`.
	///
	/// Must happen before the request is sent so a fast reply is never missed.
	pub fn register(&self, id: u32, method: &str, result_type: &'static str) -> Result<ReplyFuture> {
		let (tx, rx) = oneshot::channel();
		match self.pending.entry(id) {
			Entry::Occupied(_) => {
				return Err(Error::InvalidArgument(format!(
					"call id {id} is already outstanding"
				)));
			}
			Entry::Vacant(slot) => {
				slot.insert(PendingCall {
					method: Arc::from(method),
					result_type,
					completion: tx,
				});
			}
		}

		Ok(ReplyFuture {
			rx,
			guard: CancelGuard::new(id, Arc::clone(&self.pending)),
		})
	}

	/// Completes the call the reply belongs to. Returns false if none is waiting.
	pub fn resolve(&self, response: Response) -> bool {
		let id = response.id;
		let Some((_, call)) = self.pending.remove(&id) else {
			tracing::debug!(id, "Cannot find request to respond (ignored)");
			return false;
		};

		tracing::debug!(id, method = %call.method, result_type = call.result_type, "Reply received");
		let _ = call.completion.send(reply_value(response));
		true
	}

	/// Fails every outstanding call with a connection failure.
	pub fn fail_all(&self, cause: &str) -> usize {
		let ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
		let mut failed = 0;
		for id in ids {
			if let Some((_, call)) = self.pending.remove(&id) {
				let _ = call
					.completion
					.send(Err(Error::ConnectionFailed(cause.to_string())));
				failed += 1;
			}
		}
		failed
	}

	pub fn len(&self) -> usize {
		self.pending.len()
	}

	pub fn contains(&self, id: u32) -> bool {
		self.pending.contains_key(&id)
	}
}

/// RAII guard ensuring registry cleanup when a reply future is dropped.
struct CancelGuard {
	id: u32,
	pending: PendingMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, pending: PendingMap) -> Self {
		Self {
			id,
			pending,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.pending.remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "CancelGuard: removed orphaned call");
		}
	}
}

/// Future returned by [`CallRegistry::register`]; resolves with the raw result.
pub(crate) struct ReplyFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ReplyFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}
