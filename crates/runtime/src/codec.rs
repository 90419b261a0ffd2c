//! Payload codec: request encoding, reply decoding and call id assignment.
//!
//! One [`RpcCoder`] is shared by everything that issues calls on the same
//! connection, so the id counter it carries is the single source of call ids.

use std::any::type_name;
use std::sync::atomic::{AtomicU32, Ordering};

use jrpc_protocol::{Message, Request, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, INTERNAL_ERROR, Result};

/// Encodes requests and decodes replies, assigning sequential call ids.
#[derive(Debug, Default)]
pub struct RpcCoder {
	id: AtomicU32,
}

impl RpcCoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next call id. Ids start at 0 and increase monotonically.
	pub fn next_id(&self) -> u32 {
		self.id.fetch_add(1, Ordering::SeqCst)
	}

	/// Restarts id assignment from 0.
	pub fn reset_id(&self) {
		self.id.store(0, Ordering::SeqCst);
	}

	/// Encodes a request as a JSON text frame.
	pub fn encode(&self, id: u32, method: &str, params: Value) -> Result<String> {
		let request = Request::new(id, method, params);
		Ok(serde_json::to_string(&request)?)
	}

	/// Decodes a full reply body, checking that it answers call `id`.
	///
	/// A server error object becomes [`Error::Rpc`]; invalid JSON or a result
	/// that does not fit `T` becomes [`Error::MalformedPayload`].
	pub fn decode<T: DeserializeOwned>(&self, id: u32, body: &[u8]) -> Result<T> {
		let response: Response = serde_json::from_slice(body)
			.map_err(|e| Error::MalformedPayload(format!("Server returned invalid JSON: {e}")))?;
		if response.id != id {
			return Err(Error::rpc(
				INTERNAL_ERROR,
				format!("Server returned invalid id: {id} != {}", response.id),
			));
		}
		self.decode_result(reply_value(response)?)
	}

	/// Parses one inbound duplex frame without interpreting its result.
	pub fn decode_frame(&self, text: &str) -> Result<Message> {
		serde_json::from_str(text)
			.map_err(|e| Error::MalformedPayload(format!("Invalid frame: {e}")))
	}

	/// Converts a raw result or event value into `T`.
	pub fn decode_result<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
		serde_json::from_value(value).map_err(|e| {
			Error::MalformedPayload(format!("Cannot decode {}: {e}", type_name::<T>()))
		})
	}
}

/// Splits a reply into its result value or its server error.
pub(crate) fn reply_value(response: Response) -> Result<Value> {
	match response.error {
		Some(error) => Err(error.into()),
		None => Ok(response.result.unwrap_or(Value::Null)),
	}
}
