//! Error types for the JSON-RPC runtime.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// JSON-RPC code used for non-success HTTP status and unexpected content type.
pub const SERVER_ERROR: i64 = -32000;

/// JSON-RPC code for an internal error (e.g. a reply id that does not match).
pub const INTERNAL_ERROR: i64 = -32603;

/// Errors that can occur in the JSON-RPC runtime.
///
/// Variants follow three families: transport errors fail the whole
/// connection, protocol errors ([`Error::Rpc`]) fail a single call, and codec
/// errors ([`Error::MalformedPayload`], [`Error::UnknownSubscription`]) fail a
/// single call or event without being confused with a server-reported error.
#[derive(Debug, Error)]
pub enum Error {
	/// The adapter was closed; no further I/O is attempted.
	#[error("Client is already closed")]
	Closed,

	/// The shared connection could not be opened or was lost.
	#[error("Connection failed: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (socket or HTTP client).
	#[error("Transport error: {0}")]
	Transport(String),

	/// Error object reported by the server, or a protocol violation surfaced as one.
	#[error("RPC error {code}: {message}")]
	Rpc {
		code: i64,
		message: String,
		data: Option<Value>,
	},

	/// Payload could not be decoded into the expected result type.
	#[error("Malformed payload: {0}")]
	MalformedPayload(String),

	/// Notification for a subscription id that never became known.
	#[error("Unknown subscription: {0}")]
	UnknownSubscription(String),

	/// Timeout waiting for operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// JSON serialization error while encoding a request.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub(crate) fn rpc(code: i64, message: impl Into<String>) -> Self {
		Error::Rpc {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Returns the JSON-RPC code if this is an [`Error::Rpc`].
	pub fn rpc_code(&self) -> Option<i64> {
		match self {
			Error::Rpc { code, .. } => Some(*code),
			_ => None,
		}
	}

	/// Returns true if the adapter was closed.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::Closed)
	}

	/// Returns true if the error came from the transport rather than the server.
	pub fn is_connection_failure(&self) -> bool {
		matches!(
			self,
			Error::ConnectionFailed(_) | Error::Transport(_) | Error::ChannelClosed
		)
	}

	/// Returns true if a payload could not be decoded.
	pub fn is_decode_error(&self) -> bool {
		matches!(
			self,
			Error::MalformedPayload(_) | Error::UnknownSubscription(_)
		)
	}
}

impl From<jrpc_protocol::ErrorObject> for Error {
	fn from(error: jrpc_protocol::ErrorObject) -> Self {
		Error::Rpc {
			code: error.code,
			message: error.message,
			data: error.data,
		}
	}
}
