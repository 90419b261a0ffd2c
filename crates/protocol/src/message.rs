//! JSON-RPC 2.0 message shapes.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call.
///
/// `params` is always serialized as a positional array; a `null` params value
/// is normalized to `[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub jsonrpc: String,
	/// Call id, unique among the calls outstanding on one connection.
	pub id: u32,
	pub method: String,
	pub params: Value,
}

impl Request {
	pub fn new(id: u32, method: impl Into<String>, params: Value) -> Self {
		let params = match params {
			Value::Null => Value::Array(Vec::new()),
			other => other,
		};
		Self {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			method: method.into(),
			params,
		}
	}
}

/// Reply to a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jsonrpc: Option<String>,
	/// Id of the request this reply correlates to
	pub id: u32,
	/// Success result (mutually exclusive with error)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorObject>,
}

/// Error object returned by the server in place of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
	pub code: i64,
	#[serde(default)]
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Server push for a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jsonrpc: Option<String>,
	/// Notification method, e.g. `chain_newHead`
	pub method: String,
	pub params: NotificationParams,
}

impl Notification {
	/// Server-assigned id of the subscription this event belongs to.
	pub fn subscription(&self) -> &str {
		&self.params.subscription
	}
}

/// Payload of a [`Notification`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationParams {
	/// Subscription id; servers send either a string or a number.
	#[serde(deserialize_with = "string_or_number")]
	pub subscription: String,
	#[serde(default)]
	pub result: Value,
}

/// Anything that can arrive on a duplex connection.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
	/// Reply to a call (has `id` and a `result` or `error` member, no `method`)
	Response(Response),
	/// Subscription event (has `method` and `params.subscription`)
	Notification(Notification),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

impl<'de> Deserialize<'de> for Message {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = Value::deserialize(deserializer)?;
		let Some(object) = value.as_object() else {
			return Ok(Message::Unknown(value));
		};

		// server-to-client requests carry an id too; only a result or error makes a reply
		let is_reply = !object.contains_key("method")
			&& (object.contains_key("result") || object.contains_key("error"));
		let is_notification = object.contains_key("method")
			&& object
				.get("params")
				.is_some_and(|params| params.get("subscription").is_some());

		let message = if is_reply {
			Response::deserialize(&value).ok().map(Message::Response)
		} else if is_notification {
			Notification::deserialize(&value).ok().map(Message::Notification)
		} else {
			None
		};
		Ok(message.unwrap_or(Message::Unknown(value)))
	}
}

/// Accepts a JSON string or number and yields its string form.
///
/// Subscription ids are opaque to the client but some servers emit them as
/// integers; both forms must compare equal to the id returned by the
/// subscribe call.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	match Value::deserialize(deserializer)? {
		Value::String(s) => Ok(s),
		Value::Number(n) => Ok(n.to_string()),
		other => Err(de::Error::custom(format!(
			"expected string or number, got {other}"
		))),
	}
}
