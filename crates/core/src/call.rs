//! Typed call descriptions.
//!
//! A call carries its method name, its positional params and, in its type
//! parameter, the type its result is decoded into.

use std::fmt;
use std::marker::PhantomData;

use jrpc_runtime::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// A single request whose result decodes into `T`.
pub struct RpcCall<T> {
	method: String,
	params: Vec<Value>,
	_result: PhantomData<fn() -> T>,
}

impl<T> RpcCall<T> {
	/// Call without params.
	pub fn new(method: impl Into<String>) -> Self {
		Self {
			method: method.into(),
			params: Vec::new(),
			_result: PhantomData,
		}
	}

	/// Appends one positional param.
	pub fn param(mut self, param: impl Serialize) -> Result<Self> {
		self.params.push(serde_json::to_value(param)?);
		Ok(self)
	}

	/// Replaces all params.
	pub fn params(mut self, params: Vec<Value>) -> Self {
		self.params = params;
		self
	}

	pub fn method(&self) -> &str {
		&self.method
	}

	pub fn param_values(&self) -> &[Value] {
		&self.params
	}

	/// Same call, decoded into a different type.
	pub fn cast<U>(self) -> RpcCall<U> {
		RpcCall {
			method: self.method,
			params: self.params,
			_result: PhantomData,
		}
	}

	pub(crate) fn into_parts(self) -> (String, Value) {
		(self.method, Value::Array(self.params))
	}
}

impl<T> Clone for RpcCall<T> {
	fn clone(&self) -> Self {
		Self {
			method: self.method.clone(),
			params: self.params.clone(),
			_result: PhantomData,
		}
	}
}

impl<T> PartialEq for RpcCall<T> {
	fn eq(&self, other: &Self) -> bool {
		self.method == other.method && self.params == other.params
	}
}

impl<T> fmt::Debug for RpcCall<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RpcCall")
			.field("method", &self.method)
			.field("params", &self.params)
			.field("result", &std::any::type_name::<T>())
			.finish()
	}
}

/// A subscription request whose events decode into `T`.
pub struct SubscribeCall<T> {
	call: RpcCall<T>,
	unsubscribe: String,
}

impl<T> SubscribeCall<T> {
	/// Fails if `unsubscribe` is empty.
	pub fn new(method: impl Into<String>, unsubscribe: impl Into<String>) -> Result<Self> {
		let unsubscribe = unsubscribe.into();
		if unsubscribe.is_empty() {
			return Err(Error::InvalidArgument(
				"Unsubscribe method cannot be empty".to_string(),
			));
		}
		Ok(Self {
			call: RpcCall::new(method),
			unsubscribe,
		})
	}

	pub fn param(mut self, param: impl Serialize) -> Result<Self> {
		self.call = self.call.param(param)?;
		Ok(self)
	}

	pub fn params(mut self, params: Vec<Value>) -> Self {
		self.call = self.call.params(params);
		self
	}

	pub fn method(&self) -> &str {
		self.call.method()
	}

	pub fn param_values(&self) -> &[Value] {
		self.call.param_values()
	}

	pub fn unsubscribe(&self) -> &str {
		&self.unsubscribe
	}

	pub fn cast<U>(self) -> SubscribeCall<U> {
		SubscribeCall {
			call: self.call.cast(),
			unsubscribe: self.unsubscribe,
		}
	}

	pub(crate) fn into_parts(self) -> (String, Value, String) {
		let (method, params) = self.call.into_parts();
		(method, params, self.unsubscribe)
	}
}

impl<T> Clone for SubscribeCall<T> {
	fn clone(&self) -> Self {
		Self {
			call: self.call.clone(),
			unsubscribe: self.unsubscribe.clone(),
		}
	}
}

impl<T> PartialEq for SubscribeCall<T> {
	fn eq(&self, other: &Self) -> bool {
		self.call == other.call && self.unsubscribe == other.unsubscribe
	}
}

impl<T> fmt::Debug for SubscribeCall<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubscribeCall")
			.field("method", &self.call.method)
			.field("params", &self.call.params)
			.field("unsubscribe", &self.unsubscribe)
			.finish()
	}
}
