//! jrpc - typed JSON-RPC 2.0 client
//!
//! Calls and subscriptions are described by [`RpcCall`] and [`SubscribeCall`]
//! and executed through a [`Client`], which routes calls to an HTTP or
//! WebSocket adapter and subscriptions to a WebSocket adapter.
//!
//! The connection machinery lives in `jrpc-runtime` and is re-exported here.

pub mod call;
pub mod client;

pub use call::{RpcCall, SubscribeCall};
pub use client::{CallAdapter, Client, ClientBuilder};
pub use jrpc_runtime::{
	ConnectionState, DuplexAdapter, DuplexAdapterBuilder, Error, Event, HttpAdapter,
	HttpAdapterBuilder, Result, RpcCoder, Subscription,
};
